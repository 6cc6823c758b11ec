use crate::bytecode::compile::{Compiler, GlobalTable, GLOBALS_MAX};
use crate::bytecode::compile_error::CompileError;
use crate::bytecode::op::OpCode;
use crate::lang::ast::Program;
use crate::lang::value::Value;
use crate::runtime::heap::Heap;
use crate::runtime::object::{Handle, Object};
use crate::runtime::runtime_error::{
    arity_mismatch, division_by_zero, frame_overflow, integer_overflow, not_callable,
    stack_overflow, stack_underflow, type_error, RuntimeError,
};

/// Operand stack capacity, in values.
const STACK_MAX: usize = 256;
/// Call depth limit, root frame included.
const FRAMES_MAX: usize = 64;

struct CallFrame {
    function: Handle,
    ip: usize,
    /// Stack index of the callee; frame-local slot 0.
    slots: usize,
}

/// The execution context: operand stack, call frames, global bindings
/// and the object heap. One `Vm` runs one program at a time, but keeps
/// its globals and heap across runs so a REPL can feed it line by line.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: [Value; GLOBALS_MAX],
    global_names: GlobalTable,
    heap: Heap,
    /// Script functions handed out by `compile` that no frame roots
    /// yet. A collection during a later compilation must not free them.
    pending: Vec<Handle>,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            stack: Vec::new(),
            frames: Vec::new(),
            globals: [Value::Bool(false); GLOBALS_MAX],
            global_names: GlobalTable::new(),
            heap: Heap::new(),
            pending: Vec::new(),
        }
    }

    /// Lower a program to a script function. Global names interned by
    /// earlier compilations stay visible, so successive programs can
    /// share bindings.
    pub fn compile(&mut self, program: &Program) -> Result<Handle, CompileError> {
        let mut roots: Vec<Value> =
            Vec::with_capacity(GLOBALS_MAX + self.pending.len() + self.stack.len());
        roots.extend_from_slice(&self.globals);
        roots.extend(self.pending.iter().map(|&h| Value::Obj(h)));
        roots.extend_from_slice(&self.stack);

        let compiler = Compiler::new(&mut self.heap, &mut self.global_names, &roots);
        let function = compiler.compile(program)?;
        self.pending.push(function);
        Ok(function)
    }

    /// Execute a script function to completion. The result is the value
    /// of the script's trailing expression, or `false` if it has none.
    ///
    /// On a runtime error the stack trace is written to stderr and the
    /// VM is reset so the caller can keep using it.
    pub fn run(&mut self, function: Handle) -> Result<Value, RuntimeError> {
        let base = self.stack.len();
        // The script function occupies slot 0 of the root frame, which
        // also keeps it reachable for the collector.
        if let Err(err) = self.push(Value::Obj(function)) {
            return Err(self.fail(err));
        }
        self.frames.push(CallFrame {
            function,
            ip: 0,
            slots: base,
        });
        // The stack roots it now.
        self.pending.retain(|&h| h != function);

        match self.dispatch() {
            Ok(value) => {
                self.stack.truncate(base);
                Ok(value)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    // ------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------

    fn dispatch(&mut self) -> Result<Value, RuntimeError> {
        loop {
            let byte = self.read_byte();
            let op = match OpCode::from_byte(byte) {
                Some(op) => op,
                None => return Err(RuntimeError::new(&format!("invalid opcode {:#04x}", byte))),
            };

            match op {
                OpCode::Constant => {
                    let index = self.read_byte() as usize;
                    let frame = self.frame();
                    let value = self.heap.function(frame.function).chunk.constants[index];
                    self.push(value)?;
                }
                OpCode::True => self.push(Value::Bool(true))?,
                OpCode::False => self.push(Value::Bool(false))?,
                OpCode::Pop => {
                    self.pop()?;
                }

                OpCode::DefineGlobal => {
                    let slot = self.read_byte() as usize;
                    self.globals[slot] = self.pop()?;
                }
                OpCode::GetGlobal => {
                    let slot = self.read_byte() as usize;
                    self.push(self.globals[slot])?;
                }
                OpCode::SetGlobal => {
                    // Assignment is an expression; the value stays put.
                    let slot = self.read_byte() as usize;
                    self.globals[slot] = self.peek(0)?;
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let value = self.stack[self.frame().slots + slot];
                    self.push(value)?;
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let value = self.peek(0)?;
                    let index = self.frame().slots + slot;
                    self.stack[index] = value;
                }

                OpCode::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let equal = self.heap.values_equal(a, b);
                    self.push(Value::Bool(equal))?;
                }
                OpCode::Greater => {
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    self.push(Value::Bool(a > b))?;
                }
                OpCode::Less => {
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    self.push(Value::Bool(a < b))?;
                }
                OpCode::Not => {
                    let b = self.pop_bool()?;
                    self.push(Value::Bool(!b))?;
                }

                OpCode::Add => self.add()?,
                OpCode::Subtract => {
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    let value = a.checked_sub(b).ok_or_else(integer_overflow)?;
                    self.push(Value::Int(value))?;
                }
                OpCode::Multiply => {
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    let value = a.checked_mul(b).ok_or_else(integer_overflow)?;
                    self.push(Value::Int(value))?;
                }
                OpCode::Divide => {
                    // Checked before popping so the trace sees a
                    // coherent stack.
                    if self.peek(0)? == Value::Int(0) {
                        return Err(division_by_zero());
                    }
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    // i64::MIN / -1 has no representation.
                    let value = a.checked_div(b).ok_or_else(integer_overflow)?;
                    self.push(Value::Int(value))?;
                }
                OpCode::Modulo => {
                    if self.peek(0)? == Value::Int(0) {
                        return Err(division_by_zero());
                    }
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    let value = a.checked_rem(b).ok_or_else(integer_overflow)?;
                    self.push(Value::Int(value))?;
                }
                OpCode::Negate => {
                    let a = self.pop_int()?;
                    let value = a.checked_neg().ok_or_else(integer_overflow)?;
                    self.push(Value::Int(value))?;
                }

                OpCode::Print => {
                    let value = self.pop()?;
                    println!("{}", self.heap.value_to_string(value));
                }

                OpCode::Jump => {
                    let distance = self.read_u16() as usize;
                    self.frame_mut().ip += distance;
                }
                OpCode::JumpIfFalse => {
                    // Peeks; the compiler pops the condition on both
                    // paths.
                    let distance = self.read_u16() as usize;
                    if self.peek(0)? == Value::Bool(false) {
                        self.frame_mut().ip += distance;
                    }
                }
                OpCode::Loop => {
                    let distance = self.read_u16() as usize;
                    self.frame_mut().ip -= distance;
                }

                OpCode::Call => {
                    let argc = self.read_byte() as usize;
                    self.call(argc)?;
                }
                OpCode::Return => {
                    let result = self.pop()?;
                    let frame = match self.frames.pop() {
                        Some(frame) => frame,
                        None => return Err(stack_underflow()),
                    };
                    if self.frames.is_empty() {
                        return Ok(result);
                    }
                    self.stack.truncate(frame.slots);
                    self.push(result)?;
                }
            }
        }
    }

    fn add(&mut self) -> Result<(), RuntimeError> {
        let b = self.peek(0)?;
        let a = self.peek(1)?;
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => {
                let sum = x.checked_add(y).ok_or_else(integer_overflow)?;
                self.pop()?;
                self.pop()?;
                self.push(Value::Int(sum))
            }
            (Value::Obj(ha), Value::Obj(hb)) => {
                let text = match (self.heap.object(ha), self.heap.object(hb)) {
                    (Object::String(sa), Object::String(sb)) => format!("{}{}", sa, sb),
                    // Name the operand that is not a string.
                    (Object::String(_), _) => {
                        return Err(type_error("two ints or two strings", self.heap.kind(hb)))
                    }
                    _ => {
                        return Err(type_error("two ints or two strings", self.heap.kind(ha)))
                    }
                };
                // Operands stay on the stack across a possible
                // collection; only then is the result registered.
                let roots = self.gc_roots();
                let handle = self
                    .heap
                    .alloc(Object::String(text.into_boxed_str()), &roots);
                self.pop()?;
                self.pop()?;
                self.push(Value::Obj(handle))
            }
            _ => Err(type_error("two ints or two strings", self.describe(b))),
        }
    }

    fn call(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let callee = self.peek(argc)?;
        let Value::Obj(handle) = callee else {
            return Err(not_callable(callee.type_name()));
        };
        let (arity, name) = match self.heap.object(handle) {
            Object::Function(f) => {
                let name = match f.name {
                    Some(n) => self.heap.string(n).to_string(),
                    None => "<script>".to_string(),
                };
                (f.arity, name)
            }
            other => return Err(not_callable(other.kind())),
        };

        if arity as usize != argc {
            return Err(arity_mismatch(&name, arity, argc));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(frame_overflow());
        }

        self.frames.push(CallFrame {
            function: handle,
            ip: 0,
            slots: self.stack.len() - argc - 1,
        });
        Ok(())
    }

    // ------------------------------------------------------------
    // Stack and frame helpers
    // ------------------------------------------------------------

    fn frame(&self) -> &CallFrame {
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        let index = self.frames.len() - 1;
        &mut self.frames[index]
    }

    fn read_byte(&mut self) -> u8 {
        let index = self.frames.len() - 1;
        let frame = &self.frames[index];
        let byte = self.heap.function(frame.function).chunk.code[frame.ip];
        self.frames[index].ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() == STACK_MAX {
            return Err(stack_overflow());
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or_else(stack_underflow)
    }

    fn pop_int(&mut self) -> Result<i64, RuntimeError> {
        match self.pop()? {
            Value::Int(i) => Ok(i),
            other => Err(type_error("int", self.describe(other))),
        }
    }

    fn pop_bool(&mut self) -> Result<bool, RuntimeError> {
        match self.pop()? {
            Value::Bool(b) => Ok(b),
            other => Err(type_error("bool", self.describe(other))),
        }
    }

    fn peek(&self, depth: usize) -> Result<Value, RuntimeError> {
        if depth >= self.stack.len() {
            return Err(stack_underflow());
        }
        Ok(self.stack[self.stack.len() - 1 - depth])
    }

    fn describe(&self, value: Value) -> &'static str {
        match value {
            Value::Obj(handle) => self.heap.kind(handle),
            other => other.type_name(),
        }
    }

    /// Everything the collector must keep alive: the whole operand
    /// stack (each frame's function sits in its slot 0), every global
    /// binding, and compiled scripts that have not run yet.
    fn gc_roots(&self) -> Vec<Value> {
        let mut roots = Vec::with_capacity(self.stack.len() + GLOBALS_MAX + self.pending.len());
        roots.extend_from_slice(&self.stack);
        roots.extend_from_slice(&self.globals);
        roots.extend(self.pending.iter().map(|&h| Value::Obj(h)));
        roots
    }

    /// Attach the frame trace, report to stderr, and reset for reuse.
    fn fail(&mut self, mut err: RuntimeError) -> RuntimeError {
        for frame in &self.frames {
            let function = self.heap.function(frame.function);
            let name = match function.name {
                Some(n) => self.heap.string(n),
                None => "script",
            };
            let offset = frame
                .ip
                .saturating_sub(1)
                .min(function.chunk.lines.len().saturating_sub(1));
            let line = function.chunk.line_at(offset);
            err = err.with_context(&format!("[line {}] in {}", line, name));
        }
        eprintln!("{}", err);

        self.stack.clear();
        self.frames.clear();
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::ast::{BinaryOp, Expr, Program, Stmt, UnaryOp};

    // ============================================================
    // Helpers
    // ============================================================

    fn run_script(stmts: Vec<Stmt>) -> Result<Value, RuntimeError> {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut vm = Vm::new();
        let function = vm.compile(&Program::new(stmts)).expect("compile failed");
        vm.run(function)
    }

    fn assert_script(stmts: Vec<Stmt>, expected: Value) {
        assert_eq!(run_script(stmts).expect("script failed"), expected);
    }

    fn assert_runtime_error(stmts: Vec<Stmt>, needle: &str) {
        match run_script(stmts) {
            Err(err) => assert!(
                err.message.contains(needle),
                "expected error containing '{}', got '{}'",
                needle,
                err.message
            ),
            Ok(value) => panic!("expected runtime error, got {:?}", value),
        }
    }

    fn int(v: i64) -> Expr {
        Expr::int(v, 1)
    }

    fn bin(op: BinaryOp, l: Expr, r: Expr) -> Expr {
        Expr::binary(op, l, r, 1)
    }

    fn var(name: &str) -> Expr {
        Expr::variable(name, 1)
    }

    fn trailing(e: Expr) -> Stmt {
        Stmt::expr(e, 1)
    }

    // ============================================================
    // Arithmetic and logic
    // ============================================================

    #[test]
    fn test_arithmetic() {
        assert_script(
            vec![trailing(bin(
                BinaryOp::Add,
                int(1),
                bin(BinaryOp::Multiply, int(2), int(3)),
            ))],
            Value::Int(7),
        );
        assert_script(
            vec![trailing(bin(BinaryOp::Subtract, int(10), int(4)))],
            Value::Int(6),
        );
        assert_script(
            vec![trailing(bin(BinaryOp::Modulo, int(17), int(5)))],
            Value::Int(2),
        );
    }

    #[test]
    fn test_unary_operators() {
        assert_script(
            vec![trailing(Expr::unary(UnaryOp::Negate, int(5), 1))],
            Value::Int(-5),
        );
        assert_script(
            vec![trailing(Expr::unary(UnaryOp::Not, Expr::boolean(true, 1), 1))],
            Value::Bool(false),
        );
    }

    #[test]
    fn test_comparisons_including_synthesized() {
        assert_script(
            vec![trailing(bin(BinaryOp::Greater, int(3), int(2)))],
            Value::Bool(true),
        );
        assert_script(
            vec![trailing(bin(BinaryOp::GreaterEqual, int(3), int(3)))],
            Value::Bool(true),
        );
        assert_script(
            vec![trailing(bin(BinaryOp::LessEqual, int(4), int(3)))],
            Value::Bool(false),
        );
        assert_script(
            vec![trailing(bin(BinaryOp::NotEqual, int(1), int(2)))],
            Value::Bool(true),
        );
    }

    #[test]
    fn test_division_by_zero() {
        assert_runtime_error(
            vec![trailing(bin(BinaryOp::Divide, int(1), int(0)))],
            "division by zero",
        );
        assert_runtime_error(
            vec![trailing(bin(BinaryOp::Modulo, int(1), int(0)))],
            "division by zero",
        );
    }

    #[test]
    fn test_add_type_mismatch() {
        assert_runtime_error(
            vec![trailing(bin(BinaryOp::Add, int(1), Expr::boolean(true, 1)))],
            "two ints or two strings",
        );
    }

    #[test]
    fn test_add_mismatch_reports_the_offending_operand() {
        // string + function: the right operand is the bad one.
        assert_runtime_error(
            vec![
                Stmt::func("noop", vec![], vec![], 1),
                trailing(bin(BinaryOp::Add, Expr::string("a", 1), var("noop"))),
            ],
            "found function",
        );
    }

    #[test]
    fn test_integer_overflow_is_a_runtime_error() {
        assert_runtime_error(
            vec![trailing(bin(BinaryOp::Divide, int(i64::MIN), int(-1)))],
            "integer overflow",
        );
        assert_runtime_error(
            vec![trailing(bin(BinaryOp::Modulo, int(i64::MIN), int(-1)))],
            "integer overflow",
        );
        assert_runtime_error(
            vec![trailing(Expr::unary(UnaryOp::Negate, int(i64::MIN), 1))],
            "integer overflow",
        );
        assert_runtime_error(
            vec![trailing(bin(BinaryOp::Add, int(i64::MAX), int(1)))],
            "integer overflow",
        );
        assert_runtime_error(
            vec![trailing(bin(BinaryOp::Subtract, int(i64::MIN), int(1)))],
            "integer overflow",
        );
        assert_runtime_error(
            vec![trailing(bin(BinaryOp::Multiply, int(i64::MAX), int(2)))],
            "integer overflow",
        );
    }

    // ============================================================
    // Strings and equality
    // ============================================================

    #[test]
    fn test_string_concatenation() {
        let mut vm = Vm::new();
        let program = Program::new(vec![trailing(bin(
            BinaryOp::Add,
            Expr::string("foo", 1),
            Expr::string("bar", 1),
        ))]);
        let function = vm.compile(&program).unwrap();
        let result = vm.run(function).unwrap();
        assert_eq!(vm.heap().value_to_string(result), "foobar");
    }

    #[test]
    fn test_string_equality_is_by_content() {
        assert_script(
            vec![trailing(bin(
                BinaryOp::Equal,
                Expr::string("abc", 1),
                Expr::string("abc", 1),
            ))],
            Value::Bool(true),
        );
        assert_script(
            vec![trailing(bin(
                BinaryOp::NotEqual,
                Expr::string("abc", 1),
                Expr::string("abd", 1),
            ))],
            Value::Bool(true),
        );
    }

    #[test]
    fn test_equality_across_tags_is_false() {
        assert_script(
            vec![trailing(bin(BinaryOp::Equal, int(1), Expr::boolean(true, 1)))],
            Value::Bool(false),
        );
    }

    // ============================================================
    // Variables and scoping
    // ============================================================

    #[test]
    fn test_global_define_and_read() {
        assert_script(
            vec![Stmt::var("a", int(10), 1), trailing(var("a"))],
            Value::Int(10),
        );
    }

    #[test]
    fn test_assignment_is_an_expression() {
        assert_script(
            vec![Stmt::var("a", int(1), 1), trailing(Expr::assign("a", int(5), 1))],
            Value::Int(5),
        );
    }

    #[test]
    fn test_shadowed_local_leaves_global_untouched() {
        assert_script(
            vec![
                Stmt::var("a", int(10), 1),
                Stmt::block(vec![Stmt::var("a", int(99), 2)], 2),
                trailing(var("a")),
            ],
            Value::Int(10),
        );
    }

    #[test]
    fn test_local_assignment_inside_block() {
        assert_script(
            vec![
                Stmt::var("a", int(0), 1),
                Stmt::block(
                    vec![
                        Stmt::var("b", int(5), 2),
                        Stmt::expr(
                            Expr::assign("a", bin(BinaryOp::Add, var("b"), int(1)), 3),
                            3,
                        ),
                    ],
                    2,
                ),
                trailing(var("a")),
            ],
            Value::Int(6),
        );
    }

    #[test]
    fn test_script_without_trailing_expression_returns_false() {
        assert_script(vec![Stmt::var("a", int(1), 1)], Value::Bool(false));
    }

    // ============================================================
    // Control flow
    // ============================================================

    #[test]
    fn test_if_else_branches() {
        assert_script(
            vec![
                Stmt::var("a", int(0), 1),
                Stmt::if_else(
                    Expr::boolean(true, 2),
                    Stmt::expr(Expr::assign("a", int(1), 2), 2),
                    Some(Stmt::expr(Expr::assign("a", int(2), 2), 2)),
                    2,
                ),
                trailing(var("a")),
            ],
            Value::Int(1),
        );
        assert_script(
            vec![
                Stmt::var("a", int(0), 1),
                Stmt::if_else(
                    Expr::boolean(false, 2),
                    Stmt::expr(Expr::assign("a", int(1), 2), 2),
                    Some(Stmt::expr(Expr::assign("a", int(2), 2), 2)),
                    2,
                ),
                trailing(var("a")),
            ],
            Value::Int(2),
        );
    }

    #[test]
    fn test_elif_chain() {
        // if a == 1 {...} elif a == 2 { r = 20; } else {...}
        let script = |a: i64| {
            vec![
                Stmt::var("a", int(a), 1),
                Stmt::var("r", int(0), 1),
                Stmt::if_else(
                    bin(BinaryOp::Equal, var("a"), int(1)),
                    Stmt::expr(Expr::assign("r", int(10), 2), 2),
                    Some(Stmt::if_else(
                        bin(BinaryOp::Equal, var("a"), int(2)),
                        Stmt::expr(Expr::assign("r", int(20), 3), 3),
                        Some(Stmt::expr(Expr::assign("r", int(30), 4), 4)),
                        3,
                    )),
                    2,
                ),
                trailing(var("r")),
            ]
        };
        assert_script(script(1), Value::Int(10));
        assert_script(script(2), Value::Int(20));
        assert_script(script(9), Value::Int(30));
    }

    #[test]
    fn test_while_loop_sums() {
        // var i = 0; var sum = 0; while i < 5 { i = i + 1; sum = sum + i; } sum;
        assert_script(
            vec![
                Stmt::var("i", int(0), 1),
                Stmt::var("sum", int(0), 1),
                Stmt::while_loop(
                    bin(BinaryOp::Less, var("i"), int(5)),
                    Stmt::block(
                        vec![
                            Stmt::expr(Expr::assign("i", bin(BinaryOp::Add, var("i"), int(1)), 2), 2),
                            Stmt::expr(
                                Expr::assign("sum", bin(BinaryOp::Add, var("sum"), var("i")), 3),
                                3,
                            ),
                        ],
                        2,
                    ),
                    2,
                ),
                trailing(var("sum")),
            ],
            Value::Int(15),
        );
    }

    #[test]
    fn test_while_loop_that_never_runs() {
        assert_script(
            vec![
                Stmt::var("a", int(7), 1),
                Stmt::while_loop(
                    Expr::boolean(false, 2),
                    Stmt::expr(Expr::assign("a", int(0), 2), 2),
                    2,
                ),
                trailing(var("a")),
            ],
            Value::Int(7),
        );
    }

    // ============================================================
    // Functions and calls
    // ============================================================

    fn add_function() -> Stmt {
        Stmt::func(
            "add",
            vec!["a", "b"],
            vec![Stmt::ret(
                Some(bin(BinaryOp::Add, var("a"), var("b"))),
                2,
            )],
            1,
        )
    }

    #[test]
    fn test_call_with_arguments() {
        assert_script(
            vec![
                add_function(),
                trailing(Expr::call(var("add"), vec![int(400), int(700)], 3)),
            ],
            Value::Int(1100),
        );
    }

    #[test]
    fn test_nested_calls() {
        // func double(x) { return x + x; }
        // func quad(x) { return double(double(x)); }
        // quad(5);
        assert_script(
            vec![
                Stmt::func(
                    "double",
                    vec!["x"],
                    vec![Stmt::ret(Some(bin(BinaryOp::Add, var("x"), var("x"))), 1)],
                    1,
                ),
                Stmt::func(
                    "quad",
                    vec!["x"],
                    vec![Stmt::ret(
                        Some(Expr::call(
                            var("double"),
                            vec![Expr::call(var("double"), vec![var("x")], 2)],
                            2,
                        )),
                        2,
                    )],
                    2,
                ),
                trailing(Expr::call(var("quad"), vec![int(5)], 3)),
            ],
            Value::Int(20),
        );
    }

    #[test]
    fn test_recursive_fibonacci() {
        // func fib(n) { if n < 2 { return n; } return fib(n-1) + fib(n-2); }
        assert_script(
            vec![
                Stmt::func(
                    "fib",
                    vec!["n"],
                    vec![
                        Stmt::if_else(
                            bin(BinaryOp::Less, var("n"), int(2)),
                            Stmt::ret(Some(var("n")), 2),
                            None,
                            2,
                        ),
                        Stmt::ret(
                            Some(bin(
                                BinaryOp::Add,
                                Expr::call(var("fib"), vec![bin(BinaryOp::Subtract, var("n"), int(1))], 3),
                                Expr::call(var("fib"), vec![bin(BinaryOp::Subtract, var("n"), int(2))], 3),
                            )),
                            3,
                        ),
                    ],
                    1,
                ),
                trailing(Expr::call(var("fib"), vec![int(8)], 4)),
            ],
            Value::Int(21),
        );
    }

    #[test]
    fn test_mutual_recursion() {
        // func is_even(n) { if n == 0 { return true; } return is_odd(n - 1); }
        // func is_odd(n) { if n == 0 { return false; } return is_even(n - 1); }
        // is_even(10);
        assert_script(
            vec![
                Stmt::func(
                    "is_even",
                    vec!["n"],
                    vec![
                        Stmt::if_else(
                            bin(BinaryOp::Equal, var("n"), int(0)),
                            Stmt::ret(Some(Expr::boolean(true, 1)), 1),
                            None,
                            1,
                        ),
                        Stmt::ret(
                            Some(Expr::call(
                                var("is_odd"),
                                vec![bin(BinaryOp::Subtract, var("n"), int(1))],
                                2,
                            )),
                            2,
                        ),
                    ],
                    1,
                ),
                Stmt::func(
                    "is_odd",
                    vec!["n"],
                    vec![
                        Stmt::if_else(
                            bin(BinaryOp::Equal, var("n"), int(0)),
                            Stmt::ret(Some(Expr::boolean(false, 3)), 3),
                            None,
                            3,
                        ),
                        Stmt::ret(
                            Some(Expr::call(
                                var("is_even"),
                                vec![bin(BinaryOp::Subtract, var("n"), int(1))],
                                4,
                            )),
                            4,
                        ),
                    ],
                    3,
                ),
                trailing(Expr::call(var("is_even"), vec![int(10)], 5)),
            ],
            Value::Bool(true),
        );
    }

    #[test]
    fn test_parameter_mutation_is_frame_local() {
        // func twice(n) { n = n * 2; return n; } twice(5);
        assert_script(
            vec![
                Stmt::func(
                    "twice",
                    vec!["n"],
                    vec![
                        Stmt::expr(
                            Expr::assign("n", bin(BinaryOp::Multiply, var("n"), int(2)), 1),
                            1,
                        ),
                        Stmt::ret(Some(var("n")), 2),
                    ],
                    1,
                ),
                trailing(Expr::call(var("twice"), vec![int(5)], 3)),
            ],
            Value::Int(10),
        );
    }

    #[test]
    fn test_function_locals() {
        // func f(x) { var y = x + 1; return y * 2; } f(3);
        assert_script(
            vec![
                Stmt::func(
                    "f",
                    vec!["x"],
                    vec![
                        Stmt::var("y", bin(BinaryOp::Add, var("x"), int(1)), 1),
                        Stmt::ret(Some(bin(BinaryOp::Multiply, var("y"), int(2))), 2),
                    ],
                    1,
                ),
                trailing(Expr::call(var("f"), vec![int(3)], 3)),
            ],
            Value::Int(8),
        );
    }

    #[test]
    fn test_function_falling_off_end_returns_false() {
        assert_script(
            vec![
                Stmt::func("noop", vec![], vec![], 1),
                trailing(Expr::call(var("noop"), vec![], 2)),
            ],
            Value::Bool(false),
        );
    }

    #[test]
    fn test_arity_mismatch() {
        assert_runtime_error(
            vec![
                add_function(),
                trailing(Expr::call(var("add"), vec![int(1)], 3)),
            ],
            "expects 2 argument",
        );
    }

    #[test]
    fn test_calling_a_non_function() {
        assert_runtime_error(
            vec![
                Stmt::var("x", int(5), 1),
                trailing(Expr::call(var("x"), vec![], 2)),
            ],
            "can only call functions",
        );
    }

    #[test]
    fn test_unbounded_recursion_hits_frame_limit() {
        assert_runtime_error(
            vec![
                Stmt::func(
                    "forever",
                    vec![],
                    vec![Stmt::ret(Some(Expr::call(var("forever"), vec![], 1)), 1)],
                    1,
                ),
                trailing(Expr::call(var("forever"), vec![], 2)),
            ],
            "call depth",
        );
    }

    #[test]
    fn test_deep_expression_overflows_value_stack() {
        // a + (a + (a + ...)), nested past the stack limit; variable
        // reads keep the constant pool small.
        let mut expr = var("a");
        for _ in 0..300 {
            expr = bin(BinaryOp::Add, var("a"), expr);
        }
        assert_runtime_error(
            vec![Stmt::var("a", int(1), 1), trailing(expr)],
            "stack overflow",
        );
    }

    #[test]
    fn test_error_trace_reports_innermost_frame_first() {
        let result = run_script(vec![
            Stmt::func(
                "inner",
                vec![],
                vec![Stmt::ret(
                    Some(Expr::binary(
                        BinaryOp::Divide,
                        Expr::int(1, 2),
                        Expr::int(0, 2),
                        2,
                    )),
                    2,
                )],
                1,
            ),
            Stmt::func(
                "outer",
                vec![],
                vec![Stmt::ret(Some(Expr::call(var("inner"), vec![], 4)), 4)],
                3,
            ),
            Stmt::expr(Expr::call(var("outer"), vec![], 5), 5),
        ]);

        let err = result.expect_err("expected division by zero");
        assert_eq!(err.call_stack.len(), 3);
        // Entries are outermost first; the display reverses them.
        assert!(err.call_stack[0].contains("script"));
        assert!(err.call_stack[1].contains("outer"));
        assert!(err.call_stack[2].contains("inner"));
        assert!(err.call_stack[2].contains("line 2"));

        let rendered = err.to_string();
        let inner_at = rendered.find("in inner").unwrap();
        let outer_at = rendered.find("in outer").unwrap();
        assert!(inner_at < outer_at);
    }

    // ============================================================
    // VM reuse
    // ============================================================

    #[test]
    fn test_globals_persist_across_runs() {
        let mut vm = Vm::new();

        let first = vm
            .compile(&Program::new(vec![Stmt::var("a", int(1), 1)]))
            .unwrap();
        assert_eq!(vm.run(first).unwrap(), Value::Bool(false));

        let second = vm
            .compile(&Program::new(vec![trailing(bin(
                BinaryOp::Add,
                var("a"),
                int(1),
            ))]))
            .unwrap();
        assert_eq!(vm.run(second).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_compiled_script_survives_collection_during_later_compile() {
        let mut vm = Vm::new();

        let first = vm
            .compile(&Program::new(vec![trailing(int(7))]))
            .unwrap();
        // A constant big enough to push the heap past its collection
        // threshold while the first script is still waiting to run.
        let big = "x".repeat(2 * 1024 * 1024);
        let second = vm
            .compile(&Program::new(vec![trailing(Expr::string(big, 1))]))
            .unwrap();

        assert_eq!(vm.run(first).unwrap(), Value::Int(7));
        let result = vm.run(second).unwrap();
        assert_eq!(
            vm.heap().value_to_string(result).len(),
            2 * 1024 * 1024
        );
    }

    #[test]
    fn test_vm_is_usable_after_a_runtime_error() {
        let mut vm = Vm::new();

        let bad = vm
            .compile(&Program::new(vec![trailing(bin(
                BinaryOp::Divide,
                int(1),
                int(0),
            ))]))
            .unwrap();
        assert!(vm.run(bad).is_err());

        let good = vm
            .compile(&Program::new(vec![trailing(int(3))]))
            .unwrap();
        assert_eq!(vm.run(good).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_print_leaves_stack_neutral() {
        assert_script(
            vec![
                Stmt::print(Expr::string("hello", 1), 1),
                trailing(int(2)),
            ],
            Value::Int(2),
        );
    }

    #[test]
    fn test_top_level_return() {
        assert_script(
            vec![Stmt::ret(Some(int(42)), 1), Stmt::var("unreached", int(0), 2)],
            Value::Int(42),
        );
    }
}
