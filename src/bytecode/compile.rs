use log::debug;

use crate::bytecode::chunk::Chunk;
use crate::bytecode::compile_error::CompileError;
use crate::bytecode::disasm;
use crate::bytecode::op::OpCode;
use crate::lang::ast::{BinaryOp, Expr, Program, Stmt, UnaryOp};
use crate::lang::value::Value;
use crate::runtime::heap::Heap;
use crate::runtime::object::{Handle, ObjFunction, Object};

/// One-byte global slots; the table never holds more names than this.
pub const GLOBALS_MAX: usize = 256;
/// One-byte local slots per frame, including the reserved callee slot.
const LOCALS_MAX: usize = 256;
const CONSTANTS_MAX: usize = 256;
const PARAMS_MAX: usize = 255;
const ARGS_MAX: usize = 255;

/// Maps global names to their runtime slots. Owned by the VM so the
/// mapping survives across compilations; a REPL line can refer to
/// bindings made by earlier lines.
#[derive(Debug, Default)]
pub struct GlobalTable {
    names: Vec<String>,
}

impl GlobalTable {
    pub fn new() -> Self {
        GlobalTable::default()
    }

    pub fn resolve(&self, name: &str) -> Option<u8> {
        self.names.iter().position(|n| n == name).map(|i| i as u8)
    }

    /// Slot for `name`, reusing an existing binding's slot or claiming
    /// the next free one.
    pub fn intern(&mut self, name: &str, line: u32) -> Result<u8, CompileError> {
        if let Some(slot) = self.resolve(name) {
            return Ok(slot);
        }
        if self.names.len() == GLOBALS_MAX {
            return Err(CompileError::too_many_globals(name, line));
        }
        self.names.push(name.to_string());
        Ok((self.names.len() - 1) as u8)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

struct Local {
    name: String,
    depth: u32,
}

/// Per-function compilation state. The compiler keeps a stack of these;
/// a nested `func` declaration pushes a fresh one and pops it when the
/// body is done.
struct FunctionState {
    chunk: Chunk,
    locals: Vec<Local>,
    scope_depth: u32,
    name: Option<String>,
    arity: u8,
}

impl FunctionState {
    fn new(name: Option<String>, arity: u8) -> Self {
        FunctionState {
            chunk: Chunk::new(),
            // Slot 0 of every frame holds the callee.
            locals: vec![Local {
                name: String::new(),
                depth: 0,
            }],
            scope_depth: 0,
            name,
            arity,
        }
    }
}

/// Lowers a [`Program`] to bytecode. Descent stops at the first error;
/// no partially-built function escapes.
///
/// String and function constants are heap objects, so the compiler
/// allocates against the VM's heap; `outer_roots` (the VM's globals)
/// plus every in-progress chunk's constants keep live objects safe if a
/// collection fires mid-compilation.
pub struct Compiler<'a> {
    heap: &'a mut Heap,
    globals: &'a mut GlobalTable,
    outer_roots: &'a [Value],
    states: Vec<FunctionState>,
}

impl<'a> Compiler<'a> {
    pub fn new(heap: &'a mut Heap, globals: &'a mut GlobalTable, outer_roots: &'a [Value]) -> Self {
        Compiler {
            heap,
            globals,
            outer_roots,
            states: Vec::new(),
        }
    }

    /// Compile a whole script down to a function object.
    ///
    /// The script's value is its trailing expression statement, if it
    /// has one; any other expression statement is popped after
    /// evaluation. A script without a trailing expression returns
    /// `false`.
    pub fn compile(mut self, program: &Program) -> Result<Handle, CompileError> {
        self.states.push(FunctionState::new(None, 0));
        self.hoist_functions(&program.statements)?;

        let trailing = matches!(program.statements.last(), Some(Stmt::Expr { .. }));
        let last = program.statements.len().saturating_sub(1);
        for (i, stmt) in program.statements.iter().enumerate() {
            if trailing && i == last {
                if let Stmt::Expr { expr, .. } = stmt {
                    self.expression(expr)?;
                }
            } else {
                self.statement(stmt)?;
            }
        }

        let end_line = program.statements.last().map_or(1, Stmt::line);
        if !trailing {
            self.emit_op(OpCode::False, end_line);
        }
        self.emit_op(OpCode::Return, end_line);

        self.finish_function()
    }

    /// Intern every declared function name up front so forward and
    /// mutual references resolve. Variables are not hoisted; using one
    /// before its declaration stays an error.
    fn hoist_functions(&mut self, statements: &[Stmt]) -> Result<(), CompileError> {
        for stmt in statements {
            match stmt {
                Stmt::Func {
                    name, body, line, ..
                } => {
                    self.globals.intern(name, *line)?;
                    self.hoist_functions(body)?;
                }
                Stmt::Block { statements, .. } => self.hoist_functions(statements)?,
                Stmt::If {
                    then_branch,
                    else_branch,
                    ..
                } => {
                    self.hoist_functions(std::slice::from_ref(then_branch))?;
                    if let Some(else_branch) = else_branch {
                        self.hoist_functions(std::slice::from_ref(else_branch))?;
                    }
                }
                Stmt::While { body, .. } => {
                    self.hoist_functions(std::slice::from_ref(body))?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------

    fn statement(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::VarDecl { name, init, line } => {
                self.expression(init)?;
                if self.state().scope_depth == 0 {
                    let slot = self.globals.intern(name, *line)?;
                    self.emit_op(OpCode::DefineGlobal, *line);
                    self.emit(slot, *line);
                } else {
                    // The initializer's stack slot becomes the local.
                    self.add_local(name, *line)?;
                }
                Ok(())
            }
            Stmt::Print { value, line } => {
                self.expression(value)?;
                self.emit_op(OpCode::Print, *line);
                Ok(())
            }
            Stmt::Expr { expr, line } => {
                self.expression(expr)?;
                self.emit_op(OpCode::Pop, *line);
                Ok(())
            }
            Stmt::Block { statements, line } => {
                self.begin_scope();
                for stmt in statements {
                    self.statement(stmt)?;
                }
                self.end_scope(*line);
                Ok(())
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                line,
            } => self.if_statement(condition, then_branch, else_branch.as_deref(), *line),
            Stmt::While {
                condition,
                body,
                line,
            } => self.while_statement(condition, body, *line),
            Stmt::Func {
                name,
                params,
                body,
                line,
            } => self.func_statement(name, params, body, *line),
            Stmt::Return { value, line } => {
                match value {
                    Some(expr) => self.expression(expr)?,
                    None => self.emit_op(OpCode::False, *line),
                }
                self.emit_op(OpCode::Return, *line);
                Ok(())
            }
        }
    }

    fn if_statement(
        &mut self,
        condition: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
        line: u32,
    ) -> Result<(), CompileError> {
        self.expression(condition)?;

        // The conditional jump peeks, so both paths pop the condition.
        let then_jump = self.emit_jump(OpCode::JumpIfFalse, line);
        self.emit_op(OpCode::Pop, line);
        self.statement(then_branch)?;
        let else_jump = self.emit_jump(OpCode::Jump, line);

        self.patch_jump(then_jump, line)?;
        self.emit_op(OpCode::Pop, line);
        if let Some(else_branch) = else_branch {
            self.statement(else_branch)?;
        }
        self.patch_jump(else_jump, line)?;
        Ok(())
    }

    fn while_statement(
        &mut self,
        condition: &Expr,
        body: &Stmt,
        line: u32,
    ) -> Result<(), CompileError> {
        let loop_start = self.state().chunk.code.len();
        self.expression(condition)?;

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse, line);
        self.emit_op(OpCode::Pop, line);
        self.statement(body)?;
        self.emit_loop(loop_start, line)?;

        self.patch_jump(exit_jump, line)?;
        self.emit_op(OpCode::Pop, line);
        Ok(())
    }

    /// Functions bind into the global namespace wherever they are
    /// declared; their bodies see their own parameters and locals plus
    /// globals, never an enclosing function's locals.
    fn func_statement(
        &mut self,
        name: &str,
        params: &[String],
        body: &[Stmt],
        line: u32,
    ) -> Result<(), CompileError> {
        if params.len() > PARAMS_MAX {
            return Err(CompileError::too_many_parameters(name, line));
        }

        // Claim the global slot before the body compiles so recursive
        // references to the function's own name resolve.
        let slot = self.globals.intern(name, line)?;

        self.states
            .push(FunctionState::new(Some(name.to_string()), params.len() as u8));
        self.begin_scope();
        for param in params {
            self.add_local(param, line)?;
        }
        for stmt in body {
            self.statement(stmt)?;
        }

        // Backstop for a body that falls off the end.
        let end_line = body.last().map_or(line, Stmt::line);
        self.emit_op(OpCode::False, end_line);
        self.emit_op(OpCode::Return, end_line);

        let function = self.finish_function()?;
        self.emit_load_constant(Value::Obj(function), line)?;
        self.emit_op(OpCode::DefineGlobal, line);
        self.emit(slot, line);
        Ok(())
    }

    /// Pop the innermost state and turn it into a heap-resident
    /// function object.
    fn finish_function(&mut self) -> Result<Handle, CompileError> {
        let state = match self.states.pop() {
            Some(state) => state,
            None => unreachable!("no function under compilation"),
        };

        let label = state.name.as_deref().unwrap_or("<script>");
        debug!("{}", disasm::disassemble(&state.chunk, label));

        // The popped chunk's constants are no longer reachable through
        // `states`; carry them as explicit roots until the function
        // object owns them.
        let mut pinned: Vec<Value> = state.chunk.constants.clone();
        let name = match &state.name {
            Some(n) => {
                let handle = self.alloc(Object::String(n.clone().into_boxed_str()), &pinned);
                pinned.push(Value::Obj(handle));
                Some(handle)
            }
            None => None,
        };

        let function = ObjFunction {
            arity: state.arity,
            chunk: state.chunk,
            name,
        };
        Ok(self.alloc(Object::Function(function), &pinned))
    }

    // ------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------

    fn expression(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Int { value, line } => self.emit_load_constant(Value::Int(*value), *line),
            Expr::Bool { value, line } => {
                let op = if *value { OpCode::True } else { OpCode::False };
                self.emit_op(op, *line);
                Ok(())
            }
            Expr::Str { value, line } => {
                let handle = self.alloc(Object::String(value.clone().into_boxed_str()), &[]);
                self.emit_load_constant(Value::Obj(handle), *line)
            }
            Expr::Unary { op, operand, line } => {
                self.expression(operand)?;
                match op {
                    UnaryOp::Negate => self.emit_op(OpCode::Negate, *line),
                    UnaryOp::Not => self.emit_op(OpCode::Not, *line),
                }
                Ok(())
            }
            Expr::Binary {
                op,
                left,
                right,
                line,
            } => {
                self.expression(left)?;
                self.expression(right)?;
                self.binary_op(*op, *line);
                Ok(())
            }
            Expr::Variable { name, line } => {
                if let Some(slot) = self.resolve_local(name) {
                    self.emit_op(OpCode::GetLocal, *line);
                    self.emit(slot, *line);
                } else if let Some(slot) = self.globals.resolve(name) {
                    self.emit_op(OpCode::GetGlobal, *line);
                    self.emit(slot, *line);
                } else {
                    return Err(self.unresolved(name, *line));
                }
                Ok(())
            }
            Expr::Assign { name, value, line } => {
                self.expression(value)?;
                if let Some(slot) = self.resolve_local(name) {
                    self.emit_op(OpCode::SetLocal, *line);
                    self.emit(slot, *line);
                } else if let Some(slot) = self.globals.resolve(name) {
                    self.emit_op(OpCode::SetGlobal, *line);
                    self.emit(slot, *line);
                } else {
                    return Err(self.unresolved(name, *line));
                }
                Ok(())
            }
            Expr::Call { callee, args, line } => {
                self.expression(callee)?;
                if args.len() > ARGS_MAX {
                    return Err(CompileError::too_many_arguments(*line));
                }
                for arg in args {
                    self.expression(arg)?;
                }
                self.emit_op(OpCode::Call, *line);
                self.emit(args.len() as u8, *line);
                Ok(())
            }
        }
    }

    /// `!=`, `>=` and `<=` have no opcode of their own; they compile to
    /// the opposite comparison plus `Not`.
    fn binary_op(&mut self, op: BinaryOp, line: u32) {
        match op {
            BinaryOp::Add => self.emit_op(OpCode::Add, line),
            BinaryOp::Subtract => self.emit_op(OpCode::Subtract, line),
            BinaryOp::Multiply => self.emit_op(OpCode::Multiply, line),
            BinaryOp::Divide => self.emit_op(OpCode::Divide, line),
            BinaryOp::Modulo => self.emit_op(OpCode::Modulo, line),
            BinaryOp::Equal => self.emit_op(OpCode::Equal, line),
            BinaryOp::NotEqual => {
                self.emit_op(OpCode::Equal, line);
                self.emit_op(OpCode::Not, line);
            }
            BinaryOp::Greater => self.emit_op(OpCode::Greater, line),
            BinaryOp::GreaterEqual => {
                self.emit_op(OpCode::Less, line);
                self.emit_op(OpCode::Not, line);
            }
            BinaryOp::Less => self.emit_op(OpCode::Less, line),
            BinaryOp::LessEqual => {
                self.emit_op(OpCode::Greater, line);
                self.emit_op(OpCode::Not, line);
            }
        }
    }

    // ------------------------------------------------------------
    // Scopes and name resolution
    // ------------------------------------------------------------

    fn begin_scope(&mut self) {
        self.state().scope_depth += 1;
    }

    fn end_scope(&mut self, line: u32) {
        self.state().scope_depth -= 1;
        loop {
            let depth = self.state().scope_depth;
            let out_of_scope =
                matches!(self.state().locals.last(), Some(local) if local.depth > depth);
            if !out_of_scope {
                break;
            }
            self.state().locals.pop();
            self.emit_op(OpCode::Pop, line);
        }
    }

    fn add_local(&mut self, name: &str, line: u32) -> Result<(), CompileError> {
        let depth = self.state().scope_depth;
        if self.state().locals.len() == LOCALS_MAX {
            return Err(CompileError::too_many_locals(name, line));
        }
        self.state().locals.push(Local {
            name: name.to_string(),
            depth,
        });
        Ok(())
    }

    /// Resolve against the innermost function only; shadowed names win
    /// by reverse scan. The reserved callee slot has an empty name and
    /// never matches.
    fn resolve_local(&self, name: &str) -> Option<u8> {
        let state = &self.states[self.states.len() - 1];
        state
            .locals
            .iter()
            .rposition(|local| local.name == name)
            .map(|i| i as u8)
    }

    fn unresolved(&self, name: &str, line: u32) -> CompileError {
        // A name that only exists as an enclosing function's local gets
        // a pointed hint; capturing is not supported.
        let shadowed = self.states[..self.states.len() - 1]
            .iter()
            .any(|state| state.locals.iter().any(|local| local.name == name));
        if shadowed {
            CompileError::unresolved_with_hint(
                name,
                line,
                "locals of an enclosing function are not visible here",
            )
        } else {
            CompileError::unresolved(name, line)
        }
    }

    // ------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------

    fn state(&mut self) -> &mut FunctionState {
        let index = self.states.len() - 1;
        &mut self.states[index]
    }

    fn emit(&mut self, byte: u8, line: u32) {
        self.state().chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode, line: u32) {
        self.emit(op as u8, line);
    }

    fn emit_load_constant(&mut self, value: Value, line: u32) -> Result<(), CompileError> {
        let index = self.state().chunk.add_constant(value);
        if index >= CONSTANTS_MAX {
            return Err(CompileError::too_many_constants(line));
        }
        self.emit_op(OpCode::Constant, line);
        self.emit(index as u8, line);
        Ok(())
    }

    /// Emit a forward jump with a placeholder distance; returns the
    /// offset to hand back to [`patch_jump`].
    fn emit_jump(&mut self, op: OpCode, line: u32) -> usize {
        self.emit_op(op, line);
        self.emit(0xff, line);
        self.emit(0xff, line);
        self.state().chunk.code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize, line: u32) -> Result<(), CompileError> {
        // Distance from just past the operand to the current end.
        let jump = self.state().chunk.code.len() - offset - 2;
        if jump > u16::MAX as usize {
            return Err(CompileError::jump_too_large(line));
        }
        let code = &mut self.state().chunk.code;
        code[offset] = (jump >> 8) as u8;
        code[offset + 1] = jump as u8;
        Ok(())
    }

    fn emit_loop(&mut self, loop_start: usize, line: u32) -> Result<(), CompileError> {
        self.emit_op(OpCode::Loop, line);
        // +2 covers the operand bytes the VM will have consumed.
        let offset = self.state().chunk.code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            return Err(CompileError::jump_too_large(line));
        }
        self.emit((offset >> 8) as u8, line);
        self.emit(offset as u8, line);
        Ok(())
    }

    fn gc_roots(&self, extra: &[Value]) -> Vec<Value> {
        let mut roots: Vec<Value> = Vec::with_capacity(self.outer_roots.len() + extra.len());
        roots.extend_from_slice(self.outer_roots);
        roots.extend_from_slice(extra);
        for state in &self.states {
            roots.extend_from_slice(&state.chunk.constants);
        }
        roots
    }

    fn alloc(&mut self, object: Object, extra: &[Value]) -> Handle {
        let roots = self.gc_roots(extra);
        self.heap.alloc(object, &roots)
    }
}
