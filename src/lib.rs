//! Execution core for the rill language: a bytecode compiler for its
//! typed syntax tree, a stack virtual machine, and a mark-and-sweep
//! garbage collector.
//!
//! A front end (scanner, parser, type checker) produces a
//! [`lang::ast::Program`]; [`Vm::compile`] lowers it to bytecode and
//! [`Vm::run`] executes it:
//!
//! ```
//! use rill::lang::ast::{Expr, Program, Stmt};
//! use rill::{Value, Vm};
//!
//! // var a = 40; a + 2;
//! let program = Program::new(vec![
//!     Stmt::var("a", Expr::int(40, 1), 1),
//!     Stmt::expr(
//!         Expr::binary(
//!             rill::lang::ast::BinaryOp::Add,
//!             Expr::variable("a", 2),
//!             Expr::int(2, 2),
//!             2,
//!         ),
//!         2,
//!     ),
//! ]);
//!
//! let mut vm = Vm::new();
//! let script = vm.compile(&program).unwrap();
//! assert_eq!(vm.run(script).unwrap(), Value::Int(42));
//! ```

pub mod bytecode;
pub mod lang;
pub mod runtime;

pub use bytecode::compile_error::CompileError;
pub use lang::value::Value;
pub use runtime::object::Handle;
pub use runtime::runtime_error::RuntimeError;
pub use runtime::vm::Vm;
