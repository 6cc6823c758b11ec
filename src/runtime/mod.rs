pub mod heap;
pub mod object;
pub mod runtime_error;
pub mod vm;

pub use heap::Heap;
pub use object::{Handle, ObjFunction, Object};
pub use runtime_error::RuntimeError;
pub use vm::Vm;
