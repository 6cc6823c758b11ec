use crate::bytecode::chunk::Chunk;

/// Index of a heap object in the registry. Handles stay valid for the
/// object's whole lifetime; the collector never moves objects, only
/// frees unreachable slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

impl Handle {
    pub(crate) fn new(index: u32) -> Self {
        Handle(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A heap-allocated object. The registry owns every object; values hold
/// handles only.
#[derive(Debug)]
pub enum Object {
    String(Box<str>),
    Function(ObjFunction),
}

#[derive(Debug)]
pub struct ObjFunction {
    pub arity: u8,
    pub chunk: Chunk,
    /// Interned name string; `None` for the top-level script.
    pub name: Option<Handle>,
}

impl Object {
    pub fn kind(&self) -> &'static str {
        match self {
            Object::String(_) => "string",
            Object::Function(_) => "function",
        }
    }
}
