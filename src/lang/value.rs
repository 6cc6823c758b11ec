use crate::runtime::object::Handle;

/// A runtime value. Every value is a small `Copy` payload; anything
/// heap-sized lives behind a [`Handle`] into the object registry.
///
/// Derived equality compares tags and payloads, which for `Obj` means
/// handle identity. Content comparison for strings needs registry
/// access and lives on `Heap::values_equal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Obj(Handle),
}

impl Value {
    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Value::Int(_))
    }

    pub fn is_obj(&self) -> bool {
        matches!(self, Value::Obj(_))
    }

    /// Name of the value's tag, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Obj(_) => "object",
        }
    }
}
