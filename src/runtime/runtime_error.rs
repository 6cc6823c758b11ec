#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    /// One entry per live frame, outermost first; Display reverses so
    /// the innermost frame reads first.
    pub call_stack: Vec<String>,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error: {}", self.message)?;

        if !self.call_stack.is_empty() {
            write!(f, "\n  call stack:")?;

            for (i, frame) in self.call_stack.iter().rev().enumerate() {
                write!(f, "\n    {}: {}", i, frame)?;
            }
        }
        Ok(())
    }
}

impl RuntimeError {
    pub fn new(msg: &str) -> Self {
        RuntimeError {
            message: msg.to_string(),
            call_stack: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.call_stack.push(context.to_string());
        self
    }
}

impl std::error::Error for RuntimeError {}

pub fn type_error(expected: &str, found: &str) -> RuntimeError {
    RuntimeError::new(&format!("expected {}, found {}", expected, found))
}

pub fn division_by_zero() -> RuntimeError {
    RuntimeError::new("division by zero")
}

pub fn integer_overflow() -> RuntimeError {
    RuntimeError::new("integer overflow")
}

pub fn stack_overflow() -> RuntimeError {
    RuntimeError::new("stack overflow")
}

pub fn stack_underflow() -> RuntimeError {
    RuntimeError::new("stack underflow")
}

pub fn frame_overflow() -> RuntimeError {
    RuntimeError::new("call depth exceeded")
}

pub fn not_callable(kind: &str) -> RuntimeError {
    RuntimeError::new(&format!("can only call functions, found {}", kind))
}

pub fn arity_mismatch(name: &str, expected: u8, found: usize) -> RuntimeError {
    RuntimeError::new(&format!(
        "'{}' expects {} argument(s), found {}",
        name, expected, found
    ))
}
