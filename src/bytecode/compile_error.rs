#[derive(Debug, Clone)]
pub enum CompileError {
    /// A name that resolves to neither a local in the current function
    /// nor a global binding.
    UnresolvedIdentifier {
        name: String,
        line: u32,
        hint: Option<String>,
    },
    /// A chunk's constant pool outgrew its one-byte index space.
    TooManyConstants { line: u32 },
    /// The global table outgrew its one-byte slot space.
    TooManyGlobals { name: String, line: u32 },
    /// A function needed more local slots than a frame can address.
    TooManyLocals { name: String, line: u32 },
    /// A function was declared with more parameters than a call
    /// instruction can pass.
    TooManyParameters { name: String, line: u32 },
    /// A call site passed more arguments than its one-byte count holds.
    TooManyArguments { line: u32 },
    /// A forward or backward jump distance overflowed its two-byte
    /// operand.
    JumpTooLarge { line: u32 },
}

impl CompileError {
    pub fn unresolved(name: &str, line: u32) -> Self {
        CompileError::UnresolvedIdentifier {
            name: name.to_string(),
            line,
            hint: None,
        }
    }

    pub fn unresolved_with_hint(name: &str, line: u32, hint: impl Into<String>) -> Self {
        CompileError::UnresolvedIdentifier {
            name: name.to_string(),
            line,
            hint: Some(hint.into()),
        }
    }

    pub fn too_many_constants(line: u32) -> Self {
        CompileError::TooManyConstants { line }
    }

    pub fn too_many_globals(name: &str, line: u32) -> Self {
        CompileError::TooManyGlobals {
            name: name.to_string(),
            line,
        }
    }

    pub fn too_many_locals(name: &str, line: u32) -> Self {
        CompileError::TooManyLocals {
            name: name.to_string(),
            line,
        }
    }

    pub fn too_many_parameters(name: &str, line: u32) -> Self {
        CompileError::TooManyParameters {
            name: name.to_string(),
            line,
        }
    }

    pub fn too_many_arguments(line: u32) -> Self {
        CompileError::TooManyArguments { line }
    }

    pub fn jump_too_large(line: u32) -> Self {
        CompileError::JumpTooLarge { line }
    }

    pub fn line(&self) -> u32 {
        match self {
            CompileError::UnresolvedIdentifier { line, .. }
            | CompileError::TooManyConstants { line }
            | CompileError::TooManyGlobals { line, .. }
            | CompileError::TooManyLocals { line, .. }
            | CompileError::TooManyParameters { line, .. }
            | CompileError::TooManyArguments { line }
            | CompileError::JumpTooLarge { line } => *line,
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::UnresolvedIdentifier { name, line, hint } => {
                write!(f, "compile error [line {}]: unresolved name '{}'", line, name)?;
                if let Some(h) = hint {
                    write!(f, "\n  hint: {}", h)?;
                }
                Ok(())
            }
            CompileError::TooManyConstants { line } => {
                write!(
                    f,
                    "compile error [line {}]: too many constants in one chunk (max 256)",
                    line
                )
            }
            CompileError::TooManyGlobals { name, line } => {
                write!(
                    f,
                    "compile error [line {}]: too many globals, cannot define '{}' (max 256)",
                    line, name
                )
            }
            CompileError::TooManyLocals { name, line } => {
                write!(
                    f,
                    "compile error [line {}]: too many locals in function, cannot declare '{}' (max 256)",
                    line, name
                )
            }
            CompileError::TooManyParameters { name, line } => {
                write!(
                    f,
                    "compile error [line {}]: too many parameters for '{}' (max 255)",
                    line, name
                )
            }
            CompileError::TooManyArguments { line } => {
                write!(
                    f,
                    "compile error [line {}]: too many call arguments (max 255)",
                    line
                )
            }
            CompileError::JumpTooLarge { line } => {
                write!(
                    f,
                    "compile error [line {}]: too much code to jump over",
                    line
                )
            }
        }
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_display() {
        let err = CompileError::unresolved("count", 4);

        let msg = err.to_string();
        assert!(msg.contains("line 4"));
        assert!(msg.contains("'count'"));
    }

    #[test]
    fn test_unresolved_hint_display() {
        let err =
            CompileError::unresolved_with_hint("n", 2, "locals of an enclosing function are not visible");

        let msg = err.to_string();
        assert!(msg.contains("hint"));
        assert!(msg.contains("enclosing function"));
    }

    #[test]
    fn test_jump_too_large_display() {
        let err = CompileError::jump_too_large(900);

        let msg = err.to_string();
        assert!(msg.contains("line 900"));
        assert!(msg.contains("jump"));
    }

    #[test]
    fn test_line_accessor() {
        assert_eq!(CompileError::too_many_constants(12).line(), 12);
        assert_eq!(CompileError::too_many_arguments(3).line(), 3);
    }

    #[test]
    fn test_error_implements_std_error() {
        let err = CompileError::too_many_globals("g", 1);
        let _: &dyn std::error::Error = &err;
    }
}
