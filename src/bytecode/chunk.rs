use crate::lang::value::Value;

/// A unit of compiled code: the byte stream, a parallel per-byte line
/// table, and the constant pool the bytes index into.
///
/// `code` and `lines` always have the same length; `lines[i]` is the
/// source line of the byte at offset `i` (operand bytes carry the line
/// of their instruction).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub lines: Vec<u32>,
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk::default()
    }

    /// Append one byte (opcode or operand) tagged with its source line.
    pub fn write(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    /// Append a value to the constant pool and return its index. The
    /// pool is append-only; the compiler enforces the 256-entry limit.
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Source line of the byte at `offset`.
    pub fn line_at(&self, offset: usize) -> u32 {
        self.lines[offset]
    }
}
