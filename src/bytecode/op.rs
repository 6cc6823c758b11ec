/// One-byte opcodes of the instruction stream.
///
/// Operands follow the opcode inline in the byte stream: single-byte
/// indices for constants, globals, locals and argument counts, and
/// big-endian two-byte distances for the jump family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Push a constant; operand: pool index.
    Constant,
    /// Push `true`.
    True,
    /// Push `false`.
    False,
    /// Discard the top of the stack.
    Pop,
    /// Pop into a global slot; operand: slot index.
    DefineGlobal,
    /// Push a global slot's value; operand: slot index.
    GetGlobal,
    /// Store the top of the stack (without popping) into a global slot;
    /// operand: slot index.
    SetGlobal,
    /// Push a frame-local slot's value; operand: slot index.
    GetLocal,
    /// Store the top of the stack (without popping) into a frame-local
    /// slot; operand: slot index.
    SetLocal,
    /// Pop two values, push whether they are equal.
    Equal,
    /// Pop two ints, push `left > right`.
    Greater,
    /// Pop two ints, push `left < right`.
    Less,
    /// Pop a bool, push its negation.
    Not,
    /// Pop two operands, push the sum (ints) or concatenation (strings).
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    /// Pop an int, push its arithmetic negation.
    Negate,
    /// Pop a value and write it to stdout.
    Print,
    /// Unconditional forward jump; operand: u16 distance.
    Jump,
    /// Forward jump if the top of the stack (peeked, not popped) is
    /// `false`; operand: u16 distance.
    JumpIfFalse,
    /// Unconditional backward jump; operand: u16 distance.
    Loop,
    /// Call the function sitting under its arguments; operand: argument
    /// count.
    Call,
    /// Pop the return value, discard the frame, push the value back.
    Return,
}

impl OpCode {
    const ALL: [OpCode; 25] = [
        OpCode::Constant,
        OpCode::True,
        OpCode::False,
        OpCode::Pop,
        OpCode::DefineGlobal,
        OpCode::GetGlobal,
        OpCode::SetGlobal,
        OpCode::GetLocal,
        OpCode::SetLocal,
        OpCode::Equal,
        OpCode::Greater,
        OpCode::Less,
        OpCode::Not,
        OpCode::Add,
        OpCode::Subtract,
        OpCode::Multiply,
        OpCode::Divide,
        OpCode::Modulo,
        OpCode::Negate,
        OpCode::Print,
        OpCode::Jump,
        OpCode::JumpIfFalse,
        OpCode::Loop,
        OpCode::Call,
        OpCode::Return,
    ];

    /// Decode a byte from the instruction stream.
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        OpCode::ALL.get(byte as usize).copied()
    }

    /// Width of the inline operand, in bytes.
    pub fn operand_width(self) -> usize {
        match self {
            OpCode::Constant
            | OpCode::DefineGlobal
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::Call => 1,
            OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => 2,
            _ => 0,
        }
    }

    /// Mnemonic used by the disassembler.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Constant => "CONSTANT",
            OpCode::True => "TRUE",
            OpCode::False => "FALSE",
            OpCode::Pop => "POP",
            OpCode::DefineGlobal => "DEFINE_GLOBAL",
            OpCode::GetGlobal => "GET_GLOBAL",
            OpCode::SetGlobal => "SET_GLOBAL",
            OpCode::GetLocal => "GET_LOCAL",
            OpCode::SetLocal => "SET_LOCAL",
            OpCode::Equal => "EQUAL",
            OpCode::Greater => "GREATER",
            OpCode::Less => "LESS",
            OpCode::Not => "NOT",
            OpCode::Add => "ADD",
            OpCode::Subtract => "SUBTRACT",
            OpCode::Multiply => "MULTIPLY",
            OpCode::Divide => "DIVIDE",
            OpCode::Modulo => "MODULO",
            OpCode::Negate => "NEGATE",
            OpCode::Print => "PRINT",
            OpCode::Jump => "JUMP",
            OpCode::JumpIfFalse => "JUMP_IF_FALSE",
            OpCode::Loop => "LOOP",
            OpCode::Call => "CALL",
            OpCode::Return => "RETURN",
        }
    }
}
