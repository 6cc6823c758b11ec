//! Human-readable chunk listings, for `debug!` dumps and tests.

use std::fmt::Write;

use crate::bytecode::chunk::Chunk;
use crate::bytecode::op::OpCode;
use crate::lang::value::Value;

/// Render a whole chunk, one instruction per line.
pub fn disassemble(chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", name);

    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset, &mut out);
    }
    out
}

/// Render the instruction at `offset`; returns the offset of the next
/// instruction.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let _ = write!(out, "{:04} ", offset);
    if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        let _ = write!(out, "   | ");
    } else {
        let _ = write!(out, "{:4} ", chunk.line_at(offset));
    }

    let byte = chunk.code[offset];
    let Some(op) = OpCode::from_byte(byte) else {
        let _ = writeln!(out, "UNKNOWN {:#04x}", byte);
        return offset + 1;
    };

    match op {
        OpCode::Constant => {
            let index = chunk.code[offset + 1] as usize;
            let _ = writeln!(
                out,
                "{:<16} {:4} '{}'",
                op.name(),
                index,
                constant_text(chunk.constants[index])
            );
        }
        OpCode::DefineGlobal
        | OpCode::GetGlobal
        | OpCode::SetGlobal
        | OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::Call => {
            let _ = writeln!(out, "{:<16} {:4}", op.name(), chunk.code[offset + 1]);
        }
        OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => {
            let distance =
                ((chunk.code[offset + 1] as usize) << 8) | chunk.code[offset + 2] as usize;
            let target = if op == OpCode::Loop {
                offset + 3 - distance
            } else {
                offset + 3 + distance
            };
            let _ = writeln!(out, "{:<16} {:4} -> {:04}", op.name(), distance, target);
        }
        _ => {
            let _ = writeln!(out, "{}", op.name());
        }
    }

    offset + 1 + op.operand_width()
}

fn constant_text(value: Value) -> String {
    match value {
        Value::Int(i) => i.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Obj(_) => "<obj>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk() -> Chunk {
        let mut chunk = Chunk::new();
        let index = chunk.add_constant(Value::Int(42)) as u8;
        chunk.write(OpCode::Constant as u8, 1);
        chunk.write(index, 1);
        chunk.write(OpCode::JumpIfFalse as u8, 2);
        chunk.write(0, 2);
        chunk.write(3, 2);
        chunk.write(OpCode::Pop as u8, 2);
        chunk.write(OpCode::Return as u8, 3);
        chunk
    }

    #[test]
    fn test_offsets_advance_by_operand_width() {
        let chunk = sample_chunk();
        let mut out = String::new();

        let mut offsets = Vec::new();
        let mut offset = 0;
        while offset < chunk.code.len() {
            offsets.push(offset);
            offset = disassemble_instruction(&chunk, offset, &mut out);
        }
        assert_eq!(offsets, vec![0, 2, 5, 6]);
    }

    #[test]
    fn test_listing_shows_mnemonics_and_constants() {
        let listing = disassemble(&sample_chunk(), "sample");

        assert!(listing.contains("== sample =="));
        assert!(listing.contains("CONSTANT"));
        assert!(listing.contains("'42'"));
        assert!(listing.contains("RETURN"));
    }

    #[test]
    fn test_jump_target_is_resolved() {
        let listing = disassemble(&sample_chunk(), "sample");
        // Distance 3 from just past the operand at offset 5.
        assert!(listing.contains("JUMP_IF_FALSE"));
        assert!(listing.contains("-> 0008"));
    }

    #[test]
    fn test_repeated_lines_collapse_in_line_column() {
        let listing = disassemble(&sample_chunk(), "sample");
        assert!(listing.contains("   | "));
    }
}
