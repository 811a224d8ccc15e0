// Vesper Bytecode Chunk
// Instruction buffer for one function or module body, with per-byte line info

use super::opcode::{make, OpCode};

/// Placeholder written into jump operands until the target is known
pub const JUMP_PLACEHOLDER: usize = 0xFFFF;

/// Instructions under construction
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    /// Raw bytecode
    pub code: Vec<u8>,
    /// Source line of each byte in `code`
    pub lines: Vec<usize>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one instruction, returning its offset
    pub fn emit(&mut self, op: OpCode, operands: &[usize], line: usize) -> usize {
        let offset = self.code.len();
        let bytes = make(op, operands);
        self.lines.extend(std::iter::repeat(line).take(bytes.len()));
        self.code.extend(bytes);
        offset
    }

    /// Get the current code offset
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Rewrite the first operand of the jump at `offset` to `target`
    pub fn patch_jump(&mut self, offset: usize, target: usize) {
        let [hi, lo] = (target as u16).to_be_bytes();
        self.code[offset + 1] = hi;
        self.code[offset + 2] = lo;
    }

    /// Get line number for instruction at offset
    pub fn get_line(&self, offset: usize) -> usize {
        self.lines.get(offset).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::opcode::read_u16;

    #[test]
    fn test_emit_records_lines() {
        let mut chunk = Chunk::new();
        chunk.emit(OpCode::Constant, &[0], 3);
        chunk.emit(OpCode::Pop, &[], 4);
        assert_eq!(chunk.lines, vec![3, 3, 3, 4]);
        assert_eq!(chunk.get_line(3), 4);
    }

    #[test]
    fn test_patch_jump() {
        let mut chunk = Chunk::new();
        let jump = chunk.emit(OpCode::JumpIfFalse, &[JUMP_PLACEHOLDER], 1);
        chunk.emit(OpCode::Nil, &[], 1);
        chunk.patch_jump(jump, chunk.current_offset());
        assert_eq!(read_u16(&chunk.code, jump + 1), 4);
    }
}
