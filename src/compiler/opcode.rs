// Vesper Bytecode Instructions

use serde::Serialize;
use smallvec::SmallVec;

/// Bytecode operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum OpCode {
    // Constants and stack operations
    Constant, // Push constant onto stack
    Nil,      // Push nil
    True,     // Push true
    False,    // Push false
    Pop,      // Pop top of stack
    Dup,      // Duplicate top of stack

    // Arithmetic operations
    Add,    // a + b
    Sub,    // a - b
    Mul,    // a * b
    Div,    // a / b
    Mod,    // a % b
    Negate, // -a
    Not,    // !a

    // Comparison operations
    Equal,    // a == b
    NotEqual, // a != b
    Greater,  // a > b
    Less,     // a < b

    // Control flow (absolute targets)
    Jump,
    JumpIfFalse, // Pops the condition

    // Variables
    GetGlobal,
    SetGlobal, // Pops the value
    GetLocal,
    SetLocal, // Pops the value, writes through a cell
    GetFree,
    SetFree,        // Pops the value
    MakeCell,       // Box a local in place and push the cell
    GetFreeCell,    // Push a captured cell itself
    CurrentClosure, // Push the running closure
    GetNative,

    // Functions
    Closure, // Constant index, free variable count
    Call,
    ReturnValue,
    Return,

    // Collections
    Array,
    Hash,
    Index,
    SetIndex,

    // Classes and objects
    Class, // Name constant, method count
    GetProperty,
    SetProperty,
    GetSuper,

    // Modules
    GetExport, // Module index, export index

    Print,
}

const ALL: [OpCode; 43] = [
    OpCode::Constant,
    OpCode::Nil,
    OpCode::True,
    OpCode::False,
    OpCode::Pop,
    OpCode::Dup,
    OpCode::Add,
    OpCode::Sub,
    OpCode::Mul,
    OpCode::Div,
    OpCode::Mod,
    OpCode::Negate,
    OpCode::Not,
    OpCode::Equal,
    OpCode::NotEqual,
    OpCode::Greater,
    OpCode::Less,
    OpCode::Jump,
    OpCode::JumpIfFalse,
    OpCode::GetGlobal,
    OpCode::SetGlobal,
    OpCode::GetLocal,
    OpCode::SetLocal,
    OpCode::GetFree,
    OpCode::SetFree,
    OpCode::MakeCell,
    OpCode::GetFreeCell,
    OpCode::CurrentClosure,
    OpCode::GetNative,
    OpCode::Closure,
    OpCode::Call,
    OpCode::ReturnValue,
    OpCode::Return,
    OpCode::Array,
    OpCode::Hash,
    OpCode::Index,
    OpCode::SetIndex,
    OpCode::Class,
    OpCode::GetProperty,
    OpCode::SetProperty,
    OpCode::GetSuper,
    OpCode::GetExport,
    OpCode::Print,
];

impl OpCode {
    /// Width in bytes of each operand
    pub fn operand_widths(&self) -> &'static [usize] {
        match self {
            OpCode::Constant
            | OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::Array
            | OpCode::Hash
            | OpCode::GetProperty
            | OpCode::SetProperty
            | OpCode::GetSuper => &[2],

            OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetFree
            | OpCode::SetFree
            | OpCode::MakeCell
            | OpCode::GetFreeCell
            | OpCode::GetNative
            | OpCode::Call => &[1],

            OpCode::Closure | OpCode::Class => &[2, 1],
            OpCode::GetExport => &[2, 2],

            _ => &[],
        }
    }

    /// Total number of operand bytes following the opcode
    pub fn operand_bytes(&self) -> usize {
        self.operand_widths().iter().sum()
    }

    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Constant => "OpConstant",
            OpCode::Nil => "OpNil",
            OpCode::True => "OpTrue",
            OpCode::False => "OpFalse",
            OpCode::Pop => "OpPop",
            OpCode::Dup => "OpDup",
            OpCode::Add => "OpAdd",
            OpCode::Sub => "OpSub",
            OpCode::Mul => "OpMul",
            OpCode::Div => "OpDiv",
            OpCode::Mod => "OpMod",
            OpCode::Negate => "OpNegate",
            OpCode::Not => "OpNot",
            OpCode::Equal => "OpEqual",
            OpCode::NotEqual => "OpNotEqual",
            OpCode::Greater => "OpGreater",
            OpCode::Less => "OpLess",
            OpCode::Jump => "OpJump",
            OpCode::JumpIfFalse => "OpJumpIfFalse",
            OpCode::GetGlobal => "OpGetGlobal",
            OpCode::SetGlobal => "OpSetGlobal",
            OpCode::GetLocal => "OpGetLocal",
            OpCode::SetLocal => "OpSetLocal",
            OpCode::GetFree => "OpGetFree",
            OpCode::SetFree => "OpSetFree",
            OpCode::MakeCell => "OpMakeCell",
            OpCode::GetFreeCell => "OpGetFreeCell",
            OpCode::CurrentClosure => "OpCurrentClosure",
            OpCode::GetNative => "OpGetNative",
            OpCode::Closure => "OpClosure",
            OpCode::Call => "OpCall",
            OpCode::ReturnValue => "OpReturnValue",
            OpCode::Return => "OpReturn",
            OpCode::Array => "OpArray",
            OpCode::Hash => "OpHash",
            OpCode::Index => "OpIndex",
            OpCode::SetIndex => "OpSetIndex",
            OpCode::Class => "OpClass",
            OpCode::GetProperty => "OpGetProperty",
            OpCode::SetProperty => "OpSetProperty",
            OpCode::GetSuper => "OpGetSuper",
            OpCode::GetExport => "OpGetExport",
            OpCode::Print => "OpPrint",
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match ALL.get(byte as usize) {
            Some(op) if *op as u8 == byte => Ok(*op),
            _ => Err(byte),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op as u8
    }
}

/// Encode one instruction. Operands wider than their slot are truncated,
/// so callers check limits before emitting.
pub fn make(op: OpCode, operands: &[usize]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(1 + op.operand_bytes());
    bytes.push(op as u8);
    for (operand, width) in operands.iter().zip(op.operand_widths()) {
        match width {
            2 => bytes.extend_from_slice(&(*operand as u16).to_be_bytes()),
            _ => bytes.push(*operand as u8),
        }
    }
    bytes
}

pub fn read_u16(code: &[u8], offset: usize) -> usize {
    ((code[offset] as usize) << 8) | code[offset + 1] as usize
}

/// Decode the operands of `op` starting at `offset`.
/// Returns `None` when the stream ends mid-instruction.
pub fn read_operands(op: OpCode, code: &[u8], offset: usize) -> Option<SmallVec<[usize; 2]>> {
    let mut operands = SmallVec::new();
    let mut at = offset;
    for width in op.operand_widths() {
        if at + width > code.len() {
            return None;
        }
        operands.push(match width {
            2 => read_u16(code, at),
            _ => code[at] as usize,
        });
        at += width;
    }
    Some(operands)
}

/// A decoded instruction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    pub offset: usize,
    pub op: OpCode,
    pub operands: SmallVec<[usize; 2]>,
}

impl Instruction {
    pub fn decode(code: &[u8], offset: usize) -> Option<Self> {
        let op = OpCode::try_from(*code.get(offset)?).ok()?;
        let operands = read_operands(op, code, offset + 1)?;
        Some(Self {
            offset,
            op,
            operands,
        })
    }

    /// Bytes occupied by the opcode and its operands
    pub fn width(&self) -> usize {
        1 + self.op.operand_bytes()
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04} {}", self.offset, self.op.name())?;
        for operand in &self.operands {
            write!(f, " {}", operand)?;
        }
        Ok(())
    }
}

/// Render an instruction stream, one instruction per line
pub fn disassemble(code: &[u8]) -> String {
    let mut out = String::new();
    let mut offset = 0;
    while offset < code.len() {
        match Instruction::decode(code, offset) {
            Some(ins) => {
                out.push_str(&ins.to_string());
                out.push('\n');
                offset += ins.width();
            }
            None => {
                out.push_str(&format!("{:04} <bad byte {}>\n", offset, code[offset]));
                offset += 1;
            }
        }
    }
    out
}
