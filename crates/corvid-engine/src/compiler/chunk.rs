//! Bytecode chunks: instructions, constant pool and line table.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::runtime::Value;

/// Operation codes for the VM.
///
/// Operand widths are fixed per opcode; see [`OpCode::operand_width`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Push constant (u8 index)
    Constant,
    /// Push constant (u16 index)
    ConstantLong,
    /// Push null
    Null,
    /// Push true
    True,
    /// Push false
    False,
    /// Discard the top of the stack
    Pop,
    /// Push local slot (u8)
    GetLocal,
    /// Store top into local slot (u8), leaving it on the stack
    SetLocal,
    /// Push module variable (u16)
    GetModule,
    /// Store top into module variable (u16), leaving it on the stack
    SetModule,
    /// Pop into module variable (u16)
    DefineModule,
    /// Equality test
    Equal,
    /// Numeric greater-than
    Greater,
    /// Numeric less-than
    Less,
    /// Addition or string concatenation
    Add,
    /// Subtraction
    Subtract,
    /// Multiplication
    Multiply,
    /// Division
    Divide,
    /// Remainder
    Modulo,
    /// Logical not
    Not,
    /// Numeric negation
    Negate,
    /// Pop and write a value
    Print,
    /// Unconditional forward jump (u16)
    Jump,
    /// Forward jump when the top is falsey, without popping (u16)
    JumpIfFalse,
    /// Backward jump (u16)
    Loop,
    /// Call with argument count (u8)
    Call,
    /// Fused property lookup and call (u16 name, u8 argc)
    Invoke,
    /// Return from the current frame
    Return,
    /// Push a new class (u16 name)
    Class,
    /// Attach a method to the class beneath it (u16 name)
    Method,
    /// Attach a static method to the class beneath it (u16 name)
    StaticMethod,
    /// Read a property (u16 name)
    GetProperty,
    /// Write a field (u16 name)
    SetProperty,
    /// Read an element of indexable data
    GetIndex,
    /// Write an element of indexable data
    SetIndex,
    /// Load or fetch a module (u16 name)
    ImportModule,
}

impl OpCode {
    const ALL: [OpCode; 36] = [
        OpCode::Constant,
        OpCode::ConstantLong,
        OpCode::Null,
        OpCode::True,
        OpCode::False,
        OpCode::Pop,
        OpCode::GetLocal,
        OpCode::SetLocal,
        OpCode::GetModule,
        OpCode::SetModule,
        OpCode::DefineModule,
        OpCode::Equal,
        OpCode::Greater,
        OpCode::Less,
        OpCode::Add,
        OpCode::Subtract,
        OpCode::Multiply,
        OpCode::Divide,
        OpCode::Modulo,
        OpCode::Not,
        OpCode::Negate,
        OpCode::Print,
        OpCode::Jump,
        OpCode::JumpIfFalse,
        OpCode::Loop,
        OpCode::Call,
        OpCode::Invoke,
        OpCode::Return,
        OpCode::Class,
        OpCode::Method,
        OpCode::StaticMethod,
        OpCode::GetProperty,
        OpCode::SetProperty,
        OpCode::GetIndex,
        OpCode::SetIndex,
        OpCode::ImportModule,
    ];

    /// Decodes an opcode byte.
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        Self::ALL.get(byte as usize).copied()
    }

    /// Number of operand bytes following the opcode.
    pub fn operand_width(self) -> usize {
        match self {
            OpCode::Constant | OpCode::GetLocal | OpCode::SetLocal | OpCode::Call => 1,
            OpCode::ConstantLong
            | OpCode::GetModule
            | OpCode::SetModule
            | OpCode::DefineModule
            | OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::Loop
            | OpCode::Class
            | OpCode::Method
            | OpCode::StaticMethod
            | OpCode::GetProperty
            | OpCode::SetProperty
            | OpCode::ImportModule => 2,
            OpCode::Invoke => 3,
            _ => 0,
        }
    }

    /// The mnemonic used by the disassembler.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Constant => "CONSTANT",
            OpCode::ConstantLong => "CONSTANT_LONG",
            OpCode::Null => "NULL",
            OpCode::True => "TRUE",
            OpCode::False => "FALSE",
            OpCode::Pop => "POP",
            OpCode::GetLocal => "GET_LOCAL",
            OpCode::SetLocal => "SET_LOCAL",
            OpCode::GetModule => "GET_MODULE",
            OpCode::SetModule => "SET_MODULE",
            OpCode::DefineModule => "DEFINE_MODULE",
            OpCode::Equal => "EQUAL",
            OpCode::Greater => "GREATER",
            OpCode::Less => "LESS",
            OpCode::Add => "ADD",
            OpCode::Subtract => "SUBTRACT",
            OpCode::Multiply => "MULTIPLY",
            OpCode::Divide => "DIVIDE",
            OpCode::Modulo => "MODULO",
            OpCode::Not => "NOT",
            OpCode::Negate => "NEGATE",
            OpCode::Print => "PRINT",
            OpCode::Jump => "JUMP",
            OpCode::JumpIfFalse => "JUMP_IF_FALSE",
            OpCode::Loop => "LOOP",
            OpCode::Call => "CALL",
            OpCode::Invoke => "INVOKE",
            OpCode::Return => "RETURN",
            OpCode::Class => "CLASS",
            OpCode::Method => "METHOD",
            OpCode::StaticMethod => "STATIC_METHOD",
            OpCode::GetProperty => "GET_PROPERTY",
            OpCode::SetProperty => "SET_PROPERTY",
            OpCode::GetIndex => "GET_INDEX",
            OpCode::SetIndex => "SET_INDEX",
            OpCode::ImportModule => "IMPORT_MODULE",
        }
    }
}

/// Limits a chunk can run into while it is being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChunkLimit {
    /// The constant pool already holds 65 536 entries
    #[error("Too many constants in one chunk.")]
    TooManyConstants,
    /// A forward jump spans more than `u16::MAX` bytes
    #[error("Too much code to jump over.")]
    JumpTooFar,
    /// A backward jump spans more than `u16::MAX` bytes
    #[error("Loop body too large.")]
    LoopTooLarge,
}

/// The first bytecode offset emitted for a source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineStart {
    /// Offset of the first byte on this line
    pub offset: usize,
    /// 1-based source line
    pub line: usize,
}

/// A pending forward jump whose operand still needs its target.
///
/// Returned by [`Chunk::emit_jump`] and consumed by [`Chunk::patch_jump`].
#[derive(Debug)]
#[must_use = "a forward jump must be patched"]
pub struct JumpPatch {
    operand: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Number(u64),
    String(Rc<str>),
}

/// A compiled bytecode chunk.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    /// Raw instruction bytes
    pub code: Vec<u8>,
    /// The constant pool
    pub constants: Vec<Value>,
    lines: Vec<LineStart>,
    dedup: FxHashMap<ConstantKey, usize>,
}

impl Chunk {
    /// Creates a new empty chunk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one byte produced by source `line`.
    pub fn write(&mut self, byte: u8, line: usize) {
        if self.lines.last().is_none_or(|last| last.line != line) {
            self.lines.push(LineStart {
                offset: self.code.len(),
                line,
            });
        }
        self.code.push(byte);
    }

    /// Appends an opcode.
    pub fn write_op(&mut self, op: OpCode, line: usize) {
        self.write(op as u8, line);
    }

    /// Appends a big-endian 16-bit operand.
    pub fn write_u16(&mut self, value: u16, line: usize) {
        let [hi, lo] = value.to_be_bytes();
        self.write(hi, line);
        self.write(lo, line);
    }

    /// Reads a big-endian 16-bit operand at `offset`.
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.code[offset], self.code[offset + 1]])
    }

    /// Adds a constant and returns its index.
    ///
    /// Numbers (by bit pattern) and strings are deduplicated.
    pub fn add_constant(&mut self, value: Value) -> Result<usize, ChunkLimit> {
        let key = match &value {
            Value::Double(n) => Some(ConstantKey::Number(n.to_bits())),
            Value::String(s) => Some(ConstantKey::String(Rc::clone(s))),
            _ => None,
        };
        if let Some(index) = key.as_ref().and_then(|k| self.dedup.get(k)) {
            return Ok(*index);
        }

        let index = self.constants.len();
        if index > u16::MAX as usize {
            return Err(ChunkLimit::TooManyConstants);
        }
        self.constants.push(value);
        if let Some(key) = key {
            self.dedup.insert(key, index);
        }
        Ok(index)
    }

    /// Emits a forward jump with a placeholder operand.
    pub fn emit_jump(&mut self, op: OpCode, line: usize) -> JumpPatch {
        self.write_op(op, line);
        let operand = self.code.len();
        self.write_u16(u16::MAX, line);
        JumpPatch { operand }
    }

    /// Points a pending jump at the current end of the chunk.
    pub fn patch_jump(&mut self, patch: JumpPatch) -> Result<(), ChunkLimit> {
        let distance = self.code.len() - patch.operand - 2;
        let distance = u16::try_from(distance).map_err(|_| ChunkLimit::JumpTooFar)?;
        let [hi, lo] = distance.to_be_bytes();
        self.code[patch.operand] = hi;
        self.code[patch.operand + 1] = lo;
        Ok(())
    }

    /// Emits a backward jump to `loop_start`.
    pub fn emit_loop(&mut self, loop_start: usize, line: usize) -> Result<(), ChunkLimit> {
        self.write_op(OpCode::Loop, line);
        let distance = self.code.len() - loop_start + 2;
        let distance = u16::try_from(distance).map_err(|_| ChunkLimit::LoopTooLarge)?;
        self.write_u16(distance, line);
        Ok(())
    }

    /// Returns the source line of the instruction byte at `offset`.
    pub fn line_at(&self, offset: usize) -> usize {
        let index = self.lines.partition_point(|start| start.offset <= offset);
        index
            .checked_sub(1)
            .and_then(|i| self.lines.get(i))
            .map_or(0, |start| start.line)
    }

    /// The run-length encoded line table.
    pub fn line_starts(&self) -> &[LineStart] {
        &self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_round_trip() {
        for op in OpCode::ALL {
            assert_eq!(OpCode::from_byte(op as u8), Some(op));
        }
        assert_eq!(OpCode::from_byte(OpCode::ALL.len() as u8), None);
    }

    #[test]
    fn test_line_table_is_run_length() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Null, 1);
        chunk.write_op(OpCode::Pop, 1);
        chunk.write_op(OpCode::True, 3);
        chunk.write_op(OpCode::Pop, 3);
        chunk.write_op(OpCode::False, 4);
        assert_eq!(chunk.line_starts().len(), 3);
    }

    #[test]
    fn test_line_at_is_exact_and_monotonic() {
        let mut chunk = Chunk::new();
        let lines = [1, 1, 2, 2, 2, 5, 7, 7];
        for line in lines {
            chunk.write_op(OpCode::Null, line);
        }
        let mut previous = 0;
        for (offset, expected) in lines.iter().enumerate() {
            let line = chunk.line_at(offset);
            assert_eq!(line, *expected);
            assert!(line >= previous);
            previous = line;
        }
    }

    #[test]
    fn test_constants_are_deduplicated() {
        let mut chunk = Chunk::new();
        let a = chunk.add_constant(Value::Double(1.5)).unwrap();
        let b = chunk.add_constant(Value::String("name".into())).unwrap();
        assert_eq!(chunk.add_constant(Value::Double(1.5)).unwrap(), a);
        assert_eq!(chunk.add_constant(Value::String("name".into())).unwrap(), b);
        assert_ne!(chunk.add_constant(Value::Double(-0.0)).unwrap(), chunk.add_constant(Value::Double(0.0)).unwrap());
        assert_eq!(chunk.constants.len(), 4);
    }

    #[test]
    fn test_constant_pool_limit() {
        let mut chunk = Chunk::new();
        for i in 0..=u16::MAX as usize {
            chunk.add_constant(Value::Double(i as f64)).unwrap();
        }
        assert_eq!(
            chunk.add_constant(Value::Double(-1.0)),
            Err(ChunkLimit::TooManyConstants)
        );
    }

    #[test]
    fn test_patch_jump() {
        let mut chunk = Chunk::new();
        let patch = chunk.emit_jump(OpCode::JumpIfFalse, 1);
        chunk.write_op(OpCode::Pop, 1);
        chunk.write_op(OpCode::Null, 1);
        chunk.patch_jump(patch).unwrap();
        assert_eq!(chunk.read_u16(1), 2);
    }

    #[test]
    fn test_jump_too_far() {
        let mut chunk = Chunk::new();
        let patch = chunk.emit_jump(OpCode::Jump, 1);
        chunk.code.extend(std::iter::repeat_n(OpCode::Null as u8, u16::MAX as usize + 1));
        assert_eq!(chunk.patch_jump(patch), Err(ChunkLimit::JumpTooFar));
    }

    #[test]
    fn test_emit_loop() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Null, 1);
        chunk.write_op(OpCode::Pop, 1);
        chunk.emit_loop(0, 1).unwrap();
        // ip after the operand is 5; jumping back 5 lands on offset 0
        assert_eq!(chunk.read_u16(3), 5);
    }
}
