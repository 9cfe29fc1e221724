//! Bytecode representation and instruction set
//!
//! A [`CodeUnit`] is the immutable, compiler-produced instruction stream of
//! one callable. It is never rewritten: the adaptive core quickens a copy of
//! it (see [`crate::quicken`]) and keeps that copy in the unit's runtime slot.

mod opcode;

pub use opcode::{Family, OpFlags, Opcode, OperandKind};

use crate::error::{Error, Result};
use crate::quicken::QuickenedCode;
use crate::runtime::Value;
use serde::Serialize;
use std::cell::{Cell, OnceCell};
use std::fmt;
use std::rc::Rc;

/// One `(opcode, operand)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub arg: u8,
}

impl Instruction {
    pub const fn new(opcode: Opcode, arg: u8) -> Self {
        Self { opcode, arg }
    }
}

/// The static representation of a callable's instructions
pub struct CodeUnit {
    name: Rc<str>,
    instructions: Box<[Instruction]>,
    constants: Vec<Value>,
    names: Vec<Rc<str>>,
    argcount: u8,
    nlocals: u8,
    /// Frame entries and backward jumps seen before quickening
    warmup: Cell<u32>,
    /// Lazily created quickened stream and ancillary array
    quickened: OnceCell<QuickenedCode>,
}

impl CodeUnit {
    /// Display name of the callable
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The original static instruction stream
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the unit has no instructions
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Constant pool entry
    pub fn constant(&self, index: u8) -> Option<&Value> {
        self.constants.get(index as usize)
    }

    /// Names table entry
    pub fn name_at(&self, index: u8) -> Option<&Rc<str>> {
        self.names.get(index as usize)
    }

    /// Number of positional parameters
    pub fn argcount(&self) -> u8 {
        self.argcount
    }

    /// Number of local slots, parameters included
    pub fn nlocals(&self) -> u8 {
        self.nlocals
    }

    /// Warm-up ticks recorded so far
    pub fn warmup_count(&self) -> u32 {
        self.warmup.get()
    }

    /// The quickened form, if this unit has been quickened
    pub fn quickened(&self) -> Option<&QuickenedCode> {
        self.quickened.get()
    }

    /// Record one warm-up tick and return the new count
    pub(crate) fn tick_warmup(&self) -> u32 {
        let count = self.warmup.get().saturating_add(1);
        self.warmup.set(count);
        count
    }

    /// Forget warm-up progress so quickening is retried later
    pub(crate) fn reset_warmup(&self) {
        self.warmup.set(0);
    }

    /// Quicken this unit, at most once. A failure leaves the unit untouched.
    pub fn quicken(&self, memory_limit: usize) -> Result<&QuickenedCode> {
        if let Some(quickened) = self.quickened.get() {
            return Ok(quickened);
        }
        let quickened = QuickenedCode::quicken(&self.instructions, memory_limit)?;
        Ok(self.quickened.get_or_init(|| quickened))
    }

    /// Disassemble the static stream for debugging
    pub fn disassemble(&self) -> String {
        let mut output = format!("== {} ==\n", self.name);
        for (position, instruction) in self.instructions.iter().enumerate() {
            output.push_str(&format!(
                "{:04} {:16} {}\n",
                position,
                format!("{:?}", instruction.opcode),
                self.format_operand(*instruction)
            ));
        }
        output
    }

    /// Render the operand of a static instruction
    pub(crate) fn format_operand(&self, instruction: Instruction) -> String {
        let arg = instruction.arg;
        match instruction.opcode.operand_kind() {
            OperandKind::None => String::new(),
            OperandKind::Const => match self.constant(arg) {
                Some(value) => format!("{} ({})", arg, value),
                None => format!("{}", arg),
            },
            OperandKind::Name => match self.name_at(arg) {
                Some(name) => format!("{} ({})", arg, name),
                None => format!("{}", arg),
            },
            OperandKind::Local => format!("{}", arg),
            OperandKind::Target => format!("-> {}", arg),
            OperandKind::ArgCount => format!("args={}", arg),
        }
    }
}

impl fmt::Debug for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeUnit")
            .field("name", &self.name)
            .field("len", &self.instructions.len())
            .field("argcount", &self.argcount)
            .field("nlocals", &self.nlocals)
            .field("quickened", &self.quickened.get().is_some())
            .finish()
    }
}

impl fmt::Display for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.disassemble())
    }
}

/// Assembler for code units
///
/// Stands in for the front-end compiler: it owns the constant pool and names
/// table while instructions are emitted and validates every operand when the
/// unit is built.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    name: String,
    instructions: Vec<Instruction>,
    constants: Vec<Value>,
    names: Vec<Rc<str>>,
    argcount: u8,
    nlocals: u8,
}

impl CodeBuilder {
    /// Start a new code unit
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declare positional parameters; they occupy the first local slots
    pub fn params(mut self, count: u8) -> Self {
        self.argcount = count;
        self.nlocals = self.nlocals.max(count);
        self
    }

    /// Declare the total number of local slots
    pub fn locals(mut self, count: u8) -> Self {
        self.nlocals = count.max(self.argcount);
        self
    }

    /// Position the next instruction will occupy
    pub fn position(&self) -> usize {
        self.instructions.len()
    }

    /// Emit an instruction and return its position
    pub fn emit(&mut self, opcode: Opcode, arg: u8) -> usize {
        self.instructions.push(Instruction::new(opcode, arg));
        self.instructions.len() - 1
    }

    /// Emit an instruction that takes no operand
    pub fn emit_op(&mut self, opcode: Opcode) -> usize {
        self.emit(opcode, 0)
    }

    /// Add a constant to the pool and return its index
    pub fn add_constant(&mut self, value: Value) -> Result<u8> {
        if let Some(index) = self.constants.iter().position(|existing| same_constant(existing, &value)) {
            return Ok(index as u8);
        }
        let index = u8::try_from(self.constants.len())
            .map_err(|_| Error::InvalidBytecode(format!("{}: constant pool is full", self.name)))?;
        self.constants.push(value);
        Ok(index)
    }

    /// Add a name to the names table and return its index
    pub fn add_name(&mut self, name: &str) -> Result<u8> {
        if let Some(index) = self.names.iter().position(|existing| &**existing == name) {
            return Ok(index as u8);
        }
        let index = u8::try_from(self.names.len())
            .map_err(|_| Error::InvalidBytecode(format!("{}: names table is full", self.name)))?;
        self.names.push(Rc::from(name));
        Ok(index)
    }

    /// Emit `LoadConst` for a value
    pub fn load_const(&mut self, value: Value) -> Result<usize> {
        let index = self.add_constant(value)?;
        Ok(self.emit(Opcode::LoadConst, index))
    }

    /// Emit a name-operand instruction (`LoadGlobal`, `StoreGlobal`, `LoadAttr`, `StoreAttr`)
    pub fn emit_name(&mut self, opcode: Opcode, name: &str) -> Result<usize> {
        debug_assert_eq!(opcode.operand_kind(), OperandKind::Name);
        let index = self.add_name(name)?;
        Ok(self.emit(opcode, index))
    }

    /// Point the jump at `position` to `target`
    pub fn patch_jump(&mut self, position: usize, target: usize) -> Result<()> {
        let target = u8::try_from(target).map_err(|_| {
            Error::InvalidBytecode(format!("{}: jump target {} out of range", self.name, target))
        })?;
        match self.instructions.get_mut(position) {
            Some(instruction) if instruction.opcode.flags().contains(OpFlags::JUMP) => {
                instruction.arg = target;
                Ok(())
            }
            _ => Err(Error::InvalidBytecode(format!(
                "{}: no jump at position {}",
                self.name, position
            ))),
        }
    }

    /// Validate operands and produce the immutable code unit
    pub fn build(self) -> Result<CodeUnit> {
        for (position, instruction) in self.instructions.iter().enumerate() {
            let arg = instruction.arg as usize;
            let valid = match instruction.opcode.operand_kind() {
                OperandKind::None | OperandKind::ArgCount => true,
                OperandKind::Const => arg < self.constants.len(),
                OperandKind::Name => arg < self.names.len(),
                OperandKind::Local => arg < self.nlocals as usize,
                OperandKind::Target => arg <= self.instructions.len(),
            };
            if !valid {
                return Err(Error::InvalidBytecode(format!(
                    "{}: operand {} of {:?} at {} is out of range",
                    self.name, arg, instruction.opcode, position
                )));
            }
        }

        Ok(CodeUnit {
            name: Rc::from(self.name),
            instructions: self.instructions.into_boxed_slice(),
            constants: self.constants,
            names: self.names,
            argcount: self.argcount,
            nlocals: self.nlocals,
            warmup: Cell::new(0),
            quickened: OnceCell::new(),
        })
    }
}

/// Constants share a slot only when indistinguishable, so `-0.0` keeps its sign
fn same_constant(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_dedups_constants_and_names() {
        let mut builder = CodeBuilder::new("dedup");
        assert_eq!(builder.add_constant(Value::Int(42)).unwrap(), 0);
        assert_eq!(builder.add_constant(Value::Int(7)).unwrap(), 1);
        assert_eq!(builder.add_constant(Value::Int(42)).unwrap(), 0);
        assert_eq!(builder.add_name("x").unwrap(), 0);
        assert_eq!(builder.add_name("x").unwrap(), 0);
        assert_eq!(builder.add_name("y").unwrap(), 1);
    }

    #[test]
    fn test_signed_zero_constants_stay_distinct() {
        let mut builder = CodeBuilder::new("zeros");
        let positive = builder.add_constant(Value::Float(0.0)).unwrap();
        let negative = builder.add_constant(Value::Float(-0.0)).unwrap();
        assert_ne!(positive, negative);
        assert_eq!(builder.add_constant(Value::Float(-0.0)).unwrap(), negative);

        builder.emit(Opcode::LoadConst, positive);
        builder.emit_op(Opcode::Pop);
        builder.emit(Opcode::LoadConst, negative);
        builder.emit_op(Opcode::Return);
        let code = builder.build().unwrap();
        let result = crate::runtime::Vm::new()
            .run(&code, &crate::runtime::Module::new("m"))
            .unwrap();
        match result {
            Value::Float(x) => assert!(x == 0.0 && x.is_sign_negative()),
            other => panic!("unexpected result {}", other),
        }
    }

    #[test]
    fn test_build_rejects_bad_operands() {
        let mut builder = CodeBuilder::new("bad_local").locals(1);
        builder.emit(Opcode::LoadFast, 3);
        assert!(matches!(builder.build(), Err(Error::InvalidBytecode(_))));

        let mut builder = CodeBuilder::new("bad_const");
        builder.emit(Opcode::LoadConst, 0);
        assert!(builder.build().is_err());

        let mut builder = CodeBuilder::new("bad_target");
        builder.emit(Opcode::Jump, 9);
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_patch_jump_requires_jump() {
        let mut builder = CodeBuilder::new("patch");
        let nop = builder.emit_op(Opcode::Nop);
        let jump = builder.emit_op(Opcode::Jump);
        assert!(builder.patch_jump(nop, 0).is_err());
        builder.patch_jump(jump, 0).unwrap();
        assert!(builder.patch_jump(jump, 300).is_err());
        let code = builder.build().unwrap();
        assert_eq!(code.instructions()[jump], Instruction::new(Opcode::Jump, 0));
    }

    #[test]
    fn test_disassemble() {
        let mut builder = CodeBuilder::new("test");
        builder.load_const(Value::Int(42)).unwrap();
        builder.emit_name(Opcode::StoreGlobal, "answer").unwrap();
        builder.emit_op(Opcode::Return);
        let code = builder.build().unwrap();

        let output = code.disassemble();
        assert!(output.starts_with("== test =="));
        assert!(output.contains("LoadConst"));
        assert!(output.contains("0 (42)"));
        assert!(output.contains("0 (answer)"));
        assert!(output.contains("0002 Return"));
    }

    #[test]
    fn test_new_unit_is_cold() {
        let code = CodeBuilder::new("cold").build().unwrap();
        assert!(code.is_empty());
        assert_eq!(code.warmup_count(), 0);
        assert!(code.quickened().is_none());
        assert_eq!(code.tick_warmup(), 1);
        code.reset_warmup();
        assert_eq!(code.warmup_count(), 0);
    }
}
