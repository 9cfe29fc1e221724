//! Bytecode opcodes and the static family table
//!
//! Every opcode is an `(opcode, u8 operand)` pair in the instruction stream.
//! Opcodes that belong to an instruction family can be quickened into that
//! family's adaptive member; the family decides how many ancillary entries a
//! quickened site reserves.

use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// Static properties of an opcode
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpFlags: u8 {
        /// The operand byte is meaningful
        const HAS_ARG = 0b0000_0001;
        /// The operand is an absolute jump target
        const JUMP = 0b0000_0010;
        /// Control never falls through to the next instruction
        const TERMINATOR = 0b0000_0100;
        /// Eligible for quickening into an adaptive family
        const ADAPTIVE = 0b0000_1000;
    }
}

/// What the operand byte of an opcode refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// Operand is ignored
    None,
    /// Index into the constant pool
    Const,
    /// Index into the names table
    Name,
    /// Local variable slot
    Local,
    /// Absolute instruction position
    Target,
    /// Number of call arguments on the stack
    ArgCount,
}

/// Bytecode opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Opcode {
    // ========== Stack Operations ==========
    /// No operation
    Nop = 0x00,
    /// Pop the top value from the stack
    Pop = 0x01,
    /// Duplicate the top value on the stack
    Dup = 0x02,

    // ========== Variables ==========
    /// Push a constant
    /// Operands: constant_index (u8)
    LoadConst = 0x10,
    /// Push a local variable
    /// Operands: local_index (u8)
    LoadFast = 0x11,
    /// Pop into a local variable
    /// Operands: local_index (u8)
    StoreFast = 0x12,
    /// Push a global, falling back to builtins
    /// Operands: name_index (u8)
    LoadGlobal = 0x13,
    /// Pop into a global
    /// Operands: name_index (u8)
    StoreGlobal = 0x14,

    // ========== Attributes ==========
    /// Replace the receiver on top of the stack with one of its attributes
    /// Operands: name_index (u8)
    LoadAttr = 0x20,
    /// Pop receiver (TOS) and value (TOS1), store the attribute
    /// Operands: name_index (u8)
    StoreAttr = 0x21,

    // ========== Arithmetic ==========
    /// Add the two top values
    BinaryAdd = 0x30,
    /// Subtract TOS from TOS1
    BinarySub = 0x31,
    /// Compare TOS1 < TOS
    CompareLt = 0x32,

    // ========== Control Flow ==========
    /// Jump to an absolute position
    /// Operands: target (u8)
    Jump = 0x40,
    /// Pop and jump to an absolute position when falsy
    /// Operands: target (u8)
    JumpIfFalse = 0x41,

    // ========== Calls ==========
    /// Call TOS-n with the n values above it
    /// Operands: arg_count (u8)
    Call = 0x50,
    /// Return TOS to the caller
    Return = 0x51,
}

impl Opcode {
    /// Convert a raw byte to an opcode
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        match byte {
            0x00 => Some(Opcode::Nop),
            0x01 => Some(Opcode::Pop),
            0x02 => Some(Opcode::Dup),
            0x10 => Some(Opcode::LoadConst),
            0x11 => Some(Opcode::LoadFast),
            0x12 => Some(Opcode::StoreFast),
            0x13 => Some(Opcode::LoadGlobal),
            0x14 => Some(Opcode::StoreGlobal),
            0x20 => Some(Opcode::LoadAttr),
            0x21 => Some(Opcode::StoreAttr),
            0x30 => Some(Opcode::BinaryAdd),
            0x31 => Some(Opcode::BinarySub),
            0x32 => Some(Opcode::CompareLt),
            0x40 => Some(Opcode::Jump),
            0x41 => Some(Opcode::JumpIfFalse),
            0x50 => Some(Opcode::Call),
            0x51 => Some(Opcode::Return),
            _ => None,
        }
    }

    /// What the operand byte means for this opcode
    pub fn operand_kind(self) -> OperandKind {
        match self {
            Opcode::Nop
            | Opcode::Pop
            | Opcode::Dup
            | Opcode::BinaryAdd
            | Opcode::BinarySub
            | Opcode::CompareLt
            | Opcode::Return => OperandKind::None,
            Opcode::LoadConst => OperandKind::Const,
            Opcode::LoadFast | Opcode::StoreFast => OperandKind::Local,
            Opcode::LoadGlobal | Opcode::StoreGlobal | Opcode::LoadAttr | Opcode::StoreAttr => {
                OperandKind::Name
            }
            Opcode::Jump | Opcode::JumpIfFalse => OperandKind::Target,
            Opcode::Call => OperandKind::ArgCount,
        }
    }

    /// Static flags for this opcode
    pub fn flags(self) -> OpFlags {
        let mut flags = OpFlags::empty();
        match self.operand_kind() {
            OperandKind::None => {}
            OperandKind::Target => flags |= OpFlags::HAS_ARG | OpFlags::JUMP,
            _ => flags |= OpFlags::HAS_ARG,
        }
        if matches!(self, Opcode::Jump | Opcode::Return) {
            flags |= OpFlags::TERMINATOR;
        }
        if self.family().is_some() {
            flags |= OpFlags::ADAPTIVE;
        }
        flags
    }

    /// The instruction family this opcode quickens into, if any
    pub fn family(self) -> Option<Family> {
        match self {
            Opcode::LoadGlobal => Some(Family::LoadGlobal),
            Opcode::LoadAttr => Some(Family::LoadAttr),
            Opcode::Call => Some(Family::Call),
            Opcode::BinaryAdd => Some(Family::BinaryAdd),
            _ => None,
        }
    }
}

/// A closed set of instruction families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Family {
    LoadGlobal,
    LoadAttr,
    Call,
    BinaryAdd,
}

impl Family {
    /// Every family, in table order
    pub const ALL: [Family; 4] = [
        Family::LoadGlobal,
        Family::LoadAttr,
        Family::Call,
        Family::BinaryAdd,
    ];

    /// Number of families
    pub const COUNT: usize = Self::ALL.len();

    /// Ancillary entries reserved by every member of this family
    pub const fn cache_entries(self) -> usize {
        match self {
            Family::LoadGlobal | Family::LoadAttr | Family::Call => 2,
            // The operand byte is unused by the semantics and holds the counter
            Family::BinaryAdd => 0,
        }
    }

    /// The static opcode this family specializes
    pub const fn base_opcode(self) -> Opcode {
        match self {
            Family::LoadGlobal => Opcode::LoadGlobal,
            Family::LoadAttr => Opcode::LoadAttr,
            Family::Call => Opcode::Call,
            Family::BinaryAdd => Opcode::BinaryAdd,
        }
    }

    /// Position of this family in [`Family::ALL`]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            Family::LoadGlobal => "load_global",
            Family::LoadAttr => "load_attr",
            Family::Call => "call",
            Family::BinaryAdd => "binary_add",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_OPCODES: [Opcode; 17] = [
        Opcode::Nop,
        Opcode::Pop,
        Opcode::Dup,
        Opcode::LoadConst,
        Opcode::LoadFast,
        Opcode::StoreFast,
        Opcode::LoadGlobal,
        Opcode::StoreGlobal,
        Opcode::LoadAttr,
        Opcode::StoreAttr,
        Opcode::BinaryAdd,
        Opcode::BinarySub,
        Opcode::CompareLt,
        Opcode::Jump,
        Opcode::JumpIfFalse,
        Opcode::Call,
        Opcode::Return,
    ];

    #[test]
    fn test_from_u8_matches_discriminants() {
        for op in ALL_OPCODES {
            assert_eq!(Opcode::from_u8(op as u8), Some(op));
        }
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_family_table_is_consistent() {
        for family in Family::ALL {
            assert_eq!(family.base_opcode().family(), Some(family));
            assert_eq!(Family::ALL[family.index()], family);
            assert!(family.base_opcode().flags().contains(OpFlags::ADAPTIVE));
        }
        let adaptive = ALL_OPCODES.iter().filter(|op| op.family().is_some()).count();
        assert_eq!(adaptive, Family::COUNT);
    }

    #[test]
    fn test_zero_entry_families_ignore_operand() {
        // A zero-entry family keeps its counter in the operand byte, which is
        // only sound when the generic semantics never read it
        for family in Family::ALL {
            if family.cache_entries() == 0 {
                assert_eq!(family.base_opcode().operand_kind(), OperandKind::None);
            }
        }
    }

    #[test]
    fn test_flags() {
        assert!(Opcode::Jump.flags().contains(OpFlags::JUMP | OpFlags::TERMINATOR));
        assert!(Opcode::JumpIfFalse.flags().contains(OpFlags::JUMP));
        assert!(!Opcode::JumpIfFalse.flags().contains(OpFlags::TERMINATOR));
        assert!(Opcode::Return.flags().contains(OpFlags::TERMINATOR));
        assert!(Opcode::Pop.flags().is_empty());
    }
}
