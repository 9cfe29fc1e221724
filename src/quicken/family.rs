//! Family members of the quickened instruction set
//!
//! Each family is one static opcode plus its adaptive member and a handful of
//! specialized members. A site only ever moves between members of its own
//! family, so the member enums are separate types and [`QuickOp`] cannot be
//! rewritten across families by construction.

use crate::bytecode::{Family, Instruction, Opcode};
use serde::Serialize;
use std::fmt;

/// `LoadGlobal` family members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LoadGlobalOp {
    Adaptive,
    /// Name found in the module namespace
    Module,
    /// Name absent from the module namespace, found in builtins
    Builtin,
}

/// `LoadAttr` family members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LoadAttrOp {
    Adaptive,
    /// Field stored on the instance, guarded by its shape
    InstanceValue,
    /// Attribute found on the instance's class
    Class,
    /// Attribute of a module object
    Module,
}

/// `Call` family members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CallOp {
    Adaptive,
    /// Bytecode function with an exact positional argument match
    FunctionExact,
    /// Fixed-arity builtin
    Builtin,
}

/// `BinaryAdd` family members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BinaryAddOp {
    Adaptive,
    Int,
    Float,
    Str,
}

/// The opcode of a quickened instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QuickOp {
    /// A static opcode copied unchanged
    Plain(Opcode),
    LoadGlobal(LoadGlobalOp),
    LoadAttr(LoadAttrOp),
    Call(CallOp),
    BinaryAdd(BinaryAddOp),
}

impl QuickOp {
    /// The adaptive member of a family
    pub const fn adaptive(family: Family) -> QuickOp {
        match family {
            Family::LoadGlobal => QuickOp::LoadGlobal(LoadGlobalOp::Adaptive),
            Family::LoadAttr => QuickOp::LoadAttr(LoadAttrOp::Adaptive),
            Family::Call => QuickOp::Call(CallOp::Adaptive),
            Family::BinaryAdd => QuickOp::BinaryAdd(BinaryAddOp::Adaptive),
        }
    }

    /// Family of a quickened member; `None` for plain opcodes, including
    /// family opcodes that were left unquickened
    pub const fn family(self) -> Option<Family> {
        match self {
            QuickOp::Plain(_) => None,
            QuickOp::LoadGlobal(_) => Some(Family::LoadGlobal),
            QuickOp::LoadAttr(_) => Some(Family::LoadAttr),
            QuickOp::Call(_) => Some(Family::Call),
            QuickOp::BinaryAdd(_) => Some(Family::BinaryAdd),
        }
    }

    /// The static opcode this instruction stands for
    pub const fn base_opcode(self) -> Opcode {
        match self {
            QuickOp::Plain(opcode) => opcode,
            QuickOp::LoadGlobal(_) => Opcode::LoadGlobal,
            QuickOp::LoadAttr(_) => Opcode::LoadAttr,
            QuickOp::Call(_) => Opcode::Call,
            QuickOp::BinaryAdd(_) => Opcode::BinaryAdd,
        }
    }

    pub fn is_adaptive(self) -> bool {
        matches!(
            self,
            QuickOp::LoadGlobal(LoadGlobalOp::Adaptive)
                | QuickOp::LoadAttr(LoadAttrOp::Adaptive)
                | QuickOp::Call(CallOp::Adaptive)
                | QuickOp::BinaryAdd(BinaryAddOp::Adaptive)
        )
    }

    pub fn is_specialized(self) -> bool {
        self.family().is_some() && !self.is_adaptive()
    }

    /// Display name, e.g. `LoadGlobalModule` or `BinaryAddAdaptive`
    pub fn name(self) -> String {
        match self {
            QuickOp::Plain(opcode) => format!("{:?}", opcode),
            QuickOp::LoadGlobal(member) => format!("LoadGlobal{:?}", member),
            QuickOp::LoadAttr(member) => format!("LoadAttr{:?}", member),
            QuickOp::Call(member) => format!("Call{:?}", member),
            QuickOp::BinaryAdd(member) => format!("BinaryAdd{:?}", member),
        }
    }
}

impl fmt::Display for QuickOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// One quickened `(opcode, operand)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct QuickInstr {
    pub op: QuickOp,
    pub arg: u8,
}

impl QuickInstr {
    pub const fn new(op: QuickOp, arg: u8) -> Self {
        Self { op, arg }
    }

    /// A static instruction copied unchanged
    pub const fn plain(instruction: Instruction) -> Self {
        Self {
            op: QuickOp::Plain(instruction.opcode),
            arg: instruction.arg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adaptive_member_round_trips_family() {
        for family in Family::ALL {
            let op = QuickOp::adaptive(family);
            assert!(op.is_adaptive());
            assert!(!op.is_specialized());
            assert_eq!(op.family(), Some(family));
            assert_eq!(op.base_opcode(), family.base_opcode());
        }
    }

    #[test]
    fn test_plain_family_opcode_is_not_quickened() {
        let op = QuickOp::Plain(Opcode::LoadGlobal);
        assert_eq!(op.family(), None);
        assert!(!op.is_adaptive());
        assert!(!op.is_specialized());
        assert_eq!(op.base_opcode(), Opcode::LoadGlobal);
    }

    #[test]
    fn test_names() {
        assert_eq!(QuickOp::LoadGlobal(LoadGlobalOp::Module).name(), "LoadGlobalModule");
        assert_eq!(QuickOp::BinaryAdd(BinaryAddOp::Adaptive).to_string(), "BinaryAddAdaptive");
        assert_eq!(QuickOp::Plain(Opcode::Return).name(), "Return");
        assert!(QuickOp::Call(CallOp::FunctionExact).is_specialized());
    }
}
