//! Per-family specializers
//!
//! A specializer inspects the operands of the current execution, picks the
//! first specialized member whose preconditions hold and fills the site's
//! ancillary entries with the guard tokens that member will check. It never
//! rewrites the instruction itself and never changes what the current
//! execution computes. On refusal nothing it wrote is trusted: the adaptive
//! member does not read guard entries.

use super::family::{BinaryAddOp, CallOp, LoadAttrOp, LoadGlobalOp};
use super::{QuickenedCode, SpecFailure, VersionPair};
use crate::runtime::{Namespace, Value};

pub(crate) type Outcome<T> = std::result::Result<T, SpecFailure>;

fn slot_index(index: usize) -> Outcome<u16> {
    u16::try_from(index).map_err(|_| SpecFailure::IndexOutOfRange)
}

fn versioned(version: u32) -> Outcome<u32> {
    if version == 0 {
        Err(SpecFailure::Unversioned)
    } else {
        Ok(version)
    }
}

/// Write entry 0's guard fields, keeping the original operand and counter
fn write_guard(q: &QuickenedCode, position: usize, index: u16, version: u32) {
    let mut entry = q.adaptive_entry(position);
    entry.index = index;
    entry.version = version;
    q.set_adaptive_entry(position, entry);
}

/// Global load: module namespace first, then builtins
pub(crate) fn load_global(
    q: &QuickenedCode,
    position: usize,
    name: &str,
    globals: &Namespace,
    builtins: &Namespace,
) -> Outcome<LoadGlobalOp> {
    let globals_version = versioned(globals.keys_version())?;
    if let Some(index) = globals.index_of(name) {
        let index = slot_index(index)?;
        write_guard(q, position, index, 0);
        q.set_versions(
            position,
            VersionPair {
                first: globals_version,
                second: 0,
            },
        );
        return Ok(LoadGlobalOp::Module);
    }

    let builtins_version = versioned(builtins.keys_version())?;
    let index = builtins.index_of(name).ok_or(SpecFailure::NotFound)?;
    let index = slot_index(index)?;
    write_guard(q, position, index, 0);
    // The module version guards against the name being shadowed later
    q.set_versions(
        position,
        VersionPair {
            first: globals_version,
            second: builtins_version,
        },
    );
    Ok(LoadGlobalOp::Builtin)
}

/// Attribute load: instance field, class attribute, module attribute
pub(crate) fn load_attr(
    q: &QuickenedCode,
    position: usize,
    name: &str,
    receiver: &Value,
) -> Outcome<LoadAttrOp> {
    match receiver {
        Value::Instance(instance) => {
            let shape = instance.shape();
            if let Some(index) = shape.index_of(name) {
                let index = slot_index(index)?;
                write_guard(q, position, index, versioned(shape.id())?);
                return Ok(LoadAttrOp::InstanceValue);
            }
            let class = instance.class();
            let namespace = class.namespace();
            let class_version = versioned(namespace.keys_version())?;
            let index = namespace.index_of(name).ok_or(SpecFailure::NotFound)?;
            let index = slot_index(index)?;
            write_guard(q, position, index, class_version);
            // A later instance field of the same name would shadow the class attribute
            q.set_versions(
                position,
                VersionPair {
                    first: versioned(shape.id())?,
                    second: 0,
                },
            );
            Ok(LoadAttrOp::Class)
        }
        Value::Module(module) => {
            let namespace = module.namespace();
            let version = versioned(namespace.keys_version())?;
            let index = namespace.index_of(name).ok_or(SpecFailure::NotFound)?;
            write_guard(q, position, slot_index(index)?, version);
            Ok(LoadAttrOp::Module)
        }
        _ => Err(SpecFailure::UnsupportedReceiver),
    }
}

/// Call: exact-arity bytecode function, then fixed-arity builtin
pub(crate) fn call(q: &QuickenedCode, position: usize, callee: &Value, argc: usize) -> Outcome<CallOp> {
    match callee {
        Value::Function(function) => {
            if function.argcount() as usize != argc {
                return Err(SpecFailure::ArityMismatch);
            }
            write_guard(q, position, 0, versioned(function.version())?);
            Ok(CallOp::FunctionExact)
        }
        Value::Builtin(builtin) => match builtin.arity() {
            Some(arity) if arity as usize == argc => {
                write_guard(q, position, 0, versioned(builtin.id())?);
                Ok(CallOp::Builtin)
            }
            Some(_) => Err(SpecFailure::ArityMismatch),
            None => Err(SpecFailure::UnsupportedCallee),
        },
        _ => Err(SpecFailure::UnsupportedCallee),
    }
}

/// Addition: the operand types alone pick the member
pub(crate) fn binary_add(left: &Value, right: &Value) -> Outcome<BinaryAddOp> {
    match (left, right) {
        (Value::Int(_), Value::Int(_)) => Ok(BinaryAddOp::Int),
        (Value::Float(_), Value::Float(_)) => Ok(BinaryAddOp::Float),
        (Value::Str(_), Value::Str(_)) => Ok(BinaryAddOp::Str),
        _ => Err(SpecFailure::UnsupportedOperands),
    }
}
