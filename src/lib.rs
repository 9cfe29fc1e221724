//! quicken: an adaptive, self-specializing bytecode interpreter core
//!
//! Code units start out executing their immutable static instruction stream.
//! Once a unit is warm it is *quickened*: copied into a mutable stream where
//! every instruction of a family (global load, attribute load, call, add) is
//! replaced by that family's adaptive member. Adaptive members watch the
//! operands they see and rewrite themselves into guarded, specialized
//! members; specialized members fall back to the generic semantics when a
//! guard misses and rewrite themselves back once they keep missing.
//!
//! Specialization never changes what a program computes. Running the same
//! program in [`ExecMode::Tracing`], which never rewrites anything, produces
//! the same results.
//!
//! # Quick Start
//!
//! ```no_run
//! use quicken::bytecode::{CodeBuilder, Opcode};
//! use quicken::runtime::{Module, Value, Vm};
//!
//! fn main() -> quicken::Result<()> {
//!     let mut builder = CodeBuilder::new("<module>");
//!     builder.load_const(Value::Int(1))?;
//!     builder.load_const(Value::Int(2))?;
//!     builder.emit_op(Opcode::BinaryAdd);
//!     builder.emit_op(Opcode::Return);
//!     let code = builder.build()?;
//!
//!     let mut vm = Vm::new();
//!     let result = vm.run(&code, &Module::new("main"))?;
//!     println!("Result: {}", result);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`bytecode`] | Static instruction set, code units, assembler |
//! | [`quicken`] | Quickened streams, ancillary entries, specializers, statistics |
//! | [`runtime`] | Object model, generic semantics, interpreter |
//! | [`config`] | Thresholds and counter bounds |
//! | [`workloads`] | Canned programs for the CLI, benches and tests |
// Clippy configuration for quicken.
//
// - new_without_default: constructors that allocate fresh version tokens
// - len_without_is_empty: instrumentation types expose len() only
#![allow(clippy::new_without_default)]
#![allow(clippy::len_without_is_empty)]

pub mod bytecode;
pub mod config;
pub mod prelude;
pub mod quicken;
pub mod runtime;
pub mod workloads;

mod error;

pub use config::{AdaptiveConfig, ExecMode};
pub use error::{messages, Error, ErrorKind, ResourceLimitKind, Result, StackFrame, StackTrace};
pub use runtime::{Value, Vm};

/// quicken version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
