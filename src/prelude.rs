//! Prelude module for convenient imports
//!
//! ```no_run
//! use quicken::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let workload = quicken::workloads::by_name("call_site", 1000)?;
//!     let mut vm = Vm::new();
//!     let result = vm.run(&workload.code, &workload.globals)?;
//!     println!("{} {}", result, vm.stats());
//!     Ok(())
//! }
//! ```

// Interpreter and values
pub use crate::runtime::{Builtin, Class, Function, Instance, Module, Value, Vm};

// Configuration
pub use crate::config::{AdaptiveConfig, ExecMode};

// Error handling
pub use crate::error::{Error, ErrorKind, Result, StackFrame, StackTrace};

// Bytecode
pub use crate::bytecode::{CodeBuilder, CodeUnit, Family, Instruction, Opcode};

// Instrumentation
pub use crate::quicken::{QuickOp, SiteInfo, SiteState, SpecializationStats};
