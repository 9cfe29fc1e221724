//! Error types for the quicken runtime
//!
//! Mis-speculation is never an error: guard misses and specialization
//! refusals are absorbed by the adaptive core. What remains here are the
//! failures a caller can actually observe: runtime errors raised by the
//! generic semantics, resource exhaustion, malformed bytecode and bad
//! configuration.

use std::fmt;
use thiserror::Error;

/// A single frame in a runtime stack trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Name of the code unit that was executing
    pub function_name: String,
    /// Instruction position that raised or propagated the error
    pub position: usize,
    /// Whether this is a native builtin
    pub is_native: bool,
}

impl StackFrame {
    /// Create a new stack frame
    pub fn new(function_name: impl Into<String>, position: usize) -> Self {
        Self {
            function_name: function_name.into(),
            position,
            is_native: false,
        }
    }

    /// Create a stack frame for a native builtin
    pub fn native(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            position: 0,
            is_native: true,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_native {
            write!(f, "    at {} (native)", self.function_name)
        } else {
            write!(f, "    at {} (@{:04})", self.function_name, self.position)
        }
    }
}

/// A runtime stack trace, innermost frame first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackTrace {
    pub frames: Vec<StackFrame>,
}

impl StackTrace {
    /// Create an empty stack trace
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Add a frame to the stack trace
    pub fn push(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    /// Check if the stack trace is empty
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.frames {
            writeln!(f, "{}", frame)?;
        }
        Ok(())
    }
}

/// Main error type for quicken
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Error raised by the generic semantics of an instruction
    #[error("{kind}: {message}{}", if stack_trace.is_empty() { String::new() } else { format!("\n{}", stack_trace) })]
    RuntimeError {
        kind: ErrorKind,
        message: String,
        stack_trace: StackTrace,
    },

    /// Resource limit exceeded (quickening budget, call depth)
    #[error("ResourceLimitError: {kind}: {message}")]
    ResourceLimitError {
        kind: ResourceLimitKind,
        message: String,
    },

    /// Bytecode rejected by the assembler or found malformed while executing
    #[error("InvalidBytecode: {0}")]
    InvalidBytecode(String),

    /// Configuration that violates a tuning invariant
    #[error("InvalidConfig: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IOError: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed
    #[error("ConfigParseError: {source}")]
    ConfigParse {
        #[from]
        source: serde_json::Error,
    },
}

/// Resource limit kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLimitKind {
    /// Quickened stream or ancillary array could not be allocated
    MemoryLimit,
    /// Call stack depth limit exceeded
    StackDepthLimit,
}

impl fmt::Display for ResourceLimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceLimitKind::MemoryLimit => write!(f, "MemoryLimit"),
            ResourceLimitKind::StackDepthLimit => write!(f, "StackDepthLimit"),
        }
    }
}

/// Runtime error kinds raised by the generic semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::enum_variant_names)]
pub enum ErrorKind {
    /// Wrong operand type for an operation
    TypeError,
    /// Unknown global or builtin name
    NameError,
    /// Missing attribute
    AttributeError,
    /// Integer arithmetic overflow
    OverflowError,
    /// Local read before assignment
    UnboundLocalError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TypeError => write!(f, "TypeError"),
            ErrorKind::NameError => write!(f, "NameError"),
            ErrorKind::AttributeError => write!(f, "AttributeError"),
            ErrorKind::OverflowError => write!(f, "OverflowError"),
            ErrorKind::UnboundLocalError => write!(f, "UnboundLocalError"),
        }
    }
}

impl Error {
    fn runtime(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error::RuntimeError {
            kind,
            message: message.into(),
            stack_trace: StackTrace::new(),
        }
    }

    /// Create a TypeError
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::TypeError, message)
    }

    /// Create a NameError
    pub fn name_error(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::NameError, message)
    }

    /// Create an AttributeError
    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::AttributeError, message)
    }

    /// Create an OverflowError
    pub fn overflow_error(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::OverflowError, message)
    }

    /// Create an UnboundLocalError
    pub fn unbound_local(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::UnboundLocalError, message)
    }

    /// The runtime error kind, if this is a runtime error
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::RuntimeError { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Record a frame the error unwound through
    pub fn push_frame(mut self, frame: StackFrame) -> Self {
        if let Error::RuntimeError { stack_trace, .. } = &mut self {
            stack_trace.push(frame);
        }
        self
    }

    /// Create a memory limit exceeded error
    pub fn memory_limit_exceeded(requested: usize, limit: usize) -> Self {
        Error::ResourceLimitError {
            kind: ResourceLimitKind::MemoryLimit,
            message: format!(
                "Quickening needs {} bytes, limit was {} bytes",
                requested, limit
            ),
        }
    }

    /// Create an allocator refusal error
    pub fn allocation_failed(requested: usize) -> Self {
        Error::ResourceLimitError {
            kind: ResourceLimitKind::MemoryLimit,
            message: format!("Allocator refused {} bytes for quickened code", requested),
        }
    }

    /// Create a stack depth limit exceeded error
    pub fn stack_depth_exceeded(depth: usize, limit: usize) -> Self {
        Error::ResourceLimitError {
            kind: ResourceLimitKind::StackDepthLimit,
            message: format!(
                "Call stack depth limit exceeded: {} frames, limit was {}",
                depth, limit
            ),
        }
    }
}

/// Result type alias for quicken
pub type Result<T> = std::result::Result<T, Error>;

/// Standardized error message templates
pub mod messages {
    pub const IS_NOT_DEFINED: &str = "is not defined";
    pub const NOT_CALLABLE: &str = "is not callable";
    pub const HAS_NO_ATTRIBUTE: &str = "has no attribute";
    pub const UNSUPPORTED_OPERANDS: &str = "unsupported operand types for";

    /// Format a "name 'X' is not defined" error message
    pub fn not_defined(name: &str) -> String {
        format!("name '{}' {}", name, IS_NOT_DEFINED)
    }

    /// Format a "'X' object is not callable" error message
    pub fn not_callable(type_name: &str) -> String {
        format!("'{}' object {}", type_name, NOT_CALLABLE)
    }

    /// Format a "'X' object has no attribute 'Y'" error message
    pub fn no_attribute(type_name: &str, attr: &str) -> String {
        format!("'{}' object {} '{}'", type_name, HAS_NO_ATTRIBUTE, attr)
    }

    /// Format an "unsupported operand types for +: 'X' and 'Y'" error message
    pub fn unsupported_operands(op: &str, left: &str, right: &str) -> String {
        format!("{} {}: '{}' and '{}'", UNSUPPORTED_OPERANDS, op, left, right)
    }

    /// Format an arity mismatch error message
    pub fn arity_mismatch(name: &str, expected: &str, given: usize) -> String {
        format!("{}() takes {} arguments but {} were given", name, expected, given)
    }
}
