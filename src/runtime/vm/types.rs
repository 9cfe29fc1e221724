//! VM type definitions

use super::super::object::Module;
use super::super::value::Value;
use crate::bytecode::{CodeUnit, Instruction};
use crate::error::{Error, Result};
use crate::quicken::QuickenedCode;
use std::rc::Rc;

/// A call frame
///
/// `quick` is `None` while the frame runs the static stream (cold unit or
/// tracing mode). Once the unit is quickened the frame switches to the
/// quickened stream at the same position.
pub(super) struct CallFrame<'a> {
    pub code: &'a CodeUnit,
    pub globals: &'a Rc<Module>,
    pub quick: Option<&'a QuickenedCode>,
    pub locals: Vec<Option<Value>>,
    pub stack: Vec<Value>,
    /// Instruction pointer
    pub ip: usize,
}

impl<'a> CallFrame<'a> {
    pub fn new(code: &'a CodeUnit, globals: &'a Rc<Module>, locals: Vec<Option<Value>>) -> Self {
        Self {
            code,
            globals,
            quick: None,
            locals,
            stack: Vec::with_capacity(16),
            ip: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> Result<Value> {
        self.stack
            .pop()
            .ok_or_else(|| Error::InvalidBytecode(format!("{}: stack underflow", self.code.name())))
    }

    #[inline]
    pub fn peek(&self) -> Result<&Value> {
        self.stack
            .last()
            .ok_or_else(|| Error::InvalidBytecode(format!("{}: stack underflow", self.code.name())))
    }

    /// Pop `count` values, oldest first
    pub fn pop_n(&mut self, count: usize) -> Result<Vec<Value>> {
        if count > self.stack.len() {
            return Err(Error::InvalidBytecode(format!(
                "{}: stack underflow",
                self.code.name()
            )));
        }
        let start = self.stack.len() - count;
        Ok(self.stack.split_off(start))
    }
}

/// One executed instruction, reported to the trace hook
#[derive(Debug, Clone, Copy)]
pub struct TraceEvent<'a> {
    pub code: &'a CodeUnit,
    pub position: usize,
    /// The static instruction at `position`
    pub instruction: Instruction,
}

/// Callback observing every executed instruction
pub type TraceHook = Box<dyn FnMut(&TraceEvent<'_>)>;
