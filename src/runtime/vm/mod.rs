//! Virtual machine (interpreter) for quicken
//!
//! Each call runs in its own Rust stack frame with a private value stack and
//! locals. Code units warm up on frame entry and on backward jumps; once a
//! unit crosses the warm-up threshold it is quickened and every frame running
//! it dispatches from the quickened stream, where family sites adapt
//! themselves (see `adaptive.rs`).

mod adaptive;
mod types;

pub use types::{TraceEvent, TraceHook};

use types::CallFrame;

use super::builtins;
use super::object::Module;
use super::ops;
use super::value::{Function, Value};
use crate::bytecode::{CodeUnit, Opcode};
use crate::config::{AdaptiveConfig, CounterPolicy, ExecMode};
use crate::error::{messages, Error, Result, StackFrame};
use crate::quicken::{QuickInstr, QuickOp, QuickenedCode, SpecializationStats};
use std::rc::Rc;
use tracing::{debug, warn};

/// The quicken virtual machine
pub struct Vm {
    config: AdaptiveConfig,
    policy: CounterPolicy,
    /// Fallback namespace for global lookups
    builtins: Rc<Module>,
    stats: SpecializationStats,
    /// Current call depth
    depth: usize,
    trace_hook: Option<TraceHook>,
}

impl Vm {
    /// Create a VM with the default configuration
    pub fn new() -> Self {
        Self::build(AdaptiveConfig::default())
    }

    /// Create a VM with a validated configuration
    pub fn with_config(config: AdaptiveConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: AdaptiveConfig) -> Self {
        let builtins = Module::new("builtins");
        builtins::register_globals(&builtins);
        Self {
            policy: config.counter_policy(),
            config,
            builtins,
            stats: SpecializationStats::new(),
            depth: 0,
            trace_hook: None,
        }
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn mode(&self) -> ExecMode {
        self.config.mode
    }

    /// Switch execution mode. Tracing frames read the static stream; already
    /// quickened units keep their state and resume adapting in adaptive mode.
    pub fn set_mode(&mut self, mode: ExecMode) {
        self.config.mode = mode;
    }

    /// The builtins module
    pub fn builtins(&self) -> &Rc<Module> {
        &self.builtins
    }

    pub fn stats(&self) -> &SpecializationStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Observe every executed instruction
    pub fn set_trace_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&TraceEvent<'_>) + 'static,
    {
        self.trace_hook = Some(Box::new(hook));
    }

    pub fn clear_trace_hook(&mut self) {
        self.trace_hook = None;
    }

    /// Run a top-level code unit against a module
    pub fn run(&mut self, code: &CodeUnit, globals: &Rc<Module>) -> Result<Value> {
        if code.argcount() != 0 {
            return Err(Error::type_error(messages::arity_mismatch(
                code.name(),
                &code.argcount().to_string(),
                0,
            )));
        }
        let locals = vec![None; code.nlocals() as usize];
        self.execute(code, globals, locals)
    }

    /// Call any callable value with the generic call semantics
    pub fn call(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value> {
        match callee {
            Value::Function(function) => {
                let locals = function.bind_arguments(args)?;
                self.execute(function.code(), function.globals(), locals)
            }
            Value::Builtin(builtin) => builtin
                .call(&args)
                .map_err(|e| e.push_frame(StackFrame::native(builtin.name()))),
            Value::Class(class) => {
                if !args.is_empty() {
                    return Err(Error::type_error(messages::arity_mismatch(
                        class.name(),
                        "0",
                        args.len(),
                    )));
                }
                Ok(Value::Instance(class.instantiate()))
            }
            other => Err(Error::type_error(messages::not_callable(other.type_name()))),
        }
    }

    /// Call a function whose argument count is known to match exactly
    fn call_exact(&mut self, function: &Function, args: Vec<Value>) -> Result<Value> {
        debug_assert_eq!(args.len(), function.argcount() as usize);
        let mut locals = Vec::with_capacity(function.code().nlocals() as usize);
        locals.extend(args.into_iter().map(Some));
        locals.resize(function.code().nlocals() as usize, None);
        self.execute(function.code(), function.globals(), locals)
    }

    fn execute(
        &mut self,
        code: &CodeUnit,
        globals: &Rc<Module>,
        locals: Vec<Option<Value>>,
    ) -> Result<Value> {
        if self.depth >= self.config.max_frame_depth {
            return Err(Error::stack_depth_exceeded(
                self.depth + 1,
                self.config.max_frame_depth,
            ));
        }
        self.depth += 1;
        let mut frame = CallFrame::new(code, globals, locals);
        let result = self
            .warm_up(code)
            .and_then(|quick| {
                frame.quick = quick;
                self.dispatch(&mut frame)
            });
        self.depth -= 1;
        result
    }

    /// Count one warm-up tick; quicken the unit once it is hot
    fn warm_up<'c>(&mut self, code: &'c CodeUnit) -> Result<Option<&'c QuickenedCode>> {
        if self.config.mode == ExecMode::Tracing {
            return Ok(None);
        }
        if let Some(quick) = code.quickened() {
            return Ok(Some(quick));
        }
        if code.tick_warmup() < self.config.warmup_threshold {
            return Ok(None);
        }
        match code.quicken(self.config.quicken_memory_limit) {
            Ok(quick) => {
                self.stats.quickened_units += 1;
                debug!(
                    code = code.name(),
                    instructions = quick.len(),
                    entries = quick.cache_len(),
                    "quickened code unit"
                );
                Ok(Some(quick))
            }
            Err(e) => {
                code.reset_warmup();
                self.stats.quicken_failures += 1;
                warn!(code = code.name(), error = %e, "quickening failed");
                Err(e)
            }
        }
    }

    fn dispatch(&mut self, frame: &mut CallFrame<'_>) -> Result<Value> {
        while frame.ip < frame.code.len() {
            let position = frame.ip;
            match self.step(frame) {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(e) => return Err(e.push_frame(StackFrame::new(frame.code.name(), position))),
            }
        }
        Ok(Value::None)
    }

    /// Execute one instruction; `Some` when the frame returns
    fn step(&mut self, frame: &mut CallFrame<'_>) -> Result<Option<Value>> {
        let position = frame.ip;
        let static_instr = frame.code.instructions()[position];
        let instr = match frame.quick {
            Some(quick) => quick.instr(position),
            None => QuickInstr::plain(static_instr),
        };
        if let Some(hook) = self.trace_hook.as_mut() {
            hook(&TraceEvent {
                code: frame.code,
                position,
                instruction: static_instr,
            });
        }
        frame.ip += 1;

        match instr.op {
            QuickOp::Plain(opcode) => return self.exec_generic(frame, position, opcode, instr.arg),
            QuickOp::LoadGlobal(member) => {
                let value = self.load_global(frame, position, member)?;
                frame.push(value);
            }
            QuickOp::LoadAttr(member) => {
                let receiver = frame.pop()?;
                let value = self.load_attr(frame, position, member, &receiver)?;
                frame.push(value);
            }
            QuickOp::Call(member) => {
                let value = self.call_site(frame, position, member)?;
                frame.push(value);
            }
            QuickOp::BinaryAdd(member) => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                let value = self.binary_add(frame, position, member, &left, &right)?;
                frame.push(value);
            }
        }
        Ok(None)
    }

    /// Generic semantics of a static opcode
    fn exec_generic(
        &mut self,
        frame: &mut CallFrame<'_>,
        position: usize,
        opcode: Opcode,
        arg: u8,
    ) -> Result<Option<Value>> {
        match opcode {
            Opcode::Nop => {}
            Opcode::Pop => {
                frame.pop()?;
            }
            Opcode::Dup => {
                let value = frame.peek()?.clone();
                frame.push(value);
            }
            Opcode::LoadConst => {
                let value = frame
                    .code
                    .constant(arg)
                    .cloned()
                    .ok_or_else(|| bad_operand(frame.code, position))?;
                frame.push(value);
            }
            Opcode::LoadFast => {
                let value = match frame.locals.get(arg as usize) {
                    Some(Some(value)) => value.clone(),
                    Some(None) => {
                        return Err(Error::unbound_local(format!(
                            "local {} referenced before assignment",
                            arg
                        )))
                    }
                    None => return Err(bad_operand(frame.code, position)),
                };
                frame.push(value);
            }
            Opcode::StoreFast => {
                let value = frame.pop()?;
                let slot = frame
                    .locals
                    .get_mut(arg as usize)
                    .ok_or_else(|| bad_operand(frame.code, position))?;
                *slot = Some(value);
            }
            Opcode::LoadGlobal => {
                let name = name_operand(frame.code, position, arg)?;
                let value = ops::load_global(
                    &frame.globals.namespace(),
                    &self.builtins.namespace(),
                    &name,
                )?;
                frame.push(value);
            }
            Opcode::StoreGlobal => {
                let name = name_operand(frame.code, position, arg)?;
                let value = frame.pop()?;
                frame.globals.set(&name, value);
            }
            Opcode::LoadAttr => {
                let name = name_operand(frame.code, position, arg)?;
                let receiver = frame.pop()?;
                frame.push(ops::load_attr(&receiver, &name)?);
            }
            Opcode::StoreAttr => {
                let name = name_operand(frame.code, position, arg)?;
                let receiver = frame.pop()?;
                let value = frame.pop()?;
                ops::store_attr(&receiver, &name, value)?;
            }
            Opcode::BinaryAdd => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                frame.push(ops::binary_add(&left, &right)?);
            }
            Opcode::BinarySub => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                frame.push(ops::binary_sub(&left, &right)?);
            }
            Opcode::CompareLt => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                frame.push(ops::compare_lt(&left, &right)?);
            }
            Opcode::Jump => self.jump(frame, position, arg as usize)?,
            Opcode::JumpIfFalse => {
                if !frame.pop()?.is_truthy() {
                    self.jump(frame, position, arg as usize)?;
                }
            }
            Opcode::Call => {
                let args = frame.pop_n(arg as usize)?;
                let callee = frame.pop()?;
                frame.push(self.call(&callee, args)?);
            }
            Opcode::Return => return frame.pop().map(Some),
        }
        Ok(None)
    }

    /// Take a jump; a backward jump counts as a warm-up tick
    fn jump(&mut self, frame: &mut CallFrame<'_>, position: usize, target: usize) -> Result<()> {
        frame.ip = target;
        if target <= position && frame.quick.is_none() {
            frame.quick = self.warm_up(frame.code)?;
        }
        Ok(())
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn bad_operand(code: &CodeUnit, position: usize) -> Error {
    Error::InvalidBytecode(format!(
        "{}: operand out of range at {}",
        code.name(),
        position
    ))
}

fn name_operand(code: &CodeUnit, position: usize, arg: u8) -> Result<Rc<str>> {
    code.name_at(arg)
        .cloned()
        .ok_or_else(|| bad_operand(code, position))
}
