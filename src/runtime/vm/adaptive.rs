//! Adaptive and specialized family members
//!
//! Every family follows the same life cycle:
//!
//! - the adaptive member counts executions and, at the threshold, asks the
//!   family's specializer for a member before running the generic semantics
//!   of the current execution;
//! - a specialized member checks its guards; a hit runs the fast path and
//!   bumps the saturating counter, a miss runs the generic semantics and
//!   lowers it;
//! - a miss that brings the counter to its minimum rewrites the site back
//!   to the adaptive member.

use super::types::CallFrame;
use super::Vm;
use crate::bytecode::{CodeUnit, Family};
use crate::error::{Error, Result, StackFrame};
use crate::quicken::specialize::{self, Outcome};
use crate::quicken::{BinaryAddOp, CallOp, LoadAttrOp, LoadGlobalOp, QuickOp, QuickenedCode};
use crate::runtime::ops;
use crate::runtime::Value;
use std::rc::Rc;
use tracing::{debug, trace};

impl Vm {
    /// Count an adaptive execution; true when the site should specialize now
    fn adaptive_tick(&mut self, quick: &QuickenedCode, position: usize, family: Family) -> bool {
        self.stats.family_mut(family).adaptive += 1;
        quick.tick_adaptive(position, self.config.specialize_threshold)
    }

    /// Apply a specializer's decision to the site
    fn finish_specialization(
        &mut self,
        code: &CodeUnit,
        quick: &QuickenedCode,
        position: usize,
        family: Family,
        outcome: Outcome<QuickOp>,
    ) {
        match outcome {
            Ok(op) => {
                quick.specialize(position, op, self.policy.initial);
                self.stats.family_mut(family).success += 1;
                debug!(
                    code = code.name(),
                    position,
                    family = family.name(),
                    member = %op,
                    "specialized"
                );
            }
            Err(reason) => {
                quick.reset_adaptive(position);
                self.stats.record_failure(family, reason);
                trace!(
                    code = code.name(),
                    position,
                    family = family.name(),
                    %reason,
                    "specialization refused"
                );
            }
        }
    }

    fn guard_hit(&mut self, quick: &QuickenedCode, position: usize, family: Family) {
        quick.set_counter(position, self.policy.hit(quick.counter(position)));
        self.stats.family_mut(family).hit += 1;
    }

    fn guard_miss(&mut self, code: &CodeUnit, quick: &QuickenedCode, position: usize, family: Family) {
        let (counter, deopt) = self.policy.miss(quick.counter(position));
        self.stats.family_mut(family).miss += 1;
        if deopt {
            let member = quick.instr(position).op;
            quick.deoptimize(position, family);
            self.stats.family_mut(family).deopt += 1;
            debug!(
                code = code.name(),
                position,
                family = family.name(),
                member = %member,
                "deoptimized"
            );
        } else {
            quick.set_counter(position, counter);
        }
    }

    pub(super) fn load_global(
        &mut self,
        frame: &CallFrame<'_>,
        position: usize,
        member: LoadGlobalOp,
    ) -> Result<Value> {
        let quick = quickened(frame)?;
        let entry = quick.adaptive_entry(position);
        let name = frame
            .code
            .name_at(entry.original_arg)
            .cloned()
            .ok_or_else(|| super::bad_operand(frame.code, position))?;
        let builtins = Rc::clone(&self.builtins);

        match member {
            LoadGlobalOp::Adaptive => {
                if self.adaptive_tick(quick, position, Family::LoadGlobal) {
                    let outcome = specialize::load_global(
                        quick,
                        position,
                        &name,
                        &frame.globals.namespace(),
                        &builtins.namespace(),
                    );
                    self.finish_specialization(
                        frame.code,
                        quick,
                        position,
                        Family::LoadGlobal,
                        outcome.map(QuickOp::LoadGlobal),
                    );
                }
            }
            LoadGlobalOp::Module => {
                let versions = quick.versions(position);
                let hit = {
                    let globals = frame.globals.namespace();
                    if versions.first != 0 && globals.keys_version() == versions.first {
                        globals.value_at(entry.index as usize).cloned()
                    } else {
                        None
                    }
                };
                if let Some(value) = hit {
                    self.guard_hit(quick, position, Family::LoadGlobal);
                    return Ok(value);
                }
                self.guard_miss(frame.code, quick, position, Family::LoadGlobal);
            }
            LoadGlobalOp::Builtin => {
                let versions = quick.versions(position);
                let hit = {
                    let globals = frame.globals.namespace();
                    let builtins = builtins.namespace();
                    if versions.first != 0
                        && versions.second != 0
                        && globals.keys_version() == versions.first
                        && builtins.keys_version() == versions.second
                    {
                        builtins.value_at(entry.index as usize).cloned()
                    } else {
                        None
                    }
                };
                if let Some(value) = hit {
                    self.guard_hit(quick, position, Family::LoadGlobal);
                    return Ok(value);
                }
                self.guard_miss(frame.code, quick, position, Family::LoadGlobal);
            }
        }
        let value = ops::load_global(&frame.globals.namespace(), &builtins.namespace(), &name);
        value
    }

    pub(super) fn load_attr(
        &mut self,
        frame: &CallFrame<'_>,
        position: usize,
        member: LoadAttrOp,
        receiver: &Value,
    ) -> Result<Value> {
        let quick = quickened(frame)?;
        let entry = quick.adaptive_entry(position);
        let name = frame
            .code
            .name_at(entry.original_arg)
            .cloned()
            .ok_or_else(|| super::bad_operand(frame.code, position))?;

        let hit = match (member, receiver) {
            (LoadAttrOp::Adaptive, _) => {
                if self.adaptive_tick(quick, position, Family::LoadAttr) {
                    let outcome = specialize::load_attr(quick, position, &name, receiver);
                    self.finish_specialization(
                        frame.code,
                        quick,
                        position,
                        Family::LoadAttr,
                        outcome.map(QuickOp::LoadAttr),
                    );
                }
                return ops::load_attr(receiver, &name);
            }
            (LoadAttrOp::InstanceValue, Value::Instance(instance)) if entry.version != 0 => {
                instance.field_if_shape(entry.version, entry.index as usize)
            }
            (LoadAttrOp::Class, Value::Instance(instance)) if entry.version != 0 => {
                let versions = quick.versions(position);
                if instance.shape_id() == versions.first {
                    let namespace = instance.class().namespace();
                    if namespace.keys_version() == entry.version {
                        namespace.value_at(entry.index as usize).cloned()
                    } else {
                        None
                    }
                } else {
                    None
                }
            }
            (LoadAttrOp::Module, Value::Module(module)) if entry.version != 0 => {
                let namespace = module.namespace();
                if namespace.keys_version() == entry.version {
                    namespace.value_at(entry.index as usize).cloned()
                } else {
                    None
                }
            }
            _ => None,
        };

        if let Some(value) = hit {
            self.guard_hit(quick, position, Family::LoadAttr);
            return Ok(value);
        }
        self.guard_miss(frame.code, quick, position, Family::LoadAttr);
        ops::load_attr(receiver, &name)
    }

    pub(super) fn call_site(
        &mut self,
        frame: &mut CallFrame<'_>,
        position: usize,
        member: CallOp,
    ) -> Result<Value> {
        let quick = quickened(frame)?;
        let entry = quick.adaptive_entry(position);
        let argc = entry.original_arg as usize;
        let args = frame.pop_n(argc)?;
        let callee = frame.pop()?;

        match (member, &callee) {
            (CallOp::Adaptive, _) => {
                if self.adaptive_tick(quick, position, Family::Call) {
                    let outcome = specialize::call(quick, position, &callee, argc);
                    self.finish_specialization(
                        frame.code,
                        quick,
                        position,
                        Family::Call,
                        outcome.map(QuickOp::Call),
                    );
                }
            }
            (CallOp::FunctionExact, Value::Function(function))
                if entry.version != 0
                    && function.version() == entry.version
                    && function.argcount() as usize == argc =>
            {
                self.guard_hit(quick, position, Family::Call);
                return self.call_exact(function, args);
            }
            (CallOp::Builtin, Value::Builtin(builtin))
                if entry.version != 0
                    && builtin.id() == entry.version
                    && builtin.arity() == u8::try_from(argc).ok() =>
            {
                self.guard_hit(quick, position, Family::Call);
                return builtin
                    .call_unchecked(&args)
                    .map_err(|e| e.push_frame(StackFrame::native(builtin.name())));
            }
            _ => self.guard_miss(frame.code, quick, position, Family::Call),
        }
        self.call(&callee, args)
    }

    pub(super) fn binary_add(
        &mut self,
        frame: &CallFrame<'_>,
        position: usize,
        member: BinaryAddOp,
        left: &Value,
        right: &Value,
    ) -> Result<Value> {
        let quick = quickened(frame)?;
        match (member, left, right) {
            (BinaryAddOp::Adaptive, _, _) => {
                if self.adaptive_tick(quick, position, Family::BinaryAdd) {
                    let outcome = specialize::binary_add(left, right);
                    self.finish_specialization(
                        frame.code,
                        quick,
                        position,
                        Family::BinaryAdd,
                        outcome.map(QuickOp::BinaryAdd),
                    );
                }
            }
            (BinaryAddOp::Int, Value::Int(a), Value::Int(b)) => {
                self.guard_hit(quick, position, Family::BinaryAdd);
                return ops::add_ints(*a, *b);
            }
            (BinaryAddOp::Float, Value::Float(a), Value::Float(b)) => {
                self.guard_hit(quick, position, Family::BinaryAdd);
                return Ok(ops::add_floats(*a, *b));
            }
            (BinaryAddOp::Str, Value::Str(a), Value::Str(b)) => {
                self.guard_hit(quick, position, Family::BinaryAdd);
                return Ok(ops::concat(a, b));
            }
            _ => self.guard_miss(frame.code, quick, position, Family::BinaryAdd),
        }
        ops::binary_add(left, right)
    }
}

/// The quickened stream of a frame executing a family member
fn quickened<'a>(frame: &CallFrame<'a>) -> Result<&'a QuickenedCode> {
    frame.quick.ok_or_else(|| {
        Error::InvalidBytecode(format!(
            "{}: family member outside quickened code",
            frame.code.name()
        ))
    })
}
