//! Shared test helpers for integration tests

use quicken::bytecode::{CodeBuilder, CodeUnit, Opcode};
use quicken::quicken::SiteInfo;
use quicken::runtime::{Function, Module};
use quicken::workloads::{self, Workload};
use quicken::{AdaptiveConfig, Value, Vm};
use std::rc::Rc;

/// Quicken on first entry and specialize after two executions
pub fn eager_config() -> AdaptiveConfig {
    AdaptiveConfig::default()
        .with_warmup_threshold(1)
        .with_specialize_threshold(2)
}

/// Build a workload and run it once
pub fn run_workload(name: &str, iterations: u32, config: AdaptiveConfig) -> (Workload, Vm, Value) {
    let workload = workloads::by_name(name, iterations).unwrap();
    let mut vm = Vm::with_config(config).unwrap();
    let result = vm.run(&workload.code, &workload.globals).unwrap();
    (workload, vm, result)
}

/// Assemble a function bound to `globals`
#[allow(dead_code)]
pub fn function(
    globals: &Rc<Module>,
    name: &str,
    params: u8,
    build: impl FnOnce(&mut CodeBuilder),
) -> Rc<Function> {
    let mut builder = CodeBuilder::new(name).params(params);
    build(&mut builder);
    Rc::new(Function::new(Rc::new(builder.build().unwrap()), Rc::clone(globals)))
}

/// `def add(a, b): return a + b`
pub fn add_function(globals: &Rc<Module>) -> Rc<Function> {
    function(globals, "add", 2, |b| {
        b.emit(Opcode::LoadFast, 0);
        b.emit(Opcode::LoadFast, 1);
        b.emit_op(Opcode::BinaryAdd);
        b.emit_op(Opcode::Return);
    })
}

/// Family sites of a quickened unit whose static opcode is `opcode`
#[allow(dead_code)]
pub fn sites_of(code: &CodeUnit, opcode: Opcode) -> Vec<SiteInfo> {
    code.quickened()
        .expect("unit should be quickened")
        .sites()
        .into_iter()
        .filter(|site| site.opcode == opcode)
        .collect()
}
