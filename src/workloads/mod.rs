//! Canned bytecode programs
//!
//! Each workload is a top-level code unit plus the module it runs against.
//! They exercise one adaptive behavior each and are shared by the CLI, the
//! benchmarks and the integration tests.

use crate::bytecode::{CodeBuilder, CodeUnit, Opcode};
use crate::error::{Error, Result};
use crate::runtime::{Builtin, Class, Function, Module, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;

/// Loop iterations after which `shadowed_global` shadows the builtin
pub const STABLE_RUNS: i64 = 50;

/// Largest argument `recursion` accepts
pub const MAX_FIB: i64 = 25;

/// Seed for the `polymorphic` operand stream
pub const DEFAULT_SEED: u64 = 0x5eed;

/// Workload names accepted by [`by_name`]
pub const NAMES: [&str; 6] = [
    "call_site",
    "shadowed_global",
    "alternating_add",
    "attributes",
    "recursion",
    "polymorphic",
];

/// A runnable program
pub struct Workload {
    pub name: &'static str,
    pub description: &'static str,
    pub code: Rc<CodeUnit>,
    pub globals: Rc<Module>,
    /// Result of the first run of `code`
    pub expected: Value,
}

/// Build a workload by name
pub fn by_name(name: &str, iterations: u32) -> Result<Workload> {
    let n = i64::from(iterations);
    match name {
        "call_site" => call_site(n),
        "shadowed_global" => shadowed_global(n),
        "alternating_add" => alternating_add(n),
        "attributes" => attributes(n),
        "recursion" => recursion(n),
        "polymorphic" => polymorphic(n, DEFAULT_SEED),
        other => Err(Error::InvalidConfig(format!(
            "unknown workload '{}' (expected one of: {})",
            other,
            NAMES.join(", ")
        ))),
    }
}

/// Emit `for counter in 0..n { body }`
fn counted_loop(
    b: &mut CodeBuilder,
    counter: u8,
    n: i64,
    body: impl FnOnce(&mut CodeBuilder) -> Result<()>,
) -> Result<()> {
    b.load_const(Value::Int(0))?;
    b.emit(Opcode::StoreFast, counter);
    let top = b.position();
    b.emit(Opcode::LoadFast, counter);
    b.load_const(Value::Int(n))?;
    b.emit_op(Opcode::CompareLt);
    let exit = b.emit_op(Opcode::JumpIfFalse);
    body(b)?;
    b.emit(Opcode::LoadFast, counter);
    b.load_const(Value::Int(1))?;
    b.emit_op(Opcode::BinaryAdd);
    b.emit(Opcode::StoreFast, counter);
    let back = b.emit_op(Opcode::Jump);
    b.patch_jump(back, top)?;
    let end = b.position();
    b.patch_jump(exit, end)
}

/// `def add(a, b): return a + b`
fn add_function(globals: &Rc<Module>) -> Result<Rc<Function>> {
    let mut b = CodeBuilder::new("add").params(2);
    b.emit(Opcode::LoadFast, 0);
    b.emit(Opcode::LoadFast, 1);
    b.emit_op(Opcode::BinaryAdd);
    b.emit_op(Opcode::Return);
    Ok(Rc::new(Function::new(Rc::new(b.build()?), Rc::clone(globals))))
}

/// One call site invoking the same two-argument function `n` times
pub fn call_site(n: i64) -> Result<Workload> {
    let globals = Module::new("call_site");
    globals.set("add", Value::Function(add_function(&globals)?));

    // total = 0; for i in 0..n: total = add(total, i)
    let mut b = CodeBuilder::new("<call_site>").locals(2);
    b.load_const(Value::Int(0))?;
    b.emit(Opcode::StoreFast, 1);
    counted_loop(&mut b, 0, n, |b| {
        b.emit_name(Opcode::LoadGlobal, "add")?;
        b.emit(Opcode::LoadFast, 1);
        b.emit(Opcode::LoadFast, 0);
        b.emit(Opcode::Call, 2);
        b.emit(Opcode::StoreFast, 1);
        Ok(())
    })?;
    b.emit(Opcode::LoadFast, 1);
    b.emit_op(Opcode::Return);

    Ok(Workload {
        name: "call_site",
        description: "one call site calling the same function every iteration",
        code: Rc::new(b.build()?),
        globals,
        expected: Value::Int(sum_below(n)?),
    })
}

/// A global load of a builtin that the module shadows after [`STABLE_RUNS`] iterations
pub fn shadowed_global(n: i64) -> Result<Workload> {
    let n = n.max(STABLE_RUNS + 1);
    let globals = Module::new("shadowed_global");

    // def probe(): return abs
    let mut probe = CodeBuilder::new("probe");
    probe.emit_name(Opcode::LoadGlobal, "abs")?;
    probe.emit_op(Opcode::Return);
    let probe = Function::new(Rc::new(probe.build()?), Rc::clone(&globals));
    globals.set("probe", Value::Function(Rc::new(probe)));

    // for i in 0..n: (if not i < STABLE_RUNS: abs = 99); last = probe()
    let mut b = CodeBuilder::new("<shadowed_global>").locals(2);
    counted_loop(&mut b, 0, n, |b| {
        b.emit(Opcode::LoadFast, 0);
        b.load_const(Value::Int(STABLE_RUNS))?;
        b.emit_op(Opcode::CompareLt);
        let shadow = b.emit_op(Opcode::JumpIfFalse);
        let skip = b.emit_op(Opcode::Jump);
        let target = b.position();
        b.patch_jump(shadow, target)?;
        b.load_const(Value::Int(99))?;
        b.emit_name(Opcode::StoreGlobal, "abs")?;
        let target = b.position();
        b.patch_jump(skip, target)?;
        b.emit_name(Opcode::LoadGlobal, "probe")?;
        b.emit(Opcode::Call, 0);
        b.emit(Opcode::StoreFast, 1);
        Ok(())
    })?;
    b.emit(Opcode::LoadFast, 1);
    b.emit_op(Opcode::Return);

    Ok(Workload {
        name: "shadowed_global",
        description: "builtin global shadowed by a module binding mid-run",
        code: Rc::new(b.build()?),
        globals,
        expected: Value::Int(99),
    })
}

/// One add site whose operands alternate between ints and strings
pub fn alternating_add(n: i64) -> Result<Workload> {
    let globals = Module::new("alternating_add");

    // a = 1; b = "s"; for i in 0..n: r = a + a; a, b = b, a
    let (i, a, bb, t, r) = (0, 1, 2, 3, 4);
    let mut b = CodeBuilder::new("<alternating_add>").locals(5);
    b.load_const(Value::Int(1))?;
    b.emit(Opcode::StoreFast, a);
    b.load_const(Value::str("s"))?;
    b.emit(Opcode::StoreFast, bb);
    b.load_const(Value::None)?;
    b.emit(Opcode::StoreFast, r);
    counted_loop(&mut b, i, n, |b| {
        b.emit(Opcode::LoadFast, a);
        b.emit(Opcode::Dup, 0);
        b.emit_op(Opcode::BinaryAdd);
        b.emit(Opcode::StoreFast, r);
        b.emit(Opcode::LoadFast, a);
        b.emit(Opcode::StoreFast, t);
        b.emit(Opcode::LoadFast, bb);
        b.emit(Opcode::StoreFast, a);
        b.emit(Opcode::LoadFast, t);
        b.emit(Opcode::StoreFast, bb);
        Ok(())
    })?;
    b.emit(Opcode::LoadFast, r);
    b.emit_op(Opcode::Return);

    let expected = match n {
        n if n <= 0 => Value::None,
        n if n % 2 == 1 => Value::Int(2),
        _ => Value::str("ss"),
    };
    Ok(Workload {
        name: "alternating_add",
        description: "an add site alternating between int and str operands",
        code: Rc::new(b.build()?),
        globals,
        expected,
    })
}

/// Instance field, class attribute and module attribute loads
pub fn attributes(n: i64) -> Result<Workload> {
    let globals = Module::new("attributes");
    let point = Class::new("Point");
    point.set_attr("scale", Value::Int(3));
    globals.set("Point", Value::Class(point));
    let config = Module::new("config");
    config.set("step", Value::Int(1));
    globals.set("config", Value::Module(config));

    // p = Point(); p.x = 1; p.y = 2
    // for i in 0..n: total = total + p.x + p.y + p.scale + config.step
    let (i, total, p) = (0, 1, 2);
    let mut b = CodeBuilder::new("<attributes>").locals(3);
    b.emit_name(Opcode::LoadGlobal, "Point")?;
    b.emit(Opcode::Call, 0);
    b.emit(Opcode::StoreFast, p);
    for (field, value) in [("x", 1), ("y", 2)] {
        b.load_const(Value::Int(value))?;
        b.emit(Opcode::LoadFast, p);
        b.emit_name(Opcode::StoreAttr, field)?;
    }
    b.load_const(Value::Int(0))?;
    b.emit(Opcode::StoreFast, total);
    counted_loop(&mut b, i, n, |b| {
        b.emit(Opcode::LoadFast, total);
        for attr in ["x", "y", "scale"] {
            b.emit(Opcode::LoadFast, p);
            b.emit_name(Opcode::LoadAttr, attr)?;
            b.emit_op(Opcode::BinaryAdd);
        }
        b.emit_name(Opcode::LoadGlobal, "config")?;
        b.emit_name(Opcode::LoadAttr, "step")?;
        b.emit_op(Opcode::BinaryAdd);
        b.emit(Opcode::StoreFast, total);
        Ok(())
    })?;
    b.emit(Opcode::LoadFast, total);
    b.emit_op(Opcode::Return);

    Ok(Workload {
        name: "attributes",
        description: "instance, class and module attribute loads",
        code: Rc::new(b.build()?),
        globals,
        expected: Value::Int(
            7i64.checked_mul(n.max(0))
                .ok_or_else(|| too_many_iterations("attributes", n))?,
        ),
    })
}

fn fib(n: i64) -> i64 {
    let (mut a, mut b) = (0i64, 1i64);
    for _ in 0..n {
        let next = a + b;
        a = b;
        b = next;
    }
    a
}

/// Doubly recursive fibonacci, re-entering the same quickened unit
pub fn recursion(n: i64) -> Result<Workload> {
    let n = n.clamp(0, MAX_FIB);
    let globals = Module::new("recursion");

    // def fib(k): if k < 2: return k; return fib(k - 1) + fib(k - 2)
    let mut f = CodeBuilder::new("fib").params(1);
    f.emit(Opcode::LoadFast, 0);
    f.load_const(Value::Int(2))?;
    f.emit_op(Opcode::CompareLt);
    let recurse = f.emit_op(Opcode::JumpIfFalse);
    f.emit(Opcode::LoadFast, 0);
    f.emit_op(Opcode::Return);
    let target = f.position();
    f.patch_jump(recurse, target)?;
    for step in [1, 2] {
        f.emit_name(Opcode::LoadGlobal, "fib")?;
        f.emit(Opcode::LoadFast, 0);
        f.load_const(Value::Int(step))?;
        f.emit_op(Opcode::BinarySub);
        f.emit(Opcode::Call, 1);
    }
    f.emit_op(Opcode::BinaryAdd);
    f.emit_op(Opcode::Return);
    let function = Function::new(Rc::new(f.build()?), Rc::clone(&globals));
    globals.set("fib", Value::Function(Rc::new(function)));

    let mut b = CodeBuilder::new("<recursion>");
    b.emit_name(Opcode::LoadGlobal, "fib")?;
    b.load_const(Value::Int(n))?;
    b.emit(Opcode::Call, 1);
    b.emit_op(Opcode::Return);

    Ok(Workload {
        name: "recursion",
        description: "recursive calls sharing one quickened unit",
        code: Rc::new(b.build()?),
        globals,
        expected: Value::Int(fib(n)),
    })
}

/// Draw one operand: mostly ints, sometimes floats or strings
fn draw(rng: &mut StdRng) -> Value {
    match rng.gen_range(0..10) {
        0 => Value::Float(rng.gen_range(0..100) as f64 / 4.0),
        1 => Value::str(if rng.gen_bool(0.5) { "a" } else { "bc" }),
        _ => Value::Int(rng.gen_range(0..100)),
    }
}

/// An add site fed by a seeded, mostly monomorphic operand stream
pub fn polymorphic(n: i64, seed: u64) -> Result<Workload> {
    let globals = Module::new("polymorphic");
    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
    let operand = Builtin::new("operand", Some(0), move |_| Ok(draw(&mut rng.borrow_mut())));
    globals.set("operand", Value::Builtin(Rc::new(operand)));

    // for i in 0..n: x = operand(); last = x + x
    let mut b = CodeBuilder::new("<polymorphic>").locals(2);
    b.load_const(Value::None)?;
    b.emit(Opcode::StoreFast, 1);
    counted_loop(&mut b, 0, n, |b| {
        b.emit_name(Opcode::LoadGlobal, "operand")?;
        b.emit(Opcode::Call, 0);
        b.emit(Opcode::Dup, 0);
        b.emit_op(Opcode::BinaryAdd);
        b.emit(Opcode::StoreFast, 1);
        Ok(())
    })?;
    b.emit(Opcode::LoadFast, 1);
    b.emit_op(Opcode::Return);

    let mut replay = StdRng::seed_from_u64(seed);
    let mut expected = Value::None;
    for _ in 0..n {
        let x = draw(&mut replay);
        expected = crate::runtime::ops::binary_add(&x, &x)?;
    }
    Ok(Workload {
        name: "polymorphic",
        description: "an add site with a seeded mix of int, float and str operands",
        code: Rc::new(b.build()?),
        globals,
        expected,
    })
}

/// `0 + 1 + ... + (n - 1)`, or an error when it does not fit an int
fn sum_below(n: i64) -> Result<i64> {
    let n = i128::from(n.max(0));
    i64::try_from(n * (n - 1).max(0) / 2).map_err(|_| too_many_iterations("call_site", n as i64))
}

fn too_many_iterations(workload: &str, n: i64) -> Error {
    Error::InvalidConfig(format!("{}: {} iterations overflow the result", workload, n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_name_builds() {
        for name in NAMES {
            let workload = by_name(name, 10).unwrap();
            assert_eq!(workload.name, name);
        }
        assert!(by_name("nope", 1).is_err());
    }

    #[test]
    fn test_call_site_expectation_at_max_iterations() {
        assert_eq!(sum_below(0).unwrap(), 0);
        assert_eq!(sum_below(4).unwrap(), 6);
        let workload = by_name("call_site", u32::MAX).unwrap();
        assert_eq!(workload.expected, Value::Int(9_223_372_030_412_324_865));
        assert!(call_site(i64::MAX).is_err());
    }

    #[test]
    fn test_fib() {
        assert_eq!(fib(0), 0);
        assert_eq!(fib(1), 1);
        assert_eq!(fib(15), 610);
    }

    #[test]
    fn test_jump_targets_fit() {
        // Every loop body stays well inside the operand range of a jump
        for name in NAMES {
            let workload = by_name(name, 1000).unwrap();
            assert!(workload.code.len() < 256, "{} is {} long", name, workload.code.len());
        }
    }
}
