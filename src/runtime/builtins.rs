//! Built-in functions
//!
//! Installed into the interpreter's builtins module, which global lookups
//! fall back to when the module namespace has no binding.

use super::object::Module;
use super::value::{Builtin, Value};
use crate::error::{messages, Error, Result};
use std::rc::Rc;

/// Register all built-in functions
pub fn register_globals(builtins: &Module) {
    register(builtins, "abs", Some(1), builtin_abs);
    register(builtins, "min", Some(2), |args| pick(args, "min", |less| less));
    register(builtins, "max", Some(2), |args| pick(args, "max", |less| !less));
    register(builtins, "len", Some(1), builtin_len);
    register(builtins, "str", Some(1), builtin_str);
    register(builtins, "type", Some(1), |args| Ok(Value::str(args[0].type_name())));
    register(builtins, "sum", None, builtin_sum);
}

fn register<F>(builtins: &Module, name: &str, arity: Option<u8>, func: F)
where
    F: Fn(&[Value]) -> Result<Value> + 'static,
{
    builtins.set(name, Value::Builtin(Rc::new(Builtin::new(name, arity, func))));
}

fn builtin_abs(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Int(n) => n
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| Error::overflow_error("abs() of the minimum integer")),
        Value::Float(n) => Ok(Value::Float(n.abs())),
        other => Err(Error::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

/// Shared body of `min` and `max`: keep the first argument when `choose(a < b)` holds
fn pick(args: &[Value], name: &str, choose: fn(bool) -> bool) -> Result<Value> {
    let (a, b) = (&args[0], &args[1]);
    let less = match super::ops::compare_lt(a, b) {
        Ok(Value::Bool(less)) => less,
        _ => {
            return Err(Error::type_error(format!(
                "{}() cannot compare '{}' and '{}'",
                name,
                a.type_name(),
                b.type_name()
            )))
        }
    };
    if choose(less) {
        Ok(a.clone())
    } else {
        Ok(b.clone())
    }
}

fn builtin_len(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        other => Err(Error::type_error(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

fn builtin_str(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Str(s) => Ok(Value::Str(Rc::clone(s))),
        other => Ok(Value::str(&other.to_string())),
    }
}

fn builtin_sum(args: &[Value]) -> Result<Value> {
    args.iter()
        .try_fold(Value::Int(0), |total, value| match value {
            Value::Int(_) | Value::Float(_) => super::ops::binary_add(&total, value),
            other => Err(Error::type_error(messages::unsupported_operands(
                "+",
                total.type_name(),
                other.type_name(),
            ))),
        })
}
