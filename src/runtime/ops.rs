//! Generic instruction semantics
//!
//! These are the reference behaviors every specialized member must agree
//! with. Specialized members call the narrow helpers here (`add_ints`,
//! `concat`) once their guards pass, so both paths share one definition.

use super::namespace::Namespace;
use super::value::Value;
use crate::error::{messages, Error, Result};
use std::rc::Rc;

/// Integer addition, raising on overflow
#[inline]
pub fn add_ints(left: i64, right: i64) -> Result<Value> {
    left.checked_add(right)
        .map(Value::Int)
        .ok_or_else(|| Error::overflow_error("integer addition overflowed"))
}

#[inline]
pub fn add_floats(left: f64, right: f64) -> Value {
    Value::Float(left + right)
}

/// String concatenation
#[inline]
pub fn concat(left: &str, right: &str) -> Value {
    let mut joined = String::with_capacity(left.len() + right.len());
    joined.push_str(left);
    joined.push_str(right);
    Value::Str(Rc::from(joined))
}

pub fn binary_add(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => add_ints(*a, *b),
        (Value::Float(a), Value::Float(b)) => Ok(add_floats(*a, *b)),
        (Value::Int(a), Value::Float(b)) => Ok(add_floats(*a as f64, *b)),
        (Value::Float(a), Value::Int(b)) => Ok(add_floats(*a, *b as f64)),
        (Value::Str(a), Value::Str(b)) => Ok(concat(a, b)),
        _ => Err(Error::type_error(messages::unsupported_operands(
            "+",
            left.type_name(),
            right.type_name(),
        ))),
    }
}

pub fn binary_sub(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_sub(*b)
            .map(Value::Int)
            .ok_or_else(|| Error::overflow_error("integer subtraction overflowed")),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 - b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a - *b as f64)),
        _ => Err(Error::type_error(messages::unsupported_operands(
            "-",
            left.type_name(),
            right.type_name(),
        ))),
    }
}

pub fn compare_lt(left: &Value, right: &Value) -> Result<Value> {
    let less = match (left, right) {
        (Value::Int(a), Value::Int(b)) => a < b,
        (Value::Float(a), Value::Float(b)) => a < b,
        (Value::Int(a), Value::Float(b)) => (*a as f64) < *b,
        (Value::Float(a), Value::Int(b)) => *a < (*b as f64),
        (Value::Str(a), Value::Str(b)) => a < b,
        _ => {
            return Err(Error::type_error(messages::unsupported_operands(
                "<",
                left.type_name(),
                right.type_name(),
            )))
        }
    };
    Ok(Value::Bool(less))
}

/// Global lookup: module namespace, then builtins
pub fn load_global(globals: &Namespace, builtins: &Namespace, name: &str) -> Result<Value> {
    globals
        .get(name)
        .or_else(|| builtins.get(name))
        .cloned()
        .ok_or_else(|| Error::name_error(messages::not_defined(name)))
}

/// Attribute lookup: instance fields shadow class attributes
pub fn load_attr(receiver: &Value, name: &str) -> Result<Value> {
    let found = match receiver {
        Value::Instance(instance) => instance
            .field(name)
            .or_else(|| instance.class().get_attr(name)),
        Value::Class(class) => class.get_attr(name),
        Value::Module(module) => module.get(name),
        _ => None,
    };
    found.ok_or_else(|| Error::attribute_error(messages::no_attribute(receiver.type_name(), name)))
}

/// Attribute store: instance fields, class attributes, module attributes
pub fn store_attr(receiver: &Value, name: &str, value: Value) -> Result<()> {
    match receiver {
        Value::Instance(instance) => instance.set_field(name, value),
        Value::Class(class) => class.set_attr(name, value),
        Value::Module(module) => module.set(name, value),
        _ => {
            return Err(Error::attribute_error(format!(
                "'{}' object attributes are read-only",
                receiver.type_name()
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::{Class, Module};

    #[test]
    fn test_binary_add() {
        assert_eq!(binary_add(&Value::Int(2), &Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(
            binary_add(&Value::Int(1), &Value::Float(0.5)).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            binary_add(&Value::str("ab"), &Value::str("cd")).unwrap(),
            Value::str("abcd")
        );
        let err = binary_add(&Value::Int(1), &Value::str("x")).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::TypeError));
        assert!(err.to_string().contains("'int' and 'str'"));
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let err = binary_add(&Value::Int(i64::MAX), &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::OverflowError));
        let err = binary_sub(&Value::Int(i64::MIN), &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::OverflowError));
    }

    #[test]
    fn test_compare_lt() {
        assert_eq!(compare_lt(&Value::Int(1), &Value::Int(2)).unwrap(), Value::Bool(true));
        assert_eq!(compare_lt(&Value::Float(2.5), &Value::Int(2)).unwrap(), Value::Bool(false));
        assert!(compare_lt(&Value::None, &Value::Int(2)).is_err());
    }

    #[test]
    fn test_load_global_falls_back_to_builtins() {
        let mut globals = Namespace::new();
        let mut builtins = Namespace::new();
        builtins.set("x", Value::Int(1));
        assert_eq!(load_global(&globals, &builtins, "x").unwrap(), Value::Int(1));
        globals.set("x", Value::Int(2));
        assert_eq!(load_global(&globals, &builtins, "x").unwrap(), Value::Int(2));
        let err = load_global(&globals, &builtins, "y").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NameError));
    }

    #[test]
    fn test_instance_field_shadows_class_attr() {
        let class = Class::new("C");
        class.set_attr("v", Value::Int(1));
        let receiver = Value::Instance(class.instantiate());
        assert_eq!(load_attr(&receiver, "v").unwrap(), Value::Int(1));
        store_attr(&receiver, "v", Value::Int(2)).unwrap();
        assert_eq!(load_attr(&receiver, "v").unwrap(), Value::Int(2));
        assert_eq!(class.get_attr("v"), Some(Value::Int(1)));
    }

    #[test]
    fn test_attr_errors() {
        let module = Value::Module(Module::new("m"));
        let err = load_attr(&module, "missing").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::AttributeError));
        assert!(store_attr(&Value::Int(1), "x", Value::None).is_err());
        store_attr(&module, "x", Value::Int(5)).unwrap();
        assert_eq!(load_attr(&module, "x").unwrap(), Value::Int(5));
    }
}
