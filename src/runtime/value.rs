//! Runtime value types
//!
//! Scalars compare structurally; heap values (functions, builtins, classes,
//! instances, modules) compare by identity.

use super::object::{Class, Instance, Module};
use super::{BUILTIN_IDS, FUNCTION_VERSIONS};
use crate::bytecode::CodeUnit;
use crate::error::{messages, Error, Result};
use std::fmt;
use std::rc::Rc;

/// Type alias for native function implementations
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value>>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Function(Rc<Function>),
    Builtin(Rc<Builtin>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Module(Rc<Module>),
}

impl Value {
    /// A string value
    pub fn str(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    /// Type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
            Value::Module(_) => "module",
        }
    }

    /// Truthiness for conditional jumps
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Builtin(builtin) => write!(f, "<builtin {}>", builtin.name()),
            Value::Class(class) => write!(f, "<class {}>", class.name()),
            Value::Instance(instance) => write!(f, "<{} instance>", instance.class().name()),
            Value::Module(module) => write!(f, "<module {}>", module.name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "Int({})", n),
            Value::Float(n) => write!(f, "Float({})", n),
            Value::Bool(b) => write!(f, "Bool({})", b),
            other => write!(f, "{}", other),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// A bytecode function bound to its module
///
/// The version is fixed at creation. Anything that changes what calling
/// the function does (code, defaults) produces a new function.
pub struct Function {
    code: Rc<CodeUnit>,
    globals: Rc<Module>,
    defaults: Vec<Value>,
    version: u32,
}

impl Function {
    pub fn new(code: Rc<CodeUnit>, globals: Rc<Module>) -> Self {
        Self::with_defaults(code, globals, Vec::new())
    }

    /// Defaults bind the trailing parameters
    pub fn with_defaults(code: Rc<CodeUnit>, globals: Rc<Module>, defaults: Vec<Value>) -> Self {
        Self {
            code,
            globals,
            defaults,
            version: FUNCTION_VERSIONS.next(),
        }
    }

    pub fn name(&self) -> &str {
        self.code.name()
    }

    pub fn code(&self) -> &Rc<CodeUnit> {
        &self.code
    }

    pub fn globals(&self) -> &Rc<Module> {
        &self.globals
    }

    pub fn defaults(&self) -> &[Value] {
        &self.defaults
    }

    pub fn argcount(&self) -> u8 {
        self.code.argcount()
    }

    /// Guard token for exact calls; 0 when versions ran out
    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Build the initial local slots for a call, applying defaults
    pub(crate) fn bind_arguments(&self, args: Vec<Value>) -> Result<Vec<Option<Value>>> {
        let argcount = self.argcount() as usize;
        let given = args.len();
        let required = argcount - self.defaults.len().min(argcount);
        if given > argcount || given < required {
            let expected = if required == argcount {
                argcount.to_string()
            } else {
                format!("{} to {}", required, argcount)
            };
            return Err(Error::type_error(messages::arity_mismatch(
                self.name(),
                &expected,
                given,
            )));
        }
        let mut locals = Vec::with_capacity(self.code.nlocals() as usize);
        locals.extend(args.into_iter().map(Some));
        let skip = self.defaults.len() - (argcount - given);
        locals.extend(self.defaults[skip..].iter().cloned().map(Some));
        locals.resize(self.code.nlocals() as usize, None);
        Ok(locals)
    }
}

/// A native function
pub struct Builtin {
    name: Rc<str>,
    arity: Option<u8>,
    func: NativeFn,
    id: u32,
}

impl Builtin {
    /// `arity` of `None` accepts any number of arguments
    pub fn new<F>(name: &str, arity: Option<u8>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Self {
            name: Rc::from(name),
            arity,
            func: Rc::new(func),
            id: BUILTIN_IDS.next(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Option<u8> {
        self.arity
    }

    /// Identity token for call guards
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Call with arity checking
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        if let Some(arity) = self.arity {
            if args.len() != arity as usize {
                return Err(Error::type_error(messages::arity_mismatch(
                    &self.name,
                    &arity.to_string(),
                    args.len(),
                )));
            }
        }
        (self.func)(args)
    }

    /// Call without checking arity; the caller has already matched it
    #[inline]
    pub(crate) fn call_unchecked(&self, args: &[Value]) -> Result<Value> {
        debug_assert!(self.arity.map_or(true, |arity| arity as usize == args.len()));
        (self.func)(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{CodeBuilder, Opcode};

    fn function(params: u8, locals: u8, defaults: Vec<Value>) -> Function {
        let mut builder = CodeBuilder::new("f").params(params).locals(locals);
        builder.emit_op(Opcode::Return);
        Function::with_defaults(Rc::new(builder.build().unwrap()), Module::new("m"), defaults)
    }

    #[test]
    fn test_identity_equality_for_heap_values() {
        let a = Value::Module(Module::new("m"));
        let b = Value::Module(Module::new("m"));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(Value::str("x"), Value::str("x"));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(!Value::Float(f64::NAN).is_truthy());
        assert!(Value::Module(Module::new("m")).is_truthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::str("hi").to_string(), "\"hi\"");
        assert_eq!(Value::Bool(true).to_string(), "True");
    }

    #[test]
    fn test_functions_get_distinct_versions() {
        let a = function(0, 0, vec![]);
        let b = function(0, 0, vec![]);
        assert_ne!(a.version(), 0);
        assert_ne!(a.version(), b.version());
    }

    #[test]
    fn test_bind_arguments_applies_defaults() {
        let f = function(3, 4, vec![Value::Int(20), Value::Int(30)]);
        let locals = f.bind_arguments(vec![Value::Int(1)]).unwrap();
        assert_eq!(
            locals,
            vec![Some(Value::Int(1)), Some(Value::Int(20)), Some(Value::Int(30)), None]
        );
        let locals = f.bind_arguments(vec![Value::Int(1), Value::Int(2)]).unwrap();
        assert_eq!(locals[2], Some(Value::Int(30)));

        let err = f.bind_arguments(vec![]).err().unwrap();
        assert!(err.to_string().contains("takes 1 to 3 arguments but 0 were given"));
        assert!(f.bind_arguments(vec![Value::None; 4]).is_err());
    }

    #[test]
    fn test_builtin_checks_arity() {
        let double = Builtin::new("double", Some(1), |args| match &args[0] {
            Value::Int(n) => Ok(Value::Int(n * 2)),
            _ => Ok(Value::None),
        });
        assert_eq!(double.call(&[Value::Int(4)]).unwrap(), Value::Int(8));
        assert!(double.call(&[]).is_err());
        let any = Builtin::new("any", None, |args| Ok(Value::Int(args.len() as i64)));
        assert_eq!(any.call(&[Value::None, Value::None]).unwrap(), Value::Int(2));
        assert_ne!(double.id(), any.id());
    }
}
