//! Classes, instances and modules
//!
//! Instance fields are stored by position and described by a shared
//! [`Shape`]. Adding a field moves the instance along a cached shape
//! transition, so instances built the same way share one shape id and a
//! field keeps its position for as long as the shape is unchanged.

use super::namespace::Namespace;
use super::value::Value;
use super::SHAPE_IDS;
use rustc_hash::FxHashMap as HashMap;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// Hidden class describing the field layout of instances
pub struct Shape {
    id: u32,
    keys: Vec<Rc<str>>,
    transitions: RefCell<HashMap<Rc<str>, Rc<Shape>>>,
}

impl Shape {
    /// An empty shape with a fresh id
    pub fn root() -> Rc<Shape> {
        Rc::new(Shape {
            id: SHAPE_IDS.next(),
            keys: Vec::new(),
            transitions: RefCell::new(HashMap::default()),
        })
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Field position of a key
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.keys.iter().position(|key| &**key == name)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[Rc<str>] {
        &self.keys
    }

    /// The shape reached by appending a field
    pub fn with_key(self: &Rc<Self>, name: &str) -> Rc<Shape> {
        if let Some(next) = self.transitions.borrow().get(name) {
            return Rc::clone(next);
        }
        let key: Rc<str> = Rc::from(name);
        let mut keys = self.keys.clone();
        keys.push(Rc::clone(&key));
        let next = Rc::new(Shape {
            id: SHAPE_IDS.next(),
            keys,
            transitions: RefCell::new(HashMap::default()),
        });
        self.transitions.borrow_mut().insert(key, Rc::clone(&next));
        next
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.id)
            .field("keys", &self.keys)
            .finish()
    }
}

pub struct Class {
    name: Rc<str>,
    namespace: RefCell<Namespace>,
    root_shape: Rc<Shape>,
}

impl Class {
    pub fn new(name: &str) -> Rc<Class> {
        Rc::new(Class {
            name: Rc::from(name),
            namespace: RefCell::new(Namespace::new()),
            root_shape: Shape::root(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class attributes
    pub fn namespace(&self) -> Ref<'_, Namespace> {
        self.namespace.borrow()
    }

    pub fn namespace_mut(&self) -> RefMut<'_, Namespace> {
        self.namespace.borrow_mut()
    }

    pub fn get_attr(&self, name: &str) -> Option<Value> {
        self.namespace.borrow().get(name).cloned()
    }

    pub fn set_attr(&self, name: &str, value: Value) {
        self.namespace.borrow_mut().set(name, value);
    }

    /// Create an instance with no fields
    pub fn instantiate(self: &Rc<Self>) -> Rc<Instance> {
        Rc::new(Instance {
            class: Rc::clone(self),
            fields: RefCell::new(Fields {
                shape: Rc::clone(&self.root_shape),
                values: Vec::new(),
            }),
        })
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class {}>", self.name)
    }
}

struct Fields {
    shape: Rc<Shape>,
    values: Vec<Value>,
}

pub struct Instance {
    class: Rc<Class>,
    fields: RefCell<Fields>,
}

impl Instance {
    pub fn class(&self) -> &Rc<Class> {
        &self.class
    }

    pub fn shape(&self) -> Rc<Shape> {
        Rc::clone(&self.fields.borrow().shape)
    }

    #[inline]
    pub fn shape_id(&self) -> u32 {
        self.fields.borrow().shape.id()
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        let fields = self.fields.borrow();
        let index = fields.shape.index_of(name)?;
        fields.values.get(index).cloned()
    }

    /// Field by position, bounds-checked
    #[inline]
    pub fn field_at(&self, index: usize) -> Option<Value> {
        self.fields.borrow().values.get(index).cloned()
    }

    /// Field by position if the instance still has the given shape
    #[inline]
    pub fn field_if_shape(&self, shape_id: u32, index: usize) -> Option<Value> {
        let fields = self.fields.borrow();
        if fields.shape.id() != shape_id {
            return None;
        }
        fields.values.get(index).cloned()
    }

    /// Store a field; a new field transitions the shape
    pub fn set_field(&self, name: &str, value: Value) {
        let mut fields = self.fields.borrow_mut();
        if let Some(index) = fields.shape.index_of(name) {
            fields.values[index] = value;
            return;
        }
        let next = fields.shape.with_key(name);
        fields.shape = next;
        fields.values.push(value);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} instance>", self.class.name)
    }
}

pub struct Module {
    name: Rc<str>,
    namespace: RefCell<Namespace>,
}

impl Module {
    pub fn new(name: &str) -> Rc<Module> {
        Rc::new(Module {
            name: Rc::from(name),
            namespace: RefCell::new(Namespace::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Ref<'_, Namespace> {
        self.namespace.borrow()
    }

    pub fn namespace_mut(&self) -> RefMut<'_, Namespace> {
        self.namespace.borrow_mut()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.namespace.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.namespace.borrow_mut().set(name, value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.namespace.borrow_mut().remove(name)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<module {}>", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_built_alike_share_shapes() {
        let class = Class::new("Point");
        let a = class.instantiate();
        let b = class.instantiate();
        assert_eq!(a.shape_id(), b.shape_id());

        a.set_field("x", Value::Int(1));
        a.set_field("y", Value::Int(2));
        b.set_field("x", Value::Int(3));
        b.set_field("y", Value::Int(4));
        assert_eq!(a.shape_id(), b.shape_id());
        assert_eq!(b.field("y"), Some(Value::Int(4)));
        assert_eq!(a.shape().index_of("y"), Some(1));
    }

    #[test]
    fn test_field_order_matters() {
        let class = Class::new("Point");
        let a = class.instantiate();
        let b = class.instantiate();
        a.set_field("x", Value::Int(1));
        a.set_field("y", Value::Int(2));
        b.set_field("y", Value::Int(2));
        b.set_field("x", Value::Int(1));
        assert_ne!(a.shape_id(), b.shape_id());
    }

    #[test]
    fn test_field_update_keeps_shape() {
        let class = Class::new("C");
        let inst = class.instantiate();
        inst.set_field("v", Value::Int(1));
        let shape = inst.shape_id();
        inst.set_field("v", Value::Int(2));
        assert_eq!(inst.shape_id(), shape);
        assert_eq!(inst.field_if_shape(shape, 0), Some(Value::Int(2)));
        assert_eq!(inst.field_if_shape(shape + 1_000_000, 0), None);
        assert_eq!(inst.field_at(5), None);
    }

    #[test]
    fn test_classes_do_not_share_shapes() {
        let a = Class::new("A").instantiate();
        let b = Class::new("B").instantiate();
        assert_ne!(a.shape_id(), b.shape_id());
    }

    #[test]
    fn test_module_namespace() {
        let module = Module::new("m");
        module.set("x", Value::Int(1));
        assert_eq!(module.get("x"), Some(Value::Int(1)));
        assert_eq!(module.remove("x"), Some(Value::Int(1)));
        assert_eq!(module.get("x"), None);
        assert_eq!(module.name(), "m");
    }
}
