//! Classes, instances and the foreign-data capability traits.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::function::{Arity, ForeignMethod};
use super::value::Value;
use crate::vm::VM;

/// Native data carried by an instance of a foreign class.
pub trait ForeignObject: Any {
    /// Renders the instance; `None` falls back to `Name instance`.
    fn render(&self) -> Option<String> {
        None
    }

    /// Moves out every value the data holds.
    ///
    /// Dropping an instance drains its children through this so that
    /// deeply nested containers are freed without native recursion.
    fn drain_values(&mut self) -> Vec<Value> {
        Vec::new()
    }

    /// Exposes subscript access when the data supports it.
    fn as_indexable(&mut self) -> Option<&mut dyn Indexable> {
        None
    }

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Subscript access (`value[index]`) on foreign data.
pub trait Indexable {
    /// Reads the element at `index`.
    fn get_index(&self, index: &Value) -> Result<Value, String>;

    /// Writes the element at `index`.
    fn set_index(&mut self, index: Value, value: Value) -> Result<(), String>;
}

/// Creates the native data for a new foreign instance.
pub type Allocator = Rc<dyn Fn() -> Box<dyn ForeignObject>>;

/// A class: a name plus method tables.
pub struct Class {
    /// Class name
    pub name: Rc<str>,
    /// Instance methods (script functions or foreign methods)
    pub methods: RefCell<FxHashMap<Rc<str>, Value>>,
    /// Methods called on the class itself
    pub static_methods: RefCell<FxHashMap<Rc<str>, Value>>,
    /// Set for foreign classes whose instances carry native data
    pub allocator: Option<Allocator>,
}

impl Class {
    /// Creates a class with no methods.
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            methods: RefCell::new(FxHashMap::default()),
            static_methods: RefCell::new(FxHashMap::default()),
            allocator: None,
        }
    }

    /// Looks up an instance method.
    pub fn method(&self, name: &str) -> Option<Value> {
        self.methods.borrow().get(name).cloned()
    }

    /// Looks up a static method.
    pub fn static_method(&self, name: &str) -> Option<Value> {
        self.static_methods.borrow().get(name).cloned()
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("methods", &self.methods.borrow().len())
            .field("foreign", &self.allocator.is_some())
            .finish()
    }
}

/// An instance of a class.
pub struct Instance {
    /// The instance's class
    pub class: Rc<Class>,
    /// Fields, created on first assignment
    pub fields: RefCell<FxHashMap<Rc<str>, Value>>,
    /// Native data for foreign classes
    pub foreign: Option<RefCell<Box<dyn ForeignObject>>>,
}

impl Instance {
    /// Creates an instance, allocating native data if the class has an allocator.
    pub fn new(class: Rc<Class>) -> Self {
        let foreign = class.allocator.as_ref().map(|alloc| RefCell::new(alloc()));
        Self {
            class,
            fields: RefCell::new(FxHashMap::default()),
            foreign,
        }
    }

    /// Reads a field.
    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.borrow().get(name).cloned()
    }

    /// Writes a field.
    pub fn set_field(&self, name: Rc<str>, value: Value) {
        self.fields.borrow_mut().insert(name, value);
    }

    fn take_children(&mut self) -> Vec<Value> {
        let mut children: Vec<Value> = self.fields.get_mut().drain().map(|(_, value)| value).collect();
        if let Some(cell) = &mut self.foreign {
            children.extend(cell.get_mut().drain_values());
        }
        children
    }

    /// Runs `f` against the native data if it is a `T`.
    pub fn with_foreign<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let cell = self.foreign.as_ref()?;
        let mut data = cell.try_borrow_mut().ok()?;
        data.as_any_mut().downcast_mut::<T>().map(f)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance({})", self.class.name)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        let mut pending = self.take_children();
        while let Some(value) = pending.pop() {
            if let Value::Instance(instance) = value {
                if let Ok(mut instance) = Rc::try_unwrap(instance) {
                    pending.extend(instance.take_children());
                }
            }
        }
    }
}

/// Nesting depth past which foreign data renders as `...`.
const MAX_RENDER_DEPTH: usize = 128;

thread_local! {
    static RENDER_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts one level of foreign rendering for as long as it lives.
struct RenderGuard;

impl RenderGuard {
    fn enter() -> Option<Self> {
        RENDER_DEPTH.with(|depth| {
            if depth.get() >= MAX_RENDER_DEPTH {
                return None;
            }
            depth.set(depth.get() + 1);
            Some(RenderGuard)
        })
    }
}

impl Drop for RenderGuard {
    fn drop(&mut self) {
        RENDER_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(cell) = &self.foreign {
            // A container that holds itself is already being rendered.
            let Ok(data) = cell.try_borrow_mut() else {
                return write!(f, "...");
            };
            let Some(_guard) = RenderGuard::enter() else {
                return write!(f, "...");
            };
            if let Some(text) = data.render() {
                return write!(f, "{}", text);
            }
        }
        write!(f, "{} instance", self.class.name)
    }
}

/// A method paired with the receiver it was read from.
#[derive(Debug)]
pub struct BoundMethod {
    /// The receiver placed in slot 0 when called
    pub receiver: Value,
    /// A script function or foreign method
    pub method: Value,
}

/// Builder for a class whose methods are implemented by the host.
///
/// ```rust
/// use corvid_engine::{Arity, Engine, ForeignClass, Value};
///
/// let mut engine = Engine::new();
/// let class = ForeignClass::new("Greeter").method("hello", Arity::Fixed(0), |_, _, _| {
///     Ok(Value::from("hi"))
/// });
/// engine.register_foreign_class("", class);
/// let value = engine.eval("Greeter().hello()").unwrap();
/// assert_eq!(value.to_string(), "hi");
/// ```
pub struct ForeignClass {
    name: Rc<str>,
    allocator: Option<Allocator>,
    methods: Vec<ForeignMethod>,
    static_methods: Vec<ForeignMethod>,
}

impl ForeignClass {
    /// Starts a new foreign class.
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            allocator: None,
            methods: Vec::new(),
            static_methods: Vec::new(),
        }
    }

    /// Gives every instance native data created by `alloc`.
    pub fn allocator(mut self, alloc: impl Fn() -> Box<dyn ForeignObject> + 'static) -> Self {
        self.allocator = Some(Rc::new(alloc));
        self
    }

    /// Adds an instance method.
    pub fn method(
        mut self,
        name: impl Into<Rc<str>>,
        arity: Arity,
        func: impl Fn(&mut VM, &Value, &[Value]) -> Result<Value, String> + 'static,
    ) -> Self {
        self.methods.push(ForeignMethod::new(name, arity, func));
        self
    }

    /// Adds a method called on the class itself; the receiver is the class.
    pub fn static_method(
        mut self,
        name: impl Into<Rc<str>>,
        arity: Arity,
        func: impl Fn(&mut VM, &Value, &[Value]) -> Result<Value, String> + 'static,
    ) -> Self {
        self.static_methods.push(ForeignMethod::new(name, arity, func));
        self
    }

    /// The class name.
    pub fn name(&self) -> &Rc<str> {
        &self.name
    }

    /// Builds the runtime class.
    pub fn build(self) -> Rc<Class> {
        let mut class = Class::new(self.name);
        class.allocator = self.allocator;
        {
            let mut methods = class.methods.borrow_mut();
            for method in self.methods {
                methods.insert(Rc::clone(&method.name), Value::ForeignMethod(Rc::new(method)));
            }
        }
        {
            let mut statics = class.static_methods.borrow_mut();
            for method in self.static_methods {
                statics.insert(Rc::clone(&method.name), Value::ForeignMethod(Rc::new(method)));
            }
        }
        Rc::new(class)
    }
}
