//! Corvid runtime types: values, functions, classes and modules.

pub mod function;
pub mod module;
pub mod object;
pub mod value;

pub use function::{Arity, CallFrame, ForeignFunction, ForeignMethod, Function, NativeFn, NativeMethodFn};
pub use module::{Module, ModuleHandle, ModuleId};
pub use object::{Allocator, BoundMethod, Class, ForeignClass, ForeignObject, Indexable, Instance};
pub use value::Value;
