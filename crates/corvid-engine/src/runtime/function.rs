//! Function representations: compiled script functions, host functions and
//! call frames.

use std::fmt;
use std::rc::Rc;

use super::module::ModuleId;
use super::value::Value;
use crate::compiler::Chunk;
use crate::vm::VM;

/// A compiled Corvid function.
///
/// Immutable once the compiler has finished with it.
#[derive(Debug)]
pub struct Function {
    /// The function name; `None` for a top-level script body
    pub name: Option<Rc<str>>,
    /// Number of parameters
    pub arity: u8,
    /// The compiled bytecode
    pub chunk: Chunk,
    /// Module whose variables the chunk's module operands index
    pub module: ModuleId,
}

impl Function {
    /// Creates a new function.
    pub fn new(name: Option<Rc<str>>, arity: u8, chunk: Chunk, module: ModuleId) -> Self {
        Self {
            name,
            arity,
            chunk,
            module,
        }
    }

    /// The name shown in stack traces.
    pub fn trace_name(&self) -> &str {
        self.name.as_deref().unwrap_or("script")
    }
}

/// How many arguments a host callable accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many
    Fixed(u8),
    /// Any number
    Variadic,
}

impl Arity {
    /// Checks an argument count.
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Fixed(n) => n as usize == count,
            Arity::Variadic => true,
        }
    }
}

/// Signature of a host function.
///
/// The VM is passed in so the host can call back into script code.
pub type NativeFn = Rc<dyn Fn(&mut VM, &[Value]) -> Result<Value, String>>;

/// Signature of a host method; the receiver comes before the arguments.
pub type NativeMethodFn = Rc<dyn Fn(&mut VM, &Value, &[Value]) -> Result<Value, String>>;

/// A function implemented by the host.
pub struct ForeignFunction {
    /// Name shown in traces and output
    pub name: Rc<str>,
    /// Accepted argument count
    pub arity: Arity,
    /// The implementation
    pub func: NativeFn,
}

impl ForeignFunction {
    /// Wraps a closure as a foreign function.
    pub fn new(
        name: impl Into<Rc<str>>,
        arity: Arity,
        func: impl Fn(&mut VM, &[Value]) -> Result<Value, String> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            arity,
            func: Rc::new(func),
        }
    }
}

impl fmt::Debug for ForeignFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignFunction({})", self.name)
    }
}

/// A method implemented by the host.
pub struct ForeignMethod {
    /// Name shown in traces and output
    pub name: Rc<str>,
    /// Accepted argument count, not counting the receiver
    pub arity: Arity,
    /// The implementation
    pub func: NativeMethodFn,
}

impl ForeignMethod {
    /// Wraps a closure as a foreign method.
    pub fn new(
        name: impl Into<Rc<str>>,
        arity: Arity,
        func: impl Fn(&mut VM, &Value, &[Value]) -> Result<Value, String> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            arity,
            func: Rc::new(func),
        }
    }
}

impl fmt::Debug for ForeignMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignMethod({})", self.name)
    }
}

/// A call frame on the VM's frame stack.
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// The executing function
    pub function: Rc<Function>,
    /// Offset of the next byte to execute
    pub ip: usize,
    /// Stack index of slot 0 (the callee or receiver)
    pub base: usize,
    /// Set when running a class's `init` for a constructor call
    pub initializer: bool,
}

impl CallFrame {
    /// Creates a frame positioned at the start of `function`.
    pub fn new(function: Rc<Function>, base: usize) -> Self {
        Self {
            function,
            ip: 0,
            base,
            initializer: false,
        }
    }

    /// Source line of the instruction that was executing.
    pub fn current_line(&self) -> usize {
        self.function.chunk.line_at(self.ip.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::OpCode;

    #[test]
    fn test_arity_accepts() {
        assert!(Arity::Fixed(2).accepts(2));
        assert!(!Arity::Fixed(2).accepts(1));
        assert!(Arity::Variadic.accepts(0));
        assert!(Arity::Variadic.accepts(9));
    }

    #[test]
    fn test_trace_name() {
        let script = Function::new(None, 0, Chunk::new(), ModuleId(1));
        assert_eq!(script.trace_name(), "script");
        let named = Function::new(Some("area".into()), 1, Chunk::new(), ModuleId(1));
        assert_eq!(named.trace_name(), "area");
    }

    #[test]
    fn test_frame_line() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Null, 3);
        chunk.write_op(OpCode::Return, 4);
        let mut frame = CallFrame::new(Rc::new(Function::new(None, 0, chunk, ModuleId(1))), 0);
        frame.ip = 1;
        assert_eq!(frame.current_line(), 3);
        frame.ip = 2;
        assert_eq!(frame.current_line(), 4);
    }

    #[test]
    fn test_foreign_function_debug() {
        let f = ForeignFunction::new("clock", Arity::Fixed(0), |_, _| Ok(Value::Null));
        assert_eq!(format!("{:?}", f), "ForeignFunction(clock)");
    }
}
