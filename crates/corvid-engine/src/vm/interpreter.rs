//! The bytecode interpreter.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::error::{Fault, Result, RuntimeError, TraceFrame};
use crate::compiler::disassembler::{disassemble_instruction, render_stack};
use crate::compiler::{self, CompileError, OpCode};
use crate::config::Config;
use crate::runtime::value::format_number;
use crate::runtime::{
    BoundMethod, CallFrame, Class, ForeignFunction, ForeignMethod, Function, Instance, Module,
    ModuleHandle, ModuleId, Value,
};

/// The Corvid virtual machine.
///
/// Owns the value stack, the call frame stack and every module's variables.
pub struct VM {
    /// The value stack
    stack: Vec<Value>,
    /// Active call frames, innermost last
    frames: Vec<CallFrame>,
    /// Module arena; index 0 is the builtin module
    modules: Vec<Module>,
    /// Module name to arena index
    module_ids: FxHashMap<Rc<str>, ModuleId>,
    /// Nesting depth of `call` sub-runs
    nested_calls: usize,
    /// Embedder callbacks and limits
    config: Config,
}

impl VM {
    /// Creates a VM with an empty builtin module.
    pub fn new(config: Config) -> Self {
        let mut builtin = Module::new("");
        builtin.mark_loaded();
        let mut module_ids = FxHashMap::default();
        module_ids.insert(Rc::clone(builtin.name()), ModuleId::BUILTIN);

        Self {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(64),
            modules: vec![builtin],
            module_ids,
            nested_calls: 0,
            config,
        }
    }

    // ========================================================================
    // Modules
    // ========================================================================

    /// Looks up a module by name.
    pub fn module_id(&self, name: &str) -> Option<ModuleId> {
        self.module_ids.get(name).copied()
    }

    /// Borrows a module.
    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id.0)
    }

    /// Mutably borrows a module.
    pub fn module_mut(&mut self, id: ModuleId) -> Option<&mut Module> {
        self.modules.get_mut(id.0)
    }

    /// Returns the module called `name`, creating it (seeded with the
    /// builtin variables) if it does not exist yet.
    pub fn ensure_module(&mut self, name: &str) -> ModuleId {
        if let Some(id) = self.module_id(name) {
            return id;
        }
        let id = ModuleId(self.modules.len());
        let module = Module::seeded(name, &self.modules[ModuleId::BUILTIN.0]);
        self.module_ids.insert(Rc::clone(module.name()), id);
        self.modules.push(module);
        debug!(module = name, id = id.0, "created module");
        id
    }

    /// Defines a variable in the builtin module and every existing module.
    ///
    /// Modules that already hold a value under that name keep it.
    pub fn define_builtin(&mut self, name: &str, value: Value) {
        for (index, module) in self.modules.iter_mut().enumerate() {
            let Some(slot) = module.declare(name) else {
                continue;
            };
            let unset = module.get(slot).is_none_or(Value::is_undefined);
            if index == ModuleId::BUILTIN.0 || unset {
                module.set(slot, value.clone());
            }
        }
    }

    /// Declares and sets a variable in a module, creating the module if needed.
    pub fn define_variable(&mut self, module: &str, name: &str, value: Value) -> bool {
        let id = self.ensure_module(module);
        let module = &mut self.modules[id.0];
        match module.declare(name) {
            Some(slot) => module.set(slot, value),
            None => false,
        }
    }

    /// Compiles `source` as the body of `module`.
    pub fn compile(
        &mut self,
        module: &str,
        source: &str,
        eval: bool,
    ) -> std::result::Result<Rc<Function>, CompileError> {
        let id = self.ensure_module(module);
        let module = &mut self.modules[id.0];
        module.mark_loaded();
        compiler::compile(source, module, id, eval).map(Rc::new)
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Calls any callable value with `args` and runs it to completion.
    ///
    /// Usable from inside a foreign function: the call runs as a nested
    /// sub-run, and a fault inside it unwinds only the nested part.
    pub fn call(&mut self, callee: Value, args: &[Value]) -> std::result::Result<Value, RuntimeError> {
        let stack_mark = self.stack.len();
        let depth = self.frames.len();

        self.nested_calls += 1;
        let result = self.call_and_run(callee, args, depth);
        self.nested_calls -= 1;

        result.map_err(|fault| {
            let err = self.runtime_error(fault, depth);
            self.stack.truncate(stack_mark);
            self.frames.truncate(depth);
            err
        })
    }

    fn call_and_run(&mut self, callee: Value, args: &[Value], depth: usize) -> Result<Value> {
        if self.nested_calls > self.config.max_nested_calls {
            return Err(Fault::script("Stack overflow."));
        }
        if args.len() > u8::MAX as usize {
            return Err(Fault::script("Can't have more than 255 arguments."));
        }
        self.push(callee.clone())?;
        for arg in args {
            self.push(arg.clone())?;
        }
        self.call_value(callee, args.len())?;
        if self.frames.len() > depth {
            self.run(depth)
        } else {
            self.pop()
        }
    }

    fn runtime_error(&self, fault: Fault, depth: usize) -> RuntimeError {
        let trace: Vec<TraceFrame> = self.frames[depth..]
            .iter()
            .rev()
            .map(|frame| TraceFrame {
                line: frame.current_line(),
                function: frame.function.trace_name().to_string(),
                module: self
                    .module(frame.function.module)
                    .map_or_else(String::new, |m| m.name().to_string()),
            })
            .collect();
        debug!(message = %fault.message, origin = ?fault.origin, frames = trace.len(), "runtime fault");
        RuntimeError {
            message: fault.message,
            origin: fault.origin,
            trace,
        }
    }

    /// Writes text through the embedder's `write` callback.
    pub fn write(&mut self, text: &str) {
        (self.config.write)(text);
    }

    /// Current number of values on the stack.
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Current number of active call frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    // ========================================================================
    // Stack and operand helpers
    // ========================================================================

    fn push(&mut self, value: Value) -> Result<()> {
        if self.stack.len() >= self.config.stack_capacity {
            return Err(Fault::script("Stack overflow."));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack
            .pop()
            .ok_or_else(|| Fault::script("Stack underflow."))
    }

    fn peek(&self, distance: usize) -> Result<&Value> {
        self.stack
            .len()
            .checked_sub(distance + 1)
            .and_then(|index| self.stack.get(index))
            .ok_or_else(|| Fault::script("Stack underflow."))
    }

    fn frame(&self) -> &CallFrame {
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_constant(&self, index: usize) -> Result<Value> {
        self.frame()
            .function
            .chunk
            .constants
            .get(index)
            .cloned()
            .ok_or_else(|| Fault::script("Invalid constant operand."))
    }

    fn read_name(&mut self) -> Result<Rc<str>> {
        let index = self.read_u16() as usize;
        match self.read_constant(index)? {
            Value::String(name) => Ok(name),
            _ => Err(Fault::script("Invalid name operand.")),
        }
    }

    fn frame_module(&self) -> ModuleId {
        self.frame().function.module
    }

    fn module_slot_name(&self, module: ModuleId, slot: u16) -> String {
        self.module(module)
            .and_then(|m| m.variable_name(slot))
            .unwrap_or("?")
            .to_string()
    }

    // ========================================================================
    // Execution loop
    // ========================================================================

    /// Runs until the frame stack shrinks back to `entry_depth`, returning the
    /// value of the frame that ended the run.
    fn run(&mut self, entry_depth: usize) -> Result<Value> {
        loop {
            if self.config.trace_execution {
                self.trace_instruction();
            }

            let byte = self.read_byte();
            let op = OpCode::from_byte(byte)
                .ok_or_else(|| Fault::script(format!("Unknown opcode {}.", byte)))?;

            match op {
                OpCode::Constant => {
                    let index = self.read_byte() as usize;
                    let value = self.read_constant(index)?;
                    self.push(value)?;
                }
                OpCode::ConstantLong => {
                    let index = self.read_u16() as usize;
                    let value = self.read_constant(index)?;
                    self.push(value)?;
                }
                OpCode::Null => self.push(Value::Null)?,
                OpCode::True => self.push(Value::Bool(true))?,
                OpCode::False => self.push(Value::Bool(false))?,
                OpCode::Pop => {
                    self.pop()?;
                }

                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let index = self.frame().base + slot;
                    let value = self
                        .stack
                        .get(index)
                        .cloned()
                        .ok_or_else(|| Fault::script("Invalid local slot."))?;
                    self.push(value)?;
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let index = self.frame().base + slot;
                    let value = self.peek(0)?.clone();
                    match self.stack.get_mut(index) {
                        Some(target) => *target = value,
                        None => return Err(Fault::script("Invalid local slot.")),
                    }
                }

                OpCode::GetModule => {
                    let slot = self.read_u16();
                    let module = self.frame_module();
                    let value = self.modules[module.0].get(slot).cloned();
                    match value {
                        Some(value) if !value.is_undefined() => self.push(value)?,
                        _ => {
                            let name = self.module_slot_name(module, slot);
                            return Err(Fault::script(format!("Undefined variable {}", name)));
                        }
                    }
                }
                OpCode::SetModule => {
                    let slot = self.read_u16();
                    let module = self.frame_module();
                    let defined = self.modules[module.0]
                        .get(slot)
                        .is_some_and(|value| !value.is_undefined());
                    if !defined {
                        let name = self.module_slot_name(module, slot);
                        return Err(Fault::script(format!("Undefined variable {}", name)));
                    }
                    let value = self.peek(0)?.clone();
                    self.modules[module.0].set(slot, value);
                }
                OpCode::DefineModule => {
                    let slot = self.read_u16();
                    let module = self.frame_module();
                    let value = self.pop()?;
                    self.modules[module.0].set(slot, value);
                }

                OpCode::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a == b))?;
                }
                OpCode::Greater => self.compare_op(|a, b| a > b)?,
                OpCode::Less => self.compare_op(|a, b| a < b)?,
                OpCode::Add => self.binary_add()?,
                OpCode::Subtract => self.binary_num_op(|a, b| a - b)?,
                OpCode::Multiply => self.binary_num_op(|a, b| a * b)?,
                OpCode::Divide => self.binary_num_op(|a, b| a / b)?,
                OpCode::Modulo => self.binary_num_op(|a, b| a % b)?,
                OpCode::Not => {
                    let value = self.pop()?;
                    self.push(Value::Bool(value.is_falsey()))?;
                }
                OpCode::Negate => match self.pop()? {
                    Value::Double(n) => self.push(Value::Double(-n))?,
                    _ => return Err(Fault::script("Operand must be a number.")),
                },
                OpCode::Print => {
                    let value = self.pop()?;
                    let text = format!("{}\n", value);
                    self.write(&text);
                }

                OpCode::Jump => {
                    let offset = self.read_u16() as usize;
                    self.frame_mut().ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16() as usize;
                    if self.peek(0)?.is_falsey() {
                        self.frame_mut().ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16() as usize;
                    self.frame_mut().ip -= offset;
                }

                OpCode::Call => {
                    let argc = self.read_byte() as usize;
                    let callee = self.peek(argc)?.clone();
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke => {
                    let name = self.read_name()?;
                    let argc = self.read_byte() as usize;
                    self.invoke(&name, argc)?;
                }
                OpCode::Return => {
                    let result = self.pop()?;
                    let frame = self
                        .frames
                        .pop()
                        .ok_or_else(|| Fault::script("Return outside of a call frame."))?;
                    let result = if frame.initializer {
                        self.stack.get(frame.base).cloned().unwrap_or(result)
                    } else {
                        result
                    };
                    self.stack.truncate(frame.base);
                    if self.frames.len() <= entry_depth {
                        return Ok(result);
                    }
                    self.push(result)?;
                }

                OpCode::Class => {
                    let name = self.read_name()?;
                    self.push(Value::Class(Rc::new(Class::new(name))))?;
                }
                OpCode::Method | OpCode::StaticMethod => {
                    let name = self.read_name()?;
                    let method = self.pop()?;
                    let Value::Class(class) = self.peek(0)? else {
                        return Err(Fault::script("Methods can only be attached to classes."));
                    };
                    let table = if op == OpCode::Method {
                        &class.methods
                    } else {
                        &class.static_methods
                    };
                    table.borrow_mut().insert(name, method);
                }

                OpCode::GetProperty => {
                    let name = self.read_name()?;
                    let receiver = self.pop()?;
                    let value = self.get_property(&receiver, &name)?;
                    self.push(value)?;
                }
                OpCode::SetProperty => {
                    let name = self.read_name()?;
                    let value = self.pop()?;
                    let receiver = self.pop()?;
                    let Value::Instance(instance) = receiver else {
                        return Err(Fault::script("Only instances have fields."));
                    };
                    instance.set_field(name, value.clone());
                    self.push(value)?;
                }
                OpCode::GetIndex => {
                    let index = self.pop()?;
                    let receiver = self.pop()?;
                    let value = self.get_index(&receiver, &index)?;
                    self.push(value)?;
                }
                OpCode::SetIndex => {
                    let value = self.pop()?;
                    let index = self.pop()?;
                    let receiver = self.pop()?;
                    self.set_index(&receiver, index, value.clone())?;
                    self.push(value)?;
                }

                OpCode::ImportModule => {
                    let name = self.read_name()?;
                    self.import_module(name)?;
                }
            }
        }
    }

    fn trace_instruction(&self) {
        let frame = self.frame();
        let names = self
            .module(frame.function.module)
            .map_or(&[][..], |m| m.variable_names());
        let mut line = String::new();
        disassemble_instruction(&frame.function.chunk, frame.ip, names, &mut line);
        trace!("{}\n{}", render_stack(&self.stack), line.trim_end());
    }

    // ========================================================================
    // Arithmetic
    // ========================================================================

    fn binary_add(&mut self) -> Result<()> {
        let b = self.pop()?;
        let a = self.pop()?;

        let result = match (&a, &b) {
            (Value::Double(a), Value::Double(b)) => Value::Double(a + b),
            (Value::String(a), Value::String(b)) => {
                let mut s = String::with_capacity(a.len() + b.len());
                s.push_str(a);
                s.push_str(b);
                Value::from(s)
            }
            (Value::String(a), Value::Double(b)) => {
                let mut s = a.to_string();
                let _ = format_number(*b, &mut s);
                Value::from(s)
            }
            (Value::Double(a), Value::String(b)) => {
                let mut s = String::new();
                let _ = format_number(*a, &mut s);
                s.push_str(b);
                Value::from(s)
            }
            _ => return Err(Fault::script("Operands must be numbers.")),
        };

        self.push(result)
    }

    fn binary_num_op<F>(&mut self, op: F) -> Result<()>
    where
        F: Fn(f64, f64) -> f64,
    {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Double(a), Value::Double(b)) => self.push(Value::Double(op(a, b))),
            _ => Err(Fault::script("Operands must be numbers.")),
        }
    }

    fn compare_op<F>(&mut self, op: F) -> Result<()>
    where
        F: Fn(f64, f64) -> bool,
    {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Double(a), Value::Double(b)) => self.push(Value::Bool(op(a, b))),
            _ => Err(Fault::script("Operands must be numbers.")),
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Dispatches a call whose callee sits `argc` slots below the top.
    fn call_value(&mut self, callee: Value, argc: usize) -> Result<()> {
        match callee {
            Value::Function(function) => self.call_function(function, argc, false),
            Value::BoundMethod(bound) => {
                let slot = self.stack.len() - argc - 1;
                self.stack[slot] = bound.receiver.clone();
                self.call_method(&bound.method, argc)
            }
            Value::Class(class) => self.construct(class, argc),
            Value::ForeignFunction(function) => self.call_foreign_function(&function, argc),
            Value::ForeignMethod(method) => self.call_foreign_method(&method, argc),
            _ => Err(Fault::script("Can only call functions and classes.")),
        }
    }

    fn call_method(&mut self, method: &Value, argc: usize) -> Result<()> {
        match method {
            Value::Function(function) => self.call_function(Rc::clone(function), argc, false),
            Value::ForeignMethod(method) => self.call_foreign_method(method, argc),
            other => self.call_value(other.clone(), argc),
        }
    }

    fn call_function(&mut self, function: Rc<Function>, argc: usize, initializer: bool) -> Result<()> {
        if argc != function.arity as usize {
            return Err(Fault::script(format!(
                "Expected {} arguments but got {}.",
                function.arity, argc
            )));
        }
        if self.frames.len() >= self.config.max_frames {
            return Err(Fault::script("Stack overflow."));
        }
        let base = self.stack.len() - argc - 1;
        let mut frame = CallFrame::new(function, base);
        frame.initializer = initializer;
        self.frames.push(frame);
        Ok(())
    }

    fn construct(&mut self, class: Rc<Class>, argc: usize) -> Result<()> {
        let slot = self.stack.len() - argc - 1;
        let instance = Value::Instance(Rc::new(Instance::new(Rc::clone(&class))));
        self.stack[slot] = instance.clone();

        match class.method("init") {
            Some(Value::Function(init)) => self.call_function(init, argc, true),
            Some(Value::ForeignMethod(init)) => {
                self.call_foreign_method(&init, argc)?;
                // The result of a foreign init is discarded.
                if let Some(top) = self.stack.last_mut() {
                    *top = instance;
                }
                Ok(())
            }
            Some(_) => Err(Fault::script("Can only call functions and classes.")),
            None if argc != 0 => Err(Fault::script(format!(
                "Expected 0 arguments but got {}.",
                argc
            ))),
            None => Ok(()),
        }
    }

    fn call_foreign_function(&mut self, function: &ForeignFunction, argc: usize) -> Result<()> {
        if !function.arity.accepts(argc) {
            return Err(arity_fault(function.arity, argc));
        }
        let slot = self.stack.len() - argc - 1;
        let args: Vec<Value> = self.stack[slot + 1..].to_vec();
        let func = Rc::clone(&function.func);
        let result = func(self, &args).map_err(Fault::foreign)?;
        self.stack.truncate(slot);
        self.push(result)
    }

    fn call_foreign_method(&mut self, method: &ForeignMethod, argc: usize) -> Result<()> {
        if !method.arity.accepts(argc) {
            return Err(arity_fault(method.arity, argc));
        }
        let slot = self.stack.len() - argc - 1;
        let receiver = self.stack[slot].clone();
        let args: Vec<Value> = self.stack[slot + 1..].to_vec();
        let func = Rc::clone(&method.func);
        let result = func(self, &receiver, &args).map_err(Fault::foreign)?;
        self.stack.truncate(slot);
        self.push(result)
    }

    /// Fused property lookup and call.
    fn invoke(&mut self, name: &str, argc: usize) -> Result<()> {
        let receiver = self.peek(argc)?.clone();
        let slot = self.stack.len() - argc - 1;

        match &receiver {
            Value::Instance(instance) => {
                if let Some(field) = instance.field(name) {
                    self.stack[slot] = field.clone();
                    return self.call_value(field, argc);
                }
                match instance.class.method(name) {
                    Some(method) => self.call_method(&method, argc),
                    None => Err(undefined_property(name)),
                }
            }
            Value::Class(class) => match class.static_method(name) {
                Some(method) => self.call_method(&method, argc),
                None => Err(undefined_property(name)),
            },
            Value::Module(handle) => {
                let value = self.module_variable(handle.id, name)?;
                self.stack[slot] = value.clone();
                self.call_value(value, argc)
            }
            _ => Err(Fault::script("Only instances have properties.")),
        }
    }

    // ========================================================================
    // Properties, indexing and modules
    // ========================================================================

    fn get_property(&self, receiver: &Value, name: &str) -> Result<Value> {
        match receiver {
            Value::Instance(instance) => {
                if let Some(field) = instance.field(name) {
                    return Ok(field);
                }
                let method = instance
                    .class
                    .method(name)
                    .ok_or_else(|| undefined_property(name))?;
                Ok(bind(receiver.clone(), method))
            }
            Value::Class(class) => {
                let method = class
                    .static_method(name)
                    .ok_or_else(|| undefined_property(name))?;
                Ok(bind(receiver.clone(), method))
            }
            Value::Module(handle) => self.module_variable(handle.id, name),
            _ => Err(Fault::script("Only instances have properties.")),
        }
    }

    fn module_variable(&self, module: ModuleId, name: &str) -> Result<Value> {
        match self.module(module).and_then(|m| m.get_by_name(name)) {
            Some(value) if !value.is_undefined() => Ok(value.clone()),
            _ => Err(Fault::script(format!("Undefined variable {}", name))),
        }
    }

    fn get_index(&self, receiver: &Value, index: &Value) -> Result<Value> {
        let cell = receiver
            .as_instance()
            .and_then(|instance| instance.foreign.as_ref())
            .ok_or_else(not_indexable)?;
        let mut data = cell
            .try_borrow_mut()
            .map_err(|_| Fault::script("Container is already in use."))?;
        let indexable = data.as_indexable().ok_or_else(not_indexable)?;
        indexable.get_index(index).map_err(Fault::script)
    }

    fn set_index(&self, receiver: &Value, index: Value, value: Value) -> Result<()> {
        let cell = receiver
            .as_instance()
            .and_then(|instance| instance.foreign.as_ref())
            .ok_or_else(not_indexable)?;
        let mut data = cell
            .try_borrow_mut()
            .map_err(|_| Fault::script("Container is already in use."))?;
        let indexable = data.as_indexable().ok_or_else(not_indexable)?;
        indexable.set_index(index, value).map_err(Fault::script)
    }

    fn import_module(&mut self, name: Rc<str>) -> Result<()> {
        let existing = self.module_id(&name);
        if let Some(id) = existing {
            if self.modules[id.0].is_loaded() {
                return self.push(Value::Module(ModuleHandle { id, name }));
            }
        }

        let source = self
            .config
            .load_module
            .as_mut()
            .and_then(|load| load(&name));

        let Some(source) = source else {
            // Modules the host populated directly need no source.
            if let Some(id) = existing {
                self.modules[id.0].mark_loaded();
                debug!(module = %name, "imported host module");
                return self.push(Value::Null);
            }
            return Err(Fault::script(format!("Could not load module '{}'.", name)));
        };

        let id = self.ensure_module(&name);
        let function = compiler::compile(&source, &mut self.modules[id.0], id, false)
            .map_err(|err| Fault::script(format!("Could not compile module '{}': {}", name, err)))?;
        self.modules[id.0].mark_loaded();
        debug!(module = %name, bytes = function.chunk.code.len(), "loaded module");

        let body = Value::Function(Rc::new(function));
        self.push(body.clone())?;
        self.call_value(body, 0)
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

fn bind(receiver: Value, method: Value) -> Value {
    Value::BoundMethod(Rc::new(BoundMethod { receiver, method }))
}

fn undefined_property(name: &str) -> Fault {
    Fault::script(format!("Undefined property {}", name))
}

fn not_indexable() -> Fault {
    Fault::script("Only arrays and maps can be indexed.")
}

fn arity_fault(arity: crate::runtime::Arity, argc: usize) -> Fault {
    match arity {
        crate::runtime::Arity::Fixed(n) => {
            Fault::script(format!("Expected {} arguments but got {}.", n, argc))
        }
        crate::runtime::Arity::Variadic => Fault::script("Invalid argument count."),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::runtime::Arity;

    fn capture_vm() -> (VM, Rc<RefCell<String>>) {
        let output = Rc::new(RefCell::new(String::new()));
        let sink = Rc::clone(&output);
        let config = Config::new().write(move |text| sink.borrow_mut().push_str(text));
        let mut vm = VM::new(config);
        crate::builtins::install(&mut vm);
        (vm, output)
    }

    fn eval(vm: &mut VM, src: &str) -> std::result::Result<Value, crate::Error> {
        let function = vm.compile("main", src, true)?;
        Ok(vm.call(Value::Function(function), &[])?)
    }

    fn eval_ok(src: &str) -> Value {
        let (mut vm, _) = capture_vm();
        eval(&mut vm, src).expect("Evaluation should succeed")
    }

    fn eval_err(src: &str) -> RuntimeError {
        let (mut vm, _) = capture_vm();
        match eval(&mut vm, src) {
            Err(crate::Error::Runtime(err)) => err,
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[test]
    fn test_vm_new() {
        let vm = VM::default();
        assert_eq!(vm.stack_len(), 0);
        assert_eq!(vm.frame_count(), 0);
        assert!(vm.module_id("").is_some());
    }

    #[test]
    fn test_eval_number() {
        assert_eq!(eval_ok("42"), Value::Double(42.0));
        assert_eq!(eval_ok("1 + 2"), Value::Double(3.0));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval_ok("2 * 3 + 4"), Value::Double(10.0));
        assert_eq!(eval_ok("2 * (3 + 4)"), Value::Double(14.0));
        assert_eq!(eval_ok("7 % 3"), Value::Double(1.0));
        assert_eq!(eval_ok("-7 % 3"), Value::Double(-1.0));
        assert_eq!(eval_ok("10 / 4"), Value::Double(2.5));
        assert_eq!(eval_ok("1 / 0"), Value::Double(f64::INFINITY));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(eval_ok("\"a\" + \"b\""), Value::from("ab"));
        assert_eq!(eval_ok("\"a\" + 1"), Value::from("a1"));
        assert_eq!(eval_ok("1.5 + \"a\""), Value::from("1.5a"));
    }

    #[test]
    fn test_type_errors() {
        assert_eq!(eval_err("true + 1").message, "Operands must be numbers.");
        assert_eq!(eval_err("\"a\" - 1").message, "Operands must be numbers.");
        assert_eq!(eval_err("\"a\" < 1").message, "Operands must be numbers.");
        assert_eq!(eval_err("-\"a\"").message, "Operand must be a number.");
    }

    #[test]
    fn test_comparison_and_equality() {
        assert_eq!(eval_ok("1 < 2"), Value::Bool(true));
        assert_eq!(eval_ok("2 <= 1"), Value::Bool(false));
        assert_eq!(eval_ok("2 >= 2"), Value::Bool(true));
        assert_eq!(eval_ok("1 == 1"), Value::Bool(true));
        assert_eq!(eval_ok("1 != \"1\""), Value::Bool(true));
        assert_eq!(eval_ok("null == false"), Value::Bool(false));
        assert_eq!(eval_ok("\"ab\" == \"a\" + \"b\""), Value::Bool(true));
    }

    #[test]
    fn test_logical_operators() {
        assert_eq!(eval_ok("null or 3"), Value::Double(3.0));
        assert_eq!(eval_ok("1 and 2"), Value::Double(2.0));
        assert_eq!(eval_ok("false and undefinedName"), Value::Bool(false));
        assert_eq!(eval_ok("!null"), Value::Bool(true));
        assert_eq!(eval_ok("!0"), Value::Bool(false));
    }

    #[test]
    fn test_undefined_variable() {
        let (mut vm, output) = capture_vm();
        let err = match eval(&mut vm, "print x;") {
            Err(crate::Error::Runtime(err)) => err,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(err.message, "Undefined variable x");
        assert!(output.borrow().is_empty());
    }

    #[test]
    fn test_assignment_to_undeclared() {
        assert_eq!(eval_err("y = 1;").message, "Undefined variable y");
    }

    #[test]
    fn test_stack_balanced_after_calls() {
        let (mut vm, _) = capture_vm();
        eval(&mut vm, "fun f(a, b) { return a + b; } for (var i = 0; i < 10; i = i + 1) f(i, i);")
            .unwrap();
        assert_eq!(vm.stack_len(), 0);
        assert_eq!(vm.frame_count(), 0);
    }

    #[test]
    fn test_stack_reset_after_fault() {
        let (mut vm, _) = capture_vm();
        assert!(eval(&mut vm, "fun f() { return 1 + nil; } f();").is_err());
        assert_eq!(vm.stack_len(), 0);
        assert_eq!(vm.frame_count(), 0);
        assert_eq!(eval(&mut vm, "2 + 2").unwrap(), Value::Double(4.0));
    }

    #[test]
    fn test_stack_overflow_is_recoverable() {
        let (mut vm, _) = capture_vm();
        let err = eval(&mut vm, "fun f(n) { return f(n + 1); } f(0);").unwrap_err();
        assert_eq!(err.to_string(), "Stack overflow.");
        assert_eq!(vm.frame_count(), 0);
        assert_eq!(eval(&mut vm, "1").unwrap(), Value::Double(1.0));
    }

    #[test]
    fn test_trace_lines() {
        let err = eval_err("fun inner() {\n  return 1 + true;\n}\ninner();");
        assert_eq!(err.trace.len(), 2);
        assert_eq!(err.trace[0].function, "inner");
        assert_eq!(err.trace[0].line, 2);
        assert_eq!(err.trace[1].function, "script");
        assert_eq!(err.trace[1].line, 4);
    }

    #[test]
    fn test_foreign_function_reentry() {
        let (mut vm, _) = capture_vm();
        let apply = ForeignFunction::new("apply", Arity::Fixed(2), |vm, args| {
            vm.call(args[0].clone(), &args[1..]).map_err(|e| e.message)
        });
        vm.define_variable("main", "apply", Value::ForeignFunction(Rc::new(apply)));
        let result = eval(&mut vm, "fun double(x) { return x * 2; } apply(double, 21)").unwrap();
        assert_eq!(result, Value::Double(42.0));
        assert_eq!(vm.stack_len(), 0);
    }

    #[test]
    fn test_nested_fault_propagates_as_foreign() {
        let (mut vm, _) = capture_vm();
        let apply = ForeignFunction::new("apply", Arity::Fixed(1), |vm, args| {
            vm.call(args[0].clone(), &[]).map_err(|e| e.message)
        });
        vm.define_variable("main", "apply", Value::ForeignFunction(Rc::new(apply)));
        let err = match eval(&mut vm, "fun bad() { return -\"x\"; } apply(bad);") {
            Err(crate::Error::Runtime(err)) => err,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(err.message, "Operand must be a number.");
        assert_eq!(err.origin, crate::FaultOrigin::Foreign);
        assert_eq!(vm.stack_len(), 0);
    }

    fn define_apply(vm: &mut VM) {
        let apply = ForeignFunction::new("apply", Arity::Variadic, |vm, args| {
            vm.call(args[0].clone(), &args[1..]).map_err(|e| e.message)
        });
        vm.define_variable("main", "apply", Value::ForeignFunction(Rc::new(apply)));
    }

    #[test]
    fn test_reentrant_recursion_overflows_cleanly() {
        let (mut vm, _) = capture_vm();
        define_apply(&mut vm);
        let err = match eval(&mut vm, "fun f(n) { return apply(f, n + 1); } f(0)") {
            Err(crate::Error::Runtime(err)) => err,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(err.message, "Stack overflow.");
        assert_eq!(vm.stack_len(), 0);
        assert_eq!(vm.frame_count(), 0);
        assert_eq!(eval(&mut vm, "1 + 1").unwrap(), Value::Double(2.0));
    }

    #[test]
    fn test_max_nested_calls() {
        let output = Rc::new(RefCell::new(String::new()));
        let sink = Rc::clone(&output);
        let config = Config::new()
            .write(move |text| sink.borrow_mut().push_str(text))
            .max_nested_calls(3);
        let mut vm = VM::new(config);
        define_apply(&mut vm);
        let err = eval(&mut vm, "fun f(n) { print n; return apply(f, n + 1); } f(1);").unwrap_err();
        assert_eq!(err.to_string(), "Stack overflow.");
        assert_eq!(output.borrow().as_str(), "1\n2\n3\n");
    }

    #[test]
    fn test_define_builtin_propagates() {
        let (mut vm, _) = capture_vm();
        vm.ensure_module("main");
        vm.define_builtin("answer", Value::Double(42.0));
        assert_eq!(eval(&mut vm, "answer").unwrap(), Value::Double(42.0));
        let other = vm.ensure_module("later");
        assert!(vm.module(other).unwrap().find("answer").is_some());
    }

    #[test]
    fn test_stack_capacity() {
        let config = Config::new().stack_capacity(8);
        let mut vm = VM::new(config);
        let err = eval(&mut vm, "fun f(a, b, c, d, e, g, h, i) { return a; } f(1, 2, 3, 4, 5, 6, 7, 8);")
            .unwrap_err();
        assert_eq!(err.to_string(), "Stack overflow.");
    }
}
