// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # corvid-engine
//!
//! An embeddable compiler and virtual machine for Corvid, a small dynamically
//! typed scripting language with classes, module-scoped variables and a
//! foreign-function bridge.
//!
//! ## Overview
//!
//! - Single-pass compiler from source text straight to bytecode
//! - Stack-based virtual machine with call frames and runtime stack traces
//! - Modules with indexed variables, loaded on demand through a host callback
//! - Host functions and classes callable from scripts, and scripts callable
//!   from the host
//!
//! ## Quick Start
//!
//! ```rust
//! use corvid_engine::{Engine, Value};
//!
//! let mut engine = Engine::new();
//! let result = engine.eval("1 + 2").unwrap();
//! assert_eq!(result, Value::Double(3.0));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builtins;
pub mod compiler;
pub mod config;
pub mod lexer;
pub mod runtime;
pub mod vm;

use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

pub use compiler::CompileError;
pub use config::Config;
pub use runtime::{Arity, ForeignClass, ForeignObject, Function, Indexable, Instance, Value};
pub use vm::{FaultOrigin, RuntimeError, TraceFrame, VM};

/// Module that `run` and `eval` execute in.
pub const MAIN_MODULE: &str = "main";

/// Outcome of [`Engine::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    /// The script ran to completion
    Success,
    /// The script did not compile
    CompileError,
    /// The script faulted while running
    RuntimeError,
}

/// Category of a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Compile error
    Compile,
    /// Runtime error
    Runtime,
    /// Misuse of the embedding API
    Other,
}

/// Errors returned by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Source failed to compile
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// Execution faulted
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The reporting category for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Compile(_) => ErrorKind::Compile,
            Error::Runtime(_) => ErrorKind::Runtime,
            Error::Other(_) => ErrorKind::Other,
        }
    }
}

/// The Corvid engine.
///
/// Wraps a [`VM`] with the builtin classes installed and translates failures
/// into calls to the configured `report_error` callback.
pub struct Engine {
    vm: VM,
}

impl Engine {
    /// Creates an engine with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::new())
    }

    /// Creates an engine with the given callbacks and limits.
    pub fn with_config(config: Config) -> Self {
        let mut vm = VM::new(config);
        builtins::install(&mut vm);
        Self { vm }
    }

    /// Runs `source` in the `main` module.
    pub fn run(&mut self, source: &str) -> InterpretResult {
        self.run_module(MAIN_MODULE, source)
    }

    /// Runs `source` as the body of `module`, reporting any failure.
    pub fn run_module(&mut self, module: &str, source: &str) -> InterpretResult {
        match self.interpret(module, source, false) {
            Ok(_) => InterpretResult::Success,
            Err(err) => {
                self.report(module, &err);
                match err {
                    Error::Compile(_) => InterpretResult::CompileError,
                    _ => InterpretResult::RuntimeError,
                }
            }
        }
    }

    /// Runs `source` in the `main` module and returns the value of its final
    /// expression statement. Failures are returned, not reported.
    ///
    /// ```rust
    /// use corvid_engine::Engine;
    ///
    /// let mut engine = Engine::new();
    /// engine.eval("var greeting = \"hello\";").unwrap();
    /// let value = engine.eval("greeting + \" world\"").unwrap();
    /// assert_eq!(value.to_string(), "hello world");
    /// ```
    pub fn eval(&mut self, source: &str) -> Result<Value, Error> {
        self.interpret(MAIN_MODULE, source, true)
    }

    /// Compiles `source` for `module` without running it.
    pub fn compile(&mut self, module: &str, source: &str) -> Result<Rc<Function>, Error> {
        Ok(self.vm.compile(module, source, false)?)
    }

    fn interpret(&mut self, module: &str, source: &str, eval: bool) -> Result<Value, Error> {
        let function = self.vm.compile(module, source, eval)?;
        debug!(module, bytes = function.chunk.code.len(), "compiled");
        let value = self.vm.call(Value::Function(function), &[])?;
        Ok(undefined_to_null(value))
    }

    /// Assigns an existing module variable.
    pub fn set_module_variable(&mut self, module: &str, name: &str, value: Value) -> bool {
        let slot = self
            .vm
            .module_id(module)
            .and_then(|id| self.vm.module(id).and_then(|m| m.find(name)).map(|slot| (id, slot)));
        match slot {
            Some((id, slot)) => self.vm.module_mut(id).is_some_and(|m| m.set(slot, value)),
            None => {
                self.report_other(module, &format!("Undefined variable {} in module '{}'.", name, module));
                false
            }
        }
    }

    /// Reads a module variable; `None` if the module or variable does not
    /// exist or was never assigned.
    pub fn get_module_variable(&self, module: &str, name: &str) -> Option<Value> {
        let id = self.vm.module_id(module)?;
        self.vm
            .module(id)?
            .get_by_name(name)
            .filter(|value| !value.is_undefined())
            .cloned()
    }

    /// Calls the function stored in a module variable.
    pub fn call(&mut self, module: &str, function: &str, args: &[Value]) -> Option<Value> {
        let Some(callee) = self.get_module_variable(module, function) else {
            self.report_other(
                module,
                &format!("Undefined variable {} in module '{}'.", function, module),
            );
            return None;
        };
        self.call_value(callee, args)
    }

    /// Calls any callable value, reporting a runtime error on failure.
    pub fn call_value(&mut self, callee: Value, args: &[Value]) -> Option<Value> {
        match self.vm.call(callee, args) {
            Ok(value) => Some(undefined_to_null(value)),
            Err(err) => {
                self.report(MAIN_MODULE, &Error::Runtime(err));
                None
            }
        }
    }

    /// Registers a host function.
    ///
    /// An empty module name registers it in the builtin module, visible from
    /// every module; any other name creates the module if needed.
    ///
    /// ```rust
    /// use corvid_engine::{Arity, Engine, Value};
    ///
    /// let mut engine = Engine::new();
    /// engine.register_foreign_function("", "twice", Arity::Fixed(1), |_, args| {
    ///     let n = args[0].as_number().ok_or("Expected a number.")?;
    ///     Ok(Value::Double(n * 2.0))
    /// });
    /// assert_eq!(engine.eval("twice(21)").unwrap(), Value::Double(42.0));
    /// ```
    pub fn register_foreign_function(
        &mut self,
        module: &str,
        name: &str,
        arity: Arity,
        func: impl Fn(&mut VM, &[Value]) -> Result<Value, String> + 'static,
    ) {
        let function = runtime::ForeignFunction::new(name, arity, func);
        self.define(module, name, Value::ForeignFunction(Rc::new(function)));
    }

    /// Registers a host class. Module names behave as for
    /// [`register_foreign_function`](Self::register_foreign_function).
    pub fn register_foreign_class(&mut self, module: &str, class: ForeignClass) {
        let name = Rc::clone(class.name());
        self.define(module, &name, Value::Class(class.build()));
    }

    fn define(&mut self, module: &str, name: &str, value: Value) {
        if module.is_empty() {
            self.vm.define_builtin(name, value);
        } else if !self.vm.define_variable(module, name, value) {
            self.report_other(module, "Too many module variables.");
        }
        debug!(module, name, "registered foreign value");
    }

    /// Borrows the underlying VM.
    pub fn vm(&self) -> &VM {
        &self.vm
    }

    /// Mutably borrows the underlying VM.
    pub fn vm_mut(&mut self) -> &mut VM {
        &mut self.vm
    }

    fn report(&mut self, module: &str, err: &Error) {
        let (module, line, message) = match err {
            Error::Compile(err) => (err.module.clone(), err.line, err.to_string()),
            Error::Runtime(err) => {
                let module = err
                    .trace
                    .first()
                    .map_or_else(|| module.to_string(), |frame| frame.module.clone());
                (module, err.line(), err.report())
            }
            Error::Other(message) => (module.to_string(), 0, message.clone()),
        };
        (self.vm.config_mut().report_error)(err.kind(), &module, line, &message);
    }

    fn report_other(&mut self, module: &str, message: &str) {
        self.report(module, &Error::Other(message.to_string()));
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn undefined_to_null(value: Value) -> Value {
    if value.is_undefined() { Value::Null } else { value }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    type Reports = Rc<RefCell<Vec<(ErrorKind, String, usize, String)>>>;

    fn engine_with_reports() -> (Engine, Reports) {
        let reports: Reports = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&reports);
        let config = Config::new()
            .write(|_| {})
            .report_error(move |kind, module, line, message| {
                sink.borrow_mut()
                    .push((kind, module.to_string(), line, message.to_string()));
            });
        (Engine::with_config(config), reports)
    }

    #[test]
    fn test_engine_creation() {
        let engine = Engine::new();
        assert!(engine.get_module_variable("", "Array").is_some());
        assert!(engine.get_module_variable("", "Map").is_some());
    }

    #[test]
    fn test_eval_returns_last_expression() {
        let mut engine = Engine::new();
        assert_eq!(engine.eval("var x = 2; x * 3").unwrap(), Value::Double(6.0));
    }

    #[test]
    fn test_eval_statement_returns_null() {
        let mut engine = Engine::new();
        assert_eq!(engine.eval("var x = 2;").unwrap(), Value::Null);
    }

    #[test]
    fn test_run_reports_compile_error() {
        let (mut engine, reports) = engine_with_reports();
        assert_eq!(engine.run("print 1"), InterpretResult::CompileError);
        let reports = reports.borrow();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, ErrorKind::Compile);
        assert_eq!(reports[0].1, "main");
        assert_eq!(reports[0].3, "[line 1] Error at end: Expect ';' after value.");
    }

    #[test]
    fn test_run_reports_runtime_trace() {
        let (mut engine, reports) = engine_with_reports();
        let source = "fun f() {\n  return -true;\n}\nf();";
        assert_eq!(engine.run(source), InterpretResult::RuntimeError);
        let reports = reports.borrow();
        assert_eq!(reports[0].0, ErrorKind::Runtime);
        assert_eq!(reports[0].2, 2);
        assert_eq!(
            reports[0].3,
            "Operand must be a number.\n[line 2] in f()\n[line 4] in script"
        );
    }

    #[test]
    fn test_module_variables() {
        let (mut engine, reports) = engine_with_reports();
        assert_eq!(engine.run("var score = 1;"), InterpretResult::Success);
        assert_eq!(engine.get_module_variable("main", "score"), Some(Value::Double(1.0)));
        assert!(engine.set_module_variable("main", "score", Value::Double(5.0)));
        assert_eq!(engine.eval("score").unwrap(), Value::Double(5.0));

        assert!(!engine.set_module_variable("main", "missing", Value::Null));
        assert!(!engine.set_module_variable("nowhere", "score", Value::Null));
        assert_eq!(reports.borrow().len(), 2);
        assert!(reports.borrow().iter().all(|r| r.0 == ErrorKind::Other));
        assert_eq!(engine.get_module_variable("nowhere", "score"), None);
    }

    #[test]
    fn test_declared_but_unassigned_reads_as_none() {
        let mut engine = Engine::new();
        engine.run("fun f() { return later; }");
        assert_eq!(engine.get_module_variable("main", "later"), None);
    }

    #[test]
    fn test_call_by_name() {
        let (mut engine, reports) = engine_with_reports();
        engine.run("fun add(a, b) { return a + b; }");
        let result = engine.call("main", "add", &[Value::Double(1.0), Value::Double(2.0)]);
        assert_eq!(result, Some(Value::Double(3.0)));

        assert_eq!(engine.call("main", "nope", &[]), None);
        assert_eq!(engine.call("main", "add", &[Value::Null]), None);
        let reports = reports.borrow();
        assert_eq!(reports[0].0, ErrorKind::Other);
        assert_eq!(reports[1].0, ErrorKind::Runtime);
        assert!(reports[1].3.starts_with("Expected 2 arguments but got 1."));
    }

    #[test]
    fn test_foreign_function_error_origin() {
        let mut engine = Engine::new();
        engine.register_foreign_function("", "fail", Arity::Fixed(0), |_, _| {
            Err("host said no".to_string())
        });
        match engine.eval("fail()") {
            Err(Error::Runtime(err)) => {
                assert_eq!(err.message, "host said no");
                assert_eq!(err.origin, FaultOrigin::Foreign);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_error_kind() {
        let err = Error::Other("x".into());
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(err.to_string(), "x");
    }
}
