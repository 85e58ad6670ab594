//! The bytecode virtual machine.
//!
//! ## Structure
//!
//! - `interpreter` - Stack machine, call dispatch and module imports
//! - `error` - Runtime errors and stack traces

mod error;
mod interpreter;

pub use error::{FaultOrigin, RuntimeError, TraceFrame};
pub use interpreter::VM;
