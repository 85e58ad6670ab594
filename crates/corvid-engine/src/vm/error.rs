//! Runtime errors for the VM.

use std::fmt;

use thiserror::Error;

/// Which side of the host boundary raised a runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOrigin {
    /// Raised by an instruction
    Script,
    /// Returned as `Err` by a host function or method
    Foreign,
}

/// One entry of a runtime stack trace, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Source line of the instruction being executed
    pub line: usize,
    /// Function name (`script` for a module body)
    pub function: String,
    /// Module the function was compiled in
    pub module: String,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.function == "script" {
            write!(f, "[line {}] in script", self.line)
        } else {
            write!(f, "[line {}] in {}()", self.line, self.function)
        }
    }
}

/// A runtime error that aborted a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RuntimeError {
    /// Human-readable description
    pub message: String,
    /// Where the error came from
    pub origin: FaultOrigin,
    /// Call frames active when the error was raised, innermost first
    pub trace: Vec<TraceFrame>,
}

impl RuntimeError {
    /// The message followed by one `[line N] in name()` line per frame.
    pub fn report(&self) -> String {
        let mut out = self.message.clone();
        for frame in &self.trace {
            out.push('\n');
            out.push_str(&frame.to_string());
        }
        out
    }

    /// Line of the innermost frame, or 0 if no script frame was active.
    pub fn line(&self) -> usize {
        self.trace.first().map_or(0, |frame| frame.line)
    }
}

/// A fault raised inside the run loop, before the trace is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fault {
    pub message: String,
    pub origin: FaultOrigin,
}

impl Fault {
    pub fn script(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            origin: FaultOrigin::Script,
        }
    }

    pub fn foreign(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            origin: FaultOrigin::Foreign,
        }
    }
}

/// Result type for run-loop operations.
pub(crate) type Result<T> = std::result::Result<T, Fault>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_format() {
        let err = RuntimeError {
            message: "Operands must be numbers.".into(),
            origin: FaultOrigin::Script,
            trace: vec![
                TraceFrame {
                    line: 2,
                    function: "add".into(),
                    module: "main".into(),
                },
                TraceFrame {
                    line: 5,
                    function: "script".into(),
                    module: "main".into(),
                },
            ],
        };
        assert_eq!(
            err.report(),
            "Operands must be numbers.\n[line 2] in add()\n[line 5] in script"
        );
        assert_eq!(err.to_string(), "Operands must be numbers.");
        assert_eq!(err.line(), 2);
    }

    #[test]
    fn test_fault_origin() {
        assert_eq!(Fault::script("x").origin, FaultOrigin::Script);
        assert_eq!(Fault::foreign("x").origin, FaultOrigin::Foreign);
    }
}
