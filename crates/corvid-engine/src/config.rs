//! Engine configuration: embedder callbacks and VM capacities.

use std::fmt;
use std::io::Write as _;

use tracing::{error, warn};

use crate::ErrorKind;

/// Returns the source of a module, or `None` if it cannot be found.
pub type LoadModuleFn = Box<dyn FnMut(&str) -> Option<String>>;

/// Receives text written by `print`.
pub type WriteFn = Box<dyn FnMut(&str)>;

/// Receives `(kind, module, line, message)` for every reported failure.
pub type ReportErrorFn = Box<dyn FnMut(ErrorKind, &str, usize, &str)>;

/// Default value stack capacity, in values.
pub const DEFAULT_STACK_CAPACITY: usize = 65_536;

/// Default call frame limit.
pub const DEFAULT_MAX_FRAMES: usize = 1_024;

/// Default limit on nested [`VM::call`](crate::VM::call) sub-runs.
///
/// Each sub-run recurses on the native stack, so this stays far below
/// [`DEFAULT_MAX_FRAMES`].
pub const DEFAULT_MAX_NESTED_CALLS: usize = 64;

/// Callbacks and limits for an [`Engine`](crate::Engine).
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use corvid_engine::{Config, Engine};
///
/// let output = Rc::new(RefCell::new(String::new()));
/// let sink = Rc::clone(&output);
/// let config = Config::new()
///     .write(move |text| sink.borrow_mut().push_str(text))
///     .max_frames(64);
/// let mut engine = Engine::with_config(config);
/// engine.run("print 1 + 2;");
/// assert_eq!(output.borrow().as_str(), "3\n");
/// ```
pub struct Config {
    pub(crate) load_module: Option<LoadModuleFn>,
    pub(crate) write: WriteFn,
    pub(crate) report_error: ReportErrorFn,
    pub(crate) stack_capacity: usize,
    pub(crate) max_frames: usize,
    pub(crate) max_nested_calls: usize,
    pub(crate) trace_execution: bool,
}

impl Config {
    /// Creates the default configuration: stdout output, stderr error
    /// reports and no module loader.
    pub fn new() -> Self {
        Self {
            load_module: None,
            write: Box::new(default_write),
            report_error: Box::new(default_report),
            stack_capacity: DEFAULT_STACK_CAPACITY,
            max_frames: DEFAULT_MAX_FRAMES,
            max_nested_calls: DEFAULT_MAX_NESTED_CALLS,
            trace_execution: false,
        }
    }

    /// Sets the callback that supplies source for `import`.
    pub fn load_module(mut self, f: impl FnMut(&str) -> Option<String> + 'static) -> Self {
        self.load_module = Some(Box::new(f));
        self
    }

    /// Sets the callback that receives `print` output.
    pub fn write(mut self, f: impl FnMut(&str) + 'static) -> Self {
        self.write = Box::new(f);
        self
    }

    /// Sets the callback that receives compile and runtime errors.
    pub fn report_error(mut self, f: impl FnMut(ErrorKind, &str, usize, &str) + 'static) -> Self {
        self.report_error = Box::new(f);
        self
    }

    /// Sets the value stack capacity.
    pub fn stack_capacity(mut self, capacity: usize) -> Self {
        self.stack_capacity = capacity.max(1);
        self
    }

    /// Sets the call frame limit.
    pub fn max_frames(mut self, frames: usize) -> Self {
        self.max_frames = frames.max(1);
        self
    }

    /// Sets how deeply foreign functions may re-enter the VM.
    pub fn max_nested_calls(mut self, depth: usize) -> Self {
        self.max_nested_calls = depth.max(1);
        self
    }

    /// Logs the stack and each instruction at `TRACE` level while running.
    pub fn trace_execution(mut self, enabled: bool) -> Self {
        self.trace_execution = enabled;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("load_module", &self.load_module.is_some())
            .field("stack_capacity", &self.stack_capacity)
            .field("max_frames", &self.max_frames)
            .field("max_nested_calls", &self.max_nested_calls)
            .field("trace_execution", &self.trace_execution)
            .finish_non_exhaustive()
    }
}

fn default_write(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

fn default_report(kind: ErrorKind, module: &str, line: usize, message: &str) {
    match kind {
        ErrorKind::Compile => warn!(module, line, "compile error"),
        ErrorKind::Runtime => warn!(module, line, "runtime error"),
        ErrorKind::Other => error!(module, "{}", message),
    }
    eprintln!("{}", message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.stack_capacity, DEFAULT_STACK_CAPACITY);
        assert_eq!(config.max_frames, DEFAULT_MAX_FRAMES);
        assert_eq!(config.max_nested_calls, DEFAULT_MAX_NESTED_CALLS);
        assert!(!config.trace_execution);
        assert!(config.load_module.is_none());
    }

    #[test]
    fn test_builder() {
        let mut config = Config::new()
            .stack_capacity(128)
            .max_frames(0)
            .max_nested_calls(0)
            .trace_execution(true)
            .load_module(|name| (name == "util").then(|| "var x = 1;".to_string()));
        assert_eq!(config.stack_capacity, 128);
        assert_eq!(config.max_frames, 1);
        assert_eq!(config.max_nested_calls, 1);
        assert!(config.trace_execution);

        let load = config.load_module.as_mut().unwrap();
        assert_eq!(load("util").as_deref(), Some("var x = 1;"));
        assert_eq!(load("other"), None);
    }
}
