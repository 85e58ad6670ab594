// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! corvid - command-line runner and REPL for the Corvid scripting language
//!
//! ## Features
//!
//! - Run a script file, with `import`ed modules loaded from its directory
//! - Evaluate a snippet with `-e`
//! - Interactive REPL with highlighting and history
//! - Bytecode listings and per-instruction tracing for debugging

mod repl;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use corvid_engine::compiler::disassembler::disassemble_function;
use corvid_engine::{Config, Engine, Error, ErrorKind, InterpretResult, MAIN_MODULE, Value};
use owo_colors::OwoColorize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// File extension of Corvid modules on disk.
const MODULE_EXTENSION: &str = "crv";

/// Exit status for a script that failed to compile.
const EXIT_COMPILE_ERROR: u8 = 65;

/// Exit status for a script that faulted while running.
const EXIT_RUNTIME_ERROR: u8 = 70;

#[derive(Parser, Debug)]
#[command(
    name = "corvid",
    about = "Runner and REPL for the Corvid scripting language",
    version,
    author = "Pegasus Heavy Industries"
)]
struct Cli {
    /// Script file to execute
    script: Option<PathBuf>,

    /// Evaluate code from the command line and print its value
    #[arg(short = 'e', long = "eval")]
    eval: Option<String>,

    /// Start the interactive REPL
    #[arg(short = 'i', long = "interactive", alias = "repl")]
    interactive: bool,

    /// Print the compiled bytecode instead of running it
    #[arg(long)]
    disassemble: bool,

    /// Log the stack and every instruction as it executes
    #[arg(long)]
    trace: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli);

    let module_dir = cli
        .script
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let config = Config::new()
        .load_module(module_loader(module_dir))
        .report_error(report_error)
        .trace_execution(cli.trace);
    let mut engine = Engine::with_config(config);

    if let Some(code) = &cli.eval {
        if cli.disassemble {
            return disassemble(&mut engine, code);
        }
        return Ok(eval_and_print(&mut engine, code));
    }

    if let Some(path) = &cli.script {
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        debug!(path = %path.display(), bytes = source.len(), "read script");
        if cli.disassemble {
            return disassemble(&mut engine, &source);
        }
        let status = engine.run(&source);
        if !cli.interactive {
            return Ok(exit_code(status));
        }
    }

    let mut repl = repl::Repl::new(engine).context("failed to initialize REPL")?;
    repl.run()?;
    Ok(ExitCode::SUCCESS)
}

fn init_logging(cli: &Cli) {
    let default = if cli.trace {
        "corvid=debug,corvid_engine=trace"
    } else if cli.verbose {
        "corvid=debug,corvid_engine=debug"
    } else {
        "corvid=warn,corvid_engine=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves `import "name"` to `<dir>/name.crv`.
fn module_loader(dir: PathBuf) -> impl FnMut(&str) -> Option<String> {
    move |name| {
        let path = dir.join(name).with_extension(MODULE_EXTENSION);
        match std::fs::read_to_string(&path) {
            Ok(source) => {
                debug!(module = name, path = %path.display(), "loaded module source");
                Some(source)
            }
            Err(err) => {
                debug!(module = name, path = %path.display(), error = %err, "module source unavailable");
                None
            }
        }
    }
}

fn report_error(kind: ErrorKind, module: &str, line: usize, message: &str) {
    debug!(?kind, module, line, "reported error");
    let label = match kind {
        ErrorKind::Compile => "Compile error",
        ErrorKind::Runtime => "Runtime error",
        ErrorKind::Other => "Error",
    };
    eprintln!("{}: {}", label.red().bold(), message);
}

fn eval_and_print(engine: &mut Engine, code: &str) -> ExitCode {
    match engine.eval(code) {
        Ok(Value::Null) => ExitCode::SUCCESS,
        Ok(value) => {
            println!("{}", value);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}: {}", "Error".red().bold(), describe(&err));
            match err {
                Error::Compile(_) => ExitCode::from(EXIT_COMPILE_ERROR),
                _ => ExitCode::from(EXIT_RUNTIME_ERROR),
            }
        }
    }
}

fn disassemble(engine: &mut Engine, source: &str) -> anyhow::Result<ExitCode> {
    let function = match engine.compile(MAIN_MODULE, source) {
        Ok(function) => function,
        Err(err) => {
            eprintln!("{}: {}", "Compile error".red().bold(), describe(&err));
            return Ok(ExitCode::from(EXIT_COMPILE_ERROR));
        }
    };
    let vm = engine.vm();
    let module = vm
        .module_id(MAIN_MODULE)
        .and_then(|id| vm.module(id))
        .context("main module missing after compilation")?;
    print!("{}", disassemble_function(&function, module.variable_names()));
    Ok(ExitCode::SUCCESS)
}

/// Full text of an error, including the stack trace of a runtime error.
pub(crate) fn describe(err: &Error) -> String {
    match err {
        Error::Runtime(err) => err.report(),
        other => other.to_string(),
    }
}

fn exit_code(status: InterpretResult) -> ExitCode {
    match status {
        InterpretResult::Success => ExitCode::SUCCESS,
        InterpretResult::CompileError => ExitCode::from(EXIT_COMPILE_ERROR),
        InterpretResult::RuntimeError => ExitCode::from(EXIT_RUNTIME_ERROR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from(["corvid", "-e", "1 + 2", "--verbose"]).unwrap();
        assert_eq!(cli.eval.as_deref(), Some("1 + 2"));
        assert!(cli.verbose);
        assert!(cli.script.is_none());

        let cli = Cli::try_parse_from(["corvid", "main.crv", "--disassemble", "--trace"]).unwrap();
        assert_eq!(cli.script, Some(PathBuf::from("main.crv")));
        assert!(cli.disassemble);
        assert!(cli.trace);
    }

    #[test]
    fn test_module_loader_reads_sibling_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("util.crv"), "var x = 1;").unwrap();

        let mut load = module_loader(dir.path().to_path_buf());
        assert_eq!(load("util").as_deref(), Some("var x = 1;"));
        assert_eq!(load("missing"), None);
    }

    #[test]
    fn test_engine_imports_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("shapes.crv"), "fun area(w, h) { return w * h; }").unwrap();

        let config = Config::new().load_module(module_loader(dir.path().to_path_buf()));
        let mut engine = Engine::with_config(config);
        let value = engine
            .eval("import \"shapes\" for area; area(3, 4)")
            .unwrap();
        assert_eq!(value, Value::Double(12.0));
    }

    #[test]
    fn test_exit_codes() {
        let debug = |code: ExitCode| format!("{:?}", code);
        assert_eq!(debug(exit_code(InterpretResult::Success)), debug(ExitCode::SUCCESS));
        assert_eq!(
            debug(exit_code(InterpretResult::CompileError)),
            debug(ExitCode::from(EXIT_COMPILE_ERROR))
        );
        assert_eq!(
            debug(exit_code(InterpretResult::RuntimeError)),
            debug(ExitCode::from(EXIT_RUNTIME_ERROR))
        );
    }

    #[test]
    fn test_describe_runtime_error_includes_trace() {
        let mut engine = Engine::with_config(Config::new().write(|_| {}));
        let err = engine.eval("fun f() { return -null; }\nf()").unwrap_err();
        assert_eq!(
            describe(&err),
            "Operand must be a number.\n[line 1] in f()\n[line 2] in script"
        );
    }
}
