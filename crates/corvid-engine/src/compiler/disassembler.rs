//! Human-readable rendering of chunks and stack state.
//!
//! Pure diagnostics: nothing here affects execution.

use std::fmt::Write;
use std::rc::Rc;

use super::chunk::{Chunk, OpCode};
use crate::runtime::{Function, Value};

/// Renders a function's chunk, followed by every function nested in its
/// constant pool.
pub fn disassemble_function(function: &Function, module_names: &[Rc<str>]) -> String {
    let name = match &function.name {
        Some(name) => name.to_string(),
        None => "<script>".to_string(),
    };
    let mut out = disassemble_chunk(&function.chunk, &name, module_names);
    for constant in &function.chunk.constants {
        if let Value::Function(nested) = constant {
            out.push('\n');
            out.push_str(&disassemble_function(nested, module_names));
        }
    }
    out
}

/// Renders every instruction of a chunk under a `== name ==` header.
pub fn disassemble_chunk(chunk: &Chunk, name: &str, module_names: &[Rc<str>]) -> String {
    let mut out = format!("== {} ==\n", name);
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset, module_names, &mut out);
    }
    out
}

/// Renders the instruction at `offset` as one line and returns the offset of
/// the next instruction.
pub fn disassemble_instruction(
    chunk: &Chunk,
    offset: usize,
    module_names: &[Rc<str>],
    out: &mut String,
) -> usize {
    let _ = write!(out, "{:04} ", offset);
    let line = chunk.line_at(offset);
    if offset > 0 && line == chunk.line_at(offset - 1) {
        out.push_str("   | ");
    } else {
        let _ = write!(out, "{:4} ", line);
    }

    let Some(op) = OpCode::from_byte(chunk.code[offset]) else {
        let _ = writeln!(out, "Unknown opcode {}", chunk.code[offset]);
        return offset + 1;
    };
    if offset + op.operand_width() >= chunk.code.len() && op.operand_width() > 0 {
        let _ = writeln!(out, "{} <truncated>", op.name());
        return chunk.code.len();
    }

    match op {
        OpCode::Constant => {
            let index = chunk.code[offset + 1] as usize;
            constant_line(out, op, index, chunk);
        }
        OpCode::ConstantLong => {
            let index = chunk.read_u16(offset + 1) as usize;
            constant_line(out, op, index, chunk);
        }
        OpCode::GetLocal | OpCode::SetLocal | OpCode::Call => {
            let _ = writeln!(out, "{:<16} {:4}", op.name(), chunk.code[offset + 1]);
        }
        OpCode::GetModule | OpCode::SetModule | OpCode::DefineModule => {
            let slot = chunk.read_u16(offset + 1);
            let name = module_names.get(slot as usize).map_or("?", |n| &**n);
            let _ = writeln!(out, "{:<16} {:4} '{}'", op.name(), slot, name);
        }
        OpCode::Jump | OpCode::JumpIfFalse => {
            let target = offset + 3 + chunk.read_u16(offset + 1) as usize;
            let _ = writeln!(out, "{:<16} {:4} -> {}", op.name(), offset, target);
        }
        OpCode::Loop => {
            let target = (offset + 3).saturating_sub(chunk.read_u16(offset + 1) as usize);
            let _ = writeln!(out, "{:<16} {:4} -> {}", op.name(), offset, target);
        }
        OpCode::Invoke => {
            let index = chunk.read_u16(offset + 1) as usize;
            let argc = chunk.code[offset + 3];
            let _ = writeln!(
                out,
                "{:<16} ({} args) {:4} '{}'",
                op.name(),
                argc,
                index,
                constant_text(chunk, index)
            );
        }
        OpCode::Class
        | OpCode::Method
        | OpCode::StaticMethod
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::ImportModule => {
            let index = chunk.read_u16(offset + 1) as usize;
            constant_line(out, op, index, chunk);
        }
        _ => {
            let _ = writeln!(out, "{}", op.name());
        }
    }

    offset + 1 + op.operand_width()
}

/// Renders stack contents as `[ a ][ b ]`.
pub fn render_stack(stack: &[Value]) -> String {
    let mut out = String::from("          ");
    for value in stack {
        let _ = write!(out, "[ {} ]", value);
    }
    out
}

fn constant_text(chunk: &Chunk, index: usize) -> String {
    chunk
        .constants
        .get(index)
        .map_or_else(|| "<bad constant>".to_string(), Value::to_string)
}

fn constant_line(out: &mut String, op: OpCode, index: usize, chunk: &Chunk) {
    let _ = writeln!(out, "{:<16} {:4} '{}'", op.name(), index, constant_text(chunk, index));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::runtime::{Module, ModuleId};

    fn listing(source: &str) -> String {
        let mut module = Module::new("main");
        let function = compile(source, &mut module, ModuleId(1), false).unwrap();
        disassemble_function(&function, module.variable_names())
    }

    #[test]
    fn test_constant_and_line_markers() {
        let mut chunk = Chunk::new();
        let index = chunk.add_constant(Value::Double(1.5)).unwrap();
        chunk.write_op(OpCode::Constant, 7);
        chunk.write(index as u8, 7);
        chunk.write_op(OpCode::Print, 7);
        chunk.write_op(OpCode::Return, 8);

        let text = disassemble_chunk(&chunk, "test", &[]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "== test ==");
        assert!(lines[1].starts_with("0000    7 CONSTANT"));
        assert!(lines[1].ends_with("'1.5'"));
        assert_eq!(lines[2], "0002    | PRINT");
        assert_eq!(lines[3], "0003    8 RETURN");
    }

    #[test]
    fn test_module_variable_names() {
        let text = listing("var answer = 42;");
        assert!(text.contains("DEFINE_MODULE"));
        assert!(text.contains("'answer'"));
    }

    #[test]
    fn test_jump_targets() {
        let text = listing("if (true) print 1;");
        assert!(text.contains("JUMP_IF_FALSE"));
        assert!(text.contains("->"));
    }

    #[test]
    fn test_nested_functions_are_listed() {
        let text = listing("fun area(w, h) { return w * h; }");
        assert!(text.contains("== <script> =="));
        assert!(text.contains("== area =="));
        assert!(text.contains("MULTIPLY"));
    }

    #[test]
    fn test_invoke_operands() {
        let text = listing("var a = [1];");
        assert!(text.contains("INVOKE"));
        assert!(text.contains("(1 args)"));
        assert!(text.contains("'push'"));
    }

    #[test]
    fn test_render_stack() {
        let stack = vec![Value::Double(1.0), Value::from("two"), Value::Null];
        assert_eq!(render_stack(&stack).trim_start(), "[ 1 ][ two ][ null ]");
    }
}
