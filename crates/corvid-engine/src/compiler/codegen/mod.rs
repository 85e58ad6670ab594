//! Single-pass bytecode generation.
//!
//! The compiler walks the token vector once with a Pratt parser and writes
//! bytecode as it goes; there is no syntax tree. Top-level variables become
//! indexed slots of the module being compiled, everything inside a block or
//! function becomes a stack slot of the enclosing function.

mod rules;
mod scope;


use std::rc::Rc;

use tracing::debug;

use self::rules::{ParseFn, Precedence, rule};
use self::scope::{Scope, ScopeError};
use super::chunk::{Chunk, ChunkLimit, JumpPatch, OpCode};
use super::CompileError;
use crate::lexer::{Scanner, Token, TokenKind};
use crate::runtime::{Function, Module, ModuleId, Value};

type CompileResult<T = ()> = Result<T, CompileError>;

/// Slot of the builtin `Array` class in every module.
const ARRAY_SLOT: u16 = 0;

/// Deepest nesting of expressions and statements the parser will recurse into.
const MAX_NESTING_DEPTH: usize = 256;

/// Compiles `source` into the body function of `module`.
///
/// In evaluation mode the value of a trailing top-level expression statement
/// becomes the body's return value, and that statement's `;` is optional.
pub fn compile(
    source: &str,
    module: &mut Module,
    module_id: ModuleId,
    eval: bool,
) -> Result<Function, CompileError> {
    let module_name = Rc::clone(module.name());
    let tokens = Scanner::new(source).scan_tokens().map_err(|err| CompileError {
        module: module_name.to_string(),
        line: err.line,
        lexeme: None,
        at_end: false,
        message: err.message,
    })?;

    let compiler = Compiler::new(source, tokens, module, module_id, eval);
    let function = compiler.compile_script()?;
    debug!(
        module = %module_name,
        bytes = function.chunk.code.len(),
        constants = function.chunk.constants.len(),
        "compiled module body"
    );
    Ok(function)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
    StaticMethod,
}

impl FunctionKind {
    fn has_receiver(self) -> bool {
        matches!(
            self,
            FunctionKind::Method | FunctionKind::Initializer | FunctionKind::StaticMethod
        )
    }
}

struct FunctionState {
    name: Option<Rc<str>>,
    kind: FunctionKind,
    arity: u8,
    chunk: Chunk,
    scope: Scope,
}

impl FunctionState {
    fn new(name: Option<Rc<str>>, kind: FunctionKind) -> Self {
        let mut scope = Scope::new();
        scope.reserve(if kind.has_receiver() { "this" } else { "" });
        Self {
            name,
            kind,
            arity: 0,
            chunk: Chunk::new(),
            scope,
        }
    }
}

/// Where a declared name will live.
enum Binding {
    Module(u16),
    Local,
}

/// How a resolved name is read and written.
enum VarRef {
    Module(u16),
    Local(u8),
}

struct Compiler<'src, 'm> {
    source: &'src str,
    tokens: Vec<Token>,
    current: usize,
    module: &'m mut Module,
    module_id: ModuleId,
    functions: Vec<FunctionState>,
    eval: bool,
    depth: usize,
}

impl<'src, 'm> Compiler<'src, 'm> {
    fn new(
        source: &'src str,
        tokens: Vec<Token>,
        module: &'m mut Module,
        module_id: ModuleId,
        eval: bool,
    ) -> Self {
        Self {
            source,
            tokens,
            current: 0,
            module,
            module_id,
            functions: vec![FunctionState::new(None, FunctionKind::Script)],
            eval,
            depth: 0,
        }
    }

    fn compile_script(mut self) -> CompileResult<Function> {
        let mut pending_pop: Option<usize> = None;

        while !self.check(&TokenKind::Eof) {
            if let Some(line) = pending_pop.take() {
                self.chunk().write_op(OpCode::Pop, line);
            }
            if self.eval && self.starts_expression_statement() {
                self.expression()?;
                let line = self.previous().line;
                if !self.match_token(&TokenKind::Semicolon) && !self.check(&TokenKind::Eof) {
                    return Err(self.error_at_current("Expect ';' after expression."));
                }
                pending_pop = Some(line);
            } else {
                self.declaration()?;
            }
        }

        if pending_pop.is_some() {
            self.emit_op(OpCode::Return);
        } else {
            self.emit_return();
        }
        let state = self.functions.pop().ok_or_else(|| self.error("Unbalanced function nesting."))?;
        Ok(Function::new(None, 0, state.chunk, self.module_id))
    }

    // ========================================================================
    // Token handling
    // ========================================================================

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn advance(&mut self) {
        if self.peek().kind != TokenKind::Eof {
            self.current += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: &TokenKind, message: &str) -> CompileResult {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_at_current(message))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> CompileResult<Rc<str>> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = Rc::from(name.as_str());
                self.advance();
                Ok(name)
            }
            _ => Err(self.error_at_current(message)),
        }
    }

    fn starts_expression_statement(&self) -> bool {
        let kind = &self.peek().kind;
        !kind.starts_statement() && *kind != TokenKind::LeftBrace
    }

    // ========================================================================
    // Errors
    // ========================================================================

    fn error_at(&self, token: &Token, message: &str) -> CompileError {
        let at_end = token.kind == TokenKind::Eof;
        CompileError {
            module: self.module.name().to_string(),
            line: token.line,
            lexeme: (!at_end).then(|| token.lexeme(self.source).to_string()),
            at_end,
            message: message.to_string(),
        }
    }

    fn error(&self, message: &str) -> CompileError {
        self.error_at(self.previous(), message)
    }

    fn error_at_current(&self, message: &str) -> CompileError {
        self.error_at(self.peek(), message)
    }

    fn limit(&self, limit: ChunkLimit) -> CompileError {
        self.error(&limit.to_string())
    }

    fn scope_error(&self, err: ScopeError) -> CompileError {
        self.error(&err.to_string())
    }

    // ========================================================================
    // Emission
    // ========================================================================

    fn state(&mut self) -> &mut FunctionState {
        let last = self.functions.len() - 1;
        &mut self.functions[last]
    }

    fn state_ref(&self) -> &FunctionState {
        &self.functions[self.functions.len() - 1]
    }

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.state().chunk
    }

    fn line(&self) -> usize {
        self.previous().line
    }

    fn emit_op(&mut self, op: OpCode) {
        let line = self.line();
        self.chunk().write_op(op, line);
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.line();
        self.chunk().write(byte, line);
    }

    fn emit_op_u16(&mut self, op: OpCode, operand: u16) {
        let line = self.line();
        let chunk = self.chunk();
        chunk.write_op(op, line);
        chunk.write_u16(operand, line);
    }

    fn emit_op_u8(&mut self, op: OpCode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    fn emit_return(&mut self) {
        if self.state_ref().kind == FunctionKind::Initializer {
            self.emit_op_u8(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Null);
        }
        self.emit_op(OpCode::Return);
    }

    fn emit_jump(&mut self, op: OpCode) -> JumpPatch {
        let line = self.line();
        self.chunk().emit_jump(op, line)
    }

    fn patch_jump(&mut self, patch: JumpPatch) -> CompileResult {
        self.chunk().patch_jump(patch).map_err(|e| self.limit(e))
    }

    fn emit_loop(&mut self, loop_start: usize) -> CompileResult {
        let line = self.line();
        self.chunk().emit_loop(loop_start, line).map_err(|e| self.limit(e))
    }

    fn make_constant(&mut self, value: Value) -> CompileResult<usize> {
        self.chunk().add_constant(value).map_err(|e| self.limit(e))
    }

    fn emit_constant(&mut self, value: Value) -> CompileResult {
        let index = self.make_constant(value)?;
        match u8::try_from(index) {
            Ok(short) => self.emit_op_u8(OpCode::Constant, short),
            // add_constant never hands out an index above u16::MAX
            Err(_) => self.emit_op_u16(OpCode::ConstantLong, index as u16),
        }
        Ok(())
    }

    fn name_constant(&mut self, name: &str) -> CompileResult<u16> {
        let index = self.make_constant(Value::from(name))?;
        Ok(index as u16)
    }

    // ========================================================================
    // Variables
    // ========================================================================

    fn at_module_level(&self) -> bool {
        let state = self.state_ref();
        state.kind == FunctionKind::Script && state.scope.depth == 0
    }

    fn module_slot(&mut self, name: &str) -> CompileResult<u16> {
        self.module
            .declare(name)
            .ok_or_else(|| self.error("Too many module variables."))
    }

    /// Array literals construct through slot 0, so it must keep the builtin.
    fn check_writable(&self, slot: u16) -> CompileResult {
        if slot == ARRAY_SLOT && self.module.variable_name(slot) == Some("Array") {
            return Err(self.error("Can't redefine the builtin 'Array'."));
        }
        Ok(())
    }

    /// Declares `name` in the current scope; the value must be pushed next.
    fn declare_variable(&mut self, name: Rc<str>) -> CompileResult<Binding> {
        if self.at_module_level() {
            let slot = self.module_slot(&name)?;
            self.check_writable(slot)?;
            return Ok(Binding::Module(slot));
        }
        self.state()
            .scope
            .declare(name)
            .map_err(|e| self.scope_error(e))?;
        Ok(Binding::Local)
    }

    /// Binds the value on top of the stack to a declared name.
    fn define_variable(&mut self, binding: Binding) {
        match binding {
            Binding::Module(slot) => self.emit_op_u16(OpCode::DefineModule, slot),
            Binding::Local => self.state().scope.mark_initialized(),
        }
    }

    fn resolve_variable(&mut self, name: &str) -> CompileResult<VarRef> {
        let found = self
            .state_ref()
            .scope
            .resolve(name)
            .map_err(|e| self.scope_error(e))?;
        if let Some(slot) = found {
            return Ok(VarRef::Local(slot));
        }

        let enclosing = &self.functions[..self.functions.len() - 1];
        if enclosing.iter().any(|state| state.scope.contains(name)) {
            return Err(self.error(&format!(
                "Cannot capture local variable '{}'; closures are not supported.",
                name
            )));
        }

        Ok(VarRef::Module(self.module_slot(name)?))
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) -> CompileResult {
        let var = self.resolve_variable(name)?;
        let assign = can_assign && self.match_token(&TokenKind::Equal);
        if assign {
            if let VarRef::Module(slot) = &var {
                self.check_writable(*slot)?;
            }
            self.expression()?;
        }
        match (var, assign) {
            (VarRef::Local(slot), false) => self.emit_op_u8(OpCode::GetLocal, slot),
            (VarRef::Local(slot), true) => self.emit_op_u8(OpCode::SetLocal, slot),
            (VarRef::Module(slot), false) => self.emit_op_u16(OpCode::GetModule, slot),
            (VarRef::Module(slot), true) => self.emit_op_u16(OpCode::SetModule, slot),
        }
        Ok(())
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    /// Runs `parse` one nesting level deeper, failing past the depth limit.
    fn nested(&mut self, message: &str, parse: impl FnOnce(&mut Self) -> CompileResult) -> CompileResult {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error_at_current(message));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn declaration(&mut self) -> CompileResult {
        self.nested("Code nested too deeply.", Self::declaration_body)
    }

    fn declaration_body(&mut self) -> CompileResult {
        if self.match_token(&TokenKind::Class) {
            self.class_declaration()
        } else if self.match_token(&TokenKind::Fun) {
            self.fun_declaration()
        } else if self.match_token(&TokenKind::Var) {
            self.var_declaration()
        } else if self.match_token(&TokenKind::Import) {
            self.import_declaration()
        } else {
            self.statement()
        }
    }

    fn class_declaration(&mut self) -> CompileResult {
        let name = self.consume_identifier("Expect class name.")?;
        let name_constant = self.name_constant(&name)?;
        let binding = self.declare_variable(Rc::clone(&name))?;

        self.emit_op_u16(OpCode::Class, name_constant);
        self.define_variable(binding);

        // Load the class back so methods can attach to it.
        self.named_variable(&name, false)?;
        self.consume(&TokenKind::LeftBrace, "Expect '{' before class body.")?;
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            self.method()?;
        }
        self.consume(&TokenKind::RightBrace, "Expect '}' after class body.")?;
        self.emit_op(OpCode::Pop);
        Ok(())
    }

    fn method(&mut self) -> CompileResult {
        let is_static = self.match_token(&TokenKind::Static);
        let name = self.consume_identifier("Expect method name.")?;
        let name_constant = self.name_constant(&name)?;

        let kind = if is_static {
            FunctionKind::StaticMethod
        } else if &*name == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(name, kind)?;

        let op = if is_static {
            OpCode::StaticMethod
        } else {
            OpCode::Method
        };
        self.emit_op_u16(op, name_constant);
        Ok(())
    }

    fn fun_declaration(&mut self) -> CompileResult {
        let name = self.consume_identifier("Expect function name.")?;
        let binding = self.declare_variable(Rc::clone(&name))?;
        self.function(name, FunctionKind::Function)?;
        self.define_variable(binding);
        Ok(())
    }

    fn function(&mut self, name: Rc<str>, kind: FunctionKind) -> CompileResult {
        self.functions.push(FunctionState::new(Some(name), kind));
        self.state().scope.begin_scope();

        self.consume(&TokenKind::LeftParen, "Expect '(' after function name.")?;
        if !self.check(&TokenKind::RightParen) {
            loop {
                if self.state_ref().arity == u8::MAX {
                    return Err(self.error_at_current("Can't have more than 255 parameters."));
                }
                self.state().arity += 1;
                let param = self.consume_identifier("Expect parameter name.")?;
                self.state()
                    .scope
                    .declare(param)
                    .map_err(|e| self.scope_error(e))?;
                self.state().scope.mark_initialized();
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "Expect ')' after parameters.")?;
        self.consume(&TokenKind::LeftBrace, "Expect '{' before function body.")?;
        self.block()?;
        self.emit_return();

        let state = self
            .functions
            .pop()
            .ok_or_else(|| self.error("Unbalanced function nesting."))?;
        let function = Function::new(state.name, state.arity, state.chunk, self.module_id);
        self.emit_constant(Value::Function(Rc::new(function)))
    }

    fn var_declaration(&mut self) -> CompileResult {
        let name = self.consume_identifier("Expect variable name.")?;
        let binding = self.declare_variable(name)?;

        if self.match_token(&TokenKind::Equal) {
            self.expression()?;
        } else {
            self.emit_op(OpCode::Null);
        }
        self.consume(&TokenKind::Semicolon, "Expect ';' after variable declaration.")?;
        self.define_variable(binding);
        Ok(())
    }

    fn import_declaration(&mut self) -> CompileResult {
        let module_name = match &self.peek().kind {
            TokenKind::String(name) => name.clone(),
            _ => return Err(self.error_at_current("Expect module name string after 'import'.")),
        };
        self.advance();
        let module_constant = self.name_constant(&module_name)?;

        // Loads the module on first import; the body's result is discarded.
        self.emit_op_u16(OpCode::ImportModule, module_constant);
        self.emit_op(OpCode::Pop);

        if self.match_token(&TokenKind::As) {
            let alias = self.consume_identifier("Expect name after 'as'.")?;
            let binding = self.declare_variable(alias)?;
            self.emit_op_u16(OpCode::ImportModule, module_constant);
            self.define_variable(binding);
        }

        if self.match_token(&TokenKind::For) {
            loop {
                let name = self.consume_identifier("Expect variable name to import.")?;
                let name_constant = self.name_constant(&name)?;
                let binding = self.declare_variable(name)?;
                self.emit_op_u16(OpCode::ImportModule, module_constant);
                self.emit_op_u16(OpCode::GetProperty, name_constant);
                self.define_variable(binding);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(&TokenKind::Semicolon, "Expect ';' after import.")
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn statement(&mut self) -> CompileResult {
        self.nested("Code nested too deeply.", Self::statement_body)
    }

    fn statement_body(&mut self) -> CompileResult {
        if self.match_token(&TokenKind::Print) {
            self.print_statement()
        } else if self.match_token(&TokenKind::If) {
            self.if_statement()
        } else if self.match_token(&TokenKind::While) {
            self.while_statement()
        } else if self.match_token(&TokenKind::For) {
            self.for_statement()
        } else if self.match_token(&TokenKind::Return) {
            self.return_statement()
        } else if self.match_token(&TokenKind::LeftBrace) {
            self.state().scope.begin_scope();
            self.block()?;
            self.end_scope();
            Ok(())
        } else {
            self.expression_statement()
        }
    }

    fn block(&mut self) -> CompileResult {
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            self.declaration()?;
        }
        self.consume(&TokenKind::RightBrace, "Expect '}' after block.")
    }

    fn end_scope(&mut self) {
        let count = self.state().scope.end_scope();
        for _ in 0..count {
            self.emit_op(OpCode::Pop);
        }
    }

    fn print_statement(&mut self) -> CompileResult {
        self.expression()?;
        self.consume(&TokenKind::Semicolon, "Expect ';' after value.")?;
        self.emit_op(OpCode::Print);
        Ok(())
    }

    fn expression_statement(&mut self) -> CompileResult {
        self.expression()?;
        self.consume(&TokenKind::Semicolon, "Expect ';' after expression.")?;
        self.emit_op(OpCode::Pop);
        Ok(())
    }

    fn if_statement(&mut self) -> CompileResult {
        self.consume(&TokenKind::LeftParen, "Expect '(' after 'if'.")?;
        self.expression()?;
        self.consume(&TokenKind::RightParen, "Expect ')' after condition.")?;

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement()?;

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump)?;
        self.emit_op(OpCode::Pop);

        if self.match_token(&TokenKind::Else) {
            self.statement()?;
        }
        self.patch_jump(else_jump)
    }

    fn while_statement(&mut self) -> CompileResult {
        let loop_start = self.chunk().code.len();
        self.consume(&TokenKind::LeftParen, "Expect '(' after 'while'.")?;
        self.expression()?;
        self.consume(&TokenKind::RightParen, "Expect ')' after condition.")?;

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement()?;
        self.emit_loop(loop_start)?;

        self.patch_jump(exit_jump)?;
        self.emit_op(OpCode::Pop);
        Ok(())
    }

    fn for_statement(&mut self) -> CompileResult {
        self.state().scope.begin_scope();
        self.consume(&TokenKind::LeftParen, "Expect '(' after 'for'.")?;

        if self.match_token(&TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_token(&TokenKind::Var) {
            self.var_declaration()?;
        } else {
            self.expression_statement()?;
        }

        let mut loop_start = self.chunk().code.len();
        let mut exit_jump = None;
        if !self.match_token(&TokenKind::Semicolon) {
            self.expression()?;
            self.consume(&TokenKind::Semicolon, "Expect ';' after loop condition.")?;
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(&TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk().code.len();
            self.expression()?;
            self.emit_op(OpCode::Pop);
            self.consume(&TokenKind::RightParen, "Expect ')' after for clauses.")?;

            self.emit_loop(loop_start)?;
            loop_start = increment_start;
            self.patch_jump(body_jump)?;
        }

        self.statement()?;
        self.emit_loop(loop_start)?;

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump)?;
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
        Ok(())
    }

    fn return_statement(&mut self) -> CompileResult {
        if self.match_token(&TokenKind::Semicolon) {
            self.emit_return();
            return Ok(());
        }
        if self.state_ref().kind == FunctionKind::Initializer {
            return Err(self.error("Can't return a value from an initializer."));
        }
        self.expression()?;
        self.consume(&TokenKind::Semicolon, "Expect ';' after return value.")?;
        self.emit_op(OpCode::Return);
        Ok(())
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn expression(&mut self) -> CompileResult {
        self.parse_precedence(Precedence::Assignment)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> CompileResult {
        self.nested("Expression nested too deeply.", |this| this.parse_operators(precedence))
    }

    fn parse_operators(&mut self, precedence: Precedence) -> CompileResult {
        self.advance();
        let Some(prefix) = rule(&self.previous().kind).prefix else {
            return Err(self.error("Expect expression."));
        };

        let can_assign = precedence <= Precedence::Assignment;
        self.apply(prefix, can_assign)?;

        while precedence <= rule(&self.peek().kind).precedence {
            self.advance();
            if let Some(infix) = rule(&self.previous().kind).infix {
                self.apply(infix, can_assign)?;
            }
        }

        if can_assign && self.check(&TokenKind::Equal) {
            return Err(self.error_at_current("Invalid assignment target."));
        }
        Ok(())
    }

    fn apply(&mut self, parse_fn: ParseFn, can_assign: bool) -> CompileResult {
        match parse_fn {
            ParseFn::Grouping => self.grouping(),
            ParseFn::ArrayLiteral => self.array_literal(),
            ParseFn::Unary => self.unary(),
            ParseFn::Number => self.number(),
            ParseFn::String => self.string(),
            ParseFn::Literal => self.literal(),
            ParseFn::Variable => self.variable(can_assign),
            ParseFn::This => self.this(),
            ParseFn::Binary => self.binary(),
            ParseFn::And => self.and(),
            ParseFn::Or => self.or(),
            ParseFn::Call => self.call(),
            ParseFn::Dot => self.dot(can_assign),
            ParseFn::Subscript => self.subscript(can_assign),
        }
    }

    fn grouping(&mut self) -> CompileResult {
        self.expression()?;
        self.consume(&TokenKind::RightParen, "Expect ')' after expression.")
    }

    fn array_literal(&mut self) -> CompileResult {
        let push = self.name_constant("push")?;
        self.emit_op_u16(OpCode::GetModule, ARRAY_SLOT);
        self.emit_op_u8(OpCode::Call, 0);

        if !self.check(&TokenKind::RightBracket) {
            loop {
                self.expression()?;
                self.emit_op_u16(OpCode::Invoke, push);
                self.emit_byte(1);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightBracket, "Expect ']' after array elements.")
    }

    fn unary(&mut self) -> CompileResult {
        let operator = self.previous().kind.clone();
        self.parse_precedence(Precedence::Unary)?;
        match operator {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => return Err(self.error("Unknown unary operator.")),
        }
        Ok(())
    }

    fn binary(&mut self) -> CompileResult {
        let operator = self.previous().kind.clone();
        self.parse_precedence(rule(&operator).precedence.next())?;

        match operator {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::Percent => self.emit_op(OpCode::Modulo),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            _ => return Err(self.error("Unknown binary operator.")),
        }
        Ok(())
    }

    fn number(&mut self) -> CompileResult {
        match self.previous().kind {
            TokenKind::Number(n) => self.emit_constant(Value::Double(n)),
            _ => Err(self.error("Expect number.")),
        }
    }

    fn string(&mut self) -> CompileResult {
        match &self.previous().kind {
            TokenKind::String(s) => {
                let value = Value::from(s.as_str());
                self.emit_constant(value)
            }
            _ => Err(self.error("Expect string.")),
        }
    }

    fn literal(&mut self) -> CompileResult {
        match self.previous().kind {
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Null => self.emit_op(OpCode::Null),
            _ => return Err(self.error("Expect literal.")),
        }
        Ok(())
    }

    fn variable(&mut self, can_assign: bool) -> CompileResult {
        let name = match &self.previous().kind {
            TokenKind::Identifier(name) => name.clone(),
            _ => return Err(self.error("Expect variable name.")),
        };
        self.named_variable(&name, can_assign)
    }

    fn this(&mut self) -> CompileResult {
        if self.state_ref().kind.has_receiver() {
            self.emit_op_u8(OpCode::GetLocal, 0);
            return Ok(());
        }
        let in_method = self.functions.iter().any(|state| state.kind.has_receiver());
        if in_method {
            Err(self.error("Cannot capture local variable 'this'; closures are not supported."))
        } else {
            Err(self.error("Can't use 'this' outside of a class."))
        }
    }

    fn and(&mut self) -> CompileResult {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And)?;
        self.patch_jump(end_jump)
    }

    fn or(&mut self) -> CompileResult {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump)?;
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or)?;
        self.patch_jump(end_jump)
    }

    fn argument_list(&mut self) -> CompileResult<u8> {
        let mut count: usize = 0;
        if !self.check(&TokenKind::RightParen) {
            loop {
                self.expression()?;
                if count == u8::MAX as usize {
                    return Err(self.error("Can't have more than 255 arguments."));
                }
                count += 1;
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "Expect ')' after arguments.")?;
        Ok(count as u8)
    }

    fn call(&mut self) -> CompileResult {
        let count = self.argument_list()?;
        self.emit_op_u8(OpCode::Call, count);
        Ok(())
    }

    fn dot(&mut self, can_assign: bool) -> CompileResult {
        let name = self.consume_identifier("Expect property name after '.'.")?;
        let name_constant = self.name_constant(&name)?;

        if can_assign && self.match_token(&TokenKind::Equal) {
            self.expression()?;
            self.emit_op_u16(OpCode::SetProperty, name_constant);
        } else if self.match_token(&TokenKind::LeftParen) {
            let count = self.argument_list()?;
            self.emit_op_u16(OpCode::Invoke, name_constant);
            self.emit_byte(count);
        } else {
            self.emit_op_u16(OpCode::GetProperty, name_constant);
        }
        Ok(())
    }

    fn subscript(&mut self, can_assign: bool) -> CompileResult {
        self.expression()?;
        self.consume(&TokenKind::RightBracket, "Expect ']' after index.")?;

        if can_assign && self.match_token(&TokenKind::Equal) {
            self.expression()?;
            self.emit_op(OpCode::SetIndex);
        } else {
            self.emit_op(OpCode::GetIndex);
        }
        Ok(())
    }
}
