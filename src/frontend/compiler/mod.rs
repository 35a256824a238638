// Single-pass Pratt-style compiler (spec §4.2). Grounded on the teacher's
// split between a hand-written scanner and a recursive-descent parser
// (`frontend/parser/mod.rs`), but producing bytecode directly instead of an
// intermediate AST/IR (the teacher's `frontend/ir` stage) — spec §2 names
// this a "single-pass" compiler, so the AST/IR split the teacher's Lua
// front end used is not carried forward; see DESIGN.md.
pub mod error;

use crate::backend::vm::Vm;
use crate::common::chunk::Chunk;
use crate::common::object::{ObjRef, Value};
use crate::common::opcode::{OpCode, UpvalueDesc};
use crate::frontend::lexer::{Scanner, Token, TokenKind};
use error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    BitwiseOr,
    BitwiseXor,
    BitwiseAnd,
    Shift,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::BitwiseOr,
            Precedence::BitwiseOr => Precedence::BitwiseXor,
            Precedence::BitwiseXor => Precedence::BitwiseAnd,
            Precedence::BitwiseAnd => Precedence::Shift,
            Precedence::Shift => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

fn infix_precedence(kind: &TokenKind) -> Precedence {
    match kind {
        TokenKind::Or => Precedence::Or,
        TokenKind::And => Precedence::And,
        TokenKind::EqualEqual | TokenKind::BangEqual => Precedence::Equality,
        TokenKind::Less | TokenKind::LessEqual | TokenKind::Greater | TokenKind::GreaterEqual => {
            Precedence::Comparison
        }
        TokenKind::Pipe => Precedence::BitwiseOr,
        TokenKind::Caret => Precedence::BitwiseXor,
        TokenKind::Amp => Precedence::BitwiseAnd,
        TokenKind::LessLess | TokenKind::GreaterGreater => Precedence::Shift,
        TokenKind::Plus | TokenKind::Minus => Precedence::Term,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Factor,
        TokenKind::LeftParen | TokenKind::Dot | TokenKind::LeftBracket => Precedence::Call,
        _ => Precedence::None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local {
    name: String,
    depth: i32,
    is_captured: bool,
}

struct FunctionScope {
    enclosing: Option<Box<FunctionScope>>,
    chunk: Chunk,
    arity: u8,
    name: Option<String>,
    function_type: FunctionType,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
}

impl FunctionScope {
    fn new(
        enclosing: Option<Box<FunctionScope>>,
        function_type: FunctionType,
        name: Option<String>,
    ) -> Self {
        // Slot 0 aliases the callee (spec §4.3 "Calls"): named `此` for
        // methods/initializers so `this` resolves as an ordinary local,
        // left unnamed (unreachable by any identifier) for plain functions.
        let slot0_name = match function_type {
            FunctionType::Method | FunctionType::Initializer => "此".to_string(),
            _ => String::new(),
        };
        FunctionScope {
            enclosing,
            chunk: Chunk::new(),
            arity: 0,
            name,
            function_type,
            locals: vec![Local { name: slot0_name, depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }

    fn resolve_local(&self, name: &str) -> Option<u8> {
        self.locals.iter().rposition(|l| l.name == name).map(|i| i as u8)
    }

    fn add_upvalue(&mut self, index: u8, is_local: bool) -> u8 {
        for (i, existing) in self.upvalues.iter().enumerate() {
            if existing.index == index && existing.is_local == is_local {
                return i as u8;
            }
        }
        self.upvalues.push(UpvalueDesc { is_local, index });
        (self.upvalues.len() - 1) as u8
    }

    fn resolve_upvalue(&mut self, name: &str) -> Option<u8> {
        let enclosing = self.enclosing.as_mut()?;
        if let Some(slot) = enclosing.resolve_local(name) {
            enclosing.locals[slot as usize].is_captured = true;
            return Some(self.add_upvalue(slot, true));
        }
        if let Some(upvalue) = enclosing.resolve_upvalue(name) {
            return Some(self.add_upvalue(upvalue, false));
        }
        None
    }
}

struct ClassScope {
    enclosing: Option<Box<ClassScope>>,
    has_superclass: bool,
}

/// Which kind of slot a resolved identifier lives in; used by both the
/// get and (possibly compound) set paths for `named_variable` so the two
/// stay in lockstep (spec §4.2 "Globals"/"Upvalues"/"Locals").
enum VarSlot {
    Local(u8),
    Upvalue(u8),
    Global(u8),
}

pub struct Compiler<'a> {
    vm: &'a mut Vm,
    scanner: Scanner,
    source: &'a str,
    previous: Token,
    current: Token,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    scope: Box<FunctionScope>,
    class_scope: Option<Box<ClassScope>>,
    function_roots: Vec<ObjRef>,
    /// Upvalue descriptors recorded by the `FunctionScope` most recently
    /// finished by `finish()`, picked up by `function()` right after to
    /// emit `OP_CLOSURE`'s operand list.
    last_function_upvalues: Vec<UpvalueDesc>,
    /// Set by `prefix_incdec` while it parses the assignable expression
    /// after a leading `++`/`--` (spec §4.2 "assignable expressions"), so
    /// whichever terminal link of the chain — a bare variable, or the last
    /// `.field`/`[index]` — performs the get/bump/set choreography instead
    /// of a plain read. Cleared by whichever link consumes it.
    pending_incdec: Option<OpCode>,
}

/// Compiles `source` into a root function chunk, or `None` if any compile
/// error was reported (spec §4.2 "Returns a null function if any error
/// occurred"). Errors are printed to stderr in the teacher's own
/// eprintln-per-diagnostic style.
pub fn compile(vm: &mut Vm, source: &str) -> Option<ObjRef> {
    let dummy = Token { kind: TokenKind::Eof, lexeme: String::new(), line: 0, byte_offset: 0 };
    let mut compiler = Compiler {
        vm,
        scanner: Scanner::new(source),
        source,
        previous: dummy.clone(),
        current: dummy,
        had_error: false,
        panic_mode: false,
        errors: Vec::new(),
        scope: Box::new(FunctionScope::new(None, FunctionType::Script, None)),
        class_scope: None,
        function_roots: Vec::new(),
        last_function_upvalues: Vec::new(),
        pending_incdec: None,
    };
    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }
    let result = compiler.finish();

    // Every function allocated during compilation (spec §4.2 "Nested
    // function compilation") is kept reachable until the whole source unit
    // has compiled, since intermediate GC cycles only scan the value stack
    // and globals, not constant pools still under construction.
    for root in compiler.function_roots.drain(..) {
        compiler.vm.pop_compiler_root();
        let _ = root;
    }

    if compiler.had_error {
        for err in &compiler.errors {
            eprintln!("{err}");
        }
        return None;
    }
    Some(result)
}

impl<'a> Compiler<'a> {
    // ------------------------------------------------------------------
    // Token stream
    // ------------------------------------------------------------------

    fn advance(&mut self) {
        let dummy = Token { kind: TokenKind::Eof, lexeme: String::new(), line: 0, byte_offset: 0 };
        self.previous = std::mem::replace(&mut self.current, dummy);
        loop {
            self.current = self.scanner.scan_token(self.source);
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.clone();
            self.error_at_current(&message);
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.current.is_kind(kind)
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(&kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.check(&kind) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    fn error_prev(&mut self, message: &str) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.errors.push(CompileError {
            line: token.line,
            lexeme: token.lexeme.clone(),
            message: message.to_string(),
        });
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // ------------------------------------------------------------------
    // Emission helpers
    // ------------------------------------------------------------------

    fn emit(&mut self, op: OpCode) -> usize {
        let line = self.previous.line;
        self.scope.chunk.write(op, line)
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.scope.chunk.add_constant(value) {
            Some(index) => index,
            None => {
                self.error_prev("一个代码块中常量过多");
                0
            }
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let ptr = self.vm.intern(name);
        self.make_constant(Value::Obj(ptr))
    }

    fn emit_jump(&mut self, make_op: impl FnOnce(u16) -> OpCode) -> usize {
        self.emit(make_op(0))
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.scope.chunk.code.len() - offset - 1;
        if jump > u16::MAX as usize {
            self.error_prev("跳转距离过长");
            return;
        }
        let target = jump as u16;
        match &mut self.scope.chunk.code[offset] {
            OpCode::Jump { offset: o } | OpCode::JumpIfFalse { offset: o } => *o = target,
            _ => unreachable!("patch_jump called on a non-jump instruction"),
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let distance = self.scope.chunk.code.len() - loop_start + 1;
        if distance > u16::MAX as usize {
            self.error_prev("循环体过长");
            return;
        }
        self.emit(OpCode::Loop { offset: distance as u16 });
    }

    // ------------------------------------------------------------------
    // Scopes and locals
    // ------------------------------------------------------------------

    fn begin_scope(&mut self) {
        self.scope.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope.scope_depth -= 1;
        while let Some(last) = self.scope.locals.last() {
            if last.depth <= self.scope.scope_depth {
                break;
            }
            if self.scope.locals.last().unwrap().is_captured {
                self.emit(OpCode::CloseUpvalue);
            } else {
                self.emit(OpCode::Pop);
            }
            self.scope.locals.pop();
        }
    }

    fn declare_variable(&mut self, name: &str) {
        if self.scope.scope_depth == 0 {
            return;
        }
        for local in self.scope.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.scope.scope_depth {
                break;
            }
            if local.name == name {
                self.error_prev("此作用域中已存在同名变量");
                return;
            }
        }
        self.scope.locals.push(Local { name: name.to_string(), depth: -1, is_captured: false });
    }

    fn mark_initialized(&mut self) {
        if self.scope.scope_depth == 0 {
            return;
        }
        let depth = self.scope.scope_depth;
        if let Some(local) = self.scope.locals.last_mut() {
            local.depth = depth;
        }
    }

    /// Consumes an identifier token and declares it as a local (if inside a
    /// scope) or returns the constant-pool index of its name (for a global,
    /// spec §4.2 "Globals").
    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        let name = self.previous.lexeme.clone();
        self.declare_variable(&name);
        if self.scope.scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(&name)
    }

    fn define_variable(&mut self, global: u8) {
        if self.scope.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit(OpCode::DefineGlobal { index: global });
    }

    // ------------------------------------------------------------------
    // Declarations & statements
    // ------------------------------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "期望类名");
        let name_token = self.previous.clone();
        let name_constant = self.identifier_constant(&name_token.lexeme);
        self.declare_variable(&name_token.lexeme);
        self.emit(OpCode::Class { index: name_constant });
        self.define_variable(name_constant);

        let class_scope = Box::new(ClassScope { enclosing: self.class_scope.take(), has_superclass: false });
        self.class_scope = Some(class_scope);

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "期望父类名");
            let super_name = self.previous.lexeme.clone();
            if super_name == name_token.lexeme {
                self.error_prev("类不能继承自身");
            }
            self.named_variable(super_name, false);

            self.begin_scope();
            self.scope.locals.push(Local { name: "父类".to_string(), depth: self.scope.scope_depth, is_captured: false });

            self.named_variable(name_token.lexeme.clone(), false);
            self.emit(OpCode::Inherit);
            self.class_scope.as_mut().unwrap().has_superclass = true;
        }

        self.named_variable(name_token.lexeme.clone(), false);
        self.consume(TokenKind::LeftBrace, "期望 '{'");
        while !self.check(&TokenKind::RightBrace) && self.current.kind != TokenKind::Eof {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "期望 '}'");
        self.emit(OpCode::Pop);

        if self.class_scope.as_ref().unwrap().has_superclass {
            self.end_scope();
        }
        self.class_scope = self.class_scope.take().unwrap().enclosing;
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "期望方法名");
        let name = self.previous.lexeme.clone();
        let constant = self.identifier_constant(&name);
        let function_type =
            if name == "初始化" { FunctionType::Initializer } else { FunctionType::Method };
        self.function(function_type, Some(name));
        self.emit(OpCode::Method { index: constant });
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("期望函数名");
        self.mark_initialized();
        let name = self.previous.lexeme.clone();
        self.function(FunctionType::Function, Some(name));
        self.define_variable(global);
    }

    fn function(&mut self, function_type: FunctionType, name: Option<String>) {
        let enclosing = std::mem::replace(
            &mut self.scope,
            Box::new(FunctionScope::new(None, FunctionType::Script, None)),
        );
        self.scope = Box::new(FunctionScope::new(Some(enclosing), function_type, name));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "期望 '('");
        if !self.check(&TokenKind::RightParen) {
            loop {
                if self.scope.arity == u8::MAX {
                    self.error_prev("参数数量超过限制");
                } else {
                    self.scope.arity += 1;
                }
                let constant = self.parse_variable("期望参数名");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "期望 ')'");
        self.consume(TokenKind::LeftBrace, "期望 '{'");
        self.block();

        let function_ptr = self.finish();
        let enclosing = self.scope.enclosing.take().expect("function scope always has an enclosing scope");
        self.scope = enclosing;

        let upvalues = self.last_function_upvalues.clone();
        let index = self.make_constant(Value::Obj(function_ptr));
        self.emit(OpCode::Closure { index, upvalues });
    }

    /// Finishes the current function scope: emits the trailing implicit
    /// `nil; return;` and debug `OP_END`, then allocates the `FunctionObj`
    /// on the heap (spec §4.2 Function chunk; §9 "OP_END" resolution).
    fn finish(&mut self) -> ObjRef {
        let is_initializer = self.scope.function_type == FunctionType::Initializer;
        if is_initializer {
            self.emit(OpCode::GetLocal { slot: 0 });
        } else {
            self.emit(OpCode::Nil);
        }
        self.emit(OpCode::Return);
        self.emit(OpCode::End);

        let arity = self.scope.arity;
        let name = self.scope.name.clone();
        self.last_function_upvalues = self.scope.upvalues.clone();
        let chunk = std::mem::take(&mut self.scope.chunk);
        let name_ref = name.map(|n| self.vm.intern(&n));
        let function_ptr = self.vm.heap.alloc_function(arity, name_ref, chunk);
        self.vm.push_compiler_root(function_ptr);
        self.function_roots.push(function_ptr);
        function_ptr
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("期望变量名");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "期望 ';'");
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(&TokenKind::RightBrace) && self.current.kind != TokenKind::Eof {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "期望 '}'");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "期望 ';'");
        self.emit(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "期望 ';'");
        self.emit(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "期望 '('");
        self.expression();
        self.consume(TokenKind::RightParen, "期望 ')'");

        let then_jump = self.emit_jump(|offset| OpCode::JumpIfFalse { offset });
        self.emit(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(|offset| OpCode::Jump { offset });
        self.patch_jump(then_jump);
        self.emit(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.scope.chunk.code.len();
        self.consume(TokenKind::LeftParen, "期望 '('");
        self.expression();
        self.consume(TokenKind::RightParen, "期望 ')'");

        let exit_jump = self.emit_jump(|offset| OpCode::JumpIfFalse { offset });
        self.emit(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "期望 '('");

        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.scope.chunk.code.len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "期望 ';'");
            exit_jump = Some(self.emit_jump(|offset| OpCode::JumpIfFalse { offset }));
            self.emit(OpCode::Pop);
        }

        if !self.check(&TokenKind::RightParen) {
            let body_jump = self.emit_jump(|offset| OpCode::Jump { offset });
            let increment_start = self.scope.chunk.code.len();
            self.expression();
            self.emit(OpCode::Pop);
            self.consume(TokenKind::RightParen, "期望 ')'");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        } else {
            self.consume(TokenKind::RightParen, "期望 ')'");
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit(OpCode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.scope.function_type == FunctionType::Script {
            self.error_prev("不能在顶层脚本中使用 返回");
        }
        if self.match_token(TokenKind::Semicolon) {
            if self.scope.function_type == FunctionType::Initializer {
                self.emit(OpCode::GetLocal { slot: 0 });
            } else {
                self.emit(OpCode::Nil);
            }
            self.emit(OpCode::Return);
            return;
        }
        if self.scope.function_type == FunctionType::Initializer {
            self.error_prev("初始化方法不能返回值");
        }
        self.expression();
        self.consume(TokenKind::Semicolon, "期望 ';'");
        self.emit(OpCode::Return);
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix(can_assign) {
            self.error_prev("期望一个表达式");
            return;
        }
        while precedence <= infix_precedence(&self.current.kind) {
            self.advance();
            self.infix(can_assign);
        }
        if can_assign && self.match_token(TokenKind::Equal) {
            self.error_prev("无效的赋值目标");
        }
    }

    fn prefix(&mut self, can_assign: bool) -> bool {
        match self.previous.kind.clone() {
            TokenKind::Number(n) => self.number(n),
            TokenKind::Str(ref s) => self.string_literal(s.clone()),
            TokenKind::True => self.emit_literal(Value::Bool(true)),
            TokenKind::False => self.emit_literal(Value::Bool(false)),
            TokenKind::Nil => self.emit_literal(Value::Nil),
            TokenKind::Identifier => {
                let name = self.previous.lexeme.clone();
                self.named_variable(name, can_assign);
            }
            TokenKind::This => self.this_expr(),
            TokenKind::Super => self.super_expr(),
            TokenKind::LeftParen => self.grouping(),
            TokenKind::LeftBracket => self.list_literal(),
            TokenKind::Minus | TokenKind::Bang | TokenKind::Tilde => self.unary(),
            TokenKind::PlusPlus => self.prefix_incdec(OpCode::Increment),
            TokenKind::MinusMinus => self.prefix_incdec(OpCode::Decrement),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, can_assign: bool) {
        match self.previous.kind {
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::EqualEqual
            | TokenKind::BangEqual
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Amp
            | TokenKind::Pipe
            | TokenKind::Caret
            | TokenKind::LessLess
            | TokenKind::GreaterGreater => self.binary(),
            TokenKind::And => self.and_expr(),
            TokenKind::Or => self.or_expr(),
            TokenKind::LeftParen => self.call(),
            TokenKind::Dot => self.dot(can_assign),
            TokenKind::LeftBracket => self.subscript(can_assign),
            _ => {}
        }
    }

    fn number(&mut self, n: f64) {
        self.emit_literal(Value::Number(n));
    }

    fn string_literal(&mut self, s: String) {
        let ptr = self.vm.heap.intern_string(s);
        self.vm.maybe_collect();
        self.emit_literal(Value::Obj(ptr));
    }

    fn emit_literal(&mut self, value: Value) {
        match value {
            Value::Nil => {
                self.emit(OpCode::Nil);
            }
            Value::Bool(true) => {
                self.emit(OpCode::True);
            }
            Value::Bool(false) => {
                self.emit(OpCode::False);
            }
            _ => {
                let index = self.make_constant(value);
                self.emit(OpCode::Constant { index });
            }
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "期望 ')'");
    }

    fn list_literal(&mut self) {
        let mut count: u16 = 0;
        if !self.check(&TokenKind::RightBracket) {
            loop {
                self.expression();
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBracket, "期望 ']'");
        if count > u8::MAX as u16 {
            self.error_prev("列表字面量元素过多");
            count = 0;
        }
        self.emit(OpCode::BuildList { count: count as u8 });
    }

    fn unary(&mut self) {
        let operator = self.previous.kind.clone();
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => {
                self.emit(OpCode::Negate);
            }
            TokenKind::Bang => {
                self.emit(OpCode::Not);
            }
            TokenKind::Tilde => {
                self.emit(OpCode::BitwiseNot);
            }
            _ => unreachable!("unary() only dispatches on -, !, ~"),
        }
    }

    fn binary(&mut self) {
        let operator = self.previous.kind.clone();
        let precedence = infix_precedence(&operator);
        self.parse_precedence(precedence.next());
        match operator {
            TokenKind::Plus => {
                self.emit(OpCode::Add);
            }
            TokenKind::Minus => {
                self.emit(OpCode::Subtract);
            }
            TokenKind::Star => {
                self.emit(OpCode::Multiply);
            }
            TokenKind::Slash => {
                self.emit(OpCode::Divide);
            }
            TokenKind::Percent => {
                self.emit(OpCode::Modulo);
            }
            TokenKind::EqualEqual => {
                self.emit(OpCode::Equal);
            }
            TokenKind::BangEqual => {
                self.emit(OpCode::Equal);
                self.emit(OpCode::Not);
            }
            TokenKind::Less => {
                self.emit(OpCode::Less);
            }
            TokenKind::LessEqual => {
                self.emit(OpCode::Greater);
                self.emit(OpCode::Not);
            }
            TokenKind::Greater => {
                self.emit(OpCode::Greater);
            }
            TokenKind::GreaterEqual => {
                self.emit(OpCode::Less);
                self.emit(OpCode::Not);
            }
            TokenKind::Amp => {
                self.emit(OpCode::BitwiseAnd);
            }
            TokenKind::Pipe => {
                self.emit(OpCode::BitwiseOr);
            }
            TokenKind::Caret => {
                self.emit(OpCode::BitwiseXor);
            }
            TokenKind::LessLess => {
                self.emit(OpCode::BitwiseLeftShift);
            }
            TokenKind::GreaterGreater => {
                self.emit(OpCode::BitwiseRightShift);
            }
            _ => unreachable!("binary() only dispatches on binary operator tokens"),
        }
    }

    fn and_expr(&mut self) {
        let end_jump = self.emit_jump(|offset| OpCode::JumpIfFalse { offset });
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_expr(&mut self) {
        let else_jump = self.emit_jump(|offset| OpCode::JumpIfFalse { offset });
        let end_jump = self.emit_jump(|offset| OpCode::Jump { offset });
        self.patch_jump(else_jump);
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit(OpCode::Call { argc });
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u16 = 0;
        if !self.check(&TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == u8::MAX as u16 {
                    self.error_prev("参数数量超过限制");
                } else {
                    argc += 1;
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "期望 ')'");
        argc as u8
    }

    /// A call immediately after a property access fuses into `OP_INVOKE`
    /// (spec §4.2 "Method-call fusion"); otherwise this compiles a plain
    /// property get/set.
    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "期望属性名");
        let name = self.previous.lexeme.clone();
        let constant = self.identifier_constant(&name);

        if can_assign {
            if let Some(op) = self.match_compound_assign() {
                self.compile_property_assign(constant, op);
                return;
            }
            if self.match_token(TokenKind::PlusPlus) {
                self.postfix_property_incdec(constant, OpCode::Increment);
                return;
            }
            if self.match_token(TokenKind::MinusMinus) {
                self.postfix_property_incdec(constant, OpCode::Decrement);
                return;
            }
        }

        if let Some(bump_op) = self.pending_incdec.take() {
            if self.chain_continues() {
                self.pending_incdec = Some(bump_op);
                self.emit(OpCode::GetProperty { index: constant });
                return;
            }
            self.compile_property_bump(constant, bump_op);
            return;
        }

        if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit(OpCode::Invoke { index: constant, argc });
        } else {
            self.emit(OpCode::GetProperty { index: constant });
        }
    }

    fn subscript(&mut self, can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightBracket, "期望 ']'");

        if can_assign {
            if let Some(op) = self.match_compound_assign() {
                self.compile_subscript_assign(op);
                return;
            }
            if self.match_token(TokenKind::PlusPlus) {
                self.postfix_subscript_incdec(OpCode::Increment);
                return;
            }
            if self.match_token(TokenKind::MinusMinus) {
                self.postfix_subscript_incdec(OpCode::Decrement);
                return;
            }
        }

        if let Some(bump_op) = self.pending_incdec.take() {
            if self.chain_continues() {
                self.pending_incdec = Some(bump_op);
                self.emit(OpCode::IndexSubscr);
                return;
            }
            self.compile_subscript_bump(bump_op);
            return;
        }
        self.emit(OpCode::IndexSubscr);
    }

    fn this_expr(&mut self) {
        if self.class_scope.is_none() {
            self.error_prev("不能在类外使用 此");
            return;
        }
        self.named_variable("此".to_string(), false);
    }

    fn super_expr(&mut self) {
        match &self.class_scope {
            None => self.error_prev("不能在类外使用 父类"),
            Some(scope) if !scope.has_superclass => self.error_prev("此类没有父类"),
            _ => {}
        }
        self.consume(TokenKind::Dot, "期望 '.'");
        self.consume(TokenKind::Identifier, "期望父类方法名");
        let name = self.previous.lexeme.clone();
        let constant = self.identifier_constant(&name);

        self.named_variable("此".to_string(), false);
        if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable("父类".to_string(), false);
            self.emit(OpCode::SuperInvoke { index: constant, argc });
        } else {
            self.named_variable("父类".to_string(), false);
            self.emit(OpCode::GetSuper { index: constant });
        }
    }

    fn named_variable(&mut self, name: String, can_assign: bool) {
        let slot = self.resolve_variable(&name);

        if let Some(bump_op) = self.pending_incdec.take() {
            if self.chain_continues() {
                // Not the terminal link (a `.field`/`[index]` follows) —
                // just read through; the last link applies the bump.
                self.pending_incdec = Some(bump_op);
                self.emit_get(&slot);
            } else {
                self.emit_get(&slot);
                self.emit(bump_op);
                self.emit_set(&slot);
            }
            return;
        }

        if can_assign {
            if self.match_token(TokenKind::PlusPlus) {
                self.postfix_incdec(&slot, OpCode::Increment);
                return;
            }
            if self.match_token(TokenKind::MinusMinus) {
                self.postfix_incdec(&slot, OpCode::Decrement);
                return;
            }
            if let Some(op) = self.match_compound_assign() {
                self.compile_variable_assign(&slot, op);
                return;
            }
        }
        self.emit_get(&slot);
    }

    fn resolve_variable(&mut self, name: &str) -> VarSlot {
        // Checked directly (rather than through `FunctionScope::resolve_local`)
        // so the depth==-1 sentinel — declared but not yet initialized,
        // spec §4.2 "referencing a local in its own initializer is a compile
        // error" — can be reported here, where `error_prev` is reachable.
        if let Some(idx) = self.scope.locals.iter().rposition(|l| l.name == name) {
            if self.scope.locals[idx].depth == -1 {
                self.error_prev("不能在变量自身的初始化表达式中引用它");
            }
            return VarSlot::Local(idx as u8);
        }
        if let Some(upvalue) = self.scope.resolve_upvalue(name) {
            return VarSlot::Upvalue(upvalue);
        }
        VarSlot::Global(self.identifier_constant(name))
    }

    fn emit_get(&mut self, slot: &VarSlot) {
        match *slot {
            VarSlot::Local(i) => {
                self.emit(OpCode::GetLocal { slot: i });
            }
            VarSlot::Upvalue(i) => {
                self.emit(OpCode::GetUpvalue { slot: i });
            }
            VarSlot::Global(i) => {
                self.emit(OpCode::GetGlobal { index: i });
            }
        }
    }

    fn emit_set(&mut self, slot: &VarSlot) {
        match *slot {
            VarSlot::Local(i) => {
                self.emit(OpCode::SetLocal { slot: i });
            }
            VarSlot::Upvalue(i) => {
                self.emit(OpCode::SetUpvalue { slot: i });
            }
            VarSlot::Global(i) => {
                self.emit(OpCode::SetGlobal { index: i });
            }
        }
    }

    /// `x += e` / `x -= e` / ... (spec §4.2 "Compound assignments"): get,
    /// evaluate, combine, set. Plain `=` just evaluates and sets.
    fn compile_variable_assign(&mut self, slot: &VarSlot, op: AssignOp) {
        if op != AssignOp::Set {
            self.emit_get(slot);
        }
        self.expression();
        op.emit_combine(self);
        self.emit_set(slot);
    }

    fn compile_property_assign(&mut self, name_constant: u8, op: AssignOp) {
        if op != AssignOp::Set {
            self.emit(OpCode::Dup);
            self.emit(OpCode::GetProperty { index: name_constant });
        }
        self.expression();
        op.emit_combine(self);
        self.emit(OpCode::SetProperty { index: name_constant });
    }

    fn compile_subscript_assign(&mut self, op: AssignOp) {
        if op != AssignOp::Set {
            self.emit(OpCode::DoubleDup);
            self.emit(OpCode::IndexSubscr);
        }
        self.expression();
        op.emit_combine(self);
        self.emit(OpCode::StoreSubscr);
    }

    fn match_compound_assign(&mut self) -> Option<AssignOp> {
        if self.match_token(TokenKind::Equal) {
            Some(AssignOp::Set)
        } else if self.match_token(TokenKind::PlusEqual) {
            Some(AssignOp::Add)
        } else if self.match_token(TokenKind::MinusEqual) {
            Some(AssignOp::Sub)
        } else if self.match_token(TokenKind::StarEqual) {
            Some(AssignOp::Mul)
        } else if self.match_token(TokenKind::SlashEqual) {
            Some(AssignOp::Div)
        } else if self.match_token(TokenKind::PercentEqual) {
            Some(AssignOp::Mod)
        } else {
            None
        }
    }

    /// Prefix `++x`/`--x`/`++obj.a`/`++arr[i]` (spec §4.2 "`++`/`--` are
    /// prefix/postfix on assignable expressions"). Parses the target at
    /// `Call` precedence — a primary plus its trailing `.field`/`[index]`
    /// chain, nothing looser — with `pending_incdec` set so whichever link
    /// turns out to be the chain's terminal one performs the bump instead
    /// of a plain read. A target that isn't ultimately a variable/property/
    /// subscript (e.g. a bare call or literal) leaves the flag unconsumed,
    /// which is reported as an error here.
    fn prefix_incdec(&mut self, bump_op: OpCode) {
        self.pending_incdec = Some(bump_op);
        self.parse_precedence(Precedence::Call);
        if self.pending_incdec.take().is_some() {
            self.error_prev("'++'/'--' 只能作用于变量、属性或下标");
        }
    }

    /// Postfix `x++`/`x--`: duplicates the current value before bumping so
    /// the expression yields the pre-increment value, writes the bumped
    /// value back, then drops the now-stale bumped copy `emit_set` leaves
    /// on top (spec §4.2, "via `OP_DUP`").
    fn postfix_incdec(&mut self, slot: &VarSlot, bump_op: OpCode) {
        self.emit_get(slot);
        self.emit(OpCode::Dup);
        self.emit(bump_op);
        self.emit_set(slot);
        self.emit(OpCode::Pop);
    }

    /// True when the token just past the current link continues the
    /// assignable chain (`.field` or `[index]`), meaning the present link
    /// is a read-through, not the `++`/`--` target itself.
    fn chain_continues(&self) -> bool {
        self.check(&TokenKind::Dot) || self.check(&TokenKind::LeftBracket)
    }

    /// `obj.a++`/`obj.a--`: bump to the new value first (prefix-shaped),
    /// then undo the bump on the result to recover the pre-bump value a
    /// postfix expression must yield — cheaper than rotating the receiver
    /// back under a saved copy on a stack machine with no rotate opcode.
    fn postfix_property_incdec(&mut self, name_constant: u8, bump_op: OpCode) {
        self.compile_property_bump(name_constant, bump_op);
        self.emit(inverse_bump(bump_op));
    }

    fn postfix_subscript_incdec(&mut self, bump_op: OpCode) {
        self.compile_subscript_bump(bump_op);
        self.emit(inverse_bump(bump_op));
    }

    /// Receiver already on the stack (pushed by the preceding chain): dup
    /// it, read+bump+write the property, leaving the bumped value on top.
    fn compile_property_bump(&mut self, name_constant: u8, bump_op: OpCode) {
        self.emit(OpCode::Dup);
        self.emit(OpCode::GetProperty { index: name_constant });
        self.emit(bump_op);
        self.emit(OpCode::SetProperty { index: name_constant });
    }

    /// Receiver and index already on the stack: dup both, read+bump+write
    /// the slot, leaving the bumped value on top.
    fn compile_subscript_bump(&mut self, bump_op: OpCode) {
        self.emit(OpCode::DoubleDup);
        self.emit(OpCode::IndexSubscr);
        self.emit(bump_op);
        self.emit(OpCode::StoreSubscr);
    }
}

fn inverse_bump(op: OpCode) -> OpCode {
    match op {
        OpCode::Increment => OpCode::Decrement,
        OpCode::Decrement => OpCode::Increment,
        _ => unreachable!("inverse_bump is only called with Increment/Decrement"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl AssignOp {
    fn emit_combine(self, compiler: &mut Compiler) {
        match self {
            AssignOp::Set => {}
            AssignOp::Add => {
                compiler.emit(OpCode::Add);
            }
            AssignOp::Sub => {
                compiler.emit(OpCode::Subtract);
            }
            AssignOp::Mul => {
                compiler.emit(OpCode::Multiply);
            }
            AssignOp::Div => {
                compiler.emit(OpCode::Divide);
            }
            AssignOp::Mod => {
                compiler.emit(OpCode::Modulo);
            }
        }
    }
}
