use crate::chunk::OpCode;
use crate::objects::object::Object;
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_manager::ObjectManager;
use crate::scanner::{Scanner, Token, TokenType};
use crate::table::Table;
use crate::value::{make_number_value, make_object_value, Value};

const MAX_LOCALS: usize = u8::MAX as usize + 1;
const MAX_UPVALUES: usize = u8::MAX as usize + 1;

pub struct Parser<'a> {
    current: Token<'a>,
    previous: Token<'a>,
    scanner: Option<Scanner<'a>>,
    has_error: bool,
    panic_mode: bool,
    compilers: Vec<Compiler<'a>>,
    class_compilers: Vec<ClassCompiler>,
    object_manager: &'a mut ObjectManager,
    intern_strings: &'a mut Table,
}

struct Local<'a> {
    name: Token<'a>,
    // -1 marks "declared but not yet initialized"; reading such a local in
    // its own initializer is an error.
    depth: i32,
    is_captured: bool,
}

#[derive(Clone)]
struct Upvalue {
    index: usize,
    is_local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Function,
    Initializer,
    Method,
    Script,
}

struct Compiler<'a> {
    function: *mut ObjectFunction,
    function_type: FunctionType,
    locals: Vec<Local<'a>>,
    upvalues: Vec<Upvalue>,
    scope_depth: i32,
}

struct ClassCompiler {
    has_superclass: bool,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl From<u8> for Precedence {
    fn from(value: u8) -> Self {
        match value {
            0 => Precedence::None,
            1 => Precedence::Assignment,
            2 => Precedence::Or,
            3 => Precedence::And,
            4 => Precedence::Equality,
            5 => Precedence::Comparison,
            6 => Precedence::Term,
            7 => Precedence::Factor,
            8 => Precedence::Unary,
            9 => Precedence::Call,
            10 => Precedence::Primary,
            _ => unreachable!("Invalid precedence value: {}", value),
        }
    }
}

type ParserFn = fn(&mut Parser<'_>, bool);

#[derive(Debug, Clone, Copy)]
struct ParseRule {
    prefix: Option<ParserFn>,
    infix: Option<ParserFn>,
    precedence: Precedence,
}

impl ParseRule {
    const fn new(
        prefix: Option<ParserFn>,
        infix: Option<ParserFn>,
        precedence: Precedence,
    ) -> Self {
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }
}

const RULES: [ParseRule; TokenType::Eof as usize + 1] = {
    let mut rules = [ParseRule::new(None, None, Precedence::None); TokenType::Eof as usize + 1];

    rules[TokenType::LeftParen as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.grouping()),
        Some(|parser, _can_assign| parser.call()),
        Precedence::Call,
    );

    rules[TokenType::Dot as usize] = ParseRule::new(
        None,
        Some(|parser, can_assign| parser.dot(can_assign)),
        Precedence::Call,
    );

    rules[TokenType::Minus as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.unary()),
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Term,
    );

    rules[TokenType::Plus as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Term,
    );

    rules[TokenType::Slash as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Factor,
    );

    rules[TokenType::Star as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Factor,
    );

    rules[TokenType::Bang as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.unary()),
        None,
        Precedence::None,
    );

    rules[TokenType::BangEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Equality,
    );

    rules[TokenType::EqualEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Equality,
    );

    rules[TokenType::Greater as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::GreaterEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::Less as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::LessEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::Identifier as usize] = ParseRule::new(
        Some(|parser, can_assign| parser.variable(can_assign)),
        None,
        Precedence::None,
    );

    rules[TokenType::String as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.string()),
        None,
        Precedence::None,
    );

    rules[TokenType::Number as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.number()),
        None,
        Precedence::None,
    );

    rules[TokenType::And as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.and()),
        Precedence::And,
    );

    rules[TokenType::Or as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.or()),
        Precedence::Or,
    );

    rules[TokenType::False as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.literal()),
        None,
        Precedence::None,
    );

    rules[TokenType::True as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.literal()),
        None,
        Precedence::None,
    );

    rules[TokenType::Nil as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.literal()),
        None,
        Precedence::None,
    );

    rules[TokenType::This as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.this_()),
        None,
        Precedence::None,
    );

    rules[TokenType::Super as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.super_()),
        None,
        Precedence::None,
    );

    rules
};

fn identifiers_equal(left: &Token, right: &Token) -> bool {
    left.value == right.value
}

impl<'a> Parser<'a> {
    pub fn new(object_manager: &'a mut ObjectManager, intern_strings: &'a mut Table) -> Parser<'a> {
        let mut parser = Parser {
            current: Token::placeholder(),
            previous: Token::placeholder(),
            scanner: None,
            has_error: false,
            panic_mode: false,
            compilers: vec![],
            class_compilers: vec![],
            object_manager,
            intern_strings,
        };
        parser.init_compiler(FunctionType::Script);
        parser
    }

    /// Compile a top-level script. Returns the script function, or None if
    /// any compile error was reported.
    pub fn compile(&mut self, source: &'a str) -> Option<*mut ObjectFunction> {
        self.scanner = Some(Scanner::new(source));
        self.advance();

        while !self.match_token(TokenType::Eof) {
            self.declaration();
        }

        let (function, _) = self.end_compiler();
        if self.has_error {
            None
        } else {
            Some(function)
        }
    }

    fn specific_compiler(&self, compiler_index: usize) -> &Compiler<'a> {
        self.compilers.get(compiler_index).expect("compiler index is invalid.")
    }

    fn specific_compiler_mut(&mut self, compiler_index: usize) -> &mut Compiler<'a> {
        self.compilers.get_mut(compiler_index).expect("compiler index is invalid.")
    }

    fn current_compiler(&self) -> &Compiler<'a> {
        self.compilers.last().expect("No compiler.")
    }

    fn current_compiler_mut(&mut self) -> &mut Compiler<'a> {
        self.compilers.last_mut().expect("No compiler.")
    }

    fn current_function(&self) -> &ObjectFunction {
        unsafe { &*self.current_compiler().function }
    }

    fn current_function_mut(&mut self) -> &mut ObjectFunction {
        unsafe { &mut *self.current_compiler_mut().function }
    }

    fn current_chunk_len(&self) -> usize {
        self.current_function().chunk.len()
    }

    fn current_locals(&self) -> &Vec<Local<'a>> {
        &self.current_compiler().locals
    }

    fn current_locals_mut(&mut self) -> &mut Vec<Local<'a>> {
        &mut self.current_compiler_mut().locals
    }

    fn advance(&mut self) {
        self.previous = self.current.clone();
        loop {
            let scanner = self.scanner.as_mut().expect("Scanner not initialized.");
            self.current = scanner.scan_token();
            if self.current.token_type != TokenType::Error {
                break;
            }

            let message = self.current.value;
            self.error_at_current(message);
        }
    }

    fn match_token(&mut self, token_type: TokenType) -> bool {
        if !self.check(token_type) {
            return false;
        }

        self.advance();
        true
    }

    fn check(&self, token_type: TokenType) -> bool {
        self.current.token_type == token_type
    }

    fn consume(&mut self, token_type: TokenType, message: &str) {
        if self.current.token_type == token_type {
            self.advance();
            return;
        }

        self.error_at_current(message);
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_function_mut().chunk.write(byte, line);
    }

    fn emit_bytes(&mut self, byte1: u8, byte2: u8) {
        self.emit_byte(byte1);
        self.emit_byte(byte2);
    }

    fn emit_constant(&mut self, value: Value) {
        let byte = self.make_constant(value);
        self.emit_bytes(OpCode::Constant.to_byte(), byte);
    }

    fn emit_return(&mut self) {
        // An initializer's implicit return hands back the receiver in slot 0.
        if self.current_compiler().function_type == FunctionType::Initializer {
            self.emit_bytes(OpCode::GetLocal.to_byte(), 0);
        } else {
            self.emit_byte(OpCode::Nil.to_byte());
        }
        self.emit_byte(OpCode::Return.to_byte());
    }

    fn init_compiler(&mut self, function_type: FunctionType) {
        // Function declarations reach here right after the name token was
        // consumed, so the name is grabbed from `previous`.
        let name = if function_type == FunctionType::Script {
            String::new()
        } else {
            self.previous.value.to_string()
        };
        let function = self.object_manager.alloc_function(name);

        let mut compiler = Compiler {
            function,
            function_type,
            locals: vec![],
            upvalues: vec![],
            scope_depth: 0,
        };

        // Slot zero holds the callee; for methods and initializers it is the
        // receiver, addressable as `this`.
        let slot_zero_name = if matches!(function_type, FunctionType::Method | FunctionType::Initializer) {
            "this"
        } else {
            ""
        };
        compiler.locals.push(Local {
            name: Token {
                token_type: TokenType::Identifier,
                value: slot_zero_name,
                line: 0,
            },
            depth: 0,
            is_captured: false,
        });
        self.compilers.push(compiler);
    }

    fn end_compiler(&mut self) -> (*mut ObjectFunction, Vec<Upvalue>) {
        self.emit_return();

        let compiler = self.compilers.pop().expect("No compiler.");
        let function = compiler.function;
        unsafe {
            (*function).upvalue_count = compiler.upvalues.len();
        }

        debug_feature::disassemble_chunk(self, function);
        (function, compiler.upvalues)
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        if let Some(index) = self.current_function().chunk.find_constant(value) {
            return index as u8;
        }

        let constant_index = self.current_function_mut().chunk.add_constant(value);
        if constant_index > u8::MAX.into() {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        constant_index as u8
    }

    fn number(&mut self) {
        let value: f64 = self.previous.value.parse().unwrap_or(0.0);
        self.emit_constant(make_number_value(value));
    }

    fn string(&mut self) {
        // Trim the leading and trailing quotation marks.
        let lexeme = self.previous.value;
        let content = &lexeme[1..lexeme.len() - 1];
        let string = self
            .object_manager
            .intern_string(&mut self.intern_strings, content);
        self.emit_constant(make_object_value(string as *mut Object));
    }

    fn declaration(&mut self) {
        if self.match_token(TokenType::Class) {
            self.class_declaration();
        } else if self.match_token(TokenType::Fun) {
            self.function_declaration();
        } else if self.match_token(TokenType::Var) {
            self.variable_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenType::Identifier, "Expect class name.");
        let class_name = self.previous.clone();
        let name_constant = self.identifier_constant(class_name.clone());
        self.declare_variable();

        self.emit_bytes(OpCode::Class.to_byte(), name_constant);
        self.define_variable(name_constant);

        self.class_compilers.push(ClassCompiler {
            has_superclass: false,
        });

        if self.match_token(TokenType::Less) {
            self.consume(TokenType::Identifier, "Expect superclass name.");
            self.variable(false);

            if identifiers_equal(&class_name, &self.previous) {
                self.error("A class can't inherit from itself.");
            }

            // A scope holding the synthetic `super` local, closed after the
            // class body so every method can capture it.
            self.begin_scope();
            let super_token = self.synthetic_token("super");
            self.add_local(super_token);
            self.define_variable(0);

            self.named_variable(class_name.clone(), false);
            self.emit_byte(OpCode::Inherit.to_byte());
            self.class_compilers
                .last_mut()
                .expect("No class compiler.")
                .has_superclass = true;
        }

        self.named_variable(class_name, false);
        self.consume(TokenType::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.method();
        }
        self.consume(TokenType::RightBrace, "Expect '}' after class body.");
        self.emit_byte(OpCode::Pop.to_byte());

        if self
            .class_compilers
            .last()
            .expect("No class compiler.")
            .has_superclass
        {
            self.end_scope();
        }
        self.class_compilers.pop();
    }

    fn method(&mut self) {
        self.consume(TokenType::Identifier, "Expect method name.");
        let name_token = self.previous.clone();
        let constant = self.identifier_constant(name_token);

        let function_type = if self.previous.value == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(function_type);
        self.emit_bytes(OpCode::Method.to_byte(), constant);
    }

    fn variable_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.match_token(TokenType::Equal) {
            self.expression();
        } else {
            self.emit_byte(OpCode::Nil.to_byte());
        }
        self.consume(TokenType::Semicolon, "Expect ';' after variable declaration.");

        self.define_variable(global);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenType::Identifier, message);

        self.declare_variable();
        if self.current_compiler().scope_depth > 0 {
            return 0;
        }
        let token = self.previous.clone();
        self.identifier_constant(token)
    }

    fn declare_variable(&mut self) {
        if self.current_compiler().scope_depth == 0 {
            return;
        }

        let variable_name = self.previous.clone();
        let scope_depth = self.current_compiler().scope_depth;
        let mut already_declared = false;
        for local in self.current_locals().iter().rev() {
            if local.depth != -1 && local.depth < scope_depth {
                break;
            }

            if identifiers_equal(&variable_name, &local.name) {
                already_declared = true;
                break;
            }
        }
        if already_declared {
            self.error("Already a variable with this name in this scope.");
        }

        self.add_local(variable_name);
    }

    fn add_local(&mut self, variable_name: Token<'a>) {
        if self.current_locals().len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }

        self.current_locals_mut().push(Local {
            name: variable_name,
            depth: -1,
            is_captured: false,
        });
    }

    fn function_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn function(&mut self, function_type: FunctionType) {
        self.init_compiler(function_type);

        self.begin_scope();
        self.consume(TokenType::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenType::RightParen) {
            loop {
                self.current_function_mut().arity += 1;
                if self.current_function().arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);

                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.");
        self.consume(TokenType::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_compiler();
        let constant = self.make_constant(make_object_value(function as *mut Object));
        self.emit_bytes(OpCode::Closure.to_byte(), constant);

        // The VM reads one (is_local, index) pair per upvalue.
        for upvalue in &upvalues {
            self.emit_byte(if upvalue.is_local { 1 } else { 0 });
            self.emit_byte(upvalue.index as u8);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut argument_count: usize = 0;
        if !self.check(TokenType::RightParen) {
            loop {
                self.expression();
                if argument_count >= 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                argument_count += 1;

                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after arguments.");
        argument_count as u8
    }

    fn identifier_constant(&mut self, token: Token) -> u8 {
        let string = self
            .object_manager
            .intern_string(&mut self.intern_strings, token.value);
        self.make_constant(make_object_value(string as *mut Object))
    }

    fn define_variable(&mut self, global: u8) {
        // Inside a scope the value already lives in its stack slot.
        if self.current_compiler().scope_depth > 0 {
            self.mark_initialized();
            return;
        }

        self.emit_bytes(OpCode::DefineGlobal.to_byte(), global);
    }

    fn mark_initialized(&mut self) {
        let scope_depth = self.current_compiler().scope_depth;
        if scope_depth == 0 {
            return;
        }

        self.current_locals_mut()
            .last_mut()
            .expect("No local to initialize.")
            .depth = scope_depth;
    }

    fn variable(&mut self, can_assign: bool) {
        let token = self.previous.clone();
        self.named_variable(token, can_assign);
    }

    fn synthetic_token(&self, text: &'static str) -> Token<'a> {
        Token {
            token_type: TokenType::Identifier,
            value: text,
            line: self.previous.line,
        }
    }

    fn named_variable(&mut self, name: Token<'a>, can_assign: bool) {
        let mut opcode_get = OpCode::GetLocal.to_byte();
        let mut opcode_set = OpCode::SetLocal.to_byte();
        let current_compiler_index = self.compilers.len() - 1;
        let mut index = self.resolve_local(current_compiler_index, &name);
        if index == -1 {
            index = self.resolve_upvalue(current_compiler_index, &name);
            if index == -1 {
                // Globals are late-bound by name.
                index = self.identifier_constant(name) as i32;
                opcode_get = OpCode::GetGlobal.to_byte();
                opcode_set = OpCode::SetGlobal.to_byte();
            } else {
                opcode_get = OpCode::GetUpvalue.to_byte();
                opcode_set = OpCode::SetUpvalue.to_byte();
            }
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_bytes(opcode_set, index as u8);
        } else {
            self.emit_bytes(opcode_get, index as u8);
        }
    }

    fn resolve_local(&mut self, compiler_index: usize, name: &Token) -> i32 {
        let mut found: i32 = -1;
        let mut uninitialized = false;
        for (index, local) in self
            .specific_compiler(compiler_index)
            .locals
            .iter()
            .enumerate()
            .rev()
        {
            if identifiers_equal(name, &local.name) {
                if local.depth == -1 {
                    uninitialized = true;
                }
                found = index as i32;
                break;
            }
        }

        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        found
    }

    fn resolve_upvalue(&mut self, compiler_index: usize, name: &Token) -> i32 {
        if compiler_index == 0 {
            return -1;
        }

        let local = self.resolve_local(compiler_index - 1, name);
        if local != -1 {
            self.specific_compiler_mut(compiler_index - 1).locals[local as usize].is_captured =
                true;
            return self.add_upvalue(compiler_index, local as usize, true) as i32;
        }

        let upvalue = self.resolve_upvalue(compiler_index - 1, name);
        if upvalue != -1 {
            return self.add_upvalue(compiler_index, upvalue as usize, false) as i32;
        }

        -1
    }

    fn add_upvalue(&mut self, compiler_index: usize, index: usize, is_local: bool) -> usize {
        for (upvalue_index, upvalue) in self
            .specific_compiler(compiler_index)
            .upvalues
            .iter()
            .enumerate()
        {
            if upvalue.is_local == is_local && upvalue.index == index {
                return upvalue_index;
            }
        }

        if self.specific_compiler(compiler_index).upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }

        let compiler = self.specific_compiler_mut(compiler_index);
        compiler.upvalues.push(Upvalue { index, is_local });
        compiler.upvalues.len() - 1
    }

    fn and(&mut self) {
        let end_jump = self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte());
        self.emit_byte(OpCode::Pop.to_byte());
        self.parse_precedence(Precedence::And);
        self.patch_jump_offset(end_jump);
    }

    fn or(&mut self) {
        let else_jump = self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte());
        let end_jump = self.emit_jump_bytes(OpCode::Jump.to_byte());

        self.patch_jump_offset(else_jump);
        self.emit_byte(OpCode::Pop.to_byte());

        self.parse_precedence(Precedence::Or);
        self.patch_jump_offset(end_jump);
    }

    fn statement(&mut self) {
        if self.match_token(TokenType::Print) {
            self.print_statement();
        } else if self.match_token(TokenType::If) {
            self.if_statement();
        } else if self.match_token(TokenType::Return) {
            self.return_statement();
        } else if self.match_token(TokenType::While) {
            self.while_statement();
        } else if self.match_token(TokenType::For) {
            self.for_statement();
        } else if self.match_token(TokenType::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        // JumpIfFalse leaves the condition on the stack; both paths pop it.
        let then_jump = self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte());
        self.emit_byte(OpCode::Pop.to_byte());
        self.statement();

        let else_jump = self.emit_jump_bytes(OpCode::Jump.to_byte());
        self.patch_jump_offset(then_jump);
        self.emit_byte(OpCode::Pop.to_byte());

        if self.match_token(TokenType::Else) {
            self.statement();
        }
        self.patch_jump_offset(else_jump);
    }

    fn emit_jump_bytes(&mut self, instruction: u8) -> usize {
        self.emit_byte(instruction);
        // Two placeholder bytes for the 16-bit jump distance.
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk_len() - 2
    }

    fn patch_jump_offset(&mut self, offset: usize) {
        // -2 to adjust for the jump distance operand itself.
        let jump_offset = self.current_chunk_len() - offset - 2;
        if jump_offset > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }

        let chunk = &mut self.current_function_mut().chunk;
        chunk.write_by_offset(offset, ((jump_offset >> 8) & 0xff) as u8);
        chunk.write_by_offset(offset + 1, (jump_offset & 0xff) as u8);
    }

    fn begin_scope(&mut self) {
        self.current_compiler_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current_compiler_mut().scope_depth -= 1;
        let scope_depth = self.current_compiler().scope_depth;
        loop {
            let is_captured = {
                let locals = self.current_locals();
                match locals.last() {
                    Some(local) if local.depth > scope_depth => local.is_captured,
                    _ => break,
                }
            };

            // A captured local migrates into its upvalue instead of being
            // discarded with the scope.
            if is_captured {
                self.emit_byte(OpCode::CloseUpvalue.to_byte());
            } else {
                self.emit_byte(OpCode::Pop.to_byte());
            }
            self.current_locals_mut().pop();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.declaration();
        }

        self.consume(TokenType::RightBrace, "Expect '}' after block.");
    }

    fn return_statement(&mut self) {
        if self.current_compiler().function_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_token(TokenType::Semicolon) {
            self.emit_return();
        } else {
            if self.current_compiler().function_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }

            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after return value.");
            self.emit_byte(OpCode::Return.to_byte());
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after value.");
        self.emit_byte(OpCode::Print.to_byte());
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk_len();

        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte());
        self.emit_byte(OpCode::Pop.to_byte());

        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump_offset(exit_jump);
        self.emit_byte(OpCode::Pop.to_byte());
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_byte(OpCode::Loop.to_byte());

        // +2 to skip over the operand of the Loop instruction itself.
        let offset = self.current_chunk_len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }

        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenType::Semicolon) {
            // No initializer.
        } else if self.match_token(TokenType::Var) {
            self.variable_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk_len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenType::Semicolon) {
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after loop condition.");

            exit_jump = Some(self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte()));
            self.emit_byte(OpCode::Pop.to_byte());
        }

        if !self.match_token(TokenType::RightParen) {
            // The increment is compiled out of line: the body jumps back to
            // it, and it loops back to the condition.
            let body_jump = self.emit_jump_bytes(OpCode::Jump.to_byte());
            let increment_start = self.current_chunk_len();
            self.expression();
            self.emit_byte(OpCode::Pop.to_byte());
            self.consume(TokenType::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump_offset(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump_offset(exit_jump);
            self.emit_byte(OpCode::Pop.to_byte());
        }
        self.end_scope();
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after expression.");
        self.emit_byte(OpCode::Pop.to_byte());
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after expression.");
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn unary(&mut self) {
        let operator_type = self.previous.token_type;

        self.parse_precedence(Precedence::Unary);

        match operator_type {
            TokenType::Bang => self.emit_byte(OpCode::Not.to_byte()),
            TokenType::Minus => self.emit_byte(OpCode::Negate.to_byte()),
            _ => unreachable!("Expect unary operator."),
        }
    }

    fn binary(&mut self) {
        let operator_type = self.previous.token_type;
        let rule = &RULES[operator_type as usize];
        self.parse_precedence((rule.precedence as u8 + 1).into());

        match operator_type {
            TokenType::BangEqual => self.emit_bytes(OpCode::Equal.to_byte(), OpCode::Not.to_byte()),
            TokenType::EqualEqual => self.emit_byte(OpCode::Equal.to_byte()),
            TokenType::Greater => self.emit_byte(OpCode::Greater.to_byte()),
            TokenType::GreaterEqual => self.emit_bytes(OpCode::Less.to_byte(), OpCode::Not.to_byte()),
            TokenType::Less => self.emit_byte(OpCode::Less.to_byte()),
            TokenType::LessEqual => self.emit_bytes(OpCode::Greater.to_byte(), OpCode::Not.to_byte()),
            TokenType::Plus => self.emit_byte(OpCode::Add.to_byte()),
            TokenType::Minus => self.emit_byte(OpCode::Subtract.to_byte()),
            TokenType::Star => self.emit_byte(OpCode::Multiply.to_byte()),
            TokenType::Slash => self.emit_byte(OpCode::Divide.to_byte()),
            _ => unreachable!("Unexpected binary operator: {}", operator_type),
        }
    }

    fn literal(&mut self) {
        let operator_type = self.previous.token_type;
        match operator_type {
            TokenType::False => self.emit_byte(OpCode::False.to_byte()),
            TokenType::True => self.emit_byte(OpCode::True.to_byte()),
            TokenType::Nil => self.emit_byte(OpCode::Nil.to_byte()),
            _ => unreachable!("Unexpected literal operator: {}", operator_type),
        }
    }

    fn call(&mut self) {
        let argument_count = self.argument_list();
        self.emit_bytes(OpCode::Call.to_byte(), argument_count);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenType::Identifier, "Expect property name after '.'.");
        let name_token = self.previous.clone();
        let name = self.identifier_constant(name_token);

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_bytes(OpCode::SetProperty.to_byte(), name);
        } else if self.match_token(TokenType::LeftParen) {
            // Fused property access + call.
            let argument_count = self.argument_list();
            self.emit_bytes(OpCode::Invoke.to_byte(), name);
            self.emit_byte(argument_count);
        } else {
            self.emit_bytes(OpCode::GetProperty.to_byte(), name);
        }
    }

    fn this_(&mut self) {
        if self.class_compilers.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }

        self.variable(false);
    }

    fn super_(&mut self) {
        if self.class_compilers.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self
            .class_compilers
            .last()
            .expect("No class compiler.")
            .has_superclass
        {
            self.error("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenType::Dot, "Expect '.' after 'super'.");
        self.consume(TokenType::Identifier, "Expect superclass method name.");
        let name_token = self.previous.clone();
        let name = self.identifier_constant(name_token);

        let this_token = self.synthetic_token("this");
        self.named_variable(this_token, false);
        if self.match_token(TokenType::LeftParen) {
            let argument_count = self.argument_list();
            let super_token = self.synthetic_token("super");
            self.named_variable(super_token, false);
            self.emit_bytes(OpCode::SuperInvoke.to_byte(), name);
            self.emit_byte(argument_count);
        } else {
            let super_token = self.synthetic_token("super");
            self.named_variable(super_token, false);
            self.emit_bytes(OpCode::GetSuper.to_byte(), name);
        }
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();

        let can_assign = precedence <= Precedence::Assignment;
        if let Some(prefix) = &RULES[self.previous.token_type as usize].prefix {
            prefix(self, can_assign);
        } else {
            self.error("Expect expression.");
            return;
        }

        while precedence as u8 <= RULES[self.current.token_type as usize].precedence as u8 {
            self.advance();
            if let Some(infix) = &RULES[self.previous.token_type as usize].infix {
                infix(self, can_assign);
            } else {
                self.error("Expect infix parse function.");
                return;
            }
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.token_type != TokenType::Eof {
            if self.previous.token_type == TokenType::Semicolon {
                return;
            }

            match self.current.token_type {
                TokenType::Class
                | TokenType::Fun
                | TokenType::Var
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return => return,
                _ => (),
            }

            self.advance();
        }
    }

    fn error(&mut self, message: &str) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }

        self.panic_mode = true;
        eprint!("[line {}] Error", token.line);

        match token.token_type {
            TokenType::Eof => eprint!(" at end"),
            TokenType::Error => {}
            _ => eprint!(" at '{}'", token.value),
        }

        eprintln!(": {}", message);
        self.has_error = true;
    }
}

#[cfg(feature = "debug_print_code")]
mod debug_feature {
    use super::*;
    use crate::debug;

    pub fn disassemble_chunk(parser: &Parser, function: *mut ObjectFunction) {
        if parser.has_error {
            return;
        }
        let function = unsafe { &*function };
        if function.name.is_empty() {
            debug::disassemble_chunk(&function.chunk, "<script>");
        } else {
            debug::disassemble_chunk(&function.chunk, &function.name);
        }
    }
}

#[cfg(not(feature = "debug_print_code"))]
mod debug_feature {
    use super::*;

    pub fn disassemble_chunk(_parser: &Parser, _function: *mut ObjectFunction) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::value::{as_number, is_function, is_string};

    fn compile_source(source: &str) -> (ObjectManager, Table, Option<*mut ObjectFunction>) {
        let mut object_manager = ObjectManager::new();
        let mut intern_strings = Table::new();
        let function = {
            let mut parser = Parser::new(&mut object_manager, &mut intern_strings);
            parser.compile(source)
        };
        (object_manager, intern_strings, function)
    }

    fn script_chunk(function: *mut ObjectFunction) -> &'static Chunk {
        unsafe { &(*function).chunk }
    }

    #[test]
    fn test_compile_expression() {
        let (_manager, _strings, function) = compile_source("!(5 - 4 > 3 * 2 == !nil);");
        let function = function.expect("expression should compile");
        let chunk = script_chunk(function);

        assert_eq!(as_number(chunk.get_constant(0)), 5.0);
        assert_eq!(as_number(chunk.get_constant(1)), 4.0);

        let expected = [
            OpCode::Constant.to_byte(),
            0,
            OpCode::Constant.to_byte(),
            1,
            OpCode::Subtract.to_byte(),
            OpCode::Constant.to_byte(),
            2,
            OpCode::Constant.to_byte(),
            3,
            OpCode::Multiply.to_byte(),
            OpCode::Greater.to_byte(),
            OpCode::Nil.to_byte(),
            OpCode::Not.to_byte(),
            OpCode::Equal.to_byte(),
            OpCode::Not.to_byte(),
            OpCode::Pop.to_byte(),
            OpCode::Nil.to_byte(),
            OpCode::Return.to_byte(),
        ];
        for (offset, byte) in expected.iter().enumerate() {
            assert_eq!(chunk.read_from_offset(offset), Some(*byte), "byte {}", offset);
        }
    }

    #[test]
    fn test_repeated_string_literal_is_interned_once() {
        let (_manager, strings, function) =
            compile_source("\"this is a test string\"; \"this is a test string\";");
        assert!(function.is_some());
        assert_eq!(strings.len(), 1);
    }

    #[test]
    fn test_string_literal_constant_dedup() {
        let (_manager, _strings, function) = compile_source("\"twice\"; \"twice\";");
        let function = function.expect("script should compile");
        let chunk = script_chunk(function);
        let string_constants = chunk
            .iter_constants()
            .filter(|constant| is_string(constant))
            .count();
        assert_eq!(string_constants, 1);
    }

    #[test]
    fn test_function_declaration() {
        let (_manager, _strings, function) = compile_source(
            "fun areWeHavingItYet() {
                print \"Yes we are!\";
            }
            print areWeHavingItYet;",
        );
        let function = function.expect("function declaration should compile");
        let chunk = script_chunk(function);
        let function_constants = chunk
            .iter_constants()
            .filter(|constant| is_function(constant))
            .count();
        assert_eq!(function_constants, 1);
    }

    #[test]
    fn test_closure_upvalue_count() {
        let (_manager, _strings, function) = compile_source(
            "fun outer() {
                var x = 0;
                fun inner() { x = x + 1; return x; }
                return inner;
            }",
        );
        let function = function.expect("closure should compile");
        let chunk = script_chunk(function);
        let outer = chunk
            .iter_constants()
            .find(|constant| is_function(constant))
            .expect("outer function constant");
        let outer = crate::value::as_object(outer) as *mut ObjectFunction;
        let inner = unsafe {
            (*outer)
                .chunk
                .iter_constants()
                .find(|constant| is_function(constant))
                .expect("inner function constant")
        };
        let inner = crate::value::as_object(inner) as *mut ObjectFunction;
        assert_eq!(unsafe { (*inner).upvalue_count }, 1);
    }

    #[test]
    fn test_class_declaration_compiles() {
        let (_manager, _strings, function) = compile_source(
            "class Pair {
                init(first, second) {
                    this.first = first;
                    this.second = second;
                }
                sum() { return this.first + this.second; }
            }
            var pair = Pair(1, 2);
            print pair.sum();",
        );
        assert!(function.is_some());
    }

    #[test]
    fn test_inheritance_compiles() {
        let (_manager, _strings, function) = compile_source(
            "class A { greet() { print \"A\"; } }
            class B < A { greet() { super.greet(); print \"B\"; } }
            B().greet();",
        );
        assert!(function.is_some());
    }

    #[test]
    fn test_return_at_top_level_is_an_error() {
        let (_manager, _strings, function) = compile_source("return 5;");
        assert!(function.is_none());
    }

    #[test]
    fn test_self_inheritance_is_an_error() {
        let (_manager, _strings, function) = compile_source("class A < A {}");
        assert!(function.is_none());
    }

    #[test]
    fn test_this_outside_class_is_an_error() {
        let (_manager, _strings, function) = compile_source("print this;");
        assert!(function.is_none());
    }

    #[test]
    fn test_super_without_superclass_is_an_error() {
        let (_manager, _strings, function) =
            compile_source("class A { method() { super.method(); } }");
        assert!(function.is_none());
    }

    #[test]
    fn test_return_value_from_initializer_is_an_error() {
        let (_manager, _strings, function) =
            compile_source("class A { init() { return 5; } }");
        assert!(function.is_none());
    }

    #[test]
    fn test_duplicate_local_is_an_error() {
        let (_manager, _strings, function) = compile_source("{ var a = 1; var a = 2; }");
        assert!(function.is_none());
    }

    #[test]
    fn test_reading_local_in_own_initializer_is_an_error() {
        let (_manager, _strings, function) = compile_source("{ var a = a; }");
        assert!(function.is_none());
    }

    #[test]
    fn test_invalid_assignment_target_is_an_error() {
        let (_manager, _strings, function) = compile_source("var a = 1; var b = 2; a + b = 3;");
        assert!(function.is_none());
    }

    #[test]
    fn test_too_many_locals_is_an_error() {
        let mut source = String::from("fun crowded() {\n");
        for index in 0..260 {
            source.push_str(&format!("var local{} = {};\n", index, index));
        }
        source.push_str("}\n");
        let (_manager, _strings, function) = compile_source(&source);
        assert!(function.is_none());
    }
}
