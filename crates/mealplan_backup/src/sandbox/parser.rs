//! Recursive-descent parser for the script language.
//!
//! Binary operators are parsed by precedence climbing. Semicolons may be
//! omitted where a line break, a closing brace or the end of input ends the
//! statement.

use super::ast::*;
use super::lexer::{tokenize, Spanned, SyntaxError, TemplatePart, Token};
use super::value::number_to_string;
use std::rc::Rc;

/// Deepest syntactic nesting accepted before parsing gives up.
const MAX_NESTING: usize = 128;

const RESERVED: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "default", "delete", "do", "else",
    "export", "extends", "finally", "for", "function", "if", "import", "in", "instanceof", "let",
    "new", "return", "super", "switch", "this", "throw", "try", "typeof", "var", "void", "while",
    "with", "yield", "true", "false", "null",
];

const ASSIGN_OPS: &[(&str, Option<BinaryOp>)] = &[
    ("=", None),
    ("+=", Some(BinaryOp::Add)),
    ("-=", Some(BinaryOp::Sub)),
    ("*=", Some(BinaryOp::Mul)),
    ("/=", Some(BinaryOp::Div)),
    ("%=", Some(BinaryOp::Mod)),
    ("**=", Some(BinaryOp::Pow)),
    ("&=", Some(BinaryOp::BitAnd)),
    ("|=", Some(BinaryOp::BitOr)),
    ("^=", Some(BinaryOp::BitXor)),
    ("<<=", Some(BinaryOp::Shl)),
    (">>=", Some(BinaryOp::Shr)),
    (">>>=", Some(BinaryOp::UShr)),
];

type PResult<T> = Result<T, SyntaxError>;

#[derive(Clone, Copy)]
enum OpKind {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

/// Parses a complete script.
pub fn parse_program(source: &str) -> PResult<Program> {
    let mut parser = Parser::new(tokenize(source)?);
    let mut body = Vec::new();
    while !parser.at_end() {
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    function_depth: usize,
    loop_depth: usize,
    switch_depth: usize,
    nesting: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            pos: 0,
            function_depth: 0,
            loop_depth: 0,
            switch_depth: 0,
            nesting: 0,
        }
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn newline_before(&self) -> bool {
        self.tokens.get(self.pos).is_some_and(|t| t.newline_before)
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Some(Token::Punct(q)) if *q == p)
    }

    fn is_punct_at(&self, offset: usize, p: &str) -> bool {
        matches!(self.peek_at(offset), Some(Token::Punct(q)) if *q == p)
    }

    fn is_keyword(&self, kw: &str) -> bool {
        self.is_keyword_at(0, kw)
    }

    fn is_keyword_at(&self, offset: usize, kw: &str) -> bool {
        matches!(self.peek_at(offset), Some(Token::Ident(name)) if name == kw)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> PResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        match self.tokens.get(self.pos).or_else(|| self.tokens.last()) {
            Some(t) => SyntaxError::new(message, t.line, t.column),
            None => SyntaxError::new(message, 1, 1),
        }
    }

    fn unexpected(&self) -> SyntaxError {
        match self.peek() {
            Some(token) => self.error(format!("Unexpected {token}")),
            None => self.error("Unexpected end of input"),
        }
    }

    fn binding_name(&mut self) -> PResult<String> {
        match self.peek() {
            Some(Token::Ident(name)) if !RESERVED.contains(&name.as_str()) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Property names may be reserved words.
    fn property_name(&mut self) -> PResult<String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn consume_semicolon(&mut self) -> PResult<()> {
        if self.eat_punct(";") || self.at_end() || self.is_punct("}") || self.newline_before() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn enter(&mut self) -> PResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error("Script is nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self) -> PResult<Stmt> {
        self.enter()?;
        let stmt = self.statement_inner();
        self.leave();
        stmt
    }

    fn statement_inner(&mut self) -> PResult<Stmt> {
        let Some(token) = self.peek() else {
            return Err(self.unexpected());
        };
        let keyword = match token {
            Token::Punct("{") => return Ok(Stmt::Block(self.block()?)),
            Token::Punct(";") => {
                self.pos += 1;
                return Ok(Stmt::Empty);
            }
            Token::Ident(name) => name.clone(),
            _ => return self.expression_statement(),
        };

        match keyword.as_str() {
            "let" | "const" | "var" => {
                let kind = self.var_kind()?;
                let decls = self.declarators(kind)?;
                self.consume_semicolon()?;
                Ok(Stmt::Declare { kind, decls })
            }
            "function" => self.function_declaration(),
            "async" if self.is_keyword_at(1, "function") => {
                self.pos += 1;
                self.function_declaration()
            }
            "if" => {
                self.pos += 1;
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                let then = Box::new(self.statement()?);
                let otherwise = if self.eat_keyword("else") {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If(test, then, otherwise))
            }
            "while" => {
                self.pos += 1;
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                let body = self.loop_body()?;
                Ok(Stmt::While(test, body))
            }
            "do" => {
                self.pos += 1;
                let body = self.loop_body()?;
                self.expect_keyword("while")?;
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                self.eat_punct(";");
                Ok(Stmt::DoWhile(body, test))
            }
            "for" => self.for_statement(),
            "return" => {
                if self.function_depth == 0 {
                    return Err(self.error("Illegal return statement"));
                }
                self.pos += 1;
                let value = if self.eat_punct(";")
                    || self.at_end()
                    || self.is_punct("}")
                    || self.newline_before()
                {
                    None
                } else {
                    let value = self.expression()?;
                    self.consume_semicolon()?;
                    Some(value)
                };
                Ok(Stmt::Return(value))
            }
            "break" => {
                if self.loop_depth == 0 && self.switch_depth == 0 {
                    return Err(self.error("Illegal break statement"));
                }
                self.pos += 1;
                self.consume_semicolon()?;
                Ok(Stmt::Break)
            }
            "continue" => {
                if self.loop_depth == 0 {
                    return Err(self.error("Illegal continue statement"));
                }
                self.pos += 1;
                self.consume_semicolon()?;
                Ok(Stmt::Continue)
            }
            "throw" => {
                self.pos += 1;
                if self.newline_before() {
                    return Err(self.error("Illegal newline after throw"));
                }
                let value = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(value))
            }
            "try" => self.try_statement(),
            "switch" => self.switch_statement(),
            _ => self.expression_statement(),
        }
    }

    fn expression_statement(&mut self) -> PResult<Stmt> {
        let expr = self.expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_end() {
                return Err(self.unexpected());
            }
            body.push(self.statement()?);
        }
        self.pos += 1;
        Ok(body)
    }

    fn loop_body(&mut self) -> PResult<Box<Stmt>> {
        self.loop_depth += 1;
        let body = self.statement();
        self.loop_depth -= 1;
        Ok(Box::new(body?))
    }

    fn var_kind(&mut self) -> PResult<VarKind> {
        let kind = match self.peek() {
            Some(Token::Ident(k)) if k == "let" => VarKind::Let,
            Some(Token::Ident(k)) if k == "const" => VarKind::Const,
            Some(Token::Ident(k)) if k == "var" => VarKind::Var,
            _ => return Err(self.unexpected()),
        };
        self.pos += 1;
        Ok(kind)
    }

    fn declarators(&mut self, kind: VarKind) -> PResult<Vec<(Pattern, Option<Expr>)>> {
        let mut decls = Vec::new();
        loop {
            let pattern = self.pattern()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            if init.is_none()
                && (kind == VarKind::Const || !matches!(pattern, Pattern::Ident(_)))
            {
                return Err(self.error("Missing initializer in declaration"));
            }
            decls.push((pattern, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(decls)
    }

    fn pattern(&mut self) -> PResult<Pattern> {
        if self.eat_punct("{") {
            let mut props = Vec::new();
            while !self.eat_punct("}") {
                let key = match self.peek() {
                    Some(Token::Str(s)) => {
                        let s = s.clone();
                        self.pos += 1;
                        s
                    }
                    _ => self.property_name()?,
                };
                let target = if self.eat_punct(":") {
                    self.pattern()?
                } else if RESERVED.contains(&key.as_str()) {
                    return Err(self.error(format!("Unexpected reserved word '{key}'")));
                } else {
                    Pattern::Ident(key.clone())
                };
                let default = if self.eat_punct("=") {
                    Some(self.assignment()?)
                } else {
                    None
                };
                props.push((key, target, default));
                if !self.eat_punct(",") {
                    self.expect_punct("}")?;
                    break;
                }
            }
            return Ok(Pattern::Object(props));
        }

        if self.eat_punct("[") {
            let mut items = Vec::new();
            while !self.eat_punct("]") {
                if self.eat_punct(",") {
                    items.push(None);
                    continue;
                }
                let target = self.pattern()?;
                let default = if self.eat_punct("=") {
                    Some(self.assignment()?)
                } else {
                    None
                };
                items.push(Some((target, default)));
                if !self.eat_punct(",") {
                    self.expect_punct("]")?;
                    break;
                }
            }
            return Ok(Pattern::Array(items));
        }

        Ok(Pattern::Ident(self.binding_name()?))
    }

    fn for_statement(&mut self) -> PResult<Stmt> {
        self.pos += 1;
        self.expect_punct("(")?;

        let mut init = None;
        if !self.eat_punct(";") {
            let is_decl = self.is_keyword("let") || self.is_keyword("const") || self.is_keyword("var");
            if is_decl || self.is_keyword_at(1, "of") || self.is_keyword_at(1, "in") {
                let kind = if is_decl { Some(self.var_kind()?) } else { None };
                let pattern = self.pattern()?;

                if self.eat_keyword("of") {
                    let iterable = self.assignment()?;
                    self.expect_punct(")")?;
                    let body = self.loop_body()?;
                    return Ok(Stmt::ForOf {
                        kind,
                        pattern,
                        iterable,
                        body,
                    });
                }
                if self.eat_keyword("in") {
                    let object = self.expression()?;
                    self.expect_punct(")")?;
                    let body = self.loop_body()?;
                    return Ok(Stmt::ForIn {
                        kind,
                        pattern,
                        object,
                        body,
                    });
                }

                let Some(kind) = kind else {
                    return Err(self.unexpected());
                };
                // Re-read the first declarator together with the rest.
                let first_init = if self.eat_punct("=") {
                    Some(self.assignment()?)
                } else {
                    None
                };
                if first_init.is_none() && kind == VarKind::Const {
                    return Err(self.error("Missing initializer in declaration"));
                }
                let mut decls = vec![(pattern, first_init)];
                if self.eat_punct(",") {
                    decls.extend(self.declarators(kind)?);
                }
                init = Some(Box::new(Stmt::Declare { kind, decls }));
            } else {
                init = Some(Box::new(Stmt::Expr(self.expression()?)));
            }
            self.expect_punct(";")?;
        }

        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = self.loop_body()?;
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn try_statement(&mut self) -> PResult<Stmt> {
        self.pos += 1;
        let block = self.block()?;
        let catch = if self.eat_keyword("catch") {
            let param = if self.eat_punct("(") {
                let p = self.pattern()?;
                self.expect_punct(")")?;
                Some(p)
            } else {
                None
            };
            Some((param, self.block()?))
        } else {
            None
        };
        let finally = if self.eat_keyword("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            return Err(self.error("Missing catch or finally after try"));
        }
        Ok(Stmt::Try {
            block,
            catch,
            finally,
        })
    }

    fn switch_statement(&mut self) -> PResult<Stmt> {
        self.pos += 1;
        self.expect_punct("(")?;
        let discriminant = self.expression()?;
        self.expect_punct(")")?;
        self.expect_punct("{")?;

        self.switch_depth += 1;
        let mut cases = Vec::new();
        let result = loop {
            if self.eat_punct("}") {
                break Ok(());
            }
            let test = if self.eat_keyword("case") {
                Some(self.expression()?)
            } else if self.eat_keyword("default") {
                None
            } else {
                break Err(self.unexpected());
            };
            self.expect_punct(":")?;
            let mut body = Vec::new();
            while !(self.is_keyword("case") || self.is_keyword("default") || self.is_punct("}")) {
                if self.at_end() {
                    return Err(self.unexpected());
                }
                body.push(self.statement()?);
            }
            cases.push(SwitchCase { test, body });
        };
        self.switch_depth -= 1;
        result?;
        Ok(Stmt::Switch(discriminant, cases))
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn function_declaration(&mut self) -> PResult<Stmt> {
        self.expect_keyword("function")?;
        let name = self.binding_name()?;
        let def = self.function_rest(Some(name))?;
        Ok(Stmt::Function(Rc::new(def)))
    }

    fn params(&mut self) -> PResult<Vec<Param>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.eat_punct(")") {
            let pattern = self.pattern()?;
            let default = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            params.push(Param { pattern, default });
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(params)
    }

    /// Parses parameters and a block body.
    fn function_rest(&mut self, name: Option<String>) -> PResult<FunctionDef> {
        let params = self.params()?;
        let body = self.function_block()?;
        Ok(FunctionDef {
            name,
            params,
            body: FunctionBody::Block(body),
            is_arrow: false,
        })
    }

    fn function_block(&mut self) -> PResult<Vec<Stmt>> {
        let saved = (self.loop_depth, self.switch_depth);
        self.loop_depth = 0;
        self.switch_depth = 0;
        self.function_depth += 1;
        let body = self.block();
        self.function_depth -= 1;
        (self.loop_depth, self.switch_depth) = saved;
        body
    }

    fn is_arrow_ahead(&self) -> bool {
        match self.peek() {
            Some(Token::Ident(name)) if !RESERVED.contains(&name.as_str()) => {
                self.is_punct_at(1, "=>")
            }
            Some(Token::Punct("(")) => {
                let mut depth = 0usize;
                let mut i = self.pos;
                while let Some(t) = self.tokens.get(i) {
                    match t.token {
                        Token::Punct("(" | "[" | "{") => depth += 1,
                        Token::Punct(")" | "]" | "}") => {
                            depth = depth.saturating_sub(1);
                            if depth == 0 {
                                return matches!(
                                    self.tokens.get(i + 1),
                                    Some(Spanned { token: Token::Punct("=>"), newline_before: false, .. })
                                );
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                false
            }
            _ => false,
        }
    }

    fn arrow_function(&mut self) -> PResult<Expr> {
        let params = if self.is_punct("(") {
            self.params()?
        } else {
            vec![Param {
                pattern: Pattern::Ident(self.binding_name()?),
                default: None,
            }]
        };
        self.expect_punct("=>")?;
        let body = if self.is_punct("{") {
            FunctionBody::Block(self.function_block()?)
        } else {
            self.function_depth += 1;
            let expr = self.assignment();
            self.function_depth -= 1;
            FunctionBody::Expr(Box::new(expr?))
        };
        Ok(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params,
            body,
            is_arrow: true,
        })))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        self.enter()?;
        let expr = self.assignment_inner();
        self.leave();
        expr
    }

    fn assignment_inner(&mut self) -> PResult<Expr> {
        if self.is_keyword("async") && !self.is_punct_at(1, "=>") {
            let saved = self.pos;
            self.pos += 1;
            if !self.newline_before() && self.is_arrow_ahead() {
                return self.arrow_function();
            }
            self.pos = saved;
        }
        if self.is_arrow_ahead() {
            return self.arrow_function();
        }

        let target = self.conditional()?;
        let op = match self.peek() {
            Some(Token::Punct(p)) => ASSIGN_OPS.iter().find(|(s, _)| s == p).map(|(_, op)| *op),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(target);
        };
        if !target.is_assignable() {
            return Err(self.error("Invalid left-hand side in assignment"));
        }
        self.pos += 1;
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let test = self.binary(0)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.assignment()?;
        self.expect_punct(":")?;
        let alternate = self.assignment()?;
        Ok(Expr::Conditional(
            Box::new(test),
            Box::new(consequent),
            Box::new(alternate),
        ))
    }

    /// Operator at the cursor with its precedence and associativity.
    fn binary_op(&self) -> Option<(OpKind, u8, bool)> {
        use BinaryOp as B;
        let op = match self.peek()? {
            Token::Punct(p) => match *p {
                "??" => (OpKind::Logical(LogicalOp::Nullish), 1, false),
                "||" => (OpKind::Logical(LogicalOp::Or), 2, false),
                "&&" => (OpKind::Logical(LogicalOp::And), 3, false),
                "|" => (OpKind::Binary(B::BitOr), 4, false),
                "^" => (OpKind::Binary(B::BitXor), 5, false),
                "&" => (OpKind::Binary(B::BitAnd), 6, false),
                "==" => (OpKind::Binary(B::Eq), 7, false),
                "!=" => (OpKind::Binary(B::NotEq), 7, false),
                "===" => (OpKind::Binary(B::StrictEq), 7, false),
                "!==" => (OpKind::Binary(B::StrictNotEq), 7, false),
                "<" => (OpKind::Binary(B::Lt), 8, false),
                "<=" => (OpKind::Binary(B::LtEq), 8, false),
                ">" => (OpKind::Binary(B::Gt), 8, false),
                ">=" => (OpKind::Binary(B::GtEq), 8, false),
                "<<" => (OpKind::Binary(B::Shl), 9, false),
                ">>" => (OpKind::Binary(B::Shr), 9, false),
                ">>>" => (OpKind::Binary(B::UShr), 9, false),
                "+" => (OpKind::Binary(B::Add), 10, false),
                "-" => (OpKind::Binary(B::Sub), 10, false),
                "*" => (OpKind::Binary(B::Mul), 11, false),
                "/" => (OpKind::Binary(B::Div), 11, false),
                "%" => (OpKind::Binary(B::Mod), 11, false),
                "**" => (OpKind::Binary(B::Pow), 12, true),
                _ => return None,
            },
            Token::Ident(name) => match name.as_str() {
                "in" => (OpKind::Binary(B::In), 8, false),
                "instanceof" => (OpKind::Binary(B::InstanceOf), 8, false),
                _ => return None,
            },
            _ => return None,
        };
        Some(op)
    }

    fn binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut left = self.unary()?;
        while let Some((op, prec, right_assoc)) = self.binary_op() {
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let next_min = if right_assoc { prec } else { prec + 1 };
            let right = self.binary(next_min)?;
            left = match op {
                OpKind::Binary(op) => Expr::Binary(op, Box::new(left), Box::new(right)),
                OpKind::Logical(op) => Expr::Logical(op, Box::new(left), Box::new(right)),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> PResult<Expr> {
        self.enter()?;
        let expr = self.unary_inner();
        self.leave();
        expr
    }

    fn unary_inner(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Some(Token::Punct("!")) => Some(UnaryOp::Not),
            Some(Token::Punct("-")) => Some(UnaryOp::Neg),
            Some(Token::Punct("+")) => Some(UnaryOp::Plus),
            Some(Token::Punct("~")) => Some(UnaryOp::BitNot),
            Some(Token::Ident(k)) if k == "typeof" => Some(UnaryOp::TypeOf),
            Some(Token::Ident(k)) if k == "void" => Some(UnaryOp::Void),
            Some(Token::Ident(k)) if k == "delete" => Some(UnaryOp::Delete),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.unary()?;
            return Ok(Expr::Unary(op, Box::new(operand)));
        }

        if self.is_punct("++") || self.is_punct("--") {
            let increment = self.is_punct("++");
            self.pos += 1;
            let target = self.unary()?;
            if !target.is_assignable() {
                return Err(self.error("Invalid left-hand side expression in prefix operation"));
            }
            return Ok(Expr::Update {
                increment,
                prefix: true,
                target: Box::new(target),
            });
        }

        if self.eat_keyword("await") {
            let operand = self.unary()?;
            return Ok(Expr::Await(Box::new(operand)));
        }

        let expr = self.call_member()?;
        if (self.is_punct("++") || self.is_punct("--")) && !self.newline_before() {
            if !expr.is_assignable() {
                return Err(self.error("Invalid left-hand side expression in postfix operation"));
            }
            let increment = self.is_punct("++");
            self.pos += 1;
            return Ok(Expr::Update {
                increment,
                prefix: false,
                target: Box::new(expr),
            });
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> PResult<Vec<Element>> {
        self.expect_punct("(")?;
        self.elements(")")
    }

    /// Comma-separated elements up to `close`, which is consumed.
    fn elements(&mut self, close: &str) -> PResult<Vec<Element>> {
        let mut items = Vec::new();
        while !self.eat_punct(close) {
            if self.eat_punct("...") {
                items.push(Element::Spread(self.assignment()?));
            } else {
                items.push(Element::Expr(self.assignment()?));
            }
            if !self.eat_punct(",") {
                self.expect_punct(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn call_member(&mut self) -> PResult<Expr> {
        let mut expr = if self.eat_keyword("new") {
            self.new_expression()?
        } else {
            self.primary()?
        };

        loop {
            if self.eat_punct(".") {
                let name = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Member::Named(name),
                    optional: false,
                };
            } else if self.eat_punct("?.") {
                if self.is_punct("(") {
                    let args = self.arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                    };
                } else if self.eat_punct("[") {
                    let property = self.expression()?;
                    self.expect_punct("]")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Member::Computed(Box::new(property)),
                        optional: true,
                    };
                } else {
                    let name = self.property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Member::Named(name),
                        optional: true,
                    };
                }
            } else if self.eat_punct("[") {
                let property = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Member::Computed(Box::new(property)),
                    optional: false,
                };
            } else if self.is_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn new_expression(&mut self) -> PResult<Expr> {
        let mut callee = self.primary()?;
        loop {
            if self.eat_punct(".") {
                let name = self.property_name()?;
                callee = Expr::Member {
                    object: Box::new(callee),
                    property: Member::Named(name),
                    optional: false,
                };
            } else if self.eat_punct("[") {
                let property = self.expression()?;
                self.expect_punct("]")?;
                callee = Expr::Member {
                    object: Box::new(callee),
                    property: Member::Computed(Box::new(property)),
                    optional: false,
                };
            } else {
                break;
            }
        }
        let args = if self.is_punct("(") {
            self.arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::New {
            callee: Box::new(callee),
            args,
        })
    }

    fn primary(&mut self) -> PResult<Expr> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected());
        };
        match token {
            Token::Number(n) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Token::Str(s) => {
                self.pos += 1;
                Ok(Expr::Str(s))
            }
            Token::Template(parts) => {
                let segments = parts
                    .into_iter()
                    .map(|part| match part {
                        TemplatePart::Text(text) => Ok(TemplateSegment::Text(text)),
                        TemplatePart::Expr(source) => self.embedded(&source).map(TemplateSegment::Expr),
                    })
                    .collect::<PResult<Vec<_>>>()?;
                self.pos += 1;
                Ok(Expr::Template(segments))
            }
            Token::Punct("(") => {
                self.pos += 1;
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Token::Punct("[") => {
                self.pos += 1;
                Ok(Expr::Array(self.elements("]")?))
            }
            Token::Punct("{") => {
                self.pos += 1;
                self.object_literal()
            }
            Token::Ident(name) => {
                let expr = match name.as_str() {
                    "true" => Expr::Bool(true),
                    "false" => Expr::Bool(false),
                    "null" => Expr::Null,
                    "undefined" => Expr::Undefined,
                    "this" => Expr::This,
                    "function" => {
                        self.pos += 1;
                        let fn_name = match self.peek() {
                            Some(Token::Ident(_)) => Some(self.binding_name()?),
                            _ => None,
                        };
                        return Ok(Expr::Function(Rc::new(self.function_rest(fn_name)?)));
                    }
                    "async" if self.is_keyword_at(1, "function") => {
                        self.pos += 1;
                        return self.primary();
                    }
                    _ if RESERVED.contains(&name.as_str()) => return Err(self.unexpected()),
                    _ => Expr::Ident(name),
                };
                self.pos += 1;
                Ok(expr)
            }
            Token::Punct(_) => Err(self.unexpected()),
        }
    }

    fn object_literal(&mut self) -> PResult<Expr> {
        let mut props = Vec::new();
        while !self.eat_punct("}") {
            if self.eat_punct("...") {
                props.push(Prop::Spread(self.assignment()?));
            } else {
                let (key, shorthand) = match self.peek().cloned() {
                    Some(Token::Ident(name)) => {
                        self.pos += 1;
                        (PropKey::Static(name.clone()), Some(name))
                    }
                    Some(Token::Str(s)) => {
                        self.pos += 1;
                        (PropKey::Static(s), None)
                    }
                    Some(Token::Number(n)) => {
                        self.pos += 1;
                        (PropKey::Static(number_to_string(n)), None)
                    }
                    Some(Token::Punct("[")) => {
                        self.pos += 1;
                        let key = self.expression()?;
                        self.expect_punct("]")?;
                        (PropKey::Computed(key), None)
                    }
                    _ => return Err(self.unexpected()),
                };

                let value = if self.is_punct("(") {
                    let name = match &key {
                        PropKey::Static(name) => Some(name.clone()),
                        PropKey::Computed(_) => None,
                    };
                    Expr::Function(Rc::new(self.function_rest(name)?))
                } else if self.eat_punct(":") {
                    self.assignment()?
                } else {
                    match shorthand {
                        Some(name) if !RESERVED.contains(&name.as_str()) => Expr::Ident(name),
                        _ => return Err(self.unexpected()),
                    }
                };
                props.push(Prop::KeyValue(key, value));
            }
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(Expr::Object(props))
    }

    /// Parses the source of a template interpolation.
    fn embedded(&self, source: &str) -> PResult<Expr> {
        let line = self.tokens.get(self.pos).map_or(1, |t| t.line);
        let tokens = tokenize(source).map_err(|e| SyntaxError::new(e.message, line, e.column))?;
        let mut inner = Parser::new(tokens);
        inner.function_depth = self.function_depth;
        inner.nesting = self.nesting;
        let expr = inner.expression()?;
        if !inner.at_end() {
            return Err(inner.unexpected());
        }
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(source: &str) -> Expr {
        match parse_program(source).unwrap().body.into_iter().next() {
            Some(Stmt::Expr(e)) => e,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    fn num(n: f64) -> Box<Expr> {
        Box::new(Expr::Number(n))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            expr("1 + 2 * 3"),
            Expr::Binary(
                BinaryOp::Add,
                num(1.0),
                Box::new(Expr::Binary(BinaryOp::Mul, num(2.0), num(3.0)))
            )
        );
        assert_eq!(
            expr("2 ** 3 ** 2"),
            Expr::Binary(
                BinaryOp::Pow,
                num(2.0),
                Box::new(Expr::Binary(BinaryOp::Pow, num(3.0), num(2.0)))
            )
        );
    }

    #[test]
    fn test_bitwise_precedence() {
        assert_eq!(
            expr("1 | 2 & 3 << 1 + 1"),
            Expr::Binary(
                BinaryOp::BitOr,
                num(1.0),
                Box::new(Expr::Binary(
                    BinaryOp::BitAnd,
                    num(2.0),
                    Box::new(Expr::Binary(
                        BinaryOp::Shl,
                        num(3.0),
                        Box::new(Expr::Binary(BinaryOp::Add, num(1.0), num(1.0)))
                    ))
                ))
            )
        );
        assert_eq!(
            expr("1 === 1 ^ 0"),
            Expr::Binary(
                BinaryOp::BitXor,
                Box::new(Expr::Binary(BinaryOp::StrictEq, num(1.0), num(1.0))),
                num(0.0)
            )
        );
        assert_eq!(expr("~1"), Expr::Unary(UnaryOp::BitNot, num(1.0)));
    }

    #[test]
    fn test_member_call_chain() {
        let e = expr("db.meals.find({}).toArray()");
        let Expr::Call { callee, args, .. } = e else {
            panic!("not a call");
        };
        assert!(args.is_empty());
        assert!(matches!(*callee, Expr::Member { property: Member::Named(ref n), .. } if n == "toArray"));
    }

    #[test]
    fn test_arrow_functions() {
        assert!(matches!(expr("x => x + 1"), Expr::Function(ref f) if f.is_arrow && f.params.len() == 1));
        assert!(matches!(expr("(a, b = 2) => { return a + b }"), Expr::Function(ref f) if f.params.len() == 2));
        assert!(matches!(expr("async () => 1"), Expr::Function(ref f) if f.is_arrow));
        assert!(matches!(expr("(a)"), Expr::Ident(_)));
    }

    #[test]
    fn test_semicolon_insertion() {
        let program = parse_program("let a = 1\nlet b = 2\nprint(a + b)").unwrap();
        assert_eq!(program.body.len(), 3);
        assert!(parse_program("let a = 1 let b = 2").is_err());
    }

    #[test]
    fn test_object_literal_forms() {
        let e = expr("({a, 'b': 2, [k]: 3, m() { return 1 }, ...rest})");
        let Expr::Object(props) = e else {
            panic!("not an object");
        };
        assert_eq!(props.len(), 5);
        assert!(matches!(props[4], Prop::Spread(_)));
    }

    #[test]
    fn test_statements() {
        let source = r"
            const {name, tags: [first]} = doc;
            for (let i = 0, j = 1; i < 3; i++) { if (i) continue; }
            for (const m of meals) print(m)
            for (k in obj) {}
            try { throw new Error('x') } catch (e) { print(e.message) } finally {}
            switch (x) { case 1: print(1); break; default: print(2) }
            do { x-- } while (x > 0)
        ";
        let program = parse_program(source).unwrap();
        assert_eq!(program.body.len(), 7);
        assert!(matches!(program.body[3], Stmt::ForIn { kind: None, .. }));
    }

    #[test]
    fn test_template_literal() {
        let e = expr("`n=${a + 1}!`");
        let Expr::Template(segments) = e else {
            panic!("not a template");
        };
        assert_eq!(segments.len(), 3);
        assert!(matches!(segments[1], TemplateSegment::Expr(Expr::Binary(BinaryOp::Add, _, _))));
    }

    #[test]
    fn test_syntax_errors() {
        let err = parse_program("not valid syntax !!!").unwrap_err();
        assert!(err.message.contains("Unexpected"));
        assert!(parse_program("let = 5").is_err());
        assert!(parse_program("return 1").is_err());
        assert!(parse_program("break").is_err());
        assert!(parse_program("1 = 2").is_err());
        assert!(parse_program("const x;").is_err());
        assert!(parse_program("f(").is_err());
        assert!(parse_program("try {}").is_err());
        assert!(parse_program("outer: for (;;) { break outer }").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        let err = parse_program(&deep).unwrap_err();
        assert!(err.message.contains("nested too deeply"));
    }
}
