//! Recursive-descent parser for PArL
//!
//! Single-token lookahead over the scanner's skipping interface. The
//! parser tracks the offset of the previously consumed token so a failed
//! expectation can report the line and column of the token that broke the
//! grammar. There is no recovery: the first violation aborts the parse.

use crate::ast::{BinOp, Block, DeclSize, Expr, FuncDecl, Param, Program, Stmt, Target};
use crate::builtins::Builtin;
use crate::lexer::{
    AddOp, Bracket, Keyword, Lexer, MultOp, Punct, RelOp, Token, TokenKind,
};
use crate::types::{Kind, TypeTag};
use std::fmt;

/// Fatal parse failure with a 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
}

impl SyntaxError {
    /// Position `offset` within `source`, with the column measured from
    /// the last newline.
    fn at(source: &str, offset: usize) -> Self {
        let prefix = &source[..offset.min(source.len())];
        let line = prefix.matches('\n').count() + 1;
        let column = match prefix.rfind('\n') {
            Some(newline) => offset - newline,
            None => offset + 1,
        };
        SyntaxError { line, column }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Syntax error at line {} character {}", self.line, self.column)
    }
}

impl std::error::Error for SyntaxError {}

pub struct Parser<'a> {
    lexer: Lexer,
    source: &'a str,
    offset: usize,
    /// Start offset of the most recently consumed token; diagnostics point
    /// here.
    past_offset: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Parser {
            lexer: Lexer::new(),
            source,
            offset: 0,
            past_offset: 0,
        }
    }

    pub fn parse(&mut self) -> Result<Program, SyntaxError> {
        let block = self.parse_block(true)?;
        Ok(Program { block })
    }

    /// Peek the next significant token. Skipped trivia is consumed for
    /// good; the token itself is not.
    fn peek(&mut self) -> Token {
        let (token, start) = self.lexer.peek(self.source, self.offset, true, true);
        self.offset = start;
        token
    }

    fn advance(&mut self, token: &Token) {
        self.past_offset = token.start;
        self.offset = token.start + token.length;
    }

    fn next(&mut self) -> Token {
        let token = self.peek();
        self.advance(&token);
        token
    }

    fn error(&self) -> SyntaxError {
        SyntaxError::at(self.source, self.past_offset)
    }

    fn expect_identifier(&mut self) -> Result<String, SyntaxError> {
        match self.next().kind {
            TokenKind::Identifier(name) => Ok(name),
            _ => Err(self.error()),
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<(), SyntaxError> {
        match self.next().kind {
            TokenKind::Keyword(k) if k == keyword => Ok(()),
            _ => Err(self.error()),
        }
    }

    fn expect_punct(&mut self, punct: Punct) -> Result<(), SyntaxError> {
        match self.next().kind {
            TokenKind::Punct(p) if p == punct => Ok(()),
            _ => Err(self.error()),
        }
    }

    fn expect_bracket(&mut self, bracket: Bracket) -> Result<(), SyntaxError> {
        match self.next().kind {
            TokenKind::Bracket(b) if b == bracket => Ok(()),
            _ => Err(self.error()),
        }
    }

    fn expect_var_type(&mut self) -> Result<Kind, SyntaxError> {
        match self.next().kind {
            TokenKind::VarType(kind) => Ok(kind),
            _ => Err(self.error()),
        }
    }

    fn expect_assign(&mut self) -> Result<(), SyntaxError> {
        match self.next().kind {
            TokenKind::Assign => Ok(()),
            _ => Err(self.error()),
        }
    }

    fn parse_block(&mut self, root: bool) -> Result<Block, SyntaxError> {
        if !root {
            self.expect_bracket(Bracket::OpenCurly)?;
        }

        let mut statements = Vec::new();
        loop {
            let token = self.peek();
            let done = if root {
                matches!(token.kind, TokenKind::Eof)
            } else {
                matches!(token.kind, TokenKind::Bracket(Bracket::CloseCurly))
            };
            if done {
                self.advance(&token);
                return Ok(Block { statements });
            }
            statements.push(self.parse_statement()?);
        }
    }

    fn parse_statement(&mut self) -> Result<Stmt, SyntaxError> {
        let token = self.peek();
        match token.kind {
            TokenKind::Keyword(Keyword::Let) => {
                let decl = self.parse_var_decl()?;
                self.expect_punct(Punct::Semicolon)?;
                Ok(decl)
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Return) => {
                self.advance(&token);
                let expr = self.parse_expression(false)?;
                self.expect_punct(Punct::Semicolon)?;
                Ok(Stmt::Return(expr))
            }
            TokenKind::Keyword(Keyword::Fun) => self.parse_func_decl(),
            TokenKind::Identifier(_) => {
                let assign = self.parse_assignment()?;
                self.expect_punct(Punct::Semicolon)?;
                Ok(assign)
            }
            TokenKind::Builtin(builtin) if !builtin.is_expression() => {
                self.advance(&token);
                let stmt = self.parse_builtin_statement(builtin)?;
                self.expect_punct(Punct::Semicolon)?;
                Ok(stmt)
            }
            _ => {
                self.advance(&token);
                Err(self.error())
            }
        }
    }

    /// `let id : Type [ '[' [n] ']' ] = …`
    fn parse_var_decl(&mut self) -> Result<Stmt, SyntaxError> {
        self.expect_keyword(Keyword::Let)?;
        let name = self.expect_identifier()?;
        self.expect_punct(Punct::Colon)?;
        let kind = self.expect_var_type()?;

        let mut size = DeclSize::Scalar;
        let token = self.peek();
        if matches!(token.kind, TokenKind::Bracket(Bracket::OpenSquare)) {
            self.advance(&token);
            let token = self.peek();
            if let TokenKind::IntLiteral(n) = token.kind {
                self.advance(&token);
                size = DeclSize::Fixed(n as usize);
            } else {
                size = DeclSize::Inferred;
            }
            self.expect_bracket(Bracket::CloseSquare)?;
        }

        self.expect_assign()?;

        let init = if size == DeclSize::Scalar {
            self.parse_expression(false)?
        } else {
            self.parse_array_literal(size)?
        };

        Ok(Stmt::VarDecl {
            name,
            kind,
            size,
            init,
        })
    }

    /// `'[' Literal {',' Literal} ']'`. A single literal with a declared
    /// size becomes a repeat form of that size.
    fn parse_array_literal(&mut self, size: DeclSize) -> Result<Expr, SyntaxError> {
        self.expect_bracket(Bracket::OpenSquare)?;

        let mut elements = vec![self.parse_literal()?];
        loop {
            let token = self.next();
            match token.kind {
                TokenKind::Bracket(Bracket::CloseSquare) => break,
                TokenKind::Punct(Punct::Comma) => elements.push(self.parse_literal()?),
                _ => return Err(self.error()),
            }
        }

        let repeat = match size {
            DeclSize::Fixed(n) if elements.len() == 1 => Some(n),
            _ => None,
        };

        Ok(Expr::ArrayLiteral { elements, repeat })
    }

    fn parse_literal(&mut self) -> Result<Expr, SyntaxError> {
        match self.next().kind {
            TokenKind::IntLiteral(value) => Ok(Expr::IntLiteral(value)),
            TokenKind::FloatLiteral(value) => Ok(Expr::FloatLiteral(value)),
            TokenKind::BooleanLiteral(value) => Ok(Expr::BooleanLiteral(value)),
            TokenKind::ColourLiteral(value) => Ok(Expr::ColourLiteral(value)),
            _ => Err(self.error()),
        }
    }

    /// `id [ '[' Expr ']' ] = Expr` — the trailing semicolon belongs to
    /// the caller.
    fn parse_assignment(&mut self) -> Result<Stmt, SyntaxError> {
        let name = self.expect_identifier()?;

        let token = self.peek();
        let target = if matches!(token.kind, TokenKind::Bracket(Bracket::OpenSquare)) {
            self.advance(&token);
            let index = self.parse_expression(false)?;
            self.expect_bracket(Bracket::CloseSquare)?;
            Target::Index { name, index }
        } else {
            Target::Variable(name)
        };

        self.expect_assign()?;
        let value = self.parse_expression(false)?;

        Ok(Stmt::Assign { target, value })
    }

    fn parse_if(&mut self) -> Result<Stmt, SyntaxError> {
        self.expect_keyword(Keyword::If)?;

        // The parenthesized condition is picked up as a sub-expression
        // factor; only assert the paren is there.
        let token = self.peek();
        if !matches!(token.kind, TokenKind::Bracket(Bracket::OpenParen)) {
            self.advance(&token);
            return Err(self.error());
        }
        let cond = self.parse_expression(false)?;

        let then_block = self.parse_block(false)?;

        let mut else_block = None;
        let token = self.peek();
        if matches!(token.kind, TokenKind::Keyword(Keyword::Else)) {
            self.advance(&token);
            else_block = Some(self.parse_block(false)?);
        }

        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, SyntaxError> {
        self.expect_keyword(Keyword::While)?;

        let token = self.peek();
        if !matches!(token.kind, TokenKind::Bracket(Bracket::OpenParen)) {
            self.advance(&token);
            return Err(self.error());
        }
        let cond = self.parse_expression(false)?;

        let body = self.parse_block(false)?;
        Ok(Stmt::While { cond, body })
    }

    /// `for '(' [VarDecl] ';' Expr ';' [Assignment] ')' Block`
    fn parse_for(&mut self) -> Result<Stmt, SyntaxError> {
        self.expect_keyword(Keyword::For)?;
        self.expect_bracket(Bracket::OpenParen)?;

        let init = if matches!(self.peek().kind, TokenKind::Keyword(Keyword::Let)) {
            Some(Box::new(self.parse_var_decl()?))
        } else {
            None
        };
        self.expect_punct(Punct::Semicolon)?;

        let cond = self.parse_expression(false)?;
        self.expect_punct(Punct::Semicolon)?;

        let step = if matches!(self.peek().kind, TokenKind::Identifier(_)) {
            Some(Box::new(self.parse_assignment()?))
        } else {
            None
        };
        self.expect_bracket(Bracket::CloseParen)?;

        let body = self.parse_block(false)?;
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
        })
    }

    /// `fun id '(' [Param {',' Param}] ')' '->' Type Block`
    fn parse_func_decl(&mut self) -> Result<Stmt, SyntaxError> {
        self.expect_keyword(Keyword::Fun)?;
        let name = self.expect_identifier()?;
        self.expect_bracket(Bracket::OpenParen)?;

        let mut params = Vec::new();
        let token = self.peek();
        if matches!(token.kind, TokenKind::Bracket(Bracket::CloseParen)) {
            self.advance(&token);
        } else {
            loop {
                params.push(self.parse_param()?);
                let token = self.next();
                match token.kind {
                    TokenKind::Bracket(Bracket::CloseParen) => break,
                    TokenKind::Punct(Punct::Comma) => continue,
                    _ => return Err(self.error()),
                }
            }
        }

        self.expect_punct(Punct::Arrow)?;
        let ret = self.parse_declared_type()?;
        let body = self.parse_block(false)?;

        Ok(Stmt::FuncDecl(FuncDecl {
            name,
            params,
            ret,
            body,
        }))
    }

    fn parse_param(&mut self) -> Result<Param, SyntaxError> {
        let name = self.expect_identifier()?;
        self.expect_punct(Punct::Colon)?;
        let ty = self.parse_declared_type()?;
        Ok(Param { name, ty })
    }

    /// A type in parameter or return position: kind with an optional
    /// `[n]` suffix. The size must be spelled out here; inference only
    /// exists for `let` initializers.
    fn parse_declared_type(&mut self) -> Result<TypeTag, SyntaxError> {
        let kind = self.expect_var_type()?;

        let token = self.peek();
        if matches!(token.kind, TokenKind::Bracket(Bracket::OpenSquare)) {
            self.advance(&token);
            let size = match self.next().kind {
                TokenKind::IntLiteral(n) => n as usize,
                _ => return Err(self.error()),
            };
            self.expect_bracket(Bracket::CloseSquare)?;
            return Ok(TypeTag::array(kind, size));
        }

        Ok(TypeTag::scalar(kind))
    }

    fn parse_builtin_statement(&mut self, builtin: Builtin) -> Result<Stmt, SyntaxError> {
        match builtin {
            Builtin::Print => Ok(Stmt::Print(self.parse_expression(false)?)),
            Builtin::Delay => Ok(Stmt::Delay(self.parse_expression(false)?)),
            Builtin::Clear => Ok(Stmt::Clear(self.parse_expression(false)?)),
            Builtin::Write => {
                let x = self.parse_expression(false)?;
                self.expect_punct(Punct::Comma)?;
                let y = self.parse_expression(false)?;
                self.expect_punct(Punct::Comma)?;
                let colour = self.parse_expression(false)?;
                Ok(Stmt::Write { x, y, colour })
            }
            Builtin::WriteBox => {
                let x = self.parse_expression(false)?;
                self.expect_punct(Punct::Comma)?;
                let y = self.parse_expression(false)?;
                self.expect_punct(Punct::Comma)?;
                let w = self.parse_expression(false)?;
                self.expect_punct(Punct::Comma)?;
                let h = self.parse_expression(false)?;
                self.expect_punct(Punct::Comma)?;
                let colour = self.parse_expression(false)?;
                Ok(Stmt::WriteBox { x, y, w, h, colour })
            }
            _ => Err(self.error()),
        }
    }

    /// `Simple { RelOp Simple } [ 'as' Type ]`. With `sub_expr` set, the
    /// expression must be terminated by a `)` which is consumed.
    fn parse_expression(&mut self, sub_expr: bool) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_simple_expression()?;

        loop {
            let token = self.peek();
            let op = match token.kind {
                TokenKind::RelOp(RelOp::Eq) => BinOp::Eq,
                TokenKind::RelOp(RelOp::Ne) => BinOp::Ne,
                TokenKind::RelOp(RelOp::Lt) => BinOp::Lt,
                TokenKind::RelOp(RelOp::Le) => BinOp::Le,
                TokenKind::RelOp(RelOp::Gt) => BinOp::Gt,
                TokenKind::RelOp(RelOp::Ge) => BinOp::Ge,
                _ => break,
            };
            self.advance(&token);
            let right = self.parse_simple_expression()?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        let token = self.peek();
        if matches!(token.kind, TokenKind::Keyword(Keyword::As)) {
            self.advance(&token);
            let target = self.expect_var_type()?;
            expr = Expr::Cast {
                target,
                expr: Box::new(expr),
            };
        }

        if sub_expr {
            self.expect_bracket(Bracket::CloseParen)?;
        }

        Ok(expr)
    }

    fn parse_simple_expression(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_term()?;

        loop {
            let token = self.peek();
            let op = match token.kind {
                TokenKind::AddOp(AddOp::Add) => BinOp::Add,
                TokenKind::AddOp(AddOp::Sub) => BinOp::Sub,
                TokenKind::AddOp(AddOp::Or) => BinOp::Or,
                _ => break,
            };
            self.advance(&token);
            let right = self.parse_term()?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_factor()?;

        loop {
            let token = self.peek();
            let op = match token.kind {
                TokenKind::MultOp(MultOp::Mul) => BinOp::Mul,
                TokenKind::MultOp(MultOp::Div) => BinOp::Div,
                TokenKind::MultOp(MultOp::Mod) => BinOp::Mod,
                TokenKind::MultOp(MultOp::And) => BinOp::And,
                _ => break,
            };
            self.advance(&token);
            let right = self.parse_factor()?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, SyntaxError> {
        let token = self.next();
        match token.kind {
            TokenKind::IntLiteral(value) => Ok(Expr::IntLiteral(value)),
            TokenKind::FloatLiteral(value) => Ok(Expr::FloatLiteral(value)),
            TokenKind::BooleanLiteral(value) => Ok(Expr::BooleanLiteral(value)),
            TokenKind::ColourLiteral(value) => Ok(Expr::ColourLiteral(value)),

            TokenKind::Identifier(name) => {
                let token = self.peek();
                match token.kind {
                    TokenKind::Bracket(Bracket::OpenParen) => {
                        self.advance(&token);
                        let args = self.parse_args()?;
                        Ok(Expr::Call { name, args })
                    }
                    TokenKind::Bracket(Bracket::OpenSquare) => {
                        self.advance(&token);
                        let index = self.parse_expression(false)?;
                        self.expect_bracket(Bracket::CloseSquare)?;
                        Ok(Expr::ArrayIndex {
                            name,
                            index: Box::new(index),
                        })
                    }
                    _ => Ok(Expr::Identifier(name)),
                }
            }

            TokenKind::Bracket(Bracket::OpenParen) => self.parse_expression(true),

            TokenKind::UnaryOp => Ok(Expr::Not(Box::new(self.parse_expression(false)?))),
            TokenKind::AddOp(AddOp::Sub) => {
                Ok(Expr::Negate(Box::new(self.parse_expression(false)?)))
            }

            TokenKind::Builtin(Builtin::Width) => Ok(Expr::Width),
            TokenKind::Builtin(Builtin::Height) => Ok(Expr::Height),
            TokenKind::Builtin(Builtin::Read) => {
                let x = self.parse_expression(false)?;
                self.expect_punct(Punct::Comma)?;
                let y = self.parse_expression(false)?;
                Ok(Expr::Read {
                    x: Box::new(x),
                    y: Box::new(y),
                })
            }
            TokenKind::Builtin(Builtin::RandomInt) => Ok(Expr::RandomInt {
                max: Box::new(self.parse_expression(false)?),
            }),

            _ => Err(self.error()),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let token = self.peek();
        if matches!(token.kind, TokenKind::Bracket(Bracket::CloseParen)) {
            self.advance(&token);
            return Ok(Vec::new());
        }

        let mut args = Vec::new();
        loop {
            args.push(self.parse_expression(false)?);
            let token = self.next();
            match token.kind {
                TokenKind::Bracket(Bracket::CloseParen) => return Ok(args),
                TokenKind::Punct(Punct::Comma) => continue,
                _ => return Err(self.error()),
            }
        }
    }
}
