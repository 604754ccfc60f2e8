//! Recursive-descent statement/declaration parser with
//! precedence-climbing for expressions. On a syntax error the parser
//! records it and synchronizes to the next `;`, continuing to collect
//! further errors rather than stopping at the first one.

use crate::ast::*;
use crate::lexer::{Lexer, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub col: u32,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<ParseError>,
}

type PResult<T> = Result<T, ()>;

impl Parser {
    pub fn new(source: &str) -> (Self, Vec<crate::lexer::LexError>) {
        let (tokens, lex_errors) = Lexer::new(source).tokenize();
        (Parser { tokens, pos: 0, errors: Vec::new() }, lex_errors)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let i = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[i]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let tok = self.peek().clone();
            self.error(format!("expected {kind}, found {:?} '{}'", tok.kind, tok.lexeme));
            Err(())
        }
    }

    fn error(&mut self, message: String) {
        let tok = self.peek();
        self.errors.push(ParseError { message, line: tok.line, col: tok.col });
    }

    fn synchronize(&mut self) {
        while !self.check(TokenKind::Semicolon) && !self.check(TokenKind::Eof) {
            self.advance();
        }
        if self.check(TokenKind::Semicolon) {
            self.advance();
        }
    }

    pub fn parse(mut self) -> Result<Program, Vec<ParseError>> {
        let program = self.parse_program();
        match program {
            Some(p) if self.errors.is_empty() => Ok(p),
            _ => Err(self.errors),
        }
    }

    fn parse_program(&mut self) -> Option<Program> {
        self.expect(TokenKind::Program).ok()?;
        let name = self.expect(TokenKind::Id).ok()?;
        self.expect(TokenKind::Semicolon).ok()?;
        let declarations = self.parse_declarations();
        let body = self.parse_body();
        self.expect(TokenKind::End).ok()?;
        self.skip_trailing_name();
        self.expect(TokenKind::Dot).ok()?;
        Some(Program { name, declarations, body })
    }

    /// A module or program body optionally opens with `begin`, which has
    /// no closing counterpart of its own: the single trailing `end` that
    /// follows the statement list closes both the `begin` (if present)
    /// and the enclosing module.
    fn parse_body(&mut self) -> Vec<Stat> {
        if self.check(TokenKind::Begin) {
            self.advance();
        }
        self.parse_stat_list_until(&[TokenKind::End])
    }

    /// `end p.` / `end f;` repeat the program or module name before the
    /// closing punctuation; it is not re-validated against the
    /// declaration, just consumed.
    fn skip_trailing_name(&mut self) {
        if self.check(TokenKind::Id) {
            self.advance();
        }
    }

    fn parse_declarations(&mut self) -> Vec<Declaration> {
        let mut decls = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::Id => {
                    if let Some(d) = self.parse_var_decl() {
                        decls.push(Declaration::Var(d));
                    } else {
                        self.synchronize();
                    }
                }
                TokenKind::Procedure | TokenKind::Function => {
                    if let Some(m) = self.parse_module_decl() {
                        decls.push(Declaration::Module(m));
                    } else {
                        self.synchronize();
                    }
                }
                _ => break,
            }
        }
        decls
    }

    fn parse_var_decl(&mut self) -> Option<VarDecl> {
        let name = self.expect(TokenKind::Id).ok()?;
        self.expect(TokenKind::Colon).ok()?;
        let ty = self.parse_type()?;
        self.expect(TokenKind::Semicolon).ok()?;
        Some(VarDecl { name, ty, init: None })
    }

    /// A local declaration appearing inside a statement body, optionally
    /// initialized: `v: vector[2] of integer = [1, 2];`.
    fn parse_local_var_decl(&mut self) -> Option<Stat> {
        let name = self.expect(TokenKind::Id).ok()?;
        self.expect(TokenKind::Colon).ok()?;
        let ty = self.parse_type()?;
        let init = if self.check(TokenKind::Assign) {
            self.advance();
            Some(self.parse_expr().ok()?)
        } else {
            None
        };
        Some(Stat::VarDecl(VarDecl { name, ty, init }))
    }

    fn parse_type(&mut self) -> Option<TypeNode> {
        match self.peek().kind {
            TokenKind::IntegerKw => {
                self.advance();
                Some(TypeNode::Integer)
            }
            TokenKind::BooleanKw => {
                self.advance();
                Some(TypeNode::Boolean)
            }
            TokenKind::StringKw => {
                self.advance();
                Some(TypeNode::String)
            }
            TokenKind::Vector => {
                self.advance();
                self.expect(TokenKind::LSquare).ok()?;
                let mut dims = vec![self.parse_expr().ok()?];
                while self.check(TokenKind::Comma) {
                    self.advance();
                    dims.push(self.parse_expr().ok()?);
                }
                self.expect(TokenKind::RSquare).ok()?;
                self.expect(TokenKind::Of).ok()?;
                let base = self.parse_type()?;
                Some(TypeNode::Vector { base: Box::new(base), dimensions: dims })
            }
            _ => {
                self.error("expected a type".to_string());
                None
            }
        }
    }

    fn parse_module_decl(&mut self) -> Option<ModuleDecl> {
        let is_function = self.check(TokenKind::Function);
        self.advance();
        let name = self.expect(TokenKind::Id).ok()?;
        self.expect(TokenKind::LParen).ok()?;
        let mut formals = Vec::new();
        if !self.check(TokenKind::RParen) {
            formals.push(self.parse_formal()?);
            while self.check(TokenKind::Comma) {
                self.advance();
                formals.push(self.parse_formal()?);
            }
        }
        self.expect(TokenKind::RParen).ok()?;
        let return_type = if is_function {
            self.expect(TokenKind::Colon).ok()?;
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(TokenKind::Semicolon).ok()?;
        let declarations = self.parse_declarations();
        let body = self.parse_body();
        self.expect(TokenKind::End).ok()?;
        self.skip_trailing_name();
        self.expect(TokenKind::Semicolon).ok()?;
        Some(ModuleDecl { is_function, name, formals, return_type, declarations, body })
    }

    fn parse_formal(&mut self) -> Option<Formal> {
        let mode = match self.peek().kind {
            TokenKind::Out => {
                self.advance();
                Mode::Out
            }
            TokenKind::InOut => {
                self.advance();
                Mode::InOut
            }
            _ => Mode::In,
        };
        let name = self.expect(TokenKind::Id).ok()?;
        self.expect(TokenKind::Colon).ok()?;
        let ty = self.parse_type()?;
        Some(Formal { mode, name, ty })
    }

    /// Statements in a list are separated by `;`, not terminated by it: a
    /// trailing separator before the stop token is optional.
    fn parse_stat_list_until(&mut self, stop: &[TokenKind]) -> Vec<Stat> {
        let mut stats = Vec::new();
        if stop.contains(&self.peek().kind) || self.check(TokenKind::Eof) {
            return stats;
        }
        loop {
            match self.parse_statement() {
                Some(s) => stats.push(s),
                None => self.synchronize(),
            }
            if self.check(TokenKind::Semicolon) {
                self.advance();
                if stop.contains(&self.peek().kind) || self.check(TokenKind::Eof) {
                    break;
                }
            } else {
                break;
            }
        }
        stats
    }

    fn parse_statement(&mut self) -> Option<Stat> {
        match self.peek().kind {
            TokenKind::Id if self.peek_at(1).kind == TokenKind::Colon => self.parse_local_var_decl(),
            TokenKind::Read => self.parse_read(),
            TokenKind::Write => self.parse_write(false),
            TokenKind::Writeln => self.parse_write(true),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Repeat => self.parse_repeat(),
            TokenKind::For => self.parse_for(),
            TokenKind::Exit => self.parse_exit(),
            TokenKind::Break => {
                let token = self.advance();
                Some(Stat::Break { token })
            }
            _ => self.parse_expr_or_assign(),
        }
    }

    /// True at a token that can never start an expression or statement,
    /// i.e. one of the stop tokens a statement list may end on. Used to
    /// tell an `exit` / `exit <expr>` apart without consuming the
    /// following separator.
    fn at_stat_terminator(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Semicolon
                | TokenKind::End
                | TokenKind::Elsif
                | TokenKind::Else
                | TokenKind::Until
                | TokenKind::Eof
        )
    }

    fn parse_read(&mut self) -> Option<Stat> {
        let token = self.advance();
        self.expect(TokenKind::LParen).ok()?;
        let target = self.parse_expr().ok()?;
        self.expect(TokenKind::RParen).ok()?;
        Some(Stat::Read { token, target })
    }

    fn parse_write(&mut self, newline: bool) -> Option<Stat> {
        let token = self.advance();
        self.expect(TokenKind::LParen).ok()?;
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            args.push(self.parse_expr().ok()?);
            while self.check(TokenKind::Comma) {
                self.advance();
                args.push(self.parse_expr().ok()?);
            }
        }
        self.expect(TokenKind::RParen).ok()?;
        Some(Stat::Write { token, args, newline })
    }

    fn parse_if(&mut self) -> Option<Stat> {
        let token = self.advance();
        let mut arms = Vec::new();
        let cond = self.parse_expr().ok()?;
        self.expect(TokenKind::Then).ok()?;
        let then_body = Stat::StatList(self.parse_stat_list_until(&[
            TokenKind::Elsif,
            TokenKind::Else,
            TokenKind::End,
        ]));
        arms.push((cond, then_body));
        while self.check(TokenKind::Elsif) {
            self.advance();
            let c = self.parse_expr().ok()?;
            self.expect(TokenKind::Then).ok()?;
            let b = Stat::StatList(self.parse_stat_list_until(&[
                TokenKind::Elsif,
                TokenKind::Else,
                TokenKind::End,
            ]));
            arms.push((c, b));
        }
        let otherwise = if self.check(TokenKind::Else) {
            self.advance();
            Some(Box::new(Stat::StatList(
                self.parse_stat_list_until(&[TokenKind::End]),
            )))
        } else {
            None
        };
        self.expect(TokenKind::End).ok()?;
        Some(Stat::If { token, arms, otherwise })
    }

    fn parse_while(&mut self) -> Option<Stat> {
        let token = self.advance();
        let cond = self.parse_expr().ok()?;
        self.expect(TokenKind::Do).ok()?;
        let body = Stat::StatList(self.parse_stat_list_until(&[TokenKind::End]));
        self.expect(TokenKind::End).ok()?;
        Some(Stat::While { token, cond, body: Box::new(body) })
    }

    fn parse_repeat(&mut self) -> Option<Stat> {
        let token = self.advance();
        let body = Stat::StatList(self.parse_stat_list_until(&[TokenKind::Until]));
        self.expect(TokenKind::Until).ok()?;
        let cond = self.parse_expr().ok()?;
        Some(Stat::Repeat { token, body: Box::new(body), cond })
    }

    fn parse_for(&mut self) -> Option<Stat> {
        let token = self.advance();
        let var = self.expect(TokenKind::Id).ok()?;
        self.expect(TokenKind::ColonAssign).ok()?;
        let from = self.parse_expr().ok()?;
        self.expect(TokenKind::To).ok()?;
        let to = self.parse_expr().ok()?;
        self.expect(TokenKind::Do).ok()?;
        let body = Stat::StatList(self.parse_stat_list_until(&[TokenKind::End]));
        self.expect(TokenKind::End).ok()?;
        Some(Stat::For { token, var, from, to, body: Box::new(body) })
    }

    fn parse_exit(&mut self) -> Option<Stat> {
        let token = self.advance();
        let value = if self.at_stat_terminator() {
            None
        } else {
            Some(self.parse_expr().ok()?)
        };
        Some(Stat::Exit { token, value })
    }

    fn parse_expr_or_assign(&mut self) -> Option<Stat> {
        let expr = self.parse_expr().ok()?;
        if self.check(TokenKind::Assign) {
            let token = self.advance();
            let value = self.parse_expr().ok()?;
            Some(Stat::Assign { token, target: expr, value })
        } else {
            Some(Stat::Expr(expr))
        }
    }

    // --- Expressions: precedence-climbing ---
    // or < and < equality < relational < additive < multiplicative < unary < postfix < primary

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_and()?;
        while self.check(TokenKind::Or) {
            let token = self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary { token, op: BinaryOp::Or, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.check(TokenKind::And) {
            let token = self.advance();
            let right = self.parse_equality()?;
            left = Expr::Binary { token, op: BinaryOp::And, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::Neq => BinaryOp::Neq,
                _ => break,
            };
            let token = self.advance();
            let right = self.parse_relational()?;
            left = Expr::Binary { token, op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::GreaterEq => BinaryOp::GreaterEq,
                TokenKind::Less => BinaryOp::Less,
                TokenKind::LessEq => BinaryOp::LessEq,
                _ => break,
            };
            let token = self.advance();
            let right = self.parse_additive()?;
            left = Expr::Binary { token, op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Plus,
                TokenKind::Minus => BinaryOp::Minus,
                _ => break,
            };
            let token = self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary { token, op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Times,
                TokenKind::Slash => BinaryOp::Divide,
                _ => break,
            };
            let token = self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary { token, op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        match self.peek().kind {
            TokenKind::Bang => {
                let token = self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary { token, op: UnaryOp::Not, operand: Box::new(operand) })
            }
            TokenKind::Minus => {
                let token = self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary { token, op: UnaryOp::Neg, operand: Box::new(operand) })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(TokenKind::LSquare) {
                let token = self.advance();
                let mut indices = vec![self.parse_expr()?];
                while self.check(TokenKind::Comma) {
                    self.advance();
                    indices.push(self.parse_expr()?);
                }
                self.expect(TokenKind::RSquare).map_err(|_| ())?;
                expr = Expr::Indexing { token, target: Box::new(expr), indices };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        match self.peek().kind {
            TokenKind::IntegerLit => Ok(Expr::IntegerConst(self.advance())),
            TokenKind::True | TokenKind::False => Ok(Expr::BooleanConst(self.advance())),
            TokenKind::StringLit => Ok(Expr::StringConst(self.advance())),
            TokenKind::LSquare => {
                let token = self.advance();
                let mut elements = Vec::new();
                if !self.check(TokenKind::RSquare) {
                    elements.push(self.parse_expr()?);
                    while self.check(TokenKind::Comma) {
                        self.advance();
                        elements.push(self.parse_expr()?);
                    }
                }
                self.expect(TokenKind::RSquare).map_err(|_| ())?;
                Ok(Expr::VectorConst { token, elements })
            }
            TokenKind::If => self.parse_cond_expr(),
            TokenKind::LParen => {
                self.advance();
                let e = self.parse_expr()?;
                self.expect(TokenKind::RParen).map_err(|_| ())?;
                Ok(e)
            }
            TokenKind::Id => {
                let name = self.advance();
                if self.check(TokenKind::LParen) {
                    let token = name.clone();
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(TokenKind::RParen) {
                        args.push(self.parse_expr()?);
                        while self.check(TokenKind::Comma) {
                            self.advance();
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(TokenKind::RParen).map_err(|_| ())?;
                    Ok(Expr::Call { token, name, args })
                } else {
                    Ok(Expr::Id(name))
                }
            }
            _ => {
                self.error(format!("unexpected token '{}'", self.peek().lexeme));
                Err(())
            }
        }
    }

    fn parse_cond_expr(&mut self) -> PResult<Expr> {
        let token = self.advance();
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Then).map_err(|_| ())?;
        let then_expr = self.parse_expr()?;
        self.expect(TokenKind::Else).map_err(|_| ())?;
        let else_expr = self.parse_expr()?;
        Ok(Expr::Cond {
            token,
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        let (parser, lex_errors) = Parser::new(src);
        assert!(lex_errors.is_empty());
        parser.parse().expect("expected successful parse")
    }

    #[test]
    fn parses_minimal_program() {
        let program = parse_ok("program p; begin end.");
        assert_eq!(program.name.lexeme, "p");
        assert!(program.body.is_empty());
    }

    #[test]
    fn parses_var_decl_and_assign() {
        let program = parse_ok("program p; x: integer; begin x = 1 + 2 end.");
        assert_eq!(program.declarations.len(), 1);
        assert_eq!(program.body.len(), 1);
    }

    #[test]
    fn precedence_and_binds_tighter_than_or() {
        let program = parse_ok("program p; begin write(true or false and false) end.");
        match &program.body[0] {
            Stat::Write { args, .. } => match &args[0] {
                Expr::Binary { op: BinaryOp::Or, right, .. } => {
                    assert!(matches!(**right, Expr::Binary { op: BinaryOp::And, .. }));
                }
                _ => panic!("expected or-expression"),
            },
            _ => panic!("expected write statement"),
        }
    }

    #[test]
    fn syntax_error_recovers_to_next_semicolon_and_collects_more() {
        let (parser, _) = Parser::new("program p; begin x = ; y = 1 end.");
        let errors = parser.parse().unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn parses_nested_vector_literal_indexing() {
        let program = parse_ok("program p; begin write([[1,2],[3,4]][1][0]); end.");
        match &program.body[0] {
            Stat::Write { args, .. } => assert!(matches!(args[0], Expr::Indexing { .. })),
            _ => panic!("expected write statement"),
        }
    }
}
