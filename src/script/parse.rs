//! Line-oriented lexer and recursive-descent parser for script modules.
//!
//! A module is a sequence of `def name(params):` headers, each followed by
//! indented single-line statements. `#` starts a comment line.

use super::{BinOp, Expr, Function, Module, Stmt, UnOp, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Parses a whole artifact source into a [`Module`].
pub fn parse_module(source: &str) -> Result<Module, ParseError> {
    let mut module = Module::default();
    let mut current: Option<(Function, usize)> = None;

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let indented = raw.starts_with(' ') || raw.starts_with('\t');
        if !indented {
            if let Some((function, def_line)) = current.take() {
                finish_function(&mut module, function, def_line)?;
            }
            current = Some((parse_def_header(trimmed, line)?, line));
        } else {
            let Some((function, _)) = current.as_mut() else {
                return Err(ParseError::new(line, "statement outside a function"));
            };
            parse_body_line(function, trimmed, line)?;
        }
    }

    if let Some((function, def_line)) = current.take() {
        finish_function(&mut module, function, def_line)?;
    }

    Ok(module)
}

fn finish_function(module: &mut Module, function: Function, line: usize) -> Result<(), ParseError> {
    if function.body.is_empty() {
        return Err(ParseError::new(
            line,
            format!("function {:?} has an empty body", function.name),
        ));
    }
    if module.get(&function.name).is_some() {
        return Err(ParseError::new(
            line,
            format!("duplicate function {:?}", function.name),
        ));
    }
    module.push(function);
    Ok(())
}

fn parse_def_header(text: &str, line: usize) -> Result<Function, ParseError> {
    let mut p = Parser::new(text, line)?;
    p.expect_keyword("def")?;
    let name = p.expect_ident("function name")?;

    p.expect(&Token::LParen)?;
    let mut params = Vec::new();
    if !p.check(&Token::RParen) {
        loop {
            let param = p.expect_ident("parameter name")?;
            if params.contains(&param) {
                return Err(ParseError::new(line, format!("duplicate parameter {param:?}")));
            }
            params.push(param);
            if !p.eat(&Token::Comma) {
                break;
            }
        }
    }
    p.expect(&Token::RParen)?;
    p.expect(&Token::Colon)?;
    p.expect_end()?;

    Ok(Function {
        name,
        params,
        body: Vec::new(),
    })
}

fn parse_body_line(function: &mut Function, text: &str, line: usize) -> Result<(), ParseError> {
    let mut p = Parser::new(text, line)?;

    // `else:` continues the preceding single-line `if`
    if p.check_keyword("else") {
        p.advance();
        p.expect(&Token::Colon)?;
        let branch = parse_simple_stmt(&mut p)?;
        p.expect_end()?;

        match function.body.last_mut() {
            Some(Stmt::If { otherwise, .. }) if otherwise.is_none() => {
                *otherwise = Some(Box::new(branch));
                return Ok(());
            }
            _ => return Err(ParseError::new(line, "`else` without a matching `if`")),
        }
    }

    let stmt = if p.check_keyword("if") {
        p.advance();
        let cond = parse_expr(&mut p)?;
        p.expect(&Token::Colon)?;
        let then = parse_simple_stmt(&mut p)?;
        Stmt::If {
            cond,
            then: Box::new(then),
            otherwise: None,
        }
    } else {
        parse_simple_stmt(&mut p)?
    };
    p.expect_end()?;
    function.body.push(stmt);
    Ok(())
}

/// A statement that may appear on its own or behind `if ...:`, either
/// an assignment or a `return`.
fn parse_simple_stmt(p: &mut Parser) -> Result<Stmt, ParseError> {
    if p.check_keyword("return") {
        p.advance();
        return Ok(Stmt::Return(parse_expr(p)?));
    }

    let name = p.expect_ident("statement")?;
    p.expect(&Token::Assign)?;
    Ok(Stmt::Assign(name, parse_expr(p)?))
}

fn parse_expr(p: &mut Parser) -> Result<Expr, ParseError> {
    parse_or(p)
}

fn parse_or(p: &mut Parser) -> Result<Expr, ParseError> {
    let mut lhs = parse_and(p)?;
    while p.eat_keyword("or") {
        let rhs = parse_and(p)?;
        lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_and(p: &mut Parser) -> Result<Expr, ParseError> {
    let mut lhs = parse_not(p)?;
    while p.eat_keyword("and") {
        let rhs = parse_not(p)?;
        lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_not(p: &mut Parser) -> Result<Expr, ParseError> {
    if p.eat_keyword("not") {
        let operand = parse_not(p)?;
        return Ok(Expr::Unary(UnOp::Not, Box::new(operand)));
    }
    parse_comparison(p)
}

fn parse_comparison(p: &mut Parser) -> Result<Expr, ParseError> {
    let mut lhs = parse_additive(p)?;
    loop {
        let op = match p.peek() {
            Some(Token::EqEq) => BinOp::Eq,
            Some(Token::NotEq) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => break,
        };
        p.advance();
        let rhs = parse_additive(p)?;
        lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_additive(p: &mut Parser) -> Result<Expr, ParseError> {
    let mut lhs = parse_term(p)?;
    loop {
        let op = match p.peek() {
            Some(Token::Plus) => BinOp::Add,
            Some(Token::Minus) => BinOp::Sub,
            _ => break,
        };
        p.advance();
        let rhs = parse_term(p)?;
        lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_term(p: &mut Parser) -> Result<Expr, ParseError> {
    let mut lhs = parse_unary(p)?;
    loop {
        let op = match p.peek() {
            Some(Token::Star) => BinOp::Mul,
            Some(Token::Slash) => BinOp::Div,
            Some(Token::Percent) => BinOp::Rem,
            _ => break,
        };
        p.advance();
        let rhs = parse_unary(p)?;
        lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_unary(p: &mut Parser) -> Result<Expr, ParseError> {
    if p.eat(&Token::Minus) {
        let operand = parse_unary(p)?;
        return Ok(Expr::Unary(UnOp::Neg, Box::new(operand)));
    }
    parse_primary(p)
}

fn parse_primary(p: &mut Parser) -> Result<Expr, ParseError> {
    let token = p
        .peek()
        .cloned()
        .ok_or_else(|| ParseError::new(p.line, "unexpected end of line"))?;

    match token {
        Token::Int(i) => {
            p.advance();
            Ok(Expr::Literal(Value::Int(i)))
        }
        Token::Float(x) => {
            p.advance();
            Ok(Expr::Literal(Value::Float(x)))
        }
        Token::Str(s) => {
            p.advance();
            Ok(Expr::Literal(Value::Str(s)))
        }
        Token::LParen => {
            p.advance();
            let inner = parse_expr(p)?;
            p.expect(&Token::RParen)?;
            Ok(inner)
        }
        Token::LBracket => {
            p.advance();
            let mut items = Vec::new();
            if !p.check(&Token::RBracket) {
                loop {
                    items.push(parse_expr(p)?);
                    if !p.eat(&Token::Comma) {
                        break;
                    }
                }
            }
            p.expect(&Token::RBracket)?;
            Ok(Expr::List(items))
        }
        Token::Ident(name) => {
            p.advance();
            match name.as_str() {
                "true" => return Ok(Expr::Literal(Value::Bool(true))),
                "false" => return Ok(Expr::Literal(Value::Bool(false))),
                "none" => return Ok(Expr::Literal(Value::None)),
                kw if is_keyword(kw) => {
                    return Err(ParseError::new(p.line, format!("unexpected keyword {kw:?}")));
                }
                _ => {}
            }
            if p.eat(&Token::LParen) {
                let mut args = Vec::new();
                if !p.check(&Token::RParen) {
                    loop {
                        args.push(parse_expr(p)?);
                        if !p.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                p.expect(&Token::RParen)?;
                Ok(Expr::Call(name, args))
            } else {
                Ok(Expr::Name(name))
            }
        }
        other => Err(ParseError::new(
            p.line,
            format!("unexpected token {other:?}"),
        )),
    }
}

fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "def" | "return" | "if" | "else" | "and" | "or" | "not"
    )
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    line: usize,
}

impl Parser {
    fn new(text: &str, line: usize) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: lex(text, line)?,
            pos: 0,
            line,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.check_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(ParseError::new(
                self.line,
                format!("expected {token:?}, found {:?}", self.peek()),
            ))
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<(), ParseError> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(ParseError::new(
                self.line,
                format!("expected `{word}`, found {:?}", self.peek()),
            ))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Ident(name)) if !is_keyword(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => Err(ParseError::new(
                self.line,
                format!("expected {what}, found {other:?}"),
            )),
        }
    }

    fn expect_end(&mut self) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(ParseError::new(
                self.line,
                format!("trailing input after statement: {token:?}"),
            )),
        }
    }
}

fn lex(text: &str, line: usize) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '#' => break,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    tokens.push(Token::Assign);
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    return Err(ParseError::new(line, "unexpected character `!`"));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        None => return Err(ParseError::new(line, "unterminated string literal")),
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = chars.get(i + 1).copied().ok_or_else(|| {
                                ParseError::new(line, "unterminated string literal")
                            })?;
                            s.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                            i += 2;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            d if d.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let token = if text.contains('.') {
                    text.parse::<f64>().ok().map(Token::Float)
                } else {
                    text.parse::<i64>().ok().map(Token::Int)
                };
                match token {
                    Some(token) => tokens.push(token),
                    None => {
                        return Err(ParseError::new(line, format!("bad number literal {text:?}")));
                    }
                }
            }
            a if a.is_ascii_alphabetic() || a == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(ParseError::new(
                    line,
                    format!("unexpected character `{other}`"),
                ));
            }
        }
    }

    Ok(tokens)
}
