//! Guard expression AST and parser.
//!
//! Supported syntax:
//! - Comparisons: `==`, `!=`, `>`, `<`, `>=`, `<=`
//! - Boolean operators: `&&`, `||`, `!`
//! - Membership: `x in list` (or map-key test)
//! - Type tests: `x is string`
//! - Concatenation/addition: `+`
//! - Dot-path access: `request.auth.uid`, `resource.data.owner`
//! - Literals: integers, floats, `"strings"`, `true`, `false`, `null`,
//!   lists `["a", "b"]`
//! - Built-in calls: `exists(p)`, `get(p)`, `size(x)`. A closed set;
//!   anything else is rejected at compile time
//! - Parentheses for grouping
//!
//! Guards are compiled once per rule-set load; evaluation lives in
//! [`crate::eval`].

use std::collections::BTreeSet;

use crate::errors::CompileError;
use crate::value::TYPE_NAMES;

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(LitValue),
    Path(Vec<String>),
    ListLit(Vec<Expr>),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryNot(Box<Expr>),
    In {
        element: Box<Expr>,
        collection: Box<Expr>,
    },
    Is {
        value: Box<Expr>,
        type_name: String,
    },
    Call {
        func: Builtin,
        arg: Box<Expr>,
    },
    /// Trailing `.field` access on a call or parenthesised expression,
    /// e.g. `get("rooms/" + roomId).owner`. Plain dot-paths stay `Path`.
    Field {
        base: Box<Expr>,
        field: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
    Add,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LitValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

/// The closed set of callable functions. `exists` and `get` perform
/// document reads; nothing here loops, recurses, or runs author code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Exists,
    Get,
    Size,
}

impl Builtin {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "exists" => Some(Builtin::Exists),
            "get" => Some(Builtin::Get),
            "size" => Some(Builtin::Size),
            _ => None,
        }
    }
}

impl Expr {
    /// Root identifiers referenced by this expression (the first segment
    /// of every dot-path). Compilation checks these against the names the
    /// guard's pattern actually binds.
    pub fn root_identifiers(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Path(segments) => {
                if let Some(first) = segments.first() {
                    out.insert(first.clone());
                }
            }
            Expr::ListLit(items) => {
                for item in items {
                    item.root_identifiers(out);
                }
            }
            Expr::BinOp { left, right, .. } => {
                left.root_identifiers(out);
                right.root_identifiers(out);
            }
            Expr::UnaryNot(inner) => inner.root_identifiers(out),
            Expr::In {
                element,
                collection,
            } => {
                element.root_identifiers(out);
                collection.root_identifiers(out);
            }
            Expr::Is { value, .. } => value.root_identifiers(out),
            Expr::Call { arg, .. } => arg.root_identifiers(out),
            Expr::Field { base, .. } => base.root_identifiers(out),
        }
    }
}

// ─── Tokenizer ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Null,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Plus,
    Eq,  // ==
    Ne,  // !=
    Gt,  // >
    Lt,  // <
    Ge,  // >=
    Le,  // <=
    And, // &&
    Or,  // ||
    Not, // !
    In,  // in
    Is,  // is
}

fn tokenize(input: &str) -> Result<Vec<Token>, CompileError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
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
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '=' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '<' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '&' if i + 1 < chars.len() && chars[i + 1] == '&' => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if i + 1 < chars.len() && chars[i + 1] == '|' => {
                tokens.push(Token::Or);
                i += 2;
            }
            '"' => {
                i += 1;
                let mut s = String::new();
                loop {
                    if i >= chars.len() {
                        return Err(CompileError::InvalidExpression(
                            "unterminated string literal".into(),
                        ));
                    }
                    match chars[i] {
                        '"' => break,
                        '\\' if i + 1 < chars.len() => {
                            s.push(chars[i + 1]);
                            i += 2;
                        }
                        c => {
                            s.push(c);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
                i += 1; // skip closing quote
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                if num_str.contains('.') {
                    let f: f64 = num_str.parse().map_err(|_| {
                        CompileError::InvalidExpression(format!("invalid float `{num_str}`"))
                    })?;
                    tokens.push(Token::Float(f));
                } else {
                    let n: i64 = num_str.parse().map_err(|_| {
                        CompileError::InvalidExpression(format!("invalid integer `{num_str}`"))
                    })?;
                    tokens.push(Token::Int(n));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => tokens.push(Token::True),
                    "false" => tokens.push(Token::False),
                    "null" => tokens.push(Token::Null),
                    "in" => tokens.push(Token::In),
                    "is" => tokens.push(Token::Is),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            c => {
                return Err(CompileError::InvalidExpression(format!(
                    "unexpected character `{c}`"
                )));
            }
        }
    }
    Ok(tokens)
}

// ─── Parser ─────────────────────────────────────────────────────────────

/// Nesting bound for parenthesised/bracketed subexpressions. Keeps crafted
/// rule text from overflowing the parser stack.
const MAX_PARSE_DEPTH: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), CompileError> {
        if self.advance().as_ref() != Some(&expected) {
            return Err(CompileError::InvalidExpression(format!("expected {what}")));
        }
        Ok(())
    }

    /// Entry: parse_or
    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            return Err(CompileError::InvalidExpression(
                "expression nesting too deep".into(),
            ));
        }
        let result = self.parse_or();
        self.depth -= 1;
        result
    }

    /// or_expr = and_expr ("||" and_expr)*
    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::BinOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// and_expr = comparison ("&&" comparison)*
    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_comparison()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::BinOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// comparison = additive (("==" | "!=" | ">" | "<" | ">=" | "<=") additive
    ///             | "in" additive
    ///             | "is" type_name)?
    fn parse_comparison(&mut self) -> Result<Expr, CompileError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Ge) => BinOp::Ge,
            Some(Token::Le) => BinOp::Le,
            Some(Token::In) => {
                self.advance();
                let right = self.parse_additive()?;
                return Ok(Expr::In {
                    element: Box::new(left),
                    collection: Box::new(right),
                });
            }
            Some(Token::Is) => {
                self.advance();
                let type_name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    _ => {
                        return Err(CompileError::InvalidExpression(
                            "expected type name after `is`".into(),
                        ));
                    }
                };
                if !TYPE_NAMES.contains(&type_name.as_str()) {
                    return Err(CompileError::UnknownTypeName(type_name));
                }
                return Ok(Expr::Is {
                    value: Box::new(left),
                    type_name,
                });
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// additive = unary ("+" unary)*
    fn parse_additive(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::Plus) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::BinOp {
                op: BinOp::Add,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// unary = "!"* primary
    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let mut nots = 0usize;
        while self.peek() == Some(&Token::Not) {
            self.advance();
            nots += 1;
        }
        let mut expr = self.parse_primary()?;
        for _ in 0..nots {
            expr = Expr::UnaryNot(Box::new(expr));
        }
        Ok(expr)
    }

    /// primary = literal | list | call | path | "(" expr ")"
    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        match self.peek().cloned() {
            Some(Token::Int(n)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Int(n)))
            }
            Some(Token::Float(f)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Float(f)))
            }
            Some(Token::Str(s)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Str(s)))
            }
            Some(Token::True) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Bool(true)))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Bool(false)))
            }
            Some(Token::Null) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Null))
            }
            Some(Token::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        match self.peek() {
                            Some(Token::Comma) => {
                                self.advance();
                            }
                            _ => break,
                        }
                    }
                }
                self.expect(Token::RBracket, "closing bracket `]`")?;
                Ok(Expr::ListLit(items))
            }
            Some(Token::Ident(name)) => {
                self.advance();
                // Call: ident directly followed by `(`
                if self.peek() == Some(&Token::LParen) {
                    let func = Builtin::from_name(&name)
                        .ok_or_else(|| CompileError::UnknownFunction(name.clone()))?;
                    self.advance();
                    let arg = self.parse_expr()?;
                    self.expect(Token::RParen, "closing parenthesis `)`")?;
                    let call = Expr::Call {
                        func,
                        arg: Box::new(arg),
                    };
                    return self.parse_postfix(call);
                }
                let mut path = vec![name];
                while self.peek() == Some(&Token::Dot) {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(seg)) => path.push(seg),
                        _ => {
                            return Err(CompileError::InvalidExpression(
                                "expected identifier after `.`".into(),
                            ));
                        }
                    }
                }
                Ok(Expr::Path(path))
            }
            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(Token::RParen, "closing parenthesis `)`")?;
                self.parse_postfix(expr)
            }
            other => Err(CompileError::InvalidExpression(format!(
                "unexpected token: {other:?}"
            ))),
        }
    }

    /// Consume a trailing `.field` chain after a call or parenthesised
    /// expression, so `get(p).owner` reads the fetched document's field.
    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, CompileError> {
        while self.peek() == Some(&Token::Dot) {
            self.advance();
            match self.advance() {
                Some(Token::Ident(field)) => {
                    expr = Expr::Field {
                        base: Box::new(expr),
                        field,
                    };
                }
                _ => {
                    return Err(CompileError::InvalidExpression(
                        "expected identifier after `.`".into(),
                    ));
                }
            }
        }
        Ok(expr)
    }
}

/// Parse a guard expression string into an AST. Unknown functions and type
/// names fail here, at compile time, rather than as deny-on-error at
/// request time.
pub fn parse_expression(input: &str) -> Result<Expr, CompileError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(CompileError::InvalidExpression("empty expression".into()));
    }
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(CompileError::InvalidExpression(format!(
            "unexpected trailing token: {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_comparison() {
        let expr = parse_expression("x == 5").unwrap();
        assert_eq!(
            expr,
            Expr::BinOp {
                op: BinOp::Eq,
                left: Box::new(Expr::Path(vec!["x".into()])),
                right: Box::new(Expr::Literal(LitValue::Int(5))),
            }
        );
    }

    #[test]
    fn test_parse_dot_path() {
        let expr = parse_expression("request.auth.uid == userId").unwrap();
        assert_eq!(
            expr,
            Expr::BinOp {
                op: BinOp::Eq,
                left: Box::new(Expr::Path(vec![
                    "request".into(),
                    "auth".into(),
                    "uid".into()
                ])),
                right: Box::new(Expr::Path(vec!["userId".into()])),
            }
        );
    }

    #[test]
    fn test_parse_null_literal() {
        let expr = parse_expression("request.auth != null").unwrap();
        match expr {
            Expr::BinOp {
                op: BinOp::Ne,
                right,
                ..
            } => assert_eq!(*right, Expr::Literal(LitValue::Null)),
            _ => panic!("expected Ne"),
        }
    }

    #[test]
    fn test_parse_boolean_precedence() {
        // && binds tighter than ||
        let expr = parse_expression("a == 1 || b == 2 && c == 3").unwrap();
        match expr {
            Expr::BinOp { op: BinOp::Or, right, .. } => match *right {
                Expr::BinOp { op: BinOp::And, .. } => {}
                _ => panic!("expected And on the right of Or"),
            },
            _ => panic!("expected Or at the top"),
        }
    }

    #[test]
    fn test_parse_parentheses() {
        let expr = parse_expression("(a || b) && c").unwrap();
        match expr {
            Expr::BinOp {
                op: BinOp::And,
                left,
                ..
            } => match *left {
                Expr::BinOp { op: BinOp::Or, .. } => {}
                _ => panic!("expected Or inside parens"),
            },
            _ => panic!("expected And"),
        }
    }

    #[test]
    fn test_parse_in_operator() {
        let expr = parse_expression(r#"role in ["admin", "editor"]"#).unwrap();
        match expr {
            Expr::In { collection, .. } => match *collection {
                Expr::ListLit(items) => assert_eq!(items.len(), 2),
                _ => panic!("expected list literal"),
            },
            _ => panic!("expected In"),
        }
    }

    #[test]
    fn test_parse_is_operator() {
        let expr = parse_expression("request.resource.data.age is int").unwrap();
        match expr {
            Expr::Is { type_name, .. } => assert_eq!(type_name, "int"),
            _ => panic!("expected Is"),
        }
    }

    #[test]
    fn test_unknown_type_name_rejected() {
        let err = parse_expression("x is widget").unwrap_err();
        assert!(matches!(err, CompileError::UnknownTypeName(_)));
    }

    #[test]
    fn test_parse_call() {
        let expr = parse_expression(r#"exists("rooms/" + roomId)"#).unwrap();
        match expr {
            Expr::Call {
                func: Builtin::Exists,
                arg,
            } => match *arg {
                Expr::BinOp { op: BinOp::Add, .. } => {}
                _ => panic!("expected concatenation argument"),
            },
            _ => panic!("expected Call"),
        }
    }

    #[test]
    fn test_parse_call_field_access() {
        let expr =
            parse_expression(r#"get("rooms/" + roomId).owner == request.auth.uid"#).unwrap();
        match expr {
            Expr::BinOp {
                op: BinOp::Eq,
                left,
                ..
            } => match *left {
                Expr::Field { base, field } => {
                    assert_eq!(field, "owner");
                    assert!(matches!(
                        *base,
                        Expr::Call {
                            func: Builtin::Get,
                            ..
                        }
                    ));
                }
                _ => panic!("expected Field on the call result"),
            },
            _ => panic!("expected Eq"),
        }

        // chains keep going
        let expr = parse_expression(r#"get("rooms/snow").meta.owner == "bob""#).unwrap();
        match expr {
            Expr::BinOp { left, .. } => match *left {
                Expr::Field { base, field } => {
                    assert_eq!(field, "owner");
                    assert!(matches!(*base, Expr::Field { .. }));
                }
                _ => panic!("expected nested Field"),
            },
            _ => panic!("expected BinOp"),
        }
    }

    #[test]
    fn test_unknown_function_rejected() {
        let err = parse_expression("evil(1)").unwrap_err();
        assert!(matches!(err, CompileError::UnknownFunction(name) if name == "evil"));
    }

    #[test]
    fn test_parse_not_operator() {
        let expr = parse_expression("!disabled").unwrap();
        match expr {
            Expr::UnaryNot(_) => {}
            _ => panic!("expected UnaryNot"),
        }
    }

    #[test]
    fn test_parse_string_escapes() {
        let expr = parse_expression(r#"name == "a\"b""#).unwrap();
        match expr {
            Expr::BinOp { right, .. } => {
                assert_eq!(*right, Expr::Literal(LitValue::Str("a\"b".into())))
            }
            _ => panic!("expected BinOp"),
        }
    }

    #[test]
    fn test_root_identifiers() {
        let expr =
            parse_expression("request.auth.uid == userId && size(roomId) > 0").unwrap();
        let mut roots = BTreeSet::new();
        expr.root_identifiers(&mut roots);
        let roots: Vec<_> = roots.iter().map(String::as_str).collect();
        assert_eq!(roots, vec!["request", "roomId", "userId"]);
    }

    #[test]
    fn test_invalid_empty_expression() {
        assert!(parse_expression("").is_err());
        assert!(parse_expression("   ").is_err());
    }

    #[test]
    fn test_invalid_trailing_tokens() {
        assert!(parse_expression("a == 1 b").is_err());
    }

    #[test]
    fn test_nesting_depth_capped() {
        let deep = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        let err = parse_expression(&deep).unwrap_err();
        assert!(matches!(err, CompileError::InvalidExpression(_)));
        // many leading nots parse fine, they do not recurse
        assert!(parse_expression(&format!("{}true", "!".repeat(500))).is_ok());
    }

    #[test]
    fn test_invalid_unterminated_string() {
        assert!(parse_expression(r#""hello"#).is_err());
    }
}
