//! Per-sink filter expressions.
//!
//! A filter is a small boolean language over record attributes, compiled to
//! a closure when the configuration is loaded:
//!
//! ```text
//! severity >= WARNING and logger = "db" and not has(2)
//! component(1) >= 100 or slow_request("db")
//! ```
//!
//! Attributes are `severity` (alias `level`), `logger`, `msg`, component
//! presence `has(i)` and component value `component(i)`. Operators are
//! `>=`, `<=`, `=`, `/=`, `and`, `or`, `not`, and parentheses. A bare
//! identifier in operand position is a severity name. `fn_name(args)`
//! calls a registered user filter.

use ahash::AHashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::component::Component;
use crate::error::{Error, Result};
use crate::level::Severity;
use crate::record::Composed;

/// A literal argument inside a filter expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Severity(Severity),
}

/// Signature of a registered user filter function.
pub type FilterFn = Arc<dyn Fn(&Composed<'_>, &[Literal]) -> bool + Send + Sync>;

static FILTER_FNS: Lazy<RwLock<AHashMap<String, FilterFn>>> =
    Lazy::new(|| RwLock::new(AHashMap::new()));

/// Register a user filter function callable from filter expressions.
/// Fails if the name is already taken.
pub fn register_filter_fn(name: &str, f: FilterFn) -> Result<()> {
    let mut table = FILTER_FNS.write();
    if table.contains_key(name) {
        return Err(Error::DuplicateName(name.to_string()));
    }
    table.insert(name.to_string(), f);
    Ok(())
}

fn lookup_fn(name: &str) -> Option<FilterFn> {
    FILTER_FNS.read().get(name).cloned()
}

type Pred = Box<dyn Fn(&Composed<'_>) -> bool + Send + Sync>;

/// A filter compiled to a predicate closure.
pub struct CompiledFilter {
    pred: Pred,
    floor: Option<Severity>,
}

impl CompiledFilter {
    /// Parse and compile an expression.
    pub fn compile(expr: &str) -> Result<CompiledFilter> {
        let tokens = lex(expr)?;
        let mut parser = Parser { tokens, at: 0 };
        let node = parser.parse_or()?;
        if parser.at != parser.tokens.len() {
            return Err(Error::FilterSyntax(format!(
                "unexpected trailing input in '{}'",
                expr
            )));
        }
        let floor = severity_floor(&node);
        Ok(CompiledFilter { pred: compile_node(node), floor })
    }

    /// Evaluate the predicate against one record view.
    pub fn accepts(&self, view: &Composed<'_>) -> bool {
        (self.pred)(view)
    }

    /// A severity below which no record can pass this filter, when one can
    /// be proven from the expression. Used as a cheap pre-filter so the
    /// full predicate only runs on plausible records.
    pub fn severity_floor(&self) -> Option<Severity> {
        self.floor
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Ge,
    Le,
    Eq,
    Ne,
    LParen,
    RParen,
    Comma,
}

fn lex(expr: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '>' | '<' => {
                if bytes.get(i + 1) != Some(&b'=') {
                    return Err(Error::FilterSyntax(format!(
                        "expected '{}=' in '{}'",
                        c, expr
                    )));
                }
                tokens.push(if c == '>' { Token::Ge } else { Token::Le });
                i += 2;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '/' => {
                if bytes.get(i + 1) != Some(&b'=') {
                    return Err(Error::FilterSyntax(format!("expected '/=' in '{}'", expr)));
                }
                tokens.push(Token::Ne);
                i += 2;
            }
            '"' => {
                let mut text = Vec::new();
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => {
                            return Err(Error::FilterSyntax(format!(
                                "unterminated string in '{}'",
                                expr
                            )))
                        }
                        Some(b'"') => {
                            i += 1;
                            break;
                        }
                        Some(b'\\') if matches!(bytes.get(i + 1), Some(b'"') | Some(b'\\')) => {
                            text.push(bytes[i + 1]);
                            i += 2;
                        }
                        Some(byte) => {
                            text.push(*byte);
                            i += 1;
                        }
                    }
                }
                let text = String::from_utf8(text)
                    .map_err(|_| Error::FilterSyntax(format!("invalid utf-8 in '{}'", expr)))?;
                tokens.push(Token::Str(text));
            }
            '0'..='9' | '-' => {
                let start = i;
                i += 1;
                let mut is_float = false;
                while i < bytes.len() {
                    match bytes[i] {
                        b'0'..=b'9' => i += 1,
                        b'.' if !is_float => {
                            is_float = true;
                            i += 1;
                        }
                        _ => break,
                    }
                }
                let text = &expr[start..i];
                if is_float {
                    let v = text.parse::<f64>().map_err(|_| {
                        Error::FilterSyntax(format!("bad number '{}'", text))
                    })?;
                    tokens.push(Token::Float(v));
                } else {
                    let v = text.parse::<i64>().map_err(|_| {
                        Error::FilterSyntax(format!("bad number '{}'", text))
                    })?;
                    tokens.push(Token::Int(v));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric()
                        || bytes[i] == b'_'
                        || bytes[i] == b'.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(expr[start..i].to_string()));
            }
            other => {
                return Err(Error::FilterSyntax(format!(
                    "unexpected character '{}' in '{}'",
                    other, expr
                )))
            }
        }
    }
    Ok(tokens)
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum CmpOp {
    Ge,
    Le,
    Eq,
    Ne,
}

#[derive(Clone, Debug)]
enum Operand {
    Severity,
    Logger,
    Msg,
    Component(usize),
    Lit(Literal),
}

enum Node {
    Cmp(Operand, CmpOp, Operand),
    Has(usize),
    Call(FilterFn, Vec<Literal>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
}

struct Parser {
    tokens: Vec<Token>,
    at: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.at)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.at).cloned();
        if token.is_some() {
            self.at += 1;
        }
        token
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        match self.bump() {
            Some(found) if found == token => Ok(()),
            other => Err(Error::FilterSyntax(format!(
                "expected {:?}, found {:?}",
                token, other
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Node> {
        let mut node = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Ident(kw)) if kw == "or") {
            self.bump();
            let rhs = self.parse_and()?;
            node = Node::Or(Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> Result<Node> {
        let mut node = self.parse_not()?;
        while matches!(self.peek(), Some(Token::Ident(kw)) if kw == "and") {
            self.bump();
            let rhs = self.parse_not()?;
            node = Node::And(Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn parse_not(&mut self) -> Result<Node> {
        if matches!(self.peek(), Some(Token::Ident(kw)) if kw == "not") {
            self.bump();
            let inner = self.parse_not()?;
            return Ok(Node::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Node> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.bump();
            let node = self.parse_or()?;
            self.expect(Token::RParen)?;
            return Ok(node);
        }

        // `has(i)` and user calls are complete predicates; everything else
        // must be the left side of a comparison.
        if let Some(Token::Ident(name)) = self.peek().cloned() {
            if name == "has" {
                self.bump();
                let index = self.parse_index()?;
                return Ok(Node::Has(index));
            }
            let is_call = !is_attribute(&name)
                && self.tokens.get(self.at + 1) == Some(&Token::LParen);
            if is_call {
                self.bump();
                let args = self.parse_args()?;
                let f = lookup_fn(&name).ok_or(Error::UnknownFilterFn(name))?;
                return Ok(Node::Call(f, args));
            }
        }

        let lhs = self.parse_operand()?;
        let op = match self.bump() {
            Some(Token::Ge) => CmpOp::Ge,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            other => {
                return Err(Error::FilterSyntax(format!(
                    "expected comparison operator, found {:?}",
                    other
                )))
            }
        };
        let rhs = self.parse_operand()?;
        Ok(Node::Cmp(lhs, op, rhs))
    }

    fn parse_index(&mut self) -> Result<usize> {
        self.expect(Token::LParen)?;
        let index = match self.bump() {
            Some(Token::Int(i)) if i >= 0 => i as usize,
            other => {
                return Err(Error::FilterSyntax(format!(
                    "expected component index, found {:?}",
                    other
                )))
            }
        };
        self.expect(Token::RParen)?;
        Ok(index)
    }

    fn parse_args(&mut self) -> Result<Vec<Literal>> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            self.bump();
            return Ok(args);
        }
        loop {
            match self.bump() {
                Some(Token::Str(s)) => args.push(Literal::Str(s)),
                Some(Token::Int(i)) => args.push(Literal::Int(i)),
                Some(Token::Float(f)) => args.push(Literal::Float(f)),
                Some(Token::Ident(name)) => args.push(Literal::Severity(Severity::parse(&name)?)),
                other => {
                    return Err(Error::FilterSyntax(format!(
                        "expected argument, found {:?}",
                        other
                    )))
                }
            }
            match self.bump() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                other => {
                    return Err(Error::FilterSyntax(format!(
                        "expected ',' or ')', found {:?}",
                        other
                    )))
                }
            }
        }
    }

    fn parse_operand(&mut self) -> Result<Operand> {
        match self.bump() {
            Some(Token::Ident(name)) => match name.as_str() {
                "severity" | "level" => Ok(Operand::Severity),
                "logger" => Ok(Operand::Logger),
                "msg" | "message" => Ok(Operand::Msg),
                "component" => {
                    let index = self.parse_index()?;
                    Ok(Operand::Component(index))
                }
                _ => Ok(Operand::Lit(Literal::Severity(Severity::parse(&name)?))),
            },
            Some(Token::Str(s)) => Ok(Operand::Lit(Literal::Str(s))),
            Some(Token::Int(i)) => Ok(Operand::Lit(Literal::Int(i))),
            Some(Token::Float(f)) => Ok(Operand::Lit(Literal::Float(f))),
            other => Err(Error::FilterSyntax(format!(
                "expected operand, found {:?}",
                other
            ))),
        }
    }
}

fn is_attribute(name: &str) -> bool {
    matches!(
        name,
        "severity" | "level" | "logger" | "msg" | "message" | "component" | "has" | "and" | "or"
            | "not"
    )
}

/// A resolved operand value during evaluation.
enum Resolved<'a> {
    Sev(Severity),
    Text(&'a str),
    Int(i64),
    Float(f64),
    Bool(bool),
    Missing,
}

fn resolve<'a>(operand: &'a Operand, view: &Composed<'a>) -> Resolved<'a> {
    match operand {
        Operand::Severity => Resolved::Sev(view.severity),
        Operand::Logger => Resolved::Text(view.logger_name),
        Operand::Msg => Resolved::Text(view.message()),
        Operand::Component(index) => match view.components.get(*index) {
            Some(Component::Str(s)) => Resolved::Text(s),
            Some(Component::Int(i)) => Resolved::Int(*i),
            Some(Component::Float(f)) => Resolved::Float(*f),
            Some(Component::Bool(b)) => Resolved::Bool(*b),
            _ => Resolved::Missing,
        },
        Operand::Lit(Literal::Str(s)) => Resolved::Text(s),
        Operand::Lit(Literal::Int(i)) => Resolved::Int(*i),
        Operand::Lit(Literal::Float(f)) => Resolved::Float(*f),
        Operand::Lit(Literal::Severity(s)) => Resolved::Sev(*s),
    }
}

fn compare(lhs: Resolved<'_>, op: CmpOp, rhs: Resolved<'_>) -> bool {
    use Resolved::*;
    match (lhs, rhs) {
        (Sev(a), Sev(b)) => cmp_ord(a.rank() as i64, op, b.rank() as i64),
        (Text(a), Text(b)) => match op {
            CmpOp::Ge => a >= b,
            CmpOp::Le => a <= b,
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
        },
        (Int(a), Int(b)) => cmp_ord(a, op, b),
        (Int(a), Float(b)) => cmp_f64(a as f64, op, b),
        (Float(a), Int(b)) => cmp_f64(a, op, b as f64),
        (Float(a), Float(b)) => cmp_f64(a, op, b),
        (Bool(a), Bool(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            _ => false,
        },
        // Type mismatch or missing component: nothing matches except "not
        // equal", which is vacuously true for a missing value.
        (Missing, _) | (_, Missing) => op == CmpOp::Ne,
        _ => false,
    }
}

fn cmp_ord(a: i64, op: CmpOp, b: i64) -> bool {
    match op {
        CmpOp::Ge => a >= b,
        CmpOp::Le => a <= b,
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
    }
}

fn cmp_f64(a: f64, op: CmpOp, b: f64) -> bool {
    match op {
        CmpOp::Ge => a >= b,
        CmpOp::Le => a <= b,
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
    }
}

fn compile_node(node: Node) -> Pred {
    match node {
        Node::Cmp(lhs, op, rhs) => {
            Box::new(move |view| compare(resolve(&lhs, view), op, resolve(&rhs, view)))
        }
        Node::Has(index) => Box::new(move |view| {
            !matches!(view.components.get(index), None | Some(Component::Empty))
        }),
        Node::Call(f, args) => Box::new(move |view| f(view, &args)),
        Node::And(a, b) => {
            let (a, b) = (compile_node(*a), compile_node(*b));
            Box::new(move |view| a(view) && b(view))
        }
        Node::Or(a, b) => {
            let (a, b) = (compile_node(*a), compile_node(*b));
            Box::new(move |view| a(view) || b(view))
        }
        Node::Not(inner) => {
            let inner = compile_node(*inner);
            Box::new(move |view| !inner(view))
        }
    }
}

/// Prove a lower severity bound from the expression shape, when possible.
fn severity_floor(node: &Node) -> Option<Severity> {
    match node {
        Node::Cmp(Operand::Severity, CmpOp::Ge, Operand::Lit(Literal::Severity(s)))
        | Node::Cmp(Operand::Severity, CmpOp::Eq, Operand::Lit(Literal::Severity(s))) => Some(*s),
        Node::Cmp(Operand::Lit(Literal::Severity(s)), CmpOp::Le, Operand::Severity) => Some(*s),
        Node::And(a, b) => match (severity_floor(a), severity_floor(b)) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (floor, None) | (None, floor) => floor,
        },
        Node::Or(a, b) => match (severity_floor(a), severity_floor(b)) {
            (Some(x), Some(y)) => Some(x.min(y)),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Composed;

    fn view<'a>(
        severity: Severity,
        logger: &'a str,
        components: &'a [Component<'a>],
    ) -> Composed<'a> {
        Composed {
            severity,
            logger_id: 0,
            logger_name: logger,
            timestamp_ns: 0,
            loc_file: "",
            loc_entity: "",
            components,
            task_id: None,
            scope_depth: 0,
            scope_elapsed_ns: None,
            truncated: false,
        }
    }

    #[test]
    fn test_severity_comparison() {
        let filter = CompiledFilter::compile("severity >= WARNING").unwrap();
        let comps = [Component::Str("m")];
        assert!(filter.accepts(&view(Severity::ERROR, "a", &comps)));
        assert!(filter.accepts(&view(Severity::WARNING, "a", &comps)));
        assert!(!filter.accepts(&view(Severity::INFO, "a", &comps)));
        assert_eq!(filter.severity_floor(), Some(Severity::WARNING));
    }

    #[test]
    fn test_logger_and_connectives() {
        let filter =
            CompiledFilter::compile("severity >= INFO and logger = \"db\"").unwrap();
        let comps = [Component::Str("m")];
        assert!(filter.accepts(&view(Severity::INFO, "db", &comps)));
        assert!(!filter.accepts(&view(Severity::INFO, "web", &comps)));
        assert!(!filter.accepts(&view(Severity::DEBUG, "db", &comps)));
        assert_eq!(filter.severity_floor(), Some(Severity::INFO));
    }

    #[test]
    fn test_not_and_parens() {
        let filter =
            CompiledFilter::compile("not (logger = \"noisy\" or severity <= DEBUG)").unwrap();
        let comps = [Component::Str("m")];
        assert!(filter.accepts(&view(Severity::INFO, "db", &comps)));
        assert!(!filter.accepts(&view(Severity::INFO, "noisy", &comps)));
        assert!(!filter.accepts(&view(Severity::DEBUG, "db", &comps)));
        assert_eq!(filter.severity_floor(), None);
    }

    #[test]
    fn test_component_value_and_presence() {
        let filter = CompiledFilter::compile("has(1) and component(1) >= 100").unwrap();
        let slow = [Component::Str("took "), Component::Int(250)];
        let fast = [Component::Str("took "), Component::Int(10)];
        let none = [Component::Str("took ")];
        assert!(filter.accepts(&view(Severity::INFO, "a", &slow)));
        assert!(!filter.accepts(&view(Severity::INFO, "a", &fast)));
        assert!(!filter.accepts(&view(Severity::INFO, "a", &none)));
    }

    #[test]
    fn test_ne_operator() {
        let filter = CompiledFilter::compile("logger /= \"web\"").unwrap();
        let comps = [Component::Str("m")];
        assert!(filter.accepts(&view(Severity::INFO, "db", &comps)));
        assert!(!filter.accepts(&view(Severity::INFO, "web", &comps)));
    }

    #[test]
    fn test_or_floor_is_min() {
        let filter = CompiledFilter::compile(
            "severity >= ERROR or (severity >= INFO and logger = \"db\")",
        )
        .unwrap();
        assert_eq!(filter.severity_floor(), Some(Severity::INFO));
    }

    #[test]
    fn test_user_filter_fn() {
        register_filter_fn(
            "msg_starts_with",
            Arc::new(|view: &Composed<'_>, args: &[Literal]| match args.first() {
                Some(Literal::Str(prefix)) => view.message().starts_with(prefix.as_str()),
                _ => false,
            }),
        )
        .unwrap();

        let filter = CompiledFilter::compile("msg_starts_with(\"job\")").unwrap();
        let hit = [Component::Str("job done")];
        let miss = [Component::Str("other")];
        assert!(filter.accepts(&view(Severity::INFO, "a", &hit)));
        assert!(!filter.accepts(&view(Severity::INFO, "a", &miss)));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(CompiledFilter::compile("severity >").is_err());
        assert!(CompiledFilter::compile("severity >= LOUD").is_err());
        assert!(CompiledFilter::compile("unknown_fn(1)").is_err());
        assert!(CompiledFilter::compile("(severity >= INFO").is_err());
        assert!(CompiledFilter::compile("severity >= INFO trailing").is_err());
    }
}
