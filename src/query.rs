// src/query.rs
//
// Filter language for the `--query` option of `dump` and `decode`:
//
//   expr      := term ("or" term)*
//   term      := factor ("and" factor)*
//   factor    := "not" factor | "(" expr ")" | condition
//   condition := target op value
//              | target ["not"] "like" value
//              | target ["not"] "in" "(" value ("," value)* ")"
//              | target ["not"] "exists"
//   op        := "=" | "!=" | "<" | "<=" | ">" | ">="
//
// Targets are `timestamp`, `level`, `msg`, or a property key (`prop.<key>`
// reaches keys that collide with those names). Values are bare words or
// double-quoted strings. Keywords are case-insensitive.
use crate::codec::{Level, LogEntry};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    UnterminatedString { position: usize },
    UnexpectedEnd,
    UnexpectedToken { token: String, position: usize },
    InvalidValue { target: String, value: String },
    Unsupported { target: String, test: &'static str },
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::UnterminatedString { position } => {
                write!(f, "unterminated string starting at {}", position)
            }
            QueryError::UnexpectedEnd => write!(f, "unexpected end of query"),
            QueryError::UnexpectedToken { token, position } => {
                write!(f, "unexpected {:?} at {}", token, position)
            }
            QueryError::InvalidValue { target, value } => {
                write!(f, "{:?} is not a valid value for {}", value, target)
            }
            QueryError::Unsupported { target, test } => {
                write!(f, "{} does not support {}", target, test)
            }
        }
    }
}

impl std::error::Error for QueryError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Timestamp,
    Level,
    Message,
    Property(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Timestamp => f.write_str("timestamp"),
            Target::Level => f.write_str("level"),
            Target::Message => f.write_str("msg"),
            Target::Property(key) => write!(f, "property {:?}", key),
        }
    }
}

/// Timestamps and levels are checked and converted when the query is parsed,
/// so evaluation never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Number(u64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Test {
    Compare(CmpOp, Value),
    /// Case-insensitive substring match.
    Like(String),
    In(Vec<Value>),
    Exists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Condition(Target, Test),
}

impl Expr {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        match self {
            Expr::And(l, r) => l.matches(entry) && r.matches(entry),
            Expr::Or(l, r) => l.matches(entry) || r.matches(entry),
            Expr::Not(e) => !e.matches(entry),
            Expr::Condition(target, test) => condition_holds(target, test, entry),
        }
    }
}

/// A parsed filter over decoded entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    root: Expr,
}

impl Query {
    pub fn parse(src: &str) -> Result<Query, QueryError> {
        let tokens = tokenize(src)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.expr()?;
        match parser.peek() {
            None => Ok(Query { root }),
            Some(t) => Err(t.unexpected()),
        }
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.root.matches(entry)
    }
}

impl FromStr for Query {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Query::parse(s)
    }
}

fn condition_holds(target: &Target, test: &Test, entry: &LogEntry) -> bool {
    match target {
        Target::Timestamp => number_holds(entry.timestamp, test),
        Target::Level => number_holds(u64::from(entry.level), test),
        Target::Message => text_holds(&entry.message, test),
        // Duplicate keys: true if any value with that key passes.
        Target::Property(key) => entry
            .properties
            .iter()
            .filter(|p| &p.key == key)
            .any(|p| text_holds(&p.value, test)),
    }
}

fn number_holds(actual: u64, test: &Test) -> bool {
    match test {
        Test::Compare(op, Value::Number(n)) => op.holds(actual.cmp(n)),
        Test::In(values) => values.iter().any(|v| *v == Value::Number(actual)),
        Test::Exists => true,
        _ => false,
    }
}

fn text_holds(actual: &str, test: &Test) -> bool {
    match test {
        Test::Compare(op, Value::Text(expected)) => op.holds(compare_text(actual, expected)),
        Test::Like(needle) => actual.to_lowercase().contains(&needle.to_lowercase()),
        Test::In(values) => values
            .iter()
            .any(|v| matches!(v, Value::Text(t) if compare_text(actual, t) == Ordering::Equal)),
        Test::Exists => true,
        _ => false,
    }
}

// Numeric when both sides are integers, so `status >= 500` behaves.
fn compare_text(actual: &str, expected: &str) -> Ordering {
    match (actual.parse::<i64>(), expected.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => actual.cmp(expected),
    }
}

fn level_code(word: &str) -> Option<u64> {
    match word.to_ascii_lowercase().as_str() {
        "debug" => Some(Level::Debug.code().into()),
        "info" => Some(Level::Info.code().into()),
        "warn" | "warning" => Some(Level::Warning.code().into()),
        "error" => Some(Level::Error.code().into()),
        other => other.parse::<u8>().ok().map(u64::from),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    OpenParen,
    CloseParen,
    Comma,
    Op(CmpOp),
    Word(String),
    Quoted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    kind: TokenKind,
    position: usize,
}

impl Token {
    fn unexpected(&self) -> QueryError {
        let token = match &self.kind {
            TokenKind::OpenParen => "(".to_string(),
            TokenKind::CloseParen => ")".to_string(),
            TokenKind::Comma => ",".to_string(),
            TokenKind::Op(op) => format!("{:?}", op),
            TokenKind::Word(w) | TokenKind::Quoted(w) => w.clone(),
        };
        QueryError::UnexpectedToken {
            token,
            position: self.position,
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.kind, TokenKind::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | ',' | '"' | '=' | '!' | '<' | '>')
}

fn tokenize(src: &str) -> Result<Vec<Token>, QueryError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(position, c)) = chars.peek() {
        let kind = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '(' => {
                chars.next();
                TokenKind::OpenParen
            }
            ')' => {
                chars.next();
                TokenKind::CloseParen
            }
            ',' => {
                chars.next();
                TokenKind::Comma
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, c)) => text.push(c),
                        None => return Err(QueryError::UnterminatedString { position }),
                    }
                }
                TokenKind::Quoted(text)
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let followed_by_eq = chars.next_if(|&(_, c)| c == '=').is_some();
                let op = match (c, followed_by_eq) {
                    ('=', _) => CmpOp::Eq,
                    ('!', true) => CmpOp::Ne,
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    ('>', false) => CmpOp::Gt,
                    ('>', true) => CmpOp::Ge,
                    _ => {
                        return Err(QueryError::UnexpectedToken {
                            token: c.to_string(),
                            position,
                        })
                    }
                };
                TokenKind::Op(op)
            }
            _ => {
                let mut word = String::new();
                while let Some((_, c)) = chars.next_if(|&(_, c)| is_word_char(c)) {
                    word.push(c);
                }
                TokenKind::Word(word)
            }
        };
        tokens.push(Token { kind, position });
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, QueryError> {
        let token = self.peek().cloned().ok_or(QueryError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().map_or(false, |t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), QueryError> {
        let token = self.next()?;
        if token.kind == kind {
            Ok(())
        } else {
            Err(token.unexpected())
        }
    }

    fn expr(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.term()?;
        while self.eat_keyword("or") {
            let right = self.term()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.factor()?;
        while self.eat_keyword("and") {
            let right = self.factor()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, QueryError> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.factor()?)));
        }
        if self.peek().map(|t| &t.kind) == Some(&TokenKind::OpenParen) {
            self.pos += 1;
            let inner = self.expr()?;
            self.expect(TokenKind::CloseParen)?;
            return Ok(inner);
        }
        self.condition()
    }

    fn condition(&mut self) -> Result<Expr, QueryError> {
        let token = self.next()?;
        let target = match token.kind {
            TokenKind::Word(ref w) if w == "timestamp" => Target::Timestamp,
            TokenKind::Word(ref w) if w == "level" => Target::Level,
            TokenKind::Word(ref w) if w == "msg" => Target::Message,
            TokenKind::Word(ref w) => match w.strip_prefix("prop.") {
                Some(key) => Target::Property(key.to_string()),
                None => Target::Property(w.clone()),
            },
            TokenKind::Quoted(key) => Target::Property(key),
            _ => return Err(token.unexpected()),
        };

        let negated = self.eat_keyword("not");
        let test = if self.eat_keyword("like") {
            let needle = self.text()?;
            if matches!(target, Target::Timestamp | Target::Level) {
                return Err(QueryError::Unsupported {
                    target: target.to_string(),
                    test: "like",
                });
            }
            Test::Like(needle)
        } else if self.eat_keyword("in") {
            self.expect(TokenKind::OpenParen)?;
            let mut values = vec![self.value(&target)?];
            loop {
                let token = self.next()?;
                match token.kind {
                    TokenKind::Comma => values.push(self.value(&target)?),
                    TokenKind::CloseParen => break,
                    _ => return Err(token.unexpected()),
                }
            }
            Test::In(values)
        } else if self.eat_keyword("exists") {
            Test::Exists
        } else if negated {
            return Err(self.next()?.unexpected());
        } else {
            let token = self.next()?;
            let op = match token.kind {
                TokenKind::Op(op) => op,
                _ => return Err(token.unexpected()),
            };
            Test::Compare(op, self.value(&target)?)
        };

        let condition = Expr::Condition(target, test);
        Ok(if negated {
            Expr::Not(Box::new(condition))
        } else {
            condition
        })
    }

    fn text(&mut self) -> Result<String, QueryError> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Word(w) | TokenKind::Quoted(w) => Ok(w),
            _ => Err(token.unexpected()),
        }
    }

    fn value(&mut self, target: &Target) -> Result<Value, QueryError> {
        let text = self.text()?;
        let number = match target {
            Target::Timestamp => text.parse::<u64>().ok(),
            Target::Level => level_code(&text),
            Target::Message | Target::Property(_) => return Ok(Value::Text(text)),
        };
        number.map(Value::Number).ok_or_else(|| QueryError::InvalidValue {
            target: target.to_string(),
            value: text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn entry() -> LogEntry {
        LogEntry::new(1_700_000_000_000, Level::Warning, "Disk almost FULL on /var")
            .with_property("host", "web-1")
            .with_property("status", "503")
            .with_property("tag", "a")
            .with_property("tag", "b")
    }

    fn check(src: &str) -> bool {
        Query::parse(src).unwrap().matches(&entry())
    }

    #[test]
    fn parses_conditions_with_precedence() {
        let query = Query::parse("level = info or host = web-1 and msg like disk").unwrap();
        assert_matches!(query.root(), Expr::Or(_, right) => {
            assert_matches!(right.as_ref(), Expr::And(..));
        });
    }

    #[test]
    fn level_by_name_or_code() {
        assert!(check("level = warning"));
        assert!(check("level=WARN"));
        assert!(check("level >= 2"));
        assert!(!check("level > warning"));
        assert!(check("level in (info, warning)"));
    }

    #[test]
    fn timestamp_comparisons() {
        assert!(check("timestamp >= 1700000000000"));
        assert!(check("timestamp < 1700000000001 and timestamp > 0"));
        assert!(!check("timestamp != 1700000000000"));
    }

    #[test]
    fn message_like_is_case_insensitive() {
        assert!(check("msg like \"disk almost full\""));
        assert!(check("msg not like cpu"));
        assert!(!check("msg = disk"));
    }

    #[test]
    fn properties_and_duplicate_keys() {
        assert!(check("host = web-1"));
        assert!(check("tag = b"));
        assert!(check("status >= 500 and status < 600"));
        assert!(check("region not exists"));
        assert!(!check("region = eu"));
        assert!(!check("region != eu"));
        assert!(check("region not like eu"));
        assert!(check("not (host = web-2 or tag = c)"));
        assert!(check("\"host\" in (web-1, web-2)"));
    }

    #[test]
    fn prop_prefix_reaches_reserved_names() {
        let entry = LogEntry::new(0, Level::Info, "x").with_property("level", "custom");
        let query = Query::parse("prop.level = custom and level = info").unwrap();
        assert!(query.matches(&entry));
    }

    #[test]
    fn unknown_level_code_is_accepted() {
        let entry = LogEntry::new(0, 9u8, "odd");
        assert!(Query::parse("level = 9").unwrap().matches(&entry));
    }

    #[test]
    fn rejects_malformed_queries() {
        assert_matches!(Query::parse("level ="), Err(QueryError::UnexpectedEnd));
        assert_matches!(
            Query::parse("msg like \"open"),
            Err(QueryError::UnterminatedString { position: 9 })
        );
        assert_matches!(
            Query::parse("timestamp > yesterday"),
            Err(QueryError::InvalidValue { .. })
        );
        assert_matches!(
            Query::parse("level like info"),
            Err(QueryError::Unsupported { test: "like", .. })
        );
        assert_matches!(
            Query::parse("host = a b"),
            Err(QueryError::UnexpectedToken { position: 9, .. })
        );
        assert_matches!(Query::parse("(host = a"), Err(QueryError::UnexpectedEnd));
        assert_matches!(
            Query::parse("host ! a"),
            Err(QueryError::UnexpectedToken { position: 5, .. })
        );
    }
}
