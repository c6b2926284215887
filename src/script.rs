//! Restricted declarative definition scripts.
//!
//! Definition files are Ruby-flavoured but never executed: they are lexed and
//! parsed into [`Construct`]s, a list of directive statements with literal
//! arguments, which the materializer then interprets. The accepted language:
//!
//! - one or more `class Name < Formula ... end` or `cask "token" do ... end`
//!   constructs per file
//! - statements `directive arg, arg, key: value, "key" => value`, optionally
//!   followed by a `do ... end` block
//! - literals: double- or single-quoted strings, `<<~EOS` heredocs, integers,
//!   `true`/`false`/`nil`, `:symbols`, `[arrays]` and `{hashes}`
//! - `#` comments
//!
//! String interpolation, method calls and anything else that would need a
//! host interpreter are rejected at parse time.
//!
//! Parsed scripts are registered in a [`ScriptRegistry`] under a namespace
//! derived from the platform, the file path and the content, so loading the
//! same file twice reuses the same constructs.

use crate::platform::Platform;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A literal argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Nil,
    Symbol(String),
    Array(Vec<Value>),
    Hash(Vec<(Value, Value)>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// String or symbol contents.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// A single string or symbol, or an array of them.
    pub fn texts(&self) -> Option<Vec<String>> {
        match self {
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_text().map(str::to_string))
                .collect(),
            other => other.as_text().map(|s| vec![s.to_string()]),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Str(s) | Value::Symbol(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Nil => serde_json::Value::Null,
            Value::Array(items) => items.iter().map(Value::to_json).collect(),
            Value::Hash(pairs) => pairs
                .iter()
                .map(|(k, v)| (k.as_text().unwrap_or_default().to_string(), v.to_json()))
                .collect::<serde_json::Map<_, _>>()
                .into(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::Bool(_) => "boolean",
            Value::Nil => "nil",
            Value::Symbol(_) => "symbol",
            Value::Array(_) => "array",
            Value::Hash(_) => "hash",
        }
    }
}

/// `directive args... [do ... end]`
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub directive: String,
    pub args: Vec<Value>,
    pub block: Option<Vec<Statement>>,
    pub line: usize,
}

impl Statement {
    /// Arguments before the trailing hash.
    pub fn positional(&self) -> impl Iterator<Item = &Value> {
        self.args.iter().filter(|v| !matches!(v, Value::Hash(_)))
    }

    pub fn first(&self) -> Option<&Value> {
        self.positional().next()
    }

    /// Pairs of the trailing `key: value` hash.
    pub fn pairs(&self) -> &[(Value, Value)] {
        match self.args.last() {
            Some(Value::Hash(pairs)) => pairs,
            _ => &[],
        }
    }

    /// Value for `key:` (or `"key" =>`) in the trailing hash.
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.pairs()
            .iter()
            .find(|(k, _)| k.as_text() == Some(key))
            .map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructKind {
    Formula,
    Cask,
}

/// One `class ... end` or `cask ... end`.
#[derive(Debug, Clone, PartialEq)]
pub struct Construct {
    /// Class name for formulae, token for casks.
    pub name: String,
    pub kind: ConstructKind,
    pub body: Vec<Statement>,
    pub line: usize,
}

/// A parsed definition file.
#[derive(Debug)]
pub struct Script {
    pub namespace: String,
    pub constructs: Vec<Arc<Construct>>,
}

impl Script {
    pub fn construct(&self, name: &str) -> Option<&Arc<Construct>> {
        self.constructs.iter().find(|c| c.name == name)
    }

    pub fn construct_names(&self) -> Vec<String> {
        self.constructs.iter().map(|c| c.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

type ParseResult<T> = std::result::Result<T, ParseError>;

fn error<T>(line: usize, message: impl Into<String>) -> ParseResult<T> {
    Err(ParseError {
        line,
        message: message.into(),
    })
}

/// Parse `source` into its constructs.
pub fn parse(source: &str, namespace: &str) -> ParseResult<Script> {
    let tokens = Lexer::new(source).lex()?;
    let constructs = Parser { tokens, pos: 0 }.parse_file()?;
    Ok(Script {
        namespace: namespace.to_string(),
        constructs: constructs.into_iter().map(Arc::new).collect(),
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Label(String),
    Str(String),
    Int(i64),
    Symbol(String),
    Comma,
    Arrow,
    Lt,
    LBracket,
    RBracket,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Newline,
    Eof,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    line: usize,
}

struct PendingHeredoc {
    token: usize,
    terminator: String,
    squiggly: bool,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    tokens: Vec<Spanned>,
    heredocs: Vec<PendingHeredoc>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            tokens: Vec::new(),
            heredocs: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, token: Token) {
        self.tokens.push(Spanned {
            token,
            line: self.line,
        });
    }

    fn lex(mut self) -> ParseResult<Vec<Spanned>> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => self.pos += 1,
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '\n' => {
                    self.push(Token::Newline);
                    self.pos += 1;
                    self.line += 1;
                    self.read_heredoc_bodies()?;
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                '"' | '\'' => {
                    let line = self.line;
                    self.pos += 1;
                    let s = self.read_string(c)?;
                    self.tokens.push(Spanned {
                        token: Token::Str(s),
                        line,
                    });
                }
                ':' => self.read_symbol()?,
                '=' if self.peek_at(1) == Some('>') => {
                    self.push(Token::Arrow);
                    self.pos += 2;
                }
                '<' if self.peek_at(1) == Some('<')
                    && matches!(self.peek_at(2), Some('~') | Some('-')) =>
                {
                    self.read_heredoc_start()?;
                }
                '<' => {
                    self.push(Token::Lt);
                    self.pos += 1;
                }
                ',' | '[' | ']' | '(' | ')' | '{' | '}' => {
                    let token = match c {
                        ',' => Token::Comma,
                        '[' => Token::LBracket,
                        ']' => Token::RBracket,
                        '(' => Token::LParen,
                        ')' => Token::RParen,
                        '{' => Token::LBrace,
                        _ => Token::RBrace,
                    };
                    self.push(token);
                    self.pos += 1;
                }
                '-' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.read_int()?,
                c if c.is_ascii_digit() => self.read_int()?,
                c if c.is_alphabetic() || c == '_' => self.read_ident(),
                '.' => return error(self.line, "method calls are not supported"),
                other => return error(self.line, format!("unexpected character `{}`", other)),
            }
        }

        if let Some(heredoc) = self.heredocs.first() {
            return error(
                self.line,
                format!("unterminated heredoc `{}`", heredoc.terminator),
            );
        }
        self.push(Token::Newline);
        self.push(Token::Eof);
        Ok(self.tokens)
    }

    fn read_string(&mut self, quote: char) -> ParseResult<String> {
        let start = self.line;
        let mut s = String::new();
        loop {
            let Some(c) = self.peek() else {
                return error(start, "unterminated string");
            };
            self.pos += 1;
            match c {
                c if c == quote => return Ok(s),
                '\n' => {
                    self.line += 1;
                    s.push('\n');
                }
                '#' if quote == '"' && self.peek() == Some('{') => {
                    return error(self.line, "string interpolation is not supported");
                }
                '\\' => {
                    let Some(escaped) = self.peek() else {
                        return error(start, "unterminated string");
                    };
                    self.pos += 1;
                    match (quote, escaped) {
                        (_, '\\') => s.push('\\'),
                        (q, e) if q == e => s.push(e),
                        ('"', 'n') => s.push('\n'),
                        ('"', 't') => s.push('\t'),
                        ('"', '#') => s.push('#'),
                        ('\'', other) => {
                            s.push('\\');
                            s.push(other);
                        }
                        (_, other) => {
                            return error(self.line, format!("unsupported escape `\\{}`", other));
                        }
                    }
                }
                c => s.push(c),
            }
        }
    }

    fn read_symbol(&mut self) -> ParseResult<()> {
        match self.peek_at(1) {
            Some(':') => error(self.line, "constant paths are not supported"),
            Some('"') => {
                self.pos += 2;
                let s = self.read_string('"')?;
                self.push(Token::Symbol(s));
                Ok(())
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                self.pos += 1;
                let name = self.read_word();
                self.push(Token::Symbol(name));
                Ok(())
            }
            _ => error(self.line, "expected a symbol name after `:`"),
        }
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        if let Some(c @ ('!' | '?')) = self.peek() {
            if self.peek_at(1) != Some('=') {
                word.push(c);
                self.pos += 1;
            }
        }
        word
    }

    fn read_ident(&mut self) {
        let word = self.read_word();
        // `key: value`, but not `Foo::Bar`
        if self.peek() == Some(':') && self.peek_at(1) != Some(':') {
            self.pos += 1;
            self.push(Token::Label(word));
        } else {
            self.push(Token::Ident(word));
        }
    }

    fn read_int(&mut self) -> ParseResult<()> {
        let mut digits = String::new();
        if self.peek() == Some('-') {
            digits.push('-');
            self.pos += 1;
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    digits.push(c);
                }
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.peek() == Some('.') {
            return error(self.line, "numeric literals must be integers; quote versions");
        }
        match digits.parse() {
            Ok(value) => {
                self.push(Token::Int(value));
                Ok(())
            }
            Err(_) => error(self.line, format!("invalid integer `{}`", digits)),
        }
    }

    fn read_heredoc_start(&mut self) -> ParseResult<()> {
        let squiggly = self.peek_at(2) == Some('~');
        self.pos += 3;
        let terminator = self.read_word();
        if terminator.is_empty() {
            return error(self.line, "expected a heredoc terminator");
        }
        self.heredocs.push(PendingHeredoc {
            token: self.tokens.len(),
            terminator,
            squiggly,
        });
        self.push(Token::Str(String::new()));
        Ok(())
    }

    /// Consume the bodies of heredocs opened on the line just ended.
    fn read_heredoc_bodies(&mut self) -> ParseResult<()> {
        for heredoc in std::mem::take(&mut self.heredocs) {
            let start = self.line;
            let mut lines = Vec::new();
            loop {
                if self.pos >= self.chars.len() {
                    return error(
                        start,
                        format!("unterminated heredoc `{}`", heredoc.terminator),
                    );
                }
                let mut line = String::new();
                while let Some(c) = self.peek() {
                    self.pos += 1;
                    if c == '\n' {
                        break;
                    }
                    line.push(c);
                }
                self.line += 1;
                if line.trim() == heredoc.terminator {
                    break;
                }
                if line.contains("#{") {
                    return error(self.line - 1, "string interpolation is not supported");
                }
                lines.push(line);
            }

            let body = if heredoc.squiggly {
                dedent(&lines)
            } else {
                lines.iter().map(|l| format!("{}\n", l)).collect()
            };
            self.tokens[heredoc.token].token = Token::Str(body);
        }
        Ok(())
    }
}

// Indent is counted in chars so multibyte whitespace never splits a char.
fn dedent(lines: &[String]) -> String {
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);

    lines
        .iter()
        .map(|l| {
            let offset = l
                .char_indices()
                .take(indent)
                .take_while(|(_, c)| c.is_whitespace())
                .map(|(i, c)| i + c.len_utf8())
                .last()
                .unwrap_or(0);
            format!("{}\n", &l[offset..])
        })
        .collect()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.line)
            .unwrap_or(1)
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn is_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(w) if w == word)
    }

    fn skip_newlines(&mut self) {
        while self.peek() == &Token::Newline {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> ParseResult<()> {
        if self.peek() == &expected {
            self.pos += 1;
            Ok(())
        } else {
            error(self.line(), format!("expected {}", what))
        }
    }

    fn expect_line_end(&mut self) -> ParseResult<()> {
        match self.peek() {
            Token::Newline => {
                self.pos += 1;
                Ok(())
            }
            Token::Eof => Ok(()),
            other => error(self.line(), format!("unexpected {:?} at end of statement", other)),
        }
    }

    fn parse_file(&mut self) -> ParseResult<Vec<Construct>> {
        let mut constructs = Vec::new();
        self.skip_newlines();
        while self.peek() != &Token::Eof {
            constructs.push(self.parse_construct()?);
            self.skip_newlines();
        }
        Ok(constructs)
    }

    fn parse_construct(&mut self) -> ParseResult<Construct> {
        let line = self.line();
        match self.next() {
            Token::Ident(word) if word == "class" => {
                let Token::Ident(name) = self.next() else {
                    return error(line, "expected a class name");
                };
                if !name.starts_with(|c: char| c.is_ascii_uppercase()) {
                    return error(line, format!("`{}` is not a class name", name));
                }
                self.expect(Token::Lt, "`<` after the class name")?;
                match self.next() {
                    Token::Ident(parent) if parent == "Formula" => {}
                    _ => return error(line, "classes must inherit from Formula"),
                }
                self.expect_line_end()?;
                let body = self.parse_body()?;
                Ok(Construct {
                    name,
                    kind: ConstructKind::Formula,
                    body,
                    line,
                })
            }
            Token::Ident(word) if word == "cask" => {
                let Token::Str(token) = self.next() else {
                    return error(line, "expected a cask token string");
                };
                if !self.is_ident("do") {
                    return error(line, "expected `do` after the cask token");
                }
                self.pos += 1;
                self.expect_line_end()?;
                let body = self.parse_body()?;
                Ok(Construct {
                    name: token,
                    kind: ConstructKind::Cask,
                    body,
                    line,
                })
            }
            _ => error(line, "expected `class` or `cask`"),
        }
    }

    fn parse_body(&mut self) -> ParseResult<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            self.skip_newlines();
            if self.is_ident("end") {
                self.pos += 1;
                self.expect_line_end()?;
                return Ok(statements);
            }
            if self.peek() == &Token::Eof {
                return error(self.line(), "missing `end`");
            }
            statements.push(self.parse_statement()?);
        }
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        let line = self.line();
        let directive = match self.next() {
            Token::Ident(word) => word,
            other => return error(line, format!("expected a directive, found {:?}", other)),
        };

        let args = if self.peek() == &Token::LParen {
            self.pos += 1;
            let args = if self.peek() == &Token::RParen {
                vec![]
            } else {
                self.parse_args()?
            };
            self.expect(Token::RParen, "`)`")?;
            args
        } else if matches!(self.peek(), Token::Newline | Token::Eof) || self.is_ident("do") {
            vec![]
        } else {
            self.parse_args()?
        };

        let block = if self.is_ident("do") {
            self.pos += 1;
            self.expect_line_end()?;
            Some(self.parse_body()?)
        } else {
            self.expect_line_end()?;
            None
        };

        Ok(Statement {
            directive,
            args,
            block,
            line,
        })
    }

    fn parse_args(&mut self) -> ParseResult<Vec<Value>> {
        let mut args = Vec::new();
        let mut pairs = Vec::new();
        loop {
            if let Token::Label(key) = self.peek().clone() {
                self.pos += 1;
                let value = self.parse_value()?;
                pairs.push((Value::Symbol(key), value));
            } else {
                let value = self.parse_value()?;
                if self.peek() == &Token::Arrow {
                    self.pos += 1;
                    let target = self.parse_value()?;
                    pairs.push((value, target));
                } else if !pairs.is_empty() {
                    return error(self.line(), "positional argument after keyword arguments");
                } else {
                    args.push(value);
                }
            }

            if self.peek() == &Token::Comma {
                self.pos += 1;
                self.skip_newlines();
            } else {
                break;
            }
        }
        if !pairs.is_empty() {
            args.push(Value::Hash(pairs));
        }
        Ok(args)
    }

    fn parse_value(&mut self) -> ParseResult<Value> {
        let line = self.line();
        match self.next() {
            Token::Str(s) => Ok(Value::Str(s)),
            Token::Int(i) => Ok(Value::Int(i)),
            Token::Symbol(s) => Ok(Value::Symbol(s)),
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "nil" => Ok(Value::Nil),
                _ => error(line, format!("unsupported expression `{}`", word)),
            },
            Token::LBracket => {
                let mut items = Vec::new();
                loop {
                    self.skip_newlines();
                    if self.peek() == &Token::RBracket {
                        self.pos += 1;
                        return Ok(Value::Array(items));
                    }
                    items.push(self.parse_value()?);
                    self.skip_newlines();
                    match self.next() {
                        Token::Comma => continue,
                        Token::RBracket => return Ok(Value::Array(items)),
                        _ => return error(self.line(), "expected `,` or `]` in array"),
                    }
                }
            }
            Token::LBrace => {
                let mut pairs = Vec::new();
                loop {
                    self.skip_newlines();
                    if self.peek() == &Token::RBrace {
                        self.pos += 1;
                        return Ok(Value::Hash(pairs));
                    }
                    let key = match self.peek().clone() {
                        Token::Label(key) => {
                            self.pos += 1;
                            Value::Symbol(key)
                        }
                        _ => {
                            let key = self.parse_value()?;
                            self.expect(Token::Arrow, "`=>` in hash")?;
                            key
                        }
                    };
                    let value = self.parse_value()?;
                    pairs.push((key, value));
                    self.skip_newlines();
                    match self.next() {
                        Token::Comma => continue,
                        Token::RBrace => return Ok(Value::Hash(pairs)),
                        _ => return error(self.line(), "expected `,` or `}` in hash"),
                    }
                }
            }
            other => error(line, format!("unexpected {:?}", other)),
        }
    }
}

/// Parsed scripts keyed by namespace.
///
/// A script is registered only after it was evaluated successfully, so a
/// failed load never leaves a partial entry behind.
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    scripts: Mutex<HashMap<String, Arc<Script>>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespace for `content` read from `path` on `platform`.
    pub fn namespace(platform: &Platform, path: &Path, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(platform.bottle_tag().as_bytes());
        hasher.update([0]);
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<Script>> {
        self.lock().get(namespace).cloned()
    }

    /// Register `script`, keeping an entry already present under its namespace.
    pub fn register(&self, script: Script) -> Arc<Script> {
        self.lock()
            .entry(script.namespace.clone())
            .or_insert_with(|| Arc::new(script))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Script>>> {
        self.scripts.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, Os};

    const FORMULA: &str = r#"
# A comment
class Foo < Formula
  desc "Frobnicates \"things\""
  url "https://example.com/foo-1.0.tar.gz", branch: "main"
  depends_on "baz" => [:build, :test]
  depends_on macos: :big_sur
  caveats <<~EOS
    Run foo
      indented
  EOS
  bottle do
    sha256 cellar: :any, arm64_sonoma: "abc"
  end
end
"#;

    #[test]
    fn test_parse_formula() {
        let script = parse(FORMULA, "ns").unwrap();
        assert_eq!(script.construct_names(), vec!["Foo"]);

        let foo = script.construct("Foo").unwrap();
        assert_eq!(foo.kind, ConstructKind::Formula);
        assert_eq!(foo.body.len(), 6);

        let desc = &foo.body[0];
        assert_eq!(desc.first(), Some(&Value::Str("Frobnicates \"things\"".into())));

        let url = &foo.body[1];
        assert_eq!(url.option("branch"), Some(&Value::Str("main".into())));

        let dep = &foo.body[2];
        assert_eq!(
            dep.pairs()[0],
            (
                Value::Str("baz".into()),
                Value::Array(vec![Value::Symbol("build".into()), Value::Symbol("test".into())])
            )
        );

        let caveats = &foo.body[4];
        assert_eq!(caveats.first(), Some(&Value::Str("Run foo\n  indented\n".into())));

        let bottle = foo.body[5].block.as_ref().unwrap();
        assert_eq!(bottle[0].option("cellar"), Some(&Value::Symbol("any".into())));
        assert_eq!(bottle[0].option("arm64_sonoma"), Some(&Value::Str("abc".into())));
    }

    #[test]
    fn test_parse_cask() {
        let script = parse(
            "cask \"tool\" do\n  version \"1.0\"\n  app \"Tool.app\"\n  uninstall quit: \"com.tool\"\nend\n",
            "ns",
        )
        .unwrap();
        let tool = script.construct("tool").unwrap();
        assert_eq!(tool.kind, ConstructKind::Cask);
        assert_eq!(tool.body[2].option("quit"), Some(&Value::Str("com.tool".into())));
    }

    #[test]
    fn test_rejects_host_code() {
        let interpolation = "class Foo < Formula\n  desc \"#{name}\"\nend\n";
        let err = parse(interpolation, "ns").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("interpolation"));

        let method_call = "class Foo < Formula\n  bin.install \"foo\"\nend\n";
        assert!(parse(method_call, "ns").is_err());

        let unterminated = "class Foo < Formula\n  desc \"x\"\n";
        assert!(parse(unterminated, "ns").unwrap_err().message.contains("end"));
    }

    #[test]
    fn test_squiggly_heredoc_with_wide_whitespace() {
        let source = "class Foo < Formula\n  caveats <<~EOS\n    first\n\u{3000}\u{3000}\n      second\n  EOS\nend\n";
        let script = parse(source, "ns").unwrap();
        let caveats = &script.constructs[0].body[0];
        assert_eq!(caveats.first(), Some(&Value::Str("first\n\n  second\n".into())));

        let wide = "class Foo < Formula\n  caveats <<~EOS\n\u{3000}\u{3000}first\n\u{3000}\u{3000}\u{3000}next\n  EOS\nend\n";
        let script = parse(wide, "ns").unwrap();
        let caveats = &script.constructs[0].body[0];
        assert_eq!(caveats.first(), Some(&Value::Str("first\n\u{3000}next\n".into())));
    }

    #[test]
    fn test_multiline_arguments() {
        let source = "class Foo < Formula\n  service run: [\n    \"/bin/foo\",\n    \"--serve\",\n  ], keep_alive: true\nend\n";
        let script = parse(source, "ns").unwrap();
        let service = &script.constructs[0].body[0];
        assert_eq!(
            service.option("run").unwrap().texts().unwrap(),
            vec!["/bin/foo", "--serve"]
        );
        assert_eq!(service.option("keep_alive"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_namespace_depends_on_platform_path_and_content() {
        let mac = Platform::new(Os::Macos, Arch::Arm64);
        let linux = Platform::new(Os::Linux, Arch::Arm64);
        let path = Path::new("/taps/foo.rb");

        let a = ScriptRegistry::namespace(&mac, path, "x");
        assert_eq!(a, ScriptRegistry::namespace(&mac, path, "x"));
        assert_ne!(a, ScriptRegistry::namespace(&linux, path, "x"));
        assert_ne!(a, ScriptRegistry::namespace(&mac, Path::new("/other.rb"), "x"));
        assert_ne!(a, ScriptRegistry::namespace(&mac, path, "y"));
    }

    #[test]
    fn test_registry_keeps_first_entry() {
        let registry = ScriptRegistry::new();
        let first = registry.register(parse(FORMULA, "ns").unwrap());
        let second = registry.register(parse(FORMULA, "ns").unwrap());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }
}
