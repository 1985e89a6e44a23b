//! Parser for executable GraphQL documents.
//!
//! Supports operations (named or shorthand), variable definitions with
//! defaults, aliases, arguments and nested selection sets. Fragments and
//! directives are rejected.

use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Syntax Error: {message} (at offset {offset})")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

// ---------------------------------------------------------------------------
// Document model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variables: Vec<VariableDefinition>,
    pub selection: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub default: Option<InputValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, InputValue)>,
    pub selection: Vec<Field>,
}

impl Field {
    /// Key of this field in the response.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A literal or variable reference in argument position.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
    Enum(String),
    Variable(String),
    List(Vec<InputValue>),
    Object(Vec<(String, InputValue)>),
}

impl InputValue {
    /// Substitutes variables and converts to JSON. Unset variables become
    /// `None`.
    #[must_use]
    pub fn resolve(&self, variables: &Map<String, Value>) -> Option<Value> {
        Some(match self {
            Self::Null => Value::Null,
            Self::Boolean(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::String(s) | Self::Enum(s) => Value::String(s.clone()),
            Self::Variable(name) => return variables.get(name).cloned(),
            Self::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(variables).unwrap_or(Value::Null))
                    .collect(),
            ),
            Self::Object(fields) => Value::Object(
                fields
                    .iter()
                    .filter_map(|(k, v)| v.resolve(variables).map(|v| (k.clone(), v)))
                    .collect(),
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Punct(char),
    Spread,
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Eof,
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            offset: self.pos,
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn skip_ignored(&mut self) {
        while let Some(c) = self.peek_char() {
            match c {
                ' ' | '\t' | '\n' | '\r' | ',' | '\u{feff}' => self.pos += c.len_utf8(),
                '#' => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += c.len_utf8();
                    }
                }
                _ => break,
            }
        }
    }

    /// Returns the next token and the offset it starts at.
    fn next(&mut self) -> Result<(Token, usize), ParseError> {
        self.skip_ignored();
        let start = self.pos;
        let Some(c) = self.peek_char() else {
            return Ok((Token::Eof, start));
        };
        let token = match c {
            '{' | '}' | '(' | ')' | '[' | ']' | ':' | '$' | '!' | '=' | '@' => {
                self.pos += 1;
                Token::Punct(c)
            }
            '.' => {
                if self.src[self.pos..].starts_with("...") {
                    self.pos += 3;
                    Token::Spread
                } else {
                    return Err(self.error("Unexpected \".\""));
                }
            }
            '"' => self.string()?,
            '-' | '0'..='9' => self.number()?,
            c if c == '_' || c.is_ascii_alphabetic() => {
                let end = self.src[self.pos..]
                    .find(|c: char| !(c == '_' || c.is_ascii_alphanumeric()))
                    .map_or(self.src.len(), |i| self.pos + i);
                let name = self.src[self.pos..end].to_string();
                self.pos = end;
                Token::Name(name)
            }
            other => return Err(self.error(format!("Unexpected character \"{other}\""))),
        };
        Ok((token, start))
    }

    fn number(&mut self) -> Result<Token, ParseError> {
        let rest = &self.src[self.pos..];
        let len = rest
            .char_indices()
            .find(|&(i, c)| {
                !(c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+') || (c == '-' && (i == 0 || rest[..i].ends_with(['e', 'E']))))
            })
            .map_or(rest.len(), |(i, _)| i);
        let text = &rest[..len];
        self.pos += len;
        if text.contains(['.', 'e', 'E']) {
            text.parse()
                .map(Token::Float)
                .map_err(|_| self.error(format!("Invalid number \"{text}\"")))
        } else {
            text.parse()
                .map(Token::Int)
                .map_err(|_| self.error(format!("Invalid number \"{text}\"")))
        }
    }

    fn string(&mut self) -> Result<Token, ParseError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek_char() else {
                return Err(self.error("Unterminated string"));
            };
            self.pos += c.len_utf8();
            match c {
                '"' => return Ok(Token::Str(out)),
                '\n' => return Err(self.error("Unterminated string")),
                '\\' => {
                    let Some(esc) = self.peek_char() else {
                        return Err(self.error("Unterminated string"));
                    };
                    self.pos += esc.len_utf8();
                    match esc {
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        '/' => out.push('/'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        'n' => out.push('\n'),
                        'r' => out.push('\r'),
                        't' => out.push('\t'),
                        'u' => {
                            let hex = self.src.get(self.pos..self.pos + 4).unwrap_or_default();
                            let code = u32::from_str_radix(hex, 16)
                                .ok()
                                .and_then(char::from_u32)
                                .ok_or_else(|| self.error("Invalid unicode escape"))?;
                            self.pos += 4;
                            out.push(code);
                        }
                        other => return Err(self.error(format!("Invalid escape \"\\{other}\""))),
                    }
                }
                c => out.push(c),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    offset: usize,
}

/// Parses an executable document.
///
/// # Errors
///
/// Returns the first syntax error, or an error for fragments, directives,
/// subscriptions and empty documents.
pub fn parse(source: &str) -> Result<Document, ParseError> {
    let mut lexer = Lexer::new(source);
    let (current, offset) = lexer.next()?;
    let mut parser = Parser {
        lexer,
        current,
        offset,
    };
    parser.document()
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            offset: self.offset,
        }
    }

    fn advance(&mut self) -> Result<Token, ParseError> {
        let (next, offset) = self.lexer.next()?;
        self.offset = offset;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn is_punct(&self, c: char) -> bool {
        self.current == Token::Punct(c)
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ParseError> {
        if self.is_punct(c) {
            self.advance()?;
            Ok(())
        } else {
            Err(self.unexpected(&format!("Expected \"{c}\"")))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let found = match &self.current {
            Token::Punct(c) => format!("\"{c}\""),
            Token::Spread => "\"...\"".to_string(),
            Token::Name(n) => format!("Name \"{n}\""),
            Token::Int(i) => format!("Int \"{i}\""),
            Token::Float(f) => format!("Float \"{f}\""),
            Token::Str(s) => format!("String \"{s}\""),
            Token::Eof => "<EOF>".to_string(),
        };
        self.error(format!("{expected}, found {found}"))
    }

    fn name(&mut self) -> Result<String, ParseError> {
        let Token::Name(name) = &self.current else {
            return Err(self.unexpected("Expected Name"));
        };
        let name = name.clone();
        self.advance()?;
        Ok(name)
    }

    fn document(&mut self) -> Result<Document, ParseError> {
        let mut operations = Vec::new();
        while self.current != Token::Eof {
            operations.push(self.operation()?);
        }
        if operations.is_empty() {
            return Err(self.error("Unexpected <EOF>"));
        }
        Ok(Document { operations })
    }

    fn operation(&mut self) -> Result<Operation, ParseError> {
        if self.is_punct('{') {
            return Ok(Operation {
                kind: OperationKind::Query,
                name: None,
                variables: Vec::new(),
                selection: self.selection_set()?,
            });
        }
        let kind = match &self.current {
            Token::Name(n) if n == "query" => OperationKind::Query,
            Token::Name(n) if n == "mutation" => OperationKind::Mutation,
            Token::Name(n) if n == "subscription" => {
                return Err(self.error("Subscriptions are not supported"))
            }
            Token::Name(n) if n == "fragment" => return Err(self.error("Fragments are not supported")),
            _ => return Err(self.unexpected("Expected an operation")),
        };
        self.advance()?;
        let name = match &self.current {
            Token::Name(_) => Some(self.name()?),
            _ => None,
        };
        let variables = if self.is_punct('(') {
            self.variable_definitions()?
        } else {
            Vec::new()
        };
        self.reject_directives()?;
        Ok(Operation {
            kind,
            name,
            variables,
            selection: self.selection_set()?,
        })
    }

    fn variable_definitions(&mut self) -> Result<Vec<VariableDefinition>, ParseError> {
        self.expect_punct('(')?;
        let mut defs = Vec::new();
        while !self.is_punct(')') {
            self.expect_punct('$')?;
            let name = self.name()?;
            self.expect_punct(':')?;
            self.type_reference()?;
            let default = if self.is_punct('=') {
                self.advance()?;
                Some(self.value(true)?)
            } else {
                None
            };
            defs.push(VariableDefinition { name, default });
        }
        self.advance()?;
        Ok(defs)
    }

    /// Variable types are only checked for syntax; coercion happens against
    /// the field's own argument types.
    fn type_reference(&mut self) -> Result<(), ParseError> {
        if self.is_punct('[') {
            self.advance()?;
            self.type_reference()?;
            self.expect_punct(']')?;
        } else {
            self.name()?;
        }
        if self.is_punct('!') {
            self.advance()?;
        }
        Ok(())
    }

    fn reject_directives(&self) -> Result<(), ParseError> {
        if self.is_punct('@') {
            Err(self.error("Directives are not supported"))
        } else {
            Ok(())
        }
    }

    fn selection_set(&mut self) -> Result<Vec<Field>, ParseError> {
        self.expect_punct('{')?;
        let mut fields = Vec::new();
        while !self.is_punct('}') {
            if self.current == Token::Spread {
                return Err(self.error("Fragments are not supported"));
            }
            fields.push(self.field()?);
        }
        self.advance()?;
        if fields.is_empty() {
            return Err(self.error("Selection set must not be empty"));
        }
        Ok(fields)
    }

    fn field(&mut self) -> Result<Field, ParseError> {
        let first = self.name()?;
        let (alias, name) = if self.is_punct(':') {
            self.advance()?;
            (Some(first), self.name()?)
        } else {
            (None, first)
        };
        let arguments = if self.is_punct('(') {
            self.arguments()?
        } else {
            Vec::new()
        };
        self.reject_directives()?;
        let selection = if self.is_punct('{') {
            self.selection_set()?
        } else {
            Vec::new()
        };
        Ok(Field {
            alias,
            name,
            arguments,
            selection,
        })
    }

    fn arguments(&mut self) -> Result<Vec<(String, InputValue)>, ParseError> {
        self.expect_punct('(')?;
        let mut args = Vec::new();
        while !self.is_punct(')') {
            let name = self.name()?;
            self.expect_punct(':')?;
            args.push((name, self.value(false)?));
        }
        self.advance()?;
        Ok(args)
    }

    fn value(&mut self, constant: bool) -> Result<InputValue, ParseError> {
        if self.is_punct('$') {
            if constant {
                return Err(self.error("Variables are not allowed here"));
            }
            self.advance()?;
            return Ok(InputValue::Variable(self.name()?));
        }
        if self.is_punct('[') {
            self.advance()?;
            let mut items = Vec::new();
            while !self.is_punct(']') {
                items.push(self.value(constant)?);
            }
            self.advance()?;
            return Ok(InputValue::List(items));
        }
        if self.is_punct('{') {
            self.advance()?;
            let mut fields = Vec::new();
            while !self.is_punct('}') {
                let name = self.name()?;
                self.expect_punct(':')?;
                fields.push((name, self.value(constant)?));
            }
            self.advance()?;
            return Ok(InputValue::Object(fields));
        }
        let value = match &self.current {
            Token::Int(i) => InputValue::Int(*i),
            Token::Float(f) => InputValue::Float(*f),
            Token::Str(s) => InputValue::String(s.clone()),
            Token::Name(n) => match n.as_str() {
                "true" => InputValue::Boolean(true),
                "false" => InputValue::Boolean(false),
                "null" => InputValue::Null,
                other => InputValue::Enum(other.to_string()),
            },
            _ => return Err(self.unexpected("Expected a value")),
        };
        self.advance()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_shorthand_query() {
        let doc = parse("{ users { id name } }").unwrap();
        let op = &doc.operations[0];
        assert_eq!(op.kind, OperationKind::Query);
        assert_eq!(op.selection[0].name, "users");
        assert_eq!(op.selection[0].selection.len(), 2);
    }

    #[test]
    fn parses_named_mutation_with_variables_and_aliases() {
        let doc = parse(
            r#"
            # create one
            mutation Create($name: String!, $tags: [String!] = ["a"]) {
              created: createUser(input: { name: $name, age: 3, ratio: -1.5e2 }, tags: $tags) {
                id
              }
            }
            "#,
        )
        .unwrap();
        let op = &doc.operations[0];
        assert_eq!(op.kind, OperationKind::Mutation);
        assert_eq!(op.name.as_deref(), Some("Create"));
        assert_eq!(op.variables.len(), 2);
        assert_eq!(
            op.variables[1].default,
            Some(InputValue::List(vec![InputValue::String("a".into())]))
        );

        let field = &op.selection[0];
        assert_eq!(field.response_key(), "created");
        assert_eq!(field.name, "createUser");

        let mut vars = Map::new();
        vars.insert("name".into(), json!("Ada"));
        let input = field.arguments[0].1.resolve(&vars).unwrap();
        assert_eq!(input, json!({"name": "Ada", "age": 3, "ratio": -150.0}));
        assert_eq!(field.arguments[1].1.resolve(&vars), None);
    }

    #[test]
    fn string_escapes_are_decoded() {
        let doc = parse(r#"{ echo(text: "a\"b\n\u0041") }"#).unwrap();
        assert_eq!(
            doc.operations[0].selection[0].arguments[0].1,
            InputValue::String("a\"b\nA".into())
        );
    }

    #[test]
    fn rejects_unsupported_and_malformed_documents() {
        assert!(parse("").is_err());
        assert!(parse("{ users { ...UserFields } }").is_err());
        assert!(parse("{ users @include(if: true) { id } }").is_err());
        assert!(parse("subscription { ticks }").is_err());
        assert!(parse("{ users { id }").is_err());
        assert!(parse("{ }").is_err());
        let err = parse("{ user(id: ) { id } }").unwrap_err();
        assert!(err.message.contains("Expected a value"), "{err}");
    }
}
