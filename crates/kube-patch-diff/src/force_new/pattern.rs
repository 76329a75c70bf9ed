use std::{fmt::Display, num::ParseIntError, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{ResultExt, Snafu};

/// Error variants which can be encountered when parsing a [`ForceNewPattern`].
#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum ParsePatternError {
    #[snafu(display("pattern must not be empty"))]
    Empty,

    #[snafu(display("expected a field name at position {position}"))]
    EmptyField { position: usize },

    #[snafu(display("unexpected character {character:?} at position {position}"))]
    UnexpectedCharacter { character: char, position: usize },

    #[snafu(display("bracket opened at position {position} is never closed"))]
    UnterminatedBracket { position: usize },

    #[snafu(display("quoted field starting at position {position} is never closed"))]
    UnterminatedString { position: usize },

    #[snafu(display("invalid array index {index:?} at position {position}"))]
    InvalidIndex {
        source: ParseIntError,
        index: String,
        position: usize,
    },
}

/// Error raised when a pattern is evaluated against a value of the wrong shape.
#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(display("array index [{index}] applied to {found}"))]
pub struct ShapeError {
    pub index: usize,
    pub found: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Selector {
    Name(String),
    Index(usize),
    Wildcard,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Step {
    selector: Selector,

    /// Set for `..` steps, which apply the selector to the value and all of its descendants.
    recursive: bool,
}

/// A JSONPath-like expression selecting properties whose change requires replacing the object.
///
/// The supported syntax is the subset of Kubernetes JSONPath used to describe object fields:
///
/// - an optional `$` root and an optional leading `.`
/// - `.name` and `['name']` / `["name"]` child fields
/// - `[N]` array indices
/// - `.*` and `[*]` wildcards
/// - `..name` recursive descent
///
/// ```
/// use kube_patch_diff::force_new::ForceNewPattern;
/// use serde_json::json;
///
/// let pattern: ForceNewPattern = ".spec.containers[*].name".parse().unwrap();
/// let document = json!({"spec": {"containers": [{"name": "nginx"}]}});
///
/// assert!(pattern.matches(&document).unwrap());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ForceNewPattern {
    raw: String,
    steps: Vec<Step>,
}

impl ForceNewPattern {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns all values selected by this pattern.
    ///
    /// Missing fields are skipped. Applying an index to a value which is present but neither
    /// an array nor `null` is an error, unless it happens during recursive descent.
    pub fn select<'a>(&self, document: &'a Value) -> Result<Vec<&'a Value>, ShapeError> {
        let mut current = vec![document];

        for step in &self.steps {
            let mut next = Vec::new();
            for value in current {
                if step.recursive {
                    for node in self_and_descendants(value) {
                        select_children(&step.selector, node, false, &mut next)?;
                    }
                } else {
                    select_children(&step.selector, value, true, &mut next)?;
                }
            }
            current = next;
        }

        Ok(current)
    }

    /// Returns `true` if this pattern selects at least one value in `document`.
    ///
    /// Empty strings do not count as a match, `null` does.
    pub fn matches(&self, document: &Value) -> Result<bool, ShapeError> {
        let selected = self.select(document)?;
        Ok(selected
            .into_iter()
            .any(|value| !matches!(value, Value::String(s) if s.is_empty())))
    }
}

fn select_children<'a>(
    selector: &Selector,
    value: &'a Value,
    strict: bool,
    selected: &mut Vec<&'a Value>,
) -> Result<(), ShapeError> {
    match (selector, value) {
        (Selector::Name(name), Value::Object(map)) => selected.extend(map.get(name)),
        (Selector::Index(index), Value::Array(array)) => selected.extend(array.get(*index)),
        (Selector::Index(index), value) if strict && !value.is_null() => {
            return Err(ShapeError {
                index: *index,
                found: type_name(value),
            });
        }
        (Selector::Wildcard, Value::Object(map)) => selected.extend(map.values()),
        (Selector::Wildcard, Value::Array(array)) => selected.extend(array),
        _ => {}
    }

    Ok(())
}

fn self_and_descendants(value: &Value) -> Vec<&Value> {
    let mut nodes = Vec::new();
    let mut stack = vec![value];

    while let Some(node) = stack.pop() {
        nodes.push(node);
        match node {
            Value::Object(map) => stack.extend(map.values().rev()),
            Value::Array(array) => stack.extend(array.iter().rev()),
            _ => {}
        }
    }

    nodes
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl FromStr for ForceNewPattern {
    type Err = ParsePatternError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let steps = Parser::new(input).parse()?;
        Ok(Self {
            raw: input.to_owned(),
            steps,
        })
    }
}

impl TryFrom<String> for ForceNewPattern {
    type Error = ParsePatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ForceNewPattern> for String {
    fn from(pattern: ForceNewPattern) -> Self {
        pattern.raw
    }
}

impl Display for ForceNewPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

struct Parser<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, position: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.input[self.position..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position += c.len_utf8();
        Some(c)
    }

    fn parse(mut self) -> Result<Vec<Step>, ParsePatternError> {
        if self.input.trim().is_empty() {
            return EmptySnafu.fail();
        }

        if self.peek() == Some('$') {
            self.bump();
        }

        let mut steps = Vec::new();
        let mut first = true;

        while let Some(c) = self.peek() {
            let step = match c {
                '.' if self.peek_second() == Some('.') => {
                    self.position += 2;
                    let selector = match self.peek() {
                        Some('[') => self.bracket()?,
                        _ => self.dotted()?,
                    };
                    Step {
                        selector,
                        recursive: true,
                    }
                }
                '.' => {
                    self.bump();
                    Step {
                        selector: self.dotted()?,
                        recursive: false,
                    }
                }
                '[' => Step {
                    selector: self.bracket()?,
                    recursive: false,
                },
                // Patterns may omit the leading dot, e.g. `spec.selector`
                _ if first => Step {
                    selector: self.dotted()?,
                    recursive: false,
                },
                character => {
                    return UnexpectedCharacterSnafu {
                        character,
                        position: self.position,
                    }
                    .fail();
                }
            };

            steps.push(step);
            first = false;
        }

        Ok(steps)
    }

    /// Parses the selector following a `.`: either `*` or a field name.
    fn dotted(&mut self) -> Result<Selector, ParsePatternError> {
        let start = self.position;

        if self.peek() == Some('*') {
            self.bump();
            return Ok(Selector::Wildcard);
        }

        while let Some(c) = self.peek() {
            match c {
                '.' | '[' => break,
                ']' | '\'' | '"' | '*' => {
                    return UnexpectedCharacterSnafu {
                        character: c,
                        position: self.position,
                    }
                    .fail();
                }
                c if c.is_whitespace() => {
                    return UnexpectedCharacterSnafu {
                        character: c,
                        position: self.position,
                    }
                    .fail();
                }
                _ => {
                    self.bump();
                }
            }
        }

        if self.position == start {
            return EmptyFieldSnafu { position: start }.fail();
        }

        Ok(Selector::Name(self.input[start..self.position].to_owned()))
    }

    /// Parses a bracketed selector: `[*]`, `[N]`, `['name']` or `["name"]`.
    fn bracket(&mut self) -> Result<Selector, ParsePatternError> {
        let open = self.position;
        self.bump();
        self.skip_whitespace();

        let selector = match self.peek() {
            Some(quote @ ('\'' | '"')) => Selector::Name(self.quoted(quote)?),
            Some('*') => {
                self.bump();
                Selector::Wildcard
            }
            Some(_) => {
                let start = self.position;
                while self.peek().is_some_and(|c| c != ']' && !c.is_whitespace()) {
                    self.bump();
                }
                let index = &self.input[start..self.position];
                if index.is_empty() {
                    return EmptyFieldSnafu { position: start }.fail();
                }
                Selector::Index(index.parse().context(InvalidIndexSnafu {
                    index,
                    position: start,
                })?)
            }
            None => return UnterminatedBracketSnafu { position: open }.fail(),
        };

        self.skip_whitespace();
        match self.bump() {
            Some(']') => Ok(selector),
            Some(character) => UnexpectedCharacterSnafu {
                character,
                position: self.position - character.len_utf8(),
            }
            .fail(),
            None => UnterminatedBracketSnafu { position: open }.fail(),
        }
    }

    fn quoted(&mut self, quote: char) -> Result<String, ParsePatternError> {
        let start = self.position;
        self.bump();

        let mut name = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(escaped) => name.push(escaped),
                    None => return UnterminatedStringSnafu { position: start }.fail(),
                },
                Some(c) if c == quote => return Ok(name),
                Some(c) => name.push(c),
                None => return UnterminatedStringSnafu { position: start }.fail(),
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }
}
