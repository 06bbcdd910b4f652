//! Turns a [`DesiredEndpoint`] into artifact bytes.
//!
//! Configuration artifacts come from a small text template evaluated over
//! the endpoint's JSON form:
//!
//! * `{{ field }}` substitutes a scalar field (`null` renders empty).
//! * `{{#if field}} .. {{else}} .. {{/if}}` renders a branch depending on
//!   whether the field is truthy: a non-empty string or list, `true`, or a
//!   non-zero number.
//!
//! Credential artifacts are the endpoint's entries joined by newlines.

use std::fs;
use std::path::Path;

use log::warn;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::DesiredEndpoint;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unterminated tag starting at byte {0}")]
    UnterminatedTag(usize),
    #[error("unexpected `{{{{{0}}}}}` at byte {1}")]
    UnexpectedTag(String, usize),
    #[error("`{{{{#if {0}}}}}` is never closed")]
    UnclosedIf(String),
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("field `{0}` is a list and cannot be substituted")]
    NotScalar(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Field(String),
    If {
        field: String,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// A parsed configuration template.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Unable to read template {}: {}", path.display(), e))?;
        let template = Self::parse(&source)
            .and_then(|t| t.check_fields().map(|()| t))
            .map_err(|e| anyhow::anyhow!("Invalid template {}: {}", path.display(), e))?;
        Ok(template)
    }

    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut parser = Parser { source, pos: 0 };
        let (nodes, end) = parser.block()?;
        match end {
            BlockEnd::Eof => Ok(Self { nodes }),
            BlockEnd::Else(at) => Err(TemplateError::UnexpectedTag("else".into(), at)),
            BlockEnd::EndIf(at) => Err(TemplateError::UnexpectedTag("/if".into(), at)),
        }
    }

    /// Reject references that would fail for every endpoint: unknown
    /// fields and substituted lists.
    pub fn check_fields(&self) -> Result<(), TemplateError> {
        check_nodes(&self.nodes, &context(&DesiredEndpoint::default()))
    }

    pub fn render(&self, endpoint: &DesiredEndpoint) -> Result<String, TemplateError> {
        let context = context(endpoint);
        let mut out = String::new();
        render_nodes(&self.nodes, &context, &mut out)?;
        Ok(out)
    }
}

enum BlockEnd {
    Eof,
    Else(usize),
    EndIf(usize),
}

struct Parser<'a> {
    source: &'a str,
    pos: usize,
}

impl Parser<'_> {
    /// Parse nodes until end of input or a block-closing tag.
    fn block(&mut self) -> Result<(Vec<Node>, BlockEnd), TemplateError> {
        let mut nodes = Vec::new();
        loop {
            let rest = &self.source[self.pos..];
            let Some(open) = rest.find("{{") else {
                if !rest.is_empty() {
                    nodes.push(Node::Text(rest.to_string()));
                }
                self.pos = self.source.len();
                return Ok((nodes, BlockEnd::Eof));
            };
            if open > 0 {
                nodes.push(Node::Text(rest[..open].to_string()));
            }

            let start = self.pos + open;
            let close = self.source[start..]
                .find("}}")
                .ok_or(TemplateError::UnterminatedTag(start))?;
            let tag = self.source[start + 2..start + close].trim();
            self.pos = start + close + 2;

            if let Some(field) = tag.strip_prefix("#if ") {
                let field = field.trim().to_string();
                let (then, end) = self.block()?;
                let otherwise = match end {
                    BlockEnd::EndIf(_) => Vec::new(),
                    BlockEnd::Else(_) => match self.block()? {
                        (otherwise, BlockEnd::EndIf(_)) => otherwise,
                        (_, BlockEnd::Else(at)) => {
                            return Err(TemplateError::UnexpectedTag("else".into(), at))
                        }
                        (_, BlockEnd::Eof) => return Err(TemplateError::UnclosedIf(field)),
                    },
                    BlockEnd::Eof => return Err(TemplateError::UnclosedIf(field)),
                };
                nodes.push(Node::If {
                    field,
                    then,
                    otherwise,
                });
            } else if tag == "else" {
                return Ok((nodes, BlockEnd::Else(start)));
            } else if tag == "/if" {
                return Ok((nodes, BlockEnd::EndIf(start)));
            } else if tag.is_empty() || tag.starts_with('#') || tag.starts_with('/') {
                return Err(TemplateError::UnexpectedTag(tag.to_string(), start));
            } else {
                nodes.push(Node::Field(tag.to_string()));
            }
        }
    }
}

fn context(endpoint: &DesiredEndpoint) -> Map<String, Value> {
    match serde_json::to_value(endpoint) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn check_nodes(nodes: &[Node], context: &Map<String, Value>) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Field(field) => {
                if let Value::Array(_) | Value::Object(_) = lookup(context, field)? {
                    return Err(TemplateError::NotScalar(field.clone()));
                }
            }
            Node::If {
                field,
                then,
                otherwise,
            } => {
                lookup(context, field)?;
                check_nodes(then, context)?;
                check_nodes(otherwise, context)?;
            }
        }
    }
    Ok(())
}

fn lookup<'a>(context: &'a Map<String, Value>, field: &str) -> Result<&'a Value, TemplateError> {
    context
        .get(field)
        .ok_or_else(|| TemplateError::UnknownField(field.to_string()))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn render_nodes(
    nodes: &[Node],
    context: &Map<String, Value>,
    out: &mut String,
) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Field(field) => match lookup(context, field)? {
                Value::Null => {}
                Value::String(s) => out.push_str(s),
                Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
                Value::Number(n) => out.push_str(&n.to_string()),
                Value::Array(_) | Value::Object(_) => {
                    return Err(TemplateError::NotScalar(field.clone()))
                }
            },
            Node::If {
                field,
                then,
                otherwise,
            } => {
                let branch = if truthy(lookup(context, field)?) {
                    then
                } else {
                    otherwise
                };
                render_nodes(branch, context, out)?;
            }
        }
    }
    Ok(())
}

/// Produces the bytes of one artifact for an endpoint.
///
/// `None` means no artifact this pass; the synchronizer leaves any existing
/// file for that endpoint untouched.
pub trait Render {
    fn render(&self, endpoint: &DesiredEndpoint) -> Option<Vec<u8>>;
}

/// The two kinds of artifact the loop maintains.
#[derive(Debug, Clone, Copy)]
pub enum Artifact<'a> {
    Config(&'a Template),
    Credentials,
}

impl Render for Artifact<'_> {
    fn render(&self, endpoint: &DesiredEndpoint) -> Option<Vec<u8>> {
        match self {
            Artifact::Config(template) => match template.render(endpoint) {
                Ok(text) => Some(text.into_bytes()),
                Err(e) => {
                    warn!(
                        "Unable to render configuration template for container {}: {}",
                        endpoint.name, e
                    );
                    None
                }
            },
            Artifact::Credentials => {
                if endpoint.credential_entries.is_empty() {
                    None
                } else {
                    Some(endpoint.credential_entries.join("\n").into_bytes())
                }
            }
        }
    }
}
