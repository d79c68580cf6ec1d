//! Parameterized statement builder.
//!
//! A [`SqlTemplate`] is static SQL text with `{name}` placeholders. Each
//! placeholder is bound to exactly one [`Bind`]:
//!
//! | Bind | Rendered as |
//! |---|---|
//! | `Ident` | `"quoted"` identifier |
//! | `Qualified` | `"schema"."name"` |
//! | `Value` | bound parameter (`$n`) |
//! | `Options` | `"key" $n, "key" $m, ...` |
//! | `Integer` | decimal digits (type modifiers such as `pcpatch(3)`) |
//!
//! Identifiers are escaped independently of the text around them and values
//! never become part of the text, so no input can alter statement structure.
//!
//! PostgreSQL cannot bind parameters in utility statements (`CREATE SERVER`,
//! `IMPORT FOREIGN SCHEMA`, ...). For those, [`Statement::to_inline_sql`]
//! renders each parameter through [`quote_literal`] at execution time.

use std::fmt;

use super::identifier::{quote_literal, quote_pg, QualifiedName};
use super::options::OptionMap;
use super::value::SqlValue;
use crate::error::{ProvisionError, Result};

/// How the engine must execute a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// DDL and other commands without parameter support; run with inlined
    /// literals over the simple query protocol.
    Utility,
    /// DML or SELECT; run with bound parameters.
    Query,
}

/// A value bound to one template placeholder.
#[derive(Debug, Clone)]
pub enum Bind {
    Ident(String),
    Qualified(QualifiedName),
    Value(SqlValue),
    Options(OptionMap),
    Integer(i64),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Param(usize),
}

/// A rendered statement: text segments plus parameters.
#[derive(Debug, Clone)]
pub struct Statement {
    label: &'static str,
    kind: StatementKind,
    segments: Vec<Segment>,
    params: Vec<SqlValue>,
    bindings: Vec<(&'static str, Bind)>,
}

impl Statement {
    /// Short operation label (`registry.insert`, `server.create`, ...).
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    /// The value bound to a placeholder. In a batch, the first statement
    /// binding the name wins.
    pub fn binding(&self, placeholder: &str) -> Option<&Bind> {
        self.bindings
            .iter()
            .find(|(name, _)| *name == placeholder)
            .map(|(_, bind)| bind)
    }

    /// Text with `$n` placeholders, to be executed with [`Statement::params`].
    pub fn to_sql(&self) -> String {
        let mut sql = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => sql.push_str(text),
                Segment::Param(idx) => {
                    sql.push('$');
                    sql.push_str(&(idx + 1).to_string());
                }
            }
        }
        sql
    }

    /// Text with every parameter rendered as an escaped literal.
    pub fn to_inline_sql(&self) -> Result<String> {
        let mut sql = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => sql.push_str(text),
                Segment::Param(idx) => sql.push_str(&inline_literal(&self.params[*idx])?),
            }
        }
        Ok(sql)
    }

    /// Join utility statements into one batch submitted at once.
    pub fn batch(label: &'static str, statements: Vec<Statement>) -> Result<Statement> {
        let mut segments = Vec::new();
        let mut params = Vec::new();
        let mut bindings = Vec::new();

        for (n, statement) in statements.into_iter().enumerate() {
            if statement.kind != StatementKind::Utility {
                return Err(ProvisionError::Template(format!(
                    "cannot batch parameterized statement '{}'",
                    statement.label
                )));
            }
            if n > 0 {
                segments.push(Segment::Text(";\n".to_string()));
            }
            let offset = params.len();
            segments.extend(statement.segments.into_iter().map(|segment| match segment {
                Segment::Param(idx) => Segment::Param(idx + offset),
                text => text,
            }));
            params.extend(statement.params);
            bindings.extend(statement.bindings);
        }

        Ok(Statement {
            label,
            kind: StatementKind::Utility,
            segments,
            params,
            bindings,
        })
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

fn inline_literal(value: &SqlValue) -> Result<String> {
    match value {
        SqlValue::Null => Ok("NULL".to_string()),
        SqlValue::Bool(true) => Ok("TRUE".to_string()),
        SqlValue::Bool(false) => Ok("FALSE".to_string()),
        SqlValue::Int(v) => Ok(v.to_string()),
        SqlValue::BigInt(v) => Ok(v.to_string()),
        SqlValue::Float(v) if v.is_finite() => Ok(format!("{:?}", v)),
        SqlValue::Float(v) => Err(ProvisionError::Template(format!(
            "cannot inline non-finite value {}",
            v
        ))),
        SqlValue::Text(v) => quote_literal(v),
    }
}

/// Statement template with named placeholders.
#[derive(Debug, Clone)]
pub struct SqlTemplate {
    label: &'static str,
    kind: StatementKind,
    text: &'static str,
    bindings: Vec<(&'static str, Bind)>,
}

impl SqlTemplate {
    /// Template for a utility (DDL) statement.
    pub fn utility(label: &'static str, text: &'static str) -> Self {
        Self::new(label, StatementKind::Utility, text)
    }

    /// Template for a statement executed with bound parameters.
    pub fn query(label: &'static str, text: &'static str) -> Self {
        Self::new(label, StatementKind::Query, text)
    }

    fn new(label: &'static str, kind: StatementKind, text: &'static str) -> Self {
        Self {
            label,
            kind,
            text,
            bindings: Vec::new(),
        }
    }

    pub fn bind(mut self, placeholder: &'static str, bind: Bind) -> Self {
        self.bindings.push((placeholder, bind));
        self
    }

    pub fn ident(self, placeholder: &'static str, name: impl Into<String>) -> Self {
        self.bind(placeholder, Bind::Ident(name.into()))
    }

    pub fn qualified(self, placeholder: &'static str, name: &QualifiedName) -> Self {
        self.bind(placeholder, Bind::Qualified(name.clone()))
    }

    pub fn value(self, placeholder: &'static str, value: impl Into<SqlValue>) -> Self {
        self.bind(placeholder, Bind::Value(value.into()))
    }

    pub fn options(self, placeholder: &'static str, options: &OptionMap) -> Self {
        self.bind(placeholder, Bind::Options(options.clone()))
    }

    pub fn integer(self, placeholder: &'static str, value: i64) -> Self {
        self.bind(placeholder, Bind::Integer(value))
    }

    /// Render the template.
    ///
    /// Fails on unterminated braces, unbound placeholders, bindings that no
    /// placeholder uses, duplicate bindings, invalid identifiers and empty
    /// option lists.
    pub fn build(self) -> Result<Statement> {
        let mut segments = Vec::new();
        let mut params = Vec::new();
        let mut used = vec![false; self.bindings.len()];
        let mut text = String::new();
        let mut chars = self.text.chars().peekable();

        for (i, (name, _)) in self.bindings.iter().enumerate() {
            if self.bindings[..i].iter().any(|(other, _)| other == name) {
                return Err(self.error(format!("placeholder {{{}}} bound twice", name)));
            }
        }

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    text.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    text.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => return Err(self.error("unterminated placeholder".into())),
                        }
                    }
                    let idx = self
                        .bindings
                        .iter()
                        .position(|(placeholder, _)| *placeholder == name)
                        .ok_or_else(|| self.error(format!("unbound placeholder {{{}}}", name)))?;
                    used[idx] = true;

                    match &self.bindings[idx].1 {
                        Bind::Ident(ident) => text.push_str(&quote_pg(ident)?),
                        Bind::Qualified(qualified) => text.push_str(&qualified.quoted()?),
                        Bind::Integer(value) => text.push_str(&value.to_string()),
                        Bind::Value(value) => {
                            flush(&mut segments, &mut text);
                            segments.push(Segment::Param(params.len()));
                            params.push(value.clone());
                        }
                        Bind::Options(options) => {
                            if options.is_empty() {
                                return Err(self.error(format!("empty option list {{{}}}", name)));
                            }
                            for (n, (key, value)) in options.iter().enumerate() {
                                if n > 0 {
                                    text.push_str(", ");
                                }
                                text.push_str(&quote_pg(key)?);
                                text.push(' ');
                                flush(&mut segments, &mut text);
                                segments.push(Segment::Param(params.len()));
                                params.push(SqlValue::Text(value.to_string()));
                            }
                        }
                    }
                }
                '}' => return Err(self.error("unmatched '}'".into())),
                c => text.push(c),
            }
        }
        flush(&mut segments, &mut text);

        if let Some(idx) = used.iter().position(|u| !u) {
            return Err(self.error(format!("unused binding {{{}}}", self.bindings[idx].0)));
        }

        Ok(Statement {
            label: self.label,
            kind: self.kind,
            segments,
            params,
            bindings: self.bindings,
        })
    }

    fn error(&self, message: String) -> ProvisionError {
        ProvisionError::Template(format!("{}: {}", self.label, message))
    }
}

fn flush(segments: &mut Vec<Segment>, text: &mut String) {
    if !text.is_empty() {
        segments.push(Segment::Text(std::mem::take(text)));
    }
}
