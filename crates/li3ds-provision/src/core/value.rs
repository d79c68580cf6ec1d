//! SQL values exchanged with the engine: bound parameters and result cells.

use std::fmt;

use tokio_postgres::types::ToSql;

/// A scalar bound to a statement parameter or read back from a row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    /// 32-bit integer (`int4`): pcid and srid columns.
    Int(i32),
    BigInt(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    /// Borrow as a tokio-postgres parameter.
    pub fn as_to_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlValue::Null => &None::<&str>,
            SqlValue::Bool(v) => v,
            SqlValue::Int(v) => v,
            SqlValue::BigInt(v) => v,
            SqlValue::Float(v) => v,
            SqlValue::Text(v) => v,
        }
    }

    /// Textual form used when a value must be inlined as a literal.
    ///
    /// Returns `None` for SQL NULL.
    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(v) => Some(v.to_string()),
            SqlValue::Int(v) => Some(v.to_string()),
            SqlValue::BigInt(v) => Some(v.to_string()),
            SqlValue::Float(v) => Some(v.to_string()),
            SqlValue::Text(v) => Some(v.clone()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(i64::from(*v)),
            SqlValue::BigInt(v) => Some(*v),
            SqlValue::Text(v) => v.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::BigInt(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

/// One result row: column names paired with values, in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new(columns: Vec<(String, SqlValue)>) -> Self {
        Self { columns }
    }

    /// Value of the named column.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    /// Value at a zero-based position.
    pub fn get_idx(&self, idx: usize) -> Option<&SqlValue> {
        self.columns.get(idx).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_text() {
        assert_eq!(SqlValue::Int(4326).as_text().as_deref(), Some("4326"));
        assert_eq!(SqlValue::Bool(true).as_text().as_deref(), Some("true"));
        assert_eq!(SqlValue::Float(2.5).as_text().as_deref(), Some("2.5"));
        assert_eq!(SqlValue::Null.as_text(), None);
        assert_eq!(SqlValue::Null.to_string(), "NULL");
    }

    #[test]
    fn test_row_lookup() {
        let row = Row::new(vec![
            ("pcid".to_string(), SqlValue::Int(3)),
            ("schema".to_string(), SqlValue::from("<xml/>")),
        ]);
        assert_eq!(row.get("pcid").and_then(SqlValue::as_i64), Some(3));
        assert_eq!(row.get_idx(1).and_then(SqlValue::as_str), Some("<xml/>"));
        assert!(row.get("missing").is_none());
        assert_eq!(row.len(), 2);
    }
}
