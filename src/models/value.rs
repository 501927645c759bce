//! Bindable values and ordered parameter maps.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::{DbError, DbResult};

/// A decoded result row, keyed by column name in select order.
pub type Row = serde_json::Map<String, JsonValue>;

/// Ordered column → value pairs used by `insert`/`update`.
pub type Values = Vec<(String, SqlValue)>;

/// A value that can be bound to a statement placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// NULL value
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    /// Bound as JSON on MySQL/PostgreSQL, as text on SQLite
    Json(JsonValue),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
            Self::Date(_) => "date",
            Self::DateTime(_) => "datetime",
        }
    }

    /// SQL literal form, for diagnostics only. Never executed.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(b) => u8::from(*b).to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => quote(s),
            Self::Bytes(b) => format!("<{} bytes>", b.len()),
            Self::Json(v) => quote(&v.to_string()),
            Self::Date(d) => quote(&d.format("%Y-%m-%d").to_string()),
            Self::DateTime(dt) => quote(&dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql_literal())
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for SqlValue {
            fn from(v: $ty) -> Self {
                Self::Int(v as i64)
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        Self::String(v.clone())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Scalars map onto their natural variant; arrays and objects bind as JSON.
impl From<JsonValue> for SqlValue {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => Self::String(s),
            other => Self::Json(other),
        }
    }
}

/// Named statement parameters in insertion order.
///
/// Names are unique within one statement; [`Params::insert`] rejects duplicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Params {
    entries: Vec<(String, SqlValue)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> DbResult<()> {
        let name = name.into();
        if self.contains(&name) {
            return Err(DbError::invalid_input(format!(
                "Parameter ':{name}' is bound twice in one statement"
            )));
        }
        self.entries.push((name, value.into()));
        Ok(())
    }

    /// Builder-style insert for literal parameter lists.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> DbResult<Self> {
        self.insert(name, value)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Merge another map, failing on the first colliding name.
    pub fn extend(&mut self, other: Params) -> DbResult<()> {
        for (name, value) in other.entries {
            self.insert(name, value)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Build an ordered [`Values`] list: `values! { "name" => "Ada", "age" => 36 }`.
#[macro_export]
macro_rules! values {
    () => { $crate::models::Values::new() };
    ($($col:expr => $val:expr),+ $(,)?) => {
        vec![$(($col.to_string(), $crate::models::SqlValue::from($val))),+]
    };
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_reject_duplicates() {
        let mut params = Params::new();
        params.insert("where_name_0", "a").unwrap();
        let err = params.insert("where_name_0", "b").unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_params_preserve_order() {
        let params = Params::new()
            .with("b", 1)
            .unwrap()
            .with("a", 2)
            .unwrap();
        let names: Vec<_> = params.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_sql_literal_escapes_quotes() {
        assert_eq!(SqlValue::from("O'Brien").to_sql_literal(), "'O''Brien'");
        assert_eq!(SqlValue::Null.to_sql_literal(), "NULL");
        assert_eq!(SqlValue::from(true).to_sql_literal(), "1");
    }

    #[test]
    fn test_from_json() {
        assert_eq!(SqlValue::from(serde_json::json!(3)), SqlValue::Int(3));
        assert_eq!(SqlValue::from(serde_json::json!(1.5)), SqlValue::Float(1.5));
        assert!(matches!(
            SqlValue::from(serde_json::json!({"a": 1})),
            SqlValue::Json(_)
        ));
    }

    #[test]
    fn test_values_macro() {
        let row = values! { "name" => "Ada", "age" => 36, "bio" => None::<String> };
        assert_eq!(row[0], ("name".to_string(), SqlValue::from("Ada")));
        assert_eq!(row[1].1, SqlValue::Int(36));
        assert!(row[2].1.is_null());
    }

    #[test]
    fn test_serialize_params_for_cache_key() {
        let params = Params::new().with("id", 7).unwrap().with("blob", vec![1u8, 2]).unwrap();
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("\"id\""));
        assert!(json.contains("AQI="));
    }
}
