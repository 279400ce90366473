//! Header, row and document types
//!
//! A [`Document`] is the positional zip of the [`Header`] with one row. Values
//! are carried as opaque text; no coercion happens here.

use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;

/// Column names read once from the first line of the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header(Vec<String>);

impl Header {
    pub fn new(fields: Vec<String>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for Header {
    fn from(fields: Vec<String>) -> Self {
        Self(fields)
    }
}

/// One data row together with the physical line it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    /// 1-based physical line number in the input
    pub line: u64,
    pub fields: Vec<String>,
}

impl SourceRow {
    pub fn new(line: u64, fields: Vec<String>) -> Self {
        Self { line, fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("number of fields ({actual}) does not match header count ({expected})")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Field name to value mapping, kept in header order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    entries: Vec<(String, String)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`. A repeated name keeps its first position and
    /// takes the newer value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Pair header fields with row fields by position.
///
/// Rows whose length differs from the header are refused; nothing is
/// truncated or padded.
pub fn transform(header: &[String], row: &[String]) -> Result<Document, TransformError> {
    if header.len() != row.len() {
        return Err(TransformError::LengthMismatch {
            expected: header.len(),
            actual: row.len(),
        });
    }

    Ok(header.iter().zip(row).map(|(name, value)| (name.as_str(), value.as_str())).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_transform_zips_by_position() {
        let doc = transform(&strings(&["A", "B"]), &strings(&["x", "y"])).unwrap();
        assert_eq!(doc.to_json(), json!({"A": "x", "B": "y"}));
        assert_eq!(doc.get("B"), Some("y"));
    }

    #[test]
    fn test_transform_empty() {
        let doc = transform(&[], &[]).unwrap();
        assert!(doc.is_empty());
        assert_eq!(doc.to_json(), json!({}));
    }

    #[test]
    fn test_transform_rejects_short_and_long_rows() {
        let header = strings(&["ID", "Name", "Value"]);

        let short = transform(&header, &strings(&["1", "First"]));
        assert_eq!(short, Err(TransformError::LengthMismatch { expected: 3, actual: 2 }));

        let long = transform(&header, &strings(&["1", "First", "100", "extra"]));
        assert_eq!(long, Err(TransformError::LengthMismatch { expected: 3, actual: 4 }));
    }

    #[test]
    fn test_duplicate_header_keeps_position_and_last_value() {
        let doc = transform(&strings(&["a", "b", "a"]), &strings(&["1", "2", "3"])).unwrap();
        assert_eq!(doc.len(), 2);
        let pairs: Vec<_> = doc.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_serialize_preserves_header_order() {
        let doc = transform(&strings(&["zeta", "alpha"]), &strings(&["1", "2"])).unwrap();
        let rendered = serde_json::to_string(&doc).unwrap();
        assert_eq!(rendered, r#"{"zeta":"1","alpha":"2"}"#);
    }
}
