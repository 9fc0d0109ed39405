//! Audio metadata records.
//!
//! A [`MetadataRecord`] describes one uploaded audio object and is keyed by
//! its `filename`, which is also the object's key in the bucket. The same five
//! fields travel as attached object metadata on presigned uploads, so a record
//! can be rebuilt from an object's attribute map.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Descriptive metadata for one audio file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Object key and unique record key
    #[serde(default, deserialize_with = "null_as_empty")]
    pub filename: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub author: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub label: String,
    /// Audio type, `type` on the wire
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub kind: String,
    /// Transcript / keyword payload
    #[serde(default, deserialize_with = "null_as_empty")]
    pub words: String,
}

/// The fields of a [`MetadataRecord`], in validation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataField {
    Filename,
    Author,
    Label,
    Type,
    Words,
}

impl MetadataField {
    /// Every field, in the fixed order violations are reported
    pub const ALL: [MetadataField; 5] = [
        MetadataField::Filename,
        MetadataField::Author,
        MetadataField::Label,
        MetadataField::Type,
        MetadataField::Words,
    ];

    /// Attribute name, shared by JSON bodies, object metadata and table columns
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataField::Filename => "filename",
            MetadataField::Author => "author",
            MetadataField::Label => "label",
            MetadataField::Type => "type",
            MetadataField::Words => "words",
        }
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MetadataRecord {
    pub fn new(
        filename: impl Into<String>,
        author: impl Into<String>,
        label: impl Into<String>,
        kind: impl Into<String>,
        words: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            author: author.into(),
            label: label.into(),
            kind: kind.into(),
            words: words.into(),
        }
    }

    /// Value of a single field
    pub fn field(&self, field: MetadataField) -> &str {
        match field {
            MetadataField::Filename => &self.filename,
            MetadataField::Author => &self.author,
            MetadataField::Label => &self.label,
            MetadataField::Type => &self.kind,
            MetadataField::Words => &self.words,
        }
    }

    /// Rebuild a candidate record from an object's attached metadata.
    ///
    /// Attribute names are matched case-insensitively since object stores
    /// normalize user metadata keys differently. Absent attributes become
    /// empty strings and are left for the validator to reject.
    pub fn from_attributes(attributes: &HashMap<String, String>) -> Self {
        let lookup = |field: MetadataField| {
            attributes
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(field.as_str()))
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };

        Self {
            filename: lookup(MetadataField::Filename),
            author: lookup(MetadataField::Author),
            label: lookup(MetadataField::Label),
            kind: lookup(MetadataField::Type),
            words: lookup(MetadataField::Words),
        }
    }

    /// The record as an attached-metadata map, the inverse of [`Self::from_attributes`]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        MetadataField::ALL
            .iter()
            .map(|field| (field.as_str().to_string(), self.field(*field).to_string()))
            .collect()
    }
}

/// JSON `null` decodes to an empty string so the validator reports it as missing
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_submission() {
        let json = r#"{
            "filename": "a.mp3",
            "author": "x",
            "label": "y",
            "type": "z",
            "words": "w"
        }"#;

        let record: MetadataRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record, MetadataRecord::new("a.mp3", "x", "y", "z", "w"));
    }

    #[test]
    fn test_missing_and_null_fields_become_empty() {
        let json = r#"{"filename": "a.mp3", "author": null}"#;

        let record: MetadataRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.filename, "a.mp3");
        assert!(record.author.is_empty());
        assert!(record.kind.is_empty());
        assert!(record.words.is_empty());
    }

    #[test]
    fn test_type_serialized_under_wire_name() {
        let record = MetadataRecord::new("a.mp3", "x", "y", "z", "w");
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["type"], "z");
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn test_from_attributes_ignores_key_case() {
        let mut attributes = HashMap::new();
        attributes.insert("Filename".to_string(), "a.mp3".to_string());
        attributes.insert("AUTHOR".to_string(), "x".to_string());
        attributes.insert("label".to_string(), "y".to_string());
        attributes.insert("words".to_string(), "w".to_string());

        let record = MetadataRecord::from_attributes(&attributes);
        assert_eq!(record, MetadataRecord::new("a.mp3", "x", "y", "", "w"));
    }

    #[test]
    fn test_attributes_round_trip() {
        let record = MetadataRecord::new("a.mp3", "x", "y", "z", "w");
        assert_eq!(MetadataRecord::from_attributes(&record.to_attributes()), record);
    }
}
