//! Field validation for metadata records.
//!
//! Pure functions over a candidate [`MetadataRecord`]; nothing here performs I/O.
//! Violations are reported one per failing field, always in
//! [`MetadataField::ALL`] order, so error bodies are stable across runs.

use crate::metadata::{MetadataField, MetadataRecord};
use serde::Serialize;

/// Fields checked on objects discovered through storage notifications.
///
/// `type` is not part of this set; see `IngestionConfig::enforce_type`.
pub const INGEST_REQUIRED_FIELDS: [MetadataField; 4] = [
    MetadataField::Filename,
    MetadataField::Author,
    MetadataField::Label,
    MetadataField::Words,
];

/// Ceiling S3 places on user metadata, counted over attribute names and values
pub const MAX_ATTACHED_METADATA_BYTES: usize = 2048;

/// Rule a field failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// Present and non-empty
    Required,
    /// Equal to the key of the object the metadata is attached to
    MatchesObjectKey,
    /// Printable ASCII only, so it can travel as an `x-amz-meta-*` header
    HeaderSafe,
    /// Attached metadata as a whole exceeds [`MAX_ATTACHED_METADATA_BYTES`];
    /// reported on the largest field
    AttachedMetadataTooLarge,
}

/// One field-level violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: MetadataField,
    pub rule: Rule,
    /// The rejected value as received
    pub value: String,
}

/// Validate a client-submitted record against the full rule set
pub fn validate(candidate: &MetadataRecord) -> Result<(), Vec<ValidationError>> {
    let violations = check_required(candidate, &MetadataField::ALL);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Check that each of `fields` is present and non-empty.
///
/// Violations follow the canonical field order regardless of the order of `fields`.
pub fn check_required(candidate: &MetadataRecord, fields: &[MetadataField]) -> Vec<ValidationError> {
    MetadataField::ALL
        .iter()
        .filter(|field| fields.contains(*field))
        .filter(|field| candidate.field(**field).is_empty())
        .map(|field| ValidationError {
            field: *field,
            rule: Rule::Required,
            value: candidate.field(*field).to_string(),
        })
        .collect()
}

/// Check that a record can be attached to an object as user metadata.
///
/// Runs after [`validate`] on the upload path only. Records registered through
/// the API are never sent as headers and are not subject to these limits.
pub fn validate_attachable(candidate: &MetadataRecord) -> Result<(), Vec<ValidationError>> {
    let mut violations: Vec<ValidationError> = MetadataField::ALL
        .iter()
        .filter(|field| !is_header_safe(candidate.field(**field)))
        .map(|field| ValidationError {
            field: *field,
            rule: Rule::HeaderSafe,
            value: candidate.field(*field).to_string(),
        })
        .collect();

    let total: usize = MetadataField::ALL
        .iter()
        .map(|field| field.as_str().len() + candidate.field(*field).len())
        .sum();

    if total > MAX_ATTACHED_METADATA_BYTES {
        let largest = MetadataField::ALL
            .iter()
            .copied()
            .max_by_key(|field| candidate.field(*field).len())
            .unwrap_or(MetadataField::Words);
        violations.push(ValidationError {
            field: largest,
            rule: Rule::AttachedMetadataTooLarge,
            value: candidate.field(largest).to_string(),
        });
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn is_header_safe(value: &str) -> bool {
    value.bytes().all(|b| (0x20..=0x7e).contains(&b))
}
