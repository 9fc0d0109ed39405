use crate::validation::ValidationError;
use thiserror::Error;

/// Outcome of a registration attempt that did not succeed.
///
/// The first three variants are expected business results the client can act
/// on; only [`RegistryError::Dependency`] is an infrastructure fault.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Metadata validation failed on {} field(s)", .0.len())]
    ValidationFailed(Vec<ValidationError>),

    #[error("Filename not found: upload {filename} before registering its metadata")]
    ReferencedObjectMissing { filename: String },

    #[error("Metadata for {filename} is already registered")]
    DuplicateRecord { filename: String },

    #[error("Dependency error: {0:#}")]
    Dependency(#[from] anyhow::Error),
}

impl RegistryError {
    /// Stable machine-readable code, one per kind
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::ValidationFailed(_) => "VALIDATION_FAILED",
            RegistryError::ReferencedObjectMissing { .. } => "OBJECT_NOT_FOUND",
            RegistryError::DuplicateRecord { .. } => "CONFLICT",
            RegistryError::Dependency(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller can fix this by changing the request
    pub fn is_client_error(&self) -> bool {
        !matches!(self, RegistryError::Dependency(_))
    }

    /// Label used on rejection metrics
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            RegistryError::ValidationFailed(_) => "validation",
            RegistryError::ReferencedObjectMissing { .. } => "object_missing",
            RegistryError::DuplicateRecord { .. } => "duplicate",
            RegistryError::Dependency(_) => "dependency",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataField;
    use crate::validation::Rule;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            RegistryError::ValidationFailed(vec![]),
            RegistryError::ReferencedObjectMissing {
                filename: "a.mp3".to_string(),
            },
            RegistryError::DuplicateRecord {
                filename: "a.mp3".to_string(),
            },
            RegistryError::Dependency(anyhow::anyhow!("boom")),
        ];

        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 4);
    }

    #[test]
    fn test_only_dependency_is_a_fault() {
        assert!(RegistryError::DuplicateRecord {
            filename: "a.mp3".to_string()
        }
        .is_client_error());
        assert!(!RegistryError::Dependency(anyhow::anyhow!("boom")).is_client_error());
    }

    #[test]
    fn test_validation_message_counts_fields() {
        let err = RegistryError::ValidationFailed(vec![ValidationError {
            field: MetadataField::Author,
            rule: Rule::Required,
            value: String::new(),
        }]);

        assert_eq!(err.to_string(), "Metadata validation failed on 1 field(s)");
    }
}
