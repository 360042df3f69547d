use std::path::PathBuf;

use crate::step::{Arity, StepKind};

/// Why a record group did not become a command record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("unsupported step keyword: {0}")]
    UnsupportedKeyword(String),

    #[error("{kind} header has {found} tokens, expected {expected}")]
    Arity {
        kind: StepKind,
        expected: Arity,
        found: usize,
    },

    #[error("{0} header carries no target name")]
    MissingTarget(StepKind),

    #[error("{0} record has no body lines")]
    EmptyBody(StepKind),
}

impl ClassifyError {
    /// Malformed steps are worth a warning; unsupported keywords are expected noise.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, ClassifyError::UnsupportedKeyword(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("compilation database I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse compilation database {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize compilation database: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to promote compilation database into {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_error_display() {
        let err = ClassifyError::Arity {
            kind: StepKind::CompileC,
            expected: Arity::Exact(10),
            found: 9,
        };
        assert_eq!(err.to_string(), "CompileC header has 9 tokens, expected 10");
        assert!(err.is_malformed());
    }

    #[test]
    fn test_unsupported_is_not_malformed() {
        let err = ClassifyError::UnsupportedKeyword("PhaseScriptExecution".to_string());
        assert!(!err.is_malformed());
        assert!(err.to_string().contains("PhaseScriptExecution"));
    }

    #[test]
    fn test_io_error_display() {
        let err = DatabaseError::Io {
            path: PathBuf::from("/tmp/.FastCompile/archivedCommands.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("archivedCommands.json"));
        assert!(msg.contains("file not found"));
    }
}
