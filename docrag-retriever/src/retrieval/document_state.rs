use serde::{Deserialize, Serialize};

/// Indexing state of a document record.
///
/// A document moves `pending → indexing → indexed | failed`. Deletion of the
/// file drops the record (and its chunks) rather than storing a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    /// Known but not (or no longer) reflected by its stored chunks
    #[default]
    Pending,
    /// A worker is extracting, chunking and embedding it
    Indexing,
    /// Stored chunks match the recorded content hash
    Indexed,
    /// The last attempt failed; chunks of the previous revision are kept
    Failed,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Pending => "pending",
            DocumentState::Indexing => "indexing",
            DocumentState::Indexed => "indexed",
            DocumentState::Failed => "failed",
        }
    }

    /// Whether the stored chunks can be trusted to match the file on disk.
    pub fn is_current(&self) -> bool {
        matches!(self, DocumentState::Indexed)
    }
}

impl std::fmt::Display for DocumentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(DocumentState::Pending),
            "indexing" => Ok(DocumentState::Indexing),
            "indexed" => Ok(DocumentState::Indexed),
            "failed" => Ok(DocumentState::Failed),
            _ => Err(format!(
                "Invalid document state: '{s}'. Valid values are: pending, indexing, indexed, failed"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        assert_eq!(
            "indexed".parse::<DocumentState>().unwrap(),
            DocumentState::Indexed
        );
        assert_eq!(
            "FAILED".parse::<DocumentState>().unwrap(),
            DocumentState::Failed
        );
        assert!("removed".parse::<DocumentState>().is_err());
    }

    #[test]
    fn test_display_matches_stored_value() {
        for state in [
            DocumentState::Pending,
            DocumentState::Indexing,
            DocumentState::Indexed,
            DocumentState::Failed,
        ] {
            assert_eq!(state.to_string().parse::<DocumentState>().unwrap(), state);
        }
        assert!(DocumentState::Indexed.is_current());
        assert!(!DocumentState::Failed.is_current());
    }
}
