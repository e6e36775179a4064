//! Runner documents
//!
//! A document is either a plain `.clp` construct file or a JSON file of the
//! form `{ "comment": "...", "body": "..." }` whose body holds the constructs.

use std::path::Path;

use clipsrules::Session;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RunnerError};

/// A named block of construct source
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunnerDocument {
    #[serde(default)]
    pub comment: String,
    pub body: String,
}

impl RunnerDocument {
    /// Read a document, choosing the format by file extension.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| RunnerError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            serde_json::from_str(&text).map_err(|source| RunnerError::Document {
                path: path.to_path_buf(),
                source,
            })
        } else {
            Ok(Self {
                comment: String::new(),
                body: text,
            })
        }
    }

    /// Build every construct in the body.
    pub fn load_into(&self, session: &mut Session) -> Result<()> {
        tracing::debug!(comment = %self.comment, bytes = self.body.len(), "Loading runner document");
        session.load_from_str(&self.body)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_read_json_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, r#"{"comment": "points", "body": "(deftemplate point (slot x))"}"#)
            .unwrap();

        let doc = RunnerDocument::read(&path).unwrap();
        assert_eq!(doc.comment, "points");
        assert_eq!(doc.body, "(deftemplate point (slot x))");
    }

    #[test]
    fn test_comment_is_optional() {
        let doc: RunnerDocument = serde_json::from_str(r#"{"body": ""}"#).unwrap();
        assert_eq!(doc, RunnerDocument::default());
    }

    #[test]
    fn test_read_clp_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.clp");
        std::fs::write(&path, "(deffacts start (ready))").unwrap();

        let doc = RunnerDocument::read(&path).unwrap();
        assert_eq!(doc.comment, "");
        assert_eq!(doc.body, "(deffacts start (ready))");
    }

    #[test]
    fn test_malformed_json_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{\"comment\": 1}").unwrap();

        let err = RunnerDocument::read(&path).unwrap_err();
        assert!(matches!(err, RunnerError::Document { .. }));
    }

    #[test]
    fn test_load_into_session() {
        let doc = RunnerDocument {
            comment: String::new(),
            body: "(deffacts start (ready))".to_string(),
        };
        let mut session = Session::new();
        doc.load_into(&mut session).unwrap();
        session.reset();
        assert_eq!(session.facts().count(), 1);
    }
}
