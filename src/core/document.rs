//! Document records as exchanged with the backend

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder shown for documents without content
pub const NO_CONTENT: &str = "No content";

/// Number of content lines shown in a list preview
const PREVIEW_LINES: usize = 3;

/// A stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Identity of the single user allowed to see and change this document
    pub owner_id: Uuid,
}

impl Document {
    /// Short plain-text preview for list cards
    pub fn preview(&self) -> String {
        if self.content.is_empty() {
            return NO_CONTENT.to_string();
        }

        self.content
            .lines()
            .take(PREVIEW_LINES)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Last update date in the local timezone
    pub fn updated_date(&self) -> String {
        self.updated_at
            .with_timezone(&Local)
            .format("%x")
            .to_string()
    }
}

/// User-editable fields of a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDraft {
    pub title: String,
    pub content: String,
}

impl DocumentDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Row inserted for a new document; the backend assigns id and timestamps
#[derive(Debug, Clone, Serialize)]
pub struct NewDocument {
    pub title: String,
    pub content: String,
    pub owner_id: Uuid,
}

impl NewDocument {
    pub fn from_draft(draft: &DocumentDraft, owner_id: Uuid) -> Self {
        Self {
            title: draft.title.clone(),
            content: draft.content.clone(),
            owner_id,
        }
    }
}

/// Columns written when a document is saved
#[derive(Debug, Clone, Serialize)]
pub struct DocumentPatch {
    pub title: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

impl DocumentPatch {
    /// Patch stamped with the current time
    pub fn from_draft(draft: &DocumentDraft) -> Self {
        Self {
            title: draft.title.clone(),
            content: draft.content.clone(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(content: &str) -> Document {
        let now = Utc::now();
        Document {
            id: Uuid::new_v4(),
            title: "Notes".to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
            owner_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_preview_of_empty_content() {
        assert_eq!(document("").preview(), NO_CONTENT);
        // Whitespace is still content
        assert_eq!(document("  \n ").preview(), "  \n ");
    }

    #[test]
    fn test_preview_keeps_first_lines() {
        let doc = document("one\ntwo\nthree\nfour");
        assert_eq!(doc.preview(), "one\ntwo\nthree");
        assert_eq!(document("draft").preview(), "draft");
    }

    #[test]
    fn test_record_shape() {
        let json = r#"{
            "id": "6f1c1a52-2f65-4a5b-9d68-0f4a5e6f9a10",
            "title": "Notes",
            "content": "",
            "created_at": "2024-03-01T10:00:00.123456+00:00",
            "updated_at": "2024-03-02T10:00:00+00:00",
            "owner_id": "0b7a4d4e-7f0e-4a53-8d3c-5d5b3c2a1f00"
        }"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert_eq!(doc.title, "Notes");
        assert!(doc.updated_at > doc.created_at);

        let value = serde_json::to_value(&doc).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            ["content", "created_at", "id", "owner_id", "title", "updated_at"]
        );
    }
}
