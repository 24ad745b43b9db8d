// src/analyze/record.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::types::{Engagement, SourceKind};

/// Fields extracted from the raw item, independent of the model call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemDetails {
    News {
        title: String,
        summary: String,
        keywords: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        published_at: Option<DateTime<Utc>>,
    },
    Social {
        #[serde(skip_serializing_if = "Option::is_none")]
        author: Option<String>,
        engagement: Engagement,
        #[serde(skip_serializing_if = "Option::is_none")]
        created_at: Option<DateTime<Utc>>,
    },
}

/// Exactly one per raw item. A failed record carries `error`, its identity and, when the
/// raw item had one, its publication time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemAnalysis {
    /// URL for news, post id for social.
    pub source_id: String,
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ItemDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Publication time of a failed item; successful records keep it in `details`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_time: Option<DateTime<Utc>>,
}

impl ItemAnalysis {
    pub fn success(
        source_id: impl Into<String>,
        kind: SourceKind,
        details: ItemDetails,
        analysis: String,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            details: Some(details),
            analysis: Some(analysis),
            error: None,
            item_time: None,
        }
    }

    pub fn failure(source_id: impl Into<String>, kind: SourceKind, error: impl ToString) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            details: None,
            analysis: None,
            error: Some(error.to_string()),
            item_time: None,
        }
    }

    pub fn with_item_time(mut self, at: Option<DateTime<Utc>>) -> Self {
        if self.details.is_none() {
            self.item_time = at;
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Publication time for news, creation time for posts.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match &self.details {
            Some(ItemDetails::News { published_at, .. }) => *published_at,
            Some(ItemDetails::Social { created_at, .. }) => *created_at,
            None => self.item_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_record_serializes_identity_and_error_only() {
        let rec = ItemAnalysis::failure("https://n.test/1", SourceKind::News, "timeout");
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"source_id": "https://n.test/1", "kind": "news", "error": "timeout"})
        );
        assert!(rec.is_error());
        assert!(rec.timestamp().is_none());
    }

    #[test]
    fn failed_record_keeps_item_time() {
        let ts = Utc::now();
        let rec = ItemAnalysis::failure("p1", SourceKind::Social, "quota").with_item_time(Some(ts));
        assert_eq!(rec.timestamp(), Some(ts));
        let v = serde_json::to_value(&rec).unwrap();
        assert!(v.get("item_time").is_some());
        assert!(v.get("details").is_none());
    }

    #[test]
    fn success_record_exposes_timestamp() {
        let ts = Utc::now();
        let rec = ItemAnalysis::success(
            "42",
            SourceKind::Social,
            ItemDetails::Social {
                author: Some("ann".into()),
                engagement: Engagement::default(),
                created_at: Some(ts),
            },
            "positive".into(),
        );
        assert_eq!(rec.timestamp(), Some(ts));
        let back: ItemAnalysis = serde_json::from_str(&serde_json::to_string(&rec).unwrap()).unwrap();
        assert_eq!(back, rec);
    }
}
