//! Normalized views of the two sides of the bridge.
//!
//! Webhook payloads are decoded at the admission boundary (see `decode`);
//! everything downstream of admission works on these types only.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical;

/// The two sides of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Src,
    Tgt,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Src => "src",
            Self::Tgt => "tgt",
        }
    }

    pub fn other(&self) -> Self {
        match self {
            Self::Src => Self::Tgt,
            Self::Tgt => Self::Src,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "src" => Some(Self::Src),
            "tgt" => Some(Self::Tgt),
            _ => None,
        }
    }
}

/// One webhook delivery, immutable once admitted.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub provider: Provider,
    pub event_kind: String,
    pub delivery_id: Option<String>,
    pub raw_payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
    pub content_hash: String,
}

impl InboundEvent {
    /// Build an event from raw body bytes, canonicalizing for the content
    /// hash. Fails only on malformed JSON.
    pub fn from_payload(
        provider: Provider,
        event_kind: impl Into<String>,
        delivery_id: Option<String>,
        raw_payload: Vec<u8>,
        received_at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let event_kind = event_kind.into();
        let canonical_body = canonical::canonicalize_bytes(&raw_payload)?;
        let content_hash = canonical::content_hash(provider.as_str(), &event_kind, &canonical_body);
        Ok(Self {
            provider,
            event_kind,
            delivery_id,
            raw_payload,
            received_at,
            content_hash,
        })
    }

    pub fn fingerprint(&self) -> String {
        canonical::fingerprint(&self.content_hash, self.delivery_id.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// Normalized source issue. Collections are ordered so the record hash is
/// stable for equal content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub src_repo: String,
    pub src_number: i64,
    pub title: String,
    pub body: String,
    pub state: IssueState,
    pub labels: BTreeSet<String>,
    pub assignees: BTreeSet<String>,
    pub author: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub url: String,
}

impl IssueRecord {
    /// Hash over the synchronized content of the issue. Server timestamps
    /// and the permalink are excluded so that an echo of our own write
    /// hashes identically to the content we wrote.
    pub fn content_hash(&self) -> String {
        canonical::record_hash_excluding(self, &["created_at", "updated_at", "url"])
    }
}

/// Typed target property value. The serde tag matches the wire `type`
/// discriminator of the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyValue {
    Title { text: String },
    RichText { text: String },
    Select { option: String },
    MultiSelect { options: BTreeSet<String> },
    Status { option: String },
    Number { value: Option<f64> },
    Checkbox { checked: bool },
    Date { start: DateTime<Utc> },
    People { names: BTreeSet<String> },
    Url { url: String },
}

/// Normalized target page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub page_id: String,
    pub database_id: String,
    pub properties: BTreeMap<String, PropertyValue>,
    pub last_edited_at: Option<DateTime<Utc>>,
    pub url: String,
}

impl PageRecord {
    /// Hash over the synchronized content of the page; see
    /// [`IssueRecord::content_hash`] for the exclusion rationale.
    pub fn content_hash(&self) -> String {
        canonical::record_hash_excluding(self, &["last_edited_at", "url"])
    }
}

/// Partial update applied to a source issue. Absent fields are left
/// untouched on the provider side.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IssueUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<IssueState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignees: Option<BTreeSet<String>>,
}

impl IssueUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.body.is_none()
            && self.state.is_none()
            && self.labels.is_none()
            && self.assignees.is_none()
    }
}

/// A comment on either side, normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub remote_id: String,
    pub author: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::record_hash;

    fn issue() -> IssueRecord {
        IssueRecord {
            src_repo: "o/r".into(),
            src_number: 42,
            title: "Bug".into(),
            body: "x".into(),
            state: IssueState::Open,
            labels: ["bug".to_string()].into_iter().collect(),
            assignees: BTreeSet::new(),
            author: "alice".into(),
            created_at: None,
            updated_at: None,
            url: "https://src.example/o/r/issues/42".into(),
        }
    }

    #[test]
    fn equal_records_hash_equal() {
        assert_eq!(record_hash(&issue()), record_hash(&issue()));
    }

    #[test]
    fn label_insertion_order_does_not_change_hash() {
        let mut a = issue();
        a.labels = ["b".to_string(), "a".to_string()].into_iter().collect();
        let mut b = issue();
        b.labels = ["a".to_string(), "b".to_string()].into_iter().collect();
        assert_eq!(record_hash(&a), record_hash(&b));
    }

    #[test]
    fn content_change_changes_hash() {
        let a = issue();
        let mut b = issue();
        b.state = IssueState::Closed;
        assert_ne!(record_hash(&a), record_hash(&b));
    }

    #[test]
    fn content_hash_ignores_server_timestamps() {
        let a = issue();
        let mut b = issue();
        b.updated_at = Some(Utc::now());
        b.created_at = Some(Utc::now());
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(record_hash(&a), record_hash(&b));

        let mut c = issue();
        c.title = "Other".into();
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn fingerprint_stable_across_redelivery() {
        let body = br#"{"action":"opened","issue":{"number":1}}"#.to_vec();
        let e1 = InboundEvent::from_payload(
            Provider::Src,
            "issue.opened",
            Some("d-1".into()),
            body.clone(),
            Utc::now(),
        )
        .unwrap();
        let e2 = InboundEvent::from_payload(
            Provider::Src,
            "issue.opened",
            Some("d-1".into()),
            body,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(e1.fingerprint(), e2.fingerprint());
    }

    #[test]
    fn empty_update_is_empty() {
        assert!(IssueUpdate::default().is_empty());
        let update = IssueUpdate {
            state: Some(IssueState::Closed),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
