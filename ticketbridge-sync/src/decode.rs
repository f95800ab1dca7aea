//! Webhook payload decoding.
//!
//! Payloads are duck-typed JSON on the wire; this module is the only place
//! that touches their raw shape. Everything downstream sees normalized
//! [`IssueRecord`] / [`PageRecord`] values.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::records::{CommentRecord, IssueRecord, IssueState, PageRecord, PropertyValue};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(&'static str),
}

// --- Source (issue tracker) ---

#[derive(Debug, Deserialize)]
struct RawSrcPayload {
    action: String,
    issue: RawIssue,
    repository: RawRepository,
    #[serde(default)]
    comment: Option<RawComment>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    labels: Vec<RawLabel>,
    #[serde(default)]
    assignees: Vec<RawUser>,
    #[serde(default)]
    user: Option<RawUser>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    name: String,
    owner: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: serde_json::Value,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<RawUser>,
}

/// A decoded source-side event: the action verb plus the normalized issue,
/// and the comment when the delivery is a comment event.
#[derive(Debug, Clone)]
pub struct SrcEvent {
    pub action: String,
    pub issue: IssueRecord,
    pub comment: Option<CommentRecord>,
}

impl SrcEvent {
    pub fn kind(&self) -> String {
        if self.comment.is_some() {
            format!("comment.{}", self.action)
        } else {
            format!("issue.{}", self.action)
        }
    }
}

pub fn decode_src_event(body: &[u8]) -> Result<SrcEvent, DecodeError> {
    let raw: RawSrcPayload = serde_json::from_slice(body)?;
    let repo = format!("{}/{}", raw.repository.owner.login, raw.repository.name);
    let issue = issue_from_raw(&repo, raw.issue);
    let comment = raw.comment.map(comment_from_raw);
    Ok(SrcEvent {
        action: raw.action,
        issue,
        comment,
    })
}

/// Decode an issue object as returned by the source API (`get_issue`). The
/// repository is not embedded in API responses, so the caller supplies it.
pub fn decode_api_issue(repo: &str, body: &[u8]) -> Result<IssueRecord, DecodeError> {
    let raw: RawIssue = serde_json::from_slice(body)?;
    Ok(issue_from_raw(repo, raw))
}

pub fn decode_api_comments(body: &[u8]) -> Result<Vec<CommentRecord>, DecodeError> {
    let raw: Vec<RawComment> = serde_json::from_slice(body)?;
    Ok(raw.into_iter().map(comment_from_raw).collect())
}

pub fn decode_api_comment(body: &[u8]) -> Result<CommentRecord, DecodeError> {
    let raw: RawComment = serde_json::from_slice(body)?;
    Ok(comment_from_raw(raw))
}

fn issue_from_raw(repo: &str, raw: RawIssue) -> IssueRecord {
    IssueRecord {
        src_repo: repo.to_string(),
        src_number: raw.number,
        title: raw.title.unwrap_or_default(),
        body: raw.body.unwrap_or_default(),
        state: match raw.state.as_deref() {
            Some("closed") => IssueState::Closed,
            _ => IssueState::Open,
        },
        labels: raw.labels.into_iter().map(|l| l.name).collect(),
        assignees: raw.assignees.into_iter().map(|u| u.login).collect(),
        author: raw.user.map(|u| u.login).unwrap_or_default(),
        created_at: raw.created_at,
        updated_at: raw.updated_at,
        url: raw.html_url.unwrap_or_default(),
    }
}

fn comment_from_raw(raw: RawComment) -> CommentRecord {
    // Comment ids arrive as numbers from the issue tracker and as opaque
    // strings from the document store; both normalize to strings.
    let remote_id = match &raw.id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    CommentRecord {
        remote_id,
        author: raw.user.map(|u| u.login).unwrap_or_default(),
        body: raw.body.unwrap_or_default(),
    }
}

// --- Target (document store) ---

#[derive(Debug, Deserialize)]
struct RawTgtPayload {
    page: serde_json::Value,
    #[serde(default)]
    comment: Option<RawTgtComment>,
}

#[derive(Debug, Deserialize)]
struct RawTgtComment {
    id: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TgtEvent {
    pub page: PageRecord,
    pub comment: Option<CommentRecord>,
}

pub fn decode_tgt_event(body: &[u8]) -> Result<TgtEvent, DecodeError> {
    let raw: RawTgtPayload = serde_json::from_slice(body)?;
    let page = decode_page_object(&raw.page)?;
    let comment = raw.comment.map(|c| CommentRecord {
        remote_id: c.id,
        author: c.author.unwrap_or_default(),
        body: c.text.unwrap_or_default(),
    });
    Ok(TgtEvent { page, comment })
}

/// Decode a page object, either from a webhook payload or an API response.
pub fn decode_page_object(value: &serde_json::Value) -> Result<PageRecord, DecodeError> {
    let page_id = value
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or(DecodeError::MissingField("page.id"))?
        .to_string();
    let database_id = value
        .get("parent")
        .and_then(|p| p.get("database_id"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let last_edited_at = value
        .get("last_edited_time")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    let url = value
        .get("url")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let mut properties = BTreeMap::new();
    if let Some(obj) = value.get("properties").and_then(|p| p.as_object()) {
        for (name, prop) in obj {
            if let Some(decoded) = decode_property(prop) {
                properties.insert(name.clone(), decoded);
            }
        }
    }

    Ok(PageRecord {
        page_id,
        database_id,
        properties,
        last_edited_at,
        url,
    })
}

/// Decode one wire property value into the typed union. Values of unknown
/// type, and empty selects/dates, decode to `None` and are treated as absent.
fn decode_property(prop: &serde_json::Value) -> Option<PropertyValue> {
    let prop_type = prop.get("type").and_then(|t| t.as_str())?;
    match prop_type {
        "title" => Some(PropertyValue::Title {
            text: join_rich_text(prop.get("title")?),
        }),
        "rich_text" => Some(PropertyValue::RichText {
            text: join_rich_text(prop.get("rich_text")?),
        }),
        "select" => {
            let name = prop.get("select")?.get("name")?.as_str()?;
            Some(PropertyValue::Select {
                option: name.to_string(),
            })
        }
        "status" => {
            let name = prop.get("status")?.get("name")?.as_str()?;
            Some(PropertyValue::Status {
                option: name.to_string(),
            })
        }
        "multi_select" => {
            let options: BTreeSet<String> = prop
                .get("multi_select")?
                .as_array()?
                .iter()
                .filter_map(|o| o.get("name").and_then(|n| n.as_str()))
                .map(str::to_string)
                .collect();
            Some(PropertyValue::MultiSelect { options })
        }
        "number" => Some(PropertyValue::Number {
            value: prop.get("number").and_then(|n| n.as_f64()),
        }),
        "checkbox" => Some(PropertyValue::Checkbox {
            checked: prop.get("checkbox").and_then(|c| c.as_bool()).unwrap_or(false),
        }),
        "date" => {
            let start = prop
                .get("date")?
                .get("start")?
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))?;
            Some(PropertyValue::Date { start })
        }
        "people" => {
            let names: BTreeSet<String> = prop
                .get("people")?
                .as_array()?
                .iter()
                .filter_map(|p| {
                    p.get("name")
                        .or_else(|| p.get("id"))
                        .and_then(|n| n.as_str())
                })
                .map(str::to_string)
                .collect();
            Some(PropertyValue::People { names })
        }
        "url" => {
            let url = prop.get("url")?.as_str()?;
            Some(PropertyValue::Url {
                url: url.to_string(),
            })
        }
        _ => None,
    }
}

fn join_rich_text(value: &serde_json::Value) -> String {
    value
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("plain_text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC_OPENED: &[u8] = br#"{
        "action": "opened",
        "issue": {
            "number": 42,
            "title": "Bug",
            "body": "x",
            "state": "open",
            "labels": [{"name": "bug"}],
            "assignees": [{"login": "bob"}],
            "user": {"login": "alice"},
            "html_url": "https://src.example/o/r/issues/42"
        },
        "repository": {"name": "r", "owner": {"login": "o"}}
    }"#;

    #[test]
    fn decodes_issue_opened() {
        let event = decode_src_event(SRC_OPENED).unwrap();
        assert_eq!(event.action, "opened");
        assert_eq!(event.kind(), "issue.opened");
        assert_eq!(event.issue.src_repo, "o/r");
        assert_eq!(event.issue.src_number, 42);
        assert_eq!(event.issue.title, "Bug");
        assert_eq!(event.issue.state, IssueState::Open);
        assert!(event.issue.labels.contains("bug"));
        assert!(event.issue.assignees.contains("bob"));
        assert_eq!(event.issue.author, "alice");
        assert!(event.comment.is_none());
    }

    #[test]
    fn decodes_comment_event_with_numeric_id() {
        let body = br#"{
            "action": "created",
            "issue": {"number": 7, "state": "open"},
            "repository": {"name": "r", "owner": {"login": "o"}},
            "comment": {"id": 9001, "body": "hello", "user": {"login": "carol"}}
        }"#;
        let event = decode_src_event(body).unwrap();
        assert_eq!(event.kind(), "comment.created");
        let comment = event.comment.unwrap();
        assert_eq!(comment.remote_id, "9001");
        assert_eq!(comment.author, "carol");
    }

    #[test]
    fn rejects_payload_without_issue() {
        let body = br#"{"action": "opened", "repository": {"name": "r", "owner": {"login": "o"}}}"#;
        assert!(decode_src_event(body).is_err());
    }

    #[test]
    fn decodes_page_with_typed_properties() {
        let body = br#"{
            "page": {
                "id": "p-1",
                "parent": {"database_id": "db-1"},
                "url": "https://tgt.example/p-1",
                "last_edited_time": "2026-07-01T12:00:00Z",
                "properties": {
                    "Name": {"type": "title", "title": [{"plain_text": "Bug"}]},
                    "Status": {"type": "status", "status": {"name": "Done"}},
                    "Tags": {"type": "multi_select", "multi_select": [{"name": "bug"}, {"name": "bug"}]},
                    "Done": {"type": "checkbox", "checkbox": true},
                    "Weird": {"type": "rollup", "rollup": {}}
                }
            }
        }"#;
        let event = decode_tgt_event(body).unwrap();
        let page = event.page;
        assert_eq!(page.page_id, "p-1");
        assert_eq!(page.database_id, "db-1");
        assert_eq!(
            page.properties["Name"],
            PropertyValue::Title { text: "Bug".into() }
        );
        assert_eq!(
            page.properties["Status"],
            PropertyValue::Status { option: "Done".into() }
        );
        match &page.properties["Tags"] {
            PropertyValue::MultiSelect { options } => assert_eq!(options.len(), 1),
            other => panic!("expected multi_select, got {other:?}"),
        }
        // Unknown property types are dropped at decode time.
        assert!(!page.properties.contains_key("Weird"));
    }

    #[test]
    fn empty_select_decodes_as_absent() {
        let body = br#"{
            "page": {
                "id": "p-2",
                "parent": {"database_id": "db-1"},
                "properties": {
                    "Status": {"type": "status", "status": null}
                }
            }
        }"#;
        let event = decode_tgt_event(body).unwrap();
        assert!(event.page.properties.is_empty());
    }

    #[test]
    fn page_without_id_is_rejected() {
        let body = br#"{"page": {"parent": {"database_id": "db-1"}}}"#;
        assert!(decode_tgt_event(body).is_err());
    }
}
