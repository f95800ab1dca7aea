//! Declarative, bidirectional translation between issue records and target
//! page properties.
//!
//! The mapper is pure: same registry and input always produce the same
//! output, and no I/O happens here. Warnings are returned to the caller,
//! which owns logging and counters.

use std::collections::{BTreeMap, BTreeSet};

use crate::records::{IssueRecord, IssueState, IssueUpdate, PageRecord, PropertyValue};
use crate::registry::MappingRegistry;

/// Provider ceiling for text property content, in Unicode code points.
pub const TEXT_LIMIT: usize = 2000;

#[derive(Debug, Clone, PartialEq)]
pub struct MapperWarning {
    pub property: String,
    pub kind: &'static str,
}

impl MapperWarning {
    fn new(property: impl Into<String>, kind: &'static str) -> Self {
        Self {
            property: property.into(),
            kind,
        }
    }
}

#[derive(Debug, Default)]
pub struct MappedProperties {
    pub properties: BTreeMap<String, PropertyValue>,
    pub warnings: Vec<MapperWarning>,
}

/// Truncate to [`TEXT_LIMIT`] code points, appending an ellipsis when content
/// was dropped. Never splits a code point.
pub fn truncate_text(s: &str) -> String {
    if s.chars().count() <= TEXT_LIMIT {
        return s.to_string();
    }
    let mut out: String = s.chars().take(TEXT_LIMIT - 1).collect();
    out.push('…');
    out
}

fn default_variant(path: &str) -> &'static str {
    match path {
        "title" => "title",
        "body" => "rich_text",
        "state" => "status",
        "labels" => "multi_select",
        "assignees" => "people",
        "created_at" | "updated_at" => "date",
        "url" => "url",
        "number" => "number",
        _ => "rich_text",
    }
}

/// Translate an issue into the target property map declared by the registry.
pub fn issue_to_properties(reg: &MappingRegistry, issue: &IssueRecord) -> MappedProperties {
    let mut out = MappedProperties::default();

    for (path, property) in &reg.src_to_tgt {
        let variant = reg
            .property_types
            .get(property)
            .map(String::as_str)
            .unwrap_or_else(|| default_variant(path));

        let value = match path.as_str() {
            "title" => text_value(variant, truncate_text(&issue.title)),
            "body" => text_value(variant, truncate_text(&issue.body)),
            "state" => state_value(reg, variant, issue.state, property, &mut out.warnings),
            "labels" => Some(PropertyValue::MultiSelect {
                options: issue.labels.clone(),
            }),
            "assignees" => {
                let names = people_value(
                    issue.assignees.iter().cloned(),
                    property,
                    &mut out.warnings,
                );
                match variant {
                    "multi_select" => Some(PropertyValue::MultiSelect { options: names }),
                    _ => Some(PropertyValue::People { names }),
                }
            }
            "author" | "user.login" => match variant {
                "people" => Some(PropertyValue::People {
                    names: people_value(
                        [issue.author.clone()],
                        property,
                        &mut out.warnings,
                    ),
                }),
                _ => text_value("rich_text", issue.author.clone()),
            },
            "created_at" => issue.created_at.map(|start| PropertyValue::Date { start }),
            "updated_at" => issue.updated_at.map(|start| PropertyValue::Date { start }),
            "url" => url_value(&issue.url, property, &mut out.warnings),
            "number" => Some(PropertyValue::Number {
                value: Some(issue.src_number as f64),
            }),
            "repo" => text_value(variant, issue.src_repo.clone()),
            _ => None,
        };

        // An absent value (e.g. an unknown date) omits the property rather
        // than writing null, so partial updates don't wipe user edits.
        if let Some(value) = value {
            out.properties.insert(property.clone(), value);
        }
    }

    out
}

fn text_value(variant: &str, text: String) -> Option<PropertyValue> {
    match variant {
        "title" => Some(PropertyValue::Title { text }),
        "select" => Some(PropertyValue::Select { option: text }),
        _ => Some(PropertyValue::RichText { text }),
    }
}

fn state_value(
    reg: &MappingRegistry,
    variant: &str,
    state: IssueState,
    property: &str,
    warnings: &mut Vec<MapperWarning>,
) -> Option<PropertyValue> {
    match variant {
        "checkbox" => Some(PropertyValue::Checkbox {
            checked: state == IssueState::Closed,
        }),
        "select" => {
            let (option, fell_back) = reg.status_map.to_tgt(state.as_str());
            if fell_back {
                warnings.push(MapperWarning::new(property, "unknown_status"));
            }
            Some(PropertyValue::Select { option })
        }
        _ => {
            let (option, fell_back) = reg.status_map.to_tgt(state.as_str());
            if fell_back {
                warnings.push(MapperWarning::new(property, "unknown_status"));
            }
            Some(PropertyValue::Status { option })
        }
    }
}

/// Person names pass through after a syntactic check, like URLs: empty or
/// whitespace-only names are dropped with a warning instead of written.
fn people_value(
    names: impl IntoIterator<Item = String>,
    property: &str,
    warnings: &mut Vec<MapperWarning>,
) -> BTreeSet<String> {
    let mut valid = BTreeSet::new();
    for name in names {
        if name.trim().is_empty() {
            warnings.push(MapperWarning::new(property, "invalid_person"));
        } else {
            valid.insert(name);
        }
    }
    valid
}

fn url_value(url: &str, property: &str, warnings: &mut Vec<MapperWarning>) -> Option<PropertyValue> {
    if url.is_empty() {
        return None;
    }
    match url::Url::parse(url) {
        Ok(_) => Some(PropertyValue::Url { url: url.to_string() }),
        Err(_) => {
            warnings.push(MapperWarning::new(property, "invalid_url"));
            None
        }
    }
}

fn property_text(value: &PropertyValue) -> Option<&str> {
    match value {
        PropertyValue::Title { text } | PropertyValue::RichText { text } => Some(text),
        PropertyValue::Select { option } | PropertyValue::Status { option } => Some(option),
        _ => None,
    }
}

/// Translate a page into a partial issue update via the inverse map.
///
/// Only fields declared in `tgt_to_src`, present on the page, and different
/// from `current` are included. Page properties not declared in the registry
/// are reported as `unknown_property` warnings.
pub fn page_to_issue_update(
    reg: &MappingRegistry,
    page: &PageRecord,
    current: &IssueRecord,
) -> (IssueUpdate, Vec<MapperWarning>) {
    let mut update = IssueUpdate::default();
    let mut warnings = Vec::new();

    for (property, value) in &page.properties {
        let Some(path) = reg.tgt_to_src.get(property) else {
            warnings.push(MapperWarning::new(property, "unknown_property"));
            continue;
        };

        match path.as_str() {
            "title" => {
                if let Some(text) = property_text(value) {
                    if text != current.title {
                        update.title = Some(text.to_string());
                    }
                }
            }
            "body" => {
                if let Some(text) = property_text(value) {
                    if text != current.body {
                        update.body = Some(text.to_string());
                    }
                }
            }
            "state" => {
                let desired = match value {
                    PropertyValue::Checkbox { checked } => Some(if *checked {
                        IssueState::Closed
                    } else {
                        IssueState::Open
                    }),
                    PropertyValue::Status { option } | PropertyValue::Select { option } => {
                        let (state, fell_back) = reg.status_map.to_src(option);
                        if fell_back {
                            warnings.push(MapperWarning::new(property, "unknown_status"));
                        }
                        match state.as_str() {
                            "closed" => Some(IssueState::Closed),
                            _ => Some(IssueState::Open),
                        }
                    }
                    _ => None,
                };
                if let Some(state) = desired {
                    if state != current.state {
                        update.state = Some(state);
                    }
                }
            }
            "labels" => {
                if let PropertyValue::MultiSelect { options } = value {
                    if *options != current.labels {
                        update.labels = Some(options.clone());
                    }
                }
            }
            "assignees" => {
                if let PropertyValue::People { names } = value {
                    if *names != current.assignees {
                        update.assignees = Some(names.clone());
                    }
                } else if let PropertyValue::MultiSelect { options } = value {
                    if *options != current.assignees {
                        update.assignees = Some(options.clone());
                    }
                }
            }
            // Dates, numbers, and URLs are derived on the source side and
            // never written back.
            _ => {}
        }
    }

    (update, warnings)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::registry::tests::registry;

    fn issue() -> IssueRecord {
        IssueRecord {
            src_repo: "o/r".into(),
            src_number: 42,
            title: "Bug".into(),
            body: "x".into(),
            state: IssueState::Open,
            labels: ["bug".to_string()].into_iter().collect(),
            assignees: ["bob".to_string()].into_iter().collect(),
            author: "alice".into(),
            created_at: Some(Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap()),
            updated_at: None,
            url: "https://src.example/o/r/issues/42".into(),
        }
    }

    #[test]
    fn maps_issue_to_declared_properties() {
        let reg = registry();
        let mapped = issue_to_properties(&reg, &issue());
        assert_eq!(
            mapped.properties["Name"],
            PropertyValue::Title { text: "Bug".into() }
        );
        assert_eq!(
            mapped.properties["Status"],
            PropertyValue::Status { option: "In Progress".into() }
        );
        assert_eq!(
            mapped.properties["Tags"],
            PropertyValue::MultiSelect {
                options: ["bug".to_string()].into_iter().collect()
            }
        );
        assert_eq!(
            mapped.properties["Issue Number"],
            PropertyValue::Number { value: Some(42.0) }
        );
        assert_eq!(
            mapped.properties["Issue Link"],
            PropertyValue::Url { url: "https://src.example/o/r/issues/42".into() }
        );
        assert!(mapped.warnings.is_empty());
    }

    #[test]
    fn unknown_date_is_omitted_not_nulled() {
        let reg = {
            let mut reg = registry();
            reg.src_to_tgt.insert("updated_at".into(), "Updated".into());
            reg
        };
        let mapped = issue_to_properties(&reg, &issue());
        assert!(!mapped.properties.contains_key("Updated"));
    }

    #[test]
    fn checkbox_override_derives_from_state() {
        let mut reg = registry();
        reg.property_types.insert("Status".into(), "checkbox".into());

        let mut closed = issue();
        closed.state = IssueState::Closed;
        let mapped = issue_to_properties(&reg, &closed);
        assert_eq!(
            mapped.properties["Status"],
            PropertyValue::Checkbox { checked: true }
        );
    }

    #[test]
    fn invalid_assignee_names_are_dropped_with_warning() {
        let reg = registry();
        let mut bad = issue();
        bad.assignees = ["bob".to_string(), "   ".to_string(), String::new()]
            .into_iter()
            .collect();
        let mapped = issue_to_properties(&reg, &bad);
        assert_eq!(
            mapped.properties["Assignees"],
            PropertyValue::People {
                names: ["bob".to_string()].into_iter().collect()
            }
        );
        assert_eq!(
            mapped
                .warnings
                .iter()
                .filter(|w| w.kind == "invalid_person")
                .count(),
            2
        );
    }

    #[test]
    fn empty_author_warns_under_people_override() {
        let mut reg = registry();
        reg.src_to_tgt.insert("author".into(), "Reporter".into());
        reg.property_types.insert("Reporter".into(), "people".into());

        let mut anonymous = issue();
        anonymous.author = String::new();
        let mapped = issue_to_properties(&reg, &anonymous);
        assert_eq!(
            mapped.properties["Reporter"],
            PropertyValue::People {
                names: Default::default()
            }
        );
        assert!(mapped.warnings.iter().any(|w| w.kind == "invalid_person"));
    }

    #[test]
    fn invalid_url_is_dropped_with_warning() {
        let reg = registry();
        let mut bad = issue();
        bad.url = "not a url".into();
        let mapped = issue_to_properties(&reg, &bad);
        assert!(!mapped.properties.contains_key("Issue Link"));
        assert!(mapped.warnings.iter().any(|w| w.kind == "invalid_url"));
    }

    #[test]
    fn truncation_preserves_code_points() {
        let long = "é".repeat(TEXT_LIMIT + 100);
        let truncated = truncate_text(&long);
        assert_eq!(truncated.chars().count(), TEXT_LIMIT);
        assert!(truncated.ends_with('…'));

        let short = "short";
        assert_eq!(truncate_text(short), "short");
    }

    #[test]
    fn page_update_includes_only_changed_fields() {
        let reg = registry();
        let current = issue();

        let page = PageRecord {
            page_id: "p-1".into(),
            database_id: "db-1".into(),
            properties: [
                (
                    "Name".to_string(),
                    PropertyValue::Title { text: "Bug".into() },
                ),
                (
                    "Status".to_string(),
                    PropertyValue::Status { option: "Done".into() },
                ),
            ]
            .into_iter()
            .collect(),
            last_edited_at: None,
            url: String::new(),
        };

        let (update, warnings) = page_to_issue_update(&reg, &page, &current);
        assert!(warnings.is_empty());
        // Title matches the current issue, so only the state changes.
        assert!(update.title.is_none());
        assert_eq!(update.state, Some(IssueState::Closed));
    }

    #[test]
    fn unmapped_page_property_warns() {
        let reg = registry();
        let page = PageRecord {
            page_id: "p-1".into(),
            database_id: "db-1".into(),
            properties: [(
                "Priority".to_string(),
                PropertyValue::Select { option: "High".into() },
            )]
            .into_iter()
            .collect(),
            last_edited_at: None,
            url: String::new(),
        };
        let (update, warnings) = page_to_issue_update(&reg, &page, &issue());
        assert!(update.is_empty());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, "unknown_property");
        assert_eq!(warnings[0].property, "Priority");
    }

    #[test]
    fn unknown_target_status_falls_back_to_default_state() {
        let reg = registry();
        let mut current = issue();
        current.state = IssueState::Closed;

        let page = PageRecord {
            page_id: "p-1".into(),
            database_id: "db-1".into(),
            properties: [(
                "Status".to_string(),
                PropertyValue::Status { option: "Totally New".into() },
            )]
            .into_iter()
            .collect(),
            last_edited_at: None,
            url: String::new(),
        };
        let (update, warnings) = page_to_issue_update(&reg, &page, &current);
        // default_src is "open", current is closed, so a transition appears.
        assert_eq!(update.state, Some(IssueState::Open));
        assert!(warnings.iter().any(|w| w.kind == "unknown_status"));
    }

    #[test]
    fn round_trip_covers_mapped_subset() {
        let reg = registry();
        let original = issue();

        let mapped = issue_to_properties(&reg, &original);
        let page = PageRecord {
            page_id: "p-1".into(),
            database_id: "db-1".into(),
            properties: mapped.properties,
            last_edited_at: None,
            url: String::new(),
        };

        // Recovering against a blank issue restores every mapped field.
        let blank = IssueRecord {
            src_repo: "o/r".into(),
            src_number: 42,
            title: String::new(),
            body: String::new(),
            state: IssueState::Closed,
            labels: BTreeSet::new(),
            assignees: BTreeSet::new(),
            author: String::new(),
            created_at: None,
            updated_at: None,
            url: String::new(),
        };
        let (update, _) = page_to_issue_update(&reg, &page, &blank);
        assert_eq!(update.title.as_deref(), Some("Bug"));
        assert_eq!(update.body.as_deref(), Some("x"));
        assert_eq!(update.state, Some(IssueState::Open));
        assert_eq!(update.labels.as_ref(), Some(&original.labels));
        assert_eq!(update.assignees.as_ref(), Some(&original.assignees));

        // Recovering against the original issue is a no-op.
        let (noop, _) = page_to_issue_update(&reg, &page, &original);
        assert!(noop.is_empty());
    }
}
