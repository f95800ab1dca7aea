//! The declarative field-mapping document, loaded once at startup and
//! injected into the pipeline as part of the application state.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;

/// Issue field paths the mapper knows how to resolve.
pub const KNOWN_FIELD_PATHS: &[&str] = &[
    "title",
    "body",
    "state",
    "labels",
    "assignees",
    "author",
    "user.login",
    "created_at",
    "updated_at",
    "url",
    "number",
    "repo",
];

/// Target property variants a registry may declare in `property_types`.
pub const KNOWN_PROPERTY_TYPES: &[&str] = &[
    "title",
    "rich_text",
    "select",
    "multi_select",
    "status",
    "number",
    "checkbox",
    "date",
    "people",
    "url",
];

#[derive(Debug, Clone, Deserialize)]
pub struct MappingRegistry {
    /// issue field path -> target property name
    #[serde(default)]
    pub src_to_tgt: BTreeMap<String, String>,
    /// target property name -> issue field path
    #[serde(default)]
    pub tgt_to_src: BTreeMap<String, String>,
    /// Optional per-property variant overrides (e.g. map `state` into a
    /// checkbox instead of a status).
    #[serde(default)]
    pub property_types: BTreeMap<String, String>,
    pub status_map: StatusMap,
    #[serde(default)]
    pub filters: Filters,
    #[serde(default)]
    pub sync_options: SyncOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusMap {
    /// source state -> target status name (keys case-folded at load)
    pub src_to_tgt: BTreeMap<String, String>,
    /// target status name -> source state (keys case-folded at load)
    pub tgt_to_src: BTreeMap<String, String>,
    /// Fallback target status for an unmapped source state.
    pub default_tgt: String,
    /// Fallback source state for an unmapped target status.
    pub default_src: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Filters {
    #[serde(default = "default_true")]
    pub ignore_bots: bool,
    #[serde(default)]
    pub ignored_labels: BTreeSet<String>,
    #[serde(default)]
    pub ignored_providers: BTreeSet<String>,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            ignore_bots: true,
            ignored_labels: BTreeSet::new(),
            ignored_providers: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncOptions {
    #[serde(default = "default_true")]
    pub bidirectional: bool,
    #[serde(default)]
    pub sync_comments: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            bidirectional: true,
            sync_comments: false,
            batch_size: default_batch_size(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> u32 {
    50
}

fn default_rate_limit_delay_ms() -> u64 {
    200
}

impl StatusMap {
    /// Map a source state to a target status. The bool reports whether the
    /// configured fallback was used.
    pub fn to_tgt(&self, src_state: &str) -> (String, bool) {
        match self.src_to_tgt.get(&src_state.to_lowercase()) {
            Some(tgt) => (tgt.clone(), false),
            None => (self.default_tgt.clone(), true),
        }
    }

    /// Map a target status to a source state.
    pub fn to_src(&self, tgt_status: &str) -> (String, bool) {
        match self.tgt_to_src.get(&tgt_status.to_lowercase()) {
            Some(src) => (src.clone(), false),
            None => (self.default_src.clone(), true),
        }
    }
}

impl MappingRegistry {
    /// Load and validate the registry from `mapping_path`. The format is
    /// derived from the file extension (JSON, YAML, or TOML).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;
        let mut registry: MappingRegistry = settings.try_deserialize()?;
        registry.normalize();
        registry.validate()?;
        Ok(registry)
    }

    /// Case-fold status-map lookup keys.
    pub fn normalize(&mut self) {
        self.status_map.src_to_tgt = self
            .status_map
            .src_to_tgt
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();
        self.status_map.tgt_to_src = self
            .status_map
            .tgt_to_src
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for path in self.src_to_tgt.keys() {
            if !KNOWN_FIELD_PATHS.contains(&path.as_str()) {
                anyhow::bail!("unknown issue field path in src_to_tgt: {path}");
            }
        }
        for (property, path) in &self.tgt_to_src {
            if !KNOWN_FIELD_PATHS.contains(&path.as_str()) {
                anyhow::bail!("unknown issue field path for target property {property}: {path}");
            }
        }
        for (property, variant) in &self.property_types {
            if !KNOWN_PROPERTY_TYPES.contains(&variant.as_str()) {
                anyhow::bail!("unknown property type for {property}: {variant}");
            }
        }

        // The status maps must invert each other over the declared domain,
        // otherwise a state would drift on every round trip.
        for (src_state, tgt_status) in &self.status_map.src_to_tgt {
            match self.status_map.tgt_to_src.get(&tgt_status.to_lowercase()) {
                Some(back) if back.to_lowercase() == *src_state => {}
                Some(back) => anyhow::bail!(
                    "status map is not invertible: {src_state} -> {tgt_status} -> {back}"
                ),
                None => anyhow::bail!(
                    "status map is not invertible: {tgt_status} has no tgt_to_src entry"
                ),
            }
        }
        Ok(())
    }

    /// The target property mapped from the issue number, when one is
    /// declared. Used to adopt pre-existing pages on the create path.
    pub fn number_property(&self) -> Option<&str> {
        self.src_to_tgt.get("number").map(String::as_str)
    }

    pub fn provider_ignored(&self, provider: &str) -> bool {
        self.filters.ignored_providers.contains(provider)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn registry() -> MappingRegistry {
        let mut reg: MappingRegistry = serde_json::from_value(json!({
            "src_to_tgt": {
                "title": "Name",
                "body": "Description",
                "state": "Status",
                "labels": "Tags",
                "assignees": "Assignees",
                "url": "Issue Link",
                "number": "Issue Number"
            },
            "tgt_to_src": {
                "Name": "title",
                "Description": "body",
                "Status": "state",
                "Tags": "labels",
                "Assignees": "assignees"
            },
            "status_map": {
                "src_to_tgt": {"open": "In Progress", "closed": "Done"},
                "tgt_to_src": {"in progress": "open", "done": "closed"},
                "default_tgt": "In Progress",
                "default_src": "open"
            },
            "filters": {
                "ignore_bots": true,
                "ignored_labels": ["wontfix"]
            },
            "sync_options": {
                "bidirectional": true,
                "sync_comments": true
            }
        }))
        .unwrap();
        reg.normalize();
        reg
    }

    #[test]
    fn sample_registry_validates() {
        registry().validate().unwrap();
    }

    #[test]
    fn status_lookup_is_case_folded() {
        let reg = registry();
        assert_eq!(reg.status_map.to_tgt("OPEN"), ("In Progress".into(), false));
        assert_eq!(reg.status_map.to_src("DONE"), ("closed".into(), false));
    }

    #[test]
    fn unknown_status_falls_back_to_default() {
        let reg = registry();
        assert_eq!(reg.status_map.to_tgt("reopened"), ("In Progress".into(), true));
        assert_eq!(reg.status_map.to_src("Blocked"), ("open".into(), true));
    }

    #[test]
    fn status_round_trip_law() {
        let reg = registry();
        for state in ["open", "closed"] {
            let (tgt, fell_back) = reg.status_map.to_tgt(state);
            assert!(!fell_back);
            let (back, fell_back) = reg.status_map.to_src(&tgt);
            assert!(!fell_back);
            assert_eq!(back, state);
        }
    }

    #[test]
    fn unknown_field_path_is_rejected() {
        let mut reg = registry();
        reg.src_to_tgt.insert("milestone".into(), "Milestone".into());
        assert!(reg.validate().is_err());
    }

    #[test]
    fn non_invertible_status_map_is_rejected() {
        let mut reg = registry();
        reg.status_map
            .src_to_tgt
            .insert("reopened".into(), "In Progress".into());
        // "in progress" maps back to "open", not "reopened".
        assert!(reg.validate().is_err());
    }

    #[test]
    fn number_property_resolution() {
        assert_eq!(registry().number_property(), Some("Issue Number"));
    }
}
