//! Client for the target document store's API.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Method;

use crate::clients::policy::{
    self, classify_status, classify_transport_error, parse_retry_after, ApiError, CallPolicy,
};
use crate::decode;
use crate::ratelimit::TokenBucket;
use crate::records::{PageRecord, PropertyValue};

/// Pinned API version, sent on every request.
pub const API_VERSION: &str = "2022-06-28";

const API_VERSION_HEADER: &str = "x-api-version";

/// One child block of a page, as returned by `list_block_children`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockChild {
    pub id: String,
    pub text: String,
}

#[derive(Clone)]
pub struct TargetClient {
    http: reqwest::Client,
    base: String,
    token: String,
    bucket: Arc<TokenBucket>,
    policy: CallPolicy,
}

impl TargetClient {
    pub fn new(base: &str, token: &str, bucket: Arc<TokenBucket>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(policy::CONNECT_TIMEOUT)
            .read_timeout(policy::READ_TIMEOUT)
            .timeout(policy::TOTAL_TIMEOUT)
            .pool_max_idle_per_host(32)
            .user_agent(concat!("ticketbridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            bucket,
            policy: CallPolicy::default(),
        })
    }

    async fn request(
        &self,
        op: &str,
        method: Method,
        url: String,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ApiError> {
        policy::with_retry(&self.policy, &self.bucket, "tgt", op, || {
            let req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.token)
                .header(API_VERSION_HEADER, API_VERSION)
                .header(reqwest::header::ACCEPT, "application/json");
            let req = match &body {
                Some(b) => req.json(b),
                None => req,
            };
            async move {
                let resp = req.send().await.map_err(|e| classify_transport_error(&e))?;
                let status = resp.status().as_u16();
                if resp.status().is_success() {
                    resp.json::<serde_json::Value>()
                        .await
                        .map_err(|e| classify_transport_error(&e))
                } else {
                    let retry_after = parse_retry_after(resp.headers());
                    let text = resp.text().await.unwrap_or_default();
                    Err(classify_status(status, text, retry_after))
                }
            }
        })
        .await
    }

    pub async fn create_page(
        &self,
        database_id: &str,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> Result<PageRecord, ApiError> {
        let url = format!("{}/pages", self.base);
        let body = serde_json::json!({
            "parent": { "database_id": database_id },
            "properties": encode_properties(properties),
        });
        let resp = self.request("create_page", Method::POST, url, Some(body)).await?;
        decode::decode_page_object(&resp).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn update_page(
        &self,
        page_id: &str,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> Result<PageRecord, ApiError> {
        let url = format!("{}/pages/{page_id}", self.base);
        let body = serde_json::json!({ "properties": encode_properties(properties) });
        let resp = self.request("update_page", Method::PATCH, url, Some(body)).await?;
        decode::decode_page_object(&resp).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Query a database with a property filter, returning matching pages.
    pub async fn query_database(
        &self,
        database_id: &str,
        filter: serde_json::Value,
        page_size: u32,
    ) -> Result<Vec<PageRecord>, ApiError> {
        let url = format!("{}/databases/{database_id}/query", self.base);
        let body = serde_json::json!({ "filter": filter, "page_size": page_size });
        let resp = self
            .request("query_database", Method::POST, url, Some(body))
            .await?;
        let results = resp
            .get("results")
            .and_then(|r| r.as_array())
            .ok_or_else(|| ApiError::Decode("query response missing results".into()))?;
        results
            .iter()
            .map(|page| {
                decode::decode_page_object(page).map_err(|e| ApiError::Decode(e.to_string()))
            })
            .collect()
    }

    /// Append blocks to a page (used for comment sync). Returns the ids of
    /// the created blocks.
    pub async fn append_block_children(
        &self,
        block_id: &str,
        children: Vec<serde_json::Value>,
    ) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/blocks/{block_id}/children", self.base);
        let body = serde_json::json!({ "children": children });
        let resp = self
            .request("append_block_children", Method::PATCH, url, Some(body))
            .await?;
        let ids = resp
            .get("results")
            .and_then(|r| r.as_array())
            .map(|results| {
                results
                    .iter()
                    .filter_map(|b| b.get("id").and_then(|id| id.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    pub async fn list_block_children(
        &self,
        block_id: &str,
        page_size: u32,
    ) -> Result<Vec<BlockChild>, ApiError> {
        let url = format!(
            "{}/blocks/{block_id}/children?page_size={page_size}",
            self.base
        );
        let resp = self
            .request("list_block_children", Method::GET, url, None)
            .await?;
        let results = resp
            .get("results")
            .and_then(|r| r.as_array())
            .ok_or_else(|| ApiError::Decode("children response missing results".into()))?;
        Ok(results
            .iter()
            .filter_map(|block| {
                let id = block.get("id")?.as_str()?.to_string();
                let text = block
                    .get("paragraph")
                    .and_then(|p| p.get("rich_text"))
                    .map(plain_text)
                    .unwrap_or_default();
                Some(BlockChild { id, text })
            })
            .collect())
    }
}

fn plain_text(rich_text: &serde_json::Value) -> String {
    rich_text
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

fn rich_text_value(text: &str) -> serde_json::Value {
    serde_json::json!([{
        "text": { "content": text },
        "plain_text": text,
    }])
}

/// A paragraph block carrying one synchronized comment.
pub fn paragraph_block(author: &str, body: &str) -> serde_json::Value {
    let text = if author.is_empty() {
        body.to_string()
    } else {
        format!("{author}: {body}")
    };
    serde_json::json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": { "rich_text": rich_text_value(&text) },
    })
}

/// Encode typed properties into the store's wire format. Inverse of the
/// property decoding at the admission boundary.
pub fn encode_properties(properties: &BTreeMap<String, PropertyValue>) -> serde_json::Value {
    let mut out = serde_json::Map::new();
    for (name, value) in properties {
        let encoded = match value {
            PropertyValue::Title { text } => serde_json::json!({
                "type": "title",
                "title": rich_text_value(text),
            }),
            PropertyValue::RichText { text } => serde_json::json!({
                "type": "rich_text",
                "rich_text": rich_text_value(text),
            }),
            PropertyValue::Select { option } => serde_json::json!({
                "type": "select",
                "select": { "name": option },
            }),
            PropertyValue::MultiSelect { options } => serde_json::json!({
                "type": "multi_select",
                "multi_select": options.iter().map(|o| serde_json::json!({ "name": o })).collect::<Vec<_>>(),
            }),
            PropertyValue::Status { option } => serde_json::json!({
                "type": "status",
                "status": { "name": option },
            }),
            PropertyValue::Number { value } => serde_json::json!({
                "type": "number",
                "number": value,
            }),
            PropertyValue::Checkbox { checked } => serde_json::json!({
                "type": "checkbox",
                "checkbox": checked,
            }),
            PropertyValue::Date { start } => serde_json::json!({
                "type": "date",
                "date": { "start": start.to_rfc3339() },
            }),
            PropertyValue::People { names } => serde_json::json!({
                "type": "people",
                "people": names.iter().map(|n| serde_json::json!({ "name": n })).collect::<Vec<_>>(),
            }),
            PropertyValue::Url { url } => serde_json::json!({
                "type": "url",
                "url": url,
            }),
        };
        out.insert(name.clone(), encoded);
    }
    serde_json::Value::Object(out)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn encoded_properties_decode_back() {
        let properties: BTreeMap<String, PropertyValue> = [
            ("Name".to_string(), PropertyValue::Title { text: "Bug".into() }),
            (
                "Status".to_string(),
                PropertyValue::Status { option: "Done".into() },
            ),
            (
                "Tags".to_string(),
                PropertyValue::MultiSelect {
                    options: ["bug".to_string(), "p1".to_string()].into_iter().collect(),
                },
            ),
            ("Done".to_string(), PropertyValue::Checkbox { checked: true }),
            (
                "Opened".to_string(),
                PropertyValue::Date {
                    start: Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap(),
                },
            ),
            (
                "Assignees".to_string(),
                PropertyValue::People {
                    names: ["bob".to_string()].into_iter().collect(),
                },
            ),
            (
                "Link".to_string(),
                PropertyValue::Url { url: "https://src.example/x".into() },
            ),
            ("Count".to_string(), PropertyValue::Number { value: Some(3.0) }),
        ]
        .into_iter()
        .collect();

        let page_json = serde_json::json!({
            "id": "p-1",
            "parent": { "database_id": "db-1" },
            "properties": encode_properties(&properties),
        });
        let page = decode::decode_page_object(&page_json).unwrap();
        assert_eq!(page.properties, properties);
    }

    #[test]
    fn paragraph_block_carries_author_and_text() {
        let block = paragraph_block("alice", "hello");
        assert_eq!(block["type"], "paragraph");
        assert_eq!(block["paragraph"]["rich_text"][0]["plain_text"], "alice: hello");
    }

    #[test]
    fn empty_multi_select_is_legal() {
        let properties: BTreeMap<String, PropertyValue> = [(
            "Tags".to_string(),
            PropertyValue::MultiSelect {
                options: BTreeSet::new(),
            },
        )]
        .into_iter()
        .collect();
        let encoded = encode_properties(&properties);
        assert_eq!(encoded["Tags"]["multi_select"], serde_json::json!([]));
    }
}
