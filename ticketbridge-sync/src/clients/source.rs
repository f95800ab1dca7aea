//! Client for the source issue tracker's REST API.

use std::sync::Arc;

use reqwest::Method;

use crate::clients::policy::{
    self, classify_status, classify_transport_error, parse_retry_after, ApiError, CallPolicy,
};
use crate::decode;
use crate::ratelimit::TokenBucket;
use crate::records::{CommentRecord, IssueRecord, IssueUpdate};

#[derive(Clone)]
pub struct SourceClient {
    http: reqwest::Client,
    base: String,
    token: String,
    bucket: Arc<TokenBucket>,
    policy: CallPolicy,
}

impl SourceClient {
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
    ) -> Result<Vec<u8>, ApiError> {
        policy::with_retry(&self.policy, &self.bucket, "src", op, || {
            let req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.token)
                .header(reqwest::header::ACCEPT, "application/json");
            let req = match &body {
                Some(b) => req.json(b),
                None => req,
            };
            async move {
                let resp = req.send().await.map_err(|e| classify_transport_error(&e))?;
                let status = resp.status().as_u16();
                if resp.status().is_success() {
                    resp.bytes()
                        .await
                        .map(|b| b.to_vec())
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

    pub async fn get_issue(&self, repo: &str, number: i64) -> Result<IssueRecord, ApiError> {
        let url = format!("{}/repos/{repo}/issues/{number}", self.base);
        let body = self.request("get_issue", Method::GET, url, None).await?;
        decode::decode_api_issue(repo, &body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Apply a partial update and return the resulting issue, whose content
    /// hash the caller stores for echo suppression.
    pub async fn update_issue(
        &self,
        repo: &str,
        number: i64,
        update: &IssueUpdate,
    ) -> Result<IssueRecord, ApiError> {
        let url = format!("{}/repos/{repo}/issues/{number}", self.base);
        let body = serde_json::to_value(update)
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        let resp = self
            .request("update_issue", Method::PATCH, url, Some(body))
            .await?;
        decode::decode_api_issue(repo, &resp).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn create_comment(
        &self,
        repo: &str,
        number: i64,
        text: &str,
    ) -> Result<CommentRecord, ApiError> {
        let url = format!("{}/repos/{repo}/issues/{number}/comments", self.base);
        let body = serde_json::json!({ "body": text });
        let resp = self
            .request("create_comment", Method::POST, url, Some(body))
            .await?;
        decode::decode_api_comment(&resp).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn list_comments(
        &self,
        repo: &str,
        number: i64,
        per_page: u32,
    ) -> Result<Vec<CommentRecord>, ApiError> {
        let url = format!(
            "{}/repos/{repo}/issues/{number}/comments?per_page={per_page}",
            self.base
        );
        let resp = self.request("list_comments", Method::GET, url, None).await?;
        decode::decode_api_comments(&resp).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Extract `(owner/name, number)` from an issue URL like
/// `https://src.example/acme/widgets/issues/42`.
pub fn parse_repo_from_url(issue_url: &str) -> Option<(String, i64)> {
    let url = url::Url::parse(issue_url).ok()?;
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [owner, repo, "issues", number] => {
            let number: i64 = number.parse().ok()?;
            Some((format!("{owner}/{repo}"), number))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_issue_urls() {
        assert_eq!(
            parse_repo_from_url("https://src.example/acme/widgets/issues/42"),
            Some(("acme/widgets".to_string(), 42))
        );
        assert_eq!(
            parse_repo_from_url("https://src.example/acme/widgets/issues/42/"),
            Some(("acme/widgets".to_string(), 42))
        );
    }

    #[test]
    fn rejects_non_issue_urls() {
        assert_eq!(parse_repo_from_url("https://src.example/acme/widgets"), None);
        assert_eq!(
            parse_repo_from_url("https://src.example/acme/widgets/pulls/42"),
            None
        );
        assert_eq!(parse_repo_from_url("not a url"), None);
        assert_eq!(
            parse_repo_from_url("https://src.example/a/b/issues/notanumber"),
            None
        );
    }
}
