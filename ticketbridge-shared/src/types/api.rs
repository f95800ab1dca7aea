use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub success: bool,
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Error,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            message: Some(message.into()),
        }
    }
}

/// The health document served on `/health` and `/health/ci`. The overall
/// `status` is the worst status among the individual checks.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub environment: String,
    pub checks: BTreeMap<String, HealthCheck>,
}

impl HealthResponse {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            timestamp: Utc::now(),
            environment: environment.into(),
            checks: BTreeMap::new(),
        }
    }

    pub fn with_check(mut self, name: impl Into<String>, check: HealthCheck) -> Self {
        match (self.status, check.status) {
            (_, HealthStatus::Error) => self.status = HealthStatus::Error,
            (HealthStatus::Healthy, HealthStatus::Degraded) => {
                self.status = HealthStatus::Degraded
            }
            _ => {}
        }
        self.checks.insert(name.into(), check);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_status_is_worst_check() {
        let resp = HealthResponse::new("test")
            .with_check("db", HealthCheck::healthy())
            .with_check("src_api", HealthCheck::degraded("slow"));
        assert_eq!(resp.status, HealthStatus::Degraded);

        let resp = resp.with_check("tgt_api", HealthCheck::error("down"));
        assert_eq!(resp.status, HealthStatus::Error);
    }

    #[test]
    fn error_status_is_sticky() {
        let resp = HealthResponse::new("test")
            .with_check("db", HealthCheck::error("no connection"))
            .with_check("self", HealthCheck::healthy());
        assert_eq!(resp.status, HealthStatus::Error);
    }

    #[test]
    fn health_json_shape() {
        let resp = HealthResponse::new("production").with_check("db", HealthCheck::healthy());
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["environment"], "production");
        assert_eq!(json["checks"]["db"]["status"], "healthy");
        assert!(json["checks"]["db"].get("message").is_none());
    }
}
