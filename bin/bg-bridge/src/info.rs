//! Health and build information endpoints

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

const NOT_SPECIFIED: &str = "not specified";

/// Static process information served on `/info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppInfo {
    pub app_start_time: String,
    pub host_name: String,
    pub app_branch: String,
    pub app_name: String,
    pub app_build_time: String,
    pub app_version: String,
    pub stack_name: String,
    pub app_revision: String,
}

impl AppInfo {
    pub fn from_env(started: DateTime<Utc>) -> Self {
        Self::from_lookup(started, host_name(), |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(started: DateTime<Utc>, host_name: String, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).unwrap_or_else(|| NOT_SPECIFIED.to_string());

        Self {
            app_start_time: started.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            host_name,
            app_branch: var("APP_BRANCH"),
            app_name: var("APP_NAME"),
            app_build_time: var("APP_BUILD_TIME"),
            app_version: var("APP_VERSION"),
            stack_name: var("STACK_NAME"),
            app_revision: var("APP_REVISION"),
        }
    }
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn healthz() -> &'static str {
    "OK"
}

async fn info(State(info): State<Arc<AppInfo>>) -> Json<AppInfo> {
    Json(info.as_ref().clone())
}

pub fn router(info: AppInfo) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/info", get(self::info))
        .with_state(Arc::new(info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_info_defaults_and_keys() {
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let info = AppInfo::from_lookup(started, "bridge-0".to_string(), |key| {
            (key == "APP_NAME").then(|| "bundlegen-bridge".to_string())
        });

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["APP_START_TIME"], "2024-03-01T12:30:05Z");
        assert_eq!(json["HOST_NAME"], "bridge-0");
        assert_eq!(json["APP_NAME"], "bundlegen-bridge");
        assert_eq!(json["APP_VERSION"], NOT_SPECIFIED);
        assert_eq!(json["APP_REVISION"], NOT_SPECIFIED);
        assert_eq!(json.as_object().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_handlers() {
        assert_eq!(healthz().await, "OK");

        let started = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let app_info = AppInfo::from_lookup(started, "h".to_string(), |_| None);
        let Json(served) = info(State(Arc::new(app_info.clone()))).await;
        assert_eq!(served, app_info);
    }
}
