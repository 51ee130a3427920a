//! HTTP access to the `notifications` table.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_RANGE};
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use crate::config::BackendSettings;
use crate::notifications::{NotificationError, UserId};

const TABLE_PATH: &str = "/rest/v1/notifications";

/// Thin client over the table's REST endpoint.
pub struct NotificationsTable {
    http_client: Client,
    table_url: String,
    api_key: String,
    bearer_token: String,
}

impl NotificationsTable {
    pub fn new(settings: &BackendSettings) -> Result<Self, NotificationError> {
        let http_client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| NotificationError::BackendUnavailable(e.to_string()))?;
        Ok(Self {
            http_client,
            table_url: format!("{}{}", settings.base_url, TABLE_PATH),
            api_key: settings.api_key.clone(),
            bearer_token: settings.bearer_token().to_string(),
        })
    }

    /// URL selecting the unread rows of `recipient`.
    fn unread_url(&self, recipient: &UserId) -> String {
        format!(
            "{}?notified_id=eq.{}&is_read=eq.false",
            self.table_url,
            urlencoding::encode(recipient.as_str())
        )
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.api_key) {
            headers.insert("apikey", value);
        }
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.bearer_token)) {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        headers
    }

    /// Exact count of unread rows, without fetching them.
    pub async fn count_unread(&self, recipient: &UserId) -> Result<u64, NotificationError> {
        let url = format!("{}&select=id", self.unread_url(recipient));
        let response = self
            .http_client
            .head(&url)
            .headers(self.auth_headers())
            .header("Prefer", "count=exact")
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response)?;

        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                NotificationError::BackendUnavailable("count response without Content-Range".into())
            })?;
        let total = parse_content_range_total(content_range).ok_or_else(|| {
            NotificationError::BackendUnavailable(format!(
                "unexpected Content-Range: {}",
                content_range
            ))
        })?;
        debug!("{} unread notifications for {}", total, recipient);
        Ok(total)
    }

    /// Flip `is_read` on every unread row of `recipient`.
    pub async fn mark_all_read(&self, recipient: &UserId) -> Result<(), NotificationError> {
        let response = self
            .http_client
            .patch(self.unread_url(recipient))
            .headers(self.auth_headers())
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "is_read": true }))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response)?;
        Ok(())
    }
}

fn transport_error(err: reqwest::Error) -> NotificationError {
    NotificationError::BackendUnavailable(err.to_string())
}

/// Map the response status to the error taxonomy.
fn check_status(response: Response) -> Result<Response, NotificationError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(NotificationError::NotAuthenticated),
        status => Err(NotificationError::BackendUnavailable(format!(
            "HTTP {}",
            status
        ))),
    }
}

/// Total from a `Content-Range` header such as `0-24/57` or `*/0`.
///
/// Returns `None` when the total is missing or unknown (`*`).
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(access_token: Option<&str>) -> BackendSettings {
        BackendSettings {
            base_url: "https://stew.example.co".to_string(),
            api_key: "anon-key".to_string(),
            access_token: access_token.map(str::to_string),
            heartbeat_interval: Duration::from_secs(25),
            request_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("0-24/57"), Some(57));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total(" */12 "), Some(12));
        assert_eq!(parse_content_range_total("0-9/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
        assert_eq!(parse_content_range_total(""), None);
    }

    #[test]
    fn test_unread_url() {
        let table = NotificationsTable::new(&settings(None)).unwrap();
        assert_eq!(
            table.unread_url(&UserId::from("u 1")),
            "https://stew.example.co/rest/v1/notifications?notified_id=eq.u%201&is_read=eq.false"
        );
    }

    #[test]
    fn test_auth_headers_prefer_access_token() {
        let table = NotificationsTable::new(&settings(Some("user-jwt"))).unwrap();
        let headers = table.auth_headers();
        assert_eq!(headers["apikey"], "anon-key");
        assert_eq!(headers[reqwest::header::AUTHORIZATION], "Bearer user-jwt");

        let table = NotificationsTable::new(&settings(None)).unwrap();
        assert_eq!(
            table.auth_headers()[reqwest::header::AUTHORIZATION],
            "Bearer anon-key"
        );
    }
}
