use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{Value, json};

use crate::errors::ApiError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Token validity used when the caller has no opinion.
pub const DEFAULT_TOKEN_EXPIRE_HOURS: u32 = 24;

/// Room information as reported by the room API.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomInfo {
    pub channel_id: String,
    pub host_uid: Option<String>,
    pub status: String,
    pub online_count: i64,
    pub max_seats: i64,
    pub create_time: Option<DateTime<Utc>>,
}

impl RoomInfo {
    /// Parse from a JSON object. `channelId` and `status` are required;
    /// a payload missing either yields no `RoomInfo` at all, never a
    /// partial one. `createTime` is epoch milliseconds, integral or
    /// floating.
    pub fn from_value(value: &Value) -> Option<Self> {
        let channel_id = value.get("channelId")?.as_str()?.to_string();
        let status = value.get("status")?.as_str()?.to_string();

        let create_time = value
            .get("createTime")
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms));

        Some(Self {
            channel_id,
            host_uid: value.get("hostUid").and_then(Value::as_str).map(str::to_string),
            status,
            online_count: value.get("onlineCount").and_then(Value::as_i64).unwrap_or(0),
            max_seats: value.get("maxSeats").and_then(Value::as_i64).unwrap_or(0),
            create_time,
        })
    }
}

/// Companion HTTP client for room management and token issuance.
///
/// Every request carries `X-App-Id`, plus `Authorization: Bearer` once a
/// token is set. Calls are single attempts; nothing retries, and each call
/// reports its outcome exactly once through its returned future.
pub struct RoomClient {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
    auth_token: RwLock<Option<String>>,
}

impl RoomClient {
    pub fn new(api_base_url: &str, app_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: api_base_url.trim_end_matches('/').to_string(),
            app_id: app_id.into(),
            auth_token: RwLock::new(None),
        }
    }

    /// Set the JWT for authenticated requests; `None` clears it.
    pub fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.write().unwrap() = token;
    }

    /// Fetch the list of active rooms. Entries that fail to parse are
    /// skipped rather than failing the whole call.
    pub async fn list_rooms(&self) -> Result<Vec<RoomInfo>, ApiError> {
        let body = self.send(Method::GET, "rooms", None).await?;
        Ok(parse_room_list(&body))
    }

    /// Create a room with the given channel id.
    pub async fn create_room(&self, channel_id: &str) -> Result<RoomInfo, ApiError> {
        let body = self
            .send(Method::POST, "rooms", Some(json!({"channelId": channel_id})))
            .await?;
        parse_room(&body).ok_or_else(|| ApiError::Parse("no room in response".into()))
    }

    /// Close a room by channel id.
    pub async fn close_room(&self, channel_id: &str) -> Result<(), ApiError> {
        let path = format!("rooms/{}/close", urlencoding::encode(channel_id));
        self.send(Method::POST, &path, None).await?;
        Ok(())
    }

    /// Fetch detailed information for one room.
    pub async fn room_detail(&self, channel_id: &str) -> Result<RoomInfo, ApiError> {
        let path = format!("rooms/{}", urlencoding::encode(channel_id));
        let body = self.send(Method::GET, &path, None).await?;
        parse_room(&body).ok_or_else(|| ApiError::Parse("no room in response".into()))
    }

    /// Fetch the current online user count for a room.
    pub async fn online_count(&self, channel_id: &str) -> Result<i64, ApiError> {
        let path = format!("rooms/{}/online-count", urlencoding::encode(channel_id));
        let body = self.send(Method::GET, &path, None).await?;
        parse_online_count(&body).ok_or_else(|| ApiError::Parse("no count in response".into()))
    }

    /// Fetch an RTC token for joining a channel.
    pub async fn fetch_token(
        &self,
        channel_id: &str,
        uid: &str,
        expire_hours: u32,
    ) -> Result<String, ApiError> {
        let body = self
            .send(
                Method::POST,
                "token",
                Some(json!({
                    "channelId": channel_id,
                    "uid": uid,
                    "expireHours": expire_hours,
                })),
            )
            .await?;
        parse_token(&body).ok_or_else(|| ApiError::Parse("no token in response".into()))
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        let url = format!("{}/{}", self.base_url, path);
        tracing::debug!("{method} {url}");

        let mut req = self
            .http
            .request(method, &url)
            .timeout(REQUEST_TIMEOUT)
            .header("Accept", "application/json")
            .header("X-App-Id", &self.app_id);
        if let Some(token) = self.auth_token.read().unwrap().as_deref() {
            req = req.bearer_auth(token);
        }
        if let Some(body) = &body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if status.as_u16() >= 400 {
            return Err(ApiError::Http { status: status.as_u16(), body: text });
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Parse(e.to_string()))
    }
}

/// Single-room payloads arrive under `room`, under `data`, or bare,
/// depending on the server generation.
fn parse_room(body: &Value) -> Option<RoomInfo> {
    let payload = body
        .get("room")
        .filter(|v| v.is_object())
        .or_else(|| body.get("data").filter(|v| v.is_object()))
        .unwrap_or(body);
    RoomInfo::from_value(payload)
}

/// Room lists arrive under `rooms`, under `data`, or as a bare array.
fn parse_room_list(body: &Value) -> Vec<RoomInfo> {
    let list = body
        .get("rooms")
        .and_then(Value::as_array)
        .or_else(|| body.get("data").and_then(Value::as_array))
        .or_else(|| body.as_array());
    list.map(|items| items.iter().filter_map(RoomInfo::from_value).collect())
        .unwrap_or_default()
}

fn parse_online_count(body: &Value) -> Option<i64> {
    body.get("onlineCount")
        .or_else(|| body.get("count"))
        .or_else(|| body.get("data"))
        .and_then(Value::as_i64)
}

fn parse_token(body: &Value) -> Option<String> {
    body.get("token")
        .or_else(|| body.get("data"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
