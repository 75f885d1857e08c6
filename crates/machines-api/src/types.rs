use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{Error, Result};

// ── Requests ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct StartMachineRequest {
    pub challenge_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TerminateMachinesRequest {
    pub machine_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptRequest {
    pub challenge_id: i64,
    pub submission: String,
}

// ── Envelope ────────────────────────────────────────────────────────

/// Response body shared by every platform endpoint.
///
/// `success` is absent on framework-generated error pages (`abort(404)`),
/// which are treated as a rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<BackendErrors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackendErrors {
    Message(String),
    List(Vec<String>),
    Fields(serde_json::Map<String, Value>),
}

impl BackendErrors {
    pub fn to_message(&self) -> String {
        match self {
            Self::Message(m) => m.clone(),
            Self::List(items) => items.join("; "),
            Self::Fields(fields) => fields
                .iter()
                .map(|(field, v)| match v {
                    Value::String(s) => format!("{field}: {s}"),
                    Value::Array(items) => {
                        let joined: Vec<String> = items
                            .iter()
                            .map(|i| i.as_str().map_or_else(|| i.to_string(), str::to_string))
                            .collect();
                        format!("{field}: {}", joined.join(", "))
                    }
                    other => format!("{field}: {other}"),
                })
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

/// How a host should treat a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Accepted,
    Rejected,
    RateLimited,
    Unauthorized,
}

/// Any HTTP response the platform produced, whatever its status code.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Envelope,
}

impl Reply {
    pub fn new(status: StatusCode, body: Envelope) -> Self {
        Self { status, body }
    }

    /// Build a reply from a raw JSON body, as the gateway does.
    pub fn from_json(status: StatusCode, body: Value, endpoint: &'static str) -> Result<Self> {
        let body = serde_json::from_value(body).map_err(|source| Error::Decode { endpoint, source })?;
        Ok(Self { status, body })
    }

    /// 2xx and `success: true`.
    pub fn is_success(&self) -> bool {
        self.status.is_success() && self.body.success
    }

    pub fn kind(&self) -> ReplyKind {
        match self.status {
            StatusCode::TOO_MANY_REQUESTS => ReplyKind::RateLimited,
            StatusCode::FORBIDDEN => ReplyKind::Unauthorized,
            _ if self.is_success() => ReplyKind::Accepted,
            _ => ReplyKind::Rejected,
        }
    }

    /// Best human-readable reason the backend gave, if any.
    pub fn error_message(&self) -> Option<String> {
        if let Some(errors) = &self.body.errors {
            let msg = errors.to_message();
            if !msg.is_empty() {
                return Some(msg);
            }
        }
        if let Some(msg) = &self.body.message {
            return Some(msg.clone());
        }
        self.body
            .data
            .as_ref()
            .and_then(|d| d.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Decode the `data` member.
    pub fn data<T: DeserializeOwned>(&self, endpoint: &'static str) -> Result<T> {
        let data = self.body.data.clone().ok_or(Error::MissingData { endpoint })?;
        serde_json::from_value(data).map_err(|source| Error::Decode { endpoint, source })
    }
}

// ── Machines ────────────────────────────────────────────────────────

/// One row of the platform's machine log as returned by start/status.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineLog {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub chall_id: Option<i64>,
    /// 0 = stopped, 1 = running, 2 = stopped with network resources pending cleanup.
    #[serde(default)]
    pub status: Option<i32>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub time_str: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "de_timestamp")]
    pub time_end: DateTime<Utc>,
    /// JSON-encoded [`MachineDetail`].
    pub detail: String,
}

impl MachineLog {
    pub fn decode_detail(&self) -> Result<MachineDetail> {
        MachineDetail::decode(&self.detail)
    }
}

/// Runtime description of a provisioned task, carried string-encoded in `detail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDetail {
    pub last_status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_arn: Option<String>,
    #[serde(default)]
    pub public_ip: String,
    #[serde(default)]
    pub containers: Vec<ContainerDetail>,
}

impl MachineDetail {
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(Error::Detail)
    }

    pub fn is_running(&self) -> bool {
        self.last_status == TaskStatus::Running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Provisioning,
    Pending,
    Activating,
    Running,
    Deactivating,
    Stopping,
    Deprovisioning,
    Stopped,
    Deleted,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDetail {
    pub name: String,
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub host_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

// ── Timestamps ──────────────────────────────────────────────────────

/// Parse an ISO8601 timestamp. Values without an offset are UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>().ok().map(|n| n.and_utc())
}

fn de_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

fn de_opt_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
        None => Ok(None),
    }
}
