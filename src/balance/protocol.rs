//! JSON exchanged with scheduling clients.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use super::ServerBalanceInfo;
use crate::constants::DEFAULT_LOCATION;
use crate::SchemaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ScheduleErrorCode {
    Success = 0,
    NoServerAvailable = 1,
    InvalidRequest = 2,
    SchedulerStopped = 3,
    QueueFull = 4,
}

impl ScheduleErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleErrorCode::Success => "success",
            ScheduleErrorCode::NoServerAvailable => "no server available",
            ScheduleErrorCode::InvalidRequest => "invalid request",
            ScheduleErrorCode::SchedulerStopped => "scheduler stopped",
            ScheduleErrorCode::QueueFull => "request queue full",
        }
    }

    /// Metric label, the numeric code
    pub fn label(self) -> &'static str {
        match self {
            ScheduleErrorCode::Success => "0",
            ScheduleErrorCode::NoServerAvailable => "1",
            ScheduleErrorCode::InvalidRequest => "2",
            ScheduleErrorCode::SchedulerStopped => "3",
            ScheduleErrorCode::QueueFull => "4",
        }
    }
}

impl fmt::Display for ScheduleErrorCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ScheduleErrorCode> for i32 {
    fn from(code: ScheduleErrorCode) -> Self {
        code as i32
    }
}

impl TryFrom<i32> for ScheduleErrorCode {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ScheduleErrorCode::Success),
            1 => Ok(ScheduleErrorCode::NoServerAvailable),
            2 => Ok(ScheduleErrorCode::InvalidRequest),
            3 => Ok(ScheduleErrorCode::SchedulerStopped),
            4 => Ok(ScheduleErrorCode::QueueFull),
            other => Err(format!("unknown schedule error code {}", other)),
        }
    }
}

/// Client location. Missing fields mean `default`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    #[serde(default = "default_location")]
    pub cluster_name: String,
    #[serde(default = "default_location")]
    pub zone_id: String,
    #[serde(default = "default_location")]
    pub city_id: String,
}

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

impl Default for ScheduleRequest {
    fn default() -> Self {
        Self {
            cluster_name: default_location(),
            zone_id: default_location(),
            city_id: default_location(),
        }
    }
}

impl ScheduleRequest {
    pub fn new(
        cluster_name: impl Into<String>,
        zone_id: impl Into<String>,
        city_id: impl Into<String>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            zone_id: zone_id.into(),
            city_id: city_id.into(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, SchemaError> {
        let mut request: ScheduleRequest = serde_json::from_str(raw)?;
        for field in [&mut request.cluster_name, &mut request.zone_id, &mut request.city_id] {
            if field.is_empty() {
                *field = default_location();
            }
        }
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEndpoint {
    /// `ip:port`
    pub endpoint: String,
    pub zone_id: String,
    pub city_id: String,
    pub cluster_name: String,
    /// Load weight, higher is better
    pub nice: f64,
}

impl From<&ServerBalanceInfo> for ScheduledEndpoint {
    fn from(server: &ServerBalanceInfo) -> Self {
        Self {
            endpoint: server.endpoint(),
            zone_id: server.zone_id.clone(),
            city_id: server.city_id.clone(),
            cluster_name: server.cluster_name.clone(),
            nice: server.load_weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleResponse {
    pub cluster_list: Vec<ScheduledEndpoint>,
    pub error_code: ScheduleErrorCode,
    pub error_message: String,
}

impl ScheduleResponse {
    pub fn success(cluster_list: Vec<ScheduledEndpoint>) -> Self {
        Self {
            cluster_list,
            error_code: ScheduleErrorCode::Success,
            error_message: ScheduleErrorCode::Success.as_str().to_string(),
        }
    }

    pub fn error(
        code: ScheduleErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            cluster_list: Vec::new(),
            error_code: code,
            error_message: message.into(),
        }
    }

    pub fn stopped() -> Self {
        Self::error(ScheduleErrorCode::SchedulerStopped, ScheduleErrorCode::SchedulerStopped.as_str())
    }

    pub fn is_success(&self) -> bool {
        self.error_code == ScheduleErrorCode::Success
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
