use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    // running on the default origin because discovery failed
    Degraded,
}

#[derive(Debug, Serialize)]
pub struct OriginHealth {
    pub base_url: String,
    pub schedule_url: String,
    pub from_fallback: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub version: String,
    pub environment: String,
    pub origin: OriginHealth,
    // includes expired entries nobody has asked for yet
    pub cached_streams: usize,
}
