//! Identity and rotation record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A proxy egress candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub name: String,
    /// Scheme://host:port as handed to the browser.
    pub url: String,
}

impl ProxyEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// One browser-fingerprint profile plus its egress proxy. In-memory
/// only; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Monotonic fingerprint id; rotation allocates previous + 1.
    pub profile_id: u64,
    /// Browser user-data directory derived from the profile id.
    pub user_data_dir: String,
    pub current_proxy: Option<ProxyEndpoint>,
    pub detections_used_today: u32,
    pub verification_failures: u32,
    pub last_switched_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(profile_id: u64) -> Self {
        Self {
            profile_id,
            user_data_dir: user_data_dir_for(profile_id),
            current_proxy: None,
            detections_used_today: 0,
            verification_failures: 0,
            last_switched_at: Utc::now(),
        }
    }
}

pub(crate) fn user_data_dir_for(profile_id: u64) -> String {
    format!("profile_{profile_id}")
}

/// Which rotation strategy produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMethod {
    Initial,
    ControllerApi,
    SystemProxyCycle,
    CandidateList,
    ProfileSwitch,
}

impl std::fmt::Display for RotationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::ControllerApi => "controller_api",
            Self::SystemProxyCycle => "system_proxy_cycle",
            Self::CandidateList => "candidate_list",
            Self::ProfileSwitch => "profile_switch",
        };
        write!(f, "{s}")
    }
}

/// One rotation observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationEntry {
    pub at: DateTime<Utc>,
    pub method: RotationMethod,
    pub proxy: Option<String>,
    pub observed_ip: Option<String>,
    pub ip_changed: bool,
}

/// Aggregate rotation statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationStats {
    pub total_switches: u64,
    pub unique_ips: usize,
    pub history_len: usize,
    pub last_switch_at: Option<DateTime<Utc>>,
}
