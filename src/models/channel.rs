//! Channel catalog models
//!
//! Channel identity comes from the upstream tuner import; the id is the
//! tuner-assigned channel number and stays stable across catalog refreshes.

use serde::{Deserialize, Serialize};

/// Identity and source information for one channel, as imported
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    /// Upstream locator the tuner serves this channel on
    pub source_url: String,
}

/// Live streaming status projected onto a channel by the engine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelStatus {
    pub is_active: bool,
    pub transcoding: bool,
    pub passthrough: bool,
    pub udp_streaming: bool,
    pub profile: Option<String>,
    pub selected_hwaccel: Option<String>,
    pub udp_url: Option<String>,
    /// Estimated throughput in MB/s; synthetic for passthrough and UDP jobs
    pub bandwidth_mbps: f64,
    /// Estimated cumulative output in MB
    pub total_data_mb: f64,
}

/// A catalog entry: imported identity plus the engine's status projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    #[serde(flatten)]
    pub info: ChannelInfo,
    #[serde(flatten)]
    pub status: ChannelStatus,
}

impl Channel {
    pub fn new(info: ChannelInfo) -> Self {
        Self {
            info,
            status: ChannelStatus::default(),
        }
    }
}
