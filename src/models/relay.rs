//! Relay system models
//!
//! Data models for the FFmpeg relay engine: transcoding profiles, encoder
//! descriptors, hardware capabilities and job identity/result types.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Video codec a profile targets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Hevc,
}

impl Default for VideoCodec {
    fn default() -> Self {
        VideoCodec::H264
    }
}

/// Named transcoding profile
///
/// `passthrough: true` is a sentinel: the engine serves the upstream locator
/// directly and spawns no process for HLS starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayProfile {
    pub description: String,
    #[serde(default)]
    pub passthrough: bool,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// FFmpeg bitrate string, e.g. "2000k"
    #[serde(default)]
    pub bitrate: Option<String>,
    #[serde(default)]
    pub audio_bitrate: Option<String>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub codec: VideoCodec,
}

/// One entry of the hardware encoder preference table
///
/// Pure data: the command builder consumes these verbatim, and the optional
/// `fallback` chain drives runtime software fallback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderDescriptor {
    /// FFmpeg encoder name, e.g. "h264_nvenc"
    pub encoder: String,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub fallback: Option<Box<EncoderDescriptor>>,
}

/// Which hardware vendors (and software) the local ffmpeg build can encode with
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct HwAccelCapabilities {
    pub nvidia: bool,
    pub amd: bool,
    pub intel: bool,
    pub software: bool,
}

/// Caller's hardware preference for a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwAccelRequest {
    Auto,
    Nvidia,
    Amd,
    Intel,
    Cpu,
}

impl HwAccelRequest {
    pub fn parse(s: &str) -> Self {
        match s {
            "nvidia" => HwAccelRequest::Nvidia,
            "amd" => HwAccelRequest::Amd,
            "intel" => HwAccelRequest::Intel,
            "cpu" | "software" => HwAccelRequest::Cpu,
            _ => HwAccelRequest::Auto,
        }
    }
}

impl fmt::Display for HwAccelRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HwAccelRequest::Auto => "auto",
            HwAccelRequest::Nvidia => "nvidia",
            HwAccelRequest::Amd => "amd",
            HwAccelRequest::Intel => "intel",
            HwAccelRequest::Cpu => "cpu",
        };
        write!(f, "{s}")
    }
}

/// Outcome of encoder selection: the vendor actually used plus its descriptor
#[derive(Debug, Clone)]
pub struct EncoderSelection {
    /// Resolved vendor label ("nvidia", "amd", "intel", "cpu")
    pub hwaccel: String,
    pub descriptor: EncoderDescriptor,
}

/// Streaming mode of a job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Hls,
    Udp,
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobMode::Hls => write!(f, "hls"),
            JobMode::Udp => write!(f, "udp"),
        }
    }
}

/// Registry key: at most one job per channel per mode
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub channel_id: String,
    pub mode: JobMode,
}

impl JobKey {
    pub fn new(channel_id: impl Into<String>, mode: JobMode) -> Self {
        Self {
            channel_id: channel_id.into(),
            mode,
        }
    }
}

/// UDP output destination of a relay job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayDestination {
    pub ip: String,
    pub port: u16,
}

impl RelayDestination {
    /// Destination URL as handed to FFmpeg, including packet size and TTL
    pub fn ffmpeg_url(&self, mtu: u32, ttl: u32) -> String {
        format!("udp://@{}:{}?pkt_size={}&ttl={}", self.ip, self.port, mtu, ttl)
    }

    /// Plain destination URL for display and player use
    pub fn display_url(&self) -> String {
        format!("udp://@{}:{}", self.ip, self.port)
    }
}

/// Where a job's output goes
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutput {
    /// HLS segment directory for this channel
    HlsDir(PathBuf),
    /// UDP destination of a relay process
    Udp(RelayDestination),
    /// No process; the locator is the upstream source URL
    Passthrough(String),
}

/// Rolling throughput bookkeeping for one job
#[derive(Debug, Clone, Default)]
pub struct ThroughputState {
    pub last_bytes: u64,
    pub last_sample: Option<DateTime<Utc>>,
    pub rate_mbps: f64,
    pub total_mb: f64,
}

/// Result of a successful `start_transcode`
#[derive(Debug, Clone, Serialize)]
pub struct TranscodeStarted {
    pub channel_id: String,
    /// HLS playlist URL path, or the upstream URL for passthrough
    pub stream_url: String,
    pub profile: String,
    pub hwaccel: String,
    pub passthrough: bool,
}

/// Result of a successful `start_relay`
#[derive(Debug, Clone, Serialize)]
pub struct RelayStarted {
    pub channel_id: String,
    pub destination: RelayDestination,
    pub udp_url: String,
    pub profile: String,
    pub hwaccel: String,
}

/// One row of `list_active`
#[derive(Debug, Clone, Serialize)]
pub struct ActiveJob {
    pub channel_id: String,
    pub channel_name: String,
    pub mode: JobMode,
    pub profile: String,
    pub hwaccel: String,
    pub using_fallback: bool,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub udp_url: Option<String>,
    pub cpu_percent: Option<f32>,
    pub memory_bytes: Option<u64>,
}
