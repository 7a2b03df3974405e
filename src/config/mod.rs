//! Configuration for the tuner-relay engine
//!
//! Loaded from a TOML file; every field carries a serde default so a partial
//! file (or none at all) still yields a working configuration. Durations are
//! humantime strings ("2s", "10s") parsed at the use site.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{EncoderDescriptor, RelayProfile};

pub mod defaults;

use defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub transcoding: TranscodingConfig,
}

/// Output layout, HLS parameters and the UDP relay defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_ffmpeg_command")]
    pub ffmpeg_command: String,
    /// Root directory HLS jobs write their per-channel segment dirs under
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Snapshot file for crash-safe restart
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_hls_segment_time")]
    pub hls_segment_time: u32,
    #[serde(default = "default_hls_list_size")]
    pub hls_list_size: u32,
    /// Throughput sampling cadence
    #[serde(default = "default_throughput_interval")]
    pub throughput_interval: String,
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: usize,
    #[serde(default)]
    pub udp: UdpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpConfig {
    #[serde(default = "default_udp_ip")]
    pub default_ip: String,
    #[serde(default = "default_udp_port")]
    pub default_port: u16,
    #[serde(default = "default_udp_ttl")]
    pub ttl: u32,
    /// UDP packet size (pkt_size); 1316 is seven TS packets
    #[serde(default = "default_udp_mtu")]
    pub mtu: u32,
    /// Allocation scans up to this port before failing
    #[serde(default = "default_udp_max_port")]
    pub max_port: u16,
    /// A relay process must produce output within this window or be torn down
    #[serde(default = "default_udp_startup_timeout")]
    pub startup_timeout: String,
}

/// Profile selection and optional table overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodingConfig {
    #[serde(default = "default_profile_name")]
    pub default_profile: String,
    /// Extra or replacement profiles merged over the built-in set
    #[serde(default)]
    pub profiles: HashMap<String, RelayProfile>,
    /// Replacement entries for the hardware encoder preference table
    #[serde(default)]
    pub hwaccel_preferences: HashMap<String, EncoderDescriptor>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            ffmpeg_command: default_ffmpeg_command(),
            output_dir: default_output_dir(),
            state_file: default_state_file(),
            hls_segment_time: default_hls_segment_time(),
            hls_list_size: default_hls_list_size(),
            throughput_interval: default_throughput_interval(),
            max_concurrent_streams: default_max_concurrent_streams(),
            udp: UdpConfig::default(),
        }
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            default_ip: default_udp_ip(),
            default_port: default_udp_port(),
            ttl: default_udp_ttl(),
            mtu: default_udp_mtu(),
            max_port: default_udp_max_port(),
            startup_timeout: default_udp_startup_timeout(),
        }
    }
}

impl Default for TranscodingConfig {
    fn default() -> Self {
        Self {
            default_profile: default_profile_name(),
            profiles: HashMap::new(),
            hwaccel_preferences: HashMap::new(),
        }
    }
}

impl StreamingConfig {
    pub fn throughput_interval(&self) -> Duration {
        humantime::parse_duration(&self.throughput_interval)
            .unwrap_or_else(|_| Duration::from_secs(2))
    }
}

impl UdpConfig {
    pub fn startup_timeout(&self) -> Duration {
        humantime::parse_duration(&self.startup_timeout)
            .unwrap_or_else(|_| Duration::from_secs(10))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from_file(&config_file)
    }

    pub fn load_from_file(config_file: &str) -> Result<Self> {
        if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
            Ok(default_config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.streaming.output_dir, "streams");
        assert_eq!(config.streaming.udp.default_ip, "239.255.0.1");
        assert_eq!(config.streaming.udp.default_port, 1234);
        assert_eq!(config.streaming.udp.mtu, 1316);
        assert_eq!(config.transcoding.default_profile, "medium");
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config: Config = toml::from_str(
            r#"
            [streaming]
            output_dir = "/var/lib/tuner-relay"

            [streaming.udp]
            default_port = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.streaming.output_dir, "/var/lib/tuner-relay");
        assert_eq!(config.streaming.udp.default_port, 5000);
        assert_eq!(config.streaming.udp.default_ip, "239.255.0.1");
        assert_eq!(config.streaming.hls_segment_time, 4);
    }

    #[test]
    fn duration_strings_parse() {
        let config = Config::default();
        assert_eq!(config.streaming.throughput_interval().as_secs(), 2);
        assert_eq!(config.streaming.udp.startup_timeout().as_secs(), 10);
    }
}
