//! Hardware encoder detection and selection
//!
//! Detection shells out to `ffmpeg -encoders` once at startup and caches the
//! result; `refresh()` re-probes on explicit request (e.g. after a driver
//! install). Selection is a pure function of the request, the cached
//! capabilities and the preference table, so it is cheap per start call.

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::{EncoderSelection, HwAccelCapabilities, HwAccelRequest, VideoCodec};
use crate::profiles::ProfileCatalog;

/// Probe whether the configured ffmpeg binary runs, returning its version
pub async fn check_ffmpeg_availability(ffmpeg_command: &str) -> (bool, Option<String>) {
    match tokio::process::Command::new(ffmpeg_command)
        .arg("-version")
        .output()
        .await
    {
        Ok(output) => {
            if output.status.success() {
                let version_output = String::from_utf8_lossy(&output.stdout);
                let version = version_output.lines().next().and_then(|line| {
                    if line.starts_with("ffmpeg version") {
                        line.split_whitespace().nth(2).map(|v| v.to_string())
                    } else {
                        None
                    }
                });
                (true, version)
            } else {
                warn!(
                    "FFmpeg command '{}' failed with status: {}",
                    ffmpeg_command, output.status
                );
                (false, None)
            }
        }
        Err(e) => {
            warn!("Failed to execute FFmpeg command '{}': {}", ffmpeg_command, e);
            (false, None)
        }
    }
}

/// Parse `ffmpeg -encoders` output into vendor capability flags
pub fn parse_encoder_capabilities(encoders_output: &str) -> HwAccelCapabilities {
    HwAccelCapabilities {
        nvidia: encoders_output.contains("h264_nvenc"),
        amd: encoders_output.contains("h264_amf"),
        intel: encoders_output.contains("h264_qsv"),
        software: encoders_output.contains("libx264"),
    }
}

/// Cached hardware capability state for the engine
pub struct HwAccelService {
    ffmpeg_command: String,
    capabilities: RwLock<HwAccelCapabilities>,
}

impl HwAccelService {
    pub fn new(ffmpeg_command: String) -> Self {
        Self::with_capabilities(ffmpeg_command, HwAccelCapabilities::default())
    }

    /// Start from known capabilities instead of probing
    pub fn with_capabilities(ffmpeg_command: String, capabilities: HwAccelCapabilities) -> Self {
        Self {
            ffmpeg_command,
            capabilities: RwLock::new(capabilities),
        }
    }

    pub async fn current(&self) -> HwAccelCapabilities {
        *self.capabilities.read().await
    }

    /// Probe the ffmpeg build and replace the cached capabilities
    pub async fn refresh(&self) -> HwAccelCapabilities {
        let detected = match tokio::process::Command::new(&self.ffmpeg_command)
            .args(["-hide_banner", "-encoders"])
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                let listing = String::from_utf8_lossy(&output.stdout);
                parse_encoder_capabilities(&listing)
            }
            Ok(output) => {
                warn!("ffmpeg -encoders exited with {}", output.status);
                HwAccelCapabilities::default()
            }
            Err(e) => {
                warn!("Failed to probe ffmpeg encoders: {}", e);
                HwAccelCapabilities::default()
            }
        };
        info!(
            "Hardware encoders: nvidia={} amd={} intel={} software={}",
            detected.nvidia, detected.amd, detected.intel, detected.software
        );
        *self.capabilities.write().await = detected;
        detected
    }
}

/// Resolve a hardware preference against detected capabilities
///
/// `auto` takes the first available of nvidia, amd, software. A specifically
/// requested vendor that is not detected resolves to software silently; that
/// is a selection-time decision and does not count as a runtime fallback.
pub fn select_encoder(
    request: HwAccelRequest,
    capabilities: HwAccelCapabilities,
    codec: VideoCodec,
    catalog: &ProfileCatalog,
) -> EncoderSelection {
    let vendor = match request {
        HwAccelRequest::Auto => {
            if capabilities.nvidia {
                "nvidia"
            } else if capabilities.amd {
                "amd"
            } else {
                "cpu"
            }
        }
        HwAccelRequest::Nvidia if capabilities.nvidia => "nvidia",
        HwAccelRequest::Amd if capabilities.amd => "amd",
        HwAccelRequest::Intel if capabilities.intel => "intel",
        HwAccelRequest::Cpu => "cpu",
        other => {
            debug!("Requested hwaccel {} not available, using software", other);
            "cpu"
        }
    };
    EncoderSelection {
        hwaccel: vendor.to_string(),
        descriptor: catalog.preference(vendor, codec).clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranscodingConfig;

    fn catalog() -> ProfileCatalog {
        ProfileCatalog::from_config(&TranscodingConfig::default())
    }

    #[test]
    fn parse_detects_vendor_encoders() {
        let listing = " V....D h264_nvenc    NVIDIA NVENC H.264 encoder\n V....D libx264    x264\n";
        let caps = parse_encoder_capabilities(listing);
        assert!(caps.nvidia);
        assert!(!caps.amd);
        assert!(caps.software);
    }

    #[test]
    fn auto_prefers_nvidia_then_amd_then_software() {
        let c = catalog();
        let all = HwAccelCapabilities {
            nvidia: true,
            amd: true,
            intel: true,
            software: true,
        };
        assert_eq!(
            select_encoder(HwAccelRequest::Auto, all, VideoCodec::H264, &c).hwaccel,
            "nvidia"
        );

        let amd_only = HwAccelCapabilities {
            amd: true,
            software: true,
            ..Default::default()
        };
        assert_eq!(
            select_encoder(HwAccelRequest::Auto, amd_only, VideoCodec::H264, &c).hwaccel,
            "amd"
        );

        let sw_only = HwAccelCapabilities {
            software: true,
            ..Default::default()
        };
        let sel = select_encoder(HwAccelRequest::Auto, sw_only, VideoCodec::H264, &c);
        assert_eq!(sel.hwaccel, "cpu");
        assert_eq!(sel.descriptor.encoder, "libx264");
    }

    #[test]
    fn missing_requested_vendor_resolves_to_software_without_fallback() {
        let c = catalog();
        let sw_only = HwAccelCapabilities {
            software: true,
            ..Default::default()
        };
        let sel = select_encoder(HwAccelRequest::Nvidia, sw_only, VideoCodec::H264, &c);
        assert_eq!(sel.hwaccel, "cpu");
        assert_eq!(sel.descriptor.encoder, "libx264");
        assert!(sel.descriptor.fallback.is_none());
    }

    #[test]
    fn hevc_selection_uses_hevc_descriptors() {
        let c = catalog();
        let amd = HwAccelCapabilities {
            amd: true,
            software: true,
            ..Default::default()
        };
        let sel = select_encoder(HwAccelRequest::Amd, amd, VideoCodec::Hevc, &c);
        assert_eq!(sel.descriptor.encoder, "hevc_amf");
        assert_eq!(
            sel.descriptor.fallback.as_ref().map(|f| f.encoder.clone()),
            Some("libx265".to_string())
        );
    }
}
