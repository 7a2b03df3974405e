//! Transcoding profile catalog and encoder preference table
//!
//! Profiles pair a name with output parameters; `passthrough` is a sentinel
//! profile that serves the upstream stream untouched. Config may add or
//! override entries, but the built-in set cannot be removed.

use std::collections::HashMap;

use crate::config::TranscodingConfig;
use crate::errors::{RelayError, RelayResult};
use crate::models::{EncoderDescriptor, RelayProfile, VideoCodec};

/// Names seeded at startup; protected from removal
const BUILTIN_PROFILES: &[&str] = &[
    "passthrough",
    "hevc_hd",
    "hevc_fhd",
    "h264_hd",
    "h264_fhd",
    "low",
    "medium",
    "high",
];

fn profile(
    description: &str,
    width: u32,
    height: u32,
    bitrate: &str,
    audio_bitrate: &str,
    fps: u32,
    codec: VideoCodec,
) -> RelayProfile {
    RelayProfile {
        description: description.to_string(),
        passthrough: false,
        width: Some(width),
        height: Some(height),
        bitrate: Some(bitrate.to_string()),
        audio_bitrate: Some(audio_bitrate.to_string()),
        fps: Some(fps),
        codec,
    }
}

fn builtin_profiles() -> HashMap<String, RelayProfile> {
    let mut profiles = HashMap::new();
    profiles.insert(
        "passthrough".to_string(),
        RelayProfile {
            description: "Direct passthrough without transcoding".to_string(),
            passthrough: true,
            width: None,
            height: None,
            bitrate: None,
            audio_bitrate: None,
            fps: None,
            codec: VideoCodec::H264,
        },
    );
    profiles.insert(
        "hevc_hd".to_string(),
        profile(
            "HEVC HD 720p - 3.5MB/s max bitrate",
            1280,
            720,
            "3500k",
            "128k",
            25,
            VideoCodec::Hevc,
        ),
    );
    profiles.insert(
        "hevc_fhd".to_string(),
        profile(
            "HEVC FHD 1080p - 4MB/s max bitrate",
            1920,
            1080,
            "4000k",
            "192k",
            30,
            VideoCodec::Hevc,
        ),
    );
    profiles.insert(
        "h264_hd".to_string(),
        profile(
            "H.264 HD 720p - 3.5MB/s max bitrate",
            1280,
            720,
            "3500k",
            "128k",
            25,
            VideoCodec::H264,
        ),
    );
    profiles.insert(
        "h264_fhd".to_string(),
        profile(
            "H.264 FHD 1080p - 4MB/s max bitrate",
            1920,
            1080,
            "4000k",
            "192k",
            30,
            VideoCodec::H264,
        ),
    );
    profiles.insert(
        "low".to_string(),
        profile("SD 480p", 640, 480, "800k", "96k", 25, VideoCodec::H264),
    );
    profiles.insert(
        "medium".to_string(),
        profile("HD 720p", 1280, 720, "2000k", "128k", 25, VideoCodec::H264),
    );
    profiles.insert(
        "high".to_string(),
        profile("FHD 1080p", 1920, 1080, "3500k", "192k", 30, VideoCodec::H264),
    );
    profiles
}

fn descriptor(
    encoder: &str,
    preset: &str,
    extra_args: &[&str],
    fallback: Option<EncoderDescriptor>,
) -> EncoderDescriptor {
    EncoderDescriptor {
        encoder: encoder.to_string(),
        preset: Some(preset.to_string()),
        extra_args: extra_args.iter().map(|s| s.to_string()).collect(),
        fallback: fallback.map(Box::new),
    }
}

fn builtin_preferences() -> HashMap<String, EncoderDescriptor> {
    let mut prefs = HashMap::new();
    prefs.insert(
        "nvidia".to_string(),
        descriptor(
            "h264_nvenc",
            "fast",
            &["-gpu", "0", "-rc", "cbr"],
            Some(descriptor("libx264", "fast", &["-threads", "0"], None)),
        ),
    );
    prefs.insert(
        "nvidia_hevc".to_string(),
        descriptor(
            "hevc_nvenc",
            "medium",
            &["-gpu", "0", "-rc", "cbr", "-profile:v", "main"],
            Some(descriptor(
                "libx265",
                "medium",
                &["-threads", "0", "-x265-params", "pools=+,-"],
                None,
            )),
        ),
    );
    prefs.insert(
        "amd".to_string(),
        descriptor(
            "h264_amf",
            "quality",
            &[
                "-usage",
                "transcoding",
                "-quality",
                "quality",
                "-rc",
                "cqp",
                "-qp_i",
                "23",
                "-qp_p",
                "25",
                "-profile:v",
                "high",
                "-level",
                "4.1",
            ],
            Some(descriptor(
                "libx264",
                "medium",
                &["-threads", "0", "-crf", "23"],
                None,
            )),
        ),
    );
    prefs.insert(
        "amd_hevc".to_string(),
        descriptor(
            "hevc_amf",
            "quality",
            &[
                "-usage",
                "transcoding",
                "-quality",
                "quality",
                "-rc",
                "cqp",
                "-qp_i",
                "28",
                "-qp_p",
                "30",
                "-profile:v",
                "main",
            ],
            Some(descriptor(
                "libx265",
                "medium",
                &["-threads", "0", "-crf", "28"],
                None,
            )),
        ),
    );
    prefs.insert(
        "intel".to_string(),
        descriptor(
            "h264_qsv",
            "fast",
            &["-look_ahead", "1"],
            Some(descriptor("libx264", "fast", &["-threads", "0"], None)),
        ),
    );
    prefs.insert(
        "cpu".to_string(),
        descriptor("libx264", "fast", &["-threads", "0"], None),
    );
    prefs.insert(
        "cpu_hevc".to_string(),
        descriptor("libx265", "medium", &["-threads", "0", "-crf", "28"], None),
    );
    prefs
}

/// Named profiles plus the per-vendor encoder preference table
#[derive(Debug, Clone)]
pub struct ProfileCatalog {
    profiles: HashMap<String, RelayProfile>,
    preferences: HashMap<String, EncoderDescriptor>,
    default_profile: String,
    // Terminal fallback if config wipes out even the software entries
    software_default: EncoderDescriptor,
}

impl ProfileCatalog {
    /// Built-in tables with config entries merged over them
    pub fn from_config(config: &TranscodingConfig) -> Self {
        let mut profiles = builtin_profiles();
        for (name, p) in &config.profiles {
            profiles.insert(name.clone(), p.clone());
        }
        let mut preferences = builtin_preferences();
        for (vendor, d) in &config.hwaccel_preferences {
            preferences.insert(vendor.clone(), d.clone());
        }
        Self {
            profiles,
            preferences,
            default_profile: config.default_profile.clone(),
            software_default: descriptor("libx264", "fast", &["-threads", "0"], None),
        }
    }

    pub fn get(&self, name: &str) -> RelayResult<&RelayProfile> {
        self.profiles
            .get(name)
            .ok_or_else(|| RelayError::ProfileNotFound(name.to_string()))
    }

    pub fn default_profile(&self) -> &str {
        &self.default_profile
    }

    pub fn list(&self) -> Vec<(String, RelayProfile)> {
        let mut entries: Vec<_> = self
            .profiles
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn upsert(&mut self, name: String, profile: RelayProfile) {
        self.profiles.insert(name, profile);
    }

    /// Remove a user-defined profile; built-ins are protected
    pub fn remove(&mut self, name: &str) -> RelayResult<RelayProfile> {
        if BUILTIN_PROFILES.contains(&name) {
            return Err(RelayError::ProfileProtected(name.to_string()));
        }
        self.profiles
            .remove(name)
            .ok_or_else(|| RelayError::ProfileNotFound(name.to_string()))
    }

    /// Preference table entry for a vendor and codec
    ///
    /// HEVC resolves through the `*_hevc` entries; a vendor with no HEVC
    /// entry falls through to software HEVC.
    pub fn preference(&self, vendor: &str, codec: VideoCodec) -> &EncoderDescriptor {
        let key = match codec {
            VideoCodec::H264 => vendor.to_string(),
            VideoCodec::Hevc => format!("{vendor}_hevc"),
        };
        if let Some(d) = self.preferences.get(&key) {
            return d;
        }
        let software_key = match codec {
            VideoCodec::H264 => "cpu",
            VideoCodec::Hevc => "cpu_hevc",
        };
        // Both software entries are always present in the built-in table
        self.preferences
            .get(software_key)
            .unwrap_or(&self.software_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ProfileCatalog {
        ProfileCatalog::from_config(&TranscodingConfig::default())
    }

    #[test]
    fn builtin_profiles_present() {
        let c = catalog();
        assert!(c.get("passthrough").unwrap().passthrough);
        let hd = c.get("h264_hd").unwrap();
        assert_eq!(hd.width, Some(1280));
        assert_eq!(hd.bitrate.as_deref(), Some("3500k"));
        assert_eq!(c.get("hevc_fhd").unwrap().codec, VideoCodec::Hevc);
    }

    #[test]
    fn unknown_profile_is_an_error() {
        assert!(matches!(
            catalog().get("does-not-exist"),
            Err(RelayError::ProfileNotFound(_))
        ));
    }

    #[test]
    fn builtins_cannot_be_removed() {
        let mut c = catalog();
        assert!(matches!(
            c.remove("passthrough"),
            Err(RelayError::ProfileProtected(_))
        ));
        c.upsert("custom".to_string(), c.get("low").unwrap().clone());
        assert!(c.remove("custom").is_ok());
    }

    #[test]
    fn hevc_preference_uses_hevc_table() {
        let c = catalog();
        assert_eq!(c.preference("amd", VideoCodec::Hevc).encoder, "hevc_amf");
        assert_eq!(c.preference("amd", VideoCodec::H264).encoder, "h264_amf");
        // Vendor without a HEVC entry falls through to software HEVC
        assert_eq!(c.preference("intel", VideoCodec::Hevc).encoder, "libx265");
    }

    #[test]
    fn config_profiles_override_builtins() {
        let mut tc = TranscodingConfig::default();
        tc.profiles.insert(
            "medium".to_string(),
            RelayProfile {
                description: "tweaked".to_string(),
                passthrough: false,
                width: Some(960),
                height: Some(540),
                bitrate: Some("1500k".to_string()),
                audio_bitrate: Some("128k".to_string()),
                fps: Some(25),
                codec: VideoCodec::H264,
            },
        );
        let c = ProfileCatalog::from_config(&tc);
        assert_eq!(c.get("medium").unwrap().width, Some(960));
    }
}
