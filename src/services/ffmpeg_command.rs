//! FFmpeg command construction
//!
//! Builds complete argument vectors for the three process shapes the engine
//! launches: HLS transcode, UDP transcode relay and UDP copy relay. The
//! builder only assembles strings; spawning lives in the launcher.

use std::path::Path;

use crate::config::StreamingConfig;
use crate::models::{EncoderDescriptor, RelayProfile};

const PROBE_SIZE: &str = "10000000";
const ANALYZE_DURATION: &str = "10000000";

#[derive(Debug, Clone)]
pub struct FfmpegCommandBuilder {
    hls_segment_time: u32,
    hls_list_size: u32,
}

impl FfmpegCommandBuilder {
    pub fn new(streaming: &StreamingConfig) -> Self {
        Self {
            hls_segment_time: streaming.hls_segment_time,
            hls_list_size: streaming.hls_list_size,
        }
    }

    fn add_input_args(args: &mut Vec<String>, input_url: &str) {
        args.extend(
            [
                "-hwaccel",
                "auto",
                "-probesize",
                PROBE_SIZE,
                "-analyzeduration",
                ANALYZE_DURATION,
                "-i",
                input_url,
            ]
            .map(String::from),
        );
    }

    fn add_video_args(args: &mut Vec<String>, profile: &RelayProfile, encoder: &EncoderDescriptor) {
        args.push("-c:v".to_string());
        args.push(encoder.encoder.clone());
        args.extend(encoder.extra_args.iter().cloned());
        args.push("-b:v".to_string());
        args.push(profile.bitrate.clone().unwrap_or_else(|| "2000k".to_string()));
        args.push("-s".to_string());
        args.push(format!(
            "{}x{}",
            profile.width.unwrap_or(1280),
            profile.height.unwrap_or(720)
        ));
        args.push("-r".to_string());
        args.push(profile.fps.unwrap_or(25).to_string());
    }

    fn add_audio_args(args: &mut Vec<String>, profile: &RelayProfile) {
        args.push("-c:a".to_string());
        args.push("aac".to_string());
        args.push("-b:a".to_string());
        args.push(
            profile
                .audio_bitrate
                .clone()
                .unwrap_or_else(|| "128k".to_string()),
        );
    }

    /// Arguments for an HLS transcode writing segments under `output_dir`
    pub fn hls_args(
        &self,
        input_url: &str,
        profile: &RelayProfile,
        encoder: &EncoderDescriptor,
        output_dir: &Path,
    ) -> Vec<String> {
        let mut args = Vec::new();
        Self::add_input_args(&mut args, input_url);
        Self::add_video_args(&mut args, profile, encoder);
        Self::add_audio_args(&mut args, profile);
        args.push("-f".to_string());
        args.push("hls".to_string());
        args.push("-hls_time".to_string());
        args.push(self.hls_segment_time.to_string());
        args.push("-hls_list_size".to_string());
        args.push(self.hls_list_size.to_string());
        args.push("-hls_flags".to_string());
        args.push("delete_segments".to_string());
        args.push("-hls_segment_filename".to_string());
        args.push(output_dir.join("segment_%03d.ts").to_string_lossy().into_owned());
        args.push(output_dir.join("playlist.m3u8").to_string_lossy().into_owned());
        args
    }

    /// Arguments for a UDP relay
    ///
    /// `encoder: None` selects the copy path (passthrough profile): first
    /// video and first audio stream remuxed to MPEG-TS untouched.
    pub fn udp_args(
        &self,
        input_url: &str,
        profile: &RelayProfile,
        encoder: Option<&EncoderDescriptor>,
        destination_url: &str,
    ) -> Vec<String> {
        let mut args = Vec::new();
        Self::add_input_args(&mut args, input_url);
        match encoder {
            None => {
                args.extend(
                    ["-map", "0:v", "-map", "0:a:0", "-c", "copy", "-f", "mpegts"]
                        .map(String::from),
                );
            }
            Some(encoder) => {
                args.push("-c:v".to_string());
                args.push(encoder.encoder.clone());
                if let Some(preset) = &encoder.preset {
                    args.push("-preset".to_string());
                    args.push(preset.clone());
                }
                args.extend(encoder.extra_args.iter().cloned());
                args.push("-s".to_string());
                args.push(format!(
                    "{}x{}",
                    profile.width.unwrap_or(1280),
                    profile.height.unwrap_or(720)
                ));
                args.push("-b:v".to_string());
                args.push(profile.bitrate.clone().unwrap_or_else(|| "2000k".to_string()));
                Self::add_audio_args(&mut args, profile);
                args.push("-f".to_string());
                args.push("mpegts".to_string());
            }
        }
        args.push(destination_url.to_string());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranscodingConfig;
    use crate::models::VideoCodec;
    use crate::profiles::ProfileCatalog;
    use std::path::PathBuf;

    fn builder() -> FfmpegCommandBuilder {
        FfmpegCommandBuilder::new(&StreamingConfig::default())
    }

    fn catalog() -> ProfileCatalog {
        ProfileCatalog::from_config(&TranscodingConfig::default())
    }

    #[test]
    fn hls_args_have_expected_shape() {
        let c = catalog();
        let profile = c.get("medium").unwrap();
        let encoder = c.preference("cpu", VideoCodec::H264);
        let dir = PathBuf::from("/tmp/streams/42");
        let args = builder().hls_args("http://src/42", profile, encoder, &dir);

        let joined = args.join(" ");
        assert!(joined.starts_with("-hwaccel auto -probesize 10000000"));
        assert!(joined.contains("-i http://src/42"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-b:v 2000k"));
        assert!(joined.contains("-s 1280x720"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-f hls"));
        assert!(joined.contains("-hls_time 4"));
        assert!(joined.contains("-hls_list_size 10"));
        assert!(joined.contains("-hls_flags delete_segments"));
        assert!(joined.contains("/tmp/streams/42/segment_%03d.ts"));
        assert_eq!(args.last().unwrap(), "/tmp/streams/42/playlist.m3u8");
    }

    #[test]
    fn udp_copy_args_remux_without_encoding() {
        let c = catalog();
        let profile = c.get("passthrough").unwrap();
        let args = builder().udp_args(
            "http://src/42",
            profile,
            None,
            "udp://@239.255.0.1:1234?pkt_size=1316&ttl=1",
        );
        let joined = args.join(" ");
        assert!(joined.contains("-map 0:v -map 0:a:0 -c copy -f mpegts"));
        assert!(!joined.contains("-c:v"));
        assert_eq!(
            args.last().unwrap(),
            "udp://@239.255.0.1:1234?pkt_size=1316&ttl=1"
        );
    }

    #[test]
    fn udp_transcode_args_carry_preset_and_encoder() {
        let c = catalog();
        let profile = c.get("high").unwrap();
        let encoder = c.preference("nvidia", VideoCodec::H264).clone();
        let args = builder().udp_args(
            "http://src/7",
            profile,
            Some(&encoder),
            "udp://@239.255.0.2:1240?pkt_size=1316&ttl=1",
        );
        let joined = args.join(" ");
        assert!(joined.contains("-c:v h264_nvenc"));
        assert!(joined.contains("-preset fast"));
        assert!(joined.contains("-gpu 0 -rc cbr"));
        assert!(joined.contains("-s 1920x1080"));
        assert!(joined.contains("-f mpegts"));
    }
}
