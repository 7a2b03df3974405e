//! Crash-safe persistence of the active-job set
//!
//! The whole set is rewritten as one JSON document on every lifecycle change,
//! so the file always reflects current state and restart replay needs no log
//! compaction. Restore goes through the normal start paths, which re-derives
//! encoders and ports from the current environment instead of trusting stale
//! runtime details.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{RelayError, RelayResult};
use crate::models::{HwAccelRequest, JobMode};
use crate::services::stream_supervisor::StreamSupervisor;

/// One persisted job; field names match the on-disk JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    #[serde(rename = "type")]
    pub stream_type: JobMode,
    pub channel_id: String,
    pub profile: String,
    #[serde(default = "default_hwaccel")]
    pub hwaccel: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_hwaccel() -> String {
    "auto".to_string()
}

#[derive(Debug, Clone)]
pub struct StateSnapshotter {
    path: PathBuf,
}

impl StateSnapshotter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Overwrite the snapshot file with the given records
    pub async fn save(&self, records: &[StreamRecord]) -> RelayResult<()> {
        let contents = serde_json::to_string_pretty(records)?;
        tokio::fs::write(&self.path, contents).await?;
        Ok(())
    }

    /// Load persisted records; a missing file is an empty set
    ///
    /// Records that fail to parse individually are skipped with a warning so
    /// one corrupt entry cannot block the rest of the restore.
    pub async fn load(&self) -> RelayResult<Vec<StreamRecord>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let raw: Vec<serde_json::Value> = serde_json::from_str(&contents)?;
        let mut records = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<StreamRecord>(value) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let err = RelayError::RestoreRecordInvalid(e.to_string());
                    warn!("Skipping snapshot record: {}", err);
                }
            }
        }
        Ok(records)
    }

    /// Replay persisted jobs through the supervisor's start paths
    ///
    /// Per-record failures (channel gone, profile deleted, spawn error) are
    /// logged and skipped; returns how many jobs came back.
    pub async fn restore(&self, supervisor: &StreamSupervisor) -> usize {
        let records = match self.load().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Could not read stream snapshot: {}", e);
                return 0;
            }
        };
        if records.is_empty() {
            return 0;
        }
        info!("Restoring {} persisted stream(s)", records.len());

        let mut restored = 0;
        for record in records {
            let hw = HwAccelRequest::parse(&record.hwaccel);
            let result = match record.stream_type {
                JobMode::Hls => supervisor
                    .start_transcode(&record.channel_id, &record.profile, hw)
                    .await
                    .map(|_| ()),
                JobMode::Udp => supervisor
                    .start_relay(&record.channel_id, &record.profile, hw, record.ip, record.port)
                    .await
                    .map(|_| ()),
            };
            match result {
                Ok(()) => restored += 1,
                Err(e) => warn!(
                    "Could not restore {} stream for channel {}: {}",
                    record.stream_type, record.channel_id, e
                ),
            }
        }
        info!("Restored {} stream(s)", restored);
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(mode: JobMode, channel_id: &str) -> StreamRecord {
        StreamRecord {
            stream_type: mode,
            channel_id: channel_id.to_string(),
            profile: "medium".to_string(),
            hwaccel: "auto".to_string(),
            ip: match mode {
                JobMode::Udp => Some("239.255.0.1".to_string()),
                JobMode::Hls => None,
            },
            port: match mode {
                JobMode::Udp => Some(1234),
                JobMode::Hls => None,
            },
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let snapshotter = StateSnapshotter::new(dir.path().join("active-streams.json"));
        let records = vec![record(JobMode::Hls, "1"), record(JobMode::Udp, "2")];
        snapshotter.save(&records).await.unwrap();
        let loaded = snapshotter.load().await.unwrap();
        assert_eq!(loaded, records);
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let snapshotter = StateSnapshotter::new(dir.path().join("nope.json"));
        assert!(snapshotter.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_fields_are_tolerated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("active-streams.json");
        tokio::fs::write(
            &path,
            r#"[{"type":"hls","channelId":"7","profile":"high","gpu":"legacy-field","extra":42}]"#,
        )
        .await
        .unwrap();
        let loaded = StateSnapshotter::new(path).load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].channel_id, "7");
        assert_eq!(loaded[0].hwaccel, "auto");
    }

    #[tokio::test]
    async fn invalid_records_are_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("active-streams.json");
        tokio::fs::write(
            &path,
            r#"[{"type":"hls","channelId":"1","profile":"low"},{"type":"bogus"},{"channelId":"3"}]"#,
        )
        .await
        .unwrap();
        let loaded = StateSnapshotter::new(path).load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].channel_id, "1");
    }
}
