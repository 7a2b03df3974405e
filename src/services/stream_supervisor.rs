//! Stream job supervision
//!
//! One registry holds every active job, keyed by `(channel_id, mode)`; HLS
//! transcodes and UDP relays share the same lifecycle machinery. Process
//! events arrive on a per-job channel and are consumed serially, carrying the
//! launch generation token so events from a replaced or stopped process are
//! recognized as stale and ignored. That makes stop/exit convergence
//! idempotent without any reference counting.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::ChannelCatalog;
use crate::config::{StreamingConfig, UdpConfig};
use crate::errors::{RelayError, RelayResult};
use crate::events::{EventBus, LifecycleEvent};
use crate::hwaccel::{HwAccelService, select_encoder};
use crate::models::{
    ActiveJob, EncoderSelection, HwAccelRequest, JobKey, JobMode, JobOutput, RelayDestination,
    RelayProfile, RelayStarted, ThroughputState, TranscodeStarted,
};
use crate::profiles::ProfileCatalog;
use crate::services::ffmpeg_command::FfmpegCommandBuilder;
use crate::services::ffmpeg_launcher::{ProcessEvent, ProcessLauncher};
use crate::services::port_allocator::PortAllocator;
use crate::services::state_snapshot::{StateSnapshotter, StreamRecord};

/// Relay processes start in `Starting` and move to `Running` on their first
/// diagnostic line; the watchdog only fires while `Starting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobPhase {
    Starting,
    Running,
}

struct JobEntry {
    profile_name: String,
    profile: RelayProfile,
    requested_hwaccel: HwAccelRequest,
    selection: Option<EncoderSelection>,
    using_fallback: bool,
    generation: Uuid,
    pid: Option<u32>,
    cancel: Option<CancellationToken>,
    started_at: DateTime<Utc>,
    source_url: String,
    output: JobOutput,
    throughput: ThroughputState,
    phase: JobPhase,
}

impl JobEntry {
    fn hwaccel_label(&self) -> String {
        match &self.selection {
            Some(sel) => sel.hwaccel.clone(),
            None => "copy".to_string(),
        }
    }
}

struct Inner {
    jobs: RwLock<HashMap<JobKey, JobEntry>>,
    catalog: Arc<ChannelCatalog>,
    profiles: RwLock<ProfileCatalog>,
    hwaccel: Arc<HwAccelService>,
    launcher: Arc<dyn ProcessLauncher>,
    allocator: PortAllocator,
    builder: FfmpegCommandBuilder,
    snapshotter: StateSnapshotter,
    events: EventBus,
    streaming: StreamingConfig,
    udp: UdpConfig,
    system: Mutex<System>,
}

#[derive(Clone)]
pub struct StreamSupervisor {
    inner: Arc<Inner>,
}

impl StreamSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        streaming: StreamingConfig,
        profiles: ProfileCatalog,
        catalog: Arc<ChannelCatalog>,
        hwaccel: Arc<HwAccelService>,
        launcher: Arc<dyn ProcessLauncher>,
        snapshotter: StateSnapshotter,
        events: EventBus,
    ) -> Self {
        let udp = streaming.udp.clone();
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(HashMap::new()),
                catalog,
                profiles: RwLock::new(profiles),
                hwaccel,
                launcher,
                allocator: PortAllocator::new(&udp),
                builder: FfmpegCommandBuilder::new(&streaming),
                snapshotter,
                events,
                streaming,
                udp,
                system: Mutex::new(System::new()),
            }),
        }
    }

    pub fn catalog(&self) -> Arc<ChannelCatalog> {
        self.inner.catalog.clone()
    }

    pub fn events(&self) -> EventBus {
        self.inner.events.clone()
    }

    // ---- profile administration ----

    pub async fn list_profiles(&self) -> Vec<(String, RelayProfile)> {
        self.inner.profiles.read().await.list()
    }

    pub async fn upsert_profile(&self, name: String, profile: RelayProfile) {
        self.inner.profiles.write().await.upsert(name, profile);
    }

    pub async fn remove_profile(&self, name: &str) -> RelayResult<RelayProfile> {
        self.inner.profiles.write().await.remove(name)
    }

    // ---- catalog refresh ----

    /// Replace the channel catalog; jobs for vanished channels are stopped
    pub async fn refresh_catalog(&self, imported: Vec<crate::models::ChannelInfo>) {
        let removed = self.inner.catalog.replace_all(imported).await;
        for channel_id in removed {
            self.stop_transcode(&channel_id).await;
            self.stop_relay(&channel_id).await;
        }
    }

    // ---- lifecycle operations ----

    /// Start (or replace) the HLS transcode for a channel
    pub async fn start_transcode(
        &self,
        channel_id: &str,
        profile_name: &str,
        hw: HwAccelRequest,
    ) -> RelayResult<TranscodeStarted> {
        let channel = self.inner.catalog.require(channel_id).await?;
        let profile = self.inner.profiles.read().await.get(profile_name)?.clone();
        let key = JobKey::new(channel_id, JobMode::Hls);

        if profile.passthrough {
            // No process: the channel is served straight from the tuner
            info!(
                "Starting passthrough for channel {} ({})",
                channel_id, channel.name
            );
            let entry = JobEntry {
                profile_name: profile_name.to_string(),
                profile,
                requested_hwaccel: hw,
                selection: None,
                using_fallback: false,
                generation: Uuid::new_v4(),
                pid: None,
                cancel: None,
                started_at: Utc::now(),
                source_url: channel.source_url.clone(),
                output: JobOutput::Passthrough(channel.source_url.clone()),
                throughput: ThroughputState::default(),
                phase: JobPhase::Running,
            };
            self.replace_job(key, entry).await;
            self.inner
                .catalog
                .update_status(channel_id, |s| {
                    s.is_active = true;
                    s.passthrough = true;
                    s.transcoding = false;
                    s.profile = Some(profile_name.to_string());
                    s.selected_hwaccel = None;
                })
                .await;
            self.inner.events.publish(LifecycleEvent::JobStarted {
                channel_id: channel_id.to_string(),
                mode: JobMode::Hls,
                profile: profile_name.to_string(),
                hwaccel: "none".to_string(),
            });
            self.write_snapshot().await;
            return Ok(TranscodeStarted {
                channel_id: channel_id.to_string(),
                stream_url: channel.source_url,
                profile: profile_name.to_string(),
                hwaccel: "none".to_string(),
                passthrough: true,
            });
        }

        let capabilities = self.inner.hwaccel.current().await;
        let selection = {
            let profiles = self.inner.profiles.read().await;
            select_encoder(hw, capabilities, profile.codec, &profiles)
        };
        info!(
            "Starting transcode for channel {} profile={} encoder={} ({})",
            channel_id, profile_name, selection.descriptor.encoder, selection.hwaccel
        );

        let output_dir = PathBuf::from(&self.inner.streaming.output_dir).join(channel_id);
        tokio::fs::create_dir_all(&output_dir).await?;

        let args =
            self.inner
                .builder
                .hls_args(&channel.source_url, &profile, &selection.descriptor, &output_dir);
        debug!("ffmpeg args: {}", args.join(" "));
        let launched = self.inner.launcher.launch(&args).await?;

        let generation = Uuid::new_v4();
        let entry = JobEntry {
            profile_name: profile_name.to_string(),
            profile,
            requested_hwaccel: hw,
            selection: Some(selection.clone()),
            using_fallback: false,
            generation,
            pid: launched.pid,
            cancel: Some(launched.cancel.clone()),
            started_at: Utc::now(),
            source_url: channel.source_url.clone(),
            output: JobOutput::HlsDir(output_dir),
            throughput: ThroughputState::default(),
            phase: JobPhase::Running,
        };
        self.replace_job(key.clone(), entry).await;
        self.spawn_event_pump(key, generation, launched.events, None);

        self.inner
            .catalog
            .update_status(channel_id, |s| {
                s.is_active = true;
                s.transcoding = true;
                s.passthrough = false;
                s.profile = Some(profile_name.to_string());
                s.selected_hwaccel = Some(selection.hwaccel.clone());
            })
            .await;
        self.inner.events.publish(LifecycleEvent::JobStarted {
            channel_id: channel_id.to_string(),
            mode: JobMode::Hls,
            profile: profile_name.to_string(),
            hwaccel: selection.hwaccel.clone(),
        });
        self.write_snapshot().await;

        Ok(TranscodeStarted {
            channel_id: channel_id.to_string(),
            stream_url: format!("/streams/{channel_id}/playlist.m3u8"),
            profile: profile_name.to_string(),
            hwaccel: selection.hwaccel,
            passthrough: false,
        })
    }

    /// Stop the HLS job for a channel; `false` when none was running
    pub async fn stop_transcode(&self, channel_id: &str) -> bool {
        self.stop_job(&JobKey::new(channel_id, JobMode::Hls)).await
    }

    /// Start (or replace) the UDP relay for a channel
    pub async fn start_relay(
        &self,
        channel_id: &str,
        profile_name: &str,
        hw: HwAccelRequest,
        requested_ip: Option<String>,
        requested_port: Option<u16>,
    ) -> RelayResult<RelayStarted> {
        let channel = self.inner.catalog.require(channel_id).await?;
        let profile = self.inner.profiles.read().await.get(profile_name)?.clone();
        let key = JobKey::new(channel_id, JobMode::Udp);

        let in_use = self.udp_destinations_excluding(channel_id).await;
        let destination =
            self.inner
                .allocator
                .allocate(requested_ip.as_deref(), requested_port, &in_use)?;
        let ffmpeg_url = destination.ffmpeg_url(self.inner.udp.mtu, self.inner.udp.ttl);

        let selection = if profile.passthrough {
            None
        } else {
            let capabilities = self.inner.hwaccel.current().await;
            let profiles = self.inner.profiles.read().await;
            Some(select_encoder(hw, capabilities, profile.codec, &profiles))
        };
        info!(
            "Starting UDP relay for channel {} ({}) -> {}",
            channel_id,
            channel.name,
            destination.display_url()
        );

        let args = self.inner.builder.udp_args(
            &channel.source_url,
            &profile,
            selection.as_ref().map(|s| &s.descriptor),
            &ffmpeg_url,
        );
        debug!("ffmpeg args: {}", args.join(" "));
        let launched = self.inner.launcher.launch(&args).await?;

        let generation = Uuid::new_v4();
        let hwaccel_label = selection
            .as_ref()
            .map(|s| s.hwaccel.clone())
            .unwrap_or_else(|| "copy".to_string());
        let entry = JobEntry {
            profile_name: profile_name.to_string(),
            profile,
            requested_hwaccel: hw,
            selection,
            using_fallback: false,
            generation,
            pid: launched.pid,
            cancel: Some(launched.cancel.clone()),
            started_at: Utc::now(),
            source_url: channel.source_url.clone(),
            output: JobOutput::Udp(destination.clone()),
            throughput: ThroughputState::default(),
            phase: JobPhase::Starting,
        };
        self.replace_job(key.clone(), entry).await;
        self.spawn_event_pump(
            key,
            generation,
            launched.events,
            Some(self.inner.udp.startup_timeout()),
        );

        let udp_url = destination.display_url();
        self.inner
            .catalog
            .update_status(channel_id, |s| {
                s.is_active = true;
                s.udp_streaming = true;
                s.udp_url = Some(udp_url.clone());
                s.profile = Some(profile_name.to_string());
            })
            .await;
        self.inner.events.publish(LifecycleEvent::JobStarted {
            channel_id: channel_id.to_string(),
            mode: JobMode::Udp,
            profile: profile_name.to_string(),
            hwaccel: hwaccel_label.clone(),
        });
        self.write_snapshot().await;

        Ok(RelayStarted {
            channel_id: channel_id.to_string(),
            udp_url,
            destination,
            profile: profile_name.to_string(),
            hwaccel: hwaccel_label,
        })
    }

    /// Stop the UDP relay for a channel; `false` when none was running
    pub async fn stop_relay(&self, channel_id: &str) -> bool {
        self.stop_job(&JobKey::new(channel_id, JobMode::Udp)).await
    }

    /// Start a job of the given mode for every channel in the catalog
    ///
    /// Per-channel failures are collected, not fatal; returns how many
    /// started plus the failures.
    pub async fn start_all(
        &self,
        mode: JobMode,
        profile_name: &str,
        hw: HwAccelRequest,
    ) -> (usize, Vec<(String, RelayError)>) {
        let channels = self.inner.catalog.snapshot().await;
        let mut started = 0;
        let mut failures = Vec::new();
        for ch in channels {
            let result = match mode {
                JobMode::Hls => self
                    .start_transcode(&ch.info.id, profile_name, hw)
                    .await
                    .map(|_| ()),
                JobMode::Udp => self
                    .start_relay(&ch.info.id, profile_name, hw, None, None)
                    .await
                    .map(|_| ()),
            };
            match result {
                Ok(()) => started += 1,
                Err(e) => {
                    warn!("Could not start {} for channel {}: {}", mode, ch.info.id, e);
                    failures.push((ch.info.id, e));
                }
            }
        }
        (started, failures)
    }

    /// Stop every job, or every job of one mode; returns how many stopped
    pub async fn stop_all(&self, mode: Option<JobMode>) -> usize {
        let keys: Vec<JobKey> = {
            let jobs = self.inner.jobs.read().await;
            jobs.keys()
                .filter(|k| mode.is_none_or(|m| k.mode == m))
                .cloned()
                .collect()
        };
        let mut stopped = 0;
        for key in keys {
            if self.stop_job(&key).await {
                stopped += 1;
            }
        }
        stopped
    }

    /// Active jobs, optionally filtered by mode, with process metrics
    pub async fn list_active(&self, mode: Option<JobMode>) -> Vec<ActiveJob> {
        let rows: Vec<(JobKey, String, String, bool, Option<u32>, DateTime<Utc>, Option<String>)> = {
            let jobs = self.inner.jobs.read().await;
            jobs.iter()
                .filter(|(k, _)| mode.is_none_or(|m| k.mode == m))
                .map(|(k, j)| {
                    let udp_url = match &j.output {
                        JobOutput::Udp(dest) => Some(dest.display_url()),
                        _ => None,
                    };
                    (
                        k.clone(),
                        j.profile_name.clone(),
                        j.hwaccel_label(),
                        j.using_fallback,
                        j.pid,
                        j.started_at,
                        udp_url,
                    )
                })
                .collect()
        };

        let mut out = Vec::with_capacity(rows.len());
        let now = Utc::now();
        for (key, profile, hwaccel, using_fallback, pid, started_at, udp_url) in rows {
            let channel_name = self
                .inner
                .catalog
                .get(&key.channel_id)
                .await
                .map(|c| c.name)
                .unwrap_or_default();
            let (cpu_percent, memory_bytes) = self.process_metrics(pid).await;
            out.push(ActiveJob {
                channel_id: key.channel_id,
                channel_name,
                mode: key.mode,
                profile,
                hwaccel,
                using_fallback,
                pid,
                started_at,
                uptime_seconds: (now - started_at).num_seconds(),
                udp_url,
                cpu_percent,
                memory_bytes,
            });
        }
        out.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        out
    }

    // ---- internals ----

    async fn process_metrics(&self, pid: Option<u32>) -> (Option<f32>, Option<u64>) {
        let Some(pid) = pid else {
            return (None, None);
        };
        let mut system = self.inner.system.lock().await;
        let sys_pid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        match system.process(sys_pid) {
            Some(process) => (Some(process.cpu_usage()), Some(process.memory())),
            None => (None, None),
        }
    }

    async fn udp_destinations_excluding(&self, channel_id: &str) -> Vec<RelayDestination> {
        let jobs = self.inner.jobs.read().await;
        jobs.iter()
            .filter(|(k, _)| k.mode == JobMode::Udp && k.channel_id != channel_id)
            .filter_map(|(_, j)| match &j.output {
                JobOutput::Udp(dest) => Some(dest.clone()),
                _ => None,
            })
            .collect()
    }

    /// Insert a job, cancelling any process the old holder had
    async fn replace_job(&self, key: JobKey, entry: JobEntry) {
        let previous = {
            let mut jobs = self.inner.jobs.write().await;
            let previous = jobs.insert(key.clone(), entry);
            if jobs.len() > self.inner.streaming.max_concurrent_streams {
                warn!(
                    "{} active jobs exceeds configured limit of {}",
                    jobs.len(),
                    self.inner.streaming.max_concurrent_streams
                );
            }
            previous
        };
        if let Some(previous) = previous {
            debug!(
                "Replacing existing {} job for channel {}",
                key.mode, key.channel_id
            );
            if let Some(cancel) = previous.cancel {
                cancel.cancel();
            }
        }
    }

    async fn stop_job(&self, key: &JobKey) -> bool {
        let removed = self.inner.jobs.write().await.remove(key);
        let Some(entry) = removed else {
            return false;
        };
        info!("Stopping {} job for channel {}", key.mode, key.channel_id);
        if let Some(cancel) = entry.cancel {
            cancel.cancel();
        }
        self.clear_status(key).await;
        self.inner.events.publish(LifecycleEvent::JobStopped {
            channel_id: key.channel_id.clone(),
            mode: key.mode,
        });
        self.write_snapshot().await;
        true
    }

    /// Reset the status projection for one mode, keeping the other alive
    async fn clear_status(&self, key: &JobKey) {
        let other_mode = match key.mode {
            JobMode::Hls => JobMode::Udp,
            JobMode::Udp => JobMode::Hls,
        };
        let other_active = self
            .inner
            .jobs
            .read()
            .await
            .contains_key(&JobKey::new(&key.channel_id, other_mode));
        let mode = key.mode;
        self.inner
            .catalog
            .update_status(&key.channel_id, |s| {
                match mode {
                    JobMode::Hls => {
                        s.transcoding = false;
                        s.passthrough = false;
                        s.selected_hwaccel = None;
                    }
                    JobMode::Udp => {
                        s.udp_streaming = false;
                        s.udp_url = None;
                    }
                }
                s.is_active = other_active;
                if !other_active {
                    s.profile = None;
                    s.bandwidth_mbps = 0.0;
                    s.total_data_mb = 0.0;
                }
            })
            .await;
    }

    fn spawn_event_pump(
        &self,
        key: JobKey,
        generation: Uuid,
        events: tokio::sync::mpsc::Receiver<ProcessEvent>,
        watchdog: Option<Duration>,
    ) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.pump_events(key, generation, events, watchdog).await;
        });
    }

    async fn pump_events(
        self,
        key: JobKey,
        generation: Uuid,
        mut events: tokio::sync::mpsc::Receiver<ProcessEvent>,
        watchdog: Option<Duration>,
    ) {
        let mut awaiting_start = watchdog.is_some();
        loop {
            let event = match (awaiting_start, watchdog) {
                (true, Some(limit)) => match timeout(limit, events.recv()).await {
                    Ok(event) => event,
                    Err(_) => {
                        self.handle_startup_timeout(&key, generation).await;
                        return;
                    }
                },
                _ => events.recv().await,
            };
            match event {
                Some(ProcessEvent::Diagnostic(line)) => {
                    if awaiting_start {
                        awaiting_start = false;
                        self.mark_running(&key, generation).await;
                    }
                    self.handle_diagnostic(&key, generation, &line).await;
                }
                Some(ProcessEvent::Exited(code)) => {
                    self.handle_exit(&key, generation, code).await;
                    return;
                }
                None => return,
            }
        }
    }

    async fn mark_running(&self, key: &JobKey, generation: Uuid) {
        let mut jobs = self.inner.jobs.write().await;
        if let Some(entry) = jobs.get_mut(key)
            && entry.generation == generation
        {
            entry.phase = JobPhase::Running;
        }
    }

    async fn handle_startup_timeout(&self, key: &JobKey, generation: Uuid) {
        let entry = {
            let mut jobs = self.inner.jobs.write().await;
            let matches = matches!(
                jobs.get(key),
                Some(e) if e.generation == generation && e.phase == JobPhase::Starting
            );
            if !matches {
                return;
            }
            jobs.remove(key)
        };
        let Some(entry) = entry else { return };
        error!(
            "Startup timeout for {} job on channel {}, tearing down",
            key.mode, key.channel_id
        );
        if let Some(cancel) = entry.cancel {
            cancel.cancel();
        }
        self.clear_status(key).await;
        self.inner.events.publish(LifecycleEvent::JobFailed {
            channel_id: key.channel_id.clone(),
            mode: key.mode,
            reason: "startup timeout".to_string(),
        });
        self.write_snapshot().await;
    }

    /// Encoder failure signatures that warrant a software relaunch
    fn needs_fallback(line: &str, active_encoder: &str) -> bool {
        (line.contains(active_encoder)
            && (line.contains("not found") || line.contains("Failed to initialize")))
            || (line.contains("Unknown encoder")
                && (line.contains("amf") || line.contains("nvenc")))
            || line.contains("No such filter")
    }

    async fn handle_diagnostic(&self, key: &JobKey, generation: Uuid, line: &str) {
        let (active_encoder, can_fall_back) = {
            let jobs = self.inner.jobs.read().await;
            match jobs.get(key) {
                Some(entry) if entry.generation == generation => match &entry.selection {
                    Some(sel) => (
                        sel.descriptor.encoder.clone(),
                        !entry.using_fallback && sel.descriptor.fallback.is_some(),
                    ),
                    None => return,
                },
                _ => return,
            }
        };

        if !Self::needs_fallback(line, &active_encoder) {
            return;
        }

        if can_fall_back {
            self.relaunch_with_fallback(key, generation).await;
        } else {
            self.teardown_failed(key, generation, &active_encoder).await;
        }
    }

    /// Kill the failing process and relaunch with the software descriptor
    async fn relaunch_with_fallback(&self, key: &JobKey, generation: Uuid) {
        // Build the new command from a consistent view of the entry
        let (args, old_cancel, fallback) = {
            let jobs = self.inner.jobs.read().await;
            let Some(entry) = jobs.get(key) else { return };
            if entry.generation != generation || entry.using_fallback {
                return;
            }
            let Some(selection) = &entry.selection else {
                return;
            };
            let Some(fallback) = selection.descriptor.fallback.as_deref() else {
                return;
            };
            let args = match &entry.output {
                JobOutput::HlsDir(dir) => {
                    self.inner
                        .builder
                        .hls_args(&entry.source_url, &entry.profile, fallback, dir)
                }
                JobOutput::Udp(dest) => self.inner.builder.udp_args(
                    &entry.source_url,
                    &entry.profile,
                    Some(fallback),
                    &dest.ffmpeg_url(self.inner.udp.mtu, self.inner.udp.ttl),
                ),
                JobOutput::Passthrough(_) => return,
            };
            (args, entry.cancel.clone(), fallback.clone())
        };

        warn!(
            "Encoder failed for {} job on channel {}, falling back to {}",
            key.mode, key.channel_id, fallback.encoder
        );
        if let Some(cancel) = old_cancel {
            cancel.cancel();
        }

        let launched = match self.inner.launcher.launch(&args).await {
            Ok(launched) => launched,
            Err(e) => {
                error!("Fallback relaunch failed for channel {}: {}", key.channel_id, e);
                self.teardown_failed(key, generation, &fallback.encoder).await;
                return;
            }
        };

        let new_generation = Uuid::new_v4();
        let rearm_watchdog = {
            let mut jobs = self.inner.jobs.write().await;
            match jobs.get_mut(key) {
                Some(entry) if entry.generation == generation => {
                    entry.generation = new_generation;
                    entry.pid = launched.pid;
                    entry.cancel = Some(launched.cancel.clone());
                    entry.using_fallback = true;
                    if let Some(selection) = &mut entry.selection {
                        selection.hwaccel = "cpu".to_string();
                        selection.descriptor = fallback.clone();
                    }
                    // Relays go back to Starting so the watchdog re-arms
                    if key.mode == JobMode::Udp {
                        entry.phase = JobPhase::Starting;
                        true
                    } else {
                        false
                    }
                }
                _ => {
                    // Job was stopped while we relaunched; reap the orphan
                    launched.cancel.cancel();
                    return;
                }
            }
        };

        self.inner
            .catalog
            .update_status(&key.channel_id, |s| {
                if key.mode == JobMode::Hls {
                    s.selected_hwaccel = Some("cpu".to_string());
                }
            })
            .await;
        self.spawn_event_pump(
            key.clone(),
            new_generation,
            launched.events,
            rearm_watchdog.then(|| self.inner.udp.startup_timeout()),
        );
    }

    /// Second failure: remove the job without another retry
    async fn teardown_failed(&self, key: &JobKey, generation: Uuid, encoder: &str) {
        let entry = {
            let mut jobs = self.inner.jobs.write().await;
            let matches = matches!(jobs.get(key), Some(e) if e.generation == generation);
            if !matches {
                return;
            }
            jobs.remove(key)
        };
        let Some(entry) = entry else { return };
        let err = RelayError::EncoderFallbackExhausted {
            channel_id: key.channel_id.clone(),
            encoder: encoder.to_string(),
        };
        error!("{} job on channel {} failed: {}", key.mode, key.channel_id, err);
        if let Some(cancel) = entry.cancel {
            cancel.cancel();
        }
        self.clear_status(key).await;
        self.inner.events.publish(LifecycleEvent::JobFailed {
            channel_id: key.channel_id.clone(),
            mode: key.mode,
            reason: err.to_string(),
        });
        self.write_snapshot().await;
    }

    async fn handle_exit(&self, key: &JobKey, generation: Uuid, code: Option<i32>) {
        let removed = {
            let mut jobs = self.inner.jobs.write().await;
            let matches = matches!(jobs.get(key), Some(e) if e.generation == generation);
            matches && jobs.remove(key).is_some()
        };
        if !removed {
            debug!(
                "Ignoring stale exit (code {:?}) for {} job on channel {}",
                code, key.mode, key.channel_id
            );
            return;
        }
        info!(
            "{} job for channel {} exited with code {:?}",
            key.mode, key.channel_id, code
        );
        self.clear_status(key).await;
        self.inner.events.publish(LifecycleEvent::JobStopped {
            channel_id: key.channel_id.clone(),
            mode: key.mode,
        });
        self.write_snapshot().await;
    }

    /// Graceful shutdown: persist the active set, then kill everything
    ///
    /// The snapshot is written before the registry is drained so the next
    /// boot restores these jobs; the per-stop persistence path is bypassed
    /// on purpose, it would leave an empty file behind.
    pub async fn shutdown(&self) {
        self.write_snapshot().await;
        let entries: Vec<JobEntry> = {
            let mut jobs = self.inner.jobs.write().await;
            jobs.drain().map(|(_, entry)| entry).collect()
        };
        info!("Shutting down {} active job(s)", entries.len());
        for entry in entries {
            if let Some(cancel) = entry.cancel {
                cancel.cancel();
            }
        }
    }

    // ---- persistence ----

    async fn snapshot_records(&self) -> Vec<StreamRecord> {
        let jobs = self.inner.jobs.read().await;
        jobs.iter()
            .map(|(key, entry)| {
                let (ip, port) = match &entry.output {
                    JobOutput::Udp(dest) => (Some(dest.ip.clone()), Some(dest.port)),
                    _ => (None, None),
                };
                StreamRecord {
                    stream_type: key.mode,
                    channel_id: key.channel_id.clone(),
                    profile: entry.profile_name.clone(),
                    hwaccel: entry.requested_hwaccel.to_string(),
                    ip,
                    port,
                }
            })
            .collect()
    }

    /// Persist the active-job set; failures are logged, not fatal
    pub async fn write_snapshot(&self) {
        let records = self.snapshot_records().await;
        if let Err(e) = self.inner.snapshotter.save(&records).await {
            warn!("Failed to write stream snapshot: {}", e);
        }
    }

    // ---- throughput sampling ----

    /// One sampling pass over every active job
    ///
    /// HLS jobs measure real segment output on disk. Passthrough and UDP
    /// jobs have no files to measure, so they carry a synthetic estimate.
    pub async fn sample_throughput(&self) {
        use rand::Rng;

        let keys: Vec<JobKey> = self.inner.jobs.read().await.keys().cloned().collect();
        let now = Utc::now();

        for key in keys {
            let dir = {
                let jobs = self.inner.jobs.read().await;
                match jobs.get(&key) {
                    Some(entry) => match &entry.output {
                        JobOutput::HlsDir(dir) => Some(dir.clone()),
                        _ => None,
                    },
                    None => continue,
                }
            };

            let update = match dir {
                Some(dir) => match directory_size(&dir).await {
                    Ok(bytes) => Some(ThroughputSample::Measured(bytes)),
                    Err(e) => {
                        debug!("Skipping throughput sample for {}: {}", key.channel_id, e);
                        None
                    }
                },
                None => {
                    let rate = rand::rng().random_range(8.0..15.0);
                    Some(ThroughputSample::Synthetic(rate))
                }
            };
            let Some(update) = update else { continue };

            let (rate_mbps, total_mb) = {
                let mut jobs = self.inner.jobs.write().await;
                let Some(entry) = jobs.get_mut(&key) else {
                    continue;
                };
                let elapsed = entry
                    .throughput
                    .last_sample
                    .map(|t| (now - t).num_milliseconds() as f64 / 1000.0)
                    .unwrap_or(0.0);
                match update {
                    ThroughputSample::Measured(bytes) => {
                        let delta = bytes.saturating_sub(entry.throughput.last_bytes) as f64;
                        let rate = if elapsed > 0.0 {
                            (delta / elapsed / 1_000_000.0).max(0.0)
                        } else {
                            0.0
                        };
                        entry.throughput.last_bytes = bytes;
                        entry.throughput.rate_mbps = rate;
                        entry.throughput.total_mb = bytes as f64 / 1_000_000.0;
                    }
                    ThroughputSample::Synthetic(rate) => {
                        entry.throughput.rate_mbps = rate;
                        entry.throughput.total_mb += rate * elapsed;
                    }
                }
                entry.throughput.last_sample = Some(now);
                (entry.throughput.rate_mbps, entry.throughput.total_mb)
            };

            self.inner
                .catalog
                .update_status(&key.channel_id, |s| {
                    s.bandwidth_mbps = rate_mbps;
                    s.total_data_mb = total_mb;
                })
                .await;
            self.inner.events.publish(LifecycleEvent::ThroughputUpdated {
                channel_id: key.channel_id.clone(),
                mode: key.mode,
                rate_mbps,
                total_mb,
            });
        }
    }
}

enum ThroughputSample {
    Measured(u64),
    Synthetic(f64),
}

async fn directory_size(dir: &std::path::Path) -> std::io::Result<u64> {
    let mut total = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}
