//! Engine services

pub mod ffmpeg_command;
pub mod ffmpeg_launcher;
pub mod port_allocator;
pub mod state_snapshot;
pub mod stream_supervisor;
pub mod throughput_monitor;

pub use ffmpeg_command::FfmpegCommandBuilder;
pub use ffmpeg_launcher::{FfmpegLauncher, LaunchedJob, ProcessEvent, ProcessLauncher};
pub use port_allocator::PortAllocator;
pub use state_snapshot::{StateSnapshotter, StreamRecord};
pub use stream_supervisor::StreamSupervisor;
pub use throughput_monitor::ThroughputMonitor;
