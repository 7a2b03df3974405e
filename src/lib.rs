//! tuner-relay: per-channel FFmpeg stream lifecycle orchestration
//!
//! The engine turns channels from an upstream tuner into HLS transcodes,
//! UDP relays or direct passthrough streams, supervising one ffmpeg process
//! per job with hardware encoder selection, automatic software fallback and
//! crash-safe state persistence.

pub mod catalog;
pub mod config;
pub mod errors;
pub mod events;
pub mod hwaccel;
pub mod models;
pub mod profiles;
pub mod services;
