//! In-memory channel catalog with the engine's status projection
//!
//! Channel identity arrives from the playlist import collaborator via
//! `replace_all`; ids are the tuner's channel numbers and survive refreshes.
//! The engine writes per-channel streaming status here, and the display layer
//! reads the combined view back out.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::{RelayError, RelayResult};
use crate::events::{EventBus, LifecycleEvent};
use crate::models::{Channel, ChannelInfo, ChannelStatus};

pub struct ChannelCatalog {
    channels: RwLock<HashMap<String, Channel>>,
    events: EventBus,
}

impl ChannelCatalog {
    pub fn new(events: EventBus) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Replace the catalog with a fresh import
    ///
    /// Status projections are preserved for channels that survive the
    /// refresh. Returns the ids of channels that disappeared so the caller
    /// can withdraw their jobs.
    pub async fn replace_all(&self, imported: Vec<ChannelInfo>) -> Vec<String> {
        let mut channels = self.channels.write().await;
        let mut next: HashMap<String, Channel> = HashMap::with_capacity(imported.len());
        for info in imported {
            let status = channels
                .get(&info.id)
                .map(|existing| existing.status.clone())
                .unwrap_or_default();
            next.insert(info.id.clone(), Channel { info, status });
        }
        let removed: Vec<String> = channels
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        debug!(
            "Catalog refresh: {} channels, {} removed",
            next.len(),
            removed.len()
        );
        let count = next.len();
        *channels = next;
        drop(channels);
        self.events
            .publish(LifecycleEvent::CatalogChanged { channel_count: count });
        removed
    }

    pub async fn get(&self, channel_id: &str) -> Option<ChannelInfo> {
        self.channels
            .read()
            .await
            .get(channel_id)
            .map(|c| c.info.clone())
    }

    pub async fn require(&self, channel_id: &str) -> RelayResult<ChannelInfo> {
        self.get(channel_id)
            .await
            .ok_or_else(|| RelayError::ChannelNotFound(channel_id.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }

    /// Mutate a channel's status projection in place
    pub async fn update_status<F>(&self, channel_id: &str, update: F)
    where
        F: FnOnce(&mut ChannelStatus),
    {
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get_mut(channel_id) {
            update(&mut channel.status);
        }
    }

    /// Full catalog view, ordered by channel number where ids are numeric
    pub async fn snapshot(&self) -> Vec<Channel> {
        let channels = self.channels.read().await;
        let mut all: Vec<Channel> = channels.values().cloned().collect();
        all.sort_by(|a, b| {
            match (a.info.id.parse::<u32>(), b.info.id.parse::<u32>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => a.info.id.cmp(&b.info.id),
            }
        });
        all
    }

    /// Plain-text listing of active channels with their stream locators
    ///
    /// Passthrough channels list the upstream URL directly; transcoded ones
    /// list the HLS playlist under `base_url`; UDP relays add their plain
    /// destination URL on a following line.
    pub async fn export_active(&self, base_url: &str) -> String {
        let mut out = String::new();
        for channel in self.snapshot().await {
            if !channel.status.is_active {
                continue;
            }
            out.push_str(&format!("\"{}\"\n", channel.info.name));
            if channel.status.passthrough {
                out.push_str(&format!("{}\n", channel.info.source_url));
            } else if channel.status.transcoding {
                out.push_str(&format!(
                    "{}/streams/{}/playlist.m3u8\n",
                    base_url.trim_end_matches('/'),
                    channel.info.id
                ));
            }
            if let Some(udp_url) = &channel.status.udp_url {
                out.push_str(&format!("{udp_url}\n"));
            }
            out.push('\n');
        }
        if out.is_empty() {
            out.push_str("No active streams found.\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str, name: &str) -> ChannelInfo {
        ChannelInfo {
            id: id.to_string(),
            name: name.to_string(),
            logo: None,
            group: None,
            source_url: format!("http://tuner.local:9981/stream/channelnumber/{id}"),
        }
    }

    #[tokio::test]
    async fn refresh_preserves_status_for_surviving_channels() {
        let catalog = ChannelCatalog::new(EventBus::new());
        catalog.replace_all(vec![info("1", "One"), info("2", "Two")]).await;
        catalog
            .update_status("1", |s| {
                s.is_active = true;
                s.transcoding = true;
            })
            .await;

        let removed = catalog.replace_all(vec![info("1", "One"), info("3", "Three")]).await;
        assert_eq!(removed, vec!["2".to_string()]);

        let snapshot = catalog.snapshot().await;
        let one = snapshot.iter().find(|c| c.info.id == "1").unwrap();
        assert!(one.status.transcoding);
        assert!(catalog.get("2").await.is_none());
    }

    #[tokio::test]
    async fn require_reports_missing_channels() {
        let catalog = ChannelCatalog::new(EventBus::new());
        assert!(matches!(
            catalog.require("99").await,
            Err(RelayError::ChannelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn export_lists_active_channels_only() {
        let catalog = ChannelCatalog::new(EventBus::new());
        catalog.replace_all(vec![info("1", "One"), info("2", "Two")]).await;
        catalog
            .update_status("1", |s| {
                s.is_active = true;
                s.passthrough = true;
            })
            .await;

        let listing = catalog.export_active("http://relay.local:8080").await;
        assert!(listing.contains("\"One\""));
        assert!(listing.contains("channelnumber/1"));
        assert!(!listing.contains("\"Two\""));
    }
}
