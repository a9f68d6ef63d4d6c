//! Dependency tracker
//!
//! Records that reconciling one object (the tracker) depends on the current
//! state of another (the tracked), so a change to the tracked object can
//! re-trigger the right reconciliations. Relationships expire unless renewed;
//! every normal reconcile renews the ones it still needs.
//!
//! The index is a `DashMap` keyed by tracked identity. Locking is per shard,
//! so concurrent reconciles touching unrelated objects never contend on a
//! single lock, and the sweep only holds one shard at a time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::RuntimeSettings;
use crate::models::ResourceRef;

/// Concurrent many-to-many index of who depends on what
pub struct Tracker {
    /// tracked -> (tracker -> expires_at)
    relationships: DashMap<ResourceRef, HashMap<ResourceRef, Instant>>,
    default_ttl: Duration,
}

impl Tracker {
    /// Create a tracker whose relationships live for `default_ttl` unless renewed
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            relationships: DashMap::new(),
            default_ttl,
        }
    }

    /// Tracker sized for a scheduler resyncing every `resync_interval`
    ///
    /// Relationships live for two resync periods, so one renewed on every
    /// normal cycle never lapses.
    pub fn for_resync_interval(resync_interval: Duration) -> Self {
        Self::new(resync_interval * 2)
    }

    /// Tracker using the TTL configured in `settings`
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self::new(settings.tracker_ttl())
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Record that `tracker` depends on `tracked`, using the default TTL
    pub fn track(&self, tracker: &ResourceRef, tracked: &ResourceRef) {
        self.track_with_ttl(tracker, tracked, self.default_ttl);
    }

    /// Create or refresh a relationship; re-tracking replaces the expiry
    pub fn track_with_ttl(&self, tracker: &ResourceRef, tracked: &ResourceRef, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        trace!(%tracker, %tracked, ?ttl, "tracking");
        self.relationships
            .entry(tracked.clone())
            .or_default()
            .insert(tracker.clone(), expires_at);
    }

    /// Trackers of `tracked` whose relationship has not expired
    pub fn lookup(&self, tracked: &ResourceRef) -> HashSet<ResourceRef> {
        let now = Instant::now();
        self.relationships
            .get(tracked)
            .map(|trackers| {
                trackers
                    .iter()
                    .filter(|(_, expires_at)| **expires_at > now)
                    .map(|(tracker, _)| tracker.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop every relationship held by `tracker`
    ///
    /// Used once a tracker object is gone for good.
    pub fn untrack_all(&self, tracker: &ResourceRef) {
        self.relationships.retain(|_, trackers| {
            trackers.remove(tracker);
            !trackers.is_empty()
        });
    }

    /// Remove expired relationships, returning how many were purged
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.relationships.retain(|_, trackers| {
            let before = trackers.len();
            trackers.retain(|_, expires_at| *expires_at > now);
            purged += before - trackers.len();
            !trackers.is_empty()
        });
        if purged > 0 {
            debug!(purged, "swept expired tracking relationships");
        }
        purged
    }

    /// Number of live-or-unswept relationships
    pub fn len(&self) -> usize {
        self.relationships.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweeper running at the interval configured in `settings`
    pub fn spawn_configured_sweeper(
        self: &Arc<Self>,
        settings: &RuntimeSettings,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        self.spawn_sweeper(settings.tracker_sweep_interval(), cancel)
    }

    /// Run `sweep` every `interval` until `cancel` fires
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("tracker sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        tracker.sweep();
                    }
                }
            }
        })
    }
}
