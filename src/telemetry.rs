//! Telemetry aggregator
//!
//! Counts piece events from the engine and samples its counters once per
//! tick into an immutable [`SwarmSnapshot`], published over a watch
//! channel. Readers never see a half-updated value.

use crate::engine::{Engine, EngineEvent};
use crate::models::{PeerSnapshot, SwarmCounters, SwarmSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Default sampling period
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Monotonic counters fed by engine events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PieceTally {
    pub verified: u64,
    pub invalid: u64,
    pub hotswaps: u64,
    percent: u8,
}

impl PieceTally {
    pub fn apply(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::Verify(_) => self.verified += 1,
            EngineEvent::InvalidPiece(_) => self.invalid += 1,
            EngineEvent::Hotswap => self.hotswaps += 1,
            _ => {}
        }
    }

    /// floor(verified / total * 100). Holds the previous value when the
    /// piece total is unknown or zero, and never goes backwards.
    pub fn percent(&mut self, pieces_total: Option<u32>) -> u8 {
        if let Some(total) = pieces_total.filter(|t| *t > 0) {
            let pct = (self.verified.saturating_mul(100) / total as u64).min(100) as u8;
            self.percent = self.percent.max(pct);
        }
        self.percent
    }

    /// Build a snapshot from the tally and one counter reading
    pub fn sample(
        &mut self,
        counters: SwarmCounters,
        peers: Vec<PeerSnapshot>,
        pieces_total: Option<u32>,
    ) -> SwarmSnapshot {
        SwarmSnapshot {
            peers_total: counters.peers_total,
            peers_active: counters.peers_active,
            bytes_downloaded: counters.downloaded,
            bytes_uploaded: counters.uploaded,
            download_rate: counters.download_rate,
            upload_rate: counters.upload_rate,
            queue_depth: counters.queue_depth,
            pieces_verified: self.verified,
            pieces_invalid: self.invalid,
            hotswaps: self.hotswaps,
            pieces_total,
            percent_complete: self.percent(pieces_total),
            metadata_ready: true,
            peers,
        }
    }
}

fn read(engine: &dyn Engine, tally: &mut PieceTally) -> SwarmSnapshot {
    tally.sample(engine.counters(), engine.peers(), engine.piece_count())
}

/// Running aggregator. Dropping it stops sampling.
pub struct Telemetry {
    snapshots: watch::Receiver<Arc<SwarmSnapshot>>,
    task: JoinHandle<()>,
}

impl Telemetry {
    /// Start sampling `engine` every `interval`. The first snapshot is
    /// taken before this returns.
    pub fn spawn(
        engine: Arc<dyn Engine>,
        mut events: mpsc::Receiver<EngineEvent>,
        interval: Duration,
    ) -> Self {
        let mut tally = PieceTally::default();
        let (tx, rx) = watch::channel(Arc::new(read(engine.as_ref(), &mut tally)));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            let mut events_open = true;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = read(engine.as_ref(), &mut tally);
                        tracing::trace!(
                            downloaded = snapshot.bytes_downloaded,
                            verified = snapshot.pieces_verified,
                            percent = snapshot.percent_complete,
                            "telemetry sample"
                        );
                        if tx.send(Arc::new(snapshot)).is_err() {
                            break;
                        }
                    }
                    event = events.recv(), if events_open => match event {
                        Some(event) => tally.apply(&event),
                        None => events_open = false,
                    },
                }
            }
        });

        Self {
            snapshots: rx,
            task,
        }
    }

    pub fn latest(&self) -> Arc<SwarmSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SwarmSnapshot>> {
        self.snapshots.clone()
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_counts_independently() {
        let mut tally = PieceTally::default();
        tally.apply(&EngineEvent::Verify(0));
        tally.apply(&EngineEvent::Verify(1));
        tally.apply(&EngineEvent::InvalidPiece(2));
        tally.apply(&EngineEvent::Hotswap);
        tally.apply(&EngineEvent::Interested);
        assert_eq!(tally.verified, 2);
        assert_eq!(tally.invalid, 1);
        assert_eq!(tally.hotswaps, 1);
    }

    #[test]
    fn test_percent_floors() {
        let mut tally = PieceTally::default();
        for i in 0..2 {
            tally.apply(&EngineEvent::Verify(i));
        }
        assert_eq!(tally.percent(Some(3)), 66);
    }

    #[test]
    fn test_percent_holds_without_total() {
        let mut tally = PieceTally::default();
        tally.apply(&EngineEvent::Verify(0));
        assert_eq!(tally.percent(None), 0);
        assert_eq!(tally.percent(Some(4)), 25);
        assert_eq!(tally.percent(Some(0)), 25);
        assert_eq!(tally.percent(None), 25);
    }

    #[test]
    fn test_sample_copies_counters() {
        let mut tally = PieceTally::default();
        let snapshot = tally.sample(
            SwarmCounters {
                downloaded: 400,
                uploaded: 10,
                download_rate: 12.6,
                upload_rate: 0.0,
                peers_total: 5,
                peers_active: 2,
                queue_depth: 3,
            },
            vec![],
            Some(10),
        );
        assert_eq!(snapshot.bytes_downloaded, 400);
        assert_eq!(snapshot.peers_total, 5);
        assert_eq!(snapshot.peers_active, 2);
        assert_eq!(snapshot.queue_depth, 3);
        assert_eq!(snapshot.percent_complete, 0);
    }
}
