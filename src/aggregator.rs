//! Time windowed scan aggregation.
//!
//! The aggregator decodes every [`ScanEvent`] with a [`LayoutSet`], merges
//! repeated sightings of the same beacon inside a window and emits one
//! snapshot of distinct beacons per window. Events, window expiry and the stop
//! signal are multiplexed into one loop, which is the only place the window is
//! mutated.

use crate::beacon::Beacon;
use crate::codec::LayoutSet;
use crate::scanner::ScanEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Distinct beacons seen during one window, in first-seen order.
pub type Snapshot = Vec<Beacon>;

/// Channel buffer size for emitted snapshots.
pub const SNAPSHOT_CHANNEL_BUFFER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Length of each aggregation window.
    pub window: Duration,
    /// Emit the partial window when stopped instead of discarding it.
    pub flush_on_stop: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            window: Duration::from_secs(1),
            flush_on_stop: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Idle,
    Windowing,
}

/// Beacons accumulated in the current window.
#[derive(Debug, Default)]
pub struct Window {
    beacons: Vec<Beacon>,
}

impl Window {
    /// Add a sighting. A beacon already in the window (same device and ids)
    /// only gains an RSSI sample; otherwise `beacon` joins the window.
    pub fn record(&mut self, mut beacon: Beacon, rssi: i8) {
        match self.beacons.iter_mut().find(|b| b.same_beacon(&beacon)) {
            Some(existing) => existing.add_rssi_sample(rssi),
            None => {
                beacon.add_rssi_sample(rssi);
                self.beacons.push(beacon);
            }
        }
    }

    /// Take the accumulated beacons, leaving the window empty.
    pub fn take(&mut self) -> Snapshot {
        std::mem::take(&mut self.beacons)
    }

    pub fn beacons(&self) -> &[Beacon] {
        &self.beacons
    }

    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }
}

/// Aggregates scan events into per-window beacon snapshots.
#[derive(Debug)]
pub struct ScanAggregator {
    layouts: Arc<LayoutSet>,
    config: AggregatorConfig,
    state: AggregatorState,
    window: Window,
}

/// Handle to an aggregator running on its own task.
#[derive(Debug)]
pub struct AggregatorHandle {
    pub snapshots: mpsc::Receiver<Snapshot>,
    pub stop: CancellationToken,
    pub task: JoinHandle<()>,
}

impl AggregatorHandle {
    /// Signal the aggregator to stop and wait for it to finish. Snapshots not
    /// yet received are dropped.
    pub async fn shutdown(self) {
        let AggregatorHandle {
            snapshots,
            stop,
            task,
        } = self;
        drop(snapshots);
        stop.cancel();
        if let Err(e) = task.await {
            warn!(error = %e, "Aggregator task failed");
        }
    }
}

impl ScanAggregator {
    pub fn new(layouts: impl Into<Arc<LayoutSet>>, config: AggregatorConfig) -> Self {
        ScanAggregator {
            layouts: layouts.into(),
            config,
            state: AggregatorState::Idle,
            window: Window::default(),
        }
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Decode one event and record it in the current window. Events no layout
    /// accepts are dropped.
    pub fn process_event(&mut self, event: &ScanEvent) {
        let Some(mut beacon) = self.layouts.parse(&event.bytes) else {
            trace!(device = %event.device, len = event.bytes.len(), "Dropped undecodable advertisement");
            return;
        };
        beacon.device.clone_from(&event.device);
        self.window.record(beacon, event.rssi);
    }

    /// Run on a new task, returning the snapshot receiver and stop token.
    pub fn spawn(self, events: mpsc::Receiver<ScanEvent>) -> AggregatorHandle {
        self.spawn_with_stop(events, CancellationToken::new())
    }

    /// Like [`spawn`](Self::spawn) but stopping on an existing token.
    pub fn spawn_with_stop(
        mut self,
        events: mpsc::Receiver<ScanEvent>,
        stop: CancellationToken,
    ) -> AggregatorHandle {
        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_BUFFER_SIZE);
        let task_stop = stop.clone();
        let task = tokio::spawn(async move {
            self.run(events, tx, task_stop).await;
        });
        AggregatorHandle {
            snapshots: rx,
            stop,
            task,
        }
    }

    /// Aggregate `events` until `stop` is cancelled or the event source
    /// closes, sending one snapshot per elapsed window to `snapshots`.
    ///
    /// The stop signal is checked before anything else on every iteration, so
    /// events still queued when it fires are dropped. The in-progress window
    /// is discarded on stop unless `flush_on_stop` is set. If the snapshot
    /// receiver goes away the loop ends, since nobody is left to observe it.
    pub async fn run(
        &mut self,
        mut events: mpsc::Receiver<ScanEvent>,
        snapshots: mpsc::Sender<Snapshot>,
        stop: CancellationToken,
    ) {
        let window = self.config.window;
        self.window.take();
        self.state = AggregatorState::Windowing;
        info!(?window, layouts = self.layouts.len(), "Aggregator started");

        let timer = sleep(window);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    debug!(pending = self.window.len(), "Stop requested");
                    self.finish(&snapshots, &stop).await;
                    break;
                }
                _ = &mut timer => {
                    let snapshot = self.window.take();
                    debug!(beacons = snapshot.len(), "Window closed");
                    match deliver(&snapshots, &stop, snapshot).await {
                        Delivery::Sent => {}
                        Delivery::Closed => {
                            warn!("Snapshot receiver dropped");
                            break;
                        }
                        // The stop branch ends the loop on the next turn
                        Delivery::Stopped => debug!("Window dropped, snapshot channel full"),
                    }
                    timer.as_mut().reset(Instant::now() + window);
                }
                event = events.recv() => match event {
                    Some(event) => self.process_event(&event),
                    None => {
                        debug!("Scan source closed");
                        self.finish(&snapshots, &stop).await;
                        break;
                    }
                },
            }
        }

        self.state = AggregatorState::Idle;
        info!("Aggregator stopped");
    }

    async fn finish(&mut self, snapshots: &mpsc::Sender<Snapshot>, stop: &CancellationToken) {
        let partial = self.window.take();
        if self.config.flush_on_stop && !partial.is_empty() {
            let beacons = partial.len();
            debug!(beacons, "Flushing partial window");
            match deliver(snapshots, stop, partial).await {
                Delivery::Sent => {}
                Delivery::Closed => warn!(beacons, "Snapshot receiver dropped, partial window lost"),
                Delivery::Stopped => warn!(beacons, "Snapshot channel full, partial window lost"),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Closed,
    Stopped,
}

/// Send `snapshot`, giving up if `stop` fires while the channel is full.
///
/// Room in the channel always wins, so a flush after stop still goes out
/// when the consumer keeps up.
async fn deliver(
    snapshots: &mpsc::Sender<Snapshot>,
    stop: &CancellationToken,
    snapshot: Snapshot,
) -> Delivery {
    tokio::select! {
        biased;

        sent = snapshots.send(snapshot) => match sent {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Closed,
        },
        _ = stop.cancelled() => Delivery::Stopped,
    }
}
