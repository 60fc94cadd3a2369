//! Engine facade: snapshot reads, control application, lifecycle.

use crate::cache::{PollPhase, SnapshotCache};
use crate::control::ControlCoordinator;
use crate::device::{self, DeviceClient, DeviceHandle};
use crate::error::EngineError;
use crate::errors::ErrorAggregator;
use crate::poller;
use nemo_proto::codec::{Command, Reply};
use nemo_proto::config::Config;
use nemo_proto::filter::{tracked_indices, ChannelFilter};
use nemo_proto::model::{ChannelRecord, ScalarProperties, Snapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One device connection's polling engine.  Each instance owns its
/// transport, cache, error set and worker pool; nothing is shared
/// process-wide.
pub struct Engine {
    client: DeviceClient,
    handle: DeviceHandle,
    cache: Arc<SnapshotCache>,
    coordinator: ControlCoordinator,
    errors: Arc<ErrorAggregator>,
    records: Arc<Mutex<Vec<ChannelRecord>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Connect to the device described by `config`.
    pub async fn connect(config: &Config) -> Result<Self, EngineError> {
        let filter = config
            .polling
            .channel_filter
            .as_deref()
            .and_then(ChannelFilter::parse);
        if let Some(f) = &filter {
            info!("channel filter active: {:?}", f.indices());
        }

        let addr = config.device_addr();
        let timeout = Duration::from_millis(config.device.timeout_ms);
        let (client, handle) = device::connect(&addr, timeout).await?;

        let cache = Arc::new(SnapshotCache::new(filter));
        let coordinator = ControlCoordinator::new(handle.clone(), cache.clone());

        Ok(Self {
            client,
            handle,
            cache,
            coordinator,
            errors: Arc::new(ErrorAggregator::new()),
            records: Arc::new(Mutex::new(Vec::new())),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Read the current snapshot, triggering or completing a poll
    /// cycle as needed.  Never blocks on poll completion: while
    /// workers are still collecting, the latest (possibly
    /// scalar-only) snapshot is returned.
    ///
    /// Pending poll failures from background workers surface here as
    /// one combined error and are then cleared; the caller retries.
    pub async fn read_snapshot(&self) -> Result<Snapshot, EngineError> {
        if let Some(combined) = self.errors.drain_if_any().await {
            // The failed cycle is over: abandon its workers and
            // partial records so the next read starts a fresh poll.
            for worker in self.workers.lock().await.drain(..) {
                worker.abort();
            }
            self.records.lock().await.clear();
            self.cache.abandon_poll().await;
            return Err(EngineError::PollFailures(combined));
        }

        let scalars = self.fetch_scalars().await?;
        let serve_cached = self.cache.refresh_scalars(scalars).await;
        if serve_cached {
            debug!("read: serving patched cache, no poll triggered");
            return Ok(self.cache.snapshot().await);
        }

        match self.cache.phase().await {
            PollPhase::Idle | PollPhase::Ready => {
                self.start_poll_cycle().await;
            }
            PollPhase::AwaitingPoll => {
                self.try_complete_poll().await;
            }
        }

        Ok(self.cache.snapshot().await)
    }

    /// Validate and apply one control command.  See
    /// [`ControlCoordinator`] for the patch rules.
    pub async fn apply_control(&self, property: &str, value: &str) -> Result<(), EngineError> {
        self.coordinator.apply(property, value).await
    }

    /// Stop all workers and the I/O task, and drop cached records and
    /// pending errors.  In-flight datagrams are abandoned.
    pub async fn shutdown(&self) {
        for worker in self.workers.lock().await.drain(..) {
            worker.abort();
        }
        self.client.shutdown();
        self.records.lock().await.clear();
        self.errors.clear().await;
        self.cache.reset().await;
        info!("engine shut down");
    }

    // ── poll cycle ────────────────────────────────────────────────────────

    async fn start_poll_cycle(&self) {
        let active = self.cache.snapshot().await.scalars.active_channel_index;
        let indices = tracked_indices(self.cache.filter(), active);
        let expected = indices.len();

        self.records.lock().await.clear();
        self.cache.begin_poll(expected).await;

        debug!("poll cycle: {} channels", expected);
        let handles = poller::spawn_poll(
            self.handle.clone(),
            indices,
            self.records.clone(),
            self.errors.clone(),
        );

        let mut workers = self.workers.lock().await;
        for stale in workers.drain(..) {
            stale.abort();
        }
        *workers = handles;
    }

    async fn try_complete_poll(&self) {
        let expected = self.cache.expected().await;
        let complete = {
            let records = self.records.lock().await;
            records.len() >= expected
        };
        if complete {
            let drained = {
                let mut records = self.records.lock().await;
                std::mem::take(&mut *records)
            };
            self.cache.merge_completed_poll(drained).await;
        }
    }

    // ── scalar refresh ────────────────────────────────────────────────────

    async fn fetch_scalars(&self) -> Result<ScalarProperties, EngineError> {
        let software_version = self.fetch_value(Command::Version).await?;
        let active_channel_index = parse_or_zero(&self.fetch_value(Command::GetActiveIndex).await?);
        let speaker_muted = self.fetch_value(Command::GetMute).await? == "1";
        let volume = parse_or_zero(&self.fetch_value(Command::GetVolume).await?);
        let button_brightness =
            parse_or_zero(&self.fetch_value(Command::GetButtonBrightness).await?);
        let display_brightness =
            parse_or_zero(&self.fetch_value(Command::GetDisplayBrightness).await?);

        Ok(ScalarProperties {
            software_version,
            speaker_muted,
            volume,
            button_brightness,
            display_brightness,
            active_channel_index,
        })
    }

    async fn fetch_value(&self, command: Command) -> Result<String, EngineError> {
        match self.handle.send(&command).await? {
            Reply::Value(v) => Ok(v),
            // Missing or garbled scalars are not fatal to the read;
            // they decode to the type's zero value.
            other => {
                debug!("scalar {}: unusable reply {:?}", command.name(), other);
                Ok(String::new())
            }
        }
    }
}

fn parse_or_zero(value: &str) -> u8 {
    value.parse().unwrap_or(0)
}
