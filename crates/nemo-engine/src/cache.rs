//! Snapshot cache and poll phase machine.
//!
//! All mutations happen under one write lock so statistics and
//! controls change together; readers get owned clones, never live
//! aliases.  Control patches and poll merges run as single critical
//! sections against the same lock and therefore never interleave
//! field-by-field.

use nemo_proto::filter::{tracked_indices, ChannelFilter};
use nemo_proto::model::{ChannelRecord, GroupKey, ScalarProperties, Snapshot};
use tokio::sync::RwLock;
use tracing::debug;

/// Where the engine is in the poll cycle.
///
/// `Idle` before the first poll; `AwaitingPoll` while workers fill the
/// record collection; `Ready` once a full set has been merged.  The
/// `pending_patch` side flag marks that the next read should serve the
/// cached channel groups instead of starting a new cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    AwaitingPoll,
    Ready,
}

struct CacheInner {
    snapshot: Snapshot,
    phase: PollPhase,
    pending_patch: bool,
    /// Record count at which the in-flight poll is complete.
    expected: usize,
}

pub struct SnapshotCache {
    inner: RwLock<CacheInner>,
    filter: Option<ChannelFilter>,
}

impl SnapshotCache {
    pub fn new(filter: Option<ChannelFilter>) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                snapshot: Snapshot::default(),
                phase: PollPhase::Idle,
                pending_patch: false,
                expected: 0,
            }),
            filter,
        }
    }

    pub fn filter(&self) -> Option<&ChannelFilter> {
        self.filter.as_ref()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.inner.read().await.snapshot.clone()
    }

    pub async fn phase(&self) -> PollPhase {
        self.inner.read().await.phase
    }

    pub async fn expected(&self) -> usize {
        self.inner.read().await.expected
    }

    /// Overwrite the scalars for this read cycle and consume the
    /// pending-patch flag.  Returns true when the flag was set, in
    /// which case the caller serves the cached groups without
    /// triggering a new poll.
    pub async fn refresh_scalars(&self, scalars: ScalarProperties) -> bool {
        let mut inner = self.inner.write().await;
        let active = scalars.active_channel_index;
        inner.snapshot.scalars = scalars;
        let options = tracked_indices(self.filter.as_ref(), active);
        inner.snapshot.rebuild_controls(options);
        std::mem::take(&mut inner.pending_patch)
    }

    /// Enter `AwaitingPoll` for a cycle expecting `expected` records.
    pub async fn begin_poll(&self, expected: usize) {
        let mut inner = self.inner.write().await;
        inner.phase = PollPhase::AwaitingPoll;
        inner.expected = expected;
    }

    /// Commit a completed poll.  Guarded by the phase so one cycle's
    /// records merge at most once; records from a superseded cycle
    /// that already merged are left untouched.
    pub async fn merge_completed_poll(&self, records: Vec<ChannelRecord>) {
        let mut inner = self.inner.write().await;
        if inner.phase != PollPhase::AwaitingPoll {
            debug!("cache: dropping merge outside AwaitingPoll");
            return;
        }
        let active = inner.snapshot.scalars.active_channel_index;
        inner.snapshot.groups = records
            .into_iter()
            .map(|r| (GroupKey::for_index(r.index, active), r))
            .collect();
        let options = tracked_indices(self.filter.as_ref(), active);
        inner.snapshot.rebuild_controls(options);
        inner.phase = PollPhase::Ready;
        debug!(
            "cache: merged poll, {} groups",
            inner.snapshot.groups.len()
        );
    }

    /// Swap the active label from `old_active` to `new_active` without
    /// touching any other record.  `fetched` carries the one record a
    /// filter miss required; otherwise the new active record is taken
    /// from the cache.  Records only visible by virtue of being active
    /// are dropped when they lose the label.
    pub async fn patch_active_channel(
        &self,
        old_active: u8,
        new_active: u8,
        fetched: Option<ChannelRecord>,
    ) {
        let mut inner = self.inner.write().await;

        if let Some(old_record) = inner.snapshot.groups.remove(&GroupKey::Active) {
            let keep_old = match &self.filter {
                Some(f) => f.contains(old_active),
                None => true,
            };
            if keep_old {
                inner
                    .snapshot
                    .groups
                    .insert(GroupKey::Index(old_active), old_record);
            }
        }

        let new_record =
            fetched.or_else(|| inner.snapshot.groups.remove(&GroupKey::Index(new_active)));
        if let Some(record) = new_record {
            inner.snapshot.groups.insert(GroupKey::Active, record);
        }

        inner.snapshot.scalars.active_channel_index = new_active;
        let options = tracked_indices(self.filter.as_ref(), new_active);
        inner.snapshot.rebuild_controls(options);
        inner.pending_patch = true;
    }

    /// Overwrite one scalar after an acknowledged SET command and flag
    /// the next read to serve the cache.
    pub async fn patch_scalar(&self, apply: impl FnOnce(&mut ScalarProperties)) {
        let mut inner = self.inner.write().await;
        apply(&mut inner.snapshot.scalars);
        let active = inner.snapshot.scalars.active_channel_index;
        let options = tracked_indices(self.filter.as_ref(), active);
        inner.snapshot.rebuild_controls(options);
        inner.pending_patch = true;
    }

    /// End an in-flight cycle without merging, keeping whatever
    /// snapshot exists.  The next read starts a fresh poll.
    pub async fn abandon_poll(&self) {
        let mut inner = self.inner.write().await;
        if inner.phase == PollPhase::AwaitingPoll {
            inner.phase = PollPhase::Idle;
            inner.expected = 0;
        }
    }

    /// Drop cached groups and return to `Idle`.  Used on teardown.
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        inner.snapshot = Snapshot::default();
        inner.phase = PollPhase::Idle;
        inner.pending_patch = false;
        inner.expected = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: u8, device: &str) -> ChannelRecord {
        ChannelRecord {
            index,
            enabled: true,
            device_name: device.to_string(),
            channel_name: "Out".to_string(),
            display_name: "Out".to_string(),
        }
    }

    fn scalars(active: u8) -> ScalarProperties {
        ScalarProperties {
            software_version: "1.0".to_string(),
            speaker_muted: false,
            volume: 5,
            button_brightness: 5,
            display_brightness: 5,
            active_channel_index: active,
        }
    }

    #[tokio::test]
    async fn merge_labels_active_record() {
        let cache = SnapshotCache::new(None);
        cache.refresh_scalars(scalars(3)).await;
        cache.begin_poll(4).await;
        cache
            .merge_completed_poll((1..=4).map(|i| record(i, "dev")).collect())
            .await;

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.groups.len(), 4);
        assert_eq!(snapshot.active_record().unwrap().index, 3);
        assert!(!snapshot.groups.contains_key(&GroupKey::Index(3)));
    }

    #[tokio::test]
    async fn merge_with_no_active_has_no_active_group() {
        let cache = SnapshotCache::new(None);
        cache.refresh_scalars(scalars(0)).await;
        cache.begin_poll(2).await;
        cache
            .merge_completed_poll(vec![record(1, "a"), record(2, "b")])
            .await;

        let snapshot = cache.snapshot().await;
        assert!(snapshot.active_record().is_none());
        assert_eq!(snapshot.groups.len(), 2);
    }

    #[tokio::test]
    async fn merge_is_guarded_against_double_commit() {
        let cache = SnapshotCache::new(None);
        cache.refresh_scalars(scalars(0)).await;
        cache.begin_poll(1).await;
        cache.merge_completed_poll(vec![record(1, "first")]).await;
        // Second merge of a stale record set must not replace groups.
        cache.merge_completed_poll(vec![record(2, "stale")]).await;

        let snapshot = cache.snapshot().await;
        assert!(snapshot.groups.contains_key(&GroupKey::Index(1)));
        assert!(!snapshot.groups.contains_key(&GroupKey::Index(2)));
    }

    #[tokio::test]
    async fn patch_swaps_labels_without_refetch() {
        let cache = SnapshotCache::new(None);
        cache.refresh_scalars(scalars(3)).await;
        cache.begin_poll(4).await;
        cache
            .merge_completed_poll((1..=4).map(|i| record(i, "dev")).collect())
            .await;

        cache.patch_active_channel(3, 2, None).await;

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.scalars.active_channel_index, 2);
        assert_eq!(snapshot.active_record().unwrap().index, 2);
        assert!(snapshot.groups.contains_key(&GroupKey::Index(3)));
        assert!(!snapshot.groups.contains_key(&GroupKey::Index(2)));
    }

    #[tokio::test]
    async fn patch_from_no_active_relabels_cached_record() {
        let cache = SnapshotCache::new(None);
        cache.refresh_scalars(scalars(0)).await;
        cache.begin_poll(2).await;
        cache
            .merge_completed_poll(vec![record(1, "a"), record(2, "b")])
            .await;

        cache.patch_active_channel(0, 2, None).await;

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.active_record().unwrap().index, 2);
        assert_eq!(snapshot.groups.len(), 2);
    }

    #[tokio::test]
    async fn patch_drops_old_active_outside_filter() {
        let filter = ChannelFilter::parse("1,2").unwrap();
        let cache = SnapshotCache::new(Some(filter));
        cache.refresh_scalars(scalars(9)).await;
        cache.begin_poll(3).await;
        cache
            .merge_completed_poll(vec![record(1, "a"), record(2, "b"), record(9, "extra")])
            .await;

        cache.patch_active_channel(9, 1, None).await;

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.active_record().unwrap().index, 1);
        // channel 9 was only visible while active
        assert!(!snapshot.groups.contains_key(&GroupKey::Index(9)));
        assert!(snapshot.groups.contains_key(&GroupKey::Index(2)));
    }

    #[tokio::test]
    async fn patch_with_fetched_record_merges_it_as_active() {
        let filter = ChannelFilter::parse("1,2").unwrap();
        let cache = SnapshotCache::new(Some(filter));
        cache.refresh_scalars(scalars(1)).await;
        cache.begin_poll(2).await;
        cache
            .merge_completed_poll(vec![record(1, "a"), record(2, "b")])
            .await;

        cache
            .patch_active_channel(1, 7, Some(record(7, "outside")))
            .await;

        let snapshot = cache.snapshot().await;
        let active = snapshot.active_record().unwrap();
        assert_eq!(active.index, 7);
        assert_eq!(active.device_name, "outside");
        // old active is in the filter and keeps its numeric group
        assert!(snapshot.groups.contains_key(&GroupKey::Index(1)));
    }

    #[tokio::test]
    async fn refresh_consumes_pending_patch_once() {
        let cache = SnapshotCache::new(None);
        cache
            .patch_scalar(|s| s.speaker_muted = true)
            .await;

        assert!(cache.refresh_scalars(scalars(0)).await);
        assert!(!cache.refresh_scalars(scalars(0)).await);
    }
}
