pub mod fake_device;

use nemo_engine::Engine;
use nemo_proto::model::Snapshot;
use std::time::{Duration, Instant};

/// Drive reads until the snapshot carries at least `expected` channel
/// groups.  Panics if the poll does not complete within the deadline.
#[allow(dead_code)]
pub async fn read_until_groups(engine: &Engine, expected: usize) -> Snapshot {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = engine
            .read_snapshot()
            .await
            .expect("read during happy-path poll");
        if snapshot.groups.len() >= expected {
            return snapshot;
        }
        assert!(
            Instant::now() < deadline,
            "poll did not reach {} groups in time",
            expected
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
