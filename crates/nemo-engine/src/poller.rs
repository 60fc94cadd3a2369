//! Bounded fan-out of per-channel fetches.
//!
//! An unfiltered cycle covers 1–64 as four contiguous ranges of 16,
//! one worker each.  A filtered cycle splits the tracked set into at
//! most eight batches, one worker per batch.  Workers are one-shot:
//! they fetch their assigned indices strictly in order, append
//! successes to the shared record collection, hand failures to the
//! aggregator, and terminate.  A fresh cycle spawns fresh workers.

use crate::device::DeviceHandle;
use crate::errors::ErrorAggregator;
use nemo_proto::codec::{Command, Reply};
use nemo_proto::model::{ChannelRecord, CHANNEL_COUNT};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

pub const FULL_POLL_WORKERS: usize = 4;
pub const FILTERED_POLL_WORKERS: usize = 8;

/// Spawn one cycle's workers.  The returned handles belong to the
/// engine, which aborts them on shutdown.
pub fn spawn_poll(
    handle: DeviceHandle,
    indices: Vec<u8>,
    records: Arc<Mutex<Vec<ChannelRecord>>>,
    errors: Arc<ErrorAggregator>,
) -> Vec<JoinHandle<()>> {
    partition(indices)
        .into_iter()
        .map(|batch| {
            let handle = handle.clone();
            let records = records.clone();
            let errors = errors.clone();
            tokio::spawn(run_batch(handle, batch, records, errors))
        })
        .collect()
}

/// Split the index set into worker batches.
fn partition(indices: Vec<u8>) -> Vec<Vec<u8>> {
    if indices.is_empty() {
        return Vec::new();
    }
    let workers = if indices.len() == CHANNEL_COUNT as usize {
        FULL_POLL_WORKERS
    } else {
        FILTERED_POLL_WORKERS
    };
    let batch_len = indices.len().div_ceil(workers);
    indices
        .chunks(batch_len)
        .map(|chunk| chunk.to_vec())
        .collect()
}

async fn run_batch(
    handle: DeviceHandle,
    batch: Vec<u8>,
    records: Arc<Mutex<Vec<ChannelRecord>>>,
    errors: Arc<ErrorAggregator>,
) {
    debug!("poll worker: batch {:?}", batch);
    for index in batch {
        match handle.send(&Command::GetChannelInfo(index)).await {
            Ok(Reply::Channel(record)) => {
                records.lock().await.push(record);
            }
            Ok(_) => {
                errors
                    .record(format!(
                        "device {} did not acknowledge GET_CHANNEL_INFO {}",
                        handle.host(),
                        index
                    ))
                    .await;
            }
            Err(e) => {
                errors
                    .record(format!("failed to fetch channel {}: {:#}", index, e))
                    .await;
            }
        }
    }
}
