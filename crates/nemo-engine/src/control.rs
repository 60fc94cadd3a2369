//! Control command execution and cache reconciliation.
//!
//! Channel state rarely changes between polls except which channel is
//! active, so an acknowledged control never triggers a full re-poll:
//! the coordinator relabels cached records and fetches at most one
//! record (a filter miss) to keep the snapshot correct.

use crate::cache::SnapshotCache;
use crate::device::DeviceHandle;
use crate::error::EngineError;
use nemo_proto::codec::{Command, Reply};
use nemo_proto::model::ControlProperty;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ControlCoordinator {
    handle: DeviceHandle,
    cache: Arc<SnapshotCache>,
}

impl ControlCoordinator {
    pub fn new(handle: DeviceHandle, cache: Arc<SnapshotCache>) -> Self {
        Self { handle, cache }
    }

    /// Validate and execute one control invocation.  Failures abort
    /// this invocation only and never touch the cache.
    pub async fn apply(&self, property: &str, value: &str) -> Result<(), EngineError> {
        let property = ControlProperty::from_name(property)
            .ok_or_else(|| EngineError::UnknownProperty(property.to_string()))?;
        let parsed = parse_in_range(property, value)?;

        match property {
            ControlProperty::ActiveChannelIndex => self.set_active_channel(parsed).await,
            ControlProperty::SpeakerMute => {
                self.set_scalar(property, Command::SetMute(parsed), value)
                    .await?;
                self.cache
                    .patch_scalar(|s| s.speaker_muted = parsed == 1)
                    .await;
                Ok(())
            }
            ControlProperty::Volume => {
                self.set_scalar(property, Command::SetVolume(parsed), value)
                    .await?;
                self.cache.patch_scalar(|s| s.volume = parsed).await;
                Ok(())
            }
            ControlProperty::ButtonBrightness => {
                self.set_scalar(property, Command::SetButtonBrightness(parsed), value)
                    .await?;
                self.cache
                    .patch_scalar(|s| s.button_brightness = parsed)
                    .await;
                Ok(())
            }
            ControlProperty::DisplayBrightness => {
                self.set_scalar(property, Command::SetDisplayBrightness(parsed), value)
                    .await?;
                self.cache
                    .patch_scalar(|s| s.display_brightness = parsed)
                    .await;
                Ok(())
            }
        }
    }

    async fn set_scalar(
        &self,
        property: ControlProperty,
        command: Command,
        value: &str,
    ) -> Result<(), EngineError> {
        let reply = self.handle.send(&command).await?;
        if !reply.is_acknowledged() {
            return Err(EngineError::CommandFailed {
                host: self.handle.host().to_string(),
                command: command.name(),
                value: value.to_string(),
            });
        }
        info!("control: {} set to {}", property.name(), value);
        Ok(())
    }

    async fn set_active_channel(&self, target: u8) -> Result<(), EngineError> {
        let current = self.current_active_index().await?;
        if target == current {
            debug!("control: channel {} already active, skipping send", target);
            return Ok(());
        }

        let command = Command::SetActive(target);
        let reply = self.handle.send(&command).await?;
        if !reply.is_acknowledged() {
            return Err(EngineError::CommandFailed {
                host: self.handle.host().to_string(),
                command: command.name(),
                value: target.to_string(),
            });
        }

        // A filter miss is the only case that costs a fetch: the
        // target record was never polled, so pull exactly that one.
        let fetched = match self.cache.filter() {
            Some(f) if !f.contains(target) => {
                match self.handle.send(&Command::GetChannelInfo(target)).await? {
                    Reply::Channel(record) => Some(record),
                    other => {
                        warn!(
                            "control: channel {} info fetch after SET_ACTIVE failed: {:?}",
                            target, other
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        self.cache
            .patch_active_channel(current, target, fetched)
            .await;
        info!("control: active channel {} -> {}", current, target);
        Ok(())
    }

    /// The device's current active index; missing or malformed
    /// responses default to 0 ("none active").
    async fn current_active_index(&self) -> Result<u8, EngineError> {
        let reply = self.handle.send(&Command::GetActiveIndex).await?;
        Ok(match reply {
            Reply::Value(v) => v.parse().unwrap_or(0),
            _ => 0,
        })
    }
}

/// Parse a control value and check it against the property's range
/// before anything is sent to the device.
fn parse_in_range(property: ControlProperty, value: &str) -> Result<u8, EngineError> {
    let parsed: u8 = value
        .trim()
        .parse()
        .map_err(|_| EngineError::InvalidValue(value.to_string()))?;
    let (min, max) = property.range();
    if parsed < min || parsed > max {
        return Err(EngineError::ValueOutOfRange {
            property: property.name(),
            value: value.to_string(),
            min,
            max,
        });
    }
    Ok(parsed)
}
