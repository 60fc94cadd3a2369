//! Snapshot data model: channel records, scalar properties, display
//! grouping and control descriptors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Channel indices run 1–64; 0 means "no channel active".
pub const CHANNEL_COUNT: u8 = 64;

/// One device-addressable audio endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub index: u8,
    pub enabled: bool,
    pub device_name: String,
    pub channel_name: String,
    pub display_name: String,
}

/// The five scalar device properties plus the active channel index.
/// Refreshed on every read cycle; individual fields are overwritten
/// synchronously by acknowledged control commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarProperties {
    pub software_version: String,
    pub speaker_muted: bool,
    pub volume: u8,
    pub button_brightness: u8,
    pub display_brightness: u8,
    /// 0 means no channel is active.
    pub active_channel_index: u8,
}

/// Display grouping key.  The record whose index equals the active
/// channel index is keyed by role, not by its literal index, so at
/// most one record ever carries the active label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GroupKey {
    Active,
    Index(u8),
}

impl GroupKey {
    pub fn label(&self) -> String {
        match self {
            GroupKey::Active => "ActiveChannel".to_string(),
            GroupKey::Index(n) => format!("Channel {:02}", n),
        }
    }

    /// Key for `index` given the currently active index.
    pub fn for_index(index: u8, active: u8) -> Self {
        if index == active {
            GroupKey::Active
        } else {
            GroupKey::Index(index)
        }
    }
}

/// Names of the five controllable properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlProperty {
    SpeakerMute,
    Volume,
    ButtonBrightness,
    DisplayBrightness,
    ActiveChannelIndex,
}

impl ControlProperty {
    pub fn name(&self) -> &'static str {
        match self {
            ControlProperty::SpeakerMute => "SpeakerMute",
            ControlProperty::Volume => "Volume",
            ControlProperty::ButtonBrightness => "ButtonBrightness",
            ControlProperty::DisplayBrightness => "DisplayBrightness",
            ControlProperty::ActiveChannelIndex => "ActiveChannelIndex",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SpeakerMute" => Some(ControlProperty::SpeakerMute),
            "Volume" => Some(ControlProperty::Volume),
            "ButtonBrightness" => Some(ControlProperty::ButtonBrightness),
            "DisplayBrightness" => Some(ControlProperty::DisplayBrightness),
            "ActiveChannelIndex" => Some(ControlProperty::ActiveChannelIndex),
            _ => None,
        }
    }

    /// Valid numeric range for the property's control value.
    pub fn range(&self) -> (u8, u8) {
        match self {
            ControlProperty::SpeakerMute => (0, 1),
            ControlProperty::Volume => (1, 10),
            ControlProperty::ButtonBrightness => (0, 10),
            ControlProperty::DisplayBrightness => (0, 10),
            ControlProperty::ActiveChannelIndex => (1, CHANNEL_COUNT),
        }
    }
}

/// Descriptor for one exposed control, derived from the scalars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlDescriptor {
    Toggle {
        name: String,
        on: bool,
    },
    Slider {
        name: String,
        min: u8,
        max: u8,
        value: u8,
    },
    /// Active-channel selection, restricted to the tracked indices.
    Dropdown {
        name: String,
        options: Vec<u8>,
        value: u8,
    },
}

/// Consistent read-only view of the device: scalars, channel groups
/// and the control surface.  Statistics and controls are always built
/// together so a reader never sees a dropdown that disagrees with the
/// groups it describes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub scalars: ScalarProperties,
    pub groups: BTreeMap<GroupKey, ChannelRecord>,
    pub controls: Vec<ControlDescriptor>,
}

impl Snapshot {
    /// Rebuild the control descriptors from the current scalars.
    /// `dropdown_options` are the tracked channel indices in display
    /// order (filter set or full range, plus the active index).
    pub fn rebuild_controls(&mut self, dropdown_options: Vec<u8>) {
        let s = &self.scalars;
        self.controls = vec![
            ControlDescriptor::Toggle {
                name: ControlProperty::SpeakerMute.name().to_string(),
                on: s.speaker_muted,
            },
            ControlDescriptor::Slider {
                name: ControlProperty::Volume.name().to_string(),
                min: 1,
                max: 10,
                value: s.volume,
            },
            ControlDescriptor::Slider {
                name: ControlProperty::ButtonBrightness.name().to_string(),
                min: 0,
                max: 10,
                value: s.button_brightness,
            },
            ControlDescriptor::Slider {
                name: ControlProperty::DisplayBrightness.name().to_string(),
                min: 0,
                max: 10,
                value: s.display_brightness,
            },
            ControlDescriptor::Dropdown {
                name: ControlProperty::ActiveChannelIndex.name().to_string(),
                options: dropdown_options,
                value: s.active_channel_index,
            },
        ];
    }

    /// The record currently carrying the active label, if any.
    pub fn active_record(&self) -> Option<&ChannelRecord> {
        self.groups.get(&GroupKey::Active)
    }
}
