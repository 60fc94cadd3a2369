//! Scripted UDP device for integration tests.
//!
//! Binds a loopback socket and answers the monitor protocol from an
//! in-memory state table, counting requests per command so tests can
//! assert how much wire traffic an operation cost.

// Not every test binary uses every knob of the harness.
#![allow(dead_code)]

use nemo_proto::config::Config;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct FakeChannel {
    pub enabled: bool,
    pub device_name: String,
    pub channel_name: String,
    pub display_name: String,
}

impl FakeChannel {
    pub fn assigned(device: &str, channel: &str, display: &str) -> Self {
        Self {
            enabled: true,
            device_name: device.to_string(),
            channel_name: channel.to_string(),
            display_name: display.to_string(),
        }
    }

    pub fn unassigned() -> Self {
        Self {
            enabled: false,
            device_name: String::new(),
            channel_name: String::new(),
            display_name: "No Channel Assigned".to_string(),
        }
    }
}

pub struct DeviceState {
    pub version: String,
    pub active_index: u8,
    pub muted: bool,
    pub volume: u8,
    pub button_brightness: u8,
    pub display_brightness: u8,
    pub channels: HashMap<u8, FakeChannel>,
    /// Channels answered with NACK instead of a record.
    pub nack_channels: HashSet<u8>,
    /// Answer every SET command with NACK.
    pub nack_sets: bool,
}

impl DeviceState {
    /// 64 channels: the given overrides, everything else unassigned.
    pub fn with_channels(active_index: u8, overrides: Vec<(u8, FakeChannel)>) -> Self {
        let mut channels: HashMap<u8, FakeChannel> =
            (1..=64).map(|i| (i, FakeChannel::unassigned())).collect();
        for (index, channel) in overrides {
            channels.insert(index, channel);
        }
        Self {
            version: "1.0.2".to_string(),
            active_index,
            muted: false,
            volume: 5,
            button_brightness: 4,
            display_brightness: 6,
            channels,
            nack_channels: HashSet::new(),
            nack_sets: false,
        }
    }
}

#[derive(Default)]
pub struct Counters {
    pub channel_info: AtomicUsize,
    pub set_active: AtomicUsize,
    pub set_volume: AtomicUsize,
    pub set_mute: AtomicUsize,
}

impl Counters {
    pub fn channel_info_count(&self) -> usize {
        self.channel_info.load(Ordering::SeqCst)
    }

    pub fn set_active_count(&self) -> usize {
        self.set_active.load(Ordering::SeqCst)
    }

    pub fn set_volume_count(&self) -> usize {
        self.set_volume.load(Ordering::SeqCst)
    }

    pub fn set_mute_count(&self) -> usize {
        self.set_mute.load(Ordering::SeqCst)
    }
}

pub struct FakeDevice {
    addr: SocketAddr,
    pub counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl FakeDevice {
    pub async fn spawn(state: DeviceState) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("bind fake device socket");
        let addr = socket.local_addr().expect("fake device local addr");
        let counters = Arc::new(Counters::default());
        let state = Arc::new(Mutex::new(state));

        let task = tokio::spawn(serve(socket, state, counters.clone()));

        Self {
            addr,
            counters,
            task,
        }
    }

    /// Engine config pointing at this fake, with a short timeout.
    pub fn config(&self, channel_filter: Option<&str>) -> Config {
        let mut config = Config::default();
        config.device.host = self.addr.ip().to_string();
        config.device.port = self.addr.port();
        config.device.timeout_ms = 500;
        config.polling.channel_filter = channel_filter.map(str::to_string);
        config
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: UdpSocket, state: Arc<Mutex<DeviceState>>, counters: Arc<Counters>) {
    let mut buf = [0u8; 256];
    loop {
        let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let request = String::from_utf8_lossy(&buf[..n]).into_owned();
        let response = respond(&request, &state, &counters);
        let _ = socket.send_to(response.as_bytes(), peer).await;
    }
}

fn respond(request: &str, state: &Mutex<DeviceState>, counters: &Counters) -> String {
    let line = request.trim_end_matches(['\r', '\n']);
    let mut tokens = line.split_whitespace();
    let command = tokens.next().unwrap_or_default();
    let arg: Option<u8> = tokens.next().and_then(|t| t.parse().ok());
    let mut state = state.lock().expect("fake device state lock");

    match (command, arg) {
        ("VERSION", None) => format!("ACK VERSION {}\r", state.version),
        ("GET_ACTIVE_INDEX", None) => format!("ACK GET_ACTIVE_INDEX {}\r", state.active_index),
        ("GET_MUTE", None) => format!("ACK GET_MUTE {}\r", state.muted as u8),
        ("GET_VOLUME", None) => format!("ACK GET_VOLUME {}\r", state.volume),
        ("GET_BUTTON_BRIGHTNESS", None) => {
            format!("ACK GET_BUTTON_BRIGHTNESS {}\r", state.button_brightness)
        }
        ("GET_DISPLAY_BRIGHTNESS", None) => {
            format!("ACK GET_DISPLAY_BRIGHTNESS {}\r", state.display_brightness)
        }
        ("GET_CHANNEL_INFO", Some(index)) => {
            counters.channel_info.fetch_add(1, Ordering::SeqCst);
            if state.nack_channels.contains(&index) {
                return "NACK\r".to_string();
            }
            match state.channels.get(&index) {
                Some(ch) => format!(
                    "ACK GET_CHANNEL_INFO {} ({}) \"{}\" \"{}\" \"{}\"\r",
                    ch.enabled as u8, index, ch.device_name, ch.channel_name, ch.display_name
                ),
                None => "NACK\r".to_string(),
            }
        }
        ("SET_ACTIVE", Some(index)) => {
            counters.set_active.fetch_add(1, Ordering::SeqCst);
            if state.nack_sets {
                return "NACK\r".to_string();
            }
            state.active_index = index;
            format!("ACK SET_ACTIVE {}\r", index)
        }
        ("SET_MUTE", Some(value)) => {
            counters.set_mute.fetch_add(1, Ordering::SeqCst);
            if state.nack_sets {
                return "NACK\r".to_string();
            }
            state.muted = value == 1;
            format!("ACK SET_MUTE {}\r", value)
        }
        ("SET_VOLUME", Some(value)) => {
            counters.set_volume.fetch_add(1, Ordering::SeqCst);
            if state.nack_sets {
                return "NACK\r".to_string();
            }
            state.volume = value;
            format!("ACK SET_VOLUME {}\r", value)
        }
        ("SET_BUTTON_BRIGHTNESS", Some(value)) => {
            if state.nack_sets {
                return "NACK\r".to_string();
            }
            state.button_brightness = value;
            format!("ACK SET_BUTTON_BRIGHTNESS {}\r", value)
        }
        ("SET_DISPLAY_BRIGHTNESS", Some(value)) => {
            if state.nack_sets {
                return "NACK\r".to_string();
            }
            state.display_brightness = value;
            format!("ACK SET_DISPLAY_BRIGHTNESS {}\r", value)
        }
        _ => "NACK\r".to_string(),
    }
}
