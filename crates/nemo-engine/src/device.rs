//! UDP device client with a single I/O task.
//!
//! ```text
//!   device::connect(addr, timeout)
//!         │
//!         └── io_task  ← receives PendingRequest via mpsc,
//!                        sends the line, awaits one datagram under
//!                        the timeout, resolves the oneshot
//! ```
//!
//! `DeviceHandle` is cheaply cloneable; `send(cmd)` returns the
//! decoded [`Reply`].  The device answers one request at a time, so
//! the I/O task serialises exchanges — poll workers simply queue on
//! the channel.

use anyhow::Context;
use nemo_proto::codec::{decode_response, Command, Reply};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const RESPONSE_BUFFER_LEN: usize = 1024;

struct PendingRequest {
    payload: String,
    reply: oneshot::Sender<anyhow::Result<String>>,
}

/// Cloneable handle to the device I/O task.
#[derive(Clone)]
pub struct DeviceHandle {
    tx: mpsc::Sender<PendingRequest>,
    host: String,
}

impl DeviceHandle {
    /// Encode `command`, exchange it with the device and decode the
    /// response.  Transport failures name the device address.
    pub async fn send(&self, command: &Command) -> anyhow::Result<Reply> {
        let payload = command.encode();
        let (reply_tx, reply_rx) = oneshot::channel();

        self.tx
            .send(PendingRequest {
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("device I/O task gone for {}", self.host))?;

        let raw = reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("device reply channel dropped for {}", self.host))?
            .with_context(|| format!("{} {}", command.name(), self.host))?;

        Ok(decode_response(&raw))
    }

    /// "host:port" of the device this handle talks to.
    pub fn host(&self) -> &str {
        &self.host
    }
}

/// Owns the I/O task; aborting it releases the socket.
pub struct DeviceClient {
    io_task: tokio::task::JoinHandle<()>,
}

impl DeviceClient {
    pub fn shutdown(&self) {
        self.io_task.abort();
    }
}

impl Drop for DeviceClient {
    fn drop(&mut self) {
        self.io_task.abort();
    }
}

/// Bind an ephemeral local socket, connect it to `addr` and spawn the
/// I/O task.
pub async fn connect(addr: &str, timeout: Duration) -> anyhow::Result<(DeviceClient, DeviceHandle)> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("binding local UDP socket")?;
    socket
        .connect(addr)
        .await
        .with_context(|| format!("connecting UDP socket to {addr}"))?;

    let (tx, rx) = mpsc::channel::<PendingRequest>(64);
    let io_task = tokio::spawn(io_task(socket, rx, timeout));

    Ok((
        DeviceClient { io_task },
        DeviceHandle {
            tx,
            host: addr.to_string(),
        },
    ))
}

async fn io_task(socket: UdpSocket, mut rx: mpsc::Receiver<PendingRequest>, timeout: Duration) {
    let mut buf = [0u8; RESPONSE_BUFFER_LEN];
    while let Some(req) = rx.recv().await {
        debug!("device io: send {:?}", req.payload.trim_end());
        let result = exchange(&socket, &req.payload, &mut buf, timeout).await;
        if let Err(e) = &result {
            warn!("device io: {}", e);
        }
        let _ = req.reply.send(result);
    }
    debug!("device io: task exiting");
}

async fn exchange(
    socket: &UdpSocket,
    payload: &str,
    buf: &mut [u8],
    timeout: Duration,
) -> anyhow::Result<String> {
    socket.send(payload.as_bytes()).await?;
    let n = tokio::time::timeout(timeout, socket.recv(buf))
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for device response"))??;
    Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
}
