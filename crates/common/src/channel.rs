//! Async channel bridge between Tokio runtime and the transport thread
//!
//! The USB transport is single-threaded and blocks in `poll(2)`, so front-ends
//! running on Tokio drive it from a dedicated OS thread and talk to it through
//! this bridge.

use async_channel::{Receiver, Sender, bounded};
use protocol::DeviceSummary;

/// Commands from Tokio runtime to the transport thread
#[derive(Debug)]
pub enum ProbeCommand {
    /// List discovered PHDC devices
    ListDevices {
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<Vec<DeviceSummary>>,
    },

    /// Open a device and start servicing it
    Listen {
        /// Index in the discovered device list
        index: usize,
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<Result<DeviceSummary, String>>,
    },

    /// Submit an APDU to the device being serviced
    SendApdu {
        /// Raw APDU bytes
        data: Vec<u8>,
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<Result<(), String>>,
    },

    /// Shutdown the transport thread gracefully
    Shutdown,
}

/// Events from the transport thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    /// Bytes delivered by a completed bulk-IN transfer
    ApduReceived {
        /// Index of the device that produced the data
        index: usize,
        /// Received bytes, one discrete chunk
        data: Vec<u8>,
    },

    /// The serviced device stopped (error or shutdown)
    SessionClosed {
        /// Index of the device
        index: usize,
        /// Failure description, `None` on orderly shutdown
        reason: Option<String>,
    },
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct ProbeBridge {
    cmd_tx: Sender<ProbeCommand>,
    event_rx: Receiver<ProbeEvent>,
}

impl ProbeBridge {
    /// Send a command to the transport thread
    pub async fn send_command(&self, cmd: ProbeCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the transport thread
    pub async fn recv_event(&self) -> crate::Result<ProbeEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for the transport thread (blocking)
pub struct ProbeWorker {
    pub(crate) cmd_rx: Receiver<ProbeCommand>,
    /// Event sender (public so receive callbacks can own a clone)
    pub event_tx: Sender<ProbeEvent>,
}

impl ProbeWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<ProbeCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<ProbeCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// True once every `ProbeBridge` has been dropped
    pub fn is_closed(&self) -> bool {
        self.cmd_rx.is_closed()
    }

    /// Send an event to Tokio runtime (blocking)
    pub fn send_event(&self, event: ProbeEvent) -> crate::Result<()> {
        self.event_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between Tokio and the transport thread
///
/// Returns (ProbeBridge for Tokio, ProbeWorker for the transport thread)
pub fn create_probe_bridge() -> (ProbeBridge, ProbeWorker) {
    let (cmd_tx, cmd_rx) = bounded(64);
    let (event_tx, event_rx) = bounded(256);

    (
        ProbeBridge { cmd_tx, event_rx },
        ProbeWorker { cmd_rx, event_tx },
    )
}
