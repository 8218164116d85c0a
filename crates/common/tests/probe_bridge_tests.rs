//! Probe Bridge Integration Tests
//!
//! Tests for the async channel bridge between Tokio runtime and the
//! transport thread.
//!
//! Run with: `cargo test -p common --test probe_bridge_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, create_mock_device_summary, with_timeout};
use common::{ProbeCommand, ProbeEvent, create_probe_bridge};
use std::thread;
use tokio::sync::oneshot;

// ============================================================================
// Command Flow Tests
// ============================================================================

#[tokio::test]
async fn test_list_devices_command_flow() {
    let (bridge, worker) = create_probe_bridge();

    let handle = thread::spawn(move || {
        let cmd = worker.recv_command().expect("Failed to receive command");
        if let ProbeCommand::ListDevices { response } = cmd {
            let devices = (0..3)
                .map(|i| create_mock_device_summary(i, 0x0483, 0x5750))
                .collect();
            response.send(devices).expect("Failed to send response");
            true
        } else {
            false
        }
    });

    let (tx, rx) = oneshot::channel();
    bridge
        .send_command(ProbeCommand::ListDevices { response: tx })
        .await
        .expect("Failed to send command");

    let devices = with_timeout(DEFAULT_TEST_TIMEOUT, rx)
        .await
        .expect("Timed out")
        .expect("Failed to receive devices");
    assert_eq!(devices.len(), 3);
    assert_eq!(devices[2].index, 2);

    assert!(handle.join().unwrap());
}

#[tokio::test]
async fn test_listen_error_flow() {
    let (bridge, worker) = create_probe_bridge();

    let handle = thread::spawn(move || {
        let cmd = worker.recv_command().expect("Failed to receive command");
        if let ProbeCommand::Listen { index, response } = cmd {
            assert_eq!(index, 7);
            response
                .send(Err("no device at index 7".to_string()))
                .expect("Failed to send");
            true
        } else {
            false
        }
    });

    let (tx, rx) = oneshot::channel();
    bridge
        .send_command(ProbeCommand::Listen {
            index: 7,
            response: tx,
        })
        .await
        .expect("Failed to send command");

    let result = rx.await.expect("Failed to receive");
    assert_eq!(result.unwrap_err(), "no device at index 7");

    assert!(handle.join().unwrap());
}

#[tokio::test]
async fn test_send_apdu_carries_payload() {
    let (bridge, worker) = create_probe_bridge();

    let handle = thread::spawn(move || {
        let cmd = worker.recv_command().expect("Failed to receive command");
        match cmd {
            ProbeCommand::SendApdu { data, response } => {
                response.send(Ok(())).expect("Failed to send");
                data
            }
            _ => Vec::new(),
        }
    });

    let (tx, rx) = oneshot::channel();
    bridge
        .send_command(ProbeCommand::SendApdu {
            data: vec![0xE2, 0x00, 0x00, 0x32],
            response: tx,
        })
        .await
        .expect("Failed to send command");

    assert!(rx.await.expect("Failed to receive").is_ok());
    assert_eq!(handle.join().unwrap(), vec![0xE2, 0x00, 0x00, 0x32]);
}

// ============================================================================
// Event Flow Tests
// ============================================================================

#[tokio::test]
async fn test_events_preserve_order() {
    let (bridge, worker) = create_probe_bridge();

    let handle = thread::spawn(move || {
        for i in 0..5u8 {
            worker
                .send_event(ProbeEvent::ApduReceived {
                    index: 0,
                    data: vec![i],
                })
                .expect("Failed to send event");
        }
        worker
            .send_event(ProbeEvent::SessionClosed {
                index: 0,
                reason: None,
            })
            .expect("Failed to send event");
    });

    for i in 0..5u8 {
        let event = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.recv_event())
            .await
            .expect("Timed out")
            .expect("Channel closed");
        assert_eq!(
            event,
            ProbeEvent::ApduReceived {
                index: 0,
                data: vec![i]
            }
        );
    }

    let closed = bridge.recv_event().await.expect("Channel closed");
    assert!(matches!(
        closed,
        ProbeEvent::SessionClosed { reason: None, .. }
    ));

    handle.join().expect("Worker thread panicked");
}

#[tokio::test]
async fn test_recv_after_worker_dropped() {
    let (bridge, worker) = create_probe_bridge();
    drop(worker);

    assert!(bridge.recv_event().await.is_err());
    assert!(
        bridge
            .send_command(ProbeCommand::Shutdown)
            .await
            .is_err()
    );
}
