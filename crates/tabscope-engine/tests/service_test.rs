use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use tabscope_engine::channel::{Channel, ChannelError};
use tabscope_engine::protocol::ResponseBody;
use tabscope_engine::service::{CaptureService, ControlEvent, EventSink, ServiceHandle};

#[derive(Default)]
struct FakeState {
    fail_attach: bool,
    fail_body: bool,
    attach_calls: AtomicUsize,
    detach_calls: AtomicUsize,
    sink: Mutex<Option<EventSink>>,
    /// When set, body fetches block until the gate is notified.
    body_gate: Option<Arc<tokio::sync::Notify>>,
}

struct FakeChannel {
    state: Arc<FakeState>,
}

#[async_trait]
impl Channel for FakeChannel {
    async fn attach(&self, events: EventSink) -> Result<(), ChannelError> {
        self.state.attach_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_attach {
            return Err(ChannelError::Attach("target gone".to_string()));
        }
        *self.state.sink.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn detach(&self) -> Result<(), ChannelError> {
        self.state.detach_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn enable(&self, _stream: &str) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn fetch_body(&self, request_id: &str) -> Result<ResponseBody, ChannelError> {
        if let Some(gate) = &self.state.body_gate {
            gate.notified().await;
        }
        if self.state.fail_body {
            return Err(ChannelError::BodyFetch {
                request_id: request_id.to_string(),
                reason: "no body".to_string(),
            });
        }
        Ok(ResponseBody {
            body: "hello".to_string(),
            base64_encoded: false,
        })
    }
}

fn spawn_service(
    state: Arc<FakeState>,
) -> (ServiceHandle, mpsc::UnboundedReceiver<ControlEvent>) {
    let (service, handle, events) = CaptureService::new(FakeChannel { state });
    tokio::spawn(service.run());
    (handle, events)
}

async fn recv_event(events: &mut mpsc::UnboundedReceiver<ControlEvent>) -> ControlEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for control event")
        .expect("service dropped its event channel")
}

/// Skip forward to the next CaptureStopped notification.
async fn next_stopped(events: &mut mpsc::UnboundedReceiver<ControlEvent>) -> (usize, usize) {
    loop {
        if let ControlEvent::CaptureStopped {
            console_lines,
            network_entries,
            ..
        } = recv_event(events).await
        {
            return (console_lines, network_entries);
        }
    }
}

fn sink(state: &FakeState) -> EventSink {
    state
        .sink
        .lock()
        .unwrap()
        .clone()
        .expect("channel should be attached")
}

fn deliver_console(sink: &EventSink) {
    sink.deliver(
        "Console.messageAdded",
        json!({
            "message": {"level": "warning", "text": "boom", "url": "https://x", "line": 3, "column": 7}
        }),
    );
}

fn deliver_network_flow(sink: &EventSink, id: &str) {
    sink.deliver(
        "Network.requestWillBeSent",
        json!({
            "requestId": id,
            "documentURL": "https://x/",
            "request": {"method": "GET", "url": "https://x/a", "headers": {"Accept": "*/*"}},
            "timestamp": 1000.0,
            "wallTime": 1700000000.0,
            "initiator": {"type": "script"}
        }),
    );
    sink.deliver(
        "Network.responseReceived",
        json!({
            "requestId": id,
            "response": {
                "status": 200,
                "statusText": "OK",
                "headers": {"Content-Type": "text/html"},
                "mimeType": "text/html",
                "encodedDataLength": 128.0
            }
        }),
    );
    sink.deliver(
        "Network.loadingFinished",
        json!({"requestId": id, "timestamp": 1000.05, "encodedDataLength": 128.0}),
    );
}

#[tokio::test]
async fn test_attach_failure_is_surfaced_and_state_stays_idle() {
    let state = Arc::new(FakeState {
        fail_attach: true,
        ..Default::default()
    });
    let (handle, mut events) = spawn_service(Arc::clone(&state));

    handle.start_capture();
    match recv_event(&mut events).await {
        ControlEvent::CaptureFailed { reason } => assert!(reason.contains("target gone")),
        other => panic!("expected CaptureFailed, got {:?}", other),
    }

    // Still idle: a stop is a no-op and produces no notification.
    handle.stop_capture();
    assert!(handle.snapshot().await.is_empty());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_start_while_capturing_is_ignored() {
    let state = Arc::new(FakeState::default());
    let (handle, mut events) = spawn_service(Arc::clone(&state));

    handle.start_capture();
    assert!(matches!(
        recv_event(&mut events).await,
        ControlEvent::CaptureStarted { .. }
    ));

    handle.start_capture();
    let _ = handle.snapshot().await;
    assert_eq!(state.attach_calls.load(Ordering::SeqCst), 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_stop_while_idle_is_noop() {
    let state = Arc::new(FakeState::default());
    let (handle, mut events) = spawn_service(Arc::clone(&state));

    handle.stop_capture();
    assert!(handle.snapshot().await.is_empty());
    assert!(events.try_recv().is_err());
    assert_eq!(state.detach_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_end_to_end_capture() {
    let state = Arc::new(FakeState::default());
    let (handle, mut events) = spawn_service(Arc::clone(&state));

    handle.start_capture();
    match recv_event(&mut events).await {
        ControlEvent::CaptureStarted { folder_name } => {
            assert!(folder_name.starts_with("logs/Browser_logs"));
        }
        other => panic!("expected CaptureStarted, got {:?}", other),
    }

    let sink = sink(&state);
    deliver_console(&sink);
    match recv_event(&mut events).await {
        ControlEvent::LogSizeUpdate { size } => assert!(size > 0),
        other => panic!("expected LogSizeUpdate, got {:?}", other),
    }

    deliver_network_flow(&sink, "1");
    // The absorbed entry is an accumulator mutation too, so a second size
    // update marks its arrival.
    assert!(matches!(
        recv_event(&mut events).await,
        ControlEvent::LogSizeUpdate { .. }
    ));

    handle.stop_capture();
    let (console_lines, network_entries) = next_stopped(&mut events).await;
    assert_eq!(console_lines, 1);
    assert_eq!(network_entries, 1);
    assert_eq!(state.detach_calls.load(Ordering::SeqCst), 1);

    let snapshot = handle.snapshot().await;
    assert_eq!(snapshot.network_entries.len(), 1);
    let entry = &snapshot.network_entries[0];
    assert_eq!(entry.request.url, "https://x/a");
    assert_eq!(entry.response.status, 200);
    assert!((entry.time - 50.0).abs() < 1e-6);
    assert_eq!(entry.response.content.text, "hello");

    assert_eq!(snapshot.console_lines.len(), 1);
    assert!(snapshot.console_lines[0]
        .rendered()
        .ends_with("] [Warning] boom (https://x:3:7)"));
}

#[tokio::test]
async fn test_size_update_reports_transcript_bytes() {
    let state = Arc::new(FakeState::default());
    let (handle, mut events) = spawn_service(Arc::clone(&state));

    handle.start_capture();
    let _ = handle.snapshot().await;
    deliver_console(&sink(&state));

    let size = loop {
        if let ControlEvent::LogSizeUpdate { size } = recv_event(&mut events).await {
            break size;
        }
    };

    // The rendered line has a fixed-width timestamp, so its byte length is
    // deterministic regardless of when the event was processed.
    let expected = "[2024-03-01T12:00:00.000Z] [Warning] boom (https://x:3:7)".len() + 1;
    assert_eq!(size, expected);
}

#[tokio::test]
async fn test_straggler_events_after_stop_are_discarded() {
    let state = Arc::new(FakeState::default());
    let (handle, mut events) = spawn_service(Arc::clone(&state));

    handle.start_capture();
    let _ = handle.snapshot().await;
    let sink = sink(&state);

    handle.stop_capture();
    let _ = next_stopped(&mut events).await;

    // Events still in flight after stop mutate nothing.
    deliver_console(&sink);
    let _ = handle.snapshot().await;

    handle.start_capture();
    handle.stop_capture();
    let (console_lines, network_entries) = next_stopped(&mut events).await;
    assert_eq!(console_lines, 0);
    assert_eq!(network_entries, 0);
}

#[tokio::test]
async fn test_body_fetch_failure_still_records_entry() {
    let state = Arc::new(FakeState {
        fail_body: true,
        ..Default::default()
    });
    let (handle, mut events) = spawn_service(Arc::clone(&state));

    handle.start_capture();
    let _ = handle.snapshot().await;
    deliver_network_flow(&sink(&state), "1");

    // Wait for the absorb-side size update before stopping.
    assert!(matches!(
        recv_event(&mut events).await,
        ControlEvent::CaptureStarted { .. }
    ));
    assert!(matches!(
        recv_event(&mut events).await,
        ControlEvent::LogSizeUpdate { .. }
    ));

    handle.stop_capture();
    let (_, network_entries) = next_stopped(&mut events).await;
    assert_eq!(network_entries, 1);

    let snapshot = handle.snapshot().await;
    let entry = &snapshot.network_entries[0];
    assert_eq!(entry.response.content.text, "");
    assert!(entry.response.content.encoding.is_none());
}

#[tokio::test]
async fn test_late_body_fetch_after_stop_is_discarded() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let state = Arc::new(FakeState {
        body_gate: Some(Arc::clone(&gate)),
        ..Default::default()
    });
    let (handle, mut events) = spawn_service(Arc::clone(&state));

    handle.start_capture();
    let _ = handle.snapshot().await;
    deliver_network_flow(&sink(&state), "1");

    // Make sure the finish event was processed and the fetch is parked on
    // the gate before stopping.
    let _ = handle.snapshot().await;
    handle.stop_capture();
    let (_, network_entries) = next_stopped(&mut events).await;
    assert_eq!(network_entries, 0);

    // A new session is live when the stale fetch finally resolves.
    handle.start_capture();
    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(100)).await;

    handle.stop_capture();
    let (_, network_entries) = next_stopped(&mut events).await;
    assert_eq!(network_entries, 0);
    assert!(handle.snapshot().await.network_entries.is_empty());
}
