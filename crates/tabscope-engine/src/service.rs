//! The capture service.
//!
//! One task owns all mutable capture state (the `Recorder`); everything else
//! talks to it through an intake queue. Control commands, raw channel events
//! and body-fetch completions all land in the same queue, so callbacks run
//! strictly one at a time and no lock guards the correlator map or the
//! accumulator sequences. Body fetches are spawned, not awaited inline —
//! other events keep flowing while a fetch is outstanding, and a completion
//! re-enters the queue as a later, independent message.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::channel::{Channel, RawEvent};
use crate::export::LogSnapshot;
use crate::recorder::{BodyFetch, DispatchOutcome, Recorder};
use tabscope_common::har::NetworkEntry;
use tabscope_common::protocol::DebuggerEvent;

/// Streams enabled on the channel when capture starts.
const CAPTURE_STREAMS: [&str; 2] = ["Network", "Console"];

/// Commands into the controller. Start/stop are fire-and-forget; snapshot
/// retrieval is request/response.
#[derive(Debug)]
pub enum ControlCommand {
    StartCapture,
    StopCapture,
    GetSnapshot { reply: oneshot::Sender<LogSnapshot> },
}

/// Notifications out of the controller.
#[derive(Debug, Clone)]
pub enum ControlEvent {
    CaptureStarted {
        folder_name: String,
    },
    /// Channel attachment failed; the controller stayed idle.
    CaptureFailed {
        reason: String,
    },
    CaptureStopped {
        folder_name: String,
        console_lines: usize,
        network_entries: usize,
    },
    /// Emitted after every accumulator mutation.
    LogSizeUpdate {
        size: usize,
    },
}

enum Intake {
    Command(ControlCommand),
    Event(RawEvent),
    Body { session_id: u64, entry: NetworkEntry },
}

/// Callback handle a channel uses to deliver raw events. Delivery goes
/// straight into the service's intake queue, preserving arrival order
/// relative to commands and body completions.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Intake>,
}

impl EventSink {
    /// Returns false once the service is gone; the channel should stop
    /// forwarding.
    pub fn deliver(&self, method: impl Into<String>, params: Value) -> bool {
        self.tx
            .send(Intake::Event(RawEvent {
                method: method.into(),
                params,
            }))
            .is_ok()
    }
}

/// Cloneable handle for driving a running service.
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::UnboundedSender<Intake>,
}

impl ServiceHandle {
    pub fn start_capture(&self) {
        let _ = self.tx.send(Intake::Command(ControlCommand::StartCapture));
    }

    pub fn stop_capture(&self) {
        let _ = self.tx.send(Intake::Command(ControlCommand::StopCapture));
    }

    /// The most recent stop's snapshot; empty before the first stop. Also
    /// acts as a barrier: the reply is sent only after every message queued
    /// before this one has been processed.
    pub async fn snapshot(&self) -> LogSnapshot {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Intake::Command(ControlCommand::GetSnapshot { reply }))
            .is_err()
        {
            return LogSnapshot::default();
        }
        rx.await.unwrap_or_default()
    }
}

pub struct CaptureService<C: Channel> {
    channel: Arc<C>,
    recorder: Recorder,
    intake_tx: mpsc::UnboundedSender<Intake>,
    intake_rx: mpsc::UnboundedReceiver<Intake>,
    events_tx: mpsc::UnboundedSender<ControlEvent>,
}

impl<C: Channel> CaptureService<C> {
    pub fn new(channel: C) -> (Self, ServiceHandle, mpsc::UnboundedReceiver<ControlEvent>) {
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = ServiceHandle {
            tx: intake_tx.clone(),
        };
        let service = Self {
            channel: Arc::new(channel),
            recorder: Recorder::new(),
            intake_tx,
            intake_rx,
            events_tx,
        };
        (service, handle, events_rx)
    }

    /// Drive the service until the process ends. Spawn this.
    pub async fn run(mut self) {
        while let Some(intake) = self.intake_rx.recv().await {
            match intake {
                Intake::Command(cmd) => self.handle_command(cmd).await,
                Intake::Event(raw) => self.handle_event(raw),
                Intake::Body { session_id, entry } => self.handle_body(session_id, entry),
            }
        }
    }

    async fn handle_command(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::StartCapture => self.start_capture().await,
            ControlCommand::StopCapture => self.stop_capture().await,
            ControlCommand::GetSnapshot { reply } => {
                let _ = reply.send(self.recorder.last_snapshot().clone());
            }
        }
    }

    async fn start_capture(&mut self) {
        if self.recorder.is_capturing() {
            warn!("startCapture ignored; a capture session is already running");
            return;
        }

        let sink = EventSink {
            tx: self.intake_tx.clone(),
        };
        if let Err(e) = self.channel.attach(sink).await {
            error!("instrumentation channel attach failed: {}", e);
            self.emit(ControlEvent::CaptureFailed {
                reason: e.to_string(),
            });
            return;
        }

        for stream in CAPTURE_STREAMS {
            if let Err(e) = self.channel.enable(stream).await {
                error!("enabling {} events failed: {}", stream, e);
                if let Err(detach_err) = self.channel.detach().await {
                    warn!("detach after failed enable also failed: {}", detach_err);
                }
                self.emit(ControlEvent::CaptureFailed {
                    reason: e.to_string(),
                });
                return;
            }
        }

        let session = self.recorder.begin_session(Utc::now());
        self.emit(ControlEvent::CaptureStarted {
            folder_name: session.folder_name,
        });
    }

    async fn stop_capture(&mut self) {
        let folder_name = match self.recorder.session() {
            Some(session) => session.folder_name.clone(),
            None => {
                debug!("stopCapture ignored; no capture session is running");
                return;
            }
        };

        let snapshot = match self.recorder.end_session() {
            Some(snapshot) => snapshot,
            None => return,
        };

        if let Err(e) = self.channel.detach().await {
            warn!("instrumentation channel detach failed: {}", e);
        }

        self.emit(ControlEvent::CaptureStopped {
            folder_name,
            console_lines: snapshot.console_lines.len(),
            network_entries: snapshot.network_entries.len(),
        });
        // The reset is an accumulator mutation too.
        self.emit_size();
    }

    fn handle_event(&mut self, raw: RawEvent) {
        let event = DebuggerEvent::decode(&raw.method, raw.params);
        match self.recorder.dispatch(event, Utc::now()) {
            DispatchOutcome::Ignored | DispatchOutcome::CorrelatorAdvanced => {}
            DispatchOutcome::ConsoleAppended => self.emit_size(),
            DispatchOutcome::FetchBody(fetch) => self.spawn_body_fetch(fetch),
        }
    }

    fn handle_body(&mut self, session_id: u64, entry: NetworkEntry) {
        if self.recorder.absorb_entry(session_id, entry) {
            self.emit_size();
        }
    }

    /// Fetch the body off the dispatch path. The completion re-enters the
    /// intake queue tagged with the issuing session, so a late resolution is
    /// discarded instead of landing in a newer session. No timeout and no
    /// cancellation on stop.
    fn spawn_body_fetch(&self, fetch: BodyFetch) {
        let channel = Arc::clone(&self.channel);
        let tx = self.intake_tx.clone();
        tokio::spawn(async move {
            let BodyFetch { session_id, entry } = fetch;
            let entry = match channel.fetch_body(&entry.request_id).await {
                Ok(body) => entry.with_body(body),
                Err(e) => {
                    debug!("body fetch failed for request {}: {}", entry.request_id, e);
                    entry
                }
            };
            let _ = tx.send(Intake::Body { session_id, entry });
        });
    }

    fn emit_size(&self) {
        self.emit(ControlEvent::LogSizeUpdate {
            size: self.recorder.current_byte_size(),
        });
    }

    fn emit(&self, event: ControlEvent) {
        let _ = self.events_tx.send(event);
    }
}
