//! The capture state machine.
//!
//! A `Recorder` is either idle or holds one live `CaptureSession`. All event
//! intake is gated on that state, and every deferred body-fetch result is
//! additionally gated on the session id it was issued under — a fetch that
//! resolves after its session stopped must not leak into a later session's
//! accumulator.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::accumulator::LogAccumulator;
use crate::correlator::RequestCorrelator;
use crate::export::{self, LogSnapshot};
use tabscope_common::console::ConsoleLogLine;
use tabscope_common::har::NetworkEntry;
use tabscope_common::protocol::DebuggerEvent;

#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub id: u64,
    /// Run folder derived from the session start time,
    /// e.g. `logs/Browser_logs2024-03-01_12-30-00`.
    pub folder_name: String,
    pub started_at: DateTime<Utc>,
}

/// Directive to fetch a finalized entry's response body. The entry is not in
/// the accumulator yet; it is absorbed once the fetch resolves, and only if
/// the session id still matches.
#[derive(Debug)]
pub struct BodyFetch {
    pub session_id: u64,
    pub entry: NetworkEntry,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Dropped: no live session, or an unrecognized event.
    Ignored,
    /// A console line was appended to the accumulator.
    ConsoleAppended,
    /// Correlator state advanced; nothing was appended.
    CorrelatorAdvanced,
    /// A request completed correlation; fetch its body, then absorb it.
    FetchBody(BodyFetch),
}

#[derive(Debug)]
pub struct Recorder {
    session: Option<CaptureSession>,
    next_session_id: u64,
    correlator: RequestCorrelator,
    accumulator: LogAccumulator,
    last_snapshot: LogSnapshot,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            session: None,
            next_session_id: 1,
            correlator: RequestCorrelator::new(),
            accumulator: LogAccumulator::new(),
            last_snapshot: LogSnapshot::default(),
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    /// Enter the capturing state. Valid from idle; a repeated call keeps the
    /// running session.
    pub fn begin_session(&mut self, now: DateTime<Utc>) -> CaptureSession {
        if let Some(session) = &self.session {
            warn!("begin_session while session {} is live; keeping it", session.id);
            return session.clone();
        }

        let id = self.next_session_id;
        self.next_session_id += 1;
        let session = CaptureSession {
            id,
            folder_name: run_folder_name(now),
            started_at: now,
        };
        info!("capture session {} started ({})", id, session.folder_name);
        self.session = Some(session.clone());
        session
    }

    /// Leave the capturing state: freeze a snapshot, then reset the
    /// accumulator and correlator. Returns `None` when already idle (at-most-
    /// once teardown; a second stop is a no-op).
    pub fn end_session(&mut self) -> Option<LogSnapshot> {
        let session = self.session.take()?;
        let snapshot = export::take_snapshot(&self.accumulator);
        info!(
            "capture session {} ended: {} console lines, {} network entries",
            session.id,
            snapshot.console_lines.len(),
            snapshot.network_entries.len()
        );
        self.last_snapshot = snapshot.clone();
        self.accumulator.reset();
        self.correlator.reset();
        Some(snapshot)
    }

    /// Route one decoded event. Everything is discarded while idle — a
    /// straggler arriving between stop and channel teardown mutates nothing.
    pub fn dispatch(&mut self, event: DebuggerEvent, now: DateTime<Utc>) -> DispatchOutcome {
        let session_id = match &self.session {
            Some(session) => session.id,
            None => {
                debug!("discarding event delivered while idle");
                return DispatchOutcome::Ignored;
            }
        };

        match event {
            DebuggerEvent::ConsoleMessage(message) => {
                let line = ConsoleLogLine::new(now, &message);
                debug!("captured console line: {}", line.rendered());
                self.accumulator.append_console_line(line);
                DispatchOutcome::ConsoleAppended
            }
            DebuggerEvent::RequestStarted(params) => {
                self.correlator.on_request_started(params);
                DispatchOutcome::CorrelatorAdvanced
            }
            DebuggerEvent::ResponseReceived(params) => {
                self.correlator
                    .on_response_received(&params.request_id, params.response);
                DispatchOutcome::CorrelatorAdvanced
            }
            DebuggerEvent::RequestFinished(params) => {
                match self
                    .correlator
                    .on_request_finished(&params.request_id, params.timestamp)
                {
                    Some(entry) => DispatchOutcome::FetchBody(BodyFetch { session_id, entry }),
                    None => DispatchOutcome::CorrelatorAdvanced,
                }
            }
            DebuggerEvent::Unrecognized => DispatchOutcome::Ignored,
        }
    }

    /// Append a finalized entry, unless its originating session is gone. The
    /// session id check (not just a capturing flag) prevents a stale fetch
    /// from corrupting a session started after its own stopped.
    pub fn absorb_entry(&mut self, session_id: u64, entry: NetworkEntry) -> bool {
        match &self.session {
            Some(session) if session.id == session_id => {
                self.accumulator.append_network_entry(entry);
                true
            }
            _ => {
                debug!(
                    "discarding body fetch result for request {} of ended session {}",
                    entry.request_id, session_id
                );
                false
            }
        }
    }

    pub fn current_byte_size(&self) -> usize {
        self.accumulator.current_byte_size()
    }

    pub fn accumulator(&self) -> &LogAccumulator {
        &self.accumulator
    }

    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Snapshot taken at the most recent stop; empty before the first stop.
    pub fn last_snapshot(&self) -> &LogSnapshot {
        &self.last_snapshot
    }
}

fn run_folder_name(start: DateTime<Utc>) -> String {
    format!(
        "logs/Browser_logs{}_{}",
        start.format("%Y-%m-%d"),
        start.format("%H-%M-%S")
    )
}
