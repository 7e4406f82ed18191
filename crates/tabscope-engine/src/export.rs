//! Snapshot export.
//!
//! `take_snapshot` freezes the accumulator's contents; the snapshot stays
//! stable while a new session accumulates. The snapshot renders to the two
//! deliverable artifacts: a plain-text console transcript and a HAR document.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::accumulator::LogAccumulator;
use tabscope_common::console::ConsoleLogLine;
use tabscope_common::har::{HarCreator, HarDocument, HarLog, NetworkEntry};

pub const CONSOLE_ARTIFACT: &str = "console_logs.txt";
pub const NETWORK_ARTIFACT: &str = "network_logs.har";

const HAR_VERSION: &str = "1.2";
const HAR_CREATOR_NAME: &str = "WebInspector";

/// An immutable copy of the accumulator's contents at the moment capture
/// stopped. No aliasing with the live accumulator.
#[derive(Debug, Clone, Default)]
pub struct LogSnapshot {
    pub console_lines: Vec<ConsoleLogLine>,
    pub network_entries: Vec<NetworkEntry>,
}

impl LogSnapshot {
    pub fn is_empty(&self) -> bool {
        self.console_lines.is_empty() && self.network_entries.is_empty()
    }
}

pub fn take_snapshot(accumulator: &LogAccumulator) -> LogSnapshot {
    LogSnapshot {
        console_lines: accumulator.console_lines().to_vec(),
        network_entries: accumulator.network_entries().to_vec(),
    }
}

pub fn build_har_document(snapshot: &LogSnapshot) -> HarDocument {
    HarDocument {
        log: HarLog {
            version: HAR_VERSION.to_string(),
            creator: HarCreator {
                name: HAR_CREATOR_NAME.to_string(),
                version: HAR_VERSION.to_string(),
            },
            entries: snapshot.network_entries.clone(),
        },
    }
}

/// Render the console transcript, one rendered line plus newline per entry.
pub fn render_transcript(snapshot: &LogSnapshot) -> String {
    let mut transcript = String::new();
    for line in &snapshot.console_lines {
        transcript.push_str(line.rendered());
        transcript.push('\n');
    }
    transcript
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Failed to serialize HAR document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// Write `console_logs.txt` and `network_logs.har` into `dir`, creating it
/// as needed. Empty sections are skipped. Returns the paths written.
pub async fn write_artifacts(snapshot: &LogSnapshot, dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    tokio::fs::create_dir_all(dir).await?;
    let mut written = Vec::new();

    if !snapshot.console_lines.is_empty() {
        let path = dir.join(CONSOLE_ARTIFACT);
        tokio::fs::write(&path, render_transcript(snapshot)).await?;
        written.push(path);
    }

    if !snapshot.network_entries.is_empty() {
        let path = dir.join(NETWORK_ARTIFACT);
        let document = build_har_document(snapshot);
        tokio::fs::write(&path, serde_json::to_string_pretty(&document)?).await?;
        written.push(path);
    }

    info!("wrote {} artifacts to {}", written.len(), dir.display());
    Ok(written)
}
