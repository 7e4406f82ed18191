//! In-memory log accumulation.
//!
//! Two growing sequences (console lines, finalized network entries) and a
//! running byte counter. `reset` is the only way the sequences shrink; there
//! is no eviction, so a capture session is implicitly bounded by memory. The
//! byte counter tracks console output only and is exposed so a caller can
//! layer a size policy on top without the accumulator knowing about limits.

use tracing::debug;

use tabscope_common::console::ConsoleLogLine;
use tabscope_common::har::NetworkEntry;

#[derive(Debug, Default)]
pub struct LogAccumulator {
    console_lines: Vec<ConsoleLogLine>,
    network_entries: Vec<NetworkEntry>,
    byte_size: usize,
}

impl LogAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_console_line(&mut self, line: ConsoleLogLine) {
        self.byte_size += line.encoded_len();
        self.console_lines.push(line);
    }

    pub fn append_network_entry(&mut self, entry: NetworkEntry) {
        self.network_entries.push(entry);
    }

    /// Running UTF-8 byte size of the console transcript (one newline per
    /// line included). Network entries do not count toward this.
    pub fn current_byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn console_lines(&self) -> &[ConsoleLogLine] {
        &self.console_lines
    }

    pub fn network_entries(&self) -> &[NetworkEntry] {
        &self.network_entries
    }

    /// Clear both sequences and zero the size counter.
    pub fn reset(&mut self) {
        debug!(
            "resetting accumulator ({} console lines, {} network entries)",
            self.console_lines.len(),
            self.network_entries.len()
        );
        self.console_lines.clear();
        self.network_entries.clear();
        self.byte_size = 0;
    }
}
