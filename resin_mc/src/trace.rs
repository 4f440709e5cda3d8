//! Bounded history of link traffic.
//!
//! The last [`TRACE_DEPTH`] lines written to or read from the MC are kept for
//! diagnostics and replayed to a debug client. Consecutive identical entries
//! are folded into one with a repeat count, so polling loops do not flush the
//! interesting part of the history.

use heapless::Deque;
use parking_lot::Mutex;
use resin_common::consts::TRACE_DEPTH;
use std::fmt;

/// Direction / kind of a traced line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMarker {
    /// Line received as part of a response.
    Input,
    /// Line written to the MC.
    Output,
    /// Unsolicited line.
    Garbage,
    /// MC reset.
    Reset,
}

impl TraceMarker {
    pub const fn symbol(self) -> char {
        match self {
            Self::Input => '<',
            Self::Output => '>',
            Self::Garbage => 'G',
            Self::Reset => 'R',
        }
    }
}

/// One entry of the trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTrace {
    pub marker: TraceMarker,
    pub line: String,
    pub repeat: u32,
}

impl LineTrace {
    pub fn new(marker: TraceMarker, line: impl AsRef<[u8]>) -> Self {
        let text = String::from_utf8_lossy(line.as_ref());
        Self {
            marker,
            line: text.trim_end().to_string(),
            repeat: 1,
        }
    }
}

impl fmt::Display for LineTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.marker.symbol(), self.line)?;
        if self.repeat > 1 {
            write!(f, " (x{})", self.repeat)?;
        }
        Ok(())
    }
}

/// Ring of the most recent [`LineTrace`] entries.
#[derive(Default)]
pub struct Trace {
    entries: Mutex<Deque<LineTrace, TRACE_DEPTH>>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, dropping the oldest one when full.
    pub fn append(&self, entry: LineTrace) {
        let mut entries = self.entries.lock();
        if let Some(last) = entries.back_mut() {
            if last.marker == entry.marker && last.line == entry.line {
                last.repeat = last.repeat.saturating_add(1);
                return;
            }
        }
        if entries.is_full() {
            entries.pop_front();
        }
        // Cannot fail: a slot was freed above.
        let _ = entries.push_back(entry);
    }

    pub fn record(&self, marker: TraceMarker, line: impl AsRef<[u8]>) {
        self.append(LineTrace::new(marker, line));
    }

    /// Copy of the current history, oldest first.
    pub fn snapshot(&self) -> Vec<LineTrace> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in self.snapshot() {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trace").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_last_entries() {
        let trace = Trace::new();
        for i in 0..(TRACE_DEPTH + 5) {
            trace.record(TraceMarker::Output, format!("?tipo {i}\n"));
        }
        let snapshot = trace.snapshot();
        assert_eq!(snapshot.len(), TRACE_DEPTH);
        assert_eq!(snapshot[0].line, "?tipo 5");
        assert_eq!(snapshot[TRACE_DEPTH - 1].line, format!("?tipo {}", TRACE_DEPTH + 4));
    }

    #[test]
    fn folds_repeated_lines() {
        let trace = Trace::new();
        trace.record(TraceMarker::Output, "?mot\n");
        trace.record(TraceMarker::Output, "?mot\n");
        trace.record(TraceMarker::Input, "2 ok\n");
        trace.record(TraceMarker::Output, "?mot\n");
        let snapshot = trace.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].repeat, 2);
        assert_eq!(snapshot[0].to_string(), "> ?mot (x2)");
        assert_eq!(snapshot[1].to_string(), "< 2 ok");
    }

    #[test]
    fn display_lists_entries() {
        let trace = Trace::new();
        trace.record(TraceMarker::Reset, "Motion controller hard reset");
        trace.record(TraceMarker::Garbage, "# boot\n");
        assert_eq!(trace.to_string(), "R Motion controller hard reset\nG # boot\n");
    }
}
