/// Deterministic event log: the structured, sequence-numbered audit
/// record of every state entry/exit/transition/error/user-action/timeout.
///
/// Bounded with FIFO eviction so an error loop can never exhaust memory.
/// Sequence numbers are a total order over all events, independent of
/// wall-clock jitter. Event/reason/data fields originate from operator
/// input or decoded RF and are untrusted: the serial mirror passes them
/// as format arguments, JSON export goes through the serializer's string
/// escaping, and CSV export applies standard quoting.
use alloc::collections::VecDeque;
use core::fmt;
use core::fmt::Write as _;

use serde::Serialize;

use crate::workflow::WorkflowState;

/// Entries kept before the oldest is evicted.
pub const EVENT_LOG_CAPACITY: usize = 256;

/// Scratch space for one serialized entry. Sized for the worst case of
/// every byte of every string field needing a six-byte escape.
const ENTRY_SCRATCH: usize = 2048;

pub type EventTag = heapless::String<32>;
pub type ReasonString = heapless::String<64>;
pub type DataString = heapless::String<64>;

/// Kind of audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    StateEntry,
    StateExit,
    Transition,
    Error,
    UserAction,
    Timeout,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StateEntry => "STATE_ENTRY",
            EventKind::StateExit => "STATE_EXIT",
            EventKind::Transition => "TRANSITION",
            EventKind::Error => "ERROR",
            EventKind::UserAction => "USER_ACTION",
            EventKind::Timeout => "TIMEOUT",
        }
    }
}

/// One audited event.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub seq: u32,
    pub timestamp_ms: u32,
    pub timestamp_us: u64,
    pub kind: EventKind,
    pub state: WorkflowState,
    pub prev_state: WorkflowState,
    pub event: EventTag,
    pub reason: ReasonString,
    pub data: DataString,
}

/// Wire shape of one exported entry; string fields are escaped by the
/// serializer.
#[derive(Serialize)]
struct WireEntry<'a> {
    seq: u32,
    timestamp_ms: u32,
    timestamp_us: u64,
    event_type: &'a str,
    state: &'a str,
    prev_state: &'a str,
    event: &'a str,
    reason: &'a str,
    data: &'a str,
}

/// Append-only, bounded event log.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    next_seq: u32,
    enabled: bool,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_seq: 0,
            enabled: true,
        }
    }

    /// Toggle recording. Disabled logs drop events but keep existing
    /// entries and the sequence counter.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        log::info!(
            "deterministic logging {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append an event, assigning the next sequence number and evicting
    /// the oldest entry at capacity. `event`/`reason`/`data` are clipped
    /// to their field widths.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        kind: EventKind,
        state: WorkflowState,
        prev_state: WorkflowState,
        event: &str,
        reason: &str,
        data: &str,
        timestamp_ms: u32,
        timestamp_us: u64,
    ) {
        if !self.enabled {
            return;
        }
        if self.entries.len() >= EVENT_LOG_CAPACITY {
            self.entries.pop_front();
        }

        let entry = LogEntry {
            seq: self.next_seq,
            timestamp_ms,
            timestamp_us,
            kind,
            state,
            prev_state,
            event: clipped(event),
            reason: clipped(reason),
            data: clipped(data),
        };
        self.next_seq = self.next_seq.wrapping_add(1);

        // Serial mirror. Untrusted fields stay arguments.
        log::debug!(
            "audit seq={} ts_ms={} ts_us={} type={} state={} prev={} event={} reason={} data={}",
            entry.seq,
            entry.timestamp_ms,
            entry.timestamp_us,
            kind.as_str(),
            state.as_str(),
            prev_state.as_str(),
            entry.event,
            entry.reason,
            entry.data
        );

        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LogEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Drop all entries and restart the sequence.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_seq = 0;
    }

    // ── Export ──────────────────────────────────────────────────────

    /// Stream the log as a `{"workflow_logs": [...]}` document.
    pub fn export_json<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        out.write_str("{\"workflow_logs\":[")?;
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                out.write_str(",")?;
            }
            let wire = WireEntry {
                seq: entry.seq,
                timestamp_ms: entry.timestamp_ms,
                timestamp_us: entry.timestamp_us,
                event_type: entry.kind.as_str(),
                state: entry.state.as_str(),
                prev_state: entry.prev_state.as_str(),
                event: &entry.event,
                reason: &entry.reason,
                data: &entry.data,
            };
            let mut scratch = [0u8; ENTRY_SCRATCH];
            let len = serde_json_core::to_slice(&wire, &mut scratch).map_err(|_| fmt::Error)?;
            out.write_str(core::str::from_utf8(&scratch[..len]).map_err(|_| fmt::Error)?)?;
        }
        out.write_str("]}")
    }

    /// Stream the log as CSV with standard quoting, safe against field
    /// content breaking row structure or injecting columns downstream.
    pub fn export_csv<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        out.write_str(
            "sequence,timestamp_ms,timestamp_us,event_type,state,prev_state,event,reason,data\n",
        )?;
        for entry in &self.entries {
            write!(
                out,
                "{},{},{},{},{},{},",
                entry.seq,
                entry.timestamp_ms,
                entry.timestamp_us,
                entry.kind.as_str(),
                entry.state.as_str(),
                entry.prev_state.as_str()
            )?;
            csv_field(out, &entry.event)?;
            out.write_str(",")?;
            csv_field(out, &entry.reason)?;
            out.write_str(",")?;
            csv_field(out, &entry.data)?;
            out.write_str("\n")?;
        }
        Ok(())
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy `s` into a bounded string, clipping at the last char boundary
/// that fits.
pub(crate) fn clipped<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    let mut end = N.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let _ = out.push_str(&s[..end]);
    out
}

/// Write one CSV field, double-quoting when it contains a comma, quote,
/// or line break, with embedded quotes doubled.
fn csv_field<W: fmt::Write>(out: &mut W, field: &str) -> fmt::Result {
    let needs_quoting = field
        .chars()
        .any(|c| matches!(c, ',' | '"' | '\n' | '\r'));
    if !needs_quoting {
        return out.write_str(field);
    }
    out.write_char('"')?;
    for c in field.chars() {
        if c == '"' {
            out.write_str("\"\"")?;
        } else {
            out.write_char(c)?;
        }
    }
    out.write_char('"')
}
