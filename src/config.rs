/// Workflow configuration and compiled-in safety constants.
///
/// Timing defaults mirror the shipped firmware profile; the frequency
/// blacklist is the compiled-in baseline that `SafetyContext` seeds from
/// (runtime additions/removals layer on top).

/// RF band a workflow run operates on. Selected once per `initialize()`;
/// the bound radio collaborator must report the same band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfBand {
    /// Sub-GHz OOK/ASK pulse signals (433 MHz class hardware).
    Sub1GHz,
    /// 2.4 GHz packet radios.
    Band2_4GHz,
}

impl RfBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RfBand::Sub1GHz => "SUB_1GHZ",
            RfBand::Band2_4GHz => "2_4GHZ",
        }
    }
}

// ── Workflow timing defaults (milliseconds) ─────────────────────────────

pub const DEFAULT_INIT_TIMEOUT_MS: u32 = 5_000;
pub const DEFAULT_LISTEN_MIN_MS: u32 = 1_000;
pub const DEFAULT_LISTEN_MAX_MS: u32 = 60_000;
pub const DEFAULT_ANALYZE_TIMEOUT_MS: u32 = 10_000;
pub const DEFAULT_READY_TIMEOUT_MS: u32 = 120_000;
pub const DEFAULT_TX_GATE_TIMEOUT_MS: u32 = 10_000;
pub const DEFAULT_TRANSMIT_MAX_MS: u32 = 5_000;
pub const DEFAULT_CLEANUP_TIMEOUT_MS: u32 = 5_000;

/// Default capture-buffer capacity (records).
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Control-loop pacing inside the blocking `start()` driver.
pub const LOOP_INTERVAL_MS: u32 = 10;

// ── Safety constants ────────────────────────────────────────────────────

/// Listening exits to analysis once the buffer reaches this fill ratio,
/// keeping headroom so a poll burst never overflows the buffer.
pub const BUFFER_FILL_THRESHOLD: f32 = 0.9;

/// Run-scoped error count that forces an immediate cleanup.
pub const ERROR_THRESHOLD: u32 = 10;

/// Transmission attempts permitted per run before gating is refused.
pub const MAX_TX_ATTEMPTS: u8 = 3;

/// Frequencies that must never be transmitted on (MHz). Aviation
/// emergency channels; `SafetyContext` seeds its runtime blacklist here.
pub static FREQ_BLACKLIST: &[f32] = &[121.5, 243.0];

/// Blacklist match tolerance: within 100 kHz counts as a hit.
pub const FREQ_TOLERANCE_MHZ: f32 = 0.1;

/// Default transmissions permitted per trailing minute.
pub const DEFAULT_RATE_LIMIT_PER_MIN: u32 = 10;

/// Rolling window for the rate-limit ledger.
pub const RATE_WINDOW_MS: u32 = 60_000;

/// OOK transmissions repeat the pulse train this many times; duration
/// estimates scale by it.
pub const TX_REPEATS: u32 = 10;

// ── Band validation constants ───────────────────────────────────────────

/// Minimum pulse samples for a sub-GHz record to be considered a signal.
pub const MIN_PULSE_COUNT: usize = 10;
/// Acceptable pulse widths (microseconds), inclusive.
pub const PULSE_MIN_US: u16 = 100;
pub const PULSE_MAX_US: u16 = 10_000;
/// Weakest usable pulse-band signal, when strength was measured.
pub const MIN_PULSE_RSSI_DBM: i8 = -100;
/// Weakest usable 2.4 GHz packet.
pub const MIN_PACKET_RSSI_DBM: i8 = -90;

/// Per-run workflow configuration.
///
/// Every non-`Idle` state carries a timeout from this table; `Listening`
/// additionally enforces a minimum dwell before any exit is permitted.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub band: RfBand,
    pub init_timeout_ms: u32,
    pub listen_min_ms: u32,
    pub listen_max_ms: u32,
    pub analyze_timeout_ms: u32,
    pub ready_timeout_ms: u32,
    pub tx_gate_timeout_ms: u32,
    pub transmit_max_ms: u32,
    pub cleanup_timeout_ms: u32,
    pub buffer_capacity: usize,
    /// Run the full gate/state pipeline but never touch transmit hardware.
    pub dry_run: bool,
}

impl WorkflowConfig {
    pub const fn new(band: RfBand) -> Self {
        Self {
            band,
            init_timeout_ms: DEFAULT_INIT_TIMEOUT_MS,
            listen_min_ms: DEFAULT_LISTEN_MIN_MS,
            listen_max_ms: DEFAULT_LISTEN_MAX_MS,
            analyze_timeout_ms: DEFAULT_ANALYZE_TIMEOUT_MS,
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
            tx_gate_timeout_ms: DEFAULT_TX_GATE_TIMEOUT_MS,
            transmit_max_ms: DEFAULT_TRANSMIT_MAX_MS,
            cleanup_timeout_ms: DEFAULT_CLEANUP_TIMEOUT_MS,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            dry_run: false,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self::new(RfBand::Sub1GHz)
    }
}
