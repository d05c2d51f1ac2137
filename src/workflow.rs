/// Workflow state machine: the orchestrator that owns the capture
/// buffer, drives observation, analysis, gating, transmission, and
/// cleanup, and enforces every timeout.
///
/// One control-loop iteration is one [`Workflow::step`]: emergency check,
/// state processing, generic timeout check, error-threshold check.
/// [`Workflow::start`] wraps that in a blocking loop for platforms that
/// hand the core its own thread; firmware main loops call `step()`
/// directly. Exactly one state is active at a time, every terminal path
/// funnels through `Cleanup`, and the transmitter is disabled everywhere
/// except inside `Transmit`.
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt::Write as _;

use crate::analysis::{self, AnalysisResult};
use crate::audit::{clipped, EventKind, EventLog};
use crate::clock::Clock;
use crate::config::{
    RfBand, WorkflowConfig, BUFFER_FILL_THRESHOLD, ERROR_THRESHOLD, LOOP_INTERVAL_MS,
    MAX_TX_ATTEMPTS,
};
use crate::gates::{estimate_duration_ms, GateChain, GateInputs, GateOutcome, GateReport};
use crate::radio::{RadioError, RadioLink};
use crate::safety::{SafetyContext, TransmitRecord};
use crate::signal::{CaptureBuffer, CapturedSignal, ProtocolString};
use crate::telemetry::{DeviceMessage, VERSION};

/// Transition-history entries kept before FIFO eviction.
pub const TRANSITION_LOG_CAPACITY: usize = 64;
/// Error-history entries kept before FIFO eviction.
pub const ERROR_LOG_CAPACITY: usize = 32;

/// Workflow states. `Idle` is entered only from `Cleanup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    Init,
    Listening,
    Analyzing,
    Ready,
    TxGated,
    Transmit,
    Cleanup,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "IDLE",
            WorkflowState::Init => "INIT",
            WorkflowState::Listening => "LISTENING",
            WorkflowState::Analyzing => "ANALYZING",
            WorkflowState::Ready => "READY",
            WorkflowState::TxGated => "TX_GATED",
            WorkflowState::Transmit => "TRANSMIT",
            WorkflowState::Cleanup => "CLEANUP",
        }
    }
}

/// Error taxonomy. Terminal for the attempt, never a crash: each is
/// recorded, counted, mirrored into the audit log, and resolved into a
/// state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("initialization failed")]
    InitFailed,
    #[error("hardware failure")]
    HardwareFailure,
    #[error("buffer overflow")]
    BufferOverflow,
    #[error("timeout")]
    Timeout,
    #[error("invalid signal")]
    InvalidSignal,
    #[error("transmission failed")]
    TransmissionFailed,
    #[error("transmission gate denied")]
    GateDenied,
}

/// One recorded error.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub error: WorkflowError,
    pub message: heapless::String<64>,
    pub at_ms: u32,
}

/// One recorded state transition.
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub timestamp_ms: u32,
    pub reason: heapless::String<64>,
}

/// Latched user intents, set by the UI layer and consumed by `step()`.
#[derive(Debug, Default)]
struct Controls {
    trigger_analysis: bool,
    selected_index: Option<usize>,
    confirm: bool,
    cancel: bool,
    continue_observation: bool,
}

/// The workflow orchestrator.
pub struct Workflow {
    config: WorkflowConfig,
    clock: Box<dyn Clock>,
    radio: Option<Box<dyn RadioLink>>,

    state: WorkflowState,
    prev_state: WorkflowState,
    state_entry_ms: u32,
    workflow_start_ms: u32,
    running: bool,
    emergency_stop: bool,
    controls: Controls,

    buffer: CaptureBuffer,
    /// Peer addresses observed this run (packet band); the band gate's
    /// binding set. Cleared at `Init`, never expired mid-run.
    bindings: Vec<ProtocolString>,
    analysis: AnalysisResult,

    safety: SafetyContext,
    gate_chain: Option<GateChain>,
    gate_report: GateReport,
    attempts: u8,
    tx_selected: Option<usize>,

    last_error: Option<WorkflowError>,
    error_count: u32,
    errors: VecDeque<ErrorRecord>,
    transitions: VecDeque<TransitionRecord>,
    audit: EventLog,
}

impl Workflow {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self {
            config: WorkflowConfig::default(),
            clock,
            radio: None,
            state: WorkflowState::Idle,
            prev_state: WorkflowState::Idle,
            state_entry_ms: 0,
            workflow_start_ms: 0,
            running: false,
            emergency_stop: false,
            controls: Controls::default(),
            buffer: CaptureBuffer::new(),
            bindings: Vec::new(),
            analysis: AnalysisResult::default(),
            safety: SafetyContext::new(),
            gate_chain: None,
            gate_report: GateReport::default(),
            attempts: 0,
            tx_selected: None,
            last_error: None,
            error_count: 0,
            errors: VecDeque::new(),
            transitions: VecDeque::new(),
            audit: EventLog::new(),
        }
    }

    /// Bind configuration and the band-matching radio collaborator.
    pub fn initialize(
        &mut self,
        config: WorkflowConfig,
        radio: Box<dyn RadioLink>,
    ) -> Result<(), WorkflowError> {
        if radio.band() != config.band {
            self.record_error(WorkflowError::InitFailed, "radio band mismatch");
            return Err(WorkflowError::InitFailed);
        }
        log::info!("workflow initialized, band {}", config.band.as_str());
        self.config = config;
        self.radio = Some(radio);
        self.reset();
        Ok(())
    }

    // ── Run control ─────────────────────────────────────────────────

    /// Arm a run: verify collaborators and enter `Init`. The platform's
    /// control loop then drives [`step`](Self::step) until the machine
    /// returns to `Idle`.
    pub fn begin(&mut self) -> Result<(), WorkflowError> {
        if self.state != WorkflowState::Idle {
            log::warn!("cannot start: not in IDLE state");
            return Err(WorkflowError::InitFailed);
        }
        if self.radio.is_none() {
            self.record_error(WorkflowError::InitFailed, "radio collaborator not bound");
            return Err(WorkflowError::InitFailed);
        }
        self.emergency_stop = false;
        self.workflow_start_ms = self.clock.now_ms();
        self.running = true;
        self.transition_to(WorkflowState::Init, "User started workflow");
        Ok(())
    }

    /// Drive the machine to completion, blocking the caller until the
    /// run funnels back to `Idle`. Returns the last recorded error if
    /// any error occurred during the run.
    pub fn start(&mut self) -> Result<(), WorkflowError> {
        self.begin()?;
        while self.state != WorkflowState::Idle {
            self.step();
            if self.state == WorkflowState::Idle {
                break;
            }
            self.clock.sleep_ms(LOOP_INTERVAL_MS);
        }
        self.running = false;
        log::info!("workflow completed, {} errors", self.error_count);
        match self.last_error {
            Some(error) if self.error_count > 0 => Err(error),
            _ => Ok(()),
        }
    }

    /// One control-loop iteration.
    pub fn step(&mut self) -> WorkflowState {
        if self.state == WorkflowState::Idle {
            return self.state;
        }
        if self.check_emergency() {
            return self.state;
        }
        match self.state {
            WorkflowState::Idle => {}
            WorkflowState::Init => self.process_init(),
            WorkflowState::Listening => self.process_listening(),
            WorkflowState::Analyzing => self.process_analyzing(),
            WorkflowState::Ready => self.process_ready(),
            WorkflowState::TxGated => self.process_tx_gated(),
            WorkflowState::Transmit => self.process_transmit(),
            WorkflowState::Cleanup => self.process_cleanup(),
        }
        self.check_timeout();
        if self.error_count > ERROR_THRESHOLD
            && !matches!(self.state, WorkflowState::Idle | WorkflowState::Cleanup)
        {
            log::warn!("too many errors, forcing cleanup");
            self.transition_to(WorkflowState::Cleanup, "Error threshold exceeded");
        }
        self.state
    }

    /// Request an emergency stop. The flag is honored at the next
    /// iteration and always forces `Cleanup`, superseding any
    /// in-progress gate or transmission.
    pub fn abort(&mut self) {
        log::warn!("abort requested");
        self.emergency_stop = true;
    }

    /// Return to `Idle` and clear all per-run state. Idempotent.
    pub fn reset(&mut self) {
        self.state = WorkflowState::Idle;
        self.prev_state = WorkflowState::Idle;
        self.state_entry_ms = self.clock.now_ms();
        self.running = false;
        self.emergency_stop = false;
        self.controls = Controls::default();
        self.buffer.clear();
        self.bindings.clear();
        self.analysis = AnalysisResult::default();
        self.gate_chain = None;
        self.gate_report = GateReport::default();
        self.attempts = 0;
        self.tx_selected = None;
        self.last_error = None;
        self.error_count = 0;
        self.errors.clear();
        if let Some(radio) = self.radio.as_mut() {
            radio.set_transmit_enabled(false);
        }
        log::info!("workflow reset");
    }

    /// Drop transition, error, and audit histories.
    pub fn clear_logs(&mut self) {
        self.transitions.clear();
        self.errors.clear();
        self.audit.clear();
    }

    // ── User-interaction surface ────────────────────────────────────

    /// Ask for analysis now instead of waiting out the observation
    /// window. Honored once the minimum dwell has elapsed; a request
    /// arriving earlier is kept latched, not dropped.
    pub fn trigger_analysis(&mut self) {
        if self.state == WorkflowState::Listening {
            self.log_user_action("TRIGGER_ANALYSIS", "User manually triggered analysis", "");
            self.controls.trigger_analysis = true;
        }
    }

    /// Select the captured signal at `index` for gated transmission.
    pub fn select_signal(&mut self, index: usize) {
        if self.state == WorkflowState::Ready && index < self.buffer.len() {
            let mut data = heapless::String::<64>::new();
            let _ = write!(data, "signal_index={}", index);
            self.log_user_action("SELECT_SIGNAL", "User selected signal for transmission", &data);
            self.controls.selected_index = Some(index);
        } else {
            log::warn!("signal selection ignored (index {})", index);
        }
    }

    /// Confirm the pending transmission. Single-use: consumed by the
    /// confirmation gate whatever the outcome.
    pub fn confirm_transmission(&mut self) {
        if self.state == WorkflowState::TxGated {
            self.log_user_action("CONFIRM_TX", "User confirmed transmission", "");
            self.controls.confirm = true;
        }
    }

    /// Cancel the pending or prospective transmission.
    pub fn cancel_transmission(&mut self) {
        if matches!(self.state, WorkflowState::TxGated | WorkflowState::Ready) {
            self.log_user_action("CANCEL_TX", "User canceled transmission", "");
            self.controls.cancel = true;
        }
    }

    /// Return from `Ready` to another observation window.
    pub fn continue_observation(&mut self) {
        if self.state == WorkflowState::Ready {
            self.log_user_action("CONTINUE_OBSERVATION", "User requested more observation", "");
            self.controls.continue_observation = true;
        }
    }

    // ── Read accessors ──────────────────────────────────────────────

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn state_elapsed_ms(&self) -> u32 {
        self.clock.now_ms().saturating_sub(self.state_entry_ms)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn analysis(&self) -> &AnalysisResult {
        &self.analysis
    }

    pub fn signal_count(&self) -> usize {
        self.buffer.len()
    }

    /// Borrow the captured signal at `index`. The borrow is valid until
    /// the buffer is next mutated or cleared.
    pub fn signal(&self, index: usize) -> Option<&CapturedSignal> {
        self.buffer.get(index)
    }

    pub fn last_error(&self) -> Option<WorkflowError> {
        self.last_error
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn errors(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.errors.iter()
    }

    pub fn transitions(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.transitions.iter()
    }

    pub fn audit(&self) -> &EventLog {
        &self.audit
    }

    pub fn audit_mut(&mut self) -> &mut EventLog {
        &mut self.audit
    }

    /// Outcome record of the most recent gated attempt.
    pub fn gate_report(&self) -> &GateReport {
        &self.gate_report
    }

    pub fn tx_attempts(&self) -> u8 {
        self.attempts
    }

    pub fn safety(&self) -> &SafetyContext {
        &self.safety
    }

    pub fn safety_mut(&mut self) -> &mut SafetyContext {
        &mut self.safety
    }

    /// Status telemetry snapshot.
    pub fn status(&self) -> DeviceMessage<'static> {
        DeviceMessage::Status {
            state: self.state.as_str(),
            uptime_ms: self.clock.now_ms().saturating_sub(self.workflow_start_ms),
            signals: self.buffer.len() as u16,
            errors: self.error_count.min(u32::from(u16::MAX)) as u16,
            version: VERSION,
        }
    }

    // ── State processors ────────────────────────────────────────────

    fn process_init(&mut self) {
        let hardware_ok = match self.radio.as_mut() {
            Some(radio) => {
                radio.set_transmit_enabled(false);
                radio.start_receive().is_ok()
            }
            None => false,
        };
        if !hardware_ok {
            self.record_error(WorkflowError::InitFailed, "hardware initialization failed");
            self.transition_to(WorkflowState::Cleanup, "Init failed");
            return;
        }

        let capacity = self.config.buffer_capacity;
        if self.buffer.reserve(capacity).is_err() {
            self.record_error(WorkflowError::BufferOverflow, "capture buffer allocation failed");
            self.transition_to(WorkflowState::Cleanup, "Init failed");
            return;
        }
        log::info!("capture buffer reserved: {} slots", capacity);

        self.bindings.clear();
        self.analysis = AnalysisResult::default();
        self.gate_chain = None;
        self.gate_report = GateReport::default();
        self.attempts = 0;
        self.tx_selected = None;
        self.controls = Controls::default();
        self.error_count = 0;
        self.last_error = None;

        self.transition_to(WorkflowState::Listening, "Init successful");
    }

    fn process_listening(&mut self) {
        // Passive observation: the transmitter stays disabled for the
        // entire state.
        if let Some(radio) = self.radio.as_mut() {
            radio.set_transmit_enabled(false);
        }

        let elapsed = self.state_elapsed_ms();
        if elapsed < self.config.listen_min_ms {
            // Minimum dwell not yet met; no exit is permitted, including
            // a latched manual trigger.
            self.capture_signals();
            return;
        }

        if self.controls.trigger_analysis {
            self.controls.trigger_analysis = false;
            self.transition_to(WorkflowState::Analyzing, "User trigger");
            return;
        }

        if self.buffer.fill_ratio() >= BUFFER_FILL_THRESHOLD {
            log::info!("buffer {} of {} full, triggering analysis", self.buffer.len(), self.buffer.capacity());
            self.transition_to(WorkflowState::Analyzing, "Buffer full");
            return;
        }

        if elapsed >= self.config.listen_max_ms {
            self.transition_to(WorkflowState::Analyzing, "Max time reached");
            return;
        }

        self.capture_signals();
    }

    fn capture_signals(&mut self) {
        let band = self.config.band;
        let now_us = self.clock.now_us();
        let mut overflow = false;

        let Some(radio) = self.radio.as_mut() else {
            return;
        };
        while radio.has_signal() {
            // Stop draining at the fill threshold so the Listening exit
            // fires before an insertion can ever overflow.
            if self.buffer.fill_ratio() >= BUFFER_FILL_THRESHOLD {
                break;
            }
            let Some(mut signal) = radio.receive_signal() else {
                break;
            };
            if !analysis::validate_for_band(band, &signal) {
                continue;
            }
            signal.is_valid = true;
            if signal.capture_time_us == 0 {
                signal.capture_time_us = now_us;
            }
            if band == RfBand::Band2_4GHz && !self.bindings.contains(&signal.protocol) {
                self.bindings.push(signal.protocol.clone());
            }
            log::debug!("captured signal ({} pulses, {} bytes)", signal.pulse_count(), signal.payload().len());
            if self.buffer.push(signal).is_err() {
                overflow = true;
                break;
            }
        }

        if overflow {
            self.record_error(WorkflowError::BufferOverflow, "capture buffer full");
        }
    }

    fn process_analyzing(&mut self) {
        if self.buffer.is_empty() {
            log::info!("no signals captured, returning to listening");
            self.transition_to(WorkflowState::Listening, "No data");
            return;
        }

        log::info!("analyzing {} captured signals", self.buffer.len());
        self.analysis = analysis::analyze(self.config.band, &mut self.buffer);
        self.analysis.complete = true;
        log::info!(
            "analysis complete: {} valid, {} patterns",
            self.analysis.valid_signal_count,
            self.analysis.unique_patterns
        );

        self.transition_to(WorkflowState::Ready, "Analysis complete");
    }

    fn process_ready(&mut self) {
        if self.controls.cancel {
            self.controls.cancel = false;
            self.transition_to(WorkflowState::Cleanup, "User canceled");
            return;
        }
        if self.controls.continue_observation {
            self.controls.continue_observation = false;
            self.transition_to(WorkflowState::Listening, "User requested more observation");
            return;
        }
        if let Some(index) = self.controls.selected_index.take() {
            self.tx_selected = Some(index);
            self.transition_to(WorkflowState::TxGated, "User requested transmission");
            return;
        }
        if self.state_elapsed_ms() >= self.config.ready_timeout_ms {
            self.transition_to(WorkflowState::Cleanup, "Inactivity timeout");
        }
    }

    fn process_tx_gated(&mut self) {
        if self.gate_chain.is_none() {
            self.attempts += 1;
            if self.attempts > MAX_TX_ATTEMPTS {
                log::warn!("too many transmission attempts");
                self.transition_to(WorkflowState::Ready, "Max attempts");
                return;
            }
            let selection_ok = self.tx_selected.is_some_and(|i| i < self.buffer.len());
            if !selection_ok {
                self.transition_to(WorkflowState::Ready, "Invalid selection");
                return;
            }
            self.gate_chain = Some(GateChain::new(self.clock.now_ms()));
        }

        let now_ms = self.clock.now_ms();
        let outcome = {
            let (Some(index), Some(chain)) = (self.tx_selected, self.gate_chain.as_mut()) else {
                return;
            };
            let Some(signal) = self.buffer.get(index) else {
                return;
            };
            let inputs = GateInputs {
                signal,
                band: self.config.band,
                bindings: &self.bindings,
                tx_gate_timeout_ms: self.config.tx_gate_timeout_ms,
                transmit_max_ms: self.config.transmit_max_ms,
            };
            chain.tick(
                &inputs,
                &mut self.safety,
                &mut self.controls.confirm,
                &mut self.controls.cancel,
                now_ms,
            )
        };

        match outcome {
            GateOutcome::Pending => {}
            GateOutcome::Approved => {
                if let Some(chain) = self.gate_chain.take() {
                    self.gate_report = chain.report().clone();
                }
                self.transition_to(WorkflowState::Transmit, "All gates passed");
            }
            GateOutcome::Denied(denial) => {
                if let Some(chain) = self.gate_chain.take() {
                    self.gate_report = chain.report().clone();
                }
                let (freq, duration) = self
                    .tx_selected
                    .and_then(|i| self.buffer.get(i))
                    .map_or((0.0, 0), |s| {
                        (s.frequency_mhz, estimate_duration_ms(self.config.band, s))
                    });
                self.safety.log_attempt(TransmitRecord {
                    timestamp_ms: now_ms,
                    frequency_mhz: freq,
                    duration_ms: duration,
                    allowed: false,
                    verdict: clipped(denial.gate.as_str()),
                    detail: clipped(&denial.reason),
                });
                self.record_error(WorkflowError::GateDenied, &denial.reason);
                self.transition_to(WorkflowState::Ready, &denial.reason);
            }
        }
    }

    fn process_transmit(&mut self) {
        let now_ms = self.clock.now_ms();
        let band = self.config.band;
        let Some((freq, duration)) = self
            .tx_selected
            .and_then(|i| self.buffer.get(i))
            .map(|s| (s.frequency_mhz, estimate_duration_ms(band, s)))
        else {
            self.record_error(WorkflowError::TransmissionFailed, "no signal selected");
            self.transition_to(WorkflowState::Cleanup, "Transmit failed");
            return;
        };

        log::info!("transmitting selected signal at {} MHz", freq);

        let success = if self.config.dry_run {
            log::info!("dry-run mode: transmission simulated, hardware untouched");
            true
        } else {
            let result = match (self.radio.as_mut(), self.tx_selected.and_then(|i| self.buffer.get(i))) {
                (Some(radio), Some(signal)) => {
                    radio.set_transmit_enabled(true);
                    let result = radio.transmit(signal);
                    radio.set_transmit_enabled(false);
                    result
                }
                _ => Err(RadioError::Unavailable),
            };
            match result {
                Ok(()) => true,
                Err(_) => {
                    self.record_error(
                        WorkflowError::TransmissionFailed,
                        "transmission execution failed",
                    );
                    false
                }
            }
        };

        let mut detail = heapless::String::<64>::new();
        if self.config.dry_run {
            let _ = detail.push_str("dry_run=1");
        }
        self.safety.log_attempt(TransmitRecord {
            timestamp_ms: now_ms,
            frequency_mhz: freq,
            duration_ms: duration,
            allowed: true,
            verdict: clipped(if success { "ALLOWED" } else { "TX_FAILED" }),
            detail,
        });
        if success {
            self.safety.record_transmission(now_ms);
        }

        self.transition_to(
            WorkflowState::Cleanup,
            if success { "Transmit success" } else { "Transmit failed" },
        );
    }

    fn process_cleanup(&mut self) {
        if let Some(radio) = self.radio.as_mut() {
            radio.set_transmit_enabled(false);
            radio.stop_receive();
        }
        // The capture buffer is intentionally kept so results stay
        // inspectable after the run; the next Init reclaims it.
        self.gate_chain = None;
        self.transition_to(WorkflowState::Idle, "Cleanup done");
        self.running = false;
    }

    // ── State machine plumbing ──────────────────────────────────────

    fn transition_to(&mut self, new_state: WorkflowState, reason: &str) {
        log::info!(
            "state transition: {} -> {} ({})",
            self.state.as_str(),
            new_state.as_str(),
            reason
        );
        let now_ms = self.clock.now_ms();
        let now_us = self.clock.now_us();

        let mut exit_tag = heapless::String::<32>::new();
        let _ = write!(exit_tag, "EXIT_{}", self.state.as_str());
        self.audit.record(
            EventKind::StateExit,
            self.state,
            self.prev_state,
            &exit_tag,
            reason,
            "",
            now_ms,
            now_us,
        );

        let mut data = heapless::String::<64>::new();
        let _ = write!(data, "from={} to={}", self.state.as_str(), new_state.as_str());
        self.audit.record(
            EventKind::Transition,
            self.state,
            self.prev_state,
            "TRANSITION",
            reason,
            &data,
            now_ms,
            now_us,
        );

        if self.transitions.len() >= TRANSITION_LOG_CAPACITY {
            self.transitions.pop_front();
        }
        self.transitions.push_back(TransitionRecord {
            from: self.state,
            to: new_state,
            timestamp_ms: now_ms,
            reason: clipped(reason),
        });

        self.prev_state = self.state;
        self.state = new_state;
        self.state_entry_ms = now_ms;

        let mut entry_tag = heapless::String::<32>::new();
        let _ = write!(entry_tag, "ENTER_{}", self.state.as_str());
        self.audit.record(
            EventKind::StateEntry,
            self.state,
            self.prev_state,
            &entry_tag,
            reason,
            "",
            now_ms,
            now_us,
        );
    }

    /// Consume a pending emergency stop: disable the transmitter and
    /// force `Cleanup`.
    fn check_emergency(&mut self) -> bool {
        if !self.emergency_stop {
            return false;
        }
        self.emergency_stop = false;
        log::warn!("emergency stop activated");
        if let Some(radio) = self.radio.as_mut() {
            radio.set_transmit_enabled(false);
        }
        self.audit.record(
            EventKind::Error,
            self.state,
            self.prev_state,
            "EMERGENCY_ABORT",
            "Emergency abort",
            "",
            self.clock.now_ms(),
            self.clock.now_us(),
        );
        if self.state != WorkflowState::Cleanup {
            self.transition_to(WorkflowState::Cleanup, "Emergency abort");
        }
        true
    }

    fn timeout_for_state(&self, state: WorkflowState) -> u32 {
        match state {
            WorkflowState::Idle => 0,
            WorkflowState::Init => self.config.init_timeout_ms,
            WorkflowState::Listening => self.config.listen_max_ms,
            WorkflowState::Analyzing => self.config.analyze_timeout_ms,
            WorkflowState::Ready => self.config.ready_timeout_ms,
            WorkflowState::TxGated => self.config.tx_gate_timeout_ms,
            WorkflowState::Transmit => self.config.transmit_max_ms,
            WorkflowState::Cleanup => self.config.cleanup_timeout_ms,
        }
    }

    fn check_timeout(&mut self) {
        let timeout = self.timeout_for_state(self.state);
        if timeout == 0 {
            return;
        }
        let elapsed = self.state_elapsed_ms();
        if elapsed <= timeout {
            return;
        }

        self.record_error(WorkflowError::Timeout, "state timeout exceeded");
        let mut data = heapless::String::<64>::new();
        let _ = write!(data, "state={} elapsed={}", self.state.as_str(), elapsed);
        self.audit.record(
            EventKind::Timeout,
            self.state,
            self.prev_state,
            "TIMEOUT",
            "State timeout exceeded",
            &data,
            self.clock.now_ms(),
            self.clock.now_us(),
        );

        // Per-state fallbacks; a timeout is never silent.
        match self.state {
            WorkflowState::Init => self.transition_to(WorkflowState::Cleanup, "Init timeout"),
            WorkflowState::Listening => {
                self.transition_to(WorkflowState::Analyzing, "Listen timeout")
            }
            WorkflowState::Analyzing => {
                // Best-effort partial result is acceptable
                self.transition_to(WorkflowState::Ready, "Analysis timeout")
            }
            WorkflowState::Ready => self.transition_to(WorkflowState::Cleanup, "Ready timeout"),
            WorkflowState::TxGated => {
                self.gate_chain = None;
                self.controls.confirm = false;
                self.controls.cancel = false;
                self.transition_to(WorkflowState::Ready, "Gate timeout")
            }
            WorkflowState::Transmit => {
                // A transmission exceeding its window is treated as an
                // abort: force-disable and clean up.
                self.emergency_stop = true;
                self.transition_to(WorkflowState::Cleanup, "Transmit timeout")
            }
            WorkflowState::Cleanup => self.transition_to(WorkflowState::Idle, "Cleanup timeout"),
            WorkflowState::Idle => {}
        }
    }

    fn record_error(&mut self, error: WorkflowError, message: &str) {
        self.last_error = Some(error);
        self.error_count += 1;
        log::error!("workflow error: {} ({})", message, error);

        if self.errors.len() >= ERROR_LOG_CAPACITY {
            self.errors.pop_front();
        }
        self.errors.push_back(ErrorRecord {
            error,
            message: clipped(message),
            at_ms: self.clock.now_ms(),
        });

        let mut data = heapless::String::<64>::new();
        let _ = write!(data, "{}", error);
        self.audit.record(
            EventKind::Error,
            self.state,
            self.prev_state,
            "ERROR",
            message,
            &data,
            self.clock.now_ms(),
            self.clock.now_us(),
        );
    }

    fn log_user_action(&mut self, event: &str, reason: &str, data: &str) {
        self.audit.record(
            EventKind::UserAction,
            self.state,
            self.prev_state,
            event,
            reason,
            data,
            self.clock.now_ms(),
            self.clock.now_us(),
        );
    }
}
