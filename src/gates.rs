/// Multi-gate transmission approval chain.
///
/// Four checks evaluated in fixed order — Policy, Confirmation,
/// RateLimit, Band — with the first failure short-circuiting the rest.
/// Later gates assume earlier ones hold (the band gate trusts policy
/// already vetted basic signal integrity), so the order is never
/// changed. A denial is attributable to exactly one gate; every gate
/// cleared before it is recorded as passed.
///
/// The chain is a per-attempt state machine advanced by [`GateChain::tick`]
/// from the control loop. Only the confirmation gate spans ticks: it stays
/// pending until the operator confirms, cancels, or the gate timeout
/// elapses. There is no blocking wait anywhere.
use crate::config::{RfBand, PULSE_MAX_US, PULSE_MIN_US, TX_REPEATS};
use crate::safety::SafetyContext;
use crate::signal::{CapturedSignal, ProtocolString, MAX_PAYLOAD};

/// The four approval gates, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    Policy,
    Confirmation,
    RateLimit,
    Band,
}

impl GateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateKind::Policy => "POLICY",
            GateKind::Confirmation => "CONFIRMATION",
            GateKind::RateLimit => "RATE_LIMIT",
            GateKind::Band => "BAND",
        }
    }
}

pub type GateReason = heapless::String<64>;

/// A single attributable denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDenial {
    pub gate: GateKind,
    pub reason: GateReason,
}

/// Outcome record for one gated attempt: which gates passed, in order,
/// and the denial that stopped the chain (if any).
#[derive(Debug, Clone, Default)]
pub struct GateReport {
    pub passed: heapless::Vec<GateKind, 4>,
    pub denial: Option<GateDenial>,
}

impl GateReport {
    pub fn allowed(&self) -> bool {
        self.denial.is_none() && self.passed.len() == 4
    }

    fn record_pass(&mut self, gate: GateKind) {
        let _ = self.passed.push(gate);
        log::info!("gate {}: PASSED", gate.as_str());
    }
}

/// Result of one chain tick.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Waiting on the confirmation gate; tick again next iteration.
    Pending,
    Approved,
    Denied(GateDenial),
}

/// Read-only inputs the chain evaluates against.
pub struct GateInputs<'a> {
    pub signal: &'a CapturedSignal,
    pub band: RfBand,
    /// Peer addresses observed during this run's listening phases.
    pub bindings: &'a [ProtocolString],
    pub tx_gate_timeout_ms: u32,
    pub transmit_max_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Policy,
    Confirmation,
    RateLimit,
    Band,
    Resolved,
}

/// One transmission attempt's progress through the chain.
#[derive(Debug)]
pub struct GateChain {
    stage: Stage,
    report: GateReport,
    started_ms: u32,
}

impl GateChain {
    pub fn new(now_ms: u32) -> Self {
        Self {
            stage: Stage::Policy,
            report: GateReport::default(),
            started_ms: now_ms,
        }
    }

    pub fn report(&self) -> &GateReport {
        &self.report
    }

    /// Advance the chain as far as it can go this iteration.
    ///
    /// `confirm` and `cancel` are the single-use operator flags; whichever
    /// resolves the confirmation gate is cleared on consumption, and both
    /// are cleared on gate timeout. Cancellation wins over a simultaneous
    /// confirmation.
    pub fn tick(
        &mut self,
        inputs: &GateInputs<'_>,
        safety: &mut SafetyContext,
        confirm: &mut bool,
        cancel: &mut bool,
        now_ms: u32,
    ) -> GateOutcome {
        loop {
            match self.stage {
                Stage::Policy => {
                    if let Some(denial) = self.check_policy(inputs, safety) {
                        return self.deny(denial);
                    }
                    self.report.record_pass(GateKind::Policy);
                    self.stage = Stage::Confirmation;
                }
                Stage::Confirmation => {
                    if *cancel {
                        *cancel = false;
                        *confirm = false;
                        return self.deny((GateKind::Confirmation, "confirmation canceled"));
                    }
                    if *confirm {
                        *confirm = false;
                        self.report.record_pass(GateKind::Confirmation);
                        self.stage = Stage::RateLimit;
                        continue;
                    }
                    if now_ms.saturating_sub(self.started_ms) >= inputs.tx_gate_timeout_ms {
                        *confirm = false;
                        *cancel = false;
                        return self.deny((GateKind::Confirmation, "confirmation timeout"));
                    }
                    return GateOutcome::Pending;
                }
                Stage::RateLimit => {
                    if !safety.rate_limit_ok(now_ms) {
                        return self.deny((GateKind::RateLimit, "rate limit exceeded"));
                    }
                    self.report.record_pass(GateKind::RateLimit);
                    self.stage = Stage::Band;
                }
                Stage::Band => {
                    if let Some(denial) = check_band(inputs) {
                        return self.deny(denial);
                    }
                    self.report.record_pass(GateKind::Band);
                    self.stage = Stage::Resolved;
                    return GateOutcome::Approved;
                }
                // A resolved chain is dropped by the orchestrator; a stray
                // tick must not re-evaluate anything.
                Stage::Resolved => return GateOutcome::Pending,
            }
        }
    }

    fn check_policy(
        &self,
        inputs: &GateInputs<'_>,
        safety: &SafetyContext,
    ) -> Option<(GateKind, &'static str)> {
        if safety.is_frequency_blacklisted(inputs.signal.frequency_mhz) {
            return Some((GateKind::Policy, "policy: blacklisted frequency"));
        }
        if estimate_duration_ms(inputs.band, inputs.signal) > inputs.transmit_max_ms {
            return Some((GateKind::Policy, "policy: duration exceeds limit"));
        }
        if !inputs.signal.is_valid {
            return Some((GateKind::Policy, "policy: signal invalid"));
        }
        None
    }

    fn deny(&mut self, (gate, reason): (GateKind, &'static str)) -> GateOutcome {
        let mut text = GateReason::new();
        let _ = text.push_str(reason);
        let denial = GateDenial { gate, reason: text };
        log::warn!("gate {}: DENIED ({})", gate.as_str(), reason);
        self.report.denial = Some(denial.clone());
        self.stage = Stage::Resolved;
        GateOutcome::Denied(denial)
    }
}

/// Band-specific validation, the last gate before hardware is touched.
fn check_band(inputs: &GateInputs<'_>) -> Option<(GateKind, &'static str)> {
    match inputs.band {
        RfBand::Sub1GHz => {
            if let Some(pulses) = &inputs.signal.pulse_times {
                if pulses
                    .iter()
                    .any(|&w| !(PULSE_MIN_US..=PULSE_MAX_US).contains(&w))
                {
                    return Some((GateKind::Band, "band: pulse timing out of range"));
                }
            }
            None
        }
        RfBand::Band2_4GHz => {
            let len = usize::from(inputs.signal.raw_len);
            if len < 1 || len > MAX_PAYLOAD {
                return Some((GateKind::Band, "band: payload length invalid"));
            }
            // Binding verification: transmission is restricted to peers
            // observed during this run's listening phases.
            if !inputs
                .bindings
                .iter()
                .any(|addr| *addr == inputs.signal.protocol)
            {
                return Some((GateKind::Band, "band: address not observed"));
            }
            None
        }
    }
}

/// Estimated on-air time for one transmission of `signal`, milliseconds.
pub fn estimate_duration_ms(band: RfBand, signal: &CapturedSignal) -> u32 {
    match band {
        RfBand::Sub1GHz => signal.pulse_train_us() * TX_REPEATS / 1000,
        // Fixed-length 2.4 GHz frames are over the air in well under this.
        RfBand::Band2_4GHz => 10,
    }
}
