/// Safety policy state shared by the transmission gates.
///
/// An explicit value owned by the orchestrator and passed by reference —
/// one instance per workflow, so tests run independent contexts side by
/// side. Holds the frequency blacklist, the rolling rate-limit ledger,
/// and the bounded transmit-attempt audit trail. The ledger is the one
/// piece of state that survives across workflow runs.
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt::Write;

use crate::config::{DEFAULT_RATE_LIMIT_PER_MIN, FREQ_BLACKLIST, FREQ_TOLERANCE_MHZ, RATE_WINDOW_MS};

/// Transmit-attempt audit entries kept before FIFO eviction.
pub const TRANSMIT_AUDIT_CAPACITY: usize = 100;

/// One audited transmission attempt (allowed or denied).
#[derive(Debug, Clone)]
pub struct TransmitRecord {
    pub timestamp_ms: u32,
    pub frequency_mhz: f32,
    pub duration_ms: u32,
    pub allowed: bool,
    /// "ALLOWED", or the name of the denying gate.
    pub verdict: heapless::String<32>,
    pub detail: heapless::String<64>,
}

/// Policy, rate-limit, and audit service backing the gate chain.
#[derive(Debug)]
pub struct SafetyContext {
    blacklist_mhz: Vec<f32>,
    rate_limit_per_min: u32,
    recent_transmits_ms: Vec<u32>,
    audit: VecDeque<TransmitRecord>,
}

impl SafetyContext {
    /// Context seeded with the compiled-in blacklist and default rate
    /// limit.
    pub fn new() -> Self {
        Self {
            blacklist_mhz: FREQ_BLACKLIST.iter().copied().collect(),
            rate_limit_per_min: DEFAULT_RATE_LIMIT_PER_MIN,
            recent_transmits_ms: Vec::new(),
            audit: VecDeque::new(),
        }
    }

    // ── Frequency blacklist ─────────────────────────────────────────

    /// Whether `frequency_mhz` falls within the match tolerance of any
    /// blacklisted frequency.
    pub fn is_frequency_blacklisted(&self, frequency_mhz: f32) -> bool {
        self.blacklist_mhz
            .iter()
            .any(|&blocked| freq_close(frequency_mhz, blocked))
    }

    /// Add a frequency; returns false if it is already covered.
    pub fn add_blacklisted(&mut self, frequency_mhz: f32) -> bool {
        if self.is_frequency_blacklisted(frequency_mhz) {
            return false;
        }
        self.blacklist_mhz.push(frequency_mhz);
        log::info!("blacklist add: {} MHz", frequency_mhz);
        true
    }

    /// Remove the first entry within tolerance of `frequency_mhz`.
    pub fn remove_blacklisted(&mut self, frequency_mhz: f32) -> bool {
        if let Some(pos) = self
            .blacklist_mhz
            .iter()
            .position(|&blocked| freq_close(frequency_mhz, blocked))
        {
            self.blacklist_mhz.remove(pos);
            log::info!("blacklist remove: {} MHz", frequency_mhz);
            return true;
        }
        false
    }

    pub fn blacklist(&self) -> &[f32] {
        &self.blacklist_mhz
    }

    // ── Rate limiting ───────────────────────────────────────────────

    pub fn set_rate_limit(&mut self, per_minute: u32) {
        self.rate_limit_per_min = per_minute;
    }

    pub fn rate_limit(&self) -> u32 {
        self.rate_limit_per_min
    }

    /// Transmissions recorded inside the trailing window.
    pub fn recent_transmit_count(&mut self, now_ms: u32) -> usize {
        self.prune_ledger(now_ms);
        self.recent_transmits_ms.len()
    }

    /// Whether another transmission is permitted right now.
    pub fn rate_limit_ok(&mut self, now_ms: u32) -> bool {
        (self.recent_transmit_count(now_ms) as u32) < self.rate_limit_per_min
    }

    /// Record a completed transmission in the rolling ledger.
    pub fn record_transmission(&mut self, now_ms: u32) {
        self.prune_ledger(now_ms);
        self.recent_transmits_ms.push(now_ms);
    }

    fn prune_ledger(&mut self, now_ms: u32) {
        self.recent_transmits_ms
            .retain(|&t| now_ms.saturating_sub(t) < RATE_WINDOW_MS);
    }

    // ── Transmit-attempt audit ──────────────────────────────────────

    /// Append an attempt record, evicting the oldest at capacity.
    pub fn log_attempt(&mut self, record: TransmitRecord) {
        if self.audit.len() >= TRANSMIT_AUDIT_CAPACITY {
            self.audit.pop_front();
        }
        log::info!(
            "tx attempt: {} MHz for {} ms - {} ({})",
            record.frequency_mhz,
            record.duration_ms,
            if record.allowed { "ALLOWED" } else { "DENIED" },
            record.verdict
        );
        self.audit.push_back(record);
    }

    pub fn attempts(&self) -> impl Iterator<Item = &TransmitRecord> {
        self.audit.iter()
    }

    /// Attempts at or after `since_ms`, newest first.
    pub fn recent_attempts(&self, since_ms: u32) -> impl Iterator<Item = &TransmitRecord> {
        self.audit
            .iter()
            .rev()
            .filter(move |r| r.timestamp_ms >= since_ms)
    }

    pub fn clear_attempts(&mut self) {
        self.audit.clear();
    }

    /// One-line status summary for the operator display.
    pub fn status_line(&mut self, now_ms: u32) -> heapless::String<64> {
        let count = self.recent_transmit_count(now_ms);
        let mut line = heapless::String::new();
        let _ = write!(
            line,
            "safety: {} blacklisted | rate: {}/{}",
            self.blacklist_mhz.len(),
            count,
            self.rate_limit_per_min
        );
        line
    }
}

impl Default for SafetyContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Tolerance comparison without float abs (not in core on all supported
/// toolchains).
fn freq_close(a: f32, b: f32) -> bool {
    let delta = a - b;
    delta < FREQ_TOLERANCE_MHZ && delta > -FREQ_TOLERANCE_MHZ
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(timestamp_ms: u32, allowed: bool) -> TransmitRecord {
        TransmitRecord {
            timestamp_ms,
            frequency_mhz: 433.92,
            duration_ms: 40,
            allowed,
            verdict: heapless::String::try_from(if allowed { "ALLOWED" } else { "POLICY" })
                .unwrap(),
            detail: heapless::String::new(),
        }
    }

    // ── Blacklist ───────────────────────────────────────────────────

    #[test]
    fn seeded_blacklist_matches_within_tolerance() {
        let ctx = SafetyContext::new();
        assert!(ctx.is_frequency_blacklisted(121.5));
        assert!(ctx.is_frequency_blacklisted(121.55)); // within 100 kHz
        assert!(!ctx.is_frequency_blacklisted(121.7));
        assert!(!ctx.is_frequency_blacklisted(433.92));
    }

    #[test]
    fn add_and_remove_blacklist_entries() {
        let mut ctx = SafetyContext::new();
        assert!(ctx.add_blacklisted(433.92));
        assert!(!ctx.add_blacklisted(433.95)); // already covered by tolerance
        assert!(ctx.is_frequency_blacklisted(433.92));
        assert!(ctx.remove_blacklisted(433.92));
        assert!(!ctx.remove_blacklisted(433.92));
        assert!(!ctx.is_frequency_blacklisted(433.92));
    }

    // ── Rate limiting ───────────────────────────────────────────────

    #[test]
    fn rate_limit_counts_only_the_trailing_window() {
        let mut ctx = SafetyContext::new();
        ctx.set_rate_limit(2);
        ctx.record_transmission(1_000);
        ctx.record_transmission(2_000);
        assert!(!ctx.rate_limit_ok(30_000));
        // First entry ages out of the 60 s window
        assert_eq!(ctx.recent_transmit_count(61_500), 1);
        assert!(ctx.rate_limit_ok(61_500));
    }

    #[test]
    fn rate_limit_at_threshold_denies() {
        let mut ctx = SafetyContext::new();
        for _ in 0..10 {
            ctx.record_transmission(5_000);
        }
        assert!(!ctx.rate_limit_ok(10_000));
        ctx.set_rate_limit(11);
        assert!(ctx.rate_limit_ok(10_000));
    }

    // ── Audit trail ─────────────────────────────────────────────────

    #[test]
    fn audit_evicts_oldest_at_capacity() {
        let mut ctx = SafetyContext::new();
        for i in 0..(TRANSMIT_AUDIT_CAPACITY + 5) {
            ctx.log_attempt(record(i as u32, true));
        }
        assert_eq!(ctx.attempts().count(), TRANSMIT_AUDIT_CAPACITY);
        // Oldest five evicted
        assert_eq!(ctx.attempts().next().unwrap().timestamp_ms, 5);
    }

    #[test]
    fn recent_attempts_filters_by_timestamp() {
        let mut ctx = SafetyContext::new();
        ctx.log_attempt(record(1_000, true));
        ctx.log_attempt(record(5_000, false));
        ctx.log_attempt(record(9_000, true));
        let newest: heapless::Vec<u32, 4> =
            ctx.recent_attempts(5_000).map(|r| r.timestamp_ms).collect();
        assert_eq!(newest.as_slice(), &[9_000, 5_000]);
    }

    #[test]
    fn status_line_reports_counts() {
        let mut ctx = SafetyContext::new();
        ctx.record_transmission(1_000);
        let line = ctx.status_line(2_000);
        assert_eq!(line.as_str(), "safety: 2 blacklisted | rate: 1/10");
    }
}
