/// Signal validation, classification, and capture statistics.
///
/// Stateless over its inputs: identical buffers produce identical
/// results, including the summary string (a tested property — downstream
/// tooling diffs exported results).
use core::fmt::Write;

use crate::config::{
    RfBand, MIN_PACKET_RSSI_DBM, MIN_PULSE_COUNT, MIN_PULSE_RSSI_DBM, PULSE_MAX_US, PULSE_MIN_US,
};
use crate::signal::{CaptureBuffer, CapturedSignal, MAX_PAYLOAD};

/// Summary of one analysis pass over the capture buffer.
#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    pub signal_count: u16,
    pub valid_signal_count: u16,
    pub unique_patterns: u16,
    pub avg_rssi_dbm: f32,
    pub min_rssi_dbm: f32,
    pub max_rssi_dbm: f32,
    pub capture_duration_ms: u32,
    pub complete: bool,
    pub summary: heapless::String<128>,
}

/// Validate a freshly captured record against the rules for `band`.
pub fn validate_for_band(band: RfBand, signal: &CapturedSignal) -> bool {
    match band {
        RfBand::Sub1GHz => validate_pulse_signal(signal),
        RfBand::Band2_4GHz => validate_packet(signal),
    }
}

/// Sub-GHz rules: enough pulse samples, every sample inside the decoder's
/// plausible range, and a usable strength when one was measured.
pub fn validate_pulse_signal(signal: &CapturedSignal) -> bool {
    if signal.pulse_count() < MIN_PULSE_COUNT {
        return false;
    }
    if let Some(pulses) = &signal.pulse_times {
        if pulses
            .iter()
            .any(|&w| !(PULSE_MIN_US..=PULSE_MAX_US).contains(&w))
        {
            return false;
        }
    }
    if signal.has_rssi() && signal.rssi_dbm < MIN_PULSE_RSSI_DBM {
        return false;
    }
    true
}

/// 2.4 GHz rules: a payload that fits the frame format and a strength
/// above the demodulation floor.
pub fn validate_packet(packet: &CapturedSignal) -> bool {
    let len = usize::from(packet.raw_len);
    if len < 1 || len > MAX_PAYLOAD {
        return false;
    }
    if packet.rssi_dbm < MIN_PACKET_RSSI_DBM {
        return false;
    }
    true
}

/// Classify a pulse-band record by its timing shape and write the label
/// into `device_type`. Deterministic; evaluated in fixed order.
pub fn classify_pulse_device(signal: &mut CapturedSignal) {
    let avg = signal.avg_pulse_us();
    let count = signal.pulse_count();

    let label = if avg > 400.0 && count >= 48 {
        "Garage Door"
    } else if avg < 350.0 && count < 48 {
        "Doorbell"
    } else if count >= 128 {
        "Car Remote"
    } else {
        "Unknown"
    };

    signal.device_type.clear();
    let _ = signal.device_type.push_str(label);
}

/// Run the full analysis pass: classify (pulse band), count, aggregate
/// strength statistics, and build the deterministic summary.
pub fn analyze(band: RfBand, buffer: &mut CaptureBuffer) -> AnalysisResult {
    let mut result = AnalysisResult {
        signal_count: buffer.len() as u16,
        ..Default::default()
    };

    if band == RfBand::Sub1GHz {
        for signal in buffer.iter_mut() {
            if signal.is_valid {
                classify_pulse_device(signal);
            }
        }
    }

    result.valid_signal_count = buffer.iter().filter(|s| s.is_valid).count() as u16;
    result.unique_patterns = count_unique_patterns(buffer);

    let mut rssi_sum = 0.0f32;
    let mut rssi_count = 0u32;
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for signal in buffer.iter().filter(|s| s.has_rssi()) {
        let rssi = f32::from(signal.rssi_dbm);
        rssi_sum += rssi;
        rssi_count += 1;
        if rssi < min {
            min = rssi;
        }
        if rssi > max {
            max = rssi;
        }
    }
    if rssi_count > 0 {
        result.avg_rssi_dbm = rssi_sum / rssi_count as f32;
        result.min_rssi_dbm = min;
        result.max_rssi_dbm = max;
    }

    if let (Some(first), Some(last)) = (buffer.get(0), buffer.get(buffer.len().wrapping_sub(1))) {
        result.capture_duration_ms =
            ((last.capture_time_us.saturating_sub(first.capture_time_us)) / 1000) as u32;
    }

    let _ = write!(
        result.summary,
        "{} signals, {} valid, avg RSSI: {:.1} dBm",
        result.signal_count, result.valid_signal_count, result.avg_rssi_dbm
    );

    result
}

/// Distinct (protocol, payload) shapes across the buffer. Linear scan —
/// the buffer is small and bounded.
fn count_unique_patterns(buffer: &CaptureBuffer) -> u16 {
    let mut unique = 0u16;
    for (i, signal) in buffer.iter().enumerate() {
        let seen_before = buffer
            .iter()
            .take(i)
            .any(|other| other.protocol == signal.protocol && other.payload() == signal.payload());
        if !seen_before {
            unique += 1;
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn pulse_signal(widths: &[u16], rssi: i8) -> CapturedSignal {
        let mut signal = CapturedSignal {
            rssi_dbm: rssi,
            frequency_mhz: 433.92,
            pulse_times: Some(widths.to_vec().into_boxed_slice()),
            is_valid: true,
            ..Default::default()
        };
        let _ = signal.protocol.push_str("RCSwitch-1");
        signal
    }

    fn packet(len: u8, rssi: i8) -> CapturedSignal {
        let mut signal = CapturedSignal {
            rssi_dbm: rssi,
            frequency_mhz: 2440.0,
            is_valid: true,
            ..Default::default()
        };
        let bytes = vec![0xA5u8; usize::from(len)];
        signal.set_payload(&bytes);
        let _ = signal.protocol.push_str("E7:E7:E7:E7:E7");
        signal
    }

    // ── Pulse-band validation ───────────────────────────────────────

    #[test]
    fn pulse_signal_with_too_few_samples_is_rejected() {
        assert!(!validate_pulse_signal(&pulse_signal(&[200; 9], -60)));
        assert!(validate_pulse_signal(&pulse_signal(&[200; 10], -60)));
    }

    #[test]
    fn pulse_sample_out_of_range_is_rejected() {
        assert!(!validate_pulse_signal(&pulse_signal(
            &[200, 200, 99, 200, 200, 200, 200, 200, 200, 200],
            -60
        )));
        assert!(!validate_pulse_signal(&pulse_signal(&[10_001; 12], -60)));
    }

    #[test]
    fn weak_pulse_signal_is_rejected_only_when_rssi_present() {
        assert!(!validate_pulse_signal(&pulse_signal(&[200; 12], -101)));
        // rssi 0 = not measured; strength rule does not apply
        assert!(validate_pulse_signal(&pulse_signal(&[200; 12], 0)));
    }

    // ── Packet validation ───────────────────────────────────────────

    #[test]
    fn packet_length_bounds() {
        assert!(!validate_packet(&packet(0, -50)));
        assert!(validate_packet(&packet(1, -50)));
        assert!(validate_packet(&packet(32, -50)));
    }

    #[test]
    fn weak_packet_is_rejected() {
        assert!(!validate_packet(&packet(8, -91)));
        assert!(validate_packet(&packet(8, -90)));
    }

    // ── Classification ──────────────────────────────────────────────

    #[test]
    fn classifies_garage_door() {
        let mut signal = pulse_signal(&[450; 48], -60);
        classify_pulse_device(&mut signal);
        assert_eq!(signal.device_type.as_str(), "Garage Door");
    }

    #[test]
    fn classifies_doorbell() {
        let mut signal = pulse_signal(&[300; 24], -60);
        classify_pulse_device(&mut signal);
        assert_eq!(signal.device_type.as_str(), "Doorbell");
    }

    #[test]
    fn classifies_car_remote() {
        let mut signal = pulse_signal(&[380; 128], -60);
        classify_pulse_device(&mut signal);
        assert_eq!(signal.device_type.as_str(), "Car Remote");
    }

    #[test]
    fn classifies_unknown() {
        let mut signal = pulse_signal(&[380; 50], -60);
        classify_pulse_device(&mut signal);
        assert_eq!(signal.device_type.as_str(), "Unknown");
    }

    // ── Statistics and summary ──────────────────────────────────────

    fn filled_buffer() -> CaptureBuffer {
        let mut buffer = CaptureBuffer::new();
        buffer.reserve(10).unwrap();
        let mut a = pulse_signal(&[200; 12], -40);
        a.capture_time_us = 1_000_000;
        let mut b = pulse_signal(&[200; 12], -60);
        b.capture_time_us = 3_500_000;
        buffer.push(a).unwrap();
        buffer.push(b).unwrap();
        buffer
    }

    #[test]
    fn statistics_aggregate_strength_and_span() {
        let mut buffer = filled_buffer();
        let result = analyze(RfBand::Sub1GHz, &mut buffer);
        assert_eq!(result.signal_count, 2);
        assert_eq!(result.valid_signal_count, 2);
        assert_eq!(result.avg_rssi_dbm, -50.0);
        assert_eq!(result.min_rssi_dbm, -60.0);
        assert_eq!(result.max_rssi_dbm, -40.0);
        assert_eq!(result.capture_duration_ms, 2_500);
    }

    #[test]
    fn summary_is_deterministic_for_identical_input() {
        let mut first = filled_buffer();
        let mut second = filled_buffer();
        let a = analyze(RfBand::Sub1GHz, &mut first);
        let b = analyze(RfBand::Sub1GHz, &mut second);
        assert_eq!(a.summary, b.summary);
        assert_eq!(a.summary.as_str(), "2 signals, 2 valid, avg RSSI: -50.0 dBm");
    }

    #[test]
    fn unique_patterns_deduplicate_identical_payloads() {
        let mut buffer = CaptureBuffer::new();
        buffer.reserve(10).unwrap();
        buffer.push(packet(4, -50)).unwrap();
        buffer.push(packet(4, -55)).unwrap(); // same protocol + payload
        buffer.push(packet(6, -50)).unwrap(); // different payload
        let result = analyze(RfBand::Band2_4GHz, &mut buffer);
        assert_eq!(result.unique_patterns, 2);
    }
}
