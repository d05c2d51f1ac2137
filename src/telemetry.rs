/// JSON status messages for companion tooling and serial consumers.
///
/// All messages are newline-delimited JSON (NDJSON). Uses `heapless`
/// types for no-alloc serialization into fixed buffers.
use heapless::Vec;
use serde::Serialize;

use crate::gates::GateReport;
use crate::signal::CapturedSignal;

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 512;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;

/// Messages emitted by the device for a companion app or serial console.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DeviceMessage<'a> {
    /// Periodic workflow status report
    #[serde(rename = "status")]
    Status {
        /// Current workflow state name
        state: &'static str,
        /// Milliseconds since the run started
        uptime_ms: u32,
        /// Records currently in the capture buffer
        signals: u16,
        /// Errors recorded this run
        errors: u16,
        version: &'static str,
    },
    /// One captured signal, reported after analysis
    #[serde(rename = "signal")]
    Signal {
        index: u16,
        freq_mhz: f32,
        rssi: i8,
        protocol: &'a str,
        device_type: &'a str,
        /// Pulse samples carried by the record (0 for packet captures)
        pulses: u16,
        /// Capture timestamp in milliseconds
        ts: u32,
    },
    /// Verdict of one gated transmission attempt
    #[serde(rename = "gate")]
    GateVerdict {
        allowed: bool,
        /// Denying gate name; omitted when allowed
        #[serde(skip_serializing_if = "Option::is_none")]
        gate: Option<&'static str>,
        reason: &'a str,
        attempt: u8,
    },
}

impl<'a> DeviceMessage<'a> {
    /// Signal report for the record at `index`.
    pub fn from_signal(index: u16, signal: &'a CapturedSignal) -> Self {
        DeviceMessage::Signal {
            index,
            freq_mhz: signal.frequency_mhz,
            rssi: signal.rssi_dbm,
            protocol: &signal.protocol,
            device_type: &signal.device_type,
            pulses: signal.pulse_count() as u16,
            ts: (signal.capture_time_us / 1000) as u32,
        }
    }

    /// Gate verdict from an attempt's report.
    pub fn from_gate_report(report: &'a GateReport, attempt: u8) -> Self {
        match &report.denial {
            Some(denial) => DeviceMessage::GateVerdict {
                allowed: false,
                gate: Some(denial.gate.as_str()),
                reason: &denial.reason,
                attempt,
            },
            None => DeviceMessage::GateVerdict {
                allowed: true,
                gate: None,
                reason: "all gates passed",
                attempt,
            },
        }
    }
}

/// Serialize a DeviceMessage to JSON bytes and write to the output buffer.
/// Returns the number of bytes written, or None if serialization failed.
pub fn serialize_message(msg: &DeviceMessage, buf: &mut [u8]) -> Option<usize> {
    match serde_json_core::to_slice(msg, buf) {
        Ok(len) => {
            // Append newline for NDJSON
            if len < buf.len() {
                buf[len] = b'\n';
                Some(len + 1)
            } else {
                Some(len)
            }
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::{GateDenial, GateKind};
    use alloc::vec;

    // ── DeviceMessage serialization ─────────────────────────────────

    #[test]
    fn serialize_status_message() {
        let msg = DeviceMessage::Status {
            state: "LISTENING",
            uptime_ms: 4_200,
            signals: 7,
            errors: 0,
            version: "0.1.0",
        };
        let mut buf = [0u8; 256];
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains(r#""state":"LISTENING""#));
        assert!(json.contains(r#""uptime_ms":4200"#));
        assert!(json.contains(r#""signals":7"#));
    }

    #[test]
    fn serialize_signal_message() {
        let mut signal = CapturedSignal {
            capture_time_us: 2_000_000,
            frequency_mhz: 433.92,
            rssi_dbm: -61,
            pulse_times: Some(vec![200u16; 24].into_boxed_slice()),
            is_valid: true,
            ..Default::default()
        };
        let _ = signal.protocol.push_str("RCSwitch-1");
        let _ = signal.device_type.push_str("Doorbell");

        let msg = DeviceMessage::from_signal(3, &signal);
        let mut buf = [0u8; 512];
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""type":"signal""#));
        assert!(json.contains(r#""index":3"#));
        assert!(json.contains(r#""rssi":-61"#));
        assert!(json.contains(r#""protocol":"RCSwitch-1""#));
        assert!(json.contains(r#""device_type":"Doorbell""#));
        assert!(json.contains(r#""pulses":24"#));
        assert!(json.contains(r#""ts":2000"#));
    }

    #[test]
    fn serialize_gate_denial_names_the_gate() {
        let mut report = GateReport::default();
        let _ = report.passed.push(GateKind::Policy);
        report.denial = Some(GateDenial {
            gate: GateKind::Confirmation,
            reason: heapless::String::try_from("confirmation timeout").unwrap(),
        });

        let msg = DeviceMessage::from_gate_report(&report, 2);
        let mut buf = [0u8; 512];
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""allowed":false"#));
        assert!(json.contains(r#""gate":"CONFIRMATION""#));
        assert!(json.contains(r#""reason":"confirmation timeout""#));
        assert!(json.contains(r#""attempt":2"#));
    }

    #[test]
    fn serialize_gate_approval_omits_gate_field() {
        let mut report = GateReport::default();
        for gate in [
            GateKind::Policy,
            GateKind::Confirmation,
            GateKind::RateLimit,
            GateKind::Band,
        ] {
            let _ = report.passed.push(gate);
        }

        let msg = DeviceMessage::from_gate_report(&report, 1);
        let mut buf = [0u8; 512];
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""allowed":true"#));
        assert!(!json.contains("\"gate\":"));
    }

    // ── NDJSON framing ──────────────────────────────────────────────

    #[test]
    fn serialize_message_appends_newline() {
        let msg = DeviceMessage::Status {
            state: "IDLE",
            uptime_ms: 0,
            signals: 0,
            errors: 0,
            version: VERSION,
        };
        let mut buf = [0u8; MAX_MSG_LEN];
        let len = serialize_message(&msg, &mut buf).unwrap();
        assert_eq!(buf[len - 1], b'\n');
    }

    // ── Version constant ────────────────────────────────────────────

    #[test]
    fn version_is_semver() {
        let parts: heapless::Vec<&str, 4> = VERSION.split('.').collect();
        assert_eq!(parts.len(), 3, "VERSION should be semver (major.minor.patch)");
        for part in &parts {
            assert!(part.parse::<u32>().is_ok(), "'{part}' is not a number");
        }
    }
}
