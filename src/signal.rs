/// Captured-signal records and the bounded capture buffer.
///
/// A record may own a variable-length pulse-timing array (sub-GHz band
/// only). Ownership is exclusive: cloning deep-copies the array, moving a
/// record into the buffer transfers it, and the borrow checker rejects
/// any use of the source afterward — the manual copy/move/free rules the
/// hardware side of this design used to uphold by hand are structural
/// here.
use alloc::boxed::Box;
use alloc::collections::TryReserveError;
use alloc::vec::Vec;

/// Maximum raw payload bytes carried by one record.
pub const MAX_PAYLOAD: usize = 32;

/// Protocol identifier / peer address string ("RCSwitch-1", "AA:BB:…").
pub type ProtocolString = heapless::String<32>;

/// Classified device type ("Garage Door", "Doorbell", …).
pub type DeviceTypeString = heapless::String<32>;

/// One captured RF signal.
///
/// `rssi_dbm == 0` means strength was not measured (pulse receivers
/// without an RSSI pin); validation and statistics treat it as absent.
#[derive(Debug, Clone, Default)]
pub struct CapturedSignal {
    /// Monotonic capture timestamp, microseconds.
    pub capture_time_us: u64,
    /// Carrier frequency, MHz.
    pub frequency_mhz: f32,
    pub rssi_dbm: i8,
    pub raw: [u8; MAX_PAYLOAD],
    pub raw_len: u8,
    /// Pulse-timing samples in microseconds. Exclusively owned;
    /// meaningful only for the sub-GHz band.
    pub pulse_times: Option<Box<[u16]>>,
    pub protocol: ProtocolString,
    pub device_type: DeviceTypeString,
    pub is_valid: bool,
}

impl CapturedSignal {
    /// Payload bytes actually captured.
    pub fn payload(&self) -> &[u8] {
        let len = usize::from(self.raw_len).min(MAX_PAYLOAD);
        &self.raw[..len]
    }

    /// Store up to [`MAX_PAYLOAD`] bytes, truncating the rest.
    pub fn set_payload(&mut self, bytes: &[u8]) {
        let len = bytes.len().min(MAX_PAYLOAD);
        self.raw[..len].copy_from_slice(&bytes[..len]);
        self.raw_len = len as u8;
    }

    pub fn pulse_count(&self) -> usize {
        self.pulse_times.as_ref().map_or(0, |p| p.len())
    }

    /// Average pulse width in microseconds; 0.0 without samples.
    pub fn avg_pulse_us(&self) -> f32 {
        match &self.pulse_times {
            Some(pulses) if !pulses.is_empty() => {
                let sum: u32 = pulses.iter().map(|&p| u32::from(p)).sum();
                sum as f32 / pulses.len() as f32
            }
            _ => 0.0,
        }
    }

    /// Total pulse-train time in microseconds (one repetition).
    pub fn pulse_train_us(&self) -> u32 {
        self.pulse_times
            .as_ref()
            .map_or(0, |p| p.iter().map(|&w| u32::from(w)).sum())
    }

    pub fn has_rssi(&self) -> bool {
        self.rssi_dbm != 0
    }
}

/// Bounded, insertion-ordered container of captured signals.
///
/// Capacity is declared once per run via [`reserve`](Self::reserve);
/// insertion moves records in (no deep copy on the capture path) and
/// fails when full. Reads are index-based; the returned borrow is valid
/// until the next mutation, which the borrow checker enforces.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    entries: Vec<CapturedSignal>,
    capacity: usize,
}

impl CaptureBuffer {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            capacity: 0,
        }
    }

    /// Drop previous contents and pre-allocate for `capacity` records.
    /// Allocation is fallible; on failure the buffer is left empty with
    /// zero capacity rather than partially constructed.
    pub fn reserve(&mut self, capacity: usize) -> Result<(), TryReserveError> {
        self.entries = Vec::new();
        self.capacity = 0;
        self.entries.try_reserve_exact(capacity)?;
        self.capacity = capacity;
        Ok(())
    }

    /// Move a record into the buffer. Returns it back if the buffer is at
    /// capacity.
    pub fn push(&mut self, signal: CapturedSignal) -> Result<(), CapturedSignal> {
        if self.entries.len() >= self.capacity {
            return Err(signal);
        }
        self.entries.push(signal);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&CapturedSignal> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fill level in [0.0, 1.0]; 0.0 for an unreserved buffer.
    pub fn fill_ratio(&self) -> f32 {
        if self.capacity == 0 {
            0.0
        } else {
            self.entries.len() as f32 / self.capacity as f32
        }
    }

    /// Remove all records; reserved capacity is kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> core::slice::Iter<'_, CapturedSignal> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, CapturedSignal> {
        self.entries.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse_record(widths: &[u16]) -> CapturedSignal {
        let mut signal = CapturedSignal {
            capture_time_us: 1_000,
            frequency_mhz: 433.92,
            rssi_dbm: -60,
            is_valid: true,
            pulse_times: Some(widths.to_vec().into_boxed_slice()),
            ..Default::default()
        };
        let _ = signal.protocol.push_str("RCSwitch-1");
        signal
    }

    // ── Record ownership ────────────────────────────────────────────

    #[test]
    fn clone_deep_copies_pulse_array() {
        let original = pulse_record(&[200, 200, 200]);
        let mut copy = original.clone();

        if let Some(pulses) = copy.pulse_times.as_mut() {
            pulses[0] = 9_999;
        }

        assert_eq!(original.pulse_times.as_ref().unwrap()[0], 200);
        assert_eq!(copy.pulse_times.as_ref().unwrap()[0], 9_999);
    }

    #[test]
    fn move_into_buffer_transfers_pulse_ownership() {
        let mut buffer = CaptureBuffer::new();
        buffer.reserve(4).unwrap();

        let record = pulse_record(&[300; 12]);
        buffer.push(record).unwrap();
        // `record` is statically gone here; the buffer is the only owner.

        assert_eq!(buffer.get(0).unwrap().pulse_count(), 12);
    }

    #[test]
    fn payload_roundtrip_and_truncation() {
        let mut signal = CapturedSignal::default();
        signal.set_payload(&[0xAA, 0xBB, 0xCC]);
        assert_eq!(signal.payload(), &[0xAA, 0xBB, 0xCC]);

        let oversized = [0x55u8; 40];
        signal.set_payload(&oversized);
        assert_eq!(signal.payload().len(), MAX_PAYLOAD);
    }

    #[test]
    fn avg_pulse_handles_missing_samples() {
        let mut signal = CapturedSignal::default();
        assert_eq!(signal.avg_pulse_us(), 0.0);
        signal.pulse_times = Some(Box::new([100, 200, 300]));
        assert_eq!(signal.avg_pulse_us(), 200.0);
        assert_eq!(signal.pulse_train_us(), 600);
    }

    // ── Buffer bounds ───────────────────────────────────────────────

    #[test]
    fn push_fails_at_capacity_and_returns_record() {
        let mut buffer = CaptureBuffer::new();
        buffer.reserve(2).unwrap();

        assert!(buffer.push(pulse_record(&[200; 10])).is_ok());
        assert!(buffer.push(pulse_record(&[200; 10])).is_ok());

        let rejected = buffer.push(pulse_record(&[200; 10]));
        assert!(rejected.is_err());
        assert_eq!(buffer.len(), 2);
        // The rejected record is handed back intact, still owning its
        // pulse array.
        assert_eq!(rejected.unwrap_err().pulse_count(), 10);
    }

    #[test]
    fn unreserved_buffer_rejects_push() {
        let mut buffer = CaptureBuffer::new();
        assert!(buffer.push(CapturedSignal::default()).is_err());
        assert_eq!(buffer.fill_ratio(), 0.0);
    }

    #[test]
    fn fill_ratio_tracks_len() {
        let mut buffer = CaptureBuffer::new();
        buffer.reserve(10).unwrap();
        for _ in 0..9 {
            buffer.push(CapturedSignal::default()).unwrap();
        }
        assert!(buffer.fill_ratio() >= 0.9);
        assert!(buffer.fill_ratio() < 1.0);
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut buffer = CaptureBuffer::new();
        buffer.reserve(3).unwrap();
        buffer.push(CapturedSignal::default()).unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 3);
        assert!(buffer.push(CapturedSignal::default()).is_ok());
    }
}
