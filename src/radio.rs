/// Hardware collaborator interface.
///
/// One trait covers both bands: a sub-GHz pulse radio and a 2.4 GHz
/// packet radio implement the same surface and are selected once at
/// `initialize()`, held as a single trait object. The core treats the
/// radio as a synchronous pollable source; interrupt-driven drivers
/// buffer underneath and drain through `receive_signal`.
use crate::config::RfBand;
use crate::signal::CapturedSignal;

/// Radio-layer failures surfaced to the workflow. Each maps onto a
/// workflow error category (`InitFailed` at startup, `HardwareFailure` /
/// `TransmissionFailed` afterward).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RadioError {
    #[error("radio unavailable")]
    Unavailable,
    #[error("receive path failed")]
    ReceiveFailed,
    #[error("transmit failed")]
    TransmitFailed,
}

/// Band-specific radio hardware, as the workflow core sees it.
///
/// Implementations must keep the transmitter electrically disabled
/// unless `set_transmit_enabled(true)` was the most recent enable call;
/// the workflow re-disables on every state where transmission is not
/// permitted.
pub trait RadioLink {
    fn band(&self) -> RfBand;

    fn start_receive(&mut self) -> Result<(), RadioError>;
    fn stop_receive(&mut self);

    /// Whether at least one decoded signal is waiting to be drained.
    fn has_signal(&mut self) -> bool;

    /// Drain one decoded signal. `None` when the queue raced empty.
    fn receive_signal(&mut self) -> Option<CapturedSignal>;

    fn set_transmit_enabled(&mut self, enabled: bool);
    fn is_transmit_enabled(&self) -> bool;

    /// Transmit the given signal once. Callers are responsible for the
    /// approval chain; implementations only check the enable latch.
    fn transmit(&mut self, signal: &CapturedSignal) -> Result<(), RadioError>;
}
