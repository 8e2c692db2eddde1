//! Platform fault handler boundary.
//!
//! A hardware CAN transmit failure means the device is in an untrustworthy
//! state (spec §7); the response is to invoke whatever the platform's fault
//! handler is and never return. This is modeled as a trait — a sentinel
//! operation, per the Design Notes' re-architecture guidance — rather than
//! a bare `panic!`, so the real firmware and the host-side test harness can
//! both supply an implementation.

/// Why the platform fault handler was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultReason {
    /// `CanController::transmit` reported a hardware error, not just a full
    /// mailbox.
    TransmitFailed,
    /// The real image/factory-ROM jump returned, which must never happen.
    JumpReturned,
}

/// Invoked on an unrecoverable condition. Must not return.
pub trait FaultHandler {
    fn fault(&mut self, reason: FaultReason) -> !;
}

/// Real platform fault handler: disables interrupts and spins forever,
/// giving a debugger something stable to attach to.
#[cfg(feature = "hardware")]
pub struct Halt;

#[cfg(feature = "hardware")]
impl FaultHandler for Halt {
    fn fault(&mut self, reason: FaultReason) -> ! {
        #[cfg(feature = "defmt")]
        defmt::error!("platform fault: {}", reason);
        cortex_m::interrupt::disable();
        loop {
            cortex_m::asm::wfi();
        }
    }
}
