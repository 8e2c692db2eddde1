//! # Transport Adapter
//!
//! Wraps the external CAN driver: a blocking `send` that busy-waits for a
//! free mailbox, and the inbound [`Frame`] type handed to the Protocol
//! Engine by the platform's CAN ISR/dispatcher.

/// One CAN 2.0A frame: an 11-bit standard ID, a DLC in `0..=8`, and up to 8
/// payload bytes. The Protocol Engine dispatches entirely on DLC, not on a
/// separate opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    pub id: u16,
    pub dlc: u8,
    pub data: [u8; 8],
}

impl Frame {
    pub fn new(id: u16, dlc: u8, data: [u8; 8]) -> Self {
        debug_assert!(dlc <= 8);
        Frame { id, dlc, data }
    }

    /// The valid prefix of `data`, per `dlc`.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

/// Reply builder: right-pads `bytes` with zeros to `dlc`.
pub fn reply(bytes: &[u8], dlc: u8) -> Frame {
    let mut data = [0u8; 8];
    data[..bytes.len()].copy_from_slice(bytes);
    Frame { id: 0, dlc, data }
}

/// The CAN peripheral primitives this crate assumes: the ability to
/// transmit one frame and receive one frame, both non-blocking in the
/// `embedded-hal`/`bxcan` `nb` convention. Mailbox-full and empty-queue are
/// both reported as [`nb::Error::WouldBlock`].
pub trait CanController {
    /// Transmission failure. A `WouldBlock` means "no free mailbox, come
    /// back later"; any other variant is a hardware error and is fatal per
    /// spec §7 (the caller must invoke the platform fault handler).
    type TxError;
    /// Reception failure; `WouldBlock` means "nothing queued".
    type RxError;

    fn transmit(&mut self, frame: &Frame) -> nb::Result<(), Self::TxError>;
    fn receive(&mut self) -> nb::Result<Frame, Self::RxError>;
}

/// Blocking `send` over a [`CanController`], plus the inbound poll used by
/// the platform's CAN ISR/dispatcher to hand frames to the Protocol Engine.
pub struct Transport<C> {
    can: C,
}

impl<C: CanController> Transport<C> {
    pub fn new(can: C) -> Self {
        Transport { can }
    }

    /// Send one frame, busy-spinning while all mailboxes are full. This is
    /// only called while the resident image is programming, not while the
    /// main application runs, so a spin loop is an acceptable suspension
    /// point (spec §5).
    ///
    /// A hardware transmit error is unrecoverable; the device is in an
    /// untrustworthy state and the platform fault handler is invoked.
    pub fn send(&mut self, frame: Frame, fault: &mut impl crate::fault::FaultHandler) {
        loop {
            match self.can.transmit(&frame) {
                Ok(()) => return,
                Err(nb::Error::WouldBlock) => continue,
                Err(nb::Error::Other(_)) => {
                    fault.fault(crate::fault::FaultReason::TransmitFailed);
                }
            }
        }
    }

    /// Called from the platform's CAN ISR/dispatcher with each received
    /// frame. Returns `None` when nothing is queued.
    pub fn poll_receive(&mut self) -> Option<Frame> {
        match self.can.receive() {
            Ok(frame) => Some(frame),
            Err(nb::Error::WouldBlock) => None,
            Err(nb::Error::Other(_)) => None,
        }
    }

    /// Test-only escape hatch onto the underlying [`CanController`], so
    /// callers built around a fake can assert on what was transmitted.
    #[cfg(test)]
    pub fn controller(&self) -> &C {
        &self.can
    }
}

#[cfg(feature = "hardware")]
pub use bxcan_backend::BxCan;

#[cfg(feature = "hardware")]
mod bxcan_backend {
    use super::{CanController, Frame};
    use bxcan::{Can, Data, ExtendedId, Fifo, Frame as BxFrame, Instance, StandardId};

    /// Real CAN backend over `bxcan`.
    pub struct BxCan<I: Instance> {
        can: Can<I>,
    }

    impl<I: Instance> BxCan<I> {
        pub fn new(can: Can<I>) -> Self {
            BxCan { can }
        }
    }

    impl<I: Instance> CanController for BxCan<I> {
        type TxError = ();
        type RxError = ();

        fn transmit(&mut self, frame: &Frame) -> nb::Result<(), Self::TxError> {
            let id = StandardId::new(frame.id).unwrap_or_else(|| StandardId::MAX);
            let data = Data::new(&frame.data[..frame.dlc as usize]).ok_or(nb::Error::Other(()))?;
            let bx_frame = BxFrame::new_data(id, data);
            self.can
                .transmit(&bx_frame)
                .map(|_| ())
                .map_err(|_| nb::Error::WouldBlock)
        }

        fn receive(&mut self) -> nb::Result<Frame, Self::RxError> {
            let bx_frame = self.can.receive().map_err(|_| nb::Error::WouldBlock)?;
            let id = match bx_frame.id() {
                bxcan::Id::Standard(id) => id.as_raw(),
                bxcan::Id::Extended(id) => id.as_raw() as u16,
            };
            let dlc = bx_frame.dlc() as u8;
            let mut data = [0u8; 8];
            if let Some(payload) = bx_frame.data() {
                data[..payload.len()].copy_from_slice(payload);
            }
            let _ = Fifo::Fifo0;
            let _ = ExtendedId::ZERO;
            Ok(Frame::new(id, dlc, data))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeCan;
    use super::*;
    use crate::fault::FaultHandler;

    struct PanicFault;
    impl FaultHandler for PanicFault {
        fn fault(&mut self, reason: crate::fault::FaultReason) -> ! {
            panic!("fault: {:?}", reason);
        }
    }

    #[test]
    fn send_records_frame_on_first_attempt() {
        let mut t = Transport::new(FakeCan::new());
        let mut fault = PanicFault;
        t.send(reply(&[0xAA, 0xAA, 0xAA], 3), &mut fault);
        assert_eq!(t.can.sent.len(), 1);
        assert_eq!(t.can.sent[0].dlc, 3);
        assert_eq!(&t.can.sent[0].data[..3], &[0xAA, 0xAA, 0xAA]);
    }

    #[test]
    #[should_panic(expected = "TransmitFailed")]
    fn send_hardware_error_is_fatal() {
        let mut can = FakeCan::new();
        can.fail_next_transmit = true;
        let mut t = Transport::new(can);
        let mut fault = PanicFault;
        t.send(reply(&[0], 1), &mut fault);
    }

    #[test]
    fn poll_receive_drains_queued_frames_in_order() {
        let mut can = FakeCan::new();
        can.push_inbound(Frame::new(0x600, 0, [0; 8]));
        can.push_inbound(Frame::new(0x600, 5, [0xAB, 0, 0, 0, 0, 0, 0, 0]));
        let mut t = Transport::new(can);
        assert_eq!(t.poll_receive().unwrap().dlc, 0);
        assert_eq!(t.poll_receive().unwrap().data[0], 0xAB);
        assert!(t.poll_receive().is_none());
    }
}
