//! CAN frame transmission and listener dispatch.
//!
//! Grounded on `can_interface.c`: a thin wrapper around the controller
//! peripheral that fans each received frame out to every interested
//! listener. Unlike the original, which keeps a registration table inside
//! the interface, listeners are passed to [`CanInterface::poll`] for the
//! duration of that call only — a fixed registration table would tie every
//! listener's borrow to the interface's own lifetime, which is unworkable
//! once ISO-TP links need to be both a listener and separately driven by
//! [`crate::isotp::RxLink::process`]/[`crate::isotp::TxLink::process`].
//! Each listener filters on its own identifier, the same way
//! [`crate::isotp::RxLink`] and [`crate::isotp::TxLink`] already do.

use candrive_hal::{CanController, CanFrame, CanId};

/// A frame handler interested in frames matching one or more identifiers.
///
/// Implementations filter in [`Listener::on_frame`] and ignore frames they
/// are not addressed to.
pub trait Listener {
    /// Called with every frame received on the bus.
    fn on_frame(&mut self, frame: &CanFrame);
}

/// Wraps a [`CanController`] for transmission and frame dispatch.
pub struct CanInterface<C: CanController> {
    controller: C,
}

impl<C: CanController> CanInterface<C> {
    /// Wraps `controller`.
    pub fn new(controller: C) -> Self {
        Self { controller }
    }

    /// Transmits a frame built from `id` and `data`, truncating `data` to 8
    /// bytes. Returns `true` if the frame was accepted by the controller.
    pub fn transmit(&mut self, id: CanId, data: &[u8]) -> Result<bool, C::Error> {
        let frame = CanFrame::new(id, data);
        self.controller.transmit(&frame)
    }

    /// Polls the controller once, dispatching a received frame (if any) to
    /// every listener in `listeners`, in order.
    pub fn poll(&mut self, listeners: &mut [&mut dyn Listener]) {
        if let Some(frame) = self.controller.poll() {
            for listener in listeners.iter_mut() {
                listener.on_frame(&frame);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn controller(&self) -> &C {
        &self.controller
    }
}
