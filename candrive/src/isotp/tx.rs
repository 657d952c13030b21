//! The sending half of an ISO-TP link.

use super::{Frame, FlowStatus, Status, CF_DATA_LENGTH, FC_TIMEOUT_MS, FF_DATA_LENGTH, SF_DATA_LENGTH, WF_MAX};
use crate::can_interface::{CanInterface, Listener};
use crate::fifo::Fifo;
use candrive_hal::{CanController, CanFrame, CanId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Inactive,
    SendConsecutive,
    WaitForFlowControl,
}

/// Sends a payload of arbitrary length as an ISO-TP transfer, pacing
/// consecutive frames according to the peer's flow control.
///
/// `N` bounds the payload a single [`TxLink::send`] call can carry; `BUF`
/// bounds the number of raw CAN frames (flow control replies) buffered
/// between [`TxLink::on_frame`] and [`TxLink::process`].
pub struct TxLink<const N: usize, const BUF: usize> {
    rx_id: CanId,
    tx_id: CanId,
    state: State,
    data: [u8; N],
    length: usize,
    sent_bytes: usize,
    sequence_number: u8,
    block_size: u8,
    block_count: u8,
    separation_time_us: u32,
    wf_count: u8,
    wait_timer_ms: u32,
    frames: Fifo<CanFrame, BUF>,
    callback: Option<fn(Status)>,
}

impl<const N: usize, const BUF: usize> TxLink<N, BUF> {
    /// Binds a link sending on `tx_id` and expecting flow control replies
    /// on `rx_id`.
    pub fn new(rx_id: CanId, tx_id: CanId, callback: Option<fn(Status)>) -> Self {
        Self {
            rx_id,
            tx_id,
            state: State::Inactive,
            data: [0; N],
            length: 0,
            sent_bytes: 0,
            sequence_number: 0,
            block_size: 0,
            block_count: 0,
            separation_time_us: 0,
            wf_count: 0,
            wait_timer_ms: 0,
            frames: Fifo::new(),
            callback,
        }
    }

    /// `true` if a transfer is in progress.
    pub fn is_active(&self) -> bool {
        self.state != State::Inactive
    }

    /// Starts sending `data`, which must be no longer than `N` bytes.
    /// Returns `false` if a transfer is already in progress or `data` does
    /// not fit.
    pub fn send<C: CanController>(
        &mut self,
        bus: &mut CanInterface<C>,
        data: &[u8],
        now_ms: u32,
    ) -> bool {
        if self.is_active() || data.len() > N {
            return false;
        }

        self.data[..data.len()].copy_from_slice(data);
        self.length = data.len();
        self.sent_bytes = 0;
        self.sequence_number = 1;

        if data.len() <= SF_DATA_LENGTH {
            let mut payload = heapless::Vec::new();
            payload.extend_from_slice(data).ok();
            let frame = Frame::Single { data: payload };
            let encoded = frame.encode(self.tx_id);
            bus.transmit(encoded.id(), encoded.data()).ok();
            self.notify(Status::Done);
            return true;
        }

        let mut payload = heapless::Vec::new();
        payload.extend_from_slice(&data[..FF_DATA_LENGTH]).ok();
        let frame = Frame::First {
            total_size: data.len() as u16,
            data: payload,
        };
        let encoded = frame.encode(self.tx_id);
        bus.transmit(encoded.id(), encoded.data()).ok();
        self.sent_bytes = FF_DATA_LENGTH;
        self.state = State::WaitForFlowControl;
        self.wf_count = 0;
        self.wait_timer_ms = now_ms;
        true
    }

    /// Advances the link's state machine; must be called regularly.
    pub fn process<C: CanController>(&mut self, bus: &mut CanInterface<C>, now_ms: u32) {
        while let Some(frame) = self.frames.pop() {
            self.handle_frame(&frame);
        }

        if self.state == State::WaitForFlowControl
            && crate::systime::elapsed(self.wait_timer_ms, now_ms) > FC_TIMEOUT_MS
        {
            defmt::warn!("isotp tx: timed out waiting for flow control");
            self.abort(Status::Timeout);
            return;
        }

        if self.state == State::SendConsecutive
            && crate::systime::elapsed(self.wait_timer_ms, now_ms) * 1000 >= self.separation_time_us
        {
            self.send_next_consecutive(bus, now_ms);
        }
    }

    fn handle_frame(&mut self, frame: &CanFrame) {
        if frame.id() != self.rx_id || self.state != State::WaitForFlowControl {
            return;
        }
        let Some(Frame::FlowControl {
            status,
            block_size,
            separation_time,
        }) = Frame::decode(frame)
        else {
            return;
        };

        match status {
            FlowStatus::ContinueToSend => {
                self.block_size = block_size;
                self.block_count = 0;
                self.separation_time_us = super::separation_time_to_us(separation_time);
                self.state = State::SendConsecutive;
            }
            FlowStatus::Wait => {
                self.wf_count += 1;
                if self.wf_count >= WF_MAX {
                    defmt::warn!("isotp tx: wf_count reached {}, aborting send", self.wf_count);
                    self.abort(Status::Timeout);
                }
            }
            FlowStatus::Overflow => {
                defmt::warn!("isotp tx: peer reported overflow, aborting send");
                self.abort(Status::OverflowAbort);
            }
        }
    }

    fn send_next_consecutive<C: CanController>(&mut self, bus: &mut CanInterface<C>, now_ms: u32) {
        let remaining = self.length - self.sent_bytes;
        let chunk_len = remaining.min(CF_DATA_LENGTH);
        let mut payload = heapless::Vec::new();
        payload
            .extend_from_slice(&self.data[self.sent_bytes..self.sent_bytes + chunk_len])
            .ok();
        let frame = Frame::Consecutive {
            sequence_number: self.sequence_number,
            data: payload,
        };
        let encoded = frame.encode(self.tx_id);
        bus.transmit(encoded.id(), encoded.data()).ok();

        self.sent_bytes += chunk_len;
        self.sequence_number = (self.sequence_number + 1) % 16;
        self.wait_timer_ms = now_ms;

        if self.sent_bytes >= self.length {
            self.state = State::Inactive;
            self.notify(Status::Done);
            return;
        }

        self.block_count += 1;
        if self.block_size != 0 && self.block_count >= self.block_size {
            self.state = State::WaitForFlowControl;
            self.wf_count = 0;
        }
    }

    fn abort(&mut self, status: Status) {
        self.state = State::Inactive;
        self.notify(status);
    }

    fn notify(&self, status: Status) {
        if let Some(callback) = self.callback {
            callback(status);
        }
    }
}

impl<const N: usize, const BUF: usize> Listener for TxLink<N, BUF> {
    fn on_frame(&mut self, frame: &CanFrame) {
        if frame.id() == self.rx_id {
            self.frames.push(*frame).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candrive_hal::CanId;

    struct FakeController {
        transmitted: heapless::Vec<CanFrame, 16>,
    }

    unsafe impl CanController for FakeController {
        type Error = ();

        fn transmit(&mut self, frame: &CanFrame) -> Result<bool, Self::Error> {
            self.transmitted.push(*frame).ok();
            Ok(true)
        }

        fn poll(&mut self) -> Option<CanFrame> {
            None
        }
    }

    fn bus() -> CanInterface<FakeController> {
        CanInterface::new(FakeController {
            transmitted: heapless::Vec::new(),
        })
    }

    #[test]
    fn short_payload_sends_as_single_frame() {
        let mut link: TxLink<64, 5> = TxLink::new(CanId::Standard(0x11), CanId::Standard(0x10), None);
        let mut bus = bus();
        assert!(link.send(&mut bus, &[1, 2, 3], 0));
        assert!(!link.is_active());
    }

    #[test]
    fn long_payload_waits_for_flow_control_then_sends_consecutive_frames() {
        let mut link: TxLink<64, 5> = TxLink::new(CanId::Standard(0x11), CanId::Standard(0x10), None);
        let mut bus = bus();
        let payload: heapless::Vec<u8, 64> = (0..20u8).collect();
        assert!(link.send(&mut bus, &payload, 0));
        assert!(link.is_active());

        let fc = Frame::FlowControl {
            status: FlowStatus::ContinueToSend,
            block_size: 0,
            separation_time: 0,
        };
        let encoded = fc.encode(CanId::Standard(0x11));
        link.on_frame(&encoded);
        link.process(&mut bus, 1);
        // Two consecutive frames are needed for the remaining 14 bytes.
        link.process(&mut bus, 2);
        link.process(&mut bus, 3);
        assert!(!link.is_active());
    }

    #[test]
    fn repeated_wait_replies_eventually_abort() {
        let mut link: TxLink<64, 5> = TxLink::new(CanId::Standard(0x11), CanId::Standard(0x10), None);
        let mut bus = bus();
        let payload: heapless::Vec<u8, 64> = (0..20u8).collect();
        link.send(&mut bus, &payload, 0);

        let wait = Frame::FlowControl {
            status: FlowStatus::Wait,
            block_size: 0,
            separation_time: 0,
        };
        for _ in 0..=WF_MAX {
            link.on_frame(&wait.encode(CanId::Standard(0x11)));
            link.process(&mut bus, 1);
        }
        assert!(!link.is_active());
    }
}
