//! The receiving half of an ISO-TP link.

use super::{Frame, FlowStatus, Status, CF_TIMEOUT_MS, FF_DATA_LENGTH};
use crate::can_interface::{CanInterface, Listener};
use crate::fifo::Fifo;
use crate::stream::Stream;
use candrive_hal::{CanController, CanFrame, CanId};

const MAX_BLOCK_SIZE: u8 = 8;
/// How often a stalled receiver retries flow control while in
/// [`State::WaitForStreamSpace`].
const WAIT_RETRY_MS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitForFirstOrSingle,
    WaitForConsecutive,
    WaitForStreamSpace,
}

/// Reassembles an incoming ISO-TP transfer into a byte stream.
///
/// `N` bounds the reassembled payload; `BUF` bounds the number of raw CAN
/// frames buffered between [`RxLink::on_frame`] (called from interrupt or
/// poll context) and [`RxLink::process`].
pub struct RxLink<const N: usize, const BUF: usize> {
    rx_id: CanId,
    tx_id: CanId,
    separation_time: u8,
    state: State,
    expected_size: usize,
    received_bytes: usize,
    sequence_number: u8,
    wait_timer_ms: u32,
    wait_frame_count: u8,
    frames: Fifo<CanFrame, BUF>,
    rx_stream: Stream<N>,
    callback: Option<fn(Status)>,
}

impl<const N: usize, const BUF: usize> RxLink<N, BUF> {
    /// Binds a link listening on `rx_id` and replying flow control on
    /// `tx_id`, with `separation_time` requested of the sender.
    pub fn new(rx_id: CanId, tx_id: CanId, separation_time: u8, callback: Option<fn(Status)>) -> Self {
        Self {
            rx_id,
            tx_id,
            separation_time,
            state: State::WaitForFirstOrSingle,
            expected_size: 0,
            received_bytes: 0,
            sequence_number: 0,
            wait_timer_ms: 0,
            wait_frame_count: 0,
            frames: Fifo::new(),
            rx_stream: Stream::new(),
            callback: callback,
        }
    }

    /// Reads up to `destination.len()` reassembled bytes out of the link.
    pub fn receive(&mut self, destination: &mut [u8]) -> usize {
        self.rx_stream.read(destination)
    }

    /// Advances the link's state machine. Must be called regularly (the
    /// tick period determines timeout resolution); `now_ms` is the current
    /// monotonic time.
    pub fn process<C: CanController>(&mut self, bus: &mut CanInterface<C>, now_ms: u32) {
        self.check_timeout(now_ms);

        while let Some(frame) = self.frames.pop() {
            self.handle_frame(bus, &frame, now_ms);
        }

        if self.state == State::WaitForStreamSpace {
            if self.rx_stream.available_space() > 0 {
                self.send_flow_control(bus, now_ms);
            } else if crate::systime::elapsed(self.wait_timer_ms, now_ms) >= WAIT_RETRY_MS {
                self.enter_wait(bus, now_ms);
            }
        }
    }

    fn check_timeout(&mut self, now_ms: u32) {
        if self.state == State::WaitForConsecutive
            && crate::systime::elapsed(self.wait_timer_ms, now_ms) > CF_TIMEOUT_MS
        {
            self.abort(Status::Timeout);
        }
    }

    fn handle_frame<C: CanController>(
        &mut self,
        bus: &mut CanInterface<C>,
        frame: &CanFrame,
        now_ms: u32,
    ) {
        let Some(decoded) = Frame::decode(frame) else {
            return;
        };

        match (self.state, decoded) {
            (State::WaitForFirstOrSingle, Frame::Single { data }) => {
                self.rx_stream.clear();
                self.rx_stream.write(&data);
                self.notify(Status::Done);
            }
            (State::WaitForFirstOrSingle, Frame::First { total_size, data }) => {
                self.expected_size = total_size as usize;
                self.received_bytes = FF_DATA_LENGTH.min(self.expected_size);
                self.sequence_number = 1;
                self.rx_stream.clear();
                self.rx_stream.write(&data[..self.received_bytes.min(data.len())]);
                self.wait_timer_ms = now_ms;
                self.wait_frame_count = 0;
                self.state = State::WaitForConsecutive;
                self.send_flow_control(bus, now_ms);
            }
            (State::WaitForConsecutive, Frame::Consecutive { sequence_number, data }) => {
                if sequence_number != self.sequence_number % 16 {
                    self.abort(Status::LostFrame);
                    return;
                }
                let written = self.rx_stream.write(&data);
                if written < data.len() {
                    self.abort(Status::OverflowAbort);
                    return;
                }
                self.received_bytes += data.len();
                self.sequence_number = (self.sequence_number + 1) % 16;
                self.wait_timer_ms = now_ms;

                if self.received_bytes >= self.expected_size {
                    self.state = State::WaitForFirstOrSingle;
                    self.notify(Status::Done);
                } else if self.rx_stream.available_space() == 0 {
                    self.enter_wait(bus, now_ms);
                }
            }
            _ => {}
        }
    }

    /// Grants the peer a block of consecutive frames if the stream has
    /// room, otherwise enters [`State::WaitForStreamSpace`].
    fn send_flow_control<C: CanController>(&mut self, bus: &mut CanInterface<C>, now_ms: u32) {
        let available_slots = self.rx_stream.available_space() / super::CF_DATA_LENGTH;
        let block_size = (available_slots.min(MAX_BLOCK_SIZE as usize)) as u8;
        if block_size == 0 {
            self.enter_wait(bus, now_ms);
            return;
        }
        self.state = State::WaitForConsecutive;
        self.wait_frame_count = 0;
        let fc = Frame::FlowControl {
            status: FlowStatus::ContinueToSend,
            block_size,
            separation_time: self.separation_time,
        };
        let encoded = fc.encode(self.tx_id);
        bus.transmit(encoded.id(), encoded.data()).ok();
    }

    /// Emits `FC(Wait)` to hold the sender off while the stream is full,
    /// notifying `Waiting` exactly once on the transition into
    /// [`State::WaitForStreamSpace`], and aborts with `FC(Overflow)` once
    /// [`super::WF_MAX`] wait frames have been sent without the stream
    /// draining.
    fn enter_wait<C: CanController>(&mut self, bus: &mut CanInterface<C>, now_ms: u32) {
        let was_waiting = self.state == State::WaitForStreamSpace;
        self.state = State::WaitForStreamSpace;
        self.wait_timer_ms = now_ms;
        self.wait_frame_count += 1;

        if self.wait_frame_count >= super::WF_MAX {
            defmt::warn!("isotp rx: wait_frame_count reached {}, aborting receive", self.wait_frame_count);
            let fc = Frame::FlowControl {
                status: FlowStatus::Overflow,
                block_size: 0,
                separation_time: 0,
            };
            let encoded = fc.encode(self.tx_id);
            bus.transmit(encoded.id(), encoded.data()).ok();
            self.abort(Status::Timeout);
            return;
        }

        let fc = Frame::FlowControl {
            status: FlowStatus::Wait,
            block_size: 0,
            separation_time: self.separation_time,
        };
        let encoded = fc.encode(self.tx_id);
        bus.transmit(encoded.id(), encoded.data()).ok();
        if !was_waiting {
            self.notify(Status::Waiting);
        }
    }

    fn abort(&mut self, status: Status) {
        self.state = State::WaitForFirstOrSingle;
        self.wait_frame_count = 0;
        self.rx_stream.clear();
        defmt::debug!("isotp rx: aborting link");
        self.notify(status);
    }

    fn notify(&self, status: Status) {
        if let Some(callback) = self.callback {
            callback(status);
        }
    }
}

impl<const N: usize, const BUF: usize> Listener for RxLink<N, BUF> {
    fn on_frame(&mut self, frame: &CanFrame) {
        if frame.id() == self.rx_id {
            self.frames.push(*frame).ok();
        }
    }
}
