//! ISO-TP link state machine
//!
//! One [`IsoTpLink`] handles one direction pair of CAN IDs. It performs no
//! I/O: callers feed received CAN payloads in with [`IsoTpLink::on_frame`],
//! tick it with [`IsoTpLink::poll`], and move whatever it queued onto the bus
//! with [`IsoTpLink::drain_outbound`]. Time is supplied by the caller in
//! milliseconds, so the same link runs on a wall clock or a mock clock.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use crate::config::LinkConfig;
use crate::error::IsoTpError;
use crate::pci::{self, FlowStatus, Pci, CF_MAX_DATA, FF_DATA, SF_MAX_DATA};

#[derive(Debug)]
struct TxMessage {
    payload: Vec<u8>,
    offset: usize,
    seq: u8,
}

impl TxMessage {
    fn is_done(&self) -> bool {
        self.offset >= self.payload.len()
    }
}

#[derive(Debug)]
enum TxState {
    Idle,
    WaitFlowControl {
        msg: TxMessage,
        since_ms: u64,
    },
    Sending {
        msg: TxMessage,
        /// Frames left in the current block, `None` when unlimited
        block_remaining: Option<u8>,
        st_min_ms: u64,
        next_at_ms: u64,
    },
}

#[derive(Debug)]
enum RxState {
    Idle,
    Receiving {
        expected_len: usize,
        buf: Vec<u8>,
        next_seq: u8,
        block_count: u8,
        last_frame_ms: u64,
    },
}

/// Segmentation and reassembly for one ISO-TP link
#[derive(Debug)]
pub struct IsoTpLink {
    config: LinkConfig,
    tx: TxState,
    rx: RxState,
    outbound: VecDeque<Vec<u8>>,
    received: VecDeque<Vec<u8>>,
}

impl IsoTpLink {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            tx: TxState::Idle,
            rx: RxState::Idle,
            outbound: VecDeque::new(),
            received: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// CAN ID of every frame in [`Self::drain_outbound`]
    pub fn tx_id(&self) -> u32 {
        self.config.tx_id
    }

    pub fn rx_id(&self) -> u32 {
        self.config.rx_id
    }

    pub fn is_transmitting(&self) -> bool {
        !matches!(self.tx, TxState::Idle)
    }

    pub fn is_receiving(&self) -> bool {
        matches!(self.rx, RxState::Receiving { .. })
    }

    /// Drop any transfer in progress and everything queued
    pub fn reset(&mut self) {
        self.tx = TxState::Idle;
        self.rx = RxState::Idle;
        self.outbound.clear();
        self.received.clear();
    }

    // =========================================================================
    // Transmit
    // =========================================================================

    /// Start sending a message
    ///
    /// Messages up to 7 bytes go out as a single frame immediately. Longer
    /// ones queue a first frame and wait for the peer's flow control; the
    /// consecutive frames are released by [`Self::poll`].
    pub fn send(&mut self, payload: &[u8], now_ms: u64) -> Result<(), IsoTpError> {
        if payload.is_empty() {
            return Err(IsoTpError::EmptyPayload);
        }
        if payload.len() > self.config.max_message_len {
            return Err(IsoTpError::PayloadTooLong {
                len: payload.len(),
                max: self.config.max_message_len,
            });
        }
        if self.is_transmitting() {
            return Err(IsoTpError::Busy);
        }

        if payload.len() <= SF_MAX_DATA {
            trace!(
                tx_id = format!("0x{:03X}", self.config.tx_id),
                len = payload.len(),
                "Single frame"
            );
            self.queue(pci::single_frame(payload));
            return Ok(());
        }

        debug!(
            tx_id = format!("0x{:03X}", self.config.tx_id),
            len = payload.len(),
            "Starting segmented transmission"
        );
        self.queue(pci::first_frame(payload.len(), &payload[..FF_DATA]));
        self.tx = TxState::WaitFlowControl {
            msg: TxMessage {
                payload: payload.to_vec(),
                offset: FF_DATA,
                seq: 1,
            },
            since_ms: now_ms,
        };
        Ok(())
    }

    fn on_flow_control(
        &mut self,
        status: FlowStatus,
        block_size: u8,
        st_min: u8,
        now_ms: u64,
    ) -> Result<(), IsoTpError> {
        let msg = match std::mem::replace(&mut self.tx, TxState::Idle) {
            TxState::WaitFlowControl { msg, .. } => msg,
            other => {
                trace!("Flow control while not waiting for one, ignored");
                self.tx = other;
                return Ok(());
            }
        };

        match status {
            FlowStatus::ContinueToSend => {
                let st_min_ms = if self.config.squash_st_min {
                    0
                } else {
                    pci::st_min_to_ms(st_min)
                };
                self.tx = TxState::Sending {
                    msg,
                    block_remaining: (block_size > 0).then_some(block_size),
                    st_min_ms,
                    next_at_ms: now_ms,
                };
                Ok(())
            }
            FlowStatus::Wait => {
                self.tx = TxState::WaitFlowControl {
                    msg,
                    since_ms: now_ms,
                };
                Ok(())
            }
            FlowStatus::Overflow => {
                warn!(
                    tx_id = format!("0x{:03X}", self.config.tx_id),
                    "Peer rejected message (overflow)"
                );
                Err(IsoTpError::PeerOverflow)
            }
        }
    }

    fn pump_consecutive(&mut self, now_ms: u64) {
        loop {
            let TxState::Sending {
                msg,
                block_remaining,
                st_min_ms,
                next_at_ms,
            } = &mut self.tx
            else {
                return;
            };
            if now_ms < *next_at_ms {
                return;
            }

            let end = (msg.offset + CF_MAX_DATA).min(msg.payload.len());
            let frame = pci::consecutive_frame(msg.seq, &msg.payload[msg.offset..end]);
            msg.offset = end;
            msg.seq = (msg.seq + 1) & 0x0F;
            let done = msg.is_done();
            let paced = *st_min_ms > 0;
            *next_at_ms = now_ms + *st_min_ms;

            let block_exhausted = match block_remaining {
                Some(left) => {
                    *left -= 1;
                    *left == 0
                }
                None => false,
            };

            self.queue(frame);

            if done {
                debug!(
                    tx_id = format!("0x{:03X}", self.config.tx_id),
                    "Segmented transmission complete"
                );
                self.tx = TxState::Idle;
                return;
            }
            if block_exhausted {
                if let TxState::Sending { msg, .. } = std::mem::replace(&mut self.tx, TxState::Idle)
                {
                    self.tx = TxState::WaitFlowControl {
                        msg,
                        since_ms: now_ms,
                    };
                }
                return;
            }
            if paced {
                return;
            }
        }
    }

    // =========================================================================
    // Receive
    // =========================================================================

    /// Feed one CAN payload addressed to this link
    pub fn on_frame(&mut self, frame: &[u8], now_ms: u64) -> Result<(), IsoTpError> {
        let (pci, data) = pci::decode(frame)?;

        match pci {
            Pci::Single { .. } => {
                if self.is_receiving() {
                    debug!("Single frame interrupts reception in progress");
                }
                self.rx = RxState::Idle;
                self.received.push_back(data.to_vec());
                Ok(())
            }
            Pci::First { len } => self.on_first_frame(len, data, now_ms),
            Pci::Consecutive { seq } => self.on_consecutive_frame(seq, data, now_ms),
            Pci::FlowControl {
                status,
                block_size,
                st_min,
            } => {
                self.on_flow_control(status, block_size, st_min, now_ms)?;
                self.pump_consecutive(now_ms);
                Ok(())
            }
        }
    }

    fn on_first_frame(&mut self, len: usize, data: &[u8], now_ms: u64) -> Result<(), IsoTpError> {
        if len > self.config.max_message_len {
            self.rx = RxState::Idle;
            self.queue(pci::flow_control(FlowStatus::Overflow, 0, 0));
            return Err(IsoTpError::PayloadTooLong {
                len,
                max: self.config.max_message_len,
            });
        }

        let mut buf = Vec::with_capacity(len);
        buf.extend_from_slice(&data[..FF_DATA.min(data.len())]);
        self.rx = RxState::Receiving {
            expected_len: len,
            buf,
            next_seq: 1,
            block_count: 0,
            last_frame_ms: now_ms,
        };
        trace!(
            rx_id = format!("0x{:03X}", self.config.rx_id),
            len,
            "First frame received"
        );
        self.queue(pci::flow_control(
            FlowStatus::ContinueToSend,
            self.config.block_size,
            self.config.st_min_ms,
        ));
        Ok(())
    }

    fn on_consecutive_frame(
        &mut self,
        seq: u8,
        data: &[u8],
        now_ms: u64,
    ) -> Result<(), IsoTpError> {
        let block_size = self.config.block_size;
        let RxState::Receiving {
            expected_len,
            buf,
            next_seq,
            block_count,
            last_frame_ms,
        } = &mut self.rx
        else {
            trace!("Consecutive frame without first frame, ignored");
            return Ok(());
        };

        if seq != *next_seq {
            let expected = *next_seq;
            self.rx = RxState::Idle;
            return Err(IsoTpError::UnexpectedSequence {
                expected,
                actual: seq,
            });
        }

        let remaining = *expected_len - buf.len();
        buf.extend_from_slice(&data[..remaining.min(data.len())]);
        *next_seq = (*next_seq + 1) & 0x0F;
        *last_frame_ms = now_ms;

        if buf.len() >= *expected_len {
            let message = std::mem::take(buf);
            self.rx = RxState::Idle;
            debug!(
                rx_id = format!("0x{:03X}", self.config.rx_id),
                len = message.len(),
                "Segmented reception complete"
            );
            self.received.push_back(message);
            return Ok(());
        }

        if block_size > 0 {
            *block_count += 1;
            if *block_count == block_size {
                *block_count = 0;
                self.queue(pci::flow_control(
                    FlowStatus::ContinueToSend,
                    block_size,
                    self.config.st_min_ms,
                ));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Timers and queues
    // =========================================================================

    /// Release due consecutive frames and enforce N_Bs / N_Cr
    ///
    /// With an STmin of zero every frame of the current block is released at
    /// once; otherwise at most one frame per call.
    pub fn poll(&mut self, now_ms: u64) -> Result<(), IsoTpError> {
        let mut result = Ok(());

        if let RxState::Receiving { last_frame_ms, .. } = &self.rx {
            if now_ms.saturating_sub(*last_frame_ms) >= self.config.n_cr_timeout_ms {
                warn!(
                    rx_id = format!("0x{:03X}", self.config.rx_id),
                    "Reception aborted, consecutive frame timeout"
                );
                self.rx = RxState::Idle;
                result = Err(IsoTpError::ConsecutiveFrameTimeout);
            }
        }

        if let TxState::WaitFlowControl { since_ms, .. } = &self.tx {
            if now_ms.saturating_sub(*since_ms) >= self.config.n_bs_timeout_ms {
                warn!(
                    tx_id = format!("0x{:03X}", self.config.tx_id),
                    "Transmission aborted, flow control timeout"
                );
                self.tx = TxState::Idle;
                result = Err(IsoTpError::FlowControlTimeout);
            }
        }

        self.pump_consecutive(now_ms);
        result
    }

    /// Take every queued outgoing CAN payload, oldest first
    pub fn drain_outbound(&mut self) -> Vec<Vec<u8>> {
        self.outbound.drain(..).collect()
    }

    /// Take the oldest fully reassembled message
    pub fn take_received(&mut self) -> Option<Vec<u8>> {
        self.received.pop_front()
    }

    fn queue(&mut self, mut frame: Vec<u8>) {
        let target = self.config.padded_len();
        if frame.len() < target {
            frame.resize(target, self.config.fill_byte());
        }
        self.outbound.push_back(frame);
    }
}
