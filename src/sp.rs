//! Slowpath command channel.
//!
//! Control operations do not go through registers on this controller; they
//! are posted as 16-byte command elements ("ramrods") on a single-page
//! slowpath queue that the firmware consumes in order. Each command is later
//! acknowledged by a completion entry on a receive completion queue, which
//! returns the command's credit and drives the queue and function state
//! machines forward.
//!
//! Commands live in two namespaces told apart by the connection type carried
//! in both the element and its completion: [`EthRamrod`] commands target one
//! Ethernet connection (addressed by its cid), [`CommonRamrod`] commands
//! apply function-wide. The same opcode value can exist in both, so decoding
//! a completion always starts from the connection type.
//!
//! The channel enforces a credit bound: at most `spq_credits` commands may be
//! outstanding, which also guarantees the completion queue always has room
//! for their acknowledgements.

use alloc::vec::Vec;
use num_enum::TryFromPrimitive;

use crate::descriptor::{SlowpathElement, ETH_CONNECTION_TYPE, NONE_CONNECTION_TYPE};
use crate::hal::BxeHal;
use crate::ring::DescRing;
use crate::{BxeError, BxeResult};

/// Slowpath commands addressed to one Ethernet connection.
#[derive(TryFromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EthRamrod {
    /// Attach the connection's rings and start serving it.
    ClientSetup = 1,
    /// Quiesce the connection; completions stop after this is acknowledged.
    Halt = 2,
    /// Program the station MAC address.
    SetMac = 13,
}

/// Function-wide slowpath commands.
#[derive(TryFromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommonRamrod {
    /// Bring up the function in the firmware.
    FunctionStart = 1,
    /// Tear down the function.
    FunctionStop = 2,
    /// Release a halted connection's context in the connection manager.
    CfcDel = 4,
    /// Snapshot the firmware statistics for the function.
    StatQuery = 6,
}

/// Life cycle of one Ethernet connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// No firmware context exists for the queue.
    Closed,
    /// A setup command is in flight.
    Opening,
    /// The queue is serving traffic.
    Open,
    /// A halt command is in flight.
    Halting,
    /// Quiesced; the context still has to be released.
    Halted,
}

/// Life cycle of the PCI function in the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionState {
    /// The function is not started.
    Closed,
    /// A start command is in flight.
    Opening,
    /// The function is up; queues may be opened.
    Open,
    /// A stop command is in flight.
    Closing,
}

/// The slowpath command queue and the state machines it drives.
///
/// Posting helpers return the new queue producer; the device publishes it to
/// the firmware's producer cell, which is what actually kicks the command.
/// Completions are fed back in through [`SlowpathChannel::on_ramrod`] by the
/// receive path.
pub struct SlowpathChannel<H: BxeHal> {
    ring: DescRing<SlowpathElement, H>,
    prod: u16,
    credit: u8,
    max_credit: u8,
    queue_states: Vec<QueueState>,
    function_state: FunctionState,
    pending_mac: bool,
    pending_stats: bool,
    violations: u64,
    function_id: u8,
}

impl<H: BxeHal> SlowpathChannel<H> {
    /// Allocates the single-page command queue for `num_queues` connections.
    ///
    /// # Errors
    ///
    /// Returns the ring allocation errors of [`DescRing::allocate`].
    pub fn allocate(num_queues: u16, max_credit: u8, function_id: u8) -> BxeResult<Self> {
        let ring = DescRing::allocate(1)?;
        let mut queue_states = Vec::with_capacity(num_queues as usize);
        queue_states.resize(num_queues as usize, QueueState::Closed);
        Ok(SlowpathChannel {
            ring,
            prod: 0,
            credit: max_credit,
            max_credit,
            queue_states,
            function_state: FunctionState::Closed,
            pending_mac: false,
            pending_stats: false,
            violations: 0,
            function_id,
        })
    }

    /// Physical address of the command queue page, programmed into the
    /// firmware's queue base cell at initialization.
    pub fn page_phys(&self) -> usize {
        self.ring.page_phys(0)
    }

    /// Current free-running queue producer.
    pub fn prod(&self) -> u16 {
        self.prod
    }

    /// Command credits currently available.
    pub fn credit(&self) -> u8 {
        self.credit
    }

    /// Protocol violations observed on the channel so far.
    pub fn violations(&self) -> u64 {
        self.violations
    }

    /// State of one connection.
    pub fn queue_state(&self, queue: usize) -> QueueState {
        self.queue_states
            .get(queue)
            .copied()
            .unwrap_or(QueueState::Closed)
    }

    /// State of the function.
    pub fn function_state(&self) -> FunctionState {
        self.function_state
    }

    /// Whether a station address update is awaiting its acknowledgement.
    pub fn mac_pending(&self) -> bool {
        self.pending_mac
    }

    /// Whether a statistics snapshot is awaiting its acknowledgement.
    pub fn stats_pending(&self) -> bool {
        self.pending_stats
    }

    // Writes one element and moves the producer, consuming a credit.
    fn post(&mut self, cid: u32, cmd: u8, conn_type: u8, data: u64) -> BxeResult<u16> {
        if self.credit == 0 {
            debug!("slowpath queue out of credit");
            return Err(BxeError::NoSpqCredit);
        }
        self.credit -= 1;

        let prod = self.prod;
        let function = self.function_id;
        self.ring
            .entry_mut(prod)
            .prepare(cid, cmd, conn_type, function, data);
        self.prod = self.ring.layout().advance(prod);

        debug!(
            "slowpath command {} posted on cid {}, prod {}",
            cmd, cid, self.prod
        );
        Ok(self.prod)
    }

    /// Posts a function start command.
    ///
    /// # Errors
    ///
    /// - [`BxeError::NotReady`] - The function is not in the closed state
    /// - [`BxeError::NoSpqCredit`] - No command credit is available
    pub fn begin_function_start(&mut self) -> BxeResult<u16> {
        if self.function_state != FunctionState::Closed {
            error!(
                "function start in state {:?}",
                self.function_state
            );
            return Err(BxeError::NotReady);
        }
        let prod = self.post(0, CommonRamrod::FunctionStart as u8, NONE_CONNECTION_TYPE, 0)?;
        self.function_state = FunctionState::Opening;
        Ok(prod)
    }

    /// Posts a function stop command.
    ///
    /// Every queue must be fully closed first.
    ///
    /// # Errors
    ///
    /// - [`BxeError::NotReady`] - The function is not open, or a queue still exists
    /// - [`BxeError::NoSpqCredit`] - No command credit is available
    pub fn begin_function_stop(&mut self) -> BxeResult<u16> {
        if self.function_state != FunctionState::Open {
            error!("function stop in state {:?}", self.function_state);
            return Err(BxeError::NotReady);
        }
        if self
            .queue_states
            .iter()
            .any(|state| *state != QueueState::Closed)
        {
            error!("function stop with queues still up");
            return Err(BxeError::NotReady);
        }
        let prod = self.post(0, CommonRamrod::FunctionStop as u8, NONE_CONNECTION_TYPE, 0)?;
        self.function_state = FunctionState::Closing;
        Ok(prod)
    }

    /// Posts a connection setup command for `queue`.
    ///
    /// `bd_page` is the physical address of the connection's first RX buffer
    /// descriptor page, handed to the firmware as the chain base.
    ///
    /// # Errors
    ///
    /// - [`BxeError::InvalidQueue`] - `queue` is out of range
    /// - [`BxeError::NotReady`] - The function is not open or the queue is not closed
    /// - [`BxeError::NoSpqCredit`] - No command credit is available
    pub fn begin_queue_open(&mut self, queue: usize, bd_page: u64) -> BxeResult<u16> {
        self.check_queue(queue)?;
        if self.function_state != FunctionState::Open {
            error!("queue setup before function start");
            return Err(BxeError::NotReady);
        }
        if self.queue_states[queue] != QueueState::Closed {
            error!(
                "queue {} setup in state {:?}",
                queue, self.queue_states[queue]
            );
            return Err(BxeError::NotReady);
        }
        let prod = self.post(
            queue as u32,
            EthRamrod::ClientSetup as u8,
            ETH_CONNECTION_TYPE,
            bd_page,
        )?;
        self.queue_states[queue] = QueueState::Opening;
        Ok(prod)
    }

    /// Posts a halt command for `queue`.
    ///
    /// # Errors
    ///
    /// - [`BxeError::InvalidQueue`] - `queue` is out of range
    /// - [`BxeError::NotReady`] - The queue is not open
    /// - [`BxeError::NoSpqCredit`] - No command credit is available
    pub fn begin_queue_halt(&mut self, queue: usize) -> BxeResult<u16> {
        self.check_queue(queue)?;
        if self.queue_states[queue] != QueueState::Open {
            error!(
                "queue {} halt in state {:?}",
                queue, self.queue_states[queue]
            );
            return Err(BxeError::NotReady);
        }
        let prod = self.post(queue as u32, EthRamrod::Halt as u8, ETH_CONNECTION_TYPE, 0)?;
        self.queue_states[queue] = QueueState::Halting;
        Ok(prod)
    }

    /// Posts a context release command for a halted `queue`.
    ///
    /// The release travels on the function-wide namespace but addresses the
    /// queue's cid; its completion closes the queue.
    ///
    /// # Errors
    ///
    /// - [`BxeError::InvalidQueue`] - `queue` is out of range
    /// - [`BxeError::NotReady`] - The queue is not halted
    /// - [`BxeError::NoSpqCredit`] - No command credit is available
    pub fn begin_queue_delete(&mut self, queue: usize) -> BxeResult<u16> {
        self.check_queue(queue)?;
        if self.queue_states[queue] != QueueState::Halted {
            error!(
                "queue {} delete in state {:?}",
                queue, self.queue_states[queue]
            );
            return Err(BxeError::NotReady);
        }
        self.post(queue as u32, CommonRamrod::CfcDel as u8, NONE_CONNECTION_TYPE, 0)
    }

    /// Posts a station address update.
    ///
    /// # Errors
    ///
    /// - [`BxeError::NotReady`] - The function is not open or an update is
    ///   already pending
    /// - [`BxeError::NoSpqCredit`] - No command credit is available
    pub fn begin_set_mac(&mut self, mac: [u8; 6]) -> BxeResult<u16> {
        if self.function_state != FunctionState::Open {
            error!("station address update before function start");
            return Err(BxeError::NotReady);
        }
        if self.pending_mac {
            debug!("station address update already pending");
            return Err(BxeError::NotReady);
        }
        let prod = self.post(
            0,
            EthRamrod::SetMac as u8,
            ETH_CONNECTION_TYPE,
            mac_to_data(mac),
        )?;
        self.pending_mac = true;
        Ok(prod)
    }

    /// Posts a statistics snapshot request.
    ///
    /// # Errors
    ///
    /// - [`BxeError::NotReady`] - The function is not open or a snapshot is
    ///   already pending
    /// - [`BxeError::NoSpqCredit`] - No command credit is available
    pub fn begin_stats_query(&mut self) -> BxeResult<u16> {
        if self.function_state != FunctionState::Open {
            error!("statistics query before function start");
            return Err(BxeError::NotReady);
        }
        if self.pending_stats {
            debug!("statistics query already pending");
            return Err(BxeError::NotReady);
        }
        let prod = self.post(0, CommonRamrod::StatQuery as u8, NONE_CONNECTION_TYPE, 0)?;
        self.pending_stats = true;
        Ok(prod)
    }

    /// Feeds one slowpath completion into the channel.
    ///
    /// Returns the credit unconditionally; the state machines only move when
    /// the completion matches a transition they are waiting for. Anything
    /// else is counted as a protocol violation and otherwise ignored.
    pub fn on_ramrod(&mut self, conn_type: u8, cid: u32, cmd: u8, failed: bool) {
        if self.credit == self.max_credit {
            error!("slowpath completion with no command outstanding");
            self.violations += 1;
        } else {
            self.credit += 1;
        }

        if failed {
            error!("slowpath command {} on cid {} failed", cmd, cid);
            self.violations += 1;
            return;
        }

        match conn_type {
            ETH_CONNECTION_TYPE => self.on_eth_ramrod(cid, cmd),
            NONE_CONNECTION_TYPE => self.on_common_ramrod(cid, cmd),
            other => {
                error!("slowpath completion with connection type {}", other);
                self.violations += 1;
            }
        }
    }

    fn on_eth_ramrod(&mut self, cid: u32, cmd: u8) {
        let cmd = match EthRamrod::try_from(cmd) {
            Ok(cmd) => cmd,
            Err(_) => {
                error!("unknown connection command {} on cid {}", cmd, cid);
                self.violations += 1;
                return;
            }
        };

        if cmd == EthRamrod::SetMac {
            if self.pending_mac {
                self.pending_mac = false;
                debug!("station address accepted");
            } else {
                error!("unsolicited station address acknowledgement");
                self.violations += 1;
            }
            return;
        }

        let queue = cid as usize;
        if queue >= self.queue_states.len() {
            error!("connection completion for unknown cid {}", cid);
            self.violations += 1;
            return;
        }

        let state = self.queue_states[queue];
        let next = match (cmd, state) {
            (EthRamrod::ClientSetup, QueueState::Opening) => QueueState::Open,
            (EthRamrod::Halt, QueueState::Halting) => QueueState::Halted,
            _ => {
                error!(
                    "unexpected {:?} completion in state {:?} on queue {}",
                    cmd, state, queue
                );
                self.violations += 1;
                return;
            }
        };
        debug!("queue {}: {:?} -> {:?}", queue, state, next);
        self.queue_states[queue] = next;
    }

    fn on_common_ramrod(&mut self, cid: u32, cmd: u8) {
        let cmd = match CommonRamrod::try_from(cmd) {
            Ok(cmd) => cmd,
            Err(_) => {
                error!("unknown function command {}", cmd);
                self.violations += 1;
                return;
            }
        };

        match cmd {
            CommonRamrod::FunctionStart => {
                if self.function_state == FunctionState::Opening {
                    debug!("function started");
                    self.function_state = FunctionState::Open;
                } else {
                    error!(
                        "function start completion in state {:?}",
                        self.function_state
                    );
                    self.violations += 1;
                }
            }
            CommonRamrod::FunctionStop => {
                if self.function_state == FunctionState::Closing {
                    debug!("function stopped");
                    self.function_state = FunctionState::Closed;
                } else {
                    error!(
                        "function stop completion in state {:?}",
                        self.function_state
                    );
                    self.violations += 1;
                }
            }
            CommonRamrod::CfcDel => {
                let queue = cid as usize;
                if queue >= self.queue_states.len() {
                    error!("context release for unknown cid {}", cid);
                    self.violations += 1;
                    return;
                }
                if self.queue_states[queue] == QueueState::Halted {
                    debug!("queue {}: Halted -> Closed", queue);
                    self.queue_states[queue] = QueueState::Closed;
                } else {
                    error!(
                        "context release in state {:?} on queue {}",
                        self.queue_states[queue], queue
                    );
                    self.violations += 1;
                }
            }
            CommonRamrod::StatQuery => {
                if self.pending_stats {
                    self.pending_stats = false;
                } else {
                    error!("unsolicited statistics acknowledgement");
                    self.violations += 1;
                }
            }
        }
    }

    fn check_queue(&self, queue: usize) -> BxeResult {
        if queue >= self.queue_states.len() {
            error!("queue {} out of range", queue);
            return Err(BxeError::InvalidQueue);
        }
        Ok(())
    }
}

// The station address travels in the element payload, first octet in the
// least significant byte.
fn mac_to_data(mac: [u8; 6]) -> u64 {
    let mut data = 0u64;
    for (i, byte) in mac.iter().enumerate() {
        data |= (*byte as u64) << (8 * i);
    }
    data
}
