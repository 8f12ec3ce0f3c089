//! Per-peer node record and the fixed-size node table.

use heapless::Vec;

use super::config::Config;
use super::header::Header;

/// Upper bound on `Config::max_nodes`; backs the node table's static
/// storage. Implementations may lower `max_nodes` at runtime but the wire
/// format and this storage cap stay fixed.
pub const MAX_NODES: usize = 32;

/// Upper bound on `Config::max_payload`.
pub const MAX_PAYLOAD: usize = 128;

/// Per-peer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unregistered,
    Registered,
    SendPending,
    WaitAck,
}

/// One node-table slot.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub uuid: u64,
    pub addr: u8,
    pub state: NodeState,
    pub sleepy: bool,
    pub heartbeat_exp: u8,
    pub last_heard: u32,
    pub rssi: i8,

    pub(crate) pending_header: Option<Header>,
    pub(crate) pending: Vec<u8, MAX_PAYLOAD>,
    pub(crate) pending_cb: Option<super::SendCallback>,
    pub(crate) retries: u8,
    pub(crate) ack_timer: Option<u32>,
    pub(crate) validity_timer: Option<u32>,
}

impl NodeRecord {
    pub(crate) fn empty(addr: u8) -> Self {
        Self {
            uuid: 0,
            addr,
            state: NodeState::Unregistered,
            sleepy: false,
            heartbeat_exp: 0,
            last_heard: 0,
            rssi: 0,
            pending_header: None,
            pending: Vec::new(),
            pending_cb: None,
            retries: 0,
            ack_timer: None,
            validity_timer: None,
        }
    }

    /// Take and fire the pending send callback, if any - asynchronous
    /// completion of a deferred or acked send.
    pub(crate) fn fire_pending_cb(&mut self, success: bool) {
        if let Some(cb) = self.pending_cb.take() {
            cb(self.addr, success);
        }
    }

    /// `true` iff a packet is queued or awaiting ack for this peer.
    pub fn has_pending(&self) -> bool {
        matches!(self.state, NodeState::SendPending | NodeState::WaitAck)
    }

    pub(crate) fn heartbeat_period_ticks(&self, tick_ms: u32) -> u32 {
        let period_s = 1u32 << self.heartbeat_exp;
        (period_s * 1000) / tick_ms
    }

    pub(crate) fn reset_to_unregistered(&mut self) {
        self.fire_pending_cb(false);
        self.uuid = 0;
        self.state = NodeState::Unregistered;
        self.pending_header = None;
        self.pending.clear();
        self.retries = 0;
        self.ack_timer = None;
        self.validity_timer = None;
    }
}

/// Fixed-size table of peers, as held by a coordinator.
///
/// Slots are pre-populated at construction with sequential addresses
/// `1..=max_nodes`, `uuid=0`, `state=Unregistered`.
#[derive(Debug)]
pub struct NodeTable {
    slots: Vec<NodeRecord, MAX_NODES>,
}

impl NodeTable {
    pub fn new(config: &Config) -> Self {
        let n = config.max_nodes.min(MAX_NODES);
        let mut slots = Vec::new();
        for i in 0..n {
            let _ = slots.push(NodeRecord::empty((i + 1) as u8));
        }
        Self { slots }
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        self.slots.iter()
    }

    pub fn by_addr(&self, addr: u8) -> Option<&NodeRecord> {
        self.slots.iter().find(|n| n.addr == addr)
    }

    pub fn by_addr_mut(&mut self, addr: u8) -> Option<&mut NodeRecord> {
        self.slots.iter_mut().find(|n| n.addr == addr)
    }

    /// Find the slot for `uuid`, reusing an existing slot if present,
    /// otherwise preferring a never-used (`uuid==0`) slot, falling back to
    /// any `Unregistered` slot. Returns `None` if the table is full.
    pub fn find_for_registration(&mut self, uuid: u64) -> Option<&mut NodeRecord> {
        if self.slots.iter().any(|n| n.uuid == uuid && n.uuid != 0) {
            return self.slots.iter_mut().find(|n| n.uuid == uuid);
        }
        if let Some(idx) = self.slots.iter().position(|n| n.uuid == 0) {
            return Some(&mut self.slots[idx]);
        }
        if let Some(idx) = self
            .slots
            .iter()
            .position(|n| n.state == NodeState::Unregistered)
        {
            return Some(&mut self.slots[idx]);
        }
        None
    }

    pub fn pending_addrs(&self) -> impl Iterator<Item = u8> + '_ {
        self.slots
            .iter()
            .filter(|n| n.state == NodeState::SendPending)
            .map(|n| n.addr)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_preassigns_addresses() {
        let mut cfg = Config::default();
        cfg.max_nodes = 4;
        let table = NodeTable::new(&cfg);
        let addrs: heapless::Vec<u8, 4> = table.iter().map(|n| n.addr).collect();
        assert_eq!(addrs.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn find_for_registration_prefers_unused_slot() {
        let mut cfg = Config::default();
        cfg.max_nodes = 2;
        let mut table = NodeTable::new(&cfg);
        let slot = table.find_for_registration(0xAA).unwrap();
        assert_eq!(slot.addr, 1);
        slot.uuid = 0xAA;
        slot.state = NodeState::Registered;

        let slot2 = table.find_for_registration(0xAA).unwrap();
        assert_eq!(slot2.addr, 1);

        let slot3 = table.find_for_registration(0xBB).unwrap();
        assert_eq!(slot3.addr, 2);
    }

    #[test]
    fn find_for_registration_full_table() {
        let mut cfg = Config::default();
        cfg.max_nodes = 1;
        let mut table = NodeTable::new(&cfg);
        table.find_for_registration(0xAA).unwrap().uuid = 0xAA;
        table.by_addr_mut(1).unwrap().state = NodeState::Registered;
        assert!(table.find_for_registration(0xBB).is_none());
    }
}
