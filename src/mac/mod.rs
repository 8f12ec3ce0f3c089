//! TinyMAC: a star-topology low-power MAC.
//!
//! A single [`Mac`] type plays either role, selected at construction time by
//! [`Mac::coordinator`] or [`Mac::client`] - [`Role`] is a tagged variant
//! rather than a boolean-plus-dead-fields layout so a coordinator context
//! never carries client-only fields and vice versa.

pub mod config;
pub mod error;
pub mod header;
pub mod node;
pub mod wire;

use log::{debug, error, trace, warn};

use crate::clock::Clock;
use crate::phy::{Phy, SendFlags};

pub use config::Config;
pub use error::MacError;
pub use header::{FrameType, Header, ADDR_BROADCAST, ADDR_COORDINATOR, ADDR_UNASSIGNED, NETWORK_ANY};
pub use node::{NodeRecord, NodeState, NodeTable, MAX_PAYLOAD};
pub use wire::{Beacon, DeregistrationRequest, RegStatus, RegistrationRequest, RegistrationResponse};

/// Invoked when an application send completes or fails.
pub type SendCallback = fn(dest: u8, success: bool);

/// Invoked on the coordinator when a peer attaches or its registration is
/// refreshed.
pub type RegCallback = fn(uuid: u64, addr: u8);

/// Invoked on the coordinator when a peer is deregistered, explicitly or by
/// heartbeat/retry expiry.
pub type DeregCallback = fn(uuid: u64, addr: u8, reason: u8);

/// Client-side state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unregistered,
    BeaconRequest,
    Registering,
    Registered,
}

struct ClientCtx {
    uuid: u64,
    sleepy: bool,
    heartbeat_exp: u8,
    state: ClientState,
    net_id: u8,
    addr: u8,
    coord_addr: u8,
    /// Absolute tick at which the current `BeaconRequest`/`Registering`
    /// timeout fires.
    timeout: Option<u32>,
}

struct CoordinatorCtx {
    net_id: u8,
    uuid: u64,
    permit_attach: bool,
    slot: u16,
    nodes: NodeTable,
    reg_cb: Option<RegCallback>,
    dereg_cb: Option<DeregCallback>,
}

enum Role {
    Coordinator(CoordinatorCtx),
    Client(ClientCtx),
}

/// TinyMAC context. Generic over the PHY transport and the tick source - an
/// explicit context handle rather than a global singleton.
pub struct Mac<P, C> {
    phy: P,
    clock: C,
    config: Config,
    role: Role,
    tx_seq: u8,
}

fn encode_and_send<P: Phy>(
    phy: &mut P,
    header: &Header,
    payload: &[u8],
) -> Result<(), MacError<P::Error>> {
    let mut hbuf = [0u8; header::HEADER_LEN];
    header.encode(&mut hbuf);
    phy.send(&[&hbuf, payload], SendFlags::empty())
        .map_err(MacError::Phy)
}

/// A frame is addressable to us iff:
fn accepts(self_net: u8, self_addr: u8, registered: bool, h: &Header) -> bool {
    let to_self = h.dest_addr == self_addr || h.dest_addr == ADDR_BROADCAST;
    if h.net_id == self_net && to_self {
        return true;
    }
    if h.net_id == NETWORK_ANY && h.dest_addr == ADDR_BROADCAST {
        return true;
    }
    if !registered && h.dest_addr == ADDR_BROADCAST {
        return true;
    }
    false
}

impl<P, C> Mac<P, C>
where
    P: Phy,
    C: Clock,
{
    /// Construct a coordinator with network id `net_id` and hardware `uuid`.
    pub fn coordinator(phy: P, clock: C, config: Config, net_id: u8, uuid: u64) -> Self {
        let nodes = NodeTable::new(&config);
        Self {
            phy,
            clock,
            config,
            role: Role::Coordinator(CoordinatorCtx {
                net_id,
                uuid,
                permit_attach: true,
                slot: 0,
                nodes,
                reg_cb: None,
                dereg_cb: None,
            }),
            tx_seq: 0,
        }
    }

    /// Construct a client (non-coordinator) node with hardware `uuid`.
    pub fn client(phy: P, clock: C, config: Config, uuid: u64, sleepy: bool, heartbeat_exp: u8) -> Self {
        Self {
            phy,
            clock,
            config,
            role: Role::Client(ClientCtx {
                uuid,
                sleepy,
                heartbeat_exp,
                state: ClientState::Unregistered,
                net_id: NETWORK_ANY,
                addr: ADDR_UNASSIGNED,
                coord_addr: ADDR_UNASSIGNED,
                timeout: None,
            }),
            tx_seq: 0,
        }
    }

    /// Coordinator-only: toggle whether beacons advertise PERMIT_ATTACH.
    pub fn set_permit_attach(&mut self, v: bool) {
        if let Role::Coordinator(ctx) = &mut self.role {
            ctx.permit_attach = v;
        }
    }

    /// Coordinator-only: install the attach/detach introspection callbacks.
    pub fn set_callbacks(&mut self, reg_cb: Option<RegCallback>, dereg_cb: Option<DeregCallback>) {
        if let Role::Coordinator(ctx) = &mut self.role {
            ctx.reg_cb = reg_cb;
            ctx.dereg_cb = dereg_cb;
        }
    }

    /// Coordinator-only: iterate the node table.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        match &self.role {
            Role::Coordinator(ctx) => Either::Left(ctx.nodes.iter()),
            Role::Client(_) => Either::Right(core::iter::empty()),
        }
    }

    /// Client-only: current state machine position.
    pub fn state(&self) -> Option<ClientState> {
        match &self.role {
            Role::Client(ctx) => Some(ctx.state),
            Role::Coordinator(_) => None,
        }
    }

    /// Client-only: own assigned short address, if registered.
    pub fn addr(&self) -> Option<u8> {
        match &self.role {
            Role::Client(ctx) if ctx.state == ClientState::Registered => Some(ctx.addr),
            _ => None,
        }
    }

    fn next_seq(&mut self) -> u8 {
        let s = self.tx_seq;
        self.tx_seq = self.tx_seq.wrapping_add(1);
        s
    }

    /// Drive the scheduler. Must be called at a fixed period
    /// (`config.tick_ms`, 250 ms by default).
    pub fn tick(&mut self) -> Result<(), MacError<P::Error>> {
        let now = self.clock.now();
        match &mut self.role {
            Role::Coordinator(ctx) => tick_coordinator(&mut self.phy, ctx, &self.config, now)?,
            Role::Client(ctx) => tick_client(&mut self.phy, ctx, &self.config, now)?,
        }
        Ok(())
    }

    /// Feed a received frame (header + payload already stripped of any PHY
    /// framing) into the MAC. `rssi` is recorded on the originating node
    /// record when known.
    pub fn on_receive(&mut self, buf: &[u8], rssi: i8) -> Result<(), MacError<P::Error>> {
        let header = match Header::decode::<P::Error>(buf) {
            Ok(h) => h,
            Err(_) => {
                warn!("dropping malformed frame ({} bytes)", buf.len());
                return Ok(());
            }
        };
        let payload = &buf[header::HEADER_LEN..];
        let now = self.clock.now();

        match &mut self.role {
            Role::Coordinator(ctx) => {
                receive_coordinator(&mut self.phy, ctx, &self.config, &header, payload, rssi, now)
            }
            Role::Client(ctx) => {
                receive_client(&mut self.phy, ctx, &self.config, &header, payload, now)
            }
        }
    }

    /// Deliver `payload` to `dest`. `validity_ticks` bounds how long the
    /// coordinator will hold the packet for a sleepy peer (`None` defaults
    /// to `2^heartbeat_exp` seconds). Coordinator
    /// role only; clients always talk to their single coordinator slot via
    /// [`Mac::deregister`] and the beacon/poll cycle.
    pub fn send(
        &mut self,
        dest: u8,
        payload: &[u8],
        validity_ticks: Option<u32>,
        ack_request: bool,
        cb: Option<SendCallback>,
    ) -> Result<(), MacError<P::Error>> {
        if payload.len() > self.config.max_payload || payload.len() > self.phy.mtu() {
            return Err(MacError::BufferFull);
        }
        let seq = self.next_seq();
        let now = self.clock.now();
        let tick_ms = self.config.tick_ms;
        match &mut self.role {
            Role::Coordinator(ctx) => send_from_coordinator(
                &mut self.phy,
                ctx,
                &self.config,
                dest,
                payload,
                seq,
                validity_ticks,
                ack_request,
                cb,
                now,
                tick_ms,
            ),
            Role::Client(_) => Err(MacError::WrongState),
        }
    }

    /// Client-only: gracefully leave the network.
    pub fn deregister(&mut self, reason: u8) -> Result<(), MacError<P::Error>> {
        match &mut self.role {
            Role::Client(ctx) => {
                if ctx.state != ClientState::Registered {
                    return Err(MacError::WrongState);
                }
                let seq = self.tx_seq;
                self.tx_seq = self.tx_seq.wrapping_add(1);
                let h = Header::new(
                    FrameType::DeregistrationRequest,
                    ctx.net_id,
                    ctx.coord_addr,
                    ctx.addr,
                    seq,
                );
                let body = DeregistrationRequest {
                    uuid: ctx.uuid,
                    reason,
                };
                let mut buf = [0u8; DeregistrationRequest::LEN];
                body.encode(&mut buf);
                encode_and_send(&mut self.phy, &h, &buf)?;
                ctx.state = ClientState::Unregistered;
                ctx.addr = ADDR_UNASSIGNED;
                ctx.net_id = NETWORK_ANY;
                ctx.timeout = None;
                Ok(())
            }
            Role::Coordinator(_) => Err(MacError::WrongState),
        }
    }
}

// Small `Either`-of-iterators helper so `Mac::nodes` can return one static
// type regardless of role, without heap allocation.
enum Either<L, R> {
    Left(L),
    Right(R),
}

impl<L, R, T> Iterator for Either<L, R>
where
    L: Iterator<Item = T>,
    R: Iterator<Item = T>,
{
    type Item = T;
    fn next(&mut self) -> Option<T> {
        match self {
            Either::Left(l) => l.next(),
            Either::Right(r) => r.next(),
        }
    }
}

// ---------------------------------------------------------------------
// Coordinator role
// ---------------------------------------------------------------------

fn tick_coordinator<P: Phy>(
    phy: &mut P,
    ctx: &mut CoordinatorCtx,
    config: &Config,
    now: u32,
) -> Result<(), MacError<P::Error>> {
    ctx.slot = ctx.slot.wrapping_add(1);
    let period = 1u16 << config.beacon_interval;
    if ctx.slot % period == config.beacon_offset % period {
        emit_beacon(phy, ctx, config, true)?;
    }

    for node in ctx.nodes.iter_addrs() {
        check_node_timers(phy, ctx, config, node, now)?;
    }
    Ok(())
}

/// Node addresses are collected first so the mutable pass below doesn't
/// need to hold a borrow of `ctx.nodes` across the callback invocations.
impl NodeTable {
    fn iter_addrs(&self) -> heapless::Vec<u8, { node::MAX_NODES }> {
        self.iter().map(|n| n.addr).collect()
    }
}

fn check_node_timers<P: Phy>(
    phy: &mut P,
    ctx: &mut CoordinatorCtx,
    config: &Config,
    addr: u8,
    now: u32,
) -> Result<(), MacError<P::Error>> {
    let (fire_ack, fire_validity, fire_heartbeat, uuid_for_cb) = {
        let node = match ctx.nodes.by_addr(addr) {
            Some(n) => n,
            None => return Ok(()),
        };
        let heartbeat_expiry = node.last_heard
            + node.heartbeat_period_ticks(config.tick_ms)
            + config.heartbeat_grace_ticks;
        (
            matches!(node.state, NodeState::WaitAck) && node.ack_timer.map_or(false, |t| now >= t),
            matches!(node.state, NodeState::SendPending)
                && node.validity_timer.map_or(false, |t| now >= t),
            node.state == NodeState::Registered && now >= heartbeat_expiry,
            node.uuid,
        )
    };

    if fire_ack {
        ack_timeout(phy, ctx, config, addr, now)?;
    }
    if fire_validity {
        validity_timeout(ctx, addr);
    }
    if fire_heartbeat {
        debug!("peer {:#04x} heartbeat expired, deregistering", addr);
        deregister_peer(ctx, addr, 0xFF);
        if let Some(cb) = ctx.dereg_cb {
            cb(uuid_for_cb, addr, 0xFF);
        }
    }
    Ok(())
}

fn ack_timeout<P: Phy>(
    phy: &mut P,
    ctx: &mut CoordinatorCtx,
    config: &Config,
    addr: u8,
    now: u32,
) -> Result<(), MacError<P::Error>> {
    let sleepy = ctx.nodes.by_addr(addr).map_or(false, |n| n.sleepy);
    if sleepy {
        if let Some(node) = ctx.nodes.by_addr_mut(addr) {
            node.state = NodeState::SendPending;
            node.ack_timer = None;
        }
        return Ok(());
    }

    let exhausted = {
        let node = ctx.nodes.by_addr_mut(addr).unwrap();
        if node.retries == 0 {
            true
        } else {
            node.retries -= 1;
            node.ack_timer = Some(now + config.ack_timeout_ticks);
            false
        }
    };

    if exhausted {
        let uuid = ctx.nodes.by_addr(addr).map(|n| n.uuid).unwrap_or(0);
        error!("ack retries exhausted for peer {:#04x}", addr);
        deregister_peer(ctx, addr, 0xFF);
        if let Some(cb) = ctx.dereg_cb {
            cb(uuid, addr, 0xFF);
        }
    } else {
        let node = ctx.nodes.by_addr(addr).unwrap();
        let header = node.pending_header.unwrap();
        let payload: heapless::Vec<u8, { node::MAX_PAYLOAD }> =
            node.pending.iter().copied().collect();
        encode_and_send(phy, &header, &payload)?;
    }
    Ok(())
}

fn validity_timeout(ctx: &mut CoordinatorCtx, addr: u8) {
    if let Some(node) = ctx.nodes.by_addr_mut(addr) {
        warn!("validity timer expired for peer {:#04x}, dropping pending send", addr);
        node.fire_pending_cb(false);
        node.state = NodeState::Registered;
        node.pending_header = None;
        node.pending.clear();
        node.validity_timer = None;
    }
}

fn deregister_peer(ctx: &mut CoordinatorCtx, addr: u8, _reason: u8) {
    if let Some(node) = ctx.nodes.by_addr_mut(addr) {
        node.reset_to_unregistered();
    }
}

fn emit_beacon<P: Phy>(
    phy: &mut P,
    ctx: &mut CoordinatorCtx,
    config: &Config,
    sync: bool,
) -> Result<(), MacError<P::Error>> {
    let pending: heapless::Vec<u8, { node::MAX_NODES }> = ctx.nodes.pending_addrs().collect();
    let b = Beacon {
        uuid: ctx.uuid,
        timestamp: ctx.slot,
        sync,
        permit_attach: ctx.permit_attach,
        beacon_interval: config.beacon_interval,
        address_list: &pending,
    };
    let mut payload = [0u8; 12 + node::MAX_NODES];
    let n = b.encode(&mut payload);
    let h = Header::new(
        FrameType::Beacon,
        ctx.net_id,
        ADDR_BROADCAST,
        ADDR_COORDINATOR,
        0,
    );
    encode_and_send(phy, &h, &payload[..n])
}

fn receive_coordinator<P: Phy>(
    phy: &mut P,
    ctx: &mut CoordinatorCtx,
    config: &Config,
    h: &Header,
    payload: &[u8],
    rssi: i8,
    now: u32,
) -> Result<(), MacError<P::Error>> {
    if h.src_addr == ADDR_COORDINATOR {
        return Ok(());
    }
    // A coordinator is never "unregistered" - rule (c) of `accepts` must
    // never fire for it, or it would accept foreign-net broadcasts from
    // any source that hasn't yet joined this network.
    if !accepts(ctx.net_id, ADDR_COORDINATOR, true, h) {
        return Ok(());
    }

    match h.frame_type {
        FrameType::BeaconRequest => {
            emit_beacon(phy, ctx, config, false)?;
        }
        FrameType::RegistrationRequest => {
            let req = match RegistrationRequest::decode::<P::Error>(payload) {
                Ok(req) => req,
                Err(_) => {
                    warn!("dropping malformed registration request");
                    return Ok(());
                }
            };
            handle_registration(phy, ctx, &req, now)?;
        }
        FrameType::DeregistrationRequest => {
            let req = match DeregistrationRequest::decode::<P::Error>(payload) {
                Ok(req) => req,
                Err(_) => {
                    warn!("dropping malformed deregistration request");
                    return Ok(());
                }
            };
            if ctx.nodes.by_addr(h.src_addr).map_or(false, |n| n.uuid == req.uuid) {
                let resp = RegistrationResponse::new(req.uuid, ADDR_BROADCAST, RegStatus::Success);
                let mut buf = [0u8; RegistrationResponse::LEN];
                resp.encode(&mut buf);
                let rh = Header::new(
                    FrameType::RegistrationResponse,
                    ctx.net_id,
                    h.src_addr,
                    ADDR_COORDINATOR,
                    0,
                );
                encode_and_send(phy, &rh, &buf)?;
                let addr = h.src_addr;
                deregister_peer(ctx, addr, req.reason);
                if let Some(cb) = ctx.dereg_cb {
                    cb(req.uuid, addr, req.reason);
                }
            }
        }
        FrameType::Poll | FrameType::Data | FrameType::Ack => {
            if !is_registered_source(ctx, h) {
                force_reregistration(phy, ctx, h)?;
                return Ok(());
            }
            handle_peer_frame(phy, ctx, config, h, rssi, now)?;
        }
        _ => {
            trace!("coordinator ignoring frame type {:?} from {:#04x}", h.frame_type, h.src_addr);
        }
    }
    Ok(())
}

fn is_registered_source(ctx: &CoordinatorCtx, h: &Header) -> bool {
    ctx.nodes
        .by_addr(h.src_addr)
        .map_or(false, |n| n.state != NodeState::Unregistered)
}

fn force_reregistration<P: Phy>(
    phy: &mut P,
    ctx: &CoordinatorCtx,
    h: &Header,
) -> Result<(), MacError<P::Error>> {
    warn!("unregistered source {:#04x}, forcing re-registration", h.src_addr);
    let resp = RegistrationResponse::new(0, ADDR_BROADCAST, RegStatus::AddressInvalid);
    let mut buf = [0u8; RegistrationResponse::LEN];
    resp.encode(&mut buf);
    let rh = Header::new(
        FrameType::RegistrationResponse,
        ctx.net_id,
        h.src_addr,
        ADDR_COORDINATOR,
        0,
    );
    encode_and_send(phy, &rh, &buf)
}

fn handle_registration<P: Phy>(
    phy: &mut P,
    ctx: &mut CoordinatorCtx,
    req: &RegistrationRequest,
    now: u32,
) -> Result<(), MacError<P::Error>> {
    let net_id = ctx.net_id;
    match ctx.nodes.find_for_registration(req.uuid) {
        Some(node) => {
            node.uuid = req.uuid;
            node.sleepy = req.sleepy;
            node.heartbeat_exp = req.heartbeat_exp;
            node.last_heard = now;
            node.state = NodeState::Registered;
            let addr = node.addr;
            debug!("peer {:#018x} registered as {:#04x}", req.uuid, addr);
            let resp = RegistrationResponse::new(req.uuid, addr, RegStatus::Success);
            let mut buf = [0u8; RegistrationResponse::LEN];
            resp.encode(&mut buf);
            let h = Header::new(
                FrameType::RegistrationResponse,
                net_id,
                ADDR_BROADCAST,
                ADDR_COORDINATOR,
                0,
            );
            encode_and_send(phy, &h, &buf)?;
            if let Some(cb) = ctx.reg_cb {
                cb(req.uuid, addr);
            }
        }
        None => {
            warn!("node table full, rejecting {:#018x}", req.uuid);
            let resp = RegistrationResponse::new(req.uuid, ADDR_BROADCAST, RegStatus::NetworkFull);
            let mut buf = [0u8; RegistrationResponse::LEN];
            resp.encode(&mut buf);
            let h = Header::new(
                FrameType::RegistrationResponse,
                net_id,
                ADDR_BROADCAST,
                ADDR_COORDINATOR,
                0,
            );
            encode_and_send(phy, &h, &buf)?;
        }
    }
    Ok(())
}

fn handle_peer_frame<P: Phy>(
    phy: &mut P,
    ctx: &mut CoordinatorCtx,
    config: &Config,
    h: &Header,
    rssi: i8,
    now: u32,
) -> Result<(), MacError<P::Error>> {
    if let Some(node) = ctx.nodes.by_addr_mut(h.src_addr) {
        node.last_heard = now;
        node.rssi = rssi;
    }

    match h.frame_type {
        FrameType::Ack => {
            validate_ack(ctx, h);
        }
        FrameType::Poll | FrameType::Data => {
            if h.ack_request || h.frame_type == FrameType::Poll {
                send_ack_then_pending(phy, ctx, config, h.src_addr, h.seq, now)?;
            } else {
                let pending = ctx.nodes.by_addr(h.src_addr).map_or(false, |n| n.state == NodeState::SendPending);
                if pending {
                    send_pending_now(phy, ctx, config, h.src_addr, now)?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_ack(ctx: &mut CoordinatorCtx, h: &Header) {
    let matches = ctx.nodes.by_addr(h.src_addr).map_or(false, |n| {
        n.state == NodeState::WaitAck && n.pending_header.map_or(false, |ph| ph.seq == h.seq)
    });
    if !matches {
        warn!("ack mismatch from {:#04x}", h.src_addr);
        return;
    }
    if let Some(node) = ctx.nodes.by_addr_mut(h.src_addr) {
        node.fire_pending_cb(true);
        node.state = NodeState::Registered;
        node.ack_timer = None;
        node.validity_timer = None;
        node.pending_header = None;
        node.pending.clear();
    }
}

fn send_ack_then_pending<P: Phy>(
    phy: &mut P,
    ctx: &mut CoordinatorCtx,
    config: &Config,
    addr: u8,
    seq: u8,
    now: u32,
) -> Result<(), MacError<P::Error>> {
    let net_id = ctx.net_id;
    let pending = ctx.nodes.by_addr(addr).map_or(false, |n| n.state == NodeState::SendPending);
    let ack = Header::new(FrameType::Ack, net_id, addr, ADDR_COORDINATOR, seq).with_data_pending(pending);
    encode_and_send(phy, &ack, &[])?;
    if pending {
        send_pending_now(phy, ctx, config, addr, now)?;
    }
    Ok(())
}

fn send_pending_now<P: Phy>(
    phy: &mut P,
    ctx: &mut CoordinatorCtx,
    config: &Config,
    addr: u8,
    now: u32,
) -> Result<(), MacError<P::Error>> {
    let (header, needs_ack) = {
        let node = match ctx.nodes.by_addr(addr) {
            Some(n) => n,
            None => return Ok(()),
        };
        match node.pending_header {
            Some(h) => (h, h.ack_request),
            None => return Ok(()),
        }
    };
    let payload: heapless::Vec<u8, { node::MAX_PAYLOAD }> = ctx
        .nodes
        .by_addr(addr)
        .map(|n| n.pending.iter().copied().collect())
        .unwrap_or_default();
    encode_and_send(phy, &header, &payload)?;
    if let Some(node) = ctx.nodes.by_addr_mut(addr) {
        if needs_ack {
            node.state = NodeState::WaitAck;
            node.ack_timer = Some(now + config.ack_timeout_ticks);
        } else {
            node.state = NodeState::Registered;
            node.pending_header = None;
            node.pending.clear();
            node.fire_pending_cb(true);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn send_from_coordinator<P: Phy>(
    phy: &mut P,
    ctx: &mut CoordinatorCtx,
    config: &Config,
    dest: u8,
    payload: &[u8],
    seq: u8,
    validity_ticks: Option<u32>,
    ack_request: bool,
    cb: Option<SendCallback>,
    now: u32,
    tick_ms: u32,
) -> Result<(), MacError<P::Error>> {
    let net_id = ctx.net_id;
    let node = ctx.nodes.by_addr_mut(dest).ok_or(MacError::PeerUnknown)?;
    if node.state != NodeState::Registered {
        return Err(MacError::PeerBusy);
    }

    let mut header = Header::new(FrameType::Data, net_id, dest, ADDR_COORDINATOR, seq);
    if ack_request {
        header = header.with_ack_request(true);
    }

    if node.sleepy || ack_request {
        node.pending_header = Some(header);
        node.pending.clear();
        let _ = node.pending.extend_from_slice(payload);
        node.pending_cb = cb;
        node.retries = config.max_retries;
    }

    if node.sleepy {
        node.state = NodeState::SendPending;
        let validity = validity_ticks.unwrap_or_else(|| node.heartbeat_period_ticks(tick_ms));
        node.validity_timer = Some(now + validity);
        return Ok(());
    }

    encode_and_send(phy, &header, payload)?;
    let node = ctx.nodes.by_addr_mut(dest).unwrap();
    if ack_request {
        node.state = NodeState::WaitAck;
        node.ack_timer = Some(now + config.ack_timeout_ticks);
    } else if let Some(cb) = cb {
        cb(dest, true);
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Client role
// ---------------------------------------------------------------------

fn tick_client<P: Phy>(
    phy: &mut P,
    ctx: &mut ClientCtx,
    config: &Config,
    now: u32,
) -> Result<(), MacError<P::Error>> {
    match ctx.state {
        ClientState::Unregistered => {
            send_beacon_request(phy, ctx, config, now)?;
        }
        ClientState::BeaconRequest | ClientState::Registering => {
            if ctx.timeout.map_or(false, |t| now >= t) {
                debug!("client timed out, returning to Unregistered");
                ctx.state = ClientState::Unregistered;
                ctx.timeout = None;
                ctx.addr = ADDR_UNASSIGNED;
                ctx.net_id = NETWORK_ANY;
            }
        }
        ClientState::Registered => {}
    }
    Ok(())
}

fn send_beacon_request<P: Phy>(
    phy: &mut P,
    ctx: &mut ClientCtx,
    config: &Config,
    now: u32,
) -> Result<(), MacError<P::Error>> {
    let h = Header::new(FrameType::BeaconRequest, NETWORK_ANY, ADDR_BROADCAST, ADDR_UNASSIGNED, 0);
    encode_and_send(phy, &h, &[])?;
    ctx.state = ClientState::BeaconRequest;
    ctx.timeout = Some(now + config.beacon_request_timeout_ticks);
    Ok(())
}

fn receive_client<P: Phy>(
    phy: &mut P,
    ctx: &mut ClientCtx,
    config: &Config,
    h: &Header,
    payload: &[u8],
    now: u32,
) -> Result<(), MacError<P::Error>> {
    if ctx.state == ClientState::Registered && h.src_addr == ctx.addr {
        return Ok(());
    }
    let registered = ctx.state == ClientState::Registered;
    if !accepts(ctx.net_id, ctx.addr, registered, h) {
        return Ok(());
    }

    match h.frame_type {
        FrameType::Beacon => {
            handle_beacon(phy, ctx, config, h, payload, now)?;
        }
        FrameType::RegistrationResponse => {
            handle_registration_response(phy, ctx, h, payload)?;
        }
        _ => {
            trace!("client ignoring frame type {:?}", h.frame_type);
        }
    }
    Ok(())
}

fn handle_beacon<P: Phy>(
    phy: &mut P,
    ctx: &mut ClientCtx,
    config: &Config,
    h: &Header,
    payload: &[u8],
    now: u32,
) -> Result<(), MacError<P::Error>> {
    let beacon = match Beacon::decode::<P::Error>(payload) {
        Ok(b) => b,
        Err(_) => {
            warn!("dropping malformed beacon");
            return Ok(());
        }
    };

    if (ctx.state == ClientState::Unregistered || ctx.state == ClientState::BeaconRequest)
        && beacon.permit_attach
    {
        ctx.net_id = h.net_id;
        ctx.coord_addr = h.src_addr;
        let req = RegistrationRequest::new(ctx.uuid, ctx.sleepy, ctx.heartbeat_exp);
        let mut buf = [0u8; RegistrationRequest::LEN];
        req.encode(&mut buf);
        let rh = Header::new(
            FrameType::RegistrationRequest,
            ctx.net_id,
            ctx.coord_addr,
            ADDR_UNASSIGNED,
            0,
        );
        encode_and_send(phy, &rh, &buf)?;
        ctx.state = ClientState::Registering;
        ctx.timeout = Some(now + config.registration_timeout_ticks);
        return Ok(());
    }

    if ctx.state == ClientState::Registered && beacon.address_list.contains(&ctx.addr) {
        let poll = Header::new(FrameType::Poll, ctx.net_id, ctx.coord_addr, ctx.addr, 0);
        encode_and_send(phy, &poll, &[])?;
    }
    Ok(())
}

fn handle_registration_response<P: Phy>(
    _phy: &mut P,
    ctx: &mut ClientCtx,
    h: &Header,
    payload: &[u8],
) -> Result<(), MacError<P::Error>> {
    let resp = match RegistrationResponse::decode::<P::Error>(payload) {
        Ok(r) => r,
        Err(_) => {
            warn!("dropping malformed registration response");
            return Ok(());
        }
    };

    if ctx.state == ClientState::Registering && resp.uuid == ctx.uuid {
        if resp.status() == Some(RegStatus::Success) {
            ctx.addr = resp.addr;
            ctx.state = ClientState::Registered;
            ctx.timeout = None;
            debug!("registered as {:#04x}", ctx.addr);
        } else {
            warn!("registration rejected: status={}", resp.status);
            ctx.state = ClientState::Unregistered;
            ctx.timeout = None;
        }
        return Ok(());
    }

    if ctx.state == ClientState::Registered && h.dest_addr == ctx.addr && resp.uuid != ctx.uuid {
        warn!("address clash / forced deregistration, re-attaching");
        ctx.state = ClientState::Unregistered;
        ctx.addr = ADDR_UNASSIGNED;
        ctx.net_id = NETWORK_ANY;
        ctx.timeout = None;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::mock::MockClock;
    use crate::phy::mock::MockPhy;

    fn header_at(buf: &[u8]) -> Header {
        Header::decode::<()>(buf).unwrap()
    }

    #[test]
    fn client_sends_beacon_request_when_unregistered() {
        let clock = MockClock::new();
        let mut mac = Mac::client(MockPhy::new(64), clock, Config::default(), 0x1, false, 5);
        mac.tick().unwrap();
        assert_eq!(mac.state(), Some(ClientState::BeaconRequest));
        let sent = mac.phy.take_last().unwrap();
        assert_eq!(header_at(&sent).frame_type, FrameType::BeaconRequest);
    }

    #[test]
    fn attach_scenario() {
        let clock = MockClock::new();
        let mut mac = Mac::client(
            MockPhy::new(64),
            clock,
            Config::default(),
            0x0123456789ABCDEF,
            false,
            5,
        );
        mac.tick().unwrap();

        let beacon_body = Beacon {
            uuid: 0xAAAA,
            timestamp: 1,
            sync: true,
            permit_attach: true,
            beacon_interval: 2,
            address_list: &[],
        };
        let mut payload = [0u8; 16];
        let n = beacon_body.encode(&mut payload);
        let beacon_header = Header::new(FrameType::Beacon, 0x42, ADDR_BROADCAST, 0x00, 0);
        let mut frame = [0u8; 32];
        let hn = beacon_header.encode(&mut frame);
        frame[hn..hn + n].copy_from_slice(&payload[..n]);
        mac.on_receive(&frame[..hn + n], -40).unwrap();

        assert_eq!(mac.state(), Some(ClientState::Registering));
        let reg_req = mac.phy.take_last().unwrap();
        assert_eq!(header_at(&reg_req).frame_type, FrameType::RegistrationRequest);

        let resp_body = RegistrationResponse::new(0x0123456789ABCDEF, 0x01, RegStatus::Success);
        let mut rbuf = [0u8; RegistrationResponse::LEN];
        resp_body.encode(&mut rbuf);
        let resp_header = Header::new(FrameType::RegistrationResponse, 0x42, ADDR_UNASSIGNED, 0x00, 0);
        let mut rframe = [0u8; 32];
        let rhn = resp_header.encode(&mut rframe);
        rframe[rhn..rhn + RegistrationResponse::LEN].copy_from_slice(&rbuf);
        mac.on_receive(&rframe[..rhn + RegistrationResponse::LEN], -40)
            .unwrap();

        assert_eq!(mac.state(), Some(ClientState::Registered));
        assert_eq!(mac.addr(), Some(0x01));
    }

    #[test]
    fn coordinator_registration_rejects_when_full() {
        let clock = MockClock::new();
        let mut cfg = Config::default();
        cfg.max_nodes = 1;
        let mut mac = Mac::coordinator(MockPhy::new(64), clock, cfg, 0x42, 0xAAAA);
        mac.tick().unwrap();

        let req = RegistrationRequest::new(0x1, false, 5);
        let mut buf = [0u8; RegistrationRequest::LEN];
        req.encode(&mut buf);
        let h = Header::new(FrameType::RegistrationRequest, 0x42, ADDR_COORDINATOR, ADDR_UNASSIGNED, 0);
        let mut frame = [0u8; 32];
        let hn = h.encode(&mut frame);
        frame[hn..hn + buf.len()].copy_from_slice(&buf);
        mac.on_receive(&frame[..hn + buf.len()], -30).unwrap();

        let req2 = RegistrationRequest::new(0x2, false, 5);
        let mut buf2 = [0u8; RegistrationRequest::LEN];
        req2.encode(&mut buf2);
        let mut frame2 = [0u8; 32];
        let hn2 = h.encode(&mut frame2);
        frame2[hn2..hn2 + buf2.len()].copy_from_slice(&buf2);
        mac.on_receive(&frame2[..hn2 + buf2.len()], -30).unwrap();

        let last = mac.phy.take_last().unwrap();
        let resp = RegistrationResponse::decode::<()>(&last[header::HEADER_LEN..]).unwrap();
        assert_eq!(resp.status(), Some(RegStatus::NetworkFull));
    }

    #[test]
    fn forced_reregistration_on_unknown_source() {
        let clock = MockClock::new();
        let mac_cfg = Config::default();
        let mut mac = Mac::coordinator(MockPhy::new(64), clock, mac_cfg, 0x42, 0xAAAA);

        let h = Header::new(FrameType::Data, 0x42, ADDR_COORDINATOR, 0x09, 0);
        let mut frame = [0u8; 16];
        let hn = h.encode(&mut frame);
        mac.on_receive(&frame[..hn], -30).unwrap();

        let sent = mac.phy.take_last().unwrap();
        let sent_header = header_at(&sent);
        assert_eq!(sent_header.frame_type, FrameType::RegistrationResponse);
        let resp = RegistrationResponse::decode::<()>(&sent[header::HEADER_LEN..]).unwrap();
        assert_eq!(resp.status(), Some(RegStatus::AddressInvalid));
        assert_eq!(resp.addr, ADDR_BROADCAST);
    }
}
