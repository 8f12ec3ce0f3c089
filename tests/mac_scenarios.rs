//! End-to-end TinyMAC coordinator scenarios that need timer-driven, black-
//! box exercise rather than a single-call unit test. `src/mac/mod.rs`'s own
//! `#[cfg(test)]` module already covers attach and forced re-registration
//! with direct access to its private fields; these run purely through the
//! public API, the way an application embedding the crate would.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Mutex;

use tinyhan::mac::{
    FrameType, Header, Mac, RegistrationRequest, ADDR_COORDINATOR, ADDR_UNASSIGNED,
};
use tinyhan::mac::header::HEADER_LEN;
use tinyhan::mac::{ClientState, Config, RegistrationResponse};
use tinyhan::phy::{Phy, SendFlags};
use tinyhan::clock::Clock;

/// A [`Clock`] whose counter is shared with the test driver via `Rc`, so the
/// test can advance time after the clock has already been moved into a
/// [`Mac`].
#[derive(Clone)]
struct TestClock(Rc<Cell<u32>>);

impl TestClock {
    fn new() -> Self {
        Self(Rc::new(Cell::new(0)))
    }

    fn advance(&self, ticks: u32) {
        self.0.set(self.0.get() + ticks);
    }
}

impl Clock for TestClock {
    fn now(&self) -> u32 {
        self.0.get()
    }
}

/// A [`Phy`] that appends every sent frame to a shared log instead of
/// actually transmitting, so the test can inspect what the MAC sent after
/// handing the `Phy` by value to [`Mac::coordinator`].
#[derive(Clone)]
struct RelayPhy {
    mtu: usize,
    log: Rc<std::cell::RefCell<VecDeque<Vec<u8>>>>,
}

impl RelayPhy {
    fn new(mtu: usize) -> Self {
        Self {
            mtu,
            log: Rc::new(std::cell::RefCell::new(VecDeque::new())),
        }
    }

    fn pop(&self) -> Option<Vec<u8>> {
        self.log.borrow_mut().pop_front()
    }
}

impl Phy for RelayPhy {
    type Error = ();

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn send(&mut self, frags: &[&[u8]], _flags: SendFlags) -> Result<(), Self::Error> {
        let mut buf = Vec::new();
        for f in frags {
            buf.extend_from_slice(f);
        }
        self.log.borrow_mut().push_back(buf);
        Ok(())
    }

    fn listen(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn standby(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn delayed_standby(&mut self, _us: u32) -> Result<(), Self::Error> {
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn resume(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

fn register(mac: &mut Mac<RelayPhy, TestClock>, net_id: u8, uuid: u64, sleepy: bool) {
    let req = RegistrationRequest::new(uuid, sleepy, 5);
    let mut body = [0u8; RegistrationRequest::LEN];
    req.encode(&mut body);
    let h = Header::new(
        FrameType::RegistrationRequest,
        net_id,
        ADDR_COORDINATOR,
        ADDR_UNASSIGNED,
        0,
    );
    let mut frame = [0u8; HEADER_LEN + RegistrationRequest::LEN];
    let hn = h.encode(&mut frame);
    frame[hn..hn + body.len()].copy_from_slice(&body);
    mac.on_receive(&frame[..hn + body.len()], -30).unwrap();
}

static ACK_EXHAUSTION_SEND: Mutex<Vec<(u8, bool)>> = Mutex::new(Vec::new());
static ACK_EXHAUSTION_DEREG: Mutex<Vec<(u64, u8, u8)>> = Mutex::new(Vec::new());

fn ack_exhaustion_send_cb(dest: u8, success: bool) {
    ACK_EXHAUSTION_SEND.lock().unwrap().push((dest, success));
}

fn ack_exhaustion_dereg_cb(uuid: u64, addr: u8, reason: u8) {
    ACK_EXHAUSTION_DEREG.lock().unwrap().push((uuid, addr, reason));
}

/// Scenario 2: a registered, non-sleepy peer never acks a `send(...,
/// ack_request=true, ...)`. After `max_retries` retransmissions the
/// coordinator gives up, fires the send callback with `success=false`, and
/// deregisters the peer via `dereg_cb`.
#[test]
fn ack_retry_exhaustion_deregisters_peer() {
    ACK_EXHAUSTION_SEND.lock().unwrap().clear();
    ACK_EXHAUSTION_DEREG.lock().unwrap().clear();

    let clock = TestClock::new();
    let phy = RelayPhy::new(64);
    let net_id = 0x42;
    // Push the beacon period well past this test's tick budget so a beacon
    // never interleaves with the ack-retry frames in the relay log.
    let mut cfg = Config::default();
    cfg.beacon_interval = 8;
    let mut mac = Mac::coordinator(phy.clone(), clock.clone(), cfg, net_id, 0xAAAA);
    mac.set_callbacks(None, Some(ack_exhaustion_dereg_cb));

    register(&mut mac, net_id, 0x1111, false);
    let reg_resp = phy.pop().unwrap();
    let resp = RegistrationResponse::decode::<()>(&reg_resp[HEADER_LEN..]).unwrap();
    let addr = resp.addr;

    mac.send(addr, b"hello", None, true, Some(ack_exhaustion_send_cb))
        .unwrap();
    let first = phy.pop().unwrap();
    assert_eq!(Header::decode::<()>(&first).unwrap().frame_type, FrameType::Data);

    for _ in 0..cfg.max_retries {
        clock.advance(cfg.ack_timeout_ticks.max(1));
        mac.tick().unwrap();
        let retry = phy.pop().unwrap();
        assert_eq!(Header::decode::<()>(&retry).unwrap().frame_type, FrameType::Data);
    }

    // One more expiry: retries are exhausted, the coordinator gives up.
    clock.advance(cfg.ack_timeout_ticks.max(1));
    mac.tick().unwrap();
    assert!(phy.pop().is_none());

    assert_eq!(*ACK_EXHAUSTION_SEND.lock().unwrap(), vec![(addr, false)]);
    assert_eq!(
        *ACK_EXHAUSTION_DEREG.lock().unwrap(),
        vec![(0x1111, addr, 0xFF)]
    );
    assert!(mac.nodes().all(|n| n.uuid == 0));
}

/// Scenario 3: a sleepy peer has a send queued while it's presumed asleep;
/// the coordinator holds it until the peer polls, then delivers the Ack
/// (with DATA_PENDING set) immediately followed by the queued frame.
#[test]
fn sleepy_node_deferred_delivery() {
    let clock = TestClock::new();
    let phy = RelayPhy::new(64);
    let net_id = 0x7;
    let mut mac = Mac::coordinator(phy.clone(), clock, Config::default(), net_id, 0xBEEF);

    register(&mut mac, net_id, 0x2222, true);
    let reg_resp = phy.pop().unwrap();
    let resp = RegistrationResponse::decode::<()>(&reg_resp[HEADER_LEN..]).unwrap();
    let addr = resp.addr;

    mac.send(addr, b"sensor-data", None, false, None).unwrap();
    assert!(phy.pop().is_none(), "sleepy peer must not be sent to immediately");
    assert!(mac.nodes().find(|n| n.addr == addr).unwrap().has_pending());

    let poll = Header::new(FrameType::Poll, net_id, ADDR_COORDINATOR, addr, 0);
    let mut frame = [0u8; HEADER_LEN];
    let hn = poll.encode(&mut frame);
    mac.on_receive(&frame[..hn], -35).unwrap();

    let ack = phy.pop().unwrap();
    let ack_header = Header::decode::<()>(&ack).unwrap();
    assert_eq!(ack_header.frame_type, FrameType::Ack);
    assert!(ack_header.data_pending);

    let data = phy.pop().unwrap();
    let data_header = Header::decode::<()>(&data).unwrap();
    assert_eq!(data_header.frame_type, FrameType::Data);
    assert_eq!(&data[HEADER_LEN..], b"sensor-data");

    assert!(!mac.nodes().find(|n| n.addr == addr).unwrap().has_pending());
}

/// Scenario 1: Attach, driven through a real coordinator `Mac` and a real
/// client `Mac` relaying each other's emitted frames, instead of a test
/// hand-crafting the `RegistrationResponse`. Catches bugs where the
/// coordinator's own output wouldn't actually be accepted by a client.
#[test]
fn attach_end_to_end_through_coordinator() {
    let clock = TestClock::new();
    let coord_phy = RelayPhy::new(64);
    let client_phy = RelayPhy::new(64);
    let net_id = 0x42;

    let mut coord = Mac::coordinator(coord_phy.clone(), clock.clone(), Config::default(), net_id, 0xAAAA);
    let mut client = Mac::client(client_phy.clone(), clock.clone(), Config::default(), 0x1111, false, 5);

    assert_eq!(client.state(), Some(ClientState::Unregistered));

    // Drive both sides for a handful of ticks, relaying whatever each one
    // put on air to the other. Beacons, the registration request and the
    // registration response all flow through this same loop.
    for _ in 0..10 {
        client.tick().unwrap();
        coord.tick().unwrap();
        clock.advance(1);

        while let Some(frame) = client_phy.pop() {
            coord.on_receive(&frame, -30).unwrap();
        }
        while let Some(frame) = coord_phy.pop() {
            client.on_receive(&frame, -40).unwrap();
        }

        if client.state() == Some(ClientState::Registered) {
            break;
        }
    }

    assert_eq!(client.state(), Some(ClientState::Registered));
    let assigned = client.addr().unwrap();
    assert!(coord.nodes().any(|n| n.uuid == 0x1111 && n.addr == assigned));
}
