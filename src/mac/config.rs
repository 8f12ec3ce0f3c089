//! Tunables for a [`crate::mac::Mac`] instance.

/// Configuration shared by coordinator and client roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of registered peers the coordinator tracks.
    pub max_nodes: usize,
    /// Maximum application payload accepted by [`crate::mac::Mac::send`].
    pub max_payload: usize,
    /// Retransmissions attempted before a WaitAck send is abandoned.
    pub max_retries: u8,
    /// Tick count to wait for an Ack before retransmitting, in ticks.
    pub ack_timeout_ticks: u32,
    /// Tick count a client waits in `BeaconRequest` before giving up.
    pub beacon_request_timeout_ticks: u32,
    /// Tick count a client waits in `Registering` before giving up.
    pub registration_timeout_ticks: u32,
    /// Extra ticks of slack added to a peer's heartbeat period before the
    /// coordinator declares it gone.
    pub heartbeat_grace_ticks: u32,
    /// Duration a sleepy node's receiver stays on after TX/RX, in
    /// microseconds.
    pub listen_period_us: u32,
    /// Wall-clock duration of one tick, in milliseconds. Informational -
    /// the MAC itself only counts ticks; this is used to convert the
    /// second-denominated defaults above into ticks in [`Config::default`].
    pub tick_ms: u32,
    /// `2^beacon_interval` ticks between sync beacons.
    pub beacon_interval: u8,
    /// Beacon slot offset (mod `2^beacon_interval`) at which this
    /// coordinator transmits its sync beacon.
    pub beacon_offset: u16,
}

const TICK_MS: u32 = 250;

const fn ticks_for_seconds(s: u32) -> u32 {
    (s * 1000) / TICK_MS
}

const fn ticks_for_ms(ms: u32) -> u32 {
    if ms < TICK_MS {
        1
    } else {
        ms / TICK_MS
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_nodes: 32,
            max_payload: 128,
            max_retries: 3,
            ack_timeout_ticks: ticks_for_ms(250),
            beacon_request_timeout_ticks: ticks_for_seconds(10),
            registration_timeout_ticks: ticks_for_ms(1000),
            heartbeat_grace_ticks: ticks_for_seconds(2),
            listen_period_us: 10_000,
            tick_ms: TICK_MS,
            beacon_interval: 2,
            beacon_offset: 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.max_nodes, 32);
        assert_eq!(c.max_payload, 128);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.ack_timeout_ticks, 1);
        assert_eq!(c.beacon_request_timeout_ticks, 40);
    }
}
