//! Tunables for a [`crate::mqttsn::Client`] instance.

/// Configuration for the MQTT-SN client.
///
/// Defaults match the `MQTTSN_*` constants conventionally used for
/// `N_RETRY`, `T_RETRY` and `KEEP_ALIVE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Retransmissions attempted before giving up and forcing Disconnected.
    pub n_retry: u8,
    /// Seconds between retransmissions of an unacknowledged request.
    pub t_retry: u32,
    /// Seconds of inactivity before a PINGREQ is sent to hold the session
    /// open at the gateway.
    pub keep_alive: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            n_retry: 3,
            t_retry: 5,
            keep_alive: 10,
        }
    }
}
