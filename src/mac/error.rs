//! MAC failure taxonomy.

/// Errors returned synchronously from the MAC's public entry points.
///
/// Asynchronous failures (ack exhaustion, validity expiry, heartbeat
/// expiry) do not appear here - they are reported through the `send_cb`
/// supplied at the call site.
#[derive(Debug, Clone, PartialEq)]
pub enum MacError<E> {
    /// Frame too short, bad length, or an unimplemented flags combination.
    Malformed,
    /// Operation attempted in a state that forbids it.
    WrongState,
    /// Payload + header exceeds the PHY MTU or the 128 byte MAC maximum.
    BufferFull,
    /// Destination short address is not a currently-registered peer.
    PeerUnknown,
    /// Destination peer already has a packet in flight.
    PeerBusy,
    /// Coordinator has no free node slot for a new registration.
    NetworkFull,
    /// Ack retries exhausted without a matching Ack.
    AckExhausted,
    /// Validity timer expired before a sleepy peer polled for its data.
    ValidityExpired,
    /// Wrapper for the underlying PHY transport error.
    Phy(E),
}
