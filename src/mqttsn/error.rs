//! MQTT-SN client failure taxonomy.

/// Errors returned synchronously from the client's public entry points.
///
/// Asynchronous outcomes (REGACK/SUBACK rejection, PUBACK result, retry
/// exhaustion) do not appear here - they are reported through the
/// `puback` callback or simply observed via [`super::ClientState`] on the
/// next call.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError<E> {
    /// Frame too short, bad length byte, or an unimplemented msg type.
    Malformed,
    /// Operation attempted in a state that forbids it (e.g. `connect`
    /// while not `Disconnected`, `publish` while not `Connected`).
    WrongState,
    /// `sizeof(header) + payload` exceeds `MAX_PACKET` (64 bytes).
    BufferFull,
    /// Wrapper for the underlying transport error.
    Transport(E),
}
