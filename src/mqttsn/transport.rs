//! Opaque packet transport the MQTT-SN client runs over: TinyMAC's
//! `Mac::send`, or a UDP socket when talking to a gateway
//! directly. Unlike [`crate::phy::Phy`] there is no MTU query or power
//! state here - the client enforces `MAX_PACKET` itself and the transport
//! is assumed to already be "up".

/// A datagram sink for already-framed MQTT-SN messages.
pub trait Transport {
    /// Underlying transport error type.
    type Error;

    /// Send one complete MQTT-SN message (length-prefixed, as produced by
    /// [`super::wire`]).
    fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error>;
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    extern crate std;

    use std::vec::Vec;

    use super::Transport;

    /// Records every message handed to [`Transport::send`], for assertion
    /// in tests.
    #[derive(Debug, Default)]
    pub struct MockTransport {
        pub sent: Vec<Vec<u8>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self { sent: Vec::new() }
        }

        pub fn take_last(&mut self) -> Option<Vec<u8>> {
            self.sent.pop()
        }
    }

    impl Transport for MockTransport {
        type Error = ();

        fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
            self.sent.push(buf.iter().copied().collect());
            Ok(())
        }
    }
}
