//! PHY collaborator contract.
//!
//! The MAC never retains PHY buffers past a `send` call - fragments are
//! only referenced for the duration of the call.

use bitflags::bitflags;

bitflags! {
    /// Flags accepted by [`Phy::send`].
    pub struct SendFlags: u8 {
        /// Bypass CCA / channel-clear checking and transmit immediately.
        const IMMEDIATE = 1 << 0;
    }
}

/// A datagram transport with a fixed MTU and a few power-state controls.
///
/// Implemented by the host on top of whatever radio is attached; the MAC
/// drives it entirely through this trait and never touches the radio
/// directly. RX delivery is push-based from the host's perspective: the
/// host reads frames off the PHY itself and calls [`crate::mac::Mac::on_receive`]
/// - there is no callback registration here, since the core must never be
/// re-entered from inside a trait method it calls.
pub trait Phy {
    /// Underlying transport error type.
    type Error;

    /// Maximum transmittable unit, including whatever the PHY's own framing
    /// costs. The MAC additionally enforces `MAX_PAYLOAD` on top of this.
    fn mtu(&self) -> usize;

    /// Transmit a frame assembled from one or more fragments (header +
    /// payload, typically) without copying them into a single buffer first.
    fn send(&mut self, frags: &[&[u8]], flags: SendFlags) -> Result<(), Self::Error>;

    /// Put the radio into continuous receive mode.
    fn listen(&mut self) -> Result<(), Self::Error>;

    /// Put the radio into its lowest-power idle state.
    fn standby(&mut self) -> Result<(), Self::Error>;

    /// Put the radio into receive mode for `us` microseconds, then fall
    /// back to standby. Used by sleepy nodes to catch the ack/pending-data
    /// window after a transmission or DATA_PENDING reception.
    fn delayed_standby(&mut self, us: u32) -> Result<(), Self::Error>;

    /// Suspend the radio entirely (e.g. across a deep sleep).
    fn suspend(&mut self) -> Result<(), Self::Error>;

    /// Resume a suspended radio.
    fn resume(&mut self) -> Result<(), Self::Error>;
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    extern crate std;

    use std::vec::Vec;

    use super::{Phy, SendFlags};

    /// Records every frame handed to [`Phy::send`] (header+payload fragments
    /// concatenated) and every power-state transition, for assertion in
    /// tests.
    #[derive(Debug, Default)]
    pub struct MockPhy {
        pub sent: Vec<Vec<u8>>,
        pub mtu: usize,
        pub listens: usize,
        pub standbys: usize,
    }

    impl MockPhy {
        pub fn new(mtu: usize) -> Self {
            Self {
                sent: Vec::new(),
                mtu,
                listens: 0,
                standbys: 0,
            }
        }

        pub fn take_last(&mut self) -> Option<Vec<u8>> {
            self.sent.pop()
        }
    }

    impl Phy for MockPhy {
        type Error = ();

        fn mtu(&self) -> usize {
            self.mtu
        }

        fn send(&mut self, frags: &[&[u8]], _flags: SendFlags) -> Result<(), Self::Error> {
            let mut buf = Vec::new();
            for f in frags {
                buf.extend_from_slice(f);
            }
            self.sent.push(buf);
            Ok(())
        }

        fn listen(&mut self) -> Result<(), Self::Error> {
            self.listens += 1;
            Ok(())
        }

        fn standby(&mut self) -> Result<(), Self::Error> {
            self.standbys += 1;
            Ok(())
        }

        fn delayed_standby(&mut self, _us: u32) -> Result<(), Self::Error> {
            Ok(())
        }

        fn suspend(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn resume(&mut self) -> Result<(), Self::Error> {
            self.listen()
        }
    }
}
