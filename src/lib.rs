//! TinyHAN: a star-topology low-power wireless stack for constrained
//! nodes - a TinyMAC link layer ([`mac`]) carrying an MQTT-SN v1.2 client
//! subset ([`mqttsn`]) over an opaque packet transport.
//!
//! The two layers share only [`clock::Clock`], the tick source abstraction;
//! [`mac::Mac`] is one possible [`mqttsn::Transport`] but the client runs
//! equally well over a UDP socket when talking to a gateway directly.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod clock;
pub mod mac;
pub mod mqttsn;
pub mod phy;
