//! TinyMAC frame header: 6 bytes, little-endian.

use byteorder::{ByteOrder, LittleEndian};

use super::error::MacError;

/// `flags`'s version field is currently always zero.
pub const VERSION: u16 = 0;

const VERSION_SHIFT: u16 = 13;
const VERSION_MASK: u16 = 7 << VERSION_SHIFT;
const DATA_PENDING: u16 = 1 << 7;
const ACK_REQUEST: u16 = 1 << 6;
const TYPE_MASK: u16 = 31;

/// Broadcast destination address, and the "unassigned" placeholder for a
/// node that has not yet been given a short address.
pub const ADDR_BROADCAST: u8 = 0xFF;
pub const ADDR_UNASSIGNED: u8 = 0xFF;
/// Wildcard network id used pre-attach.
pub const NETWORK_ANY: u8 = 0xFF;
/// Short address of the coordinator itself.
pub const ADDR_COORDINATOR: u8 = 0x00;

pub const HEADER_LEN: usize = 6;

/// Frame types (5-bit field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Beacon = 0,
    BeaconRequest = 1,
    Poll = 2,
    Ack = 3,
    RegistrationRequest = 4,
    DeregistrationRequest = 5,
    RegistrationResponse = 6,
    Data = 10,
}

impl FrameType {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => FrameType::Beacon,
            1 => FrameType::BeaconRequest,
            2 => FrameType::Poll,
            3 => FrameType::Ack,
            4 => FrameType::RegistrationRequest,
            5 => FrameType::DeregistrationRequest,
            6 => FrameType::RegistrationResponse,
            10 => FrameType::Data,
            _ => return None,
        })
    }
}

/// Fixed 6-byte MAC header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub frame_type: FrameType,
    pub data_pending: bool,
    pub ack_request: bool,
    pub net_id: u8,
    pub dest_addr: u8,
    pub src_addr: u8,
    pub seq: u8,
}

impl Header {
    pub fn new(frame_type: FrameType, net_id: u8, dest_addr: u8, src_addr: u8, seq: u8) -> Self {
        Self {
            frame_type,
            data_pending: false,
            ack_request: false,
            net_id,
            dest_addr,
            src_addr,
            seq,
        }
    }

    pub fn with_ack_request(mut self, v: bool) -> Self {
        self.ack_request = v;
        self
    }

    pub fn with_data_pending(mut self, v: bool) -> Self {
        self.data_pending = v;
        self
    }

    fn flags(&self) -> u16 {
        (VERSION << VERSION_SHIFT)
            | if self.data_pending { DATA_PENDING } else { 0 }
            | if self.ack_request { ACK_REQUEST } else { 0 }
            | (self.frame_type as u16 & TYPE_MASK)
    }

    pub fn encode(&self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u16(&mut buf[0..2], self.flags());
        buf[2] = self.net_id;
        buf[3] = self.dest_addr;
        buf[4] = self.src_addr;
        buf[5] = self.seq;
        HEADER_LEN
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, MacError<E>> {
        if buf.len() < HEADER_LEN {
            return Err(MacError::Malformed);
        }
        let flags = LittleEndian::read_u16(&buf[0..2]);
        if (flags & VERSION_MASK) >> VERSION_SHIFT != VERSION {
            return Err(MacError::Malformed);
        }
        let frame_type =
            FrameType::from_u8((flags & TYPE_MASK) as u8).ok_or(MacError::Malformed)?;
        Ok(Self {
            frame_type,
            data_pending: flags & DATA_PENDING != 0,
            ack_request: flags & ACK_REQUEST != 0,
            net_id: buf[2],
            dest_addr: buf[3],
            src_addr: buf[4],
            seq: buf[5],
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let h = Header::new(FrameType::Data, 0x42, 0x03, 0x00, 7)
            .with_ack_request(true)
            .with_data_pending(false);
        let mut buf = [0u8; HEADER_LEN];
        assert_eq!(h.encode(&mut buf), HEADER_LEN);
        let d: Header = Header::decode::<()>(&buf).unwrap();
        assert_eq!(d, h);
    }

    #[test]
    fn version_is_always_zero() {
        let h = Header::new(FrameType::Beacon, 0xFF, 0xFF, 0x00, 1);
        let mut buf = [0u8; HEADER_LEN];
        h.encode(&mut buf);
        let flags = LittleEndian::read_u16(&buf[0..2]);
        assert_eq!((flags & VERSION_MASK) >> VERSION_SHIFT, 0);
    }

    #[test]
    fn short_frame_rejected() {
        let buf = [0u8; 3];
        assert_eq!(Header::decode::<()>(&buf), Err(MacError::Malformed));
    }
}
