//! MQTT-SN control packet framing.
//!
//! Every message begins with a 1-byte total length and a 1-byte message
//! type; all multi-byte fields that follow are big-endian, the opposite of
//! [`crate::mac::header`]'s little-endian convention.
//! Extended (3-byte) length encoding from the OASIS spec is not implemented:
//! `MAX_PACKET` is 64 bytes, so the 1-byte length field never overflows.

use byteorder::{BigEndian, ByteOrder};

use super::error::ClientError;

/// Message types implemented on the wire. Several of these (`Advertise`,
/// `GwInfo`, `UnsubAck`) are never emitted or acted on by [`super::Client`]
/// - gateway discovery and UNSUBSCRIBE aren't part of this client's
/// feature set - but the framer still encodes/decodes their byte layout so
/// round-tripping holds for every defined frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Advertise = 0x00,
    GwInfo = 0x02,
    Connect = 0x04,
    Connack = 0x05,
    Register = 0x0A,
    RegAck = 0x0B,
    Publish = 0x0C,
    PubAck = 0x0D,
    Subscribe = 0x12,
    SubAck = 0x13,
    UnsubAck = 0x15,
    PingReq = 0x16,
    PingResp = 0x17,
    Disconnect = 0x18,
}

impl MsgType {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => MsgType::Advertise,
            0x02 => MsgType::GwInfo,
            0x04 => MsgType::Connect,
            0x05 => MsgType::Connack,
            0x0A => MsgType::Register,
            0x0B => MsgType::RegAck,
            0x0C => MsgType::Publish,
            0x0D => MsgType::PubAck,
            0x12 => MsgType::Subscribe,
            0x13 => MsgType::SubAck,
            0x15 => MsgType::UnsubAck,
            0x16 => MsgType::PingReq,
            0x17 => MsgType::PingResp,
            0x18 => MsgType::Disconnect,
            _ => return None,
        })
    }
}

/// Return codes carried by CONNACK/REGACK/SUBACK/PUBACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Accepted = 0x00,
    Congestion = 0x01,
    InvalidTopic = 0x02,
    NotSupported = 0x03,
}

impl ReturnCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => ReturnCode::Accepted,
            0x01 => ReturnCode::Congestion,
            0x02 => ReturnCode::InvalidTopic,
            0x03 => ReturnCode::NotSupported,
            _ => return None,
        })
    }
}

pub const PROTOCOL_ID: u8 = 0x01;

/// CONNECT flags.
pub const FLAG_DUP: u8 = 1 << 7;
pub const FLAG_RETAIN: u8 = 1 << 4;
pub const FLAG_WILL: u8 = 1 << 3;
pub const FLAG_CLEAN_SESSION: u8 = 1 << 2;
pub const FLAG_QOS_MASK: u8 = 3 << 5;
pub const FLAG_QOS_0: u8 = 0 << 5;
pub const FLAG_QOS_1: u8 = 1 << 5;
pub const FLAG_TOPIC_ID_NORM: u8 = 0 << 0;
pub const FLAG_TOPIC_ID_MASK: u8 = 3 << 0;

fn put_header(buf: &mut [u8], total_len: usize, msg_type: MsgType) {
    buf[0] = total_len as u8;
    buf[1] = msg_type as u8;
}

fn check<E>(buf: &[u8], min_len: usize, expect: MsgType) -> Result<(), ClientError<E>> {
    if buf.len() < 2 || buf.len() < min_len {
        return Err(ClientError::Malformed);
    }
    if buf[0] as usize != buf.len() {
        return Err(ClientError::Malformed);
    }
    if MsgType::from_u8(buf[1]) != Some(expect) {
        return Err(ClientError::Malformed);
    }
    Ok(())
}

/// Peek the message type of a buffer without fully decoding it, so the
/// caller can dispatch to the right variant.
pub fn peek_type<E>(buf: &[u8]) -> Result<MsgType, ClientError<E>> {
    if buf.len() < 2 || buf[0] as usize != buf.len() {
        return Err(ClientError::Malformed);
    }
    MsgType::from_u8(buf[1]).ok_or(ClientError::Malformed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advertise {
    pub gw_id: u8,
    pub duration: u16,
}

impl Advertise {
    pub fn encode<E>(&self, buf: &mut [u8]) -> Result<usize, ClientError<E>> {
        let len = 5;
        if buf.len() < len {
            return Err(ClientError::BufferFull);
        }
        put_header(buf, len, MsgType::Advertise);
        buf[2] = self.gw_id;
        BigEndian::write_u16(&mut buf[3..5], self.duration);
        Ok(len)
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, ClientError<E>> {
        check(buf, 5, MsgType::Advertise)?;
        Ok(Self {
            gw_id: buf[2],
            duration: BigEndian::read_u16(&buf[3..5]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GwInfo {
    pub gw_id: u8,
}

impl GwInfo {
    pub fn encode<E>(&self, buf: &mut [u8]) -> Result<usize, ClientError<E>> {
        let len = 3;
        if buf.len() < len {
            return Err(ClientError::BufferFull);
        }
        put_header(buf, len, MsgType::GwInfo);
        buf[2] = self.gw_id;
        Ok(len)
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, ClientError<E>> {
        check(buf, 3, MsgType::GwInfo)?;
        Ok(Self { gw_id: buf[2] })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connect<'a> {
    pub flags: u8,
    pub duration: u16,
    pub client_id: &'a [u8],
}

impl<'a> Connect<'a> {
    pub fn encode<E>(&self, buf: &mut [u8]) -> Result<usize, ClientError<E>> {
        let len = 6 + self.client_id.len();
        if buf.len() < len {
            return Err(ClientError::BufferFull);
        }
        put_header(buf, len, MsgType::Connect);
        buf[2] = self.flags;
        buf[3] = PROTOCOL_ID;
        BigEndian::write_u16(&mut buf[4..6], self.duration);
        buf[6..len].copy_from_slice(self.client_id);
        Ok(len)
    }

    pub fn decode<E>(buf: &'a [u8]) -> Result<Self, ClientError<E>> {
        check(buf, 6, MsgType::Connect)?;
        Ok(Self {
            flags: buf[2],
            duration: BigEndian::read_u16(&buf[4..6]),
            client_id: &buf[6..],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connack {
    pub return_code: u8,
}

impl Connack {
    pub fn encode<E>(&self, buf: &mut [u8]) -> Result<usize, ClientError<E>> {
        let len = 3;
        if buf.len() < len {
            return Err(ClientError::BufferFull);
        }
        put_header(buf, len, MsgType::Connack);
        buf[2] = self.return_code;
        Ok(len)
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, ClientError<E>> {
        check(buf, 3, MsgType::Connack)?;
        Ok(Self {
            return_code: buf[2],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register<'a> {
    pub topic_id: u16,
    pub msg_id: u16,
    pub topic_name: &'a [u8],
}

impl<'a> Register<'a> {
    pub fn encode<E>(&self, buf: &mut [u8]) -> Result<usize, ClientError<E>> {
        let len = 6 + self.topic_name.len();
        if buf.len() < len {
            return Err(ClientError::BufferFull);
        }
        put_header(buf, len, MsgType::Register);
        BigEndian::write_u16(&mut buf[2..4], self.topic_id);
        BigEndian::write_u16(&mut buf[4..6], self.msg_id);
        buf[6..len].copy_from_slice(self.topic_name);
        Ok(len)
    }

    pub fn decode<E>(buf: &'a [u8]) -> Result<Self, ClientError<E>> {
        check(buf, 6, MsgType::Register)?;
        Ok(Self {
            topic_id: BigEndian::read_u16(&buf[2..4]),
            msg_id: BigEndian::read_u16(&buf[4..6]),
            topic_name: &buf[6..],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegAck {
    pub topic_id: u16,
    pub msg_id: u16,
    pub return_code: u8,
}

impl RegAck {
    pub fn encode<E>(&self, buf: &mut [u8]) -> Result<usize, ClientError<E>> {
        let len = 7;
        if buf.len() < len {
            return Err(ClientError::BufferFull);
        }
        put_header(buf, len, MsgType::RegAck);
        BigEndian::write_u16(&mut buf[2..4], self.topic_id);
        BigEndian::write_u16(&mut buf[4..6], self.msg_id);
        buf[6] = self.return_code;
        Ok(len)
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, ClientError<E>> {
        check(buf, 7, MsgType::RegAck)?;
        Ok(Self {
            topic_id: BigEndian::read_u16(&buf[2..4]),
            msg_id: BigEndian::read_u16(&buf[4..6]),
            return_code: buf[6],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publish<'a> {
    pub flags: u8,
    pub topic_id: u16,
    pub msg_id: u16,
    pub data: &'a [u8],
}

impl<'a> Publish<'a> {
    pub fn encode<E>(&self, buf: &mut [u8]) -> Result<usize, ClientError<E>> {
        let len = 7 + self.data.len();
        if buf.len() < len {
            return Err(ClientError::BufferFull);
        }
        put_header(buf, len, MsgType::Publish);
        buf[2] = self.flags;
        BigEndian::write_u16(&mut buf[3..5], self.topic_id);
        BigEndian::write_u16(&mut buf[5..7], self.msg_id);
        buf[7..len].copy_from_slice(self.data);
        Ok(len)
    }

    pub fn decode<E>(buf: &'a [u8]) -> Result<Self, ClientError<E>> {
        check(buf, 7, MsgType::Publish)?;
        Ok(Self {
            flags: buf[2],
            topic_id: BigEndian::read_u16(&buf[3..5]),
            msg_id: BigEndian::read_u16(&buf[5..7]),
            data: &buf[7..],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub topic_id: u16,
    pub msg_id: u16,
    pub return_code: u8,
}

impl PubAck {
    pub fn encode<E>(&self, buf: &mut [u8]) -> Result<usize, ClientError<E>> {
        let len = 7;
        if buf.len() < len {
            return Err(ClientError::BufferFull);
        }
        put_header(buf, len, MsgType::PubAck);
        BigEndian::write_u16(&mut buf[2..4], self.topic_id);
        BigEndian::write_u16(&mut buf[4..6], self.msg_id);
        buf[6] = self.return_code;
        Ok(len)
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, ClientError<E>> {
        check(buf, 7, MsgType::PubAck)?;
        Ok(Self {
            topic_id: BigEndian::read_u16(&buf[2..4]),
            msg_id: BigEndian::read_u16(&buf[4..6]),
            return_code: buf[6],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscribe<'a> {
    pub flags: u8,
    pub msg_id: u16,
    pub topic_name: &'a [u8],
}

impl<'a> Subscribe<'a> {
    pub fn encode<E>(&self, buf: &mut [u8]) -> Result<usize, ClientError<E>> {
        let len = 5 + self.topic_name.len();
        if buf.len() < len {
            return Err(ClientError::BufferFull);
        }
        put_header(buf, len, MsgType::Subscribe);
        buf[2] = self.flags;
        BigEndian::write_u16(&mut buf[3..5], self.msg_id);
        buf[5..len].copy_from_slice(self.topic_name);
        Ok(len)
    }

    pub fn decode<E>(buf: &'a [u8]) -> Result<Self, ClientError<E>> {
        check(buf, 5, MsgType::Subscribe)?;
        Ok(Self {
            flags: buf[2],
            msg_id: BigEndian::read_u16(&buf[3..5]),
            topic_name: &buf[5..],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAck {
    pub flags: u8,
    pub topic_id: u16,
    pub msg_id: u16,
    pub return_code: u8,
}

impl SubAck {
    pub fn encode<E>(&self, buf: &mut [u8]) -> Result<usize, ClientError<E>> {
        let len = 8;
        if buf.len() < len {
            return Err(ClientError::BufferFull);
        }
        put_header(buf, len, MsgType::SubAck);
        buf[2] = self.flags;
        BigEndian::write_u16(&mut buf[3..5], self.topic_id);
        BigEndian::write_u16(&mut buf[5..7], self.msg_id);
        buf[7] = self.return_code;
        Ok(len)
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, ClientError<E>> {
        check(buf, 8, MsgType::SubAck)?;
        Ok(Self {
            flags: buf[2],
            topic_id: BigEndian::read_u16(&buf[3..5]),
            msg_id: BigEndian::read_u16(&buf[5..7]),
            return_code: buf[7],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubAck {
    pub msg_id: u16,
}

impl UnsubAck {
    pub fn encode<E>(&self, buf: &mut [u8]) -> Result<usize, ClientError<E>> {
        let len = 4;
        if buf.len() < len {
            return Err(ClientError::BufferFull);
        }
        put_header(buf, len, MsgType::UnsubAck);
        BigEndian::write_u16(&mut buf[2..4], self.msg_id);
        Ok(len)
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, ClientError<E>> {
        check(buf, 4, MsgType::UnsubAck)?;
        Ok(Self {
            msg_id: BigEndian::read_u16(&buf[2..4]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingReq<'a> {
    pub client_id: &'a [u8],
}

impl<'a> PingReq<'a> {
    pub fn encode<E>(&self, buf: &mut [u8]) -> Result<usize, ClientError<E>> {
        let len = 2 + self.client_id.len();
        if buf.len() < len {
            return Err(ClientError::BufferFull);
        }
        put_header(buf, len, MsgType::PingReq);
        buf[2..len].copy_from_slice(self.client_id);
        Ok(len)
    }

    pub fn decode<E>(buf: &'a [u8]) -> Result<Self, ClientError<E>> {
        check(buf, 2, MsgType::PingReq)?;
        Ok(Self {
            client_id: &buf[2..],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingResp;

impl PingResp {
    pub fn encode<E>(&self, buf: &mut [u8]) -> Result<usize, ClientError<E>> {
        let len = 2;
        if buf.len() < len {
            return Err(ClientError::BufferFull);
        }
        put_header(buf, len, MsgType::PingResp);
        Ok(len)
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, ClientError<E>> {
        check(buf, 2, MsgType::PingResp)?;
        Ok(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnect {
    pub duration: Option<u16>,
}

impl Disconnect {
    pub fn encode<E>(&self, buf: &mut [u8]) -> Result<usize, ClientError<E>> {
        let len = if self.duration.is_some() { 4 } else { 2 };
        if buf.len() < len {
            return Err(ClientError::BufferFull);
        }
        put_header(buf, len, MsgType::Disconnect);
        if let Some(d) = self.duration {
            BigEndian::write_u16(&mut buf[2..4], d);
        }
        Ok(len)
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, ClientError<E>> {
        if buf.len() < 2 || buf[0] as usize != buf.len() {
            return Err(ClientError::Malformed);
        }
        if MsgType::from_u8(buf[1]) != Some(MsgType::Disconnect) {
            return Err(ClientError::Malformed);
        }
        let duration = if buf.len() >= 4 {
            Some(BigEndian::read_u16(&buf[2..4]))
        } else {
            None
        };
        Ok(Self { duration })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn connect_round_trip() {
        let c = Connect {
            flags: 0,
            duration: 10,
            client_id: b"sensor01",
        };
        let mut buf = [0u8; 64];
        let n = c.encode::<()>(&mut buf).unwrap();
        let d = Connect::decode::<()>(&buf[..n]).unwrap();
        assert_eq!(d, c);
    }

    #[test]
    fn publish_round_trip() {
        let p = Publish {
            flags: FLAG_QOS_1 | FLAG_TOPIC_ID_NORM,
            topic_id: 0x0007,
            msg_id: 1,
            data: b"x",
        };
        let mut buf = [0u8; 64];
        let n = p.encode::<()>(&mut buf).unwrap();
        let d = Publish::decode::<()>(&buf[..n]).unwrap();
        assert_eq!(d, p);
    }

    #[test]
    fn regack_round_trip() {
        let r = RegAck {
            topic_id: 0x0007,
            msg_id: 0,
            return_code: ReturnCode::Accepted as u8,
        };
        let mut buf = [0u8; 16];
        let n = r.encode::<()>(&mut buf).unwrap();
        let d = RegAck::decode::<()>(&buf[..n]).unwrap();
        assert_eq!(d, r);
    }

    #[test]
    fn disconnect_with_and_without_duration() {
        let mut buf = [0u8; 8];
        let n = Disconnect { duration: None }.encode::<()>(&mut buf).unwrap();
        assert_eq!(n, 2);
        let d = Disconnect::decode::<()>(&buf[..n]).unwrap();
        assert_eq!(d.duration, None);

        let n2 = Disconnect { duration: Some(30) }
            .encode::<()>(&mut buf)
            .unwrap();
        assert_eq!(n2, 4);
        let d2 = Disconnect::decode::<()>(&buf[..n2]).unwrap();
        assert_eq!(d2.duration, Some(30));
    }

    #[test]
    fn length_mismatch_rejected() {
        let mut buf = [0u8; 8];
        Connack { return_code: 0 }.encode::<()>(&mut buf).unwrap();
        assert_eq!(Connack::decode::<()>(&buf[..2]), Err(ClientError::Malformed));
    }

    #[test]
    fn peek_type_identifies_message() {
        let mut buf = [0u8; 8];
        PubAck {
            topic_id: 1,
            msg_id: 1,
            return_code: 0,
        }
        .encode::<()>(&mut buf)
        .unwrap();
        assert_eq!(peek_type::<()>(&buf[..7]).unwrap(), MsgType::PubAck);
    }
}
