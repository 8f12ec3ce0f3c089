//! Typed MAC payload encode/decode. The 6-byte [`Header`] is
//! handled separately; this module covers what follows it.

use byteorder::{ByteOrder, LittleEndian};

use super::error::MacError;

/// Beacon payload flags.
pub const BEACON_SYNC: u8 = 1 << 0;
pub const BEACON_PERMIT_ATTACH: u8 = 1 << 1;

/// RegistrationRequest flags: bit 4 sleepy, low 4 bits heartbeat exponent.
pub const REG_FLAG_SLEEPY: u16 = 1 << 4;
const REG_FLAG_HEARTBEAT_MASK: u16 = 0x000F;

/// Registration status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegStatus {
    Success = 0,
    AccessDenied = 1,
    NetworkFull = 2,
    Shutdown = 3,
    Admin = 4,
    AddressInvalid = 5,
}

impl RegStatus {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => RegStatus::Success,
            1 => RegStatus::AccessDenied,
            2 => RegStatus::NetworkFull,
            3 => RegStatus::Shutdown,
            4 => RegStatus::Admin,
            5 => RegStatus::AddressInvalid,
            _ => return None,
        })
    }
}

/// Beacon payload: `uuid:u64, timestamp:u16, flags:u8, beacon_interval:u8,
/// address_list:u8[]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon<'a> {
    pub uuid: u64,
    pub timestamp: u16,
    pub sync: bool,
    pub permit_attach: bool,
    pub beacon_interval: u8,
    pub address_list: &'a [u8],
}

impl<'a> Beacon<'a> {
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u64(&mut buf[0..8], self.uuid);
        LittleEndian::write_u16(&mut buf[8..10], self.timestamp);
        let mut flags = 0u8;
        if self.sync {
            flags |= BEACON_SYNC;
        }
        if self.permit_attach {
            flags |= BEACON_PERMIT_ATTACH;
        }
        buf[10] = flags;
        buf[11] = self.beacon_interval;
        buf[12..12 + self.address_list.len()].copy_from_slice(self.address_list);
        12 + self.address_list.len()
    }

    pub fn decode<E>(buf: &'a [u8]) -> Result<Self, MacError<E>> {
        if buf.len() < 12 {
            return Err(MacError::Malformed);
        }
        let flags = buf[10];
        Ok(Self {
            uuid: LittleEndian::read_u64(&buf[0..8]),
            timestamp: LittleEndian::read_u16(&buf[8..10]),
            sync: flags & BEACON_SYNC != 0,
            permit_attach: flags & BEACON_PERMIT_ATTACH != 0,
            beacon_interval: buf[11],
            address_list: &buf[12..],
        })
    }
}

/// RegistrationRequest payload: `uuid:u64, flags:u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub uuid: u64,
    pub sleepy: bool,
    pub heartbeat_exp: u8,
}

impl RegistrationRequest {
    pub const LEN: usize = 10;

    pub fn new(uuid: u64, sleepy: bool, heartbeat_exp: u8) -> Self {
        Self {
            uuid,
            sleepy,
            heartbeat_exp,
        }
    }

    pub fn flags(&self) -> u16 {
        (if self.sleepy { REG_FLAG_SLEEPY } else { 0 })
            | (self.heartbeat_exp as u16 & REG_FLAG_HEARTBEAT_MASK)
    }

    pub fn encode(&self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u64(&mut buf[0..8], self.uuid);
        LittleEndian::write_u16(&mut buf[8..10], self.flags());
        Self::LEN
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, MacError<E>> {
        if buf.len() < Self::LEN {
            return Err(MacError::Malformed);
        }
        let flags = LittleEndian::read_u16(&buf[8..10]);
        Ok(Self {
            uuid: LittleEndian::read_u64(&buf[0..8]),
            sleepy: flags & REG_FLAG_SLEEPY != 0,
            heartbeat_exp: (flags & REG_FLAG_HEARTBEAT_MASK) as u8,
        })
    }
}

/// DeregistrationRequest payload: `uuid:u64, reason:u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeregistrationRequest {
    pub uuid: u64,
    pub reason: u8,
}

impl DeregistrationRequest {
    pub const LEN: usize = 9;

    pub fn encode(&self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u64(&mut buf[0..8], self.uuid);
        buf[8] = self.reason;
        Self::LEN
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, MacError<E>> {
        if buf.len() < Self::LEN {
            return Err(MacError::Malformed);
        }
        Ok(Self {
            uuid: LittleEndian::read_u64(&buf[0..8]),
            reason: buf[8],
        })
    }
}

/// RegistrationResponse payload: `uuid:u64, addr:u8, status:u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationResponse {
    pub uuid: u64,
    pub addr: u8,
    pub status: u8,
}

impl RegistrationResponse {
    pub const LEN: usize = 10;

    pub fn new(uuid: u64, addr: u8, status: RegStatus) -> Self {
        Self {
            uuid,
            addr,
            status: status as u8,
        }
    }

    pub fn status(&self) -> Option<RegStatus> {
        RegStatus::from_u8(self.status)
    }

    pub fn encode(&self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u64(&mut buf[0..8], self.uuid);
        buf[8] = self.addr;
        buf[9] = self.status;
        Self::LEN
    }

    pub fn decode<E>(buf: &[u8]) -> Result<Self, MacError<E>> {
        if buf.len() < Self::LEN {
            return Err(MacError::Malformed);
        }
        Ok(Self {
            uuid: LittleEndian::read_u64(&buf[0..8]),
            addr: buf[8],
            status: buf[9],
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn beacon_round_trip() {
        let addrs = [0x03u8, 0x07];
        let b = Beacon {
            uuid: 0x0123456789ABCDEF,
            timestamp: 42,
            sync: true,
            permit_attach: true,
            beacon_interval: 3,
            address_list: &addrs,
        };
        let mut buf = [0u8; 32];
        let n = b.encode(&mut buf);
        let d: Beacon = Beacon::decode::<()>(&buf[..n]).unwrap();
        assert_eq!(d, b);
    }

    #[test]
    fn registration_request_flags() {
        let r = RegistrationRequest::new(0x42, true, 5);
        assert_eq!(r.flags(), REG_FLAG_SLEEPY | 5);
        let mut buf = [0u8; RegistrationRequest::LEN];
        r.encode(&mut buf);
        let d = RegistrationRequest::decode::<()>(&buf).unwrap();
        assert_eq!(d, r);
    }

    #[test]
    fn registration_response_round_trip() {
        let r = RegistrationResponse::new(0x42, 0x01, RegStatus::Success);
        let mut buf = [0u8; RegistrationResponse::LEN];
        r.encode(&mut buf);
        let d = RegistrationResponse::decode::<()>(&buf).unwrap();
        assert_eq!(d, r);
        assert_eq!(d.status(), Some(RegStatus::Success));
    }

    #[test]
    fn short_payload_rejected() {
        let buf = [0u8; 2];
        assert_eq!(
            RegistrationRequest::decode::<()>(&buf),
            Err(MacError::Malformed)
        );
    }
}
