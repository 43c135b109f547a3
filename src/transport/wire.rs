use crate::core::ObjectId;
use crate::error::{DriverError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const REQUEST_HEADER_SIZE: usize = 20;
pub const RESPONSE_HEADER_SIZE: usize = 8;
pub const STATUS_OK: u32 = 0;

/// Session identifier handed out by `KernelTransport::open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// User-client operation selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    StartHardware = 1,
    StopHardware = 2,
    SetSampleRate = 3,
    GetControlValue = 4,
    SetControlValue = 5,
    GetProperty = 6,
    SetProperty = 7,
    AddStream = 8,
    GetZeroTimestamp = 9,
}

impl Opcode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        use Opcode::*;

        Some(match raw {
            1 => StartHardware,
            2 => StopHardware,
            3 => SetSampleRate,
            4 => GetControlValue,
            5 => SetControlValue,
            6 => GetProperty,
            7 => SetProperty,
            8 => AddStream,
            9 => GetZeroTimestamp,
            _ => return None,
        })
    }

    pub fn raw(self) -> u32 {
        self as u32
    }
}

/// One control message. The payload is a JSON body whose shape depends on
/// the opcode.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub target: ObjectId,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl TransportRequest {
    pub fn new(target: ObjectId, opcode: Opcode) -> Self {
        Self {
            target,
            opcode,
            payload: Vec::new(),
        }
    }

    pub fn with_body<T: Serialize>(target: ObjectId, opcode: Opcode, body: &T) -> Result<Self> {
        Ok(Self {
            target,
            opcode,
            payload: serde_json::to_vec(body)?,
        })
    }

    pub fn body<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// `{session u64, target u32, opcode u32, payload_len u32}` little endian,
    /// followed by the payload.
    pub fn encode(&self, session: SessionId) -> Vec<u8> {
        let mut frame = Vec::with_capacity(REQUEST_HEADER_SIZE + self.payload.len());
        frame.extend_from_slice(&session.0.to_le_bytes());
        frame.extend_from_slice(&self.target.raw().to_le_bytes());
        frame.extend_from_slice(&self.opcode.raw().to_le_bytes());
        frame.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }

    /// Parses a request frame. A declared payload above `max_payload` is
    /// rejected before the payload is looked at.
    pub fn decode(frame: &[u8], max_payload: usize) -> Result<(SessionId, Self)> {
        if frame.len() < REQUEST_HEADER_SIZE {
            return Err(DriverError::invalid_argument(format!(
                "request frame of {} bytes is shorter than its {} byte header",
                frame.len(),
                REQUEST_HEADER_SIZE
            )));
        }

        let session = SessionId(read_u64(frame, 0));
        let target = ObjectId::new(read_u32(frame, 8));
        let raw_opcode = read_u32(frame, 12);
        let payload_len = read_u32(frame, 16) as usize;

        if payload_len > max_payload {
            return Err(DriverError::MessageTooLarge {
                size: payload_len,
                limit: max_payload,
            });
        }
        let payload = &frame[REQUEST_HEADER_SIZE..];
        if payload.len() != payload_len {
            return Err(DriverError::invalid_argument(format!(
                "header declares {} payload bytes, frame carries {}",
                payload_len,
                payload.len()
            )));
        }
        let opcode = Opcode::from_raw(raw_opcode)
            .ok_or_else(|| DriverError::invalid_argument(format!("unknown opcode {}", raw_opcode)))?;

        Ok((
            session,
            Self {
                target,
                opcode,
                payload: payload.to_vec(),
            },
        ))
    }
}

/// `{status u32, payload_len u32}` + payload. On failure the payload is the
/// error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u32,
    pub payload: Vec<u8>,
}

impl TransportResponse {
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            status: STATUS_OK,
            payload,
        }
    }

    pub fn error(err: &DriverError) -> Self {
        Self {
            status: err.status(),
            payload: err.to_string().into_bytes(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(RESPONSE_HEADER_SIZE + self.payload.len());
        frame.extend_from_slice(&self.status.to_le_bytes());
        frame.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < RESPONSE_HEADER_SIZE {
            return Err(DriverError::invalid_argument(format!(
                "response frame of {} bytes is truncated",
                frame.len()
            )));
        }
        let status = read_u32(frame, 0);
        let payload_len = read_u32(frame, 4) as usize;
        let payload = &frame[RESPONSE_HEADER_SIZE..];
        if payload.len() != payload_len {
            return Err(DriverError::invalid_argument(format!(
                "response declares {} payload bytes, frame carries {}",
                payload_len,
                payload.len()
            )));
        }
        Ok(Self {
            status,
            payload: payload.to_vec(),
        })
    }

    /// The payload on success, the decoded error otherwise.
    pub fn into_result(self) -> Result<Vec<u8>> {
        if self.is_ok() {
            Ok(self.payload)
        } else {
            let message = String::from_utf8_lossy(&self.payload).into_owned();
            Err(DriverError::from_status(self.status, message))
        }
    }

    pub fn body<T: DeserializeOwned>(self) -> Result<T> {
        let payload = self.into_result()?;
        Ok(serde_json::from_slice(&payload)?)
    }
}

fn read_u32(frame: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&frame[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(frame: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&frame[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}
