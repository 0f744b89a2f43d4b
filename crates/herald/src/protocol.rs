//! Binary framing protocol between Herald and the chat gateway.
//!
//! The gateway is a sidecar that owns the actual chat network connection.
//! All frames use little-endian byte order.
//!
//! ```text
//! [4: total_len][1: type][1: flags][2: reserved][fields...]
//! field := [4: len][N: bytes]
//! ```

use crate::error::{HeraldError, HeraldResult};
use crate::session::SessionState;

/// Login request (jid, password, recipient).
pub const FRAME_TYPE_LOGIN: u8 = 0x01;

/// Outbound chat message (to, kind, body).
pub const FRAME_TYPE_MESSAGE: u8 = 0x02;

/// Outbound image attachment (to, mime, bytes).
pub const FRAME_TYPE_IMAGE: u8 = 0x03;

/// Logout request.
pub const FRAME_TYPE_LOGOUT: u8 = 0x04;

/// Session status report from the gateway (state byte, detail).
pub const FRAME_TYPE_STATUS: u8 = 0x11;

/// Inbound chat message from the gateway (from, kind, body).
pub const FRAME_TYPE_INBOUND: u8 = 0x12;

/// Upper bound on a single frame; anything larger is treated as corruption.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const HEADER_SIZE: usize = 1 + 1 + 2;

/// A gateway protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Login {
        jid: String,
        password: String,
        recipient: String,
    },
    Message {
        to: String,
        kind: String,
        body: String,
    },
    Image {
        to: String,
        mime: String,
        data: Vec<u8>,
    },
    Logout,
    Status {
        state: SessionState,
        detail: String,
    },
    Inbound {
        from: String,
        kind: String,
        body: String,
    },
}

impl Frame {
    /// Wire type byte for this frame.
    pub fn frame_type(&self) -> u8 {
        match self {
            Frame::Login { .. } => FRAME_TYPE_LOGIN,
            Frame::Message { .. } => FRAME_TYPE_MESSAGE,
            Frame::Image { .. } => FRAME_TYPE_IMAGE,
            Frame::Logout => FRAME_TYPE_LOGOUT,
            Frame::Status { .. } => FRAME_TYPE_STATUS,
            Frame::Inbound { .. } => FRAME_TYPE_INBOUND,
        }
    }

    /// Encode the frame to bytes (including length prefix).
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(64);

        // Frame type, flags, reserved
        body.push(self.frame_type());
        body.push(0);
        body.extend_from_slice(&[0u8, 0u8]);

        match self {
            Frame::Login {
                jid,
                password,
                recipient,
            } => {
                put_field(&mut body, jid.as_bytes());
                put_field(&mut body, password.as_bytes());
                put_field(&mut body, recipient.as_bytes());
            }
            Frame::Message { to, kind, body: text } => {
                put_field(&mut body, to.as_bytes());
                put_field(&mut body, kind.as_bytes());
                put_field(&mut body, text.as_bytes());
            }
            Frame::Image { to, mime, data } => {
                put_field(&mut body, to.as_bytes());
                put_field(&mut body, mime.as_bytes());
                put_field(&mut body, data);
            }
            Frame::Logout => {}
            Frame::Status { state, detail } => {
                put_field(&mut body, &[state_to_byte(*state)]);
                put_field(&mut body, detail.as_bytes());
            }
            Frame::Inbound {
                from,
                kind,
                body: text,
            } => {
                put_field(&mut body, from.as_bytes());
                put_field(&mut body, kind.as_bytes());
                put_field(&mut body, text.as_bytes());
            }
        }

        let mut buf = Vec::with_capacity(4 + body.len());
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        buf
    }

    /// Size of the frame body as announced in the length prefix.
    pub fn body_len(&self) -> usize {
        let fields = match self {
            Frame::Login {
                jid,
                password,
                recipient,
            } => vec![jid.len(), password.len(), recipient.len()],
            Frame::Message { to, kind, body } => vec![to.len(), kind.len(), body.len()],
            Frame::Image { to, mime, data } => vec![to.len(), mime.len(), data.len()],
            Frame::Logout => vec![],
            Frame::Status { detail, .. } => vec![1, detail.len()],
            Frame::Inbound { from, kind, body } => vec![from.len(), kind.len(), body.len()],
        };
        HEADER_SIZE + fields.iter().map(|len| 4 + len).sum::<usize>()
    }

    /// Decode a frame from bytes (excluding length prefix).
    pub fn decode(data: &[u8]) -> HeraldResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(HeraldError::Protocol(format!(
                "Frame too short: {} bytes, need at least {}",
                data.len(),
                HEADER_SIZE
            )));
        }

        let frame_type = data[0];
        // Flags at [1] and reserved bytes at [2..4] are ignored
        let mut fields = FieldReader::new(&data[HEADER_SIZE..]);

        let frame = match frame_type {
            FRAME_TYPE_LOGIN => Frame::Login {
                jid: fields.string()?,
                password: fields.string()?,
                recipient: fields.string()?,
            },
            FRAME_TYPE_MESSAGE => Frame::Message {
                to: fields.string()?,
                kind: fields.string()?,
                body: fields.string()?,
            },
            FRAME_TYPE_IMAGE => Frame::Image {
                to: fields.string()?,
                mime: fields.string()?,
                data: fields.bytes()?.to_vec(),
            },
            FRAME_TYPE_LOGOUT => Frame::Logout,
            FRAME_TYPE_STATUS => {
                let state = match fields.bytes()? {
                    [byte] => state_from_byte(*byte)?,
                    other => {
                        return Err(HeraldError::Protocol(format!(
                            "Status field must be 1 byte, got {}",
                            other.len()
                        )))
                    }
                };
                Frame::Status {
                    state,
                    detail: fields.string()?,
                }
            }
            FRAME_TYPE_INBOUND => Frame::Inbound {
                from: fields.string()?,
                kind: fields.string()?,
                body: fields.string()?,
            },
            other => {
                return Err(HeraldError::Protocol(format!(
                    "Unknown frame type: {:#04x}",
                    other
                )))
            }
        };

        if !fields.is_empty() {
            return Err(HeraldError::Protocol(format!(
                "Trailing bytes after frame type {:#04x}",
                frame_type
            )));
        }

        Ok(frame)
    }
}

fn put_field(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u32).to_le_bytes());
    buf.extend_from_slice(field);
}

fn state_to_byte(state: SessionState) -> u8 {
    match state {
        SessionState::Disconnected => 0,
        SessionState::Connecting => 1,
        SessionState::Connected => 2,
        SessionState::Failed => 3,
    }
}

fn state_from_byte(byte: u8) -> HeraldResult<SessionState> {
    match byte {
        0 => Ok(SessionState::Disconnected),
        1 => Ok(SessionState::Connecting),
        2 => Ok(SessionState::Connected),
        3 => Ok(SessionState::Failed),
        other => Err(HeraldError::Protocol(format!(
            "Unknown session state byte: {:#04x}",
            other
        ))),
    }
}

struct FieldReader<'a> {
    data: &'a [u8],
}

impl<'a> FieldReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn bytes(&mut self) -> HeraldResult<&'a [u8]> {
        if self.data.len() < 4 {
            return Err(HeraldError::Protocol("Truncated field length".to_string()));
        }
        let len = u32::from_le_bytes(
            self.data[0..4]
                .try_into()
                .map_err(|_| HeraldError::Protocol("Invalid field length".to_string()))?,
        ) as usize;

        if self.data.len() < 4 + len {
            return Err(HeraldError::Protocol(format!(
                "Field length {} exceeds remaining {} bytes",
                len,
                self.data.len() - 4
            )));
        }

        let (field, rest) = self.data[4..].split_at(len);
        self.data = rest;
        Ok(field)
    }

    fn string(&mut self) -> HeraldResult<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| HeraldError::Protocol(format!("Field is not valid UTF-8: {}", e)))
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Read a length-prefixed frame from a buffer.
///
/// Returns `None` if there isn't enough data for a complete frame.
/// Returns `Some((frame_data, consumed))` with the frame data (excluding length prefix)
/// and the total bytes consumed.
pub fn read_frame(buf: &[u8]) -> Option<(&[u8], usize)> {
    if buf.len() < 4 {
        return None;
    }

    let len = u32::from_le_bytes(buf[0..4].try_into().ok()?) as usize;

    if buf.len() < 4 + len {
        return None;
    }

    Some((&buf[4..4 + len], 4 + len))
}

/// Length announced by the prefix at the start of `buf`, if present.
pub fn announced_len(buf: &[u8]) -> Option<usize> {
    let prefix: [u8; 4] = buf.get(0..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(prefix) as usize)
}
