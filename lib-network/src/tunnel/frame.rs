//! Tunnel wire framing (spec §4.J): every message carried over a tunnel's
//! outer WebSocket is `opcode || body`. Two opcodes are defined; any other
//! byte is a protocol violation, not a point for future extension.

use thiserror::Error;

pub const OPCODE_RPC: u8 = 0x0c;
pub const OPCODE_DATACHANNEL: u8 = 0x0d;

pub const FRAMETYPE_TEXT: u8 = 0x01;
pub const FRAMETYPE_BINARY: u8 = 0x02;

/// A per-socket quasi-unique id: 6 random bytes minted by whichever side
/// opens a datachannel, carried on every frame for that channel so the
/// other end can demultiplex it back to the right local connection.
pub type Quid = [u8; 6];

pub fn random_quid() -> Quid {
    lib_crypto::random::random_quid()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty tunnel frame")]
    Empty,
    #[error("unknown tunnel opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("datachannel frame too short: need at least opcode + frametype + quid")]
    DatachannelTooShort,
    #[error("unknown datachannel frametype {0:#04x}")]
    UnknownFrametype(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatachannelType {
    Text,
    Binary,
}

impl DatachannelType {
    fn to_byte(&self) -> u8 {
        match self {
            DatachannelType::Text => FRAMETYPE_TEXT,
            DatachannelType::Binary => FRAMETYPE_BINARY,
        }
    }

    fn from_byte(b: u8) -> Result<Self, FrameError> {
        match b {
            FRAMETYPE_TEXT => Ok(DatachannelType::Text),
            FRAMETYPE_BINARY => Ok(DatachannelType::Binary),
            other => Err(FrameError::UnknownFrametype(other)),
        }
    }
}

/// A parsed tunnel frame, one level down from the raw WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelFrame {
    /// A JSON-RPC 2.0 request or response, serialized as the raw body.
    Rpc(Vec<u8>),
    /// A slice of an application-level byte/text stream multiplexed over
    /// this tunnel, tagged with the channel it belongs to.
    Datachannel {
        quid: Quid,
        kind: DatachannelType,
        payload: Vec<u8>,
    },
}

impl TunnelFrame {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            TunnelFrame::Rpc(body) => {
                let mut out = Vec::with_capacity(1 + body.len());
                out.push(OPCODE_RPC);
                out.extend_from_slice(body);
                out
            }
            TunnelFrame::Datachannel { quid, kind, payload } => {
                let mut out = Vec::with_capacity(1 + 1 + 6 + payload.len());
                out.push(OPCODE_DATACHANNEL);
                out.push(kind.to_byte());
                out.extend_from_slice(quid);
                out.extend_from_slice(payload);
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let (opcode, rest) = bytes.split_first().ok_or(FrameError::Empty)?;
        match *opcode {
            OPCODE_RPC => Ok(TunnelFrame::Rpc(rest.to_vec())),
            OPCODE_DATACHANNEL => {
                if rest.len() < 1 + 6 {
                    return Err(FrameError::DatachannelTooShort);
                }
                let kind = DatachannelType::from_byte(rest[0])?;
                let mut quid = [0u8; 6];
                quid.copy_from_slice(&rest[1..7]);
                let payload = rest[7..].to_vec();
                Ok(TunnelFrame::Datachannel { quid, kind, payload })
            }
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_frame_roundtrips() {
        let frame = TunnelFrame::Rpc(br#"{"jsonrpc":"2.0"}"#.to_vec());
        let encoded = frame.encode();
        assert_eq!(encoded[0], OPCODE_RPC);
        assert_eq!(TunnelFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn datachannel_frame_roundtrips_with_quid() {
        let quid = random_quid();
        let frame = TunnelFrame::Datachannel {
            quid,
            kind: DatachannelType::Binary,
            payload: vec![1, 2, 3, 4],
        };
        let encoded = frame.encode();
        assert_eq!(encoded[0], OPCODE_DATACHANNEL);
        assert_eq!(TunnelFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let err = TunnelFrame::decode(&[0xff, 1, 2, 3]).unwrap_err();
        assert_eq!(err, FrameError::UnknownOpcode(0xff));
    }

    #[test]
    fn empty_frame_is_rejected() {
        assert_eq!(TunnelFrame::decode(&[]).unwrap_err(), FrameError::Empty);
    }

    #[test]
    fn short_datachannel_frame_is_rejected() {
        let err = TunnelFrame::decode(&[OPCODE_DATACHANNEL, FRAMETYPE_TEXT, 1, 2]).unwrap_err();
        assert_eq!(err, FrameError::DatachannelTooShort);
    }

    #[test]
    fn unknown_frametype_is_rejected() {
        let mut bytes = vec![OPCODE_DATACHANNEL, 0x09];
        bytes.extend_from_slice(&[0u8; 6]);
        let err = TunnelFrame::decode(&bytes).unwrap_err();
        assert_eq!(err, FrameError::UnknownFrametype(0x09));
    }
}
