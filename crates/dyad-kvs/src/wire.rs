//! Request bodies of the networked store.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use dyad_types::{make_error_msg, ParticipantId, Result, Status, StatusCode};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Service id of the broker's key-value and directory service.
pub const BROKER_SERVICE_ID: u16 = 1;

/// Service id under which a participant hosts its topic handlers.
pub const TOPIC_SERVICE_ID: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum BrokerMethod {
    Commit = 1,
    Lookup = 2,
    Register = 3,
    Resolve = 4,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReq {
    pub namespace: String,
    pub key: String,
    /// Base64 of the value bytes.
    pub value: String,
}

impl CommitReq {
    pub fn new(namespace: &str, key: &str, value: &[u8]) -> Self {
        Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value: STANDARD.encode(value),
        }
    }

    pub fn value_bytes(&self) -> Result<Bytes> {
        STANDARD
            .decode(&self.value)
            .map(Bytes::from)
            .map_err(|e| Status::with_message(StatusCode::INVALID_FORMAT, e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupReq {
    pub namespace: String,
    pub key: String,
    pub wait_for_create: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterReq {
    pub rank: ParticipantId,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveReq {
    pub rank: ParticipantId,
}

pub fn to_json<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| Status::with_message(StatusCode::SERDE_INVALID_JSON, e.to_string()))
}

pub fn from_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| Status::with_message(StatusCode::SERDE_INVALID_JSON, e.to_string()))
}

/// `[sender u32][topic_len u16][topic][payload]`, little-endian.
pub fn encode_call(sender: ParticipantId, topic: &str, payload: &[u8]) -> Result<Bytes> {
    let topic_len = u16::try_from(topic.len()).map_err(|_| {
        Status::with_message(
            StatusCode::INVALID_ARG,
            format!("topic of {} bytes does not fit the call header", topic.len()),
        )
    })?;
    let mut buf = BytesMut::with_capacity(6 + topic.len() + payload.len());
    buf.put_u32_le(sender.0);
    buf.put_u16_le(topic_len);
    buf.put_slice(topic.as_bytes());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

pub fn decode_call(mut body: Bytes) -> Result<(ParticipantId, String, Bytes)> {
    if body.len() < 6 {
        return make_error_msg(StatusCode::INVALID_FORMAT, "call body too short");
    }
    let sender = ParticipantId(body.get_u32_le());
    let topic_len = body.get_u16_le() as usize;
    if body.len() < topic_len {
        return make_error_msg(StatusCode::INVALID_FORMAT, "call topic truncated");
    }
    let topic = body.split_to(topic_len);
    let topic = String::from_utf8(topic.to_vec())
        .map_err(|_| Status::with_message(StatusCode::INVALID_FORMAT, "call topic is not utf-8"))?;
    Ok((sender, topic, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_body() {
        let body = encode_call(ParticipantId(7), "dyad.fetch", b"{\"path\":\"a\"}").unwrap();
        let (sender, topic, payload) = decode_call(body).unwrap();
        assert_eq!(sender, ParticipantId(7));
        assert_eq!(topic, "dyad.fetch");
        assert_eq!(&payload[..], b"{\"path\":\"a\"}");
    }

    #[test]
    fn test_call_body_truncated() {
        assert!(decode_call(Bytes::from_static(&[1, 0, 0])).is_err());
        let mut body = encode_call(ParticipantId(1), "topic", b"").unwrap().to_vec();
        body.truncate(8);
        let err = decode_call(Bytes::from(body)).unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_FORMAT);
    }

    #[test]
    fn test_call_topic_too_long() {
        let topic = "t".repeat(u16::MAX as usize + 1);
        let err = encode_call(ParticipantId(1), &topic, b"").unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_ARG);

        let longest = "t".repeat(u16::MAX as usize);
        let (_, decoded, _) = decode_call(encode_call(ParticipantId(1), &longest, b"x").unwrap()).unwrap();
        assert_eq!(decoded.len(), u16::MAX as usize);
    }

    #[test]
    fn test_commit_value_is_binary_safe() {
        let req = CommitReq::new("ns", "k", &[0, 255, 10]);
        let parsed: CommitReq = from_json(&to_json(&req).unwrap()).unwrap();
        assert_eq!(&parsed.value_bytes().unwrap()[..], &[0, 255, 10]);
    }

    #[test]
    fn test_broker_method() {
        assert_eq!(BrokerMethod::try_from(2u16).unwrap(), BrokerMethod::Lookup);
        assert!(BrokerMethod::try_from(9u16).is_err());
        assert_eq!(u16::from(BrokerMethod::Resolve), 4);
    }
}
