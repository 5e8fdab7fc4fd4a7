//! Codec boundary: envelopes to and from opaque byte buffers.
//!
//! The transport treats payloads as opaque; only implementations of
//! [`Codec`] know the byte layout. The default is named `MsgPack`, the
//! same convention the rest of the workspace uses for wire data.

use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::envelope::{RequestEnvelope, ResponseEnvelope};

/// Failure at the codec boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Pluggable wire codec.
///
/// Implementations must round-trip every envelope field losslessly,
/// including polymorphic error payloads.
pub trait Codec: Send + Sync {
    /// Encodes a request envelope into an opaque byte buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] when the envelope cannot be
    /// serialized.
    fn encode_request(&self, request: &RequestEnvelope) -> Result<Vec<u8>, CodecError>;

    /// Decodes a request envelope from an opaque byte buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] when the bytes are not a valid
    /// request envelope.
    fn decode_request(&self, bytes: &[u8]) -> Result<RequestEnvelope, CodecError>;

    /// Encodes a response envelope into an opaque byte buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] when the envelope cannot be
    /// serialized.
    fn encode_response(&self, response: &ResponseEnvelope) -> Result<Vec<u8>, CodecError>;

    /// Decodes a response envelope from an opaque byte buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] when the bytes are not a valid
    /// response envelope.
    fn decode_response(&self, bytes: &[u8]) -> Result<ResponseEnvelope, CodecError>;
}

/// Default codec: named `MsgPack` maps via `rmp_serde::to_vec_named()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn encode_request(&self, request: &RequestEnvelope) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(request).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode_request(&self, bytes: &[u8]) -> Result<RequestEnvelope, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn encode_response(&self, response: &ResponseEnvelope) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(response).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<ResponseEnvelope, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Marshals a typed value into the opaque argument/return representation.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] when the value cannot be represented.
pub fn to_value<T: Serialize>(value: &T) -> Result<Value, CodecError> {
    rmpv::ext::to_value(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Coerces an opaque value into a concrete type.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] when the value does not fit the target
/// type.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, CodecError> {
    rmpv::ext::from_value(value).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use uuid::Uuid;

    use crate::error::{ErrorKind, ErrorPayload};

    use super::*;

    #[test]
    fn request_round_trips() {
        let codec = MsgPackCodec;
        let req = RequestEnvelope::new(
            "calc",
            "add",
            vec![Value::from(2), Value::from(40), Value::from("note")],
        );
        let bytes = codec.encode_request(&req).unwrap();
        assert_eq!(codec.decode_request(&bytes).unwrap(), req);
    }

    #[test]
    fn success_response_round_trips() {
        let codec = MsgPackCodec;
        let resp = ResponseEnvelope::ok(Uuid::new_v4(), Value::from(42));
        let bytes = codec.encode_response(&resp).unwrap();
        assert_eq!(codec.decode_response(&bytes).unwrap(), resp);
    }

    #[test]
    fn error_response_round_trips_with_kind() {
        let codec = MsgPackCodec;
        let resp = ResponseEnvelope::error(
            Uuid::new_v4(),
            ErrorPayload::new(ErrorKind::InvocationFailure, "boom"),
        );
        let bytes = codec.encode_response(&resp).unwrap();
        let back = codec.decode_response(&bytes).unwrap();
        assert_eq!(back, resp);
        assert_eq!(back.error.unwrap().kind, ErrorKind::InvocationFailure);
    }

    #[test]
    fn decode_rejects_garbage() {
        let codec = MsgPackCodec;
        assert!(codec.decode_request(&[0xc1, 0xff, 0x00]).is_err());
    }

    #[test]
    fn value_helpers_coerce_structs() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Dto {
            n: i32,
            s: String,
        }
        let dto = Dto {
            n: 7,
            s: "hi".into(),
        };
        let value = to_value(&dto).unwrap();
        assert!(matches!(value, Value::Map(_)));
        assert_eq!(from_value::<Dto>(value).unwrap(), dto);
    }

    #[test]
    fn from_value_reports_type_mismatch() {
        let err = from_value::<i32>(Value::from("text")).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    proptest! {
        // Round-trip law: decode(encode(v)) == v for any encodable envelope.
        #[test]
        fn request_round_trip_law(
            service in "[a-z][a-z0-9._-]{0,15}",
            method in "[a-z][a-z0-9_]{0,15}",
            ints in proptest::collection::vec(any::<i64>(), 0..4),
            text in ".{0,32}",
        ) {
            let codec = MsgPackCodec;
            let mut args: Vec<Value> = ints.into_iter().map(Value::from).collect();
            args.push(Value::from(text));
            let req = RequestEnvelope::new(service, method, args);
            let bytes = codec.encode_request(&req).unwrap();
            prop_assert_eq!(codec.decode_request(&bytes).unwrap(), req);
        }

        #[test]
        fn response_round_trip_law(value in any::<i64>(), message in ".{0,32}") {
            let codec = MsgPackCodec;
            let ok = ResponseEnvelope::ok(Uuid::new_v4(), Value::from(value));
            prop_assert_eq!(
                codec.decode_response(&codec.encode_response(&ok).unwrap()).unwrap(),
                ok
            );
            let err = ResponseEnvelope::error(
                Uuid::new_v4(),
                ErrorPayload::new(ErrorKind::ArgumentMismatch, message),
            );
            prop_assert_eq!(
                codec.decode_response(&codec.encode_response(&err).unwrap()).unwrap(),
                err
            );
        }
    }
}
