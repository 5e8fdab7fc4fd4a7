//! Courier core: wire envelopes, error taxonomy, and the codec boundary
//! shared by the RPC client and server.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod params;

pub use codec::{from_value, to_value, Codec, CodecError, MsgPackCodec};
pub use envelope::{RequestEnvelope, ResponseEnvelope};
pub use error::{ErrorKind, ErrorPayload, RpcError};
pub use params::{validate_arguments, ParamSpec, ValueKind};
