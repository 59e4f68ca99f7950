//! SiteOps RPC: wire protocol for the SiteOps control server.
//!
//! Envelope types, error codes, newline framing, and the two-stage request
//! validator (envelope shape, then per-method parameter schema).

pub mod codec;
pub mod envelope;
pub mod error;
pub mod message;
pub mod schema;

pub use codec::{CodecError, MessageCodec, DEFAULT_MAX_MESSAGE_BYTES, DELIMITER};
pub use envelope::{validate_envelope, EnvelopeRejection};
pub use error::{app_error_codes, error_codes, ProtocolError, ProtocolResult};
pub use message::*;
pub use schema::{ParamSchema, PropertySchema, SchemaType};
