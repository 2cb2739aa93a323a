//! Client side of the Bio-Formats bridge protocol.
//!
//! - [`codec`] - JSON request/response messages
//! - [`transport`] - one-shot TCP exchange with adaptive read timeouts
//! - [`client`] - `properties` and `convert` calls with their timeout policy
//! - [`cache`] - per-file memoization of metadata responses

pub mod cache;
pub mod client;
pub mod codec;
pub mod transport;

pub use cache::{resolve_key, MetadataCache};
pub use client::{BridgeClient, ConvertOptions, Timeouts};
pub use codec::{
    decode, encode, has_error, BridgeCompression, BridgeRequest, BridgeResponse, ConvertRequest,
    PropertiesRequest,
};
pub use transport::{SocketTransport, Transport, FOLLOW_UP_TIMEOUT, READ_BUFFER_SIZE};
