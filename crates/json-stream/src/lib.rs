//! Incremental decoding of concatenated JSON values.
//!
//! Long-lived HTTP streaming APIs (such as the Icinga 2 event stream) send an
//! unbounded body of JSON objects written back to back, optionally separated
//! by newlines. Network reads split those objects at arbitrary points.
//! [`JsonStreamCodec`] buffers the partial input and yields each top-level
//! value once it is complete.
//!
//! ```
//! use bytes::BytesMut;
//! use json_stream::JsonStreamCodec;
//! use tokio_util::codec::Decoder;
//!
//! let mut codec = JsonStreamCodec::new();
//! let mut buf = BytesMut::from(&b"{\"a\":1}{\"b\""[..]);
//!
//! assert!(codec.decode(&mut buf).unwrap().is_some());
//! assert!(codec.decode(&mut buf).unwrap().is_none());
//!
//! buf.extend_from_slice(b":2}");
//! assert_eq!(codec.decode(&mut buf).unwrap().unwrap()["b"], 2);
//! ```

pub mod codec;
pub mod error;

pub use crate::{codec::JsonStreamCodec, error::JsonStreamError};
