//! icinga-relay library crate.
//!
//! Subscribes to the Icinga 2 event stream, enriches and routes the decoded
//! state changes, and delivers them to output channels.

pub mod app;
pub mod bus;
pub mod channels;
pub mod config;
pub mod downtime;
pub mod enrichment;
pub mod error;
pub mod icinga;
pub mod logging;
pub mod model;
pub mod router;
pub mod server;
pub mod status;

pub use error::{Error, Result};
