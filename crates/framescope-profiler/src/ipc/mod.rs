//! Streaming collated frames to out-of-process viewers.
//!
//! Messages are bincode payloads behind a little-endian `u32` length prefix.

pub mod protocol;
pub mod server;

pub use server::IpcServer;
