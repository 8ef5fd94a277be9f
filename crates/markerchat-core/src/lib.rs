//! Pure building blocks for markerchat: the wire message model, the transcript
//! store, the marker gate, and session/endpoint identity.
//!
//! Nothing here performs I/O. Transport and role orchestration live in
//! `markerchat-client`.

pub mod endpoint;
pub mod frames;
pub mod gate;
pub mod message;
pub mod session;
pub mod transcript;
