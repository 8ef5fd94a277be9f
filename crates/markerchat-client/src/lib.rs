//! Async clients for markerchat: the WebSocket connection manager, the display
//! and mobile role drivers, and their terminal front ends.

pub mod config;
pub mod connection;
pub mod console;
pub mod driver;
pub mod frames;
pub mod tui;
