//! Handshake and push-notification payload types.

pub mod capabilities;
pub mod notification;

pub use capabilities::*;
pub use notification::*;
