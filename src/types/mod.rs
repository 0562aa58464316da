//! Core types for Eventide.

pub mod event;
pub mod invoke;
pub mod message;
pub mod session;
pub mod timestamp;

pub use event::*;
pub use invoke::*;
pub use message::*;
pub use session::*;
