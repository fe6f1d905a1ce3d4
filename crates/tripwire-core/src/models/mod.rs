//! Data models for Tripwire

mod alert;
mod notification;
mod threshold;

pub use alert::*;
pub use notification::*;
pub use threshold::*;
