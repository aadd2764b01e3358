pub mod actor;
pub mod handler;
pub mod protocol;

pub use crate::fanout::{ConnectionId, ConnectionSender};
