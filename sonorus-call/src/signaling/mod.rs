//! Typed call signaling over an abstract pub/sub bus.

pub mod bus;
pub mod channel;
pub mod local;
pub mod message;

pub use bus::{BusError, BusSubscription, SignalBus};
pub use channel::{SignalChannel, SignalSender};
pub use local::LocalBus;
pub use message::{IceCandidateInit, SdpKind, SessionDescription, SignalMessage};
