//! In-process event bus used to hand cancellation outcomes to the
//! notification dispatcher.
//!
//! - [`EventBus`] -- publish/subscribe hub backed by `tokio::sync::broadcast`.
//! - [`PlatformEvent`] -- the event envelope.
//! - [`NotificationRelay`] -- forwards events to the notification dispatcher.
//!
//! Delivery (email, push) happens in whichever service subscribes; this
//! crate only fans events out.

pub mod bus;
pub mod relay;

pub use bus::{EventBus, PlatformEvent};
pub use relay::NotificationRelay;
