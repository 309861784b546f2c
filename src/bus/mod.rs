//! Pub/sub message bus.

mod broker;
mod envelope;
mod manager;
mod waiter;

pub use broker::{Broker, LocalBroker};
pub use envelope::{Envelope, ResponseStatus};
pub use manager::{ServiceManager, ServiceState};
pub use waiter::ResponseWaiter;
