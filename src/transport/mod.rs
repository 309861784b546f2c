//! Frame-protocol TCP transport.

pub mod client;
mod envelope;
pub mod frame;
pub mod server;

pub use client::ClientWorker;
pub use envelope::{FrameHeader, FrameMethod, FrameStatus};
pub use frame::ControlFrame;
pub use server::{DispatchHandler, ServerWorker};
