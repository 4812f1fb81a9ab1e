//! Session layer
//!
//! Authorization handshake and the single authorized recording service.

pub mod controller;
pub mod service;

pub use controller::{Authorized, SessionController};
pub use service::{RecordingService, ServiceRegistry};
