//! Message-framed socket primitives with ROUTER/DEALER semantics.

pub mod socket;

pub use socket::{DealerSocket, Identity, RouterSocket};
