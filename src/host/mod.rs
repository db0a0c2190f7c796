//! Host integration: the JSON request contract and the stdio bridge that
//! drives a streaming run from a parent process.

pub mod contract;
pub mod stdio;

pub use contract::BridgeRequest;
pub use stdio::{BridgeError, read_request, run_bridge};
