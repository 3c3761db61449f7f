//! Bluetooth Module
//!
//! Device inquiry and endpoint (service) search over a callback-driven stack.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  DiscoveryCoordinator                    │
//! │   (blocking API: discover_devices / discover_endpoints)  │
//! └──────────────┬──────────────────────────▲───────────────┘
//!                │ start_inquiry /          │ EventSink
//!                │ search_services          │ (found / terminal events)
//!                ▼                          │
//! ┌─────────────────────────────────────────┴───────────────┐
//! │                    DiscoveryAgent                        │
//! │     (radio stack, or SimulatedRadio for demo/tests)      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`stack`] - Contract the radio stack implements
//! - [`discovery`] - Callback-to-blocking coordinator and its event sink
//! - [`simulated`] - Scenario-driven stand-in for a real stack

pub mod discovery;
pub mod simulated;
pub mod stack;

pub use discovery::{DiscoveryCoordinator, DiscoveryOptions, EventSink, SearchOutcome};
pub use simulated::{Scenario, SimulatedRadio};
pub use stack::{AccessCode, DiscoveryAgent, TransactionId};
