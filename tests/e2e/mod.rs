//! E2E tests for rubix-harness.
//!
//! These tests run the real orchestration stack (gateway, lifecycle,
//! provisioning and scenarios) against a fake node binary.
//!
//! ## Architecture
//!
//! ```text
//! Harness
//!     ├── quorum group (nodes 0-4, primary family)
//!     ├── scenario nodes (registry key per scenario)
//!     └── FakeNetwork
//!             ├── shell script standing in for rubixgoplatform
//!             └── readiness listeners, one per node
//! ```

#![cfg(unix)]

mod fixture;

#[cfg(test)]
mod scenarios;

pub use fixture::{FakeNetwork, UNITS_PER_RBT};
