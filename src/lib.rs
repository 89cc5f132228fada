//! Workspace umbrella crate.
//!
//! Re-exports [`core_service`] so host applications can depend on
//! `grove-workspace` and pick platform defaults through one feature set.

pub use core_service::*;
