//! # ponder-core
//!
//! Foundation types shared by every Ponder crate:
//!
//! - **Branded IDs**: [`ids::SessionId`] newtype over a UUID v7 string
//! - **Text**: grapheme-safe byte-budget truncation and sentence counting ([`text`])
//! - **Clock**: [`clock::Clock`] with system and manual implementations
//! - **Logging**: [`logging::init_subscriber`] for `tracing` output
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other ponder crates.

#![deny(unsafe_code)]

pub mod clock;
pub mod ids;
pub mod logging;
pub mod text;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::SessionId;
