//! Price feed runner
//!
//! Loads the feed configuration and a chain snapshot, fetches every source
//! and derives one publish plan per asset.

pub mod logging;
pub mod runner;
pub mod settings;

pub use runner::{derive_cycle, run_cycle, CycleOutput};
pub use settings::NodeSettings;
