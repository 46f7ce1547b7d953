pub mod analyzer;
pub mod backend;
pub mod config;
pub mod dsp;
pub mod progress;
pub mod signal;
pub mod speech;

/// Application name for XDG paths
pub const APP_NAME: &str = "tunescope";
