//! Host platforms: where the tree, the store and the timers come from.

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "browser")]
pub mod browser;
