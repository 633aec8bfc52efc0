//! Built-in plugins shipped with the Sibyl framework.
//!
//! | Plugin | Commands |
//! |--------|----------|
//! | [`CORE_PLUGIN`] | `help`, `which`, `alias`, `trigger`, `die` |
//!
//! The runtime registers [`CORE_PLUGIN`] before any user plugin, so its
//! names win every collision report.

pub mod core;

pub use self::core::CORE_PLUGIN;
