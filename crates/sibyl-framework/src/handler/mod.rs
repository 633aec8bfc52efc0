//! Command handlers as tower services.
//!
//! - [`traits`]: the [`CommandFn`] blanket trait and [`IntoReply`] return values
//! - [`service`]: [`CommandService`], the per-handler `tower::Service`
//! - [`builder`]: [`ContainLayer`] and the [`ServiceBuilderExt`] shorthand

pub mod builder;
pub mod service;
pub mod traits;

pub use builder::{ContainLayer, ContainService, ServiceBuilderExt, panic_message, run_contained};
pub use service::{CommandHandler, CommandRequest, CommandService, into_handler};
pub use traits::{CommandFn, IntoReply};
