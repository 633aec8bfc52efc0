//! Command names, tokenization and the layered registry.

pub mod alias;
pub mod registry;
pub mod split;

pub use alias::expand_alias;
pub use registry::{
    ALIAS_NAMESPACE, CommandEntry, CommandRegistry, CommandTarget, DISPATCHER_NAMESPACE, Overlay,
    TRIGGER_NAMESPACE, VIRTUAL_COMMANDS, command_key,
};
pub use split::{join_args, tokenize};
