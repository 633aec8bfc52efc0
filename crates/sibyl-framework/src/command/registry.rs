//! The layered command registry.
//!
//! Two layers share one case-insensitive namespace:
//!
//! | Layer | Contents | Mutable |
//! |-------|----------|---------|
//! | base | commands provided by plugins | until [`seal`](CommandRegistry::seal) |
//! | overlay | user-defined aliases and triggers | always |
//!
//! A name is unique across both layers at any instant; registering a taken
//! name fails with [`RegistryError::DuplicateName`] and never overwrites the
//! existing entry. Lookups consult the overlay first.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::handler::CommandHandler;

/// Namespace recorded for user-defined aliases.
pub const ALIAS_NAMESPACE: &str = "alias";
/// Namespace recorded for user-defined triggers.
pub const TRIGGER_NAMESPACE: &str = "trigger";
/// Names the dispatcher answers itself; nothing may register them.
pub const VIRTUAL_COMMANDS: [&str; 2] = ["redo", "last"];
/// Owner reported for [`VIRTUAL_COMMANDS`].
pub const DISPATCHER_NAMESPACE: &str = "dispatcher";

/// What a registered name resolves to.
#[derive(Clone)]
pub enum CommandTarget {
    /// A plugin handler.
    Handler(CommandHandler),
    /// A command-line template re-dispatched with the caller's arguments.
    Alias(String),
    /// Fixed reply text.
    Trigger(String),
}

impl fmt::Debug for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Handler"),
            Self::Alias(template) => f.debug_tuple("Alias").field(template).finish(),
            Self::Trigger(text) => f.debug_tuple("Trigger").field(text).finish(),
        }
    }
}

/// A registered command.
#[derive(Debug, Clone)]
pub struct CommandEntry {
    name: String,
    namespace: String,
    target: CommandTarget,
    ctrl: bool,
    hidden: bool,
    worker: bool,
    disabled: bool,
}

impl CommandEntry {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, target: CommandTarget) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            target,
            ctrl: false,
            hidden: false,
            worker: false,
            disabled: false,
        }
    }

    /// Requires the elevated-control feature to be enabled.
    pub fn ctrl(mut self, ctrl: bool) -> Self {
        self.ctrl = ctrl;
        self
    }

    /// Hides the command from help listings.
    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    /// Runs the handler off the dispatch path.
    pub fn worker(mut self, worker: bool) -> Self {
        self.worker = worker;
        self
    }

    /// Display name, as registered.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning plugin, or [`ALIAS_NAMESPACE`] / [`TRIGGER_NAMESPACE`].
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn target(&self) -> &CommandTarget {
        &self.target
    }

    pub fn is_ctrl(&self) -> bool {
        self.ctrl
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn is_worker(&self) -> bool {
        self.worker
    }

    /// A disabled command keeps its name but refuses to run.
    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }
}

/// The persisted part of the registry: user-defined aliases and triggers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Overlay {
    pub aliases: BTreeMap<String, String>,
    pub triggers: BTreeMap<String, String>,
}

impl Overlay {
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty() && self.triggers.is_empty()
    }
}

/// Checks a command name and returns its lookup key.
///
/// Names must be non-empty and consist of alphanumeric characters and `_`.
pub fn command_key(name: &str) -> Result<String, RegistryError> {
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(name.to_lowercase())
}

/// Maps command names to handlers, aliases and triggers.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    base: HashMap<String, CommandEntry>,
    overlay: HashMap<String, CommandEntry>,
    sealed: bool,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin command in the base layer.
    pub fn register(&mut self, entry: CommandEntry) -> Result<(), RegistryError> {
        let key = self.vacant_key(&entry.name)?;
        if self.sealed {
            return Err(RegistryError::Sealed(entry.name));
        }
        self.base.insert(key, entry);
        Ok(())
    }

    /// Adds an alias to the overlay.
    pub fn add_alias(&mut self, name: &str, template: impl Into<String>) -> Result<(), RegistryError> {
        let key = self.vacant_key(name)?;
        let entry = CommandEntry::new(name, ALIAS_NAMESPACE, CommandTarget::Alias(template.into()));
        self.overlay.insert(key, entry);
        Ok(())
    }

    /// Adds a trigger to the overlay.
    pub fn add_trigger(&mut self, name: &str, reply: impl Into<String>) -> Result<(), RegistryError> {
        let key = self.vacant_key(name)?;
        let entry = CommandEntry::new(name, TRIGGER_NAMESPACE, CommandTarget::Trigger(reply.into()));
        self.overlay.insert(key, entry);
        Ok(())
    }

    /// Removes a command. Removing an unknown name is not an error.
    pub fn unregister(&mut self, name: &str) -> Result<Option<CommandEntry>, RegistryError> {
        let key = name.to_lowercase();
        if let Some(entry) = self.overlay.remove(&key) {
            return Ok(Some(entry));
        }
        if self.sealed && self.base.contains_key(&key) {
            return Err(RegistryError::Sealed(name.to_string()));
        }
        Ok(self.base.remove(&key))
    }

    /// Moves a registration to a new name, keeping its namespace and flags.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), RegistryError> {
        let old_key = old.to_lowercase();
        let in_overlay = self.overlay.contains_key(&old_key);
        if !in_overlay && !self.base.contains_key(&old_key) {
            return Err(RegistryError::NotFound(old.to_string()));
        }
        if !in_overlay && self.sealed {
            return Err(RegistryError::Sealed(old.to_string()));
        }

        let new_key = command_key(new)?;
        if new_key != old_key
            && let Some(owner) = self.owner_of(&new_key)
        {
            return Err(RegistryError::DuplicateName {
                name: new.to_string(),
                owner: owner.to_string(),
            });
        }

        let layer = if in_overlay {
            &mut self.overlay
        } else {
            &mut self.base
        };
        if let Some(mut entry) = layer.remove(&old_key) {
            entry.name = new.to_string();
            layer.insert(new_key, entry);
        }
        Ok(())
    }

    /// Enables or disables a command of either layer. Works after sealing;
    /// the flag survives a rename.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let key = name.to_lowercase();
        let entry = match self.overlay.get_mut(&key) {
            Some(entry) => entry,
            None => self
                .base
                .get_mut(&key)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?,
        };
        entry.disabled = !enabled;
        Ok(())
    }

    /// Looks a name up, overlay first.
    pub fn resolve(&self, name: &str) -> Option<&CommandEntry> {
        let key = name.to_lowercase();
        self.overlay.get(&key).or_else(|| self.base.get(&key))
    }

    /// Namespace owning `name`.
    pub fn which(&self, name: &str) -> Option<&str> {
        self.resolve(name).map(CommandEntry::namespace)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Visible commands of both layers, sorted by name.
    pub fn commands(&self) -> Vec<&CommandEntry> {
        let mut entries: Vec<_> = self
            .base
            .values()
            .chain(self.overlay.values())
            .filter(|e| !e.hidden)
            .collect();
        entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        entries
    }

    /// Removes every base command owned by `namespace`. Allowed before
    /// sealing only; returns the removed names.
    pub fn remove_namespace(&mut self, namespace: &str) -> Vec<String> {
        if self.sealed {
            return Vec::new();
        }
        let keys: Vec<String> = self
            .base
            .iter()
            .filter(|(_, e)| e.namespace == namespace)
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter()
            .filter_map(|k| self.base.remove(&k))
            .map(|e| e.name)
            .collect()
    }

    /// Freezes the base layer.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Snapshot of the overlay for persistence.
    pub fn overlay(&self) -> Overlay {
        let mut snapshot = Overlay::default();
        for entry in self.overlay.values() {
            match &entry.target {
                CommandTarget::Alias(template) => {
                    snapshot.aliases.insert(entry.name.clone(), template.clone());
                }
                CommandTarget::Trigger(text) => {
                    snapshot.triggers.insert(entry.name.clone(), text.clone());
                }
                CommandTarget::Handler(_) => {}
            }
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.base.len() + self.overlay.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn owner_of(&self, key: &str) -> Option<&str> {
        if VIRTUAL_COMMANDS.contains(&key) {
            return Some(DISPATCHER_NAMESPACE);
        }
        self.which(key)
    }

    fn vacant_key(&self, name: &str) -> Result<String, RegistryError> {
        let key = command_key(name)?;
        if let Some(owner) = self.owner_of(&key) {
            return Err(RegistryError::DuplicateName {
                name: name.to_string(),
                owner: owner.to_string(),
            });
        }
        Ok(key)
    }
}
