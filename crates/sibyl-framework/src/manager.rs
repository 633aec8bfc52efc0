//! Plugin lifecycle management.
//!
//! [`PluginManager`] turns [`PluginDescriptor`]s into registry entries and
//! hooks. Startup runs in four steps, each driven by the runtime:
//!
//! 1. [`register_plugin`](PluginManager::register_plugin) for every plugin.
//!    Duplicate plugin names, incompatible API versions and command name
//!    collisions are fatal.
//! 2. [`apply_renames`](PluginManager::apply_renames) for configured
//!    renames. Unknown or colliding names are logged and skipped.
//! 3. [`install_overlay`](PluginManager::install_overlay) for configured and
//!    persisted aliases and triggers, also soft-failing. Overlay names are
//!    checked against the renamed commands.
//! 4. [`init_all`](PluginManager::init_all) runs init hooks and seals the
//!    plugin layer of the registry.
//!
//! ```text
//! register_plugin() ──► Registered
//!        init_all() ──► Active    (every init hook succeeded)
//!                   ──► Failed    (an init hook failed or panicked;
//!                                  its commands, hooks and state are withdrawn)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::bot::Bot;
use crate::command::{CommandEntry, CommandTarget};
use crate::error::StartupError;
use crate::handler::run_contained;
use crate::hook::{HookRegistry, IdleHook};
use crate::plugin::{
    InitFn, Plugin, PluginDescriptor, PluginInitContext, PluginItem, SIBYL_PLUGIN_API_VERSION,
};

/// Tracks the load state of a plugin registered with [`PluginManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginLoadState {
    /// Items installed, init hooks not yet run.
    Registered,
    Active,
    /// An init hook failed; nothing from this plugin is reachable.
    Failed,
}

struct PluginEntry {
    name: String,
    desc: &'static str,
    state: PluginLoadState,
    init: Vec<InitFn>,
}

/// Central manager for plugin registration and initialization.
pub struct PluginManager {
    bot: Bot,
    hooks: Arc<HookRegistry>,
    plugins: Vec<PluginEntry>,
    idle: Vec<IdleHook>,
}

impl PluginManager {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            hooks: Arc::new(HookRegistry::new()),
            plugins: Vec::new(),
            idle: Vec::new(),
        }
    }

    // ─── Plugin registration ─────────────────────────────────────────────────

    /// Instantiates a plugin from its descriptor and installs its items.
    pub fn register_plugin(&mut self, desc: PluginDescriptor) -> Result<(), StartupError> {
        if !desc.is_compatible() {
            return Err(StartupError::IncompatiblePlugin {
                name: desc.name.to_string(),
                found: desc.api_version,
                expected: SIBYL_PLUGIN_API_VERSION,
            });
        }
        self.register(desc.instantiate())
    }

    /// Installs a plugin built at runtime.
    pub fn register(&mut self, mut plugin: Plugin) -> Result<(), StartupError> {
        let name = plugin.name().to_string();
        if self.plugins.iter().any(|p| p.name == name) {
            return Err(StartupError::DuplicatePlugin(name));
        }

        let mut init = Vec::new();
        let mut commands = 0usize;
        for item in plugin.take_items() {
            match item {
                PluginItem::Command(cmd) => {
                    let entry = CommandEntry::new(cmd.name, &name, CommandTarget::Handler(cmd.handler))
                        .ctrl(cmd.ctrl)
                        .hidden(cmd.hidden)
                        .worker(cmd.worker);
                    self.bot
                        .registry()
                        .write()
                        .register(entry)
                        .map_err(|source| StartupError::Command {
                            plugin: name.clone(),
                            source,
                        })?;
                    commands += 1;
                }
                PluginItem::Hook(hook) => self.hooks.add(hook.kind, &name, hook.func),
                PluginItem::Idle(idle) => self.idle.push(IdleHook {
                    name: format!("{name}.{}", idle.name),
                    namespace: name.clone(),
                    interval: idle.interval,
                    worker: idle.worker,
                    func: idle.func,
                }),
                PluginItem::Init(f) => init.push(f),
                PluginItem::UnknownCommand(f) => self.hooks.add_unknown(&name, f),
            }
        }

        info!(
            plugin = %name,
            version = plugin.metadata().version,
            commands,
            "Plugin registered"
        );
        self.plugins.push(PluginEntry {
            name,
            desc: plugin.metadata().desc,
            state: PluginLoadState::Registered,
            init,
        });
        Ok(())
    }

    // ─── Overlay ─────────────────────────────────────────────────────────────

    /// Adds aliases and triggers to the overlay. Names that collide or are
    /// invalid are skipped with a warning. Returns how many were installed.
    pub fn install_overlay(
        &self,
        aliases: &BTreeMap<String, String>,
        triggers: &BTreeMap<String, String>,
    ) -> usize {
        let mut registry = self.bot.registry().write();
        let mut installed = 0;
        for (name, template) in aliases {
            match registry.add_alias(name, template.as_str()) {
                Ok(()) => installed += 1,
                Err(e) => warn!(alias = %name, error = %e, "Alias skipped"),
            }
        }
        for (name, reply) in triggers {
            match registry.add_trigger(name, reply.as_str()) {
                Ok(()) => installed += 1,
                Err(e) => warn!(trigger = %name, error = %e, "Trigger skipped"),
            }
        }
        installed
    }

    /// Renames commands (`old → new`). Failures are logged and skipped.
    pub fn apply_renames(&self, renames: &BTreeMap<String, String>) -> usize {
        let mut registry = self.bot.registry().write();
        renames
            .iter()
            .filter(|(old, new)| match registry.rename(old, new) {
                Ok(()) => true,
                Err(e) => {
                    warn!(from = %old, to = %new, error = %e, "Rename skipped");
                    false
                }
            })
            .count()
    }

    // ─── Initialization ──────────────────────────────────────────────────────

    /// Runs every plugin's init hooks in registration order, then seals the
    /// plugin layer of the registry.
    ///
    /// A plugin whose init hook fails is marked [`PluginLoadState::Failed`]
    /// and everything it registered is withdrawn; the other plugins still
    /// start.
    pub async fn init_all(&mut self) {
        for i in 0..self.plugins.len() {
            if self.plugins[i].state != PluginLoadState::Registered {
                continue;
            }
            let name = self.plugins[i].name.clone();
            let hooks = std::mem::take(&mut self.plugins[i].init);
            let mut failure = None;
            for f in hooks {
                let ctx = PluginInitContext::new(self.bot.clone(), &name);
                if let Err(e) = run_contained(f(ctx)).await {
                    failure = Some(e);
                    break;
                }
            }

            match failure {
                None => {
                    self.plugins[i].state = PluginLoadState::Active;
                    info!(plugin = %name, "Plugin loaded and active");
                }
                Some(e) => {
                    self.withdraw(&name);
                    self.plugins[i].state = PluginLoadState::Failed;
                    error!(plugin = %name, error = %e, "Plugin init failed, plugin disabled");
                }
            }
        }
        self.bot.registry().write().seal();
    }

    fn withdraw(&mut self, namespace: &str) {
        let removed = self.bot.registry().write().remove_namespace(namespace);
        self.hooks.remove_namespace(namespace);
        self.idle.retain(|h| h.namespace != namespace);
        self.bot.state().remove_namespace(namespace);
        if !removed.is_empty() {
            warn!(plugin = %namespace, commands = ?removed, "Commands withdrawn");
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Event hooks of every loaded plugin.
    pub fn hooks(&self) -> Arc<HookRegistry> {
        self.hooks.clone()
    }

    /// Hands the idle hooks over to the scheduler.
    pub fn take_idle_hooks(&mut self) -> Vec<IdleHook> {
        std::mem::take(&mut self.idle)
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    pub fn plugin_state(&self, name: &str) -> Option<PluginLoadState> {
        self.plugins.iter().find(|p| p.name == name).map(|p| p.state)
    }

    /// `(name, description)` of every active plugin.
    pub fn active_plugins(&self) -> impl Iterator<Item = (&str, &'static str)> {
        self.plugins
            .iter()
            .filter(|p| p.state == PluginLoadState::Active)
            .map(|p| (p.name.as_str(), p.desc))
    }
}
