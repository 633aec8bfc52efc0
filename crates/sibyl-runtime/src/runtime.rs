//! Main runtime orchestration.
//!
//! The runtime owns every protocol adapter and drives them from a single
//! cooperative loop. Each iteration:
//!
//! 1. steps every protocol (connect, pump or back off),
//! 2. dispatches the events the adapters reported,
//! 3. applies control requests from plugins (aliases, shutdown, ...),
//! 4. delivers or defers outbound messages,
//! 5. on the idle tick, runs idle hooks and retries requeued messages.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sibyl_runtime::SibylRuntime;
//!
//! let mut runtime = SibylRuntime::builder()
//!     .config_file("sibyl.toml")
//!     .build()?;
//! runtime.register_protocol::<CliProtocol>()?;
//! runtime.register_plugin(DICE);
//! runtime.run().await?;
//! ```

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use sibyl_core::{
    BoxedProtocol, ConfigurableProtocol, Outgoing, ProtocolContext, ProtocolEvent, ProtocolTable,
    Room, RoomFilter, RoomState,
};
use sibyl_framework::handler::panic_message;
use sibyl_framework::plugin::builtin::CORE_PLUGIN;
use sibyl_framework::{
    Bot, BotChannels, ControlRequest, Dispatcher, HookEvent, HookKind, HookRegistry, Overlay,
    PluginDescriptor, PluginManager, RegistryError, RuleSet,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{ConfigError, ConfigLoader, ConfigResult, SibylConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::outbox::{Offer, Outbox, Reachability};
use crate::rooms::RoomTable;
use crate::scheduler::IdleScheduler;
use crate::store::AliasStore;
use crate::supervisor::{ProtocolSlot, SlotEvent};

/// The Sibyl runtime: configuration, protocols and plugins, ready to run.
pub struct SibylRuntime {
    config: SibylConfig,
    protocols: Vec<BoxedProtocol>,
    plugins: Vec<PluginDescriptor>,
}

impl SibylRuntime {
    /// Creates a runtime from the configuration found in the current
    /// directory, or from defaults if none is found or it is invalid.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                SibylConfig::default()
            });
        Self::from_config(config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime and initializes logging from `config`.
    pub fn from_config(config: SibylConfig) -> Self {
        logging::init_from_config(&config.logging);
        info!(
            nick = %config.bot.nick,
            log_level = %config.logging.level,
            "Runtime initialized from configuration"
        );
        Self {
            config,
            protocols: Vec::new(),
            plugins: Vec::new(),
        }
    }

    pub fn config(&self) -> &SibylConfig {
        &self.config
    }

    /// Builds `P` from `protocols.<P::protocol_name()>.settings` and adds it.
    ///
    /// A missing section means default settings; a section with
    /// `enabled = false` skips the protocol.
    pub fn register_protocol<P>(&mut self) -> RuntimeResult<()>
    where
        P: ConfigurableProtocol,
    {
        let name = P::protocol_name();
        let section = self.config.protocols.get(name);
        if section.is_some_and(|s| !s.enabled) {
            info!(protocol = name, "Protocol disabled in configuration, skipped");
            return Ok(());
        }

        let settings: P::Config = match section.map(|s| &s.settings) {
            Some(value) if !value.is_null() => serde_json::from_value(value.clone())
                .map_err(|e| ConfigError::protocol_settings(name, e))?,
            _ => {
                warn!(protocol = name, "No configuration found for protocol, using default");
                P::Config::default()
            }
        };

        let protocol: BoxedProtocol = P::from_config(settings)?;
        self.add_protocol(protocol)
    }

    /// Adds an already constructed protocol.
    pub fn add_protocol(&mut self, protocol: BoxedProtocol) -> RuntimeResult<()> {
        let name = protocol.name().to_string();
        if self.protocols.iter().any(|p| p.name() == name) {
            return Err(RuntimeError::DuplicateProtocol(name));
        }
        if self.config.protocols.get(&name).is_some_and(|s| !s.enabled) {
            info!(protocol = %name, "Protocol disabled in configuration, skipped");
            return Ok(());
        }
        info!(protocol = %name, "Registered protocol");
        self.protocols.push(protocol);
        Ok(())
    }

    /// Adds a plugin. Plugins are loaded in registration order, after the
    /// built-in `core` plugin.
    pub fn register_plugin(&mut self, plugin: PluginDescriptor) {
        self.plugins.push(plugin);
    }

    pub fn register_plugins(&mut self, plugins: impl IntoIterator<Item = PluginDescriptor>) {
        self.plugins.extend(plugins);
    }

    pub fn protocol_names(&self) -> impl Iterator<Item = &str> {
        self.protocols.iter().map(|p| p.name())
    }

    /// Runs until Ctrl+C, SIGTERM or a shutdown request.
    pub async fn run(self) -> RuntimeResult<()> {
        let shutdown = CancellationToken::new();
        let watcher = shutdown.clone();
        tokio::spawn(async move {
            wait_for_shutdown().await;
            watcher.cancel();
        });
        info!("Sibyl is now running. Press Ctrl+C to stop.");
        self.run_until(shutdown).await
    }

    /// Runs until `shutdown` is cancelled or a shutdown is requested.
    ///
    /// Whatever ends the loop, protocols are shut down before returning.
    pub async fn run_until(self, shutdown: CancellationToken) -> RuntimeResult<()> {
        let mut main = self.start().await?;
        let result = main.run(&shutdown).await;
        main.shutdown().await;
        result
    }

    async fn start(self) -> RuntimeResult<MainLoop> {
        let config = self.config;

        let admin = config
            .protocols
            .iter()
            .filter(|(_, p)| p.admin)
            .map(|(name, _)| name.clone());
        let rules = RuleSet::parse(&config.permissions.rules)?.with_admin_protocols(admin);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut table = ProtocolTable::new();
        for protocol in &self.protocols {
            protocol.setup(ProtocolContext::new(
                protocol.name(),
                config.bot.nick.as_str(),
                events_tx.clone(),
            ));
            table.insert(protocol.clone());
        }

        let mut builder = Bot::builder(config.bot.nick.clone()).protocols(table);
        for (plugin, section) in &config.plugins {
            builder = builder.plugin_config(plugin.clone(), section.clone());
        }
        let (bot, channels) = builder.build();

        let mut manager = PluginManager::new(bot.clone());
        manager.register_plugin(CORE_PLUGIN)?;
        for plugin in self.plugins {
            manager.register_plugin(plugin)?;
        }
        manager.apply_renames(&config.renames);

        // Persisted entries win over configured ones of the same name.
        let store = AliasStore::in_dir(&config.state.dir);
        let saved = store.load().await?;
        let mut overlay = Overlay {
            aliases: config.aliases.clone(),
            triggers: config.triggers.clone(),
        };
        overlay.aliases.extend(saved.aliases);
        overlay.triggers.extend(saved.triggers);
        manager.install_overlay(&overlay.aliases, &overlay.triggers);

        manager.init_all().await;
        for name in &config.bot.disabled {
            match bot.registry().write().set_enabled(name, false) {
                Ok(()) => info!(command = %name, "Command disabled"),
                Err(e) => warn!(command = %name, error = %e, "Cannot disable command"),
            }
        }
        info!(
            plugins = manager.plugin_count(),
            active = manager.active_plugins().count(),
            commands = bot.registry().read().len(),
            "Plugins loaded"
        );

        let hooks = manager.hooks();
        let dispatcher = Dispatcher::new(
            bot.clone(),
            hooks.clone(),
            Arc::new(rules),
            config.bot.dispatch_settings(),
        );
        let scheduler = IdleScheduler::new(config.scheduler.settings(), manager.take_idle_hooks());
        let slots = self
            .protocols
            .into_iter()
            .map(|p| {
                let section = config.protocols.get(p.name()).cloned().unwrap_or_default();
                ProtocolSlot::new(p, section)
            })
            .collect();

        Ok(MainLoop {
            bot,
            dispatcher,
            hooks,
            scheduler,
            outbox: Outbox::new(config.outbox.limits()),
            rooms: RoomTable::new(),
            store,
            slots,
            events: events_rx,
            channels,
            tick: config.scheduler.tick(),
            poll: config.scheduler.poll(),
            last_tick: None,
            stop: None,
        })
    }
}

impl Default for SibylRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for shutdown signals (Ctrl+C or SIGTERM).
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM handler");

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down");
    }
}

// =============================================================================
// Main loop
// =============================================================================

struct World<'a> {
    slots: &'a [ProtocolSlot],
    rooms: &'a RoomTable,
}

impl Reachability for World<'_> {
    fn is_connected(&self, protocol: &str) -> bool {
        self.slots
            .iter()
            .any(|s| s.name() == protocol && s.is_connected())
    }

    fn in_room(&self, room: &Room) -> bool {
        self.rooms.in_room(room)
    }
}

struct MainLoop {
    bot: Bot,
    dispatcher: Dispatcher,
    hooks: Arc<HookRegistry>,
    scheduler: IdleScheduler,
    outbox: Outbox,
    rooms: RoomTable,
    store: AliasStore,
    slots: Vec<ProtocolSlot>,
    events: mpsc::UnboundedReceiver<ProtocolEvent>,
    channels: BotChannels,
    tick: Duration,
    poll: Duration,
    last_tick: Option<Instant>,
    /// Set once a shutdown was requested.
    stop: Option<String>,
}

impl MainLoop {
    async fn run(&mut self, shutdown: &CancellationToken) -> RuntimeResult<()> {
        debug!(protocols = self.slots.len(), "Main loop started");
        while !shutdown.is_cancelled() {
            let busy = match AssertUnwindSafe(self.step()).catch_unwind().await {
                Ok(Ok(busy)) => busy,
                Ok(Err(e)) => {
                    error!(critical = true, error = %e, "Main loop failed, shutting down");
                    return Err(e);
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(critical = true, panic = %message, "Main loop panicked, shutting down");
                    return Err(RuntimeError::Panic(message));
                }
            };

            if let Some(reason) = &self.stop {
                info!(reason = %reason, "Shutdown requested");
                break;
            }
            if !busy {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(self.poll) => {}
                }
            }
        }
        Ok(())
    }

    /// One loop iteration. Returns whether anything happened.
    async fn step(&mut self) -> RuntimeResult<bool> {
        let now = Instant::now();
        let mut busy = false;

        for i in 0..self.slots.len() {
            let span = info_span!("protocol", name = %self.slots[i].name());
            if let Some(event) = self.slots[i].step(now).instrument(span).await {
                busy = true;
                self.on_slot_event(i, event).await;
            }
        }
        if !self.slots.is_empty() && self.slots.iter().all(ProtocolSlot::is_disabled) {
            return Err(RuntimeError::AllProtocolsDisabled);
        }

        busy |= self.drain_events().await;
        busy |= self.drain_control().await;
        busy |= self.drain_outbound().await;

        if self.last_tick.is_none_or(|t| now.duration_since(t) >= self.tick) {
            self.last_tick = Some(now);
            self.idle_tick().await;
        }
        Ok(busy)
    }

    async fn on_slot_event(&mut self, idx: usize, event: SlotEvent) {
        let protocol = self.slots[idx].protocol().clone();
        let name = protocol.name().to_string();
        match event {
            SlotEvent::Connected => {
                self.hooks
                    .fire(&self.bot, HookKind::Connect, HookEvent::Connected {
                        protocol: name.clone(),
                    })
                    .await;
                self.outbox.on_connected(&name);
                let rooms = self.slots[idx].config().rooms.clone();
                for rc in rooms {
                    let room = protocol.new_room(&rc.name, rc.nick.as_deref(), rc.password.as_deref());
                    self.join(&protocol, room).await;
                }
                // Rooms requested at runtime, or lost with the last connection.
                for room in self.rooms.rooms(&name, RoomFilter::Parted) {
                    self.join(&protocol, room).await;
                }
            }
            SlotEvent::Disconnected(reason) => {
                self.rooms.reset_protocol(&name);
                self.hooks
                    .fire(&self.bot, HookKind::Disconnect, HookEvent::Disconnected {
                        protocol: name,
                        reason,
                    })
                    .await;
            }
            SlotEvent::Disabled(reason) => {
                self.rooms.reset_protocol(&name);
                warn!(protocol = %name, reason = %reason, "Protocol will not be retried");
            }
        }
        self.publish_rooms();
    }

    fn publish_rooms(&self) {
        self.bot.publish_rooms(self.rooms.snapshot());
    }

    async fn join(&mut self, protocol: &BoxedProtocol, room: Room) {
        if !self.rooms.request_join(room.clone()) {
            return;
        }
        debug!(room = %room, "Joining room");
        self.publish_rooms();
        if let Err(e) = protocol.join_room(&room).await {
            warn!(room = %room, error = %e, "Join failed");
            self.rooms.join_failed(&room);
            self.publish_rooms();
            self.hooks
                .fire(&self.bot, HookKind::RoomJoinFailed, HookEvent::RoomJoinFailed {
                    room,
                    reason: e.to_string(),
                })
                .await;
        }
    }

    async fn drain_events(&mut self) -> bool {
        let mut busy = false;
        while let Ok(event) = self.events.try_recv() {
            busy = true;
            match event {
                ProtocolEvent::Message(msg) => {
                    let outcome = self.dispatcher.dispatch(msg).await;
                    debug!(?outcome, "Message dispatched");
                }
                ProtocolEvent::RoomJoined(room) => {
                    info!(room = %room, "Joined room");
                    self.rooms.joined(room.clone());
                    self.publish_rooms();
                    self.outbox.on_room_joined(&room);
                    self.hooks
                        .fire(&self.bot, HookKind::RoomJoined, HookEvent::RoomJoined(room))
                        .await;
                }
                ProtocolEvent::RoomJoinFailed { room, reason } => {
                    warn!(room = %room, reason = %reason, "Join failed");
                    self.rooms.join_failed(&room);
                    self.publish_rooms();
                    self.hooks
                        .fire(&self.bot, HookKind::RoomJoinFailed, HookEvent::RoomJoinFailed {
                            room,
                            reason,
                        })
                        .await;
                }
                ProtocolEvent::RoomParted(room) => {
                    info!(room = %room, "Left room");
                    self.rooms.parted(&room);
                    self.publish_rooms();
                }
                ProtocolEvent::ShutdownRequested { protocol, reason } => {
                    self.stop = Some(format!("{protocol}: {reason}"));
                }
            }
        }
        busy
    }

    async fn drain_control(&mut self) -> bool {
        let mut busy = false;
        let mut dirty = false;
        while let Ok(request) = self.channels.control.try_recv() {
            busy = true;
            debug!(?request, "Control request");
            match request {
                ControlRequest::Shutdown { reason } => self.stop = Some(reason),
                ControlRequest::DisableIdle { name } => {
                    if self.scheduler.deregister(&name) {
                        info!(hook = %name, "Idle hook disabled on request");
                    }
                }
                ControlRequest::JoinRoom {
                    protocol,
                    name,
                    nick,
                    password,
                } => self.join_requested(&protocol, &name, nick.as_deref(), password.as_deref()).await,
                ControlRequest::PartRoom { protocol, name } => self.part(&protocol, &name).await,
                request => match self.apply_overlay(&request) {
                    Ok(changed) => dirty |= changed,
                    Err(e) => warn!(?request, error = %e, "Control request rejected"),
                },
            }
        }
        if dirty {
            self.persist().await;
        }
        busy
    }

    fn slot(&self, protocol: &str) -> Option<&ProtocolSlot> {
        self.slots.iter().find(|s| s.name() == protocol)
    }

    async fn join_requested(
        &mut self,
        protocol: &str,
        name: &str,
        nick: Option<&str>,
        password: Option<&str>,
    ) {
        let Some(slot) = self.slot(protocol) else {
            warn!(protocol = %protocol, room = %name, "Join for unknown protocol ignored");
            return;
        };
        let connected = slot.is_connected();
        let handle = slot.protocol().clone();
        let room = handle.new_room(name, nick, password);
        if connected {
            self.join(&handle, room).await;
        } else if self.rooms.track(room) {
            debug!(protocol = %protocol, room = %name, "Join deferred until connected");
            self.publish_rooms();
        }
    }

    async fn part(&mut self, protocol: &str, name: &str) {
        let Some(slot) = self.slot(protocol) else {
            warn!(protocol = %protocol, room = %name, "Part for unknown protocol ignored");
            return;
        };
        let connected = slot.is_connected();
        let handle = slot.protocol().clone();
        let room = Room::new(protocol, name);
        match self.rooms.forget(&room) {
            Some(RoomState::In | RoomState::Pending) if connected => {
                info!(room = %room, "Leaving room");
                if let Err(e) = handle.part_room(&room).await {
                    warn!(room = %room, error = %e, "Part failed");
                }
            }
            Some(_) => debug!(room = %room, "Room forgotten"),
            None => {
                debug!(room = %room, "Part for untracked room ignored");
                return;
            }
        }
        self.publish_rooms();
    }

    fn apply_overlay(&self, request: &ControlRequest) -> Result<bool, RegistryError> {
        let mut registry = self.bot.registry().write();
        match request {
            ControlRequest::AddAlias { name, template } => {
                registry.add_alias(name, template.as_str()).map(|()| true)
            }
            ControlRequest::AddTrigger { name, reply } => {
                registry.add_trigger(name, reply.as_str()).map(|()| true)
            }
            ControlRequest::RemoveOverlay { name } => {
                registry.unregister(name).map(|removed| removed.is_some())
            }
            _ => Ok(false),
        }
    }

    async fn persist(&self) {
        let overlay = self.bot.registry().read().overlay();
        if let Err(e) = self.store.save(&overlay).await {
            error!(error = %e, "Could not persist aliases");
        }
    }

    async fn drain_outbound(&mut self) -> bool {
        let mut busy = false;
        while let Ok(out) = self.channels.outbound.try_recv() {
            busy = true;
            self.offer(out).await;
        }
        busy
    }

    async fn offer(&mut self, out: Outgoing) {
        if self.bot.protocol(out.protocol()).is_none() {
            warn!(destination = %out.target, "Unknown protocol, message dropped");
            return;
        }
        let world = World {
            slots: &self.slots,
            rooms: &self.rooms,
        };
        if let Offer::Deliver(out) = self.outbox.offer(out, &world) {
            self.deliver(out).await;
        }
    }

    async fn deliver(&mut self, out: Outgoing) {
        let Some(protocol) = self.bot.protocol(out.protocol()).cloned() else {
            return;
        };
        let sent = if out.broadcast {
            protocol.broadcast(&out).await
        } else {
            protocol.send(&out).await.map(|()| out.text.clone())
        };
        match sent {
            Ok(text) => {
                if out.hook {
                    self.hooks
                        .fire(&self.bot, HookKind::Send, HookEvent::Sent { outgoing: out, text })
                        .await;
                }
            }
            Err(e) if e.is_disconnect() => {
                warn!(destination = %out.target, error = %e, "Send failed, message deferred");
                self.outbox.defer(out);
            }
            Err(e) => warn!(destination = %out.target, error = %e, "Send failed, message dropped"),
        }
    }

    async fn idle_tick(&mut self) {
        self.scheduler.tick(&self.bot).await;
        for out in self.outbox.take_pending() {
            self.offer(out).await;
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down");
        self.drain_outbound().await;
        for slot in self.slots.iter().filter(|s| s.is_connected()) {
            let protocol = slot.protocol();
            for room in self.rooms.rooms(protocol.name(), RoomFilter::In) {
                if let Err(e) = protocol.part_room(&room).await {
                    debug!(room = %room, error = %e, "Part on shutdown failed");
                }
            }
        }
        for slot in &self.slots {
            slot.protocol().shutdown().await;
        }
        if !self.bot.registry().read().overlay().is_empty() {
            self.persist().await;
        }
        info!(
            stats = %self.dispatcher.stats(),
            deferred = self.outbox.deferred_len(),
            "Sibyl stopped"
        );
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`SibylRuntime`] with custom configuration sources.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges configuration on top of every other source.
    pub fn merge(mut self, config: SibylConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub fn build(self) -> ConfigResult<SibylRuntime> {
        let config = self.config_loader.load()?;
        Ok(SibylRuntime::from_config(config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use sibyl_core::{
        Message, Protocol, ProtocolError, ProtocolResult, Target, User, UserKind,
    };
    use sibyl_framework::define_plugin;
    use sibyl_framework::plugin::command;
    use tower::BoxError;

    use super::*;
    use crate::config::ProtocolConfig;

    /// Plays a script of inbound lines, one per `process()` call, and
    /// records everything sent. `<quit>` asks the bot to stop.
    #[derive(Default)]
    struct Mock {
        ctx: Mutex<Option<ProtocolContext>>,
        script: Mutex<VecDeque<String>>,
        sent: Mutex<Vec<Outgoing>>,
        connected: AtomicBool,
        reject_login: bool,
        connects: AtomicUsize,
        /// Sends that fail with `NotConnected` and drop the connection.
        flaky_sends: AtomicUsize,
        joins: Mutex<Vec<Room>>,
        parts: Mutex<Vec<Room>>,
    }

    impl Mock {
        fn scripted(lines: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(lines.iter().map(|l| l.to_string()).collect()),
                ..Default::default()
            })
        }

        fn texts(&self) -> Vec<String> {
            self.sent.lock().iter().map(|o| o.text.clone()).collect()
        }
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct MockConfig {
        script: Vec<String>,
    }

    #[async_trait]
    impl Protocol for Mock {
        fn name(&self) -> &str {
            "mock"
        }

        fn setup(&self, ctx: ProtocolContext) {
            *self.ctx.lock() = Some(ctx);
        }

        async fn connect(&self) -> ProtocolResult<()> {
            if self.reject_login {
                return Err(ProtocolError::AuthFailure("bad password".into()));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn process(&self) -> ProtocolResult<()> {
            let line = self.script.lock().pop_front();
            let ctx = self.ctx.lock().clone();
            if let (Some(line), Some(ctx)) = (line, ctx) {
                if line == "<quit>" {
                    ctx.request_shutdown("script finished");
                } else {
                    let user = self.new_user("tester", UserKind::Private, None);
                    ctx.message_received(Message::private(user, line));
                }
            }
            Ok(())
        }

        async fn send(&self, msg: &Outgoing) -> ProtocolResult<()> {
            let flaky = self
                .flaky_sends
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if flaky {
                self.connected.store(false, Ordering::SeqCst);
                return Err(ProtocolError::NotConnected);
            }
            self.sent.lock().push(msg.clone());
            Ok(())
        }

        async fn join_room(&self, room: &Room) -> ProtocolResult<()> {
            self.joins.lock().push(room.clone());
            if let Some(ctx) = self.ctx.lock().clone() {
                ctx.room_joined(room.clone());
            }
            Ok(())
        }

        async fn part_room(&self, room: &Room) -> ProtocolResult<()> {
            self.parts.lock().push(room.clone());
            Ok(())
        }

        fn get_user(&self) -> User {
            User::new("mock", "SibylBot", UserKind::Private)
        }
    }

    impl ConfigurableProtocol for Mock {
        type Config = MockConfig;

        fn protocol_name() -> &'static str {
            "mock"
        }

        fn from_config(config: MockConfig) -> ProtocolResult<Arc<Self>> {
            Ok(Arc::new(Self {
                script: Mutex::new(config.script.into()),
                ..Default::default()
            }))
        }
    }

    async fn echo(_bot: Bot, _msg: Arc<Message>, args: Vec<String>) -> String {
        args.join(" ")
    }

    static ECHO: PluginDescriptor = define_plugin! {
        name: "echo",
        items: [command("echo", echo)],
    };

    async fn enter(bot: Bot, msg: Arc<Message>, args: Vec<String>) -> Result<(), BoxError> {
        for name in args {
            bot.join_room(&Room::new(msg.protocol(), name))?;
        }
        Ok(())
    }

    async fn leave(bot: Bot, msg: Arc<Message>, args: Vec<String>) -> Result<(), BoxError> {
        for name in args {
            bot.part_room(&Room::new(msg.protocol(), name))?;
        }
        Ok(())
    }

    async fn announce(bot: Bot, msg: Arc<Message>, args: Vec<String>) -> Result<(), BoxError> {
        let room = Room::new(msg.protocol(), args.join(" "));
        bot.say(room, "news")?;
        Ok(())
    }

    async fn whereami(bot: Bot, msg: Arc<Message>, _args: Vec<String>) -> String {
        let rooms: Vec<String> = bot
            .rooms(msg.protocol(), RoomFilter::In)
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        if rooms.is_empty() {
            "nowhere".to_string()
        } else {
            rooms.join(", ")
        }
    }

    static ROOMS: PluginDescriptor = define_plugin! {
        name: "rooms",
        items: [
            command("enter", enter),
            command("leave", leave),
            command("announce", announce),
            command("where", whereami),
        ],
    };

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sibyl-runtime-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn test_config(dir: &Path) -> SibylConfig {
        let mut config = SibylConfig::default();
        config.scheduler.poll_ms = 5;
        config.scheduler.tick_ms = 5;
        config.state.dir = dir.to_path_buf();
        config
    }

    async fn run_to_end(runtime: SibylRuntime) -> RuntimeResult<()> {
        tokio::time::timeout(Duration::from_secs(10), runtime.run_until(CancellationToken::new()))
            .await
            .expect("runtime did not stop")
    }

    #[tokio::test]
    async fn test_conversation_end_to_end() {
        let dir = scratch_dir("conversation");
        let mock = Mock::scripted(&[
            "echo hello world",
            "nope",
            "alias add hi echo hi there",
            "hi",
            "<quit>",
        ]);
        let mut runtime = SibylRuntime::from_config(test_config(&dir));
        runtime.add_protocol(mock.clone()).unwrap();
        runtime.register_plugin(ECHO);

        run_to_end(runtime).await.unwrap();

        assert_eq!(
            mock.texts(),
            vec![
                "hello world".to_string(),
                "Unknown command \"nope\"".to_string(),
                "alias \"hi\" added".to_string(),
                "hi there".to_string(),
            ]
        );
        let saved = AliasStore::in_dir(&dir).load().await.unwrap();
        assert_eq!(saved.aliases["hi"], "echo hi there");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_persisted_alias_is_restored() {
        let dir = scratch_dir("restore");
        let mut overlay = Overlay::default();
        overlay.aliases.insert("greet".into(), "echo good morning".into());
        AliasStore::in_dir(&dir).save(&overlay).await.unwrap();

        let mock = Mock::scripted(&["greet", "<quit>"]);
        let mut runtime = SibylRuntime::from_config(test_config(&dir));
        runtime.add_protocol(mock.clone()).unwrap();
        runtime.register_plugin(ECHO);
        run_to_end(runtime).await.unwrap();

        assert_eq!(mock.texts(), vec!["good morning".to_string()]);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_command_disabled_in_config() {
        let dir = scratch_dir("disabled");
        let mut config = test_config(&dir);
        config.bot.disabled = vec!["echo".into(), "nosuch".into()];
        let mock = Mock::scripted(&["echo hi", "<quit>"]);
        let mut runtime = SibylRuntime::from_config(config);
        runtime.add_protocol(mock.clone()).unwrap();
        runtime.register_plugin(ECHO);
        run_to_end(runtime).await.unwrap();

        assert_eq!(mock.texts(), vec!["\"echo\" is disabled".to_string()]);
    }

    #[tokio::test]
    async fn test_room_join_and_part_on_request() {
        let dir = scratch_dir("rooms");
        let mut config = test_config(&dir);
        config.scheduler.tick_ms = 0;
        let mock = Mock::scripted(&[
            "announce lobby",
            "enter lobby",
            "where",
            "leave lobby",
            "where",
            "leave lobby",
            "<quit>",
        ]);
        let mut runtime = SibylRuntime::from_config(config);
        runtime.add_protocol(mock.clone()).unwrap();
        runtime.register_plugin(ROOMS);
        run_to_end(runtime).await.unwrap();

        let lobby = Room::new("mock", "lobby");
        assert_eq!(*mock.joins.lock(), vec![lobby.clone()]);
        // the second part finds nothing to leave
        assert_eq!(*mock.parts.lock(), vec![lobby.clone()]);

        let sent = mock.sent.lock().clone();
        let news: Vec<&Outgoing> = sent.iter().filter(|o| o.text == "news").collect();
        assert_eq!(news.len(), 1);
        assert_eq!(news[0].target, Target::Room(lobby));
        let replies: Vec<&str> = sent
            .iter()
            .filter(|o| o.text != "news")
            .map(|o| o.text.as_str())
            .collect();
        assert_eq!(replies, ["lobby", "nowhere"]);
    }

    #[tokio::test]
    async fn test_rooms_rejoined_after_reconnect() {
        let dir = scratch_dir("rejoin");
        let mut config = test_config(&dir);
        config.protocols.insert(
            "mock".into(),
            ProtocolConfig {
                reconnect_wait_secs: 0,
                ..Default::default()
            },
        );
        let mock = Mock::scripted(&["enter dev", "echo hi"]);
        mock.flaky_sends.store(1, Ordering::SeqCst);
        let mut runtime = SibylRuntime::from_config(config);
        runtime.add_protocol(mock.clone()).unwrap();
        runtime.register_plugin(ECHO);
        runtime.register_plugin(ROOMS);

        let token = CancellationToken::new();
        let task = tokio::spawn(runtime.run_until(token.clone()));
        let deadline = Instant::now() + Duration::from_secs(10);
        while mock.texts().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
        task.await.unwrap().unwrap();

        // the failed reply dropped the connection and the room with it
        let dev = Room::new("mock", "dev");
        assert_eq!(*mock.joins.lock(), vec![dev.clone(), dev.clone()]);
        assert_eq!(mock.texts(), vec!["hi".to_string()]);
        assert_eq!(mock.connects.load(Ordering::SeqCst), 2);
        // still joined at shutdown
        assert_eq!(*mock.parts.lock(), vec![dev]);
    }

    #[tokio::test]
    async fn test_reply_deferred_on_disconnect_is_sent_after_reconnect() {
        let dir = scratch_dir("deferred");
        let mut config = test_config(&dir);
        config.protocols.insert(
            "mock".into(),
            ProtocolConfig {
                reconnect_wait_secs: 0,
                ..Default::default()
            },
        );
        let mock = Mock::scripted(&["echo hi"]);
        mock.flaky_sends.store(1, Ordering::SeqCst);
        let mut runtime = SibylRuntime::from_config(config);
        runtime.add_protocol(mock.clone()).unwrap();
        runtime.register_plugin(ECHO);

        let token = CancellationToken::new();
        let task = tokio::spawn(runtime.run_until(token.clone()));
        let deadline = Instant::now() + Duration::from_secs(10);
        while mock.texts().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(mock.texts(), vec!["hi".to_string()]);
        assert_eq!(mock.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_everywhere_stops_the_bot() {
        let dir = scratch_dir("auth");
        let mock = Arc::new(Mock {
            reject_login: true,
            ..Default::default()
        });
        let mut runtime = SibylRuntime::from_config(test_config(&dir));
        runtime.add_protocol(mock).unwrap();

        let err = run_to_end(runtime).await.unwrap_err();
        assert!(matches!(err, RuntimeError::AllProtocolsDisabled));
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_loop() {
        let dir = scratch_dir("cancel");
        let mut runtime = SibylRuntime::from_config(test_config(&dir));
        runtime.add_protocol(Mock::scripted(&[])).unwrap();

        let token = CancellationToken::new();
        let stopper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });
        tokio::time::timeout(Duration::from_secs(10), runtime.run_until(token))
            .await
            .expect("runtime did not stop")
            .unwrap();
    }

    #[test]
    fn test_register_protocol_from_settings() {
        let mut config = SibylConfig::default();
        config.protocols.insert(
            "mock".into(),
            ProtocolConfig {
                settings: serde_json::json!({ "script": ["echo hi"] }),
                ..Default::default()
            },
        );
        let mut runtime = SibylRuntime::from_config(config.clone());
        runtime.register_protocol::<Mock>().unwrap();
        assert_eq!(runtime.protocol_names().collect::<Vec<_>>(), ["mock"]);
        assert!(matches!(
            runtime.add_protocol(Mock::scripted(&[])),
            Err(RuntimeError::DuplicateProtocol(_))
        ));

        config.protocols.get_mut("mock").unwrap().settings = serde_json::json!({ "script": 5 });
        let mut runtime = SibylRuntime::from_config(config.clone());
        assert!(matches!(
            runtime.register_protocol::<Mock>(),
            Err(RuntimeError::Config(ConfigError::InvalidProtocolSettings { .. }))
        ));

        config.protocols.get_mut("mock").unwrap().enabled = false;
        let mut runtime = SibylRuntime::from_config(config);
        runtime.register_protocol::<Mock>().unwrap();
        assert_eq!(runtime.protocol_names().count(), 0);
    }
}
