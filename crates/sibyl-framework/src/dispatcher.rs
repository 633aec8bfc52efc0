//! The message router.
//!
//! [`Dispatcher::dispatch`] takes one inbound [`Message`] through a fixed
//! pipeline:
//!
//! | Step | Outcome on failure |
//! |------|--------------------|
//! | classify (status/error messages only reach hooks) | [`Dispatched::Event`] |
//! | strip nick (group only) then prefix | |
//! | addressing gate | [`Dispatched::NotAddressed`] |
//! | passive hooks, always | |
//! | tokenize, resolve `redo` / `last` | [`Dispatched::NoHistory`] |
//! | lookup, alias expansion | [`Dispatched::Unknown`] |
//! | permission check | [`Dispatched::Denied`] |
//! | disabled / elevated-control check | [`Dispatched::Disabled`], [`Dispatched::CtrlDisabled`] |
//! | execute inline or on a worker task | [`Dispatched::Failed`] |
//!
//! Every outcome that concerns the sender is reported with a reply queued
//! through [`Bot::send`]; nothing here returns an error to the main loop.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sibyl_core::{Message, MessageKind, Outgoing};
use tower::{BoxError, ServiceExt};
use tracing::{debug, error, info, warn};

use crate::bot::Bot;
use crate::command::{CommandEntry, CommandTarget, expand_alias, join_args, tokenize};
use crate::handler::{CommandHandler, CommandRequest};
use crate::hook::{HookEvent, HookKind, HookRegistry};
use crate::permission::RuleSet;

// ============================================================================
// Settings
// ============================================================================

/// Behavior switches of the dispatcher.
///
/// Reply templates may contain `{cmd}`, replaced with the command name.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Required at the start of group commands, e.g. `!`. Doubling it
    /// (`!!`) repeats the sender's last command.
    pub cmd_prefix: Option<String>,
    /// Group commands must start with the bot's nick.
    pub only_direct: bool,
    /// Allow commands flagged as elevated control.
    pub enable_ctrl: bool,
    /// Reply with the error text instead of [`error_reply`](Self::error_reply).
    pub verbose_errors: bool,
    /// Keep per-user command history for `redo` and `last`.
    pub history: bool,
    /// Maximum number of alias expansions for one command line.
    pub alias_depth: usize,
    pub unknown_reply: String,
    pub error_reply: String,
    pub denied_reply: String,
    /// Reply for disabled commands and for refused control commands.
    pub ctrl_disabled_reply: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            cmd_prefix: None,
            only_direct: false,
            enable_ctrl: false,
            verbose_errors: false,
            history: true,
            alias_depth: 5,
            unknown_reply: "Unknown command \"{cmd}\"".to_string(),
            error_reply: "Sorry, something went wrong while running \"{cmd}\"".to_string(),
            denied_reply: "You are not allowed to use \"{cmd}\"".to_string(),
            ctrl_disabled_reply: "\"{cmd}\" is disabled".to_string(),
        }
    }
}

fn render(template: &str, command: &str) -> String {
    template.replace("{cmd}", command)
}

// ============================================================================
// Outcome & statistics
// ============================================================================

/// What happened to a dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// A status or error message; only hooks saw it.
    Event,
    /// A group message not addressed to the bot.
    NotAddressed,
    /// Addressed to the bot but empty.
    Empty,
    /// `redo` or `last` without history.
    NoHistory,
    Unknown(String),
    Denied(String),
    CtrlDisabled(String),
    /// The command exists but was switched off.
    Disabled(String),
    /// The command ran inline. Handler replies are already queued.
    Completed(String),
    /// The command was handed to a worker task.
    Spawned(String),
    Failed(String),
}

/// Dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub received: AtomicU64,
    pub commands: AtomicU64,
    pub forbidden: AtomicU64,
    pub unknown: AtomicU64,
    pub errors: AtomicU64,
}

impl fmt::Display for DispatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} commands={} forbidden={} unknown={} errors={}",
            self.received.load(Ordering::Relaxed),
            self.commands.load(Ordering::Relaxed),
            self.forbidden.load(Ordering::Relaxed),
            self.unknown.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ============================================================================
// Addressing
// ============================================================================

fn is_nick_separator(c: char) -> bool {
    c.is_whitespace() || c == ':' || c == ','
}

/// Removes a leading `nick` (case-insensitive) followed by whitespace, `:`
/// or `,`.
fn strip_nick<'a>(text: &'a str, nick: &str) -> Option<&'a str> {
    if nick.is_empty() {
        return None;
    }
    let head = text.get(..nick.len())?;
    if head.to_lowercase() != nick.to_lowercase() {
        return None;
    }
    let rest = &text[nick.len()..];
    match rest.chars().next() {
        None => Some(rest),
        Some(c) if is_nick_separator(c) => Some(rest.trim_start_matches(is_nick_separator)),
        Some(_) => None,
    }
}

struct Addressed<'a> {
    text: &'a str,
    nick: bool,
    prefix: bool,
}

// ============================================================================
// Dispatcher
// ============================================================================

type HistoryKey = (String, String);

/// Routes inbound messages to commands and hooks.
pub struct Dispatcher {
    bot: Bot,
    hooks: Arc<HookRegistry>,
    rules: Arc<RuleSet>,
    settings: DispatchSettings,
    history: Arc<Mutex<HashMap<HistoryKey, String>>>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(
        bot: Bot,
        hooks: Arc<HookRegistry>,
        rules: Arc<RuleSet>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            bot,
            hooks,
            rules,
            settings,
            history: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Runs one message through the pipeline.
    pub async fn dispatch(&self, msg: Message) -> Dispatched {
        bump(&self.stats.received);
        let msg = Arc::new(msg);
        let kind = msg.kind();

        if matches!(kind, MessageKind::Status | MessageKind::Error) {
            self.hooks
                .fire(&self.bot, HookKind::for_message(kind), HookEvent::Message(msg))
                .await;
            return Dispatched::Event;
        }

        let addressed = self.address(&msg);
        let eligible = kind == MessageKind::Private
            || (self.settings.only_direct && addressed.nick)
            || (self.settings.cmd_prefix.is_some() && addressed.prefix)
            || (!self.settings.only_direct && self.settings.cmd_prefix.is_none());

        let event = HookEvent::Message(msg.clone());
        self.hooks.fire(&self.bot, HookKind::Message, event.clone()).await;
        self.hooks.fire(&self.bot, HookKind::for_message(kind), event).await;

        if !eligible {
            return Dispatched::NotAddressed;
        }

        // A doubled prefix is shorthand for `redo`.
        let line = match &self.settings.cmd_prefix {
            Some(prefix) if addressed.prefix => match addressed.text.strip_prefix(prefix.as_str()) {
                Some(rest) => format!("redo {rest}"),
                None => addressed.text.to_string(),
            },
            _ => addressed.text.to_string(),
        };

        self.run_line(&msg, line).await
    }

    fn address<'a>(&self, msg: &'a Message) -> Addressed<'a> {
        let mut text = msg.text().trim_start();
        let mut nick = false;
        if msg.kind() == MessageKind::Group {
            let own = msg
                .room()
                .and_then(|room| self.bot.protocol(room.protocol()).map(|p| p.get_nick(room)))
                .unwrap_or_else(|| self.bot.nick().to_string());
            if let Some(rest) = strip_nick(text, &own).or_else(|| strip_nick(text, self.bot.nick())) {
                text = rest;
                nick = true;
            }
        }
        let mut prefix = false;
        if let Some(p) = self.settings.cmd_prefix.as_deref()
            && !p.is_empty()
            && let Some(rest) = text.strip_prefix(p)
        {
            text = rest;
            prefix = true;
        }
        Addressed { text, nick, prefix }
    }

    async fn run_line(&self, msg: &Arc<Message>, line: String) -> Dispatched {
        let mut tokens = tokenize(&line);
        if tokens.is_empty() {
            return Dispatched::Empty;
        }
        let mut command = tokens.remove(0).to_lowercase();
        let mut args = tokens;

        let history_key = (msg.protocol().to_string(), msg.user().real().id().to_string());
        let mut line = line;
        match command.as_str() {
            "last" => {
                let last = self.history.lock().get(&history_key).cloned();
                let Some(last) = last else {
                    self.reply(msg, "No command history");
                    return Dispatched::NoHistory;
                };
                self.reply(msg, last);
                return Dispatched::Completed(command);
            }
            "redo" => {
                let last = self.history.lock().get(&history_key).cloned();
                let Some(mut last) = last else {
                    self.reply(msg, "Nothing to redo");
                    return Dispatched::NoHistory;
                };
                if !args.is_empty() {
                    last.push(' ');
                    last.push_str(&join_args(&args));
                }
                debug!(user = %msg.user(), line = %last, "Redo");
                let mut tokens = tokenize(&last);
                if tokens.is_empty() {
                    return Dispatched::Empty;
                }
                command = tokens.remove(0).to_lowercase();
                args = tokens;
                line = last;
            }
            _ => {}
        }

        // Resolve, following aliases.
        let requested = command.clone();
        let mut depth = 0;
        let entry = loop {
            let resolved = self.bot.registry().read().resolve(&command).cloned();
            let Some(entry) = resolved else {
                return self.unknown(msg, command, args).await;
            };
            if !self.permitted(msg, &entry) {
                return Dispatched::Denied(command);
            }
            let CommandTarget::Alias(template) = entry.target() else {
                break entry;
            };
            depth += 1;
            if depth > self.settings.alias_depth {
                warn!(alias = %requested, depth, "Alias expansion too deep");
                self.reply(msg, format!("Alias \"{requested}\" expands too deeply"));
                bump(&self.stats.errors);
                return Dispatched::Failed(requested);
            }
            let mut tokens = tokenize(&expand_alias(template, &args));
            if tokens.is_empty() {
                return Dispatched::Empty;
            }
            command = tokens.remove(0).to_lowercase();
            args = tokens;
        };

        if !entry.is_enabled() {
            debug!(command = %command, "Disabled command refused");
            self.reply(msg, render(&self.settings.ctrl_disabled_reply, &command));
            return Dispatched::Disabled(command);
        }
        if entry.is_ctrl() && !self.settings.enable_ctrl {
            info!(command = %command, user = %msg.user(), "Control command refused");
            self.reply(msg, render(&self.settings.ctrl_disabled_reply, &command));
            return Dispatched::CtrlDisabled(command);
        }

        bump(&self.stats.commands);
        let record = self.settings.history.then(|| Record {
            history: self.history.clone(),
            key: history_key,
            line,
        });

        match entry.target() {
            CommandTarget::Trigger(text) => {
                self.reply(msg, text.clone());
                if let Some(record) = record {
                    record.commit();
                }
                Dispatched::Completed(command)
            }
            CommandTarget::Handler(handler) => {
                self.execute(msg, &entry, handler.clone(), command, args, record)
                    .await
            }
            CommandTarget::Alias(_) => Dispatched::Failed(command),
        }
    }

    fn permitted(&self, msg: &Message, entry: &CommandEntry) -> bool {
        let decision = self.rules.evaluate(
            msg.protocol(),
            msg.room(),
            msg.user(),
            Some(entry.namespace()),
            entry.name(),
        );
        if decision.is_allowed() {
            return true;
        }
        bump(&self.stats.forbidden);
        info!(
            user = %msg.user(),
            command = %entry.name(),
            rule = decision.rule.as_ref().map(|r| r.source()).unwrap_or(""),
            "Command denied"
        );
        self.reply(msg, render(&self.settings.denied_reply, entry.name()));
        false
    }

    async fn unknown(&self, msg: &Arc<Message>, command: String, args: Vec<String>) -> Dispatched {
        bump(&self.stats.unknown);
        match self.hooks.unknown(&self.bot, msg, &command, &args).await {
            Some(reply) => self.reply(msg, reply),
            None if msg.kind() == MessageKind::Private => {
                self.reply(msg, render(&self.settings.unknown_reply, &command));
            }
            None => debug!(command = %command, "Unknown group command ignored"),
        }
        Dispatched::Unknown(command)
    }

    async fn execute(
        &self,
        msg: &Arc<Message>,
        entry: &CommandEntry,
        handler: CommandHandler,
        command: String,
        args: Vec<String>,
        record: Option<Record>,
    ) -> Dispatched {
        let req = CommandRequest {
            bot: self.bot.clone(),
            msg: msg.clone(),
            args,
        };
        let completion = Completion {
            bot: self.bot.clone(),
            msg: msg.clone(),
            command: command.clone(),
            namespace: entry.namespace().to_string(),
            verbose: self.settings.verbose_errors,
            error_reply: self.settings.error_reply.clone(),
            stats: self.stats.clone(),
            record,
        };

        if entry.is_worker() {
            debug!(command = %command, "Spawning worker");
            tokio::spawn(async move {
                let result = handler.oneshot(req).await;
                completion.finish(result);
            });
            return Dispatched::Spawned(command);
        }

        let result = handler.oneshot(req).await;
        if completion.finish(result) {
            Dispatched::Completed(command)
        } else {
            Dispatched::Failed(command)
        }
    }

    fn reply(&self, msg: &Message, text: impl Into<String>) {
        send_reply(&self.bot, msg, text.into());
    }
}

fn send_reply(bot: &Bot, msg: &Message, text: String) {
    let out = Outgoing::new(text, msg.reply_target()).from_user(msg.user().clone());
    if bot.send(out).is_err() {
        warn!(user = %msg.user(), "Reply dropped: the bot is shutting down");
    }
}

/// A history line, stored once its command has succeeded.
struct Record {
    history: Arc<Mutex<HashMap<HistoryKey, String>>>,
    key: HistoryKey,
    line: String,
}

impl Record {
    fn commit(self) {
        self.history.lock().insert(self.key, self.line);
    }
}

/// Turns a handler result into a reply; shared by inline and worker runs.
struct Completion {
    bot: Bot,
    msg: Arc<Message>,
    command: String,
    namespace: String,
    verbose: bool,
    error_reply: String,
    stats: Arc<DispatchStats>,
    record: Option<Record>,
}

impl Completion {
    fn finish(self, result: Result<Option<String>, BoxError>) -> bool {
        if result.is_ok()
            && let Some(record) = self.record
        {
            record.commit();
        }
        match result {
            Ok(Some(text)) => {
                send_reply(&self.bot, &self.msg, text);
                true
            }
            Ok(None) => true,
            Err(e) => {
                bump(&self.stats.errors);
                error!(
                    command = %self.command,
                    plugin = %self.namespace,
                    user = %self.msg.user(),
                    error = %e,
                    "Command failed"
                );
                let text = if self.verbose {
                    e.to_string()
                } else {
                    render(&self.error_reply, &self.command)
                };
                send_reply(&self.bot, &self.msg, text);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sibyl_core::{Room, Target, User, UserKind};

    use super::*;
    use crate::bot::BotChannels;
    use crate::bot::testing::test_bot;
    use crate::define_plugin;
    use crate::manager::PluginManager;
    use crate::plugin::{PluginDescriptor, command, hook};

    async fn echo(_bot: Bot, _msg: Arc<Message>, args: Vec<String>) -> String {
        args.join(" ")
    }

    async fn fail(_bot: Bot, _msg: Arc<Message>, _args: Vec<String>) -> Result<(), BoxError> {
        Err("disk full".into())
    }

    async fn explode(_bot: Bot, _msg: Arc<Message>, _args: Vec<String>) {
        panic!("kaboom");
    }

    async fn slow(_bot: Bot, _msg: Arc<Message>, args: Vec<String>) -> String {
        tokio::time::sleep(Duration::from_millis(50)).await;
        format!("done {}", args.len())
    }

    async fn die(_bot: Bot, _msg: Arc<Message>, _args: Vec<String>) -> &'static str {
        "bye"
    }

    static TOOLS: PluginDescriptor = define_plugin! {
        name: "tools",
        items: [
            command("echo", echo),
            command("fail", fail),
            command("explode", explode),
            command("slow", slow).worker(),
            command("die", die).ctrl(),
            hook(HookKind::Message, |bot: Bot, _event| async move {
                if let Some(seen) = bot.state().get::<AtomicU64>("seen") {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            }),
        ],
    };

    fn alice() -> User {
        User::new("xmpp", "alice@example.org", UserKind::Private)
    }

    fn bob() -> User {
        User::new("xmpp", "bob@example.org", UserKind::Private)
    }

    fn lobby() -> Room {
        Room::new("xmpp", "lobby@conf")
    }

    fn in_lobby(nick: &str) -> User {
        User::new("xmpp", format!("lobby@conf/{nick}"), UserKind::Group)
    }

    async fn setup(rules: &[&str], settings: DispatchSettings) -> (Dispatcher, BotChannels) {
        let (bot, channels) = test_bot();
        bot.state().declare("test", "seen", AtomicU64::new(0)).unwrap();
        let mut mgr = PluginManager::new(bot.clone());
        mgr.register_plugin(TOOLS).unwrap();
        mgr.init_all().await;
        let rules = Arc::new(RuleSet::parse(rules).unwrap());
        (Dispatcher::new(bot, mgr.hooks(), rules, settings), channels)
    }

    fn next_reply(channels: &mut BotChannels) -> Option<Outgoing> {
        channels.outbound.try_recv().ok()
    }

    #[tokio::test]
    async fn test_private_echo() {
        let (d, mut rx) = setup(&["allow * *"], DispatchSettings::default()).await;

        let outcome = d.dispatch(Message::private(alice(), "echo hello world")).await;
        assert_eq!(outcome, Dispatched::Completed("echo".into()));

        let out = next_reply(&mut rx).unwrap();
        assert_eq!(out.text, "hello world");
        assert_eq!(out.target, Target::User(alice()));
        assert_eq!(out.from, Some(alice()));
    }

    #[tokio::test]
    async fn test_group_message_addressed_by_nick() {
        let settings = DispatchSettings {
            only_direct: true,
            ..Default::default()
        };
        let (d, mut rx) = setup(&[], settings).await;

        let msg = Message::group(lobby(), in_lobby("ally"), "SibylBot echo hi");
        assert_eq!(d.dispatch(msg).await, Dispatched::Completed("echo".into()));
        let out = next_reply(&mut rx).unwrap();
        assert_eq!(out.text, "hi");
        assert_eq!(out.target, Target::Room(lobby()));

        let msg = Message::group(lobby(), in_lobby("ally"), "sibylbot: echo again");
        assert_eq!(d.dispatch(msg).await, Dispatched::Completed("echo".into()));
        assert_eq!(next_reply(&mut rx).unwrap().text, "again");

        let msg = Message::group(lobby(), in_lobby("ally"), "echo ignored");
        assert_eq!(d.dispatch(msg).await, Dispatched::NotAddressed);
        let msg = Message::group(lobby(), in_lobby("ally"), "SibylBotty echo ignored");
        assert_eq!(d.dispatch(msg).await, Dispatched::NotAddressed);
        assert!(next_reply(&mut rx).is_none());

        // passive hooks saw all four
        let seen = d.bot.state().get::<AtomicU64>("seen").unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_prefix_mode() {
        let settings = DispatchSettings {
            cmd_prefix: Some("!".into()),
            ..Default::default()
        };
        let (d, mut rx) = setup(&[], settings).await;

        let msg = Message::group(lobby(), in_lobby("ally"), "!echo yes");
        assert_eq!(d.dispatch(msg).await, Dispatched::Completed("echo".into()));
        assert_eq!(next_reply(&mut rx).unwrap().text, "yes");

        let msg = Message::group(lobby(), in_lobby("ally"), "echo no");
        assert_eq!(d.dispatch(msg).await, Dispatched::NotAddressed);

        // private messages need no prefix
        d.dispatch(Message::private(alice(), "echo dm")).await;
        assert_eq!(next_reply(&mut rx).unwrap().text, "dm");
    }

    #[tokio::test]
    async fn test_last_matching_deny_rule_wins() {
        let (d, mut rx) = setup(&["allow * *", "deny user:alice@example.org *"], DispatchSettings::default()).await;

        let outcome = d.dispatch(Message::private(alice(), "echo hi")).await;
        assert_eq!(outcome, Dispatched::Denied("echo".into()));
        assert_eq!(next_reply(&mut rx).unwrap().text, "You are not allowed to use \"echo\"");
        assert_eq!(d.stats().forbidden.load(Ordering::Relaxed), 1);

        let outcome = d.dispatch(Message::private(bob(), "echo hi")).await;
        assert_eq!(outcome, Dispatched::Completed("echo".into()));
        assert_eq!(next_reply(&mut rx).unwrap().text, "hi");
    }

    #[tokio::test]
    async fn test_unknown_command_private_replies_group_silent() {
        let (d, mut rx) = setup(&[], DispatchSettings::default()).await;

        let outcome = d.dispatch(Message::private(alice(), "frobnicate now")).await;
        assert_eq!(outcome, Dispatched::Unknown("frobnicate".into()));
        assert_eq!(next_reply(&mut rx).unwrap().text, "Unknown command \"frobnicate\"");

        let msg = Message::group(lobby(), in_lobby("ally"), "SibylBot frobnicate");
        assert_eq!(d.dispatch(msg).await, Dispatched::Unknown("frobnicate".into()));
        assert!(next_reply(&mut rx).is_none());
        assert_eq!(d.stats().unknown.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_redo_and_last() {
        let settings = DispatchSettings {
            cmd_prefix: Some("!".into()),
            ..Default::default()
        };
        let (d, mut rx) = setup(&[], settings).await;

        assert_eq!(
            d.dispatch(Message::private(alice(), "redo")).await,
            Dispatched::NoHistory
        );
        assert_eq!(next_reply(&mut rx).unwrap().text, "Nothing to redo");

        d.dispatch(Message::private(alice(), "echo \"a b\"")).await;
        assert_eq!(next_reply(&mut rx).unwrap().text, "a b");

        // doubled prefix, trailing args appended
        let msg = Message::group(lobby(), in_lobby("ally").with_real(alice()).unwrap(), "!! c");
        assert_eq!(d.dispatch(msg).await, Dispatched::Completed("echo".into()));
        assert_eq!(next_reply(&mut rx).unwrap().text, "a b c");

        d.dispatch(Message::private(alice(), "last")).await;
        assert_eq!(next_reply(&mut rx).unwrap().text, "echo \"a b\" c");

        // history is per user
        assert_eq!(
            d.dispatch(Message::private(bob(), "last")).await,
            Dispatched::NoHistory
        );
    }

    #[tokio::test]
    async fn test_failed_commands_stay_out_of_history() {
        let (d, mut rx) = setup(&[], DispatchSettings::default()).await;

        d.dispatch(Message::private(alice(), "echo kept")).await;
        assert_eq!(next_reply(&mut rx).unwrap().text, "kept");
        d.dispatch(Message::private(alice(), "fail")).await;
        next_reply(&mut rx).unwrap();
        d.dispatch(Message::private(alice(), "explode")).await;
        next_reply(&mut rx).unwrap();

        d.dispatch(Message::private(alice(), "last")).await;
        assert_eq!(next_reply(&mut rx).unwrap().text, "echo kept");
        assert_eq!(
            d.dispatch(Message::private(alice(), "redo")).await,
            Dispatched::Completed("echo".into())
        );
        assert_eq!(next_reply(&mut rx).unwrap().text, "kept");
    }

    #[tokio::test]
    async fn test_worker_history_recorded_on_success() {
        let (d, mut rx) = setup(&[], DispatchSettings::default()).await;

        d.dispatch(Message::private(alice(), "slow a")).await;
        assert_eq!(rx.outbound.recv().await.unwrap().text, "done 1");

        d.dispatch(Message::private(alice(), "last")).await;
        assert_eq!(next_reply(&mut rx).unwrap().text, "slow a");
    }

    #[tokio::test]
    async fn test_passive_hooks_ignore_send_hook_flag() {
        let (d, mut rx) = setup(&[], DispatchSettings::default()).await;

        let msg = Message::builder(MessageKind::Private, alice())
            .text("echo quiet")
            .hook(false)
            .build()
            .unwrap();
        assert_eq!(d.dispatch(msg).await, Dispatched::Completed("echo".into()));
        assert_eq!(next_reply(&mut rx).unwrap().text, "quiet");

        let seen = d.bot.state().get::<AtomicU64>("seen").unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_reported() {
        let (d, mut rx) = setup(&[], DispatchSettings::default()).await;

        assert_eq!(
            d.dispatch(Message::private(alice(), "fail")).await,
            Dispatched::Failed("fail".into())
        );
        assert_eq!(
            next_reply(&mut rx).unwrap().text,
            "Sorry, something went wrong while running \"fail\""
        );

        assert_eq!(
            d.dispatch(Message::private(alice(), "explode")).await,
            Dispatched::Failed("explode".into())
        );
        assert!(next_reply(&mut rx).is_some());
        assert_eq!(d.stats().errors.load(Ordering::Relaxed), 2);

        // still serving
        d.dispatch(Message::private(alice(), "echo ok")).await;
        assert_eq!(next_reply(&mut rx).unwrap().text, "ok");
    }

    #[tokio::test]
    async fn test_verbose_errors() {
        let settings = DispatchSettings {
            verbose_errors: true,
            ..Default::default()
        };
        let (d, mut rx) = setup(&[], settings).await;
        d.dispatch(Message::private(alice(), "fail")).await;
        assert_eq!(next_reply(&mut rx).unwrap().text, "disk full");
        d.dispatch(Message::private(alice(), "explode")).await;
        assert_eq!(next_reply(&mut rx).unwrap().text, "panicked: kaboom");
    }

    #[tokio::test]
    async fn test_worker_replies_through_outbound_queue() {
        let (d, mut rx) = setup(&[], DispatchSettings::default()).await;

        let outcome = d.dispatch(Message::private(alice(), "slow x y")).await;
        assert_eq!(outcome, Dispatched::Spawned("slow".into()));

        d.dispatch(Message::private(alice(), "echo first")).await;
        assert_eq!(rx.outbound.recv().await.unwrap().text, "first");
        assert_eq!(rx.outbound.recv().await.unwrap().text, "done 2");
    }

    #[tokio::test]
    async fn test_ctrl_commands_need_enable_ctrl() {
        let (d, mut rx) = setup(&[], DispatchSettings::default()).await;
        assert_eq!(
            d.dispatch(Message::private(alice(), "die")).await,
            Dispatched::CtrlDisabled("die".into())
        );
        assert_eq!(next_reply(&mut rx).unwrap().text, "\"die\" is disabled");

        let settings = DispatchSettings {
            enable_ctrl: true,
            ..Default::default()
        };
        let (d, mut rx) = setup(&[], settings).await;
        d.dispatch(Message::private(alice(), "die")).await;
        assert_eq!(next_reply(&mut rx).unwrap().text, "bye");
    }

    #[tokio::test]
    async fn test_disabled_command_is_refused() {
        let (d, mut rx) = setup(&[], DispatchSettings::default()).await;
        d.bot.registry().write().set_enabled("echo", false).unwrap();
        assert_eq!(
            d.dispatch(Message::private(alice(), "echo hi")).await,
            Dispatched::Disabled("echo".into())
        );
        assert_eq!(next_reply(&mut rx).unwrap().text, "\"echo\" is disabled");

        d.bot.registry().write().set_enabled("echo", true).unwrap();
        d.dispatch(Message::private(alice(), "echo hi")).await;
        assert_eq!(next_reply(&mut rx).unwrap().text, "hi");
    }

    #[tokio::test]
    async fn test_aliases_and_triggers() {
        let (d, mut rx) = setup(&["deny * trigger.*"], DispatchSettings::default()).await;
        {
            let mut reg = d.bot.registry().write();
            reg.add_alias("say", "echo [$*]").unwrap();
            reg.add_alias("loop1", "loop2").unwrap();
            reg.add_alias("loop2", "loop1").unwrap();
            reg.add_trigger("hi", "hello there").unwrap();
        }

        d.dispatch(Message::private(alice(), "SAY a b")).await;
        assert_eq!(next_reply(&mut rx).unwrap().text, "[a b]");

        assert_eq!(
            d.dispatch(Message::private(alice(), "loop1")).await,
            Dispatched::Failed("loop1".into())
        );
        assert!(next_reply(&mut rx).unwrap().text.contains("too deeply"));

        assert_eq!(
            d.dispatch(Message::private(alice(), "hi")).await,
            Dispatched::Denied("hi".into())
        );
    }

    #[tokio::test]
    async fn test_status_messages_only_reach_hooks() {
        let (d, mut rx) = setup(&[], DispatchSettings::default()).await;
        let msg = Message::builder(MessageKind::Status, alice())
            .text("echo hi")
            .build()
            .unwrap();
        assert_eq!(d.dispatch(msg).await, Dispatched::Event);
        assert!(next_reply(&mut rx).is_none());
    }

    #[test]
    fn test_strip_nick() {
        assert_eq!(strip_nick("SibylBot: hi", "sibylbot"), Some("hi"));
        assert_eq!(strip_nick("sibylbot,hi", "SibylBot"), Some("hi"));
        assert_eq!(strip_nick("SibylBot", "SibylBot"), Some(""));
        assert_eq!(strip_nick("SibylBotty hi", "SibylBot"), None);
        assert_eq!(strip_nick("hi", "SibylBot"), None);
    }
}
