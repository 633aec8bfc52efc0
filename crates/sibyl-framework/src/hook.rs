//! Lifecycle, passive and idle hooks.
//!
//! Hooks are plain async callbacks stored in a [`HookRegistry`]. They observe
//! events (every inbound message, connects, room joins, sends, ...) and never
//! produce replies directly; a hook that wants to talk uses [`Bot::send`].
//! Every invocation is panic-contained and its failure is only logged.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use sibyl_core::{Message, MessageKind, Outgoing, Room};
use tower::BoxError;
use tracing::warn;

use crate::bot::Bot;
use crate::handler::{IntoReply, run_contained};

/// Which events a hook wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Every private and group message.
    Message,
    Private,
    Group,
    Status,
    Error,
    Connect,
    Disconnect,
    RoomJoined,
    RoomJoinFailed,
    /// After a message was handed to a protocol.
    Send,
}

impl HookKind {
    /// The message-level hook kind matching a message type.
    pub fn for_message(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Private => Self::Private,
            MessageKind::Group => Self::Group,
            MessageKind::Status => Self::Status,
            MessageKind::Error => Self::Error,
        }
    }
}

/// Payload delivered to a hook.
#[derive(Debug, Clone)]
pub enum HookEvent {
    Message(Arc<Message>),
    Connected { protocol: String },
    Disconnected { protocol: String, reason: String },
    RoomJoined(Room),
    RoomJoinFailed { room: Room, reason: String },
    /// `text` is what the protocol actually sent.
    Sent { outgoing: Outgoing, text: String },
}

/// Type-erased hook callback.
pub type HookFn = Arc<dyn Fn(Bot, HookEvent) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Type-erased unknown-command callback: `(bot, message, command, args)`.
pub type UnknownFn = Arc<
    dyn Fn(Bot, Arc<Message>, String, Vec<String>) -> BoxFuture<'static, Result<Option<String>, BoxError>>
        + Send
        + Sync,
>;

/// Type-erased periodic callback.
pub type IdleFn = Arc<dyn Fn(Bot) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Erases an async hook function.
pub fn hook_fn<F, Fut, R>(f: F) -> HookFn
where
    F: Fn(Bot, HookEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    Arc::new(move |bot, event| {
        let fut = f(bot, event);
        async move { fut.await.into_reply().map(|_| ()) }.boxed()
    })
}

/// Erases an async unknown-command function.
pub fn unknown_fn<F, Fut, R>(f: F) -> UnknownFn
where
    F: Fn(Bot, Arc<Message>, String, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    Arc::new(move |bot, msg, cmd, args| {
        let fut = f(bot, msg, cmd, args);
        async move { fut.await.into_reply() }.boxed()
    })
}

/// Erases an async idle function.
pub fn idle_fn<F, Fut, R>(f: F) -> IdleFn
where
    F: Fn(Bot) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    Arc::new(move |bot| {
        let fut = f(bot);
        async move { fut.await.into_reply().map(|_| ()) }.boxed()
    })
}

/// A periodic hook as registered by a plugin.
#[derive(Clone)]
pub struct IdleHook {
    pub name: String,
    pub namespace: String,
    /// Minimum time between two runs.
    pub interval: Duration,
    /// Run off the main loop.
    pub worker: bool,
    pub func: IdleFn,
}

impl std::fmt::Debug for IdleHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleHook")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("interval", &self.interval)
            .field("worker", &self.worker)
            .finish()
    }
}

#[derive(Clone)]
struct HookEntry {
    namespace: String,
    func: HookFn,
}

#[derive(Clone)]
struct UnknownEntry {
    namespace: String,
    func: UnknownFn,
}

/// All registered event hooks.
///
/// Written during plugin loading, read by the dispatcher and main loop.
/// Callbacks are cloned out before running so no lock is held across an
/// await.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<HookKind, Vec<HookEntry>>>,
    unknown: RwLock<Vec<UnknownEntry>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, kind: HookKind, namespace: impl Into<String>, func: HookFn) {
        self.hooks.write().entry(kind).or_default().push(HookEntry {
            namespace: namespace.into(),
            func,
        });
    }

    /// Adds an unknown-command hook. Later registrations are consulted first,
    /// so a plugin can override the behavior of one loaded before it.
    pub fn add_unknown(&self, namespace: impl Into<String>, func: UnknownFn) {
        self.unknown.write().insert(
            0,
            UnknownEntry {
                namespace: namespace.into(),
                func,
            },
        );
    }

    /// Drops every hook registered by `namespace`.
    pub fn remove_namespace(&self, namespace: &str) {
        for list in self.hooks.write().values_mut() {
            list.retain(|h| h.namespace != namespace);
        }
        self.unknown.write().retain(|h| h.namespace != namespace);
    }

    pub fn count(&self, kind: HookKind) -> usize {
        self.hooks.read().get(&kind).map_or(0, Vec::len)
    }

    /// Runs every hook of `kind` in registration order.
    ///
    /// Returns how many of them failed.
    pub async fn fire(&self, bot: &Bot, kind: HookKind, event: HookEvent) -> usize {
        let hooks = self.hooks.read().get(&kind).cloned().unwrap_or_default();
        let mut failures = 0;
        for hook in hooks {
            if let Err(e) = run_contained((hook.func)(bot.clone(), event.clone())).await {
                failures += 1;
                warn!(
                    hook = ?kind,
                    plugin = %hook.namespace,
                    error = %e,
                    "Hook failed"
                );
            }
        }
        failures
    }

    /// Offers an unknown command to the unknown-command hooks until one
    /// replies.
    pub async fn unknown(
        &self,
        bot: &Bot,
        msg: &Arc<Message>,
        command: &str,
        args: &[String],
    ) -> Option<String> {
        let hooks = self.unknown.read().clone();
        for hook in hooks {
            let fut = (hook.func)(bot.clone(), msg.clone(), command.to_string(), args.to_vec());
            match run_contained(fut).await {
                Ok(Some(reply)) => return Some(reply),
                Ok(None) => {}
                Err(e) => {
                    warn!(plugin = %hook.namespace, error = %e, "Unknown-command hook failed");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sibyl_core::{User, UserKind};

    use super::*;
    use crate::bot::testing::test_bot;

    #[tokio::test]
    async fn test_fire_contains_failures() {
        let (bot, _rx) = test_bot();
        let hooks = HookRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        hooks.add(
            HookKind::Connect,
            "a",
            hook_fn(move |_bot, _event| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        hooks.add(
            HookKind::Connect,
            "b",
            hook_fn(|_bot, _event| async { Err::<(), _>(std::io::Error::other("nope")) }),
        );
        hooks.add(
            HookKind::Connect,
            "c",
            hook_fn(|_bot, _event| async {
                if true {
                    panic!("hook exploded");
                }
            }),
        );

        let event = HookEvent::Connected {
            protocol: "xmpp".into(),
        };
        let failures = hooks.fire(&bot, HookKind::Connect, event).await;
        assert_eq!(failures, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_later_unknown_hook_overrides() {
        let (bot, _rx) = test_bot();
        let hooks = HookRegistry::new();
        hooks.add_unknown("first", unknown_fn(|_b, _m, _c, _a| async { "first" }));
        hooks.add_unknown("second", unknown_fn(|_b, _m, cmd, _a| async move { format!("no {cmd}") }));

        let msg = Arc::new(Message::private(User::new("cli", "me", UserKind::Private), "frob"));
        let reply = hooks.unknown(&bot, &msg, "frob", &[]).await;
        assert_eq!(reply.as_deref(), Some("no frob"));

        hooks.remove_namespace("second");
        let reply = hooks.unknown(&bot, &msg, "frob", &[]).await;
        assert_eq!(reply.as_deref(), Some("first"));
    }
}
