use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tower::BoxError;

use super::state::ExtensionStore;
use crate::bot::Bot;
use crate::error::StateError;
use crate::handler::{CommandFn, CommandHandler, IntoReply, into_handler};
use crate::hook::{HookFn, HookKind, IdleFn, UnknownFn, hook_fn, idle_fn, unknown_fn};

/// Default interval between two runs of an idle hook.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(1);

// ─── PluginInitContext ────────────────────────────────────────────────────────

/// Context passed to a plugin's init hooks.
///
/// Provides the bot handle, the plugin's configuration section (or `null`
/// when absent), and state declaration scoped to the plugin's namespace.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(serde::Deserialize, Default)]
/// #[serde(default)]
/// struct GreetConfig { greeting: String }
///
/// async fn setup(ctx: PluginInitContext) -> anyhow::Result<()> {
///     let cfg: GreetConfig = ctx.get_config()?;
///     ctx.declare_state("greet.text", cfg.greeting)?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct PluginInitContext {
    bot: Bot,
    namespace: Arc<str>,
    config: Arc<serde_json::Value>,
}

impl PluginInitContext {
    pub(crate) fn new(bot: Bot, namespace: &str) -> Self {
        let config = bot.plugin_config(namespace);
        Self {
            bot,
            namespace: namespace.into(),
            config,
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Name of the plugin being initialized.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Deserializes the plugin's configuration section into `T`.
    ///
    /// A missing section is `null`; use `#[serde(default)]` on `T` to accept it.
    pub fn get_config<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(self.config.as_ref())
    }

    /// Declares an extension-state key owned by this plugin.
    pub fn declare_state<T>(&self, key: &str, value: T) -> Result<Arc<T>, StateError>
    where
        T: std::any::Any + Send + Sync,
    {
        self.state().declare(&self.namespace, key, value)
    }

    pub fn state(&self) -> &ExtensionStore {
        self.bot.state()
    }
}

/// Type-erased init hook.
pub type InitFn = Arc<dyn Fn(PluginInitContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

// ─── Items ────────────────────────────────────────────────────────────────────

/// A command contributed by a plugin. Created by [`command`].
pub struct CommandItem {
    pub(crate) name: Cow<'static, str>,
    pub(crate) handler: CommandHandler,
    pub(crate) ctrl: bool,
    pub(crate) hidden: bool,
    pub(crate) worker: bool,
}

impl CommandItem {
    /// Requires the elevated-control feature.
    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    /// Hides the command from help listings.
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Runs the handler on its own task so it cannot stall dispatch.
    pub fn worker(mut self) -> Self {
        self.worker = true;
        self
    }
}

/// An event hook contributed by a plugin. Created by [`hook`].
pub struct HookItem {
    pub(crate) kind: HookKind,
    pub(crate) func: HookFn,
}

/// A periodic hook contributed by a plugin. Created by [`idle`].
pub struct IdleItem {
    pub(crate) name: Cow<'static, str>,
    pub(crate) interval: Duration,
    pub(crate) worker: bool,
    pub(crate) func: IdleFn,
}

impl IdleItem {
    /// Minimum time between two runs.
    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs the hook on its own task.
    pub fn worker(mut self) -> Self {
        self.worker = true;
        self
    }
}

/// Everything a plugin may contribute.
pub enum PluginItem {
    Command(CommandItem),
    Hook(HookItem),
    Idle(IdleItem),
    Init(InitFn),
    UnknownCommand(UnknownFn),
}

impl From<CommandItem> for PluginItem {
    fn from(item: CommandItem) -> Self {
        Self::Command(item)
    }
}

impl From<HookItem> for PluginItem {
    fn from(item: HookItem) -> Self {
        Self::Hook(item)
    }
}

impl From<IdleItem> for PluginItem {
    fn from(item: IdleItem) -> Self {
        Self::Idle(item)
    }
}

/// Declares a command.
///
/// ```rust,ignore
/// command("echo", echo)
/// command("fetch", fetch).worker()
/// command("die", die).ctrl().hidden()
/// ```
pub fn command<F, R>(name: impl Into<Cow<'static, str>>, handler: F) -> CommandItem
where
    F: CommandFn<R>,
    R: IntoReply,
{
    CommandItem {
        name: name.into(),
        handler: into_handler(handler),
        ctrl: false,
        hidden: false,
        worker: false,
    }
}

/// Declares an event hook.
pub fn hook<F, Fut, R>(kind: HookKind, f: F) -> HookItem
where
    F: Fn(Bot, crate::hook::HookEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    HookItem {
        kind,
        func: hook_fn(f),
    }
}

/// Declares a periodic hook, run at most every [`DEFAULT_IDLE_INTERVAL`]
/// unless changed with [`IdleItem::every`].
pub fn idle<F, Fut, R>(name: impl Into<Cow<'static, str>>, f: F) -> IdleItem
where
    F: Fn(Bot) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    IdleItem {
        name: name.into(),
        interval: DEFAULT_IDLE_INTERVAL,
        worker: false,
        func: idle_fn(f),
    }
}

/// Declares an init hook, run once after every plugin's commands are registered.
pub fn init<F, Fut, R>(f: F) -> PluginItem
where
    F: Fn(PluginInitContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    PluginItem::Init(Arc::new(move |ctx| {
        let fut = f(ctx);
        async move { fut.await.into_reply().map(|_| ()) }.boxed()
    }))
}

/// Declares an unknown-command hook.
pub fn on_unknown<F, Fut, R>(f: F) -> PluginItem
where
    F: Fn(Bot, Arc<sibyl_core::Message>, String, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    PluginItem::UnknownCommand(unknown_fn(f))
}

// ─── PluginMetadata ───────────────────────────────────────────────────────────

/// Descriptive metadata attached to every plugin.
///
/// | Field | Default |
/// |-------|---------|
/// | `version` | `CARGO_PKG_VERSION` of the crate that defined the plugin |
/// | `desc` | the `///` doc comment above `name:` in [`define_plugin!`], or `""` |
#[derive(Debug, Clone, Copy)]
pub struct PluginMetadata {
    pub version: &'static str,
    pub desc: &'static str,
}

// ─── Plugin ───────────────────────────────────────────────────────────────────

/// A live plugin instance: a name plus the items it contributes.
///
/// Create via the [`define_plugin!`] macro.
pub struct Plugin {
    name: Cow<'static, str>,
    items: Vec<PluginItem>,
    metadata: PluginMetadata,
}

impl Plugin {
    #[doc(hidden)]
    pub fn __new(name: &'static str, items: Vec<PluginItem>, metadata: PluginMetadata) -> Self {
        Self {
            name: Cow::Borrowed(name),
            items,
            metadata,
        }
    }

    /// Builds a plugin at runtime, outside the macro.
    pub fn new(name: impl Into<Cow<'static, str>>, items: Vec<PluginItem>) -> Self {
        Self {
            name: name.into(),
            items,
            metadata: PluginMetadata {
                version: "0.0.0",
                desc: "",
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    pub fn items(&self) -> &[PluginItem] {
        &self.items
    }

    pub(crate) fn take_items(&mut self) -> Vec<PluginItem> {
        std::mem::take(&mut self.items)
    }
}
