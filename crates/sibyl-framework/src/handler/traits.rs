//! Handler function traits.
//!
//! A command handler is any async function of `(Bot, Arc<Message>, Vec<String>)`
//! whose output implements [`IntoReply`]:
//!
//! ```rust,ignore
//! async fn echo(_bot: Bot, _msg: Arc<Message>, args: Vec<String>) -> String {
//!     args.join(" ")
//! }
//!
//! async fn lookup(bot: Bot, msg: Arc<Message>, args: Vec<String>) -> anyhow::Result<Option<String>> {
//!     // ...
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use sibyl_core::Message;
use tower::BoxError;

use crate::bot::Bot;

// ============================================================================
// IntoReply
// ============================================================================

/// Values a handler may return.
///
/// `Ok(None)` means "nothing to say"; an empty string is treated the same way.
pub trait IntoReply: Send + 'static {
    fn into_reply(self) -> Result<Option<String>, BoxError>;
}

impl IntoReply for () {
    fn into_reply(self) -> Result<Option<String>, BoxError> {
        Ok(None)
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Result<Option<String>, BoxError> {
        Ok((!self.is_empty()).then_some(self))
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Result<Option<String>, BoxError> {
        self.to_string().into_reply()
    }
}

impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Result<Option<String>, BoxError> {
        match self {
            Some(t) => t.into_reply(),
            None => Ok(None),
        }
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<BoxError> + Send + 'static,
{
    fn into_reply(self) -> Result<Option<String>, BoxError> {
        match self {
            Ok(t) => t.into_reply(),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// CommandFn
// ============================================================================

/// Blanket-implemented for async command handler functions.
pub trait CommandFn<R>: Clone + Send + Sync + 'static {
    fn call(&self, bot: Bot, msg: Arc<Message>, args: Vec<String>) -> BoxFuture<'static, R>;
}

impl<F, Fut, R> CommandFn<R> for F
where
    F: Fn(Bot, Arc<Message>, Vec<String>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    fn call(&self, bot: Bot, msg: Arc<Message>, args: Vec<String>) -> BoxFuture<'static, R> {
        (self)(bot, msg, args).boxed()
    }
}
