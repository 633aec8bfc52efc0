//! Tower service wrapping a single command handler.
//!
//! [`CommandService<F, R>`] implements `tower::Service<CommandRequest>`. Panic
//! containment and any other cross-cutting concern is stacked on top as an
//! ordinary [`Layer`](tower::Layer); see [`super::builder`].

use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use sibyl_core::Message;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, Service, ServiceBuilder};

use super::builder::ServiceBuilderExt;
use super::traits::{CommandFn, IntoReply};
use crate::bot::Bot;

/// Everything a command handler is invoked with.
#[derive(Clone)]
pub struct CommandRequest {
    pub bot: Bot,
    pub msg: Arc<Message>,
    pub args: Vec<String>,
}

/// A type-erased, cloneable command handler.
pub type CommandHandler = BoxCloneSyncService<CommandRequest, Option<String>, BoxError>;

/// A tower [`Service`] that calls a single handler function.
pub struct CommandService<F, R> {
    handler: F,
    _marker: PhantomData<fn() -> R>,
}

impl<F, R> CommandService<F, R> {
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<F: Clone, R> Clone for CommandService<F, R> {
    fn clone(&self) -> Self {
        CommandService {
            handler: self.handler.clone(),
            _marker: PhantomData,
        }
    }
}

impl<F, R> Service<CommandRequest> for CommandService<F, R>
where
    F: CommandFn<R>,
    R: IntoReply,
{
    type Response = Option<String>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Option<String>, BoxError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: CommandRequest) -> Self::Future {
        let handler = self.handler.clone();
        async move {
            handler
                .call(req.bot, req.msg, req.args)
                .await
                .into_reply()
        }
        .boxed()
    }
}

/// Wraps a handler function into a panic-contained, boxed [`CommandHandler`].
pub fn into_handler<F, R>(handler: F) -> CommandHandler
where
    F: CommandFn<R>,
    R: IntoReply,
{
    BoxCloneSyncService::new(ServiceBuilder::new().contain().command(handler))
}
