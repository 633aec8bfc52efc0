//! Extension trait for tower service builder.
//!
//! Provides the panic-containment layer every handler is wrapped in, and
//! shorthand for finishing a builder with a command handler.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tower::{BoxError, Layer, Service, ServiceBuilder};
use tower_layer::Stack;

use super::service::CommandService;
use super::traits::{CommandFn, IntoReply};
use crate::error::HandlerPanic;

/// Runs `fut`, turning a panic into a [`HandlerPanic`] error.
pub async fn run_contained<F, T>(fut: F) -> Result<T, BoxError>
where
    F: Future<Output = Result<T, BoxError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Box::new(HandlerPanic(panic_message(payload.as_ref())))),
    }
}

/// Extracts the text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A layer that converts panics inside the inner service into errors.
///
/// A panicking handler then looks exactly like one that returned `Err`, and
/// the dispatcher reports it the same way.
#[derive(Clone)]
pub struct ContainLayer;

impl<S> Layer<S> for ContainLayer {
    type Service = ContainService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContainService(inner)
    }
}

pub struct ContainService<S>(S);

impl<S> Clone for ContainService<S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        ContainService(self.0.clone())
    }
}

impl<S, Req> Service<Req> for ContainService<S>
where
    S: Service<Req, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<S::Response, BoxError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let mut inner = self.0.clone();
        // Panics may also happen while building the future.
        async move { run_contained(async move { inner.call(req).await }).await }.boxed()
    }
}

/// Extension trait for [`tower::ServiceBuilder`].
pub trait ServiceBuilderExt<L> {
    /// Wraps `handler` in a [`CommandService`] and applies all stacked layers.
    fn command<F, R>(self, handler: F) -> L::Service
    where
        F: CommandFn<R>,
        R: IntoReply,
        L: Layer<CommandService<F, R>>;

    /// Adds a layer that turns panics into errors.
    fn contain(self) -> ServiceBuilder<Stack<ContainLayer, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn command<F, R>(self, handler: F) -> L::Service
    where
        F: CommandFn<R>,
        R: IntoReply,
        L: Layer<CommandService<F, R>>,
    {
        self.service(CommandService::new(handler))
    }

    fn contain(self) -> ServiceBuilder<Stack<ContainLayer, L>> {
        self.layer(ContainLayer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explode() -> Result<(), BoxError> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_run_contained_catches_panic() {
        let result = run_contained(async { explode() }).await;
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "panicked: boom");
        assert!(err.downcast_ref::<HandlerPanic>().is_some());
    }

    #[tokio::test]
    async fn test_run_contained_passes_values_through() {
        let result = run_contained(async { Ok::<_, BoxError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
