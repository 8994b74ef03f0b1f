//! Subscriber trait and closure adapter.

use crate::error::HandlerError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use voxline_types::Event;

pub type HandlerResult = Result<(), HandlerError>;

/// A subscriber to one or more bus topics.
///
/// Handlers are registered as `Arc<dyn EventHandler>`; the `Arc` pointer is
/// the handler's identity for duplicate detection and unsubscription.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str;

    async fn handle(&self, event: &Event) -> HandlerResult;
}

/// Adapts an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> HandlerResult {
        (self.f)(event.clone()).await
    }
}

/// Wraps an async closure as a shareable handler.
///
/// Keep the returned `Arc` to unsubscribe later; a second `handler_fn` call
/// with the same closure produces a distinct handler.
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}
