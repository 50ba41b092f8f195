//! Inbound event dispatch.

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use futures::{StreamExt, stream::BoxStream};
use tokio::{sync::oneshot, task::JoinHandle};
use wa_bridge_core::{EventKind, InboundEvent};

/// Handler for one kind of inbound event.
///
/// Called on the event task itself: implementations must return quickly
/// and move slow work onto their own task.
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    fn handle(&self, event: &InboundEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&InboundEvent) + Send + Sync,
{
    fn handle(&self, event: &InboundEvent) {
        self(event);
    }
}

/// Routes inbound events to handlers by kind.
///
/// Events of a kind nobody registered for are dropped.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl EventRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`.
    #[must_use]
    pub fn on(mut self, kind: EventKind, handler: impl EventHandler + 'static) -> Self {
        self.handlers
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
        self
    }

    /// Number of registered handlers across all kinds.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    /// Deliver `event` to its handlers. Returns how many ran.
    pub fn dispatch(&self, event: &InboundEvent) -> usize {
        let kind = event.kind();
        let Some(handlers) = self.handlers.get(&kind) else {
            tracing::trace!(?kind, "No handler for event");
            return 0;
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler.handle(event))).is_err() {
                tracing::error!(?kind, "Event handler panicked");
            }
        }
        handlers.len()
    }

    /// Consume `events` on a new task until the stream ends or `stop` fires.
    pub fn spawn(
        self,
        mut events: BoxStream<'static, InboundEvent>,
        mut stop: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    next = events.next() => match next {
                        Some(event) => {
                            self.dispatch(&event);
                        }
                        None => {
                            tracing::debug!("Inbound event stream ended");
                            break;
                        }
                    },
                    _ = &mut stop => {
                        tracing::debug!("Event router stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use wa_bridge_core::MessageEvent;

    use super::*;

    fn message(text: &str) -> InboundEvent {
        InboundEvent::Message(MessageEvent {
            id: "3EB0C767D26A".into(),
            sender: "1000000001@s.whatsapp.net".into(),
            chat: "1000000001@s.whatsapp.net".into(),
            conversation: Some(text.into()),
            timestamp: 1_700_000_000,
        })
    }

    fn explode(_: &InboundEvent) {
        panic!("boom");
    }

    fn counter() -> (Arc<AtomicUsize>, impl EventHandler + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move |_: &InboundEvent| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_dispatch_by_kind() {
        let (messages, on_message) = counter();
        let (receipts, on_receipt) = counter();
        let router = EventRouter::new()
            .on(EventKind::Message, on_message)
            .on(EventKind::Receipt, on_receipt);

        assert_eq!(router.dispatch(&message("hi")), 1);
        assert_eq!(messages.load(Ordering::SeqCst), 1);
        assert_eq!(receipts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_kind_ignored() {
        let (messages, on_message) = counter();
        let router = EventRouter::new().on(EventKind::Message, on_message);

        let handled = router.dispatch(&InboundEvent::Other {
            kind: "presence".into(),
        });

        assert_eq!(handled, 0);
        assert_eq!(messages.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let (messages, on_message) = counter();
        let router = EventRouter::new()
            .on(EventKind::Message, explode)
            .on(EventKind::Message, on_message);

        assert_eq!(router.dispatch(&message("hi")), 2);
        assert_eq!(messages.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawned_router_drains_stream() {
        let (messages, on_message) = counter();
        let router = EventRouter::new().on(EventKind::Message, on_message);
        let events = futures::stream::iter(vec![
            message("one"),
            InboundEvent::Connected,
            message("two"),
        ])
        .boxed();
        let (_stop_tx, stop_rx) = oneshot::channel();

        router.spawn(events, stop_rx).await.unwrap();

        assert_eq!(messages.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_ends_router() {
        let router = EventRouter::new();
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = router.spawn(futures::stream::pending().boxed(), stop_rx);

        stop_tx.send(()).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
