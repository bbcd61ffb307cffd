//! SSE adaptor over the live event bus. Keeps HTTP types out of `events.rs`.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;

use crate::events::{EventBus, SubscriberId, Subscription};

/// Wraps a bus subscription as an SSE event stream; unsubscribes exactly
/// once when the stream is dropped (client disconnect).
struct SubscriptionStream {
    events: Arc<EventBus>,
    id: SubscriberId,
    rx: tokio::sync::mpsc::Receiver<crate::events::CheckResultEvent>,
    sent_connected: bool,
}

impl Stream for SubscriptionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.sent_connected {
            self.sent_connected = true;
            return Poll::Ready(Some(Ok(Event::default().event("connected").data("{}"))));
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".into());
                Poll::Ready(Some(Ok(Event::default().event("check_update").data(payload))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        self.events.unsubscribe(self.id);
    }
}

pub async fn sse_handler(State(events): State<Arc<EventBus>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let Subscription { id, rx } = events.subscribe();
    let stream = SubscriptionStream {
        events,
        id,
        rx,
        sent_connected: false,
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keepalive"))
}
