//! Token events flowing from the OAuth client to whoever persists them.
//!
//! The client emits via [`EventBus::emit`] and the authorizer subscribes via
//! [`EventBus::subscribe`]. Built on [`tokio::sync::broadcast`] so a late or
//! slow subscriber never blocks the client.

use tokio::sync::broadcast;

use crate::auth::oauth::Tokens;

/// Events that flow through the system.
#[derive(Debug, Clone)]
pub enum TokenEvent {
    /// The provider handed out new tokens outside an explicit code exchange.
    Refreshed(Tokens),
}

/// A broadcast channel that any component can emit to or subscribe from.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<TokenEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all current subscribers.
    /// Returns the number of receivers that will see it.
    pub fn emit(&self, event: TokenEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<TokenEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refreshed(refresh: &str) -> TokenEvent {
        TokenEvent::Refreshed(Tokens {
            refresh_token: Some(refresh.to_string()),
            ..Tokens::default()
        })
    }

    #[tokio::test]
    async fn emit_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(refreshed("1//rotated"));

        match rx.recv().await.unwrap() {
            TokenEvent::Refreshed(tokens) => {
                assert_eq!(tokens.refresh_token.as_deref(), Some("1//rotated"))
            }
        }
    }

    #[test]
    fn emit_without_subscribers_returns_zero() {
        let bus = EventBus::default();
        assert_eq!(bus.emit(refreshed("x")), 0);
    }

    #[tokio::test]
    async fn subscriber_does_not_see_earlier_events() {
        let bus = EventBus::default();
        let _keep = bus.subscribe();
        bus.emit(refreshed("before"));

        let mut late = bus.subscribe();
        bus.emit(refreshed("after"));

        match late.recv().await.unwrap() {
            TokenEvent::Refreshed(tokens) => {
                assert_eq!(tokens.refresh_token.as_deref(), Some("after"))
            }
        }
    }
}
