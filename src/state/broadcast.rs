//! Named broadcast channel registry used to fan battle events out to viewers.

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dto::events::ServerEvent;

/// Suffix selecting which per-stream channel an event targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelScope {
    /// `live-stream.{id}` — general battle events.
    Main,
    /// `live-stream.{id}.chat` — chat-scoped events.
    Chat,
    /// `live-stream.{id}.gifts` — gift-scoped events.
    Gifts,
}

/// Channel name for a live stream under the given scope.
///
/// The exact string formats are a compatibility surface; client subscriptions
/// depend on them.
pub fn stream_channel(stream_id: &str, scope: ChannelScope) -> String {
    match scope {
        ChannelScope::Main => format!("live-stream.{stream_id}"),
        ChannelScope::Chat => format!("live-stream.{stream_id}.chat"),
        ChannelScope::Gifts => format!("live-stream.{stream_id}.gifts"),
    }
}

/// Channel name for the battle-spectator channel, for viewers not tied to a
/// specific stream.
pub fn battle_channel(battle_id: Uuid) -> String {
    format!("pk-battle.{battle_id}")
}

/// Registry of named broadcast channels, created lazily on first use.
///
/// Publishing is fire-and-forget: an event sent to a channel nobody listens
/// to is silently dropped, matching the "silence means no change" contract.
pub struct ChannelHub {
    channels: DashMap<String, broadcast::Sender<ServerEvent>>,
    capacity: usize,
}

impl ChannelHub {
    /// Construct a hub whose channels buffer up to `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Register a new subscriber on `channel`, creating it if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<ServerEvent> {
        self.sender(channel).subscribe()
    }

    /// Send an event to every current subscriber of `channel`.
    pub fn publish(&self, channel: &str, event: ServerEvent) {
        let _ = self.sender(channel).send(event);
    }

    /// Number of channels that have been touched so far. Diagnostic only.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<ServerEvent> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_follow_the_wire_convention() {
        assert_eq!(stream_channel("abc", ChannelScope::Main), "live-stream.abc");
        assert_eq!(
            stream_channel("abc", ChannelScope::Chat),
            "live-stream.abc.chat"
        );
        assert_eq!(
            stream_channel("abc", ChannelScope::Gifts),
            "live-stream.abc.gifts"
        );

        let id = Uuid::new_v4();
        assert_eq!(battle_channel(id), format!("pk-battle.{id}"));
    }

    #[tokio::test]
    async fn events_reach_subscribers_of_the_same_channel_only() {
        let hub = ChannelHub::new(8);
        let mut a = hub.subscribe("live-stream.a");
        let mut b = hub.subscribe("live-stream.b");

        hub.publish(
            "live-stream.a",
            ServerEvent {
                event: Some("test".into()),
                data: "{}".into(),
            },
        );

        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let hub = ChannelHub::new(8);
        hub.publish(
            "live-stream.ghost",
            ServerEvent {
                event: None,
                data: "{}".into(),
            },
        );
        assert_eq!(hub.channel_count(), 1);
    }
}
