//! Notification broadcasting for instance subscriptions.

use arbor_core::Notification;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A notification tagged with the instance that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceEvent {
    pub instance_id: String,
    #[serde(flatten)]
    pub notification: Notification,
}

/// Filter for subscriptions to all instances.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only notifications from these charts (empty = all).
    pub machines: Vec<String>,
    /// Only these instances (empty = all).
    pub instances: Vec<String>,
    /// Only these notification kinds, e.g. `transitioned` (empty = all).
    pub kinds: Vec<String>,
    /// Only notifications about these event names (empty = all).
    pub events: Vec<String>,
    /// Only notifications touching these states (empty = all).
    pub states: Vec<String>,
}

impl EventFilter {
    /// Returns true if the event matches this filter.
    pub fn matches(&self, event: &InstanceEvent) -> bool {
        let n = &event.notification;
        (self.machines.is_empty() || self.machines.iter().any(|m| m == n.machine()))
            && (self.instances.is_empty() || self.instances.contains(&event.instance_id))
            && (self.kinds.is_empty() || self.kinds.iter().any(|k| k == n.kind()))
            && (self.events.is_empty() || event_name(n).is_some_and(|e| self.events.contains(e)))
            && (self.states.is_empty() || touches_state(n, &self.states))
    }
}

fn event_name(n: &Notification) -> Option<&String> {
    match n {
        Notification::Transitioned { event, .. } | Notification::Dispatched { event, .. } => {
            Some(event)
        }
        _ => None,
    }
}

fn touches_state(n: &Notification, states: &[String]) -> bool {
    match n {
        Notification::Entered { state, .. } | Notification::Exited { state, .. } => {
            states.contains(state)
        }
        Notification::Transitioned { source, target, .. } => {
            states.contains(source) || target.as_ref().is_some_and(|t| states.contains(t))
        }
        Notification::Started { configuration, .. }
        | Notification::Dispatched { configuration, .. } => {
            configuration.iter().any(|s| states.contains(s))
        }
        Notification::Stopped { .. } => false,
    }
}

/// Subscription type.
#[derive(Debug, Clone)]
pub enum SubscriptionType {
    /// Watch a specific instance.
    Instance { instance_id: String },
    /// Watch all instances (optionally filtered).
    All { filter: EventFilter },
}

/// Subscription info.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub subscription_id: String,
    pub subscription_type: SubscriptionType,
}

/// Receiving end of a subscription. Applies the subscription's filter.
pub struct Watcher {
    subscription_id: String,
    receiver: broadcast::Receiver<InstanceEvent>,
    filter: Option<EventFilter>,
}

impl Watcher {
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Waits for the next matching event. Returns `None` once the channel
    /// is closed.
    pub async fn recv(&mut self) -> Option<InstanceEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if let Some(ref f) = self.filter {
                        if !f.matches(&event) {
                            continue;
                        }
                    }
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Subscription {} lagged {} events", self.subscription_id, n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<InstanceEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.as_ref().map_or(true, |f| f.matches(&event)) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!("Subscription {} lagged {} events", self.subscription_id, n);
                }
                Err(_) => return None,
            }
        }
    }
}

/// Fans instance notifications out to subscribers.
pub struct EventBroadcaster {
    /// Per-instance broadcast channels.
    channels: DashMap<String, broadcast::Sender<InstanceEvent>>,

    /// Global broadcast channel.
    global_sender: broadcast::Sender<InstanceEvent>,

    /// Subscription metadata.
    subscriptions: DashMap<String, Subscription>,

    /// Channel capacity.
    channel_capacity: usize,
}

impl EventBroadcaster {
    /// Creates a new EventBroadcaster with the specified channel capacity.
    pub fn new(channel_capacity: usize) -> Self {
        let (global_sender, _) = broadcast::channel(channel_capacity);
        Self {
            channels: DashMap::new(),
            global_sender,
            subscriptions: DashMap::new(),
            channel_capacity,
        }
    }

    /// Subscribes to a specific instance's notifications.
    pub fn subscribe_instance(&self, instance_id: &str) -> Watcher {
        let subscription_id = format!("sub-{}", uuid::Uuid::new_v4());

        // Get or create channel for this instance
        let sender = self
            .channels
            .entry(instance_id.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .clone();

        self.subscriptions.insert(
            subscription_id.clone(),
            Subscription {
                subscription_id: subscription_id.clone(),
                subscription_type: SubscriptionType::Instance {
                    instance_id: instance_id.to_string(),
                },
            },
        );

        Watcher {
            subscription_id,
            receiver: sender.subscribe(),
            filter: None,
        }
    }

    /// Subscribes to notifications of all instances.
    pub fn subscribe_all(&self, filter: EventFilter) -> Watcher {
        let subscription_id = format!("sub-{}", uuid::Uuid::new_v4());

        self.subscriptions.insert(
            subscription_id.clone(),
            Subscription {
                subscription_id: subscription_id.clone(),
                subscription_type: SubscriptionType::All {
                    filter: filter.clone(),
                },
            },
        );

        Watcher {
            subscription_id,
            receiver: self.global_sender.subscribe(),
            filter: Some(filter),
        }
    }

    /// Forgets a subscription.
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.subscriptions.remove(subscription_id).is_some()
    }

    /// Sends to the instance channel and the global channel.
    pub fn notify(&self, event: InstanceEvent) {
        if let Some(sender) = self.channels.get(&event.instance_id) {
            // Ignore send errors (no receivers)
            let _ = sender.send(event.clone());
        }

        let _ = self.global_sender.send(event);
    }

    /// Closes an instance's channel; its watchers see the end of the stream.
    pub fn close_instance(&self, instance_id: &str) {
        self.channels.remove(instance_id);
        self.subscriptions.retain(|_, sub| match &sub.subscription_type {
            SubscriptionType::Instance { instance_id: id } => id != instance_id,
            _ => true,
        });
    }

    /// Gets subscription info.
    pub fn get_subscription(&self, subscription_id: &str) -> Option<Subscription> {
        self.subscriptions.get(subscription_id).map(|r| r.clone())
    }

    /// Returns the number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Creates a shared EventBroadcaster.
pub fn create_broadcaster(channel_capacity: usize) -> Arc<EventBroadcaster> {
    Arc::new(EventBroadcaster::new(channel_capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transitioned(instance: &str, machine: &str, event: &str, target: &str) -> InstanceEvent {
        InstanceEvent {
            instance_id: instance.to_string(),
            notification: Notification::Transitioned {
                machine: machine.to_string(),
                event: event.to_string(),
                source: "created".to_string(),
                target: Some(target.to_string()),
            },
        }
    }

    #[test]
    fn test_subscribe_instance() {
        let broadcaster = EventBroadcaster::new(16);
        let watcher = broadcaster.subscribe_instance("instance-1");

        assert!(watcher.subscription_id().starts_with("sub-"));
        assert!(broadcaster.get_subscription(watcher.subscription_id()).is_some());
    }

    #[test]
    fn test_subscribe_all() {
        let broadcaster = EventBroadcaster::new(16);
        let filter = EventFilter {
            machines: vec!["order".to_string()],
            ..Default::default()
        };
        let watcher = broadcaster.subscribe_all(filter);

        let sub = broadcaster.get_subscription(watcher.subscription_id()).unwrap();
        match sub.subscription_type {
            SubscriptionType::All { filter } => {
                assert_eq!(filter.machines, vec!["order".to_string()]);
            }
            _ => panic!("Expected All subscription type"),
        }
    }

    #[test]
    fn test_unsubscribe() {
        let broadcaster = EventBroadcaster::new(16);
        let watcher = broadcaster.subscribe_instance("instance-1");
        let sub_id = watcher.subscription_id().to_string();

        assert!(broadcaster.unsubscribe(&sub_id));
        assert!(!broadcaster.unsubscribe(&sub_id)); // Already removed
        assert!(broadcaster.get_subscription(&sub_id).is_none());
    }

    #[tokio::test]
    async fn test_notify_instance() {
        let broadcaster = EventBroadcaster::new(16);
        let mut watcher = broadcaster.subscribe_instance("instance-1");

        broadcaster.notify(transitioned("instance-2", "order", "PAY", "paid"));
        broadcaster.notify(transitioned("instance-1", "order", "PAY", "paid"));

        let received = watcher.recv().await.unwrap();
        assert_eq!(received.instance_id, "instance-1");
        assert_eq!(received.notification.kind(), "transitioned");
        assert!(watcher.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_notify_global_filtered() {
        let broadcaster = EventBroadcaster::new(16);
        let mut watcher = broadcaster.subscribe_all(EventFilter {
            machines: vec!["workflow".to_string()],
            ..Default::default()
        });

        broadcaster.notify(transitioned("i-1", "order", "PAY", "paid"));
        broadcaster.notify(transitioned("i-2", "workflow", "COMPLETE", "done"));

        let received = watcher.recv().await.unwrap();
        assert_eq!(received.instance_id, "i-2");
        assert_eq!(received.notification.machine(), "workflow");
    }

    #[tokio::test]
    async fn test_close_instance_ends_stream() {
        let broadcaster = EventBroadcaster::new(16);
        let mut watcher = broadcaster.subscribe_instance("i-1");
        broadcaster.close_instance("i-1");

        assert!(watcher.recv().await.is_none());
        assert_eq!(broadcaster.subscription_count(), 0);
    }

    #[test]
    fn test_event_filter_matches() {
        let event = transitioned("i-1", "order", "PAY", "paid");

        // Empty filter matches all
        assert!(EventFilter::default().matches(&event));

        let filter = EventFilter {
            machines: vec!["workflow".to_string()],
            ..Default::default()
        };
        assert!(!filter.matches(&event));

        let filter = EventFilter {
            states: vec!["paid".to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&event));

        let filter = EventFilter {
            kinds: vec!["entered".to_string()],
            ..Default::default()
        };
        assert!(!filter.matches(&event));

        let filter = EventFilter {
            events: vec!["PAY".to_string()],
            instances: vec!["i-1".to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&event));

        let stopped = InstanceEvent {
            instance_id: "i-1".to_string(),
            notification: Notification::Stopped {
                machine: "order".to_string(),
            },
        };
        assert!(!filter.matches(&stopped));
    }

    #[test]
    fn test_serialize_flattened() {
        let event = transitioned("i-1", "order", "PAY", "paid");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["instance_id"], json!("i-1"));
        assert_eq!(json["type"], json!("transitioned"));
        assert_eq!(json["target"], json!("paid"));
    }
}
