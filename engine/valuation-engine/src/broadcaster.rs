//! Change broadcaster: pushes valuation changes to subscribers

use crate::types::{EntityId, ValuationEvent};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Subscriber lists for all changes and for single entities. Sends never
/// block: channels are unbounded and closed receivers are pruned.
#[derive(Debug, Default)]
pub struct ChangeBroadcaster {
    all_clients: RwLock<Vec<mpsc::UnboundedSender<ValuationEvent>>>,
    entity_clients: RwLock<HashMap<EntityId, Vec<mpsc::UnboundedSender<ValuationEvent>>>>,
}

impl ChangeBroadcaster {
    pub fn new() -> Self {
        Self { all_clients: RwLock::new(Vec::new()), entity_clients: RwLock::new(HashMap::new()) }
    }

    /// Subscribe to every valuation change
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ValuationEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut clients = self.all_clients.write();
        clients.retain(|sender| !sender.is_closed());
        clients.push(sender);
        receiver
    }

    /// Subscribe to changes of one position or portfolio
    pub fn subscribe_entity(&self, entity: EntityId) -> mpsc::UnboundedReceiver<ValuationEvent> {
        self.prune_closed();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.entity_clients.write().entry(entity).or_default().push(sender);
        receiver
    }

    /// Drop closed per-entity subscribers, including those of entities that
    /// will never be published again
    pub fn prune_closed(&self) {
        let mut clients = self.entity_clients.write();
        clients.retain(|_, senders| {
            senders.retain(|sender| !sender.is_closed());
            !senders.is_empty()
        });
    }

    pub fn publish(&self, event: &ValuationEvent) {
        let mut closed = false;
        for sender in self.all_clients.read().iter() {
            closed |= sender.send(event.clone()).is_err();
        }
        if closed {
            self.all_clients.write().retain(|sender| !sender.is_closed());
        }

        let mut closed = false;
        if let Some(senders) = self.entity_clients.read().get(&event.entity) {
            for sender in senders {
                closed |= sender.send(event.clone()).is_err();
            }
        }
        if closed {
            let mut clients = self.entity_clients.write();
            if let Some(senders) = clients.get_mut(&event.entity) {
                senders.retain(|sender| !sender.is_closed());
                if senders.is_empty() {
                    clients.remove(&event.entity);
                }
            }
            tracing::debug!("Pruned closed subscribers for {}", event.entity);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.all_clients.read().len() + self.entity_clients.read().values().map(Vec::len).sum::<usize>()
    }
}
