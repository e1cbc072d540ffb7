use crate::migration::Direction;

/// Lifecycle notifications emitted by a [`MigrationSet`](crate::MigrationSet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationEvent {
    /// A step is about to run.
    Migration { title: String, direction: Direction },
    /// The set's state was persisted.
    Save,
    /// A run finished without error.
    Complete { direction: Direction, steps: usize },
}

pub type Listener = Box<dyn Fn(&MigrationEvent) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Registered listeners, called synchronously in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: Vec<(SubscriberId, Listener)>,
}

impl Listeners {
    pub(crate) fn register(&mut self, listener: Listener) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    pub(crate) fn deregister(&mut self, id: SubscriberId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub(crate) fn emit(&self, event: &MigrationEvent) {
        for (_, listener) in &self.entries {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn listeners_receive_events_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = Listeners::default();

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            listeners.register(Box::new(move |_event: &MigrationEvent| {
                seen.lock().unwrap().push(tag);
            }));
        }

        listeners.emit(&MigrationEvent::Save);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn deregistered_listener_is_not_called() {
        let count = Arc::new(Mutex::new(0));
        let mut listeners = Listeners::default();
        let counter = Arc::clone(&count);
        let id = listeners.register(Box::new(move |_event: &MigrationEvent| {
            *counter.lock().unwrap() += 1;
        }));

        assert!(listeners.deregister(id));
        assert!(!listeners.deregister(id));
        listeners.emit(&MigrationEvent::Save);
        assert_eq!(*count.lock().unwrap(), 0);
    }
}
