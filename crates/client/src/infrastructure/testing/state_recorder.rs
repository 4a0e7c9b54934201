//! Records bus state transitions so tests can wait on them.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::infrastructure::messaging::{BusConnection, ConnectionState, StatusSubscription};

const WAIT_LIMIT: Duration = Duration::from_secs(600);

pub struct StateRecorder {
    states: Arc<Mutex<Vec<ConnectionState>>>,
    changed: Arc<Notify>,
    cursor: usize,
    _subscription: StatusSubscription,
}

impl StateRecorder {
    pub fn attach(connection: &BusConnection) -> Self {
        let states = Arc::new(Mutex::new(Vec::new()));
        let changed = Arc::new(Notify::new());

        let states_for_observer = Arc::clone(&states);
        let changed_for_observer = Arc::clone(&changed);
        let subscription = connection.on_status_change(move |state| {
            states_for_observer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(state);
            changed_for_observer.notify_one();
        });

        Self {
            states,
            changed,
            cursor: 0,
            _subscription: subscription,
        }
    }

    /// Every transition seen so far.
    pub fn states(&self) -> Vec<ConnectionState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait for the next occurrence of `state` after the last one waited for.
    ///
    /// Returns false if it does not show up within ten (virtual) minutes.
    pub async fn wait_for(&mut self, state: ConnectionState) -> bool {
        let wait = async {
            loop {
                if let Some(found) = self.find_from_cursor(state) {
                    self.cursor = found + 1;
                    return;
                }
                self.changed.notified().await;
            }
        };
        tokio::time::timeout(WAIT_LIMIT, wait).await.is_ok()
    }

    fn find_from_cursor(&self, state: ConnectionState) -> Option<usize> {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states
            .iter()
            .enumerate()
            .skip(self.cursor)
            .find(|(_, s)| **s == state)
            .map(|(index, _)| index)
    }
}
