/*!
 * Event Listener Registry
 * Ordered callbacks per lifecycle event
 */

use super::handle::ProcessHandle;
use super::types::Event;
use std::sync::Arc;

/// Listener callback type
pub type Listener = Arc<dyn Fn(&ProcessHandle, Event) + Send + Sync>;

/// Listeners of one handle, kept in registration order
#[derive(Default, Clone)]
pub(crate) struct Listeners {
    start: Vec<Listener>,
    exit: Vec<Listener>,
}

impl Listeners {
    pub fn add(&mut self, event: Event, listener: Listener) {
        self.slot_mut(event).push(listener);
    }

    /// Clone out the callbacks so they can run without the registry locked
    pub fn snapshot(&self, event: Event) -> Vec<Listener> {
        self.slot(event).to_vec()
    }

    pub fn count(&self, event: Event) -> usize {
        self.slot(event).len()
    }

    fn slot(&self, event: Event) -> &Vec<Listener> {
        match event {
            Event::Start => &self.start,
            Event::Exit => &self.exit,
        }
    }

    fn slot_mut(&mut self, event: Event) -> &mut Vec<Listener> {
        match event {
            Event::Start => &mut self.start,
            Event::Exit => &mut self.exit,
        }
    }
}
