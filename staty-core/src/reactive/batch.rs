//! Batched handler table.
//!
//! Handlers registered with `batch: true` are not called when their action
//! completes. They are parked here, keyed by handler, together with the
//! latest action name that triggered them. The table is drained once per
//! scheduler tick, so any number of notifications of the same handler within
//! one tick collapse into a single call carrying the most recent name.

use std::rc::Rc;

use indexmap::IndexMap;

use super::action::ActionName;
use super::subscriber::{Handler, HandlerId};

#[derive(Default)]
pub(crate) struct BatchTable {
    pending: IndexMap<HandlerId, (Rc<Handler>, ActionName)>,
}

impl BatchTable {
    /// Park a handler. Returns true when the table was empty, meaning the
    /// caller must schedule a drain.
    pub(crate) fn enqueue(&mut self, handler: Rc<Handler>, name: ActionName) -> bool {
        let first = self.pending.is_empty();
        self.pending.insert(handler.id(), (handler, name));
        first
    }

    /// Empty the table.
    pub(crate) fn take(&mut self) -> Vec<(Rc<Handler>, ActionName)> {
        std::mem::take(&mut self.pending).into_values().collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> Rc<Handler> {
        Rc::new(Handler::new(Rc::new(|_: &ActionName| Ok(())), None, false, true))
    }

    #[test]
    fn repeated_enqueue_keeps_latest_name() {
        let mut table = BatchTable::default();
        let h = handler();

        assert!(table.enqueue(h.clone(), "first".into()));
        assert!(!table.enqueue(h.clone(), "second".into()));
        assert_eq!(table.len(), 1);

        let drained = table.take();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].1, ActionName::from("second"));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn distinct_handlers_each_get_a_slot() {
        let mut table = BatchTable::default();
        table.enqueue(handler(), "a".into());
        table.enqueue(handler(), "a".into());
        assert_eq!(table.len(), 2);
    }
}
