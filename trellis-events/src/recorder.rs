//! Recording domain events on aggregates

use crate::event::DomainEvent;

/// Events raised by an aggregate and not yet dispatched
#[derive(Debug, Default)]
pub struct DomainEvents {
    events: Vec<Box<dyn DomainEvent>>,
}

impl DomainEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event
    pub fn record<E: DomainEvent>(&mut self, event: E) {
        self.events.push(Box::new(event));
    }

    /// Record an already boxed event
    pub fn record_boxed(&mut self, event: Box<dyn DomainEvent>) {
        self.events.push(event);
    }

    /// Pending events in the order they were raised
    pub fn pending(&self) -> &[Box<dyn DomainEvent>] {
        &self.events
    }

    /// Remove and return all pending events
    pub fn take(&mut self) -> Vec<Box<dyn DomainEvent>> {
        std::mem::take(&mut self.events)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// An entity that raises domain events
pub trait AggregateRoot {
    fn domain_events(&self) -> &DomainEvents;

    fn domain_events_mut(&mut self) -> &mut DomainEvents;

    fn raise_domain_event<E: DomainEvent>(&mut self, event: E)
    where
        Self: Sized,
    {
        self.domain_events_mut().record(event);
    }

    fn clear_domain_events(&mut self) {
        self.domain_events_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    #[derive(Debug)]
    struct ItemAdded(u32);

    impl DomainEvent for ItemAdded {
        fn event_name(&self) -> &str {
            "item_added"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Default)]
    struct Cart {
        items: Vec<u32>,
        events: DomainEvents,
    }

    impl Cart {
        fn add(&mut self, item: u32) {
            self.items.push(item);
            self.raise_domain_event(ItemAdded(item));
        }
    }

    impl AggregateRoot for Cart {
        fn domain_events(&self) -> &DomainEvents {
            &self.events
        }

        fn domain_events_mut(&mut self) -> &mut DomainEvents {
            &mut self.events
        }
    }

    #[test]
    fn test_events_recorded_in_order() {
        let mut cart = Cart::default();
        cart.add(1);
        cart.add(2);

        let ids: Vec<u32> = cart
            .domain_events()
            .pending()
            .iter()
            .filter_map(|e| e.as_any().downcast_ref::<ItemAdded>())
            .map(|e| e.0)
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(cart.items.len(), 2);
    }

    #[test]
    fn test_take_empties_recorder() {
        let mut cart = Cart::default();
        cart.add(5);

        let taken = cart.domain_events_mut().take();
        assert_eq!(taken.len(), 1);
        assert!(cart.domain_events().is_empty());

        cart.add(6);
        cart.clear_domain_events();
        assert_eq!(cart.domain_events().len(), 0);
    }
}
