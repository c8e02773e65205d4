//! Change notification from the document to external view collaborators.
//!
//! Each [`Layout`](crate::Layout) owns one [`EventBus`]; render adapters
//! subscribe and receive a [`PixelsChanged`] payload after every
//! recomposite, with the touched region so they can redraw a sub-rectangle
//! instead of the whole surface.

use crate::geom::Region;

/// Payload published after pixels change. `region == None` means the whole
/// surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PixelsChanged {
    pub region: Option<Region>,
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn FnMut(&PixelsChanged)>;

/// Minimal publish/subscribe for pixel-change events. Constructed per
/// document, never ambient; handlers run synchronously on notify, in
/// subscription order.
#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Handler)>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handler: impl FnMut(&PixelsChanged) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, Box::new(handler)));
        id
    }

    /// Remove a handler. Returns whether it was still subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(h, _)| *h != id);
        self.handlers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn notify(&mut self, event: &PixelsChanged) {
        for (_, handler) in self.handlers.iter_mut() {
            handler(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.handlers.len())
            .finish()
    }
}
