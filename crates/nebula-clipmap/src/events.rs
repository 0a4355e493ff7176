//! Anchor-shift notification.
//!
//! Downstream consumers (GPU probe storage, uniform publication) register a
//! listener and receive an [`AnchorShiftEvent`] whenever a level's grid slides.
//! The scheduler never learns how they react.

use glam::{I64Vec3, IVec3, Vec3};

/// Emitted when a placed level's snapped anchor moves by at least one probe.
#[derive(Clone, Debug, PartialEq)]
pub struct AnchorShiftEvent {
    pub level: u32,
    pub prev_anchor: Vec3,
    pub new_anchor: Vec3,
    /// Shift in probe units on each axis. Saturates at the `i64` bounds.
    pub delta_probes: I64Vec3,
    pub spacing: f32,
    pub prev_origin_min_corner: Vec3,
    pub new_origin_min_corner: Vec3,
    pub prev_ring_offset: IVec3,
    pub new_ring_offset: IVec3,
}

impl AnchorShiftEvent {
    /// Whether the shift exceeded the grid on some axis and discarded the whole level.
    #[must_use]
    pub fn is_teleport(&self, resolution: u32) -> bool {
        crate::topology::exceeds_grid(self.delta_probes, resolution)
    }
}

/// Handle returned by [`ShiftListeners::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&AnchorShiftEvent)>;

/// Registry of anchor-shift listeners, notified in subscription order.
#[derive(Default)]
pub struct ShiftListeners {
    listeners: Vec<(SubscriptionId, Listener)>,
    next_id: u64,
}

impl ShiftListeners {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&AnchorShiftEvent) + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns `true` if it was registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver an event to every listener.
    pub fn notify(&mut self, event: &AnchorShiftEvent) {
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
    }
}

impl std::fmt::Debug for ShiftListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShiftListeners")
            .field("count", &self.listeners.len())
            .finish()
    }
}
