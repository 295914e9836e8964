//! Asynchronous event delivery from the aggregator to registered listeners.
//!
//! Listeners are keyed by target category (and optionally instance) and run
//! in ascending priority-value order, lower values first. A handler must
//! never block; long-running reactions are deferred to a worker by the
//! handler itself.

use std::sync::Mutex;

use bitflags::bitflags;

/// One asynchronous notification from the aggregator.
#[derive(Clone, Debug)]
pub struct Event {
    pub target_category: u8,
    pub command_id: u8,
    pub instance_id: u8,
    pub channel: u8,
    pub data: Vec<u8>,
}

bitflags! {
    /// Outcome of a single handler invocation. An empty value means the
    /// event was not handled by this listener.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct EventStatus: u32 {
        const HANDLED = 1 << 0;
        /// Stop delivering this event to lower-urgency listeners.
        const STOP = 1 << 1;
        const ERROR = 1 << 2;

        const _ = !0;
    }
}

impl EventStatus {
    const ERROR_SHIFT: u32 = 16;

    /// A fatal handler error with an attached code (upper status bits).
    pub fn from_error(code: u16) -> Self {
        EventStatus::from_bits_retain(
            EventStatus::ERROR.bits() | (u32::from(code) << Self::ERROR_SHIFT),
        )
    }

    pub fn error_code(self) -> Option<u16> {
        if self.contains(EventStatus::ERROR) {
            Some((self.bits() >> Self::ERROR_SHIFT) as u16)
        } else {
            None
        }
    }
}

/// Which event fields a listener filter applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventMask {
    /// Deliver every event.
    None,
    /// Match on target category only.
    Target,
    /// Match on target category and instance id.
    TargetAndInstance,
}

pub type EventHandler = Box<dyn Fn(&Event) -> EventStatus + Send + Sync>;

/// Listener registration parameters.
pub struct Notifier {
    pub target_category: u8,
    pub instance: u8,
    pub mask: EventMask,
    /// Dispatch order: ascending, lower value runs earlier.
    pub priority: i32,
    pub handler: EventHandler,
}

/// Opaque registration token, used to unregister.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct NotifierHandle(u64);

struct Listener {
    id: u64,
    notifier: Notifier,
}

impl Listener {
    fn matches(&self, event: &Event) -> bool {
        match self.notifier.mask {
            EventMask::None => true,
            EventMask::Target => self.notifier.target_category == event.target_category,
            EventMask::TargetAndInstance => {
                self.notifier.target_category == event.target_category
                    && self.notifier.instance == event.instance_id
            }
        }
    }
}

#[derive(Default)]
pub struct NotifierRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    // Kept sorted by ascending priority; insertion order breaks ties.
    listeners: Vec<Listener>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, notifier: Notifier) -> NotifierHandle {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;

        let pos = inner
            .listeners
            .partition_point(|l| l.notifier.priority <= notifier.priority);
        inner.listeners.insert(pos, Listener { id, notifier });
        NotifierHandle(id)
    }

    pub fn unregister(&self, handle: NotifierHandle) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.retain(|l| l.id != handle.0);
    }

    /// Delivers `event` to every matching listener in priority order and
    /// returns the aggregated status. Delivery stops early when a listener
    /// sets [`EventStatus::STOP`].
    pub fn dispatch(&self, event: &Event) -> EventStatus {
        let inner = self.inner.lock().unwrap();
        let mut status = EventStatus::empty();

        for listener in inner.listeners.iter() {
            if !listener.matches(event) {
                continue;
            }

            let result = (listener.notifier.handler)(event);
            if let Some(code) = result.error_code() {
                log::error!(
                    "event {:#04x}/{:#04x}: listener failed with code {}",
                    event.target_category,
                    event.command_id,
                    code
                );
            }
            status |= result;
            if result.contains(EventStatus::STOP) {
                break;
            }
        }

        status
    }
}
