use drover_domain::AnyResource;

/// A change delivered on a watch stream.
///
/// New watchers first receive one `Created` per existing resource of the
/// watched kind, then a single `Bootstrapped` marker, then live events.
#[derive(Debug, Clone)]
pub enum Event {
    Created(AnyResource),
    Updated(AnyResource),
    Destroyed(AnyResource),
    Bootstrapped,
    /// Watch transport failure surfaced in-band; the subscriber should
    /// resubscribe. The in-memory store never emits it.
    Error(String),
}

impl Event {
    pub fn resource(&self) -> Option<&AnyResource> {
        match self {
            Event::Created(r) | Event::Updated(r) | Event::Destroyed(r) => Some(r),
            Event::Bootstrapped | Event::Error(_) => None,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, Event::Destroyed(_))
    }
}
