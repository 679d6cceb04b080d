//! Synchronous lifecycle notifications.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::program::{CompileDiagnostics, LinkDiagnostics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ProgramReady,
    ShaderCompileFailed,
    ProgramLinkFailed,
    Render,
    TextureLoaded,
    TextureFailed,
}

impl EventKind {
    pub const fn name(self) -> &'static str {
        match self {
            EventKind::ProgramReady => "program-ready",
            EventKind::ShaderCompileFailed => "shader-compile-failed",
            EventKind::ProgramLinkFailed => "program-link-failed",
            EventKind::Render => "render",
            EventKind::TextureLoaded => "texture-loaded",
            EventKind::TextureFailed => "texture-failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Timing of a completed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderInfo {
    /// Time since the clock was last reset.
    pub elapsed: Duration,
    /// Time since the previous drawn frame.
    pub delta: Duration,
    /// Frames drawn since the runtime was created.
    pub frame: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CanvasEvent {
    /// A requested program compiled, linked and is now active.
    ProgramReady { generation: u64 },
    ShaderCompileFailed(CompileDiagnostics),
    ProgramLinkFailed(LinkDiagnostics),
    Render(RenderInfo),
    TextureLoaded {
        name: String,
        width: u32,
        height: u32,
    },
    TextureFailed {
        name: String,
        error: String,
    },
}

impl CanvasEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CanvasEvent::ProgramReady { .. } => EventKind::ProgramReady,
            CanvasEvent::ShaderCompileFailed(_) => EventKind::ShaderCompileFailed,
            CanvasEvent::ProgramLinkFailed(_) => EventKind::ProgramLinkFailed,
            CanvasEvent::Render(_) => EventKind::Render,
            CanvasEvent::TextureLoaded { .. } => EventKind::TextureLoaded,
            CanvasEvent::TextureFailed { .. } => EventKind::TextureFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&CanvasEvent)>;

/// Listeners keyed by event kind, invoked in subscription order.
#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<EventKind, Vec<(SubscriptionId, Listener)>>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: FnMut(&CanvasEvent) + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners
            .entry(kind)
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if the id was unknown.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for entries in self.listeners.values_mut() {
            if let Some(index) = entries.iter().position(|(entry, _)| *entry == id) {
                entries.remove(index);
                return true;
            }
        }
        false
    }

    pub fn emit(&mut self, event: &CanvasEvent) {
        let kind = event.kind();
        tracing::trace!(event = %kind, "emitting canvas event");
        if let Some(entries) = self.listeners.get_mut(&kind) {
            for (_, listener) in entries.iter_mut() {
                listener(event);
            }
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .listeners
            .iter()
            .map(|(kind, entries)| (kind.name(), entries.len()))
            .collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn render(frame: u64) -> CanvasEvent {
        CanvasEvent::Render(RenderInfo {
            elapsed: Duration::ZERO,
            delta: Duration::ZERO,
            frame,
        })
    }

    #[test]
    fn listeners_run_in_subscription_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new();
        for tag in ["first", "second"] {
            let log = Rc::clone(&log);
            bus.subscribe(EventKind::Render, move |_| log.borrow_mut().push(tag));
        }
        bus.emit(&render(1));
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn emit_only_reaches_matching_kind() {
        let hits = Rc::new(RefCell::new(0));
        let mut bus = EventBus::new();
        let counter = Rc::clone(&hits);
        bus.subscribe(EventKind::TextureLoaded, move |_| *counter.borrow_mut() += 1);
        bus.emit(&render(1));
        assert_eq!(*hits.borrow(), 0);
        bus.emit(&CanvasEvent::TextureLoaded {
            name: "u_tex".into(),
            width: 1,
            height: 1,
        });
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let hits = Rc::new(RefCell::new(0));
        let mut bus = EventBus::new();
        let counter = Rc::clone(&hits);
        let id = bus.subscribe(EventKind::Render, move |_| *counter.borrow_mut() += 1);
        assert_eq!(bus.listener_count(EventKind::Render), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(&render(2));
        assert_eq!(*hits.borrow(), 0);
        assert_eq!(bus.listener_count(EventKind::Render), 0);
    }

    #[test]
    fn kind_names_match_wire_names() {
        assert_eq!(EventKind::ShaderCompileFailed.to_string(), "shader-compile-failed");
        assert_eq!(render(0).kind().name(), "render");
    }
}
