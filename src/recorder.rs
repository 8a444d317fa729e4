//! In-memory trace subsystem.
//!
//! [`Recorder`] keeps every entry and exit event in memory instead of
//! reporting it, which makes the events of an instrumented handler easy to
//! assert on in tests. Its propagation tokens follow the W3C `traceparent`
//! layout, see [`TraceParent`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::trace::{KvMap, Trace, TraceFactory};

/// Whether fresh traces are recorded.
///
/// Continued traces follow the sampled flag of the inbound token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sampling {
    /// Record every fresh trace.
    Always,
    /// Record no fresh trace.
    Never,
}

/// Kind of a recorded event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// A traced unit of work started.
    Entry,
    /// A traced unit of work finished.
    Exit,
}

impl EventKind {
    /// `entry` or `exit`.
    pub fn label(self) -> &'static str {
        match self {
            EventKind::Entry => "entry",
            EventKind::Exit => "exit",
        }
    }
}

/// A recorded event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// Layer that reported the event.
    pub layer: String,
    /// Entry or exit.
    pub kind: EventKind,
    /// Trace the event belongs to.
    pub trace_id: u128,
    /// Identifier of this event.
    pub op_id: u64,
    /// Events this one follows from.
    pub edges: Vec<u64>,
    /// Event metadata.
    pub kv: KvMap,
}

/// A parsed propagation token: `00-<trace id>-<op id>-<flags>`, lowercase hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceParent {
    /// 128 bit trace identifier, never zero.
    pub trace_id: u128,
    /// 64 bit identifier of the event to continue from, never zero.
    pub op_id: u64,
    /// Whether the trace is sampled.
    pub sampled: bool,
}

impl TraceParent {
    /// Parses `token`, returning `None` for anything malformed.
    pub fn parse(token: &str) -> Option<Self> {
        let mut parts = token.split('-');
        let (Some(version), Some(trace_id), Some(op_id), Some(flags), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return None;
        };

        if version != "00" || trace_id.len() != 32 || op_id.len() != 16 || flags.len() != 2 {
            return None;
        }
        let is_hex = |s: &str| s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !(is_hex(trace_id) && is_hex(op_id) && is_hex(flags)) {
            return None;
        }

        let trace_id = u128::from_str_radix(trace_id, 16).ok()?;
        let op_id = u64::from_str_radix(op_id, 16).ok()?;
        let flags = u8::from_str_radix(flags, 16).ok()?;
        if trace_id == 0 || op_id == 0 {
            return None;
        }

        Some(Self {
            trace_id,
            op_id,
            sampled: flags & 0x01 == 0x01,
        })
    }
}

impl fmt::Display for TraceParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "00-{:032x}-{:016x}-{:02x}",
            self.trace_id,
            self.op_id,
            u8::from(self.sampled)
        )
    }
}

#[derive(Debug)]
struct Inner {
    sampling: Sampling,
    next_id: AtomicU64,
    events: Mutex<Vec<Event>>,
}

/// A [`TraceFactory`] that records events in memory.
///
/// Clones share the same event list.
#[derive(Clone, Debug)]
pub struct Recorder {
    inner: Arc<Inner>,
}

impl Recorder {
    /// A recorder with no events yet.
    pub fn new(sampling: Sampling) -> Self {
        Self {
            inner: Arc::new(Inner {
                sampling,
                next_id: AtomicU64::new(1),
                events: Mutex::new(Vec::new()),
            }),
        }
    }

    /// All events recorded so far, oldest first.
    pub fn events(&self) -> Vec<Event> {
        let events = self.lock();
        events.clone()
    }

    /// All exit events recorded so far, oldest first.
    pub fn exits(&self) -> Vec<Event> {
        let events = self.lock();
        events
            .iter()
            .filter(|event| event.kind == EventKind::Exit)
            .cloned()
            .collect()
    }

    /// Removes and returns all events recorded so far.
    pub fn take_events(&self) -> Vec<Event> {
        let mut events = self.lock();
        std::mem::take(&mut *events)
    }

    // A panicking handler may unwind through a recording; keep recording anyway.
    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.inner.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: Event) {
        let mut events = self.lock();
        events.push(event);
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn new_trace_id(&self) -> u128 {
        let high = self.next_id();
        let low = self.next_id();
        (u128::from(high) << 64) | u128::from(low)
    }
}

#[derive(Debug)]
struct Active {
    trace_id: u128,
    entry_op: u64,
    exit_op: u64,
    continued: bool,
}

/// A trace handle produced by [`Recorder`].
#[derive(Debug)]
pub struct RecordedTrace {
    recorder: Recorder,
    layer: String,
    active: Option<Active>,
}

impl RecordedTrace {
    /// Whether this trace continues one from an inbound token.
    pub fn is_continued(&self) -> bool {
        self.active.as_ref().is_some_and(|active| active.continued)
    }

    /// The trace identifier, if the trace is recorded.
    pub fn trace_id(&self) -> Option<u128> {
        self.active.as_ref().map(|active| active.trace_id)
    }
}

impl Trace for RecordedTrace {
    fn is_tracing(&self) -> bool {
        self.active.is_some()
    }

    fn exit_metadata(&self) -> String {
        self.active
            .as_ref()
            .map(|active| {
                TraceParent {
                    trace_id: active.trace_id,
                    op_id: active.exit_op,
                    sampled: true,
                }
                .to_string()
            })
            .unwrap_or_default()
    }

    fn end_callback<F>(self, metadata: F)
    where
        F: FnOnce() -> KvMap,
    {
        let Some(active) = self.active else {
            return;
        };
        self.recorder.record(Event {
            layer: self.layer,
            kind: EventKind::Exit,
            trace_id: active.trace_id,
            op_id: active.exit_op,
            edges: vec![active.entry_op],
            kv: metadata(),
        });
    }
}

impl TraceFactory for Recorder {
    type Trace = RecordedTrace;

    fn new_trace_from_id<F>(&self, layer: &str, token: &str, metadata: F) -> RecordedTrace
    where
        F: FnOnce() -> KvMap,
    {
        let parent = TraceParent::parse(token);
        if parent.is_none() && !token.is_empty() {
            tracing::debug!(token, "malformed X-Trace token, starting a new trace");
        }

        let sampled = match parent {
            Some(parent) => parent.sampled,
            None => self.inner.sampling == Sampling::Always,
        };
        if !sampled {
            return RecordedTrace {
                recorder: self.clone(),
                layer: layer.to_owned(),
                active: None,
            };
        }

        let trace_id = match parent {
            Some(parent) => parent.trace_id,
            None => self.new_trace_id(),
        };
        let active = Active {
            trace_id,
            entry_op: self.next_id(),
            exit_op: self.next_id(),
            continued: parent.is_some(),
        };

        self.record(Event {
            layer: layer.to_owned(),
            kind: EventKind::Entry,
            trace_id,
            op_id: active.entry_op,
            edges: parent.map(|parent| parent.op_id).into_iter().collect(),
            kv: metadata(),
        });

        RecordedTrace {
            recorder: self.clone(),
            layer: layer.to_owned(),
            active: Some(active),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn parses_sampled_token() {
        let parent = TraceParent::parse(TOKEN).unwrap();
        assert_eq!(parent.trace_id, 0x4bf92f3577b34da6a3ce929d0e0e4736);
        assert_eq!(parent.op_id, 0x00f067aa0ba902b7);
        assert!(parent.sampled);
        assert_eq!(parent.to_string(), TOKEN);
    }

    #[test]
    fn rejects_malformed_tokens() {
        for token in [
            "",
            "garbage",
            "01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e473-00f067aa0ba902b7-01",
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "00-+bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
        ] {
            assert_eq!(TraceParent::parse(token), None, "{token}");
        }
    }

    #[test]
    fn fresh_trace_records_entry_and_exit() {
        let recorder = Recorder::new(Sampling::Always);
        let trace = recorder.new_trace_from_id("http", "", || [("Method", "GET")].into_iter().collect());
        assert!(trace.is_tracing());
        assert!(!trace.is_continued());

        let token = TraceParent::parse(&trace.exit_metadata()).unwrap();
        assert_eq!(Some(token.trace_id), trace.trace_id());

        trace.end_callback(|| [("Status", 200u16)].into_iter().collect());

        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Entry);
        assert!(events[0].edges.is_empty());
        assert_eq!(events[1].kind, EventKind::Exit);
        assert_eq!(events[1].op_id, token.op_id);
        assert_eq!(events[1].edges, vec![events[0].op_id]);
        assert_eq!(events[1].kv.get("Status"), Some(&200u16.into()));
    }

    #[test]
    fn continued_trace_links_to_inbound_op() {
        let recorder = Recorder::new(Sampling::Never);
        let trace = recorder.new_trace_from_id("http", TOKEN, KvMap::new);
        assert!(trace.is_continued());
        assert_eq!(trace.trace_id(), Some(0x4bf92f3577b34da6a3ce929d0e0e4736));

        let entry = &recorder.events()[0];
        assert_eq!(entry.edges, vec![0x00f067aa0ba902b7]);
    }

    #[test]
    fn unsampled_traces_record_nothing() {
        let recorder = Recorder::new(Sampling::Never);
        let trace = recorder.new_trace_from_id("http", "", || panic!("entry metadata built"));
        assert!(!trace.is_tracing());
        assert_eq!(trace.exit_metadata(), "");
        trace.end_callback(|| panic!("exit metadata built"));

        let unsampled = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00";
        let recorder = Recorder::new(Sampling::Always);
        let trace = recorder.new_trace_from_id("http", unsampled, KvMap::new);
        assert!(!trace.is_tracing());
        trace.end_callback(KvMap::new);

        assert!(recorder.events().is_empty());
    }

    #[test]
    fn malformed_token_starts_fresh_trace() {
        let recorder = Recorder::new(Sampling::Always);
        let trace = recorder.new_trace_from_id("http", "not-a-token", KvMap::new);
        assert!(trace.is_tracing());
        assert!(!trace.is_continued());
    }

    #[test]
    fn take_events_drains() {
        let recorder = Recorder::new(Sampling::Always);
        recorder
            .new_trace_from_id("http", "", KvMap::new)
            .end_callback(KvMap::new);
        assert_eq!(recorder.take_events().len(), 2);
        assert!(recorder.events().is_empty());
        assert!(recorder.exits().is_empty());
    }
}
