use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// One speaker's volume in a volume indication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub uid: String,
    pub volume: i32,
}

/// Notifications delivered to the host sink.
///
/// Engine callbacks and capability updates share this one type so the host
/// observes everything through a single ordered channel.
#[derive(Debug, Clone)]
pub enum RtcEvent {
    JoinChannelSuccess { channel_id: String, uid: String, elapsed: i32 },
    LeaveChannel { stats: serde_json::Value },
    ConnectionStateChanged { state: String, reason: String },
    UserJoined { uid: String, elapsed: i32 },
    UserOffline { uid: String, reason: String },
    VolumeIndication { speakers: Vec<VolumeInfo> },
    Error { code: i32, message: String },
    ChannelMessage { uid: String, message: String },
    StreamMessage { uid: String, stream_id: i32, data: Vec<u8> },
    StreamMessageError { uid: String, stream_id: i32, code: i32, missed: i32, cached: i32 },
    CapabilitySetUpdated { features: Vec<String> },
}

impl RtcEvent {
    /// Wire name of the callback, as hosts know it.
    pub fn name(&self) -> &'static str {
        match self {
            RtcEvent::JoinChannelSuccess { .. } => "onJoinChannelSuccess",
            RtcEvent::LeaveChannel { .. } => "onLeaveChannel",
            RtcEvent::ConnectionStateChanged { .. } => "onConnectionStateChanged",
            RtcEvent::UserJoined { .. } => "onUserJoined",
            RtcEvent::UserOffline { .. } => "onUserOffline",
            RtcEvent::VolumeIndication { .. } => "onVolumeIndication",
            RtcEvent::Error { .. } => "onError",
            RtcEvent::ChannelMessage { .. } => "onChannelMessage",
            RtcEvent::StreamMessage { .. } => "onStreamMessage",
            RtcEvent::StreamMessageError { .. } => "onStreamMessageError",
            RtcEvent::CapabilitySetUpdated { .. } => "CapabilitySetUpdated",
        }
    }
}

/// Receiver of routed events. Called only on the delivery context.
/// Implementations must be Send + Sync (the delivery loop runs on a tokio
/// task).
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: RtcEvent);
}

#[derive(Debug)]
struct RoutedEvent {
    source: &'static str,
    seq: u64,
    event: RtcEvent,
}

/// A producer handle for one originating source (the engine, the
/// capability gate). Cloneable and usable from any execution context;
/// emitting never runs the sink on the caller's thread and never blocks.
#[derive(Clone)]
pub struct EventSource {
    name: &'static str,
    seq: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<RoutedEvent>,
}

impl EventSource {
    /// Queue an event for delivery. Per-source order is preserved.
    pub fn emit(&self, event: RtcEvent) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let routed = RoutedEvent { source: self.name, seq, event };
        if self.tx.send(routed).is_err() {
            tracing::debug!("event router is gone, dropping event from {}", self.name);
        }
    }
}

type SinkSlot = Arc<RwLock<Option<Arc<dyn EventSink>>>>;

/// Serializes events from arbitrary execution contexts onto one delivery
/// task, which hands them to the single registered sink.
pub struct EventRouter {
    tx: mpsc::UnboundedSender<RoutedEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<RoutedEvent>>>,
    sink: SinkSlot,
}

impl EventRouter {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            sink: Arc::new(RwLock::new(None)),
        }
    }

    /// Spawn the delivery loop on the host runtime. Events emitted before
    /// this point stay queued and are delivered once the loop runs.
    /// Idempotent; later calls are no-ops.
    pub fn start(&self, handle: &Handle) {
        let Some(rx) = self.rx.lock().unwrap().take() else {
            return;
        };
        let sink = self.sink.clone();
        handle.spawn(deliver_loop(rx, sink));
    }

    /// Create a producer handle for one originating source.
    pub fn source(&self, name: &'static str) -> EventSource {
        EventSource {
            name,
            seq: Arc::new(AtomicU64::new(0)),
            tx: self.tx.clone(),
        }
    }

    /// Register the sink, replacing any previous registration.
    pub fn register_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write().unwrap() = Some(sink);
    }

    /// Drop the sink. Queued and future events are discarded until a new
    /// sink registers.
    pub fn unregister_sink(&self) {
        *self.sink.write().unwrap() = None;
    }

    pub fn has_sink(&self) -> bool {
        self.sink.read().unwrap().is_some()
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

async fn deliver_loop(mut rx: mpsc::UnboundedReceiver<RoutedEvent>, sink: SinkSlot) {
    while let Some(routed) = rx.recv().await {
        // Resolve the sink per event so a release between enqueue and
        // delivery drops the event instead of reaching a stale sink.
        let current = sink.read().unwrap().clone();
        match current {
            Some(s) => {
                tracing::debug!(
                    "delivering {} (source={} seq={})",
                    routed.event.name(),
                    routed.source,
                    routed.seq
                );
                let name = routed.event.name();
                if catch_unwind(AssertUnwindSafe(|| s.on_event(routed.event))).is_err() {
                    tracing::error!("sink panicked handling {name}");
                }
            }
            None => {
                tracing::debug!(
                    "no sink registered, dropping {} (source={} seq={})",
                    routed.event.name(),
                    routed.source,
                    routed.seq
                );
            }
        }
    }
    tracing::debug!("event delivery loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Capture {
        events: std::sync::Mutex<Vec<RtcEvent>>,
    }

    impl Capture {
        fn new() -> Arc<Self> {
            Arc::new(Self { events: std::sync::Mutex::new(Vec::new()) })
        }

        fn names(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.name()).collect()
        }
    }

    impl EventSink for Capture {
        fn on_event(&self, event: RtcEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached in time");
    }

    fn user_joined(uid: &str, elapsed: i32) -> RtcEvent {
        RtcEvent::UserJoined { uid: uid.to_string(), elapsed }
    }

    #[tokio::test]
    async fn delivers_to_registered_sink() {
        let router = EventRouter::new();
        let sink = Capture::new();
        router.register_sink(sink.clone());
        router.start(&Handle::current());

        router.source("engine").emit(user_joined("u1", 10));
        wait_until(|| sink.events.lock().unwrap().len() == 1).await;

        match &sink.events.lock().unwrap()[0] {
            RtcEvent::UserJoined { uid, elapsed } => {
                assert_eq!(uid, "u1");
                assert_eq!(*elapsed, 10);
            }
            other => panic!("expected UserJoined, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn events_queued_before_start_are_flushed() {
        let router = EventRouter::new();
        let sink = Capture::new();
        router.register_sink(sink.clone());

        let source = router.source("engine");
        source.emit(user_joined("u1", 0));
        source.emit(user_joined("u2", 0));

        router.start(&Handle::current());
        wait_until(|| sink.events.lock().unwrap().len() == 2).await;
    }

    #[tokio::test]
    async fn per_source_order_is_preserved_across_contexts() {
        let router = EventRouter::new();
        let sink = Capture::new();
        router.register_sink(sink.clone());
        router.start(&Handle::current());

        let engine = router.source("engine");
        let gate = router.source("features");

        let t1 = tokio::spawn({
            let engine = engine.clone();
            async move {
                for i in 0..50 {
                    engine.emit(user_joined(&format!("u{i}"), i));
                    tokio::task::yield_now().await;
                }
            }
        });
        let t2 = tokio::spawn(async move {
            for _ in 0..50 {
                gate.emit(RtcEvent::CapabilitySetUpdated { features: vec!["voice".into()] });
                tokio::task::yield_now().await;
            }
        });
        t1.await.unwrap();
        t2.await.unwrap();

        wait_until(|| sink.events.lock().unwrap().len() == 100).await;

        // Engine events arrive in emit order even though two tasks
        // interleaved their sends.
        let engine_elapsed: Vec<i32> = sink
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                RtcEvent::UserJoined { elapsed, .. } => Some(*elapsed),
                _ => None,
            })
            .collect();
        assert_eq!(engine_elapsed, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn unregister_drops_events() {
        let router = EventRouter::new();
        let sink = Capture::new();
        router.register_sink(sink.clone());
        router.start(&Handle::current());

        let source = router.source("engine");
        source.emit(user_joined("before", 0));
        wait_until(|| sink.events.lock().unwrap().len() == 1).await;

        router.unregister_sink();
        source.emit(user_joined("dropped", 0));

        // Re-register and emit a marker; if the dropped event had been
        // delivered anywhere it would precede the marker.
        router.register_sink(sink.clone());
        source.emit(user_joined("after", 0));
        wait_until(|| sink.events.lock().unwrap().len() == 2).await;

        let uids: Vec<String> = sink
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| match e {
                RtcEvent::UserJoined { uid, .. } => uid.clone(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(uids, vec!["before", "after"]);
    }

    #[tokio::test]
    async fn replacing_sink_redirects_delivery() {
        let router = EventRouter::new();
        let first = Capture::new();
        let second = Capture::new();
        router.start(&Handle::current());

        router.register_sink(first.clone());
        let source = router.source("engine");
        source.emit(user_joined("u1", 0));
        wait_until(|| first.events.lock().unwrap().len() == 1).await;

        router.register_sink(second.clone());
        source.emit(user_joined("u2", 0));
        wait_until(|| second.events.lock().unwrap().len() == 1).await;

        assert_eq!(first.events.lock().unwrap().len(), 1);
    }

    struct PanicOnce {
        inner: Arc<Capture>,
        armed: std::sync::atomic::AtomicBool,
    }

    impl EventSink for PanicOnce {
        fn on_event(&self, event: RtcEvent) {
            if self.armed.swap(false, Ordering::SeqCst) {
                panic!("sink fault");
            }
            self.inner.on_event(event);
        }
    }

    #[tokio::test]
    async fn sink_panic_does_not_kill_delivery() {
        let router = EventRouter::new();
        let capture = Capture::new();
        router.register_sink(Arc::new(PanicOnce {
            inner: capture.clone(),
            armed: std::sync::atomic::AtomicBool::new(true),
        }));
        router.start(&Handle::current());

        let source = router.source("engine");
        source.emit(user_joined("eaten", 0));
        source.emit(user_joined("survives", 0));
        wait_until(|| capture.events.lock().unwrap().len() == 1).await;

        assert_eq!(capture.names(), vec!["onUserJoined"]);
    }

    #[test]
    fn event_names_match_wire_callbacks() {
        assert_eq!(user_joined("u", 0).name(), "onUserJoined");
        assert_eq!(
            RtcEvent::StreamMessageError {
                uid: String::new(),
                stream_id: 1,
                code: 2,
                missed: 3,
                cached: 4
            }
            .name(),
            "onStreamMessageError"
        );
        assert_eq!(
            RtcEvent::CapabilitySetUpdated { features: vec![] }.name(),
            "CapabilitySetUpdated"
        );
    }
}
