//! roomlink core: control-and-event bridge for a hosted RTC engine.
//!
//! Hosts drive the engine through [`RtcBridge::dispatch`], observe it
//! through a registered [`EventSink`], and manage rooms and tokens through
//! [`RoomClient`]. The engine itself is supplied by the host via
//! [`engine::EngineFactory`].

pub mod command;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod events;
pub mod features;
pub mod http;
pub mod rooms;
pub mod session;

pub use command::{Command, CommandResult};
pub use dispatch::RtcBridge;
pub use engine::{EngineError, EngineFactory, EngineResult, RtcEngine};
pub use errors::{ApiError, CommandError};
pub use events::{EventSink, EventSource, RtcEvent};
pub use features::CapabilitySet;
pub use rooms::{RoomClient, RoomInfo};
pub use session::{Session, SessionState};

/// Initialize tracing output. Call once from the host before using the
/// bridge; respects `RUST_LOG`, defaulting to debug for this crate.
pub fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "roomlink_core=debug".parse().unwrap()),
            )
            .init();
    });
}
