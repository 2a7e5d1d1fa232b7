use tokio::runtime::Handle;

use crate::engine::RtcEngine;

/// Lifecycle of one bridged engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Joined,
    /// Terminal. Only a no-op `release` succeeds afterwards.
    Released,
}

/// Per-instance lifecycle state of the bridged engine.
///
/// Owns the engine handle exclusively; only the dispatcher mutates it, on
/// the host's control thread. Multiple bridge instances each carry their
/// own session, so nothing here is process-wide.
pub struct Session {
    pub(crate) state: SessionState,
    pub(crate) app_id: Option<String>,
    pub(crate) api_base_url: Option<String>,
    pub(crate) auth_token: Option<String>,
    pub(crate) channel_id: Option<String>,
    pub(crate) local_uid: Option<String>,
    pub(crate) engine: Option<Box<dyn RtcEngine>>,
    pub(crate) runtime: Option<Handle>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            app_id: None,
            api_base_url: None,
            auth_token: None,
            channel_id: None,
            local_uid: None,
            engine: None,
            runtime: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    pub fn api_base_url(&self) -> Option<&str> {
        self.api_base_url.as_deref()
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    pub fn local_uid(&self) -> Option<&str> {
        self.local_uid.as_deref()
    }

    pub(crate) fn engine_mut(&mut self) -> Option<&mut Box<dyn RtcEngine>> {
        self.engine.as_mut()
    }

    pub(crate) fn mark_initialized(&mut self, app_id: String, engine: Box<dyn RtcEngine>, runtime: Handle) {
        self.state = SessionState::Initialized;
        self.app_id = Some(app_id);
        self.engine = Some(engine);
        self.runtime = Some(runtime);
        self.channel_id = None;
        self.local_uid = None;
    }

    pub(crate) fn mark_joined(&mut self, channel_id: String, uid: String) {
        if self.state == SessionState::Initialized {
            self.state = SessionState::Joined;
        }
        self.channel_id = Some(channel_id);
        self.local_uid = Some(uid);
    }

    pub(crate) fn mark_left(&mut self) {
        if self.state == SessionState::Joined {
            self.state = SessionState::Initialized;
        }
        self.channel_id = None;
        self.local_uid = None;
    }

    /// Terminal: drops the engine reference. No further commands succeed
    /// afterwards except a no-op `release`.
    pub(crate) fn mark_released(&mut self) -> Option<Box<dyn RtcEngine>> {
        self.state = SessionState::Released;
        self.channel_id = None;
        self.local_uid = None;
        self.engine.take()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
