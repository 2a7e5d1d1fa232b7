use serde_json::{Value, json};
use tokio::runtime::Handle;

use crate::command::{Args, Command, CommandResult};
use crate::engine::{
    AudioDeviceInfo, AudioEffectConfig, AudioMixingConfig, AudioRecordingConfig, BeautyOptions,
    ClientRole, EngineError, EngineFactory, EngineResult, LiveTranscoding, RtcEngine,
    ScreenCaptureConfig, VideoEncoderConfig,
};
use crate::errors::CommandError;
use crate::events::{EventRouter, EventSink, EventSource};
use crate::features::{FEATURE_LIVE, FeatureGate};
use crate::rooms::RoomClient;
use crate::session::{Session, SessionState};

/// The bridge between a host application and the RTC engine.
///
/// Validates, authorizes and executes named commands against the session
/// and the engine. `dispatch` is synchronous and must be called from the
/// host's single control thread; it never blocks on network I/O — commands
/// whose effect depends on network state read the currently cached
/// capability set, and resolution runs on background tasks whose outcomes
/// arrive through the event router.
pub struct RtcBridge {
    factory: Box<dyn EngineFactory>,
    session: Session,
    gate: FeatureGate,
    router: EventRouter,
    engine_events: EventSource,
    feature_events: EventSource,
}

impl RtcBridge {
    pub fn new(factory: impl EngineFactory + 'static) -> Self {
        let router = EventRouter::new();
        let engine_events = router.source("engine");
        let feature_events = router.source("features");
        Self {
            factory: Box::new(factory),
            session: Session::new(),
            gate: FeatureGate::new(),
            router,
            engine_events,
            feature_events,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Register the host sink, replacing any previous one.
    pub fn register_sink(&self, sink: std::sync::Arc<dyn EventSink>) {
        self.router.register_sink(sink);
    }

    pub fn unregister_sink(&self) {
        self.router.unregister_sink();
    }

    /// Synchronous read of the cached capability set.
    pub fn has_feature(&self, feature: &str) -> bool {
        self.gate.has_feature(feature)
    }

    /// Room/Token client bound to this session's API base URL and app id.
    /// `None` until `init` ran with an `apiBaseUrl`.
    pub fn room_client(&self) -> Option<RoomClient> {
        let base_url = self.session.api_base_url()?;
        let client = RoomClient::new(base_url, self.session.app_id()?);
        client.set_auth_token(self.session.auth_token.clone());
        Some(client)
    }

    /// Execute one command. Exactly one result per invocation; unknown
    /// names report `NOT_IMPLEMENTED`, never a fault.
    pub fn dispatch(&mut self, cmd: Command) -> CommandResult {
        tracing::debug!("dispatch {}", cmd.name);
        let args = cmd.args();
        match cmd.name.as_str() {
            "init" => self.init(&args),
            "checkFeatures" => self.check_features(&args),
            "hasFeature" => Ok(Value::Bool(self.gate.has_feature(args.str("feature")?))),
            "setApiAuthToken" => self.set_api_auth_token(&args),
            "join" => self.join(&args),
            "leave" => self.leave(),
            "release" => self.release(),

            "enableLocalAudio" => {
                let enabled = args.bool_or("enabled", false)?;
                self.forward(|e| e.enable_local_audio(enabled))
            }
            "muteLocalAudio" => {
                let muted = args.bool_or("muted", false)?;
                self.forward(|e| e.mute_local_audio(muted))
            }
            "sendChannelMessage" => {
                let message = args.str_or("message", "")?;
                self.forward(|e| e.send_channel_message(message))
            }
            "setClientRole" => {
                let role = ClientRole::from_wire(args.str_or("role", "audience")?);
                self.forward(|e| e.set_client_role(role))
            }
            "setVideoEncoderConfiguration" => {
                let config: VideoEncoderConfig = args.parse()?;
                self.gated(FEATURE_LIVE, |e| e.set_video_encoder_configuration(config))
            }
            "setAudioQuality" => {
                let quality = args.str_or("quality", "high")?;
                self.forward(|e| e.set_audio_quality(quality))
            }
            "enableVideo" => self.gated(FEATURE_LIVE, |e| e.enable_video()),
            "disableVideo" => self.forward(|e| e.disable_video()),
            "enableAudio" => self.forward(|e| e.enable_audio()),
            "disableAudio" => self.forward(|e| e.disable_audio()),
            "setAudioProfile" => {
                let profile = args.str_or("profile", "default")?;
                let scenario = args.str_or("scenario", "default")?;
                self.forward(|e| e.set_audio_profile(profile, scenario))
            }
            "setEnableSpeakerphone" => {
                let enabled = args.bool_or("enabled", false)?;
                self.forward(|e| e.set_enable_speakerphone(enabled))
            }
            "setDefaultAudioRouteToSpeakerphone" => {
                let enabled = args.bool_or("enabled", false)?;
                self.forward(|e| e.set_default_audio_route_to_speakerphone(enabled))
            }
            "isSpeakerphoneEnabled" => {
                self.query(Value::Bool(false), |e| e.is_speakerphone_enabled().map(Value::from))
            }
            "enumerateRecordingDevices" => {
                self.query(json!([]), |e| e.enumerate_recording_devices().map(device_list))
            }
            "enumeratePlaybackDevices" => {
                self.query(json!([]), |e| e.enumerate_playback_devices().map(device_list))
            }
            "setRecordingDevice" => {
                let device_id = args.str_or("deviceId", "")?;
                self.query(json!(-1), |e| e.set_recording_device(device_id).map(Value::from))
            }
            "setPlaybackDevice" => {
                let device_id = args.str_or("deviceId", "")?;
                self.query(json!(-1), |e| e.set_playback_device(device_id).map(Value::from))
            }
            "getRecordingDeviceVolume" => {
                self.query(json!(0), |e| e.get_recording_device_volume().map(Value::from))
            }
            "setRecordingDeviceVolume" => {
                let volume = args.i32_or("volume", 0)?;
                self.forward(|e| e.set_recording_device_volume(volume))
            }
            "getPlaybackDeviceVolume" => {
                self.query(json!(0), |e| e.get_playback_device_volume().map(Value::from))
            }
            "setPlaybackDeviceVolume" => {
                let volume = args.i32_or("volume", 0)?;
                self.forward(|e| e.set_playback_device_volume(volume))
            }
            "muteRemoteAudioStream" => {
                let uid = args.str_or("uid", "")?;
                let muted = args.bool_or("muted", false)?;
                self.forward(|e| e.mute_remote_audio_stream(uid, muted))
            }
            "muteAllRemoteAudioStreams" => {
                let muted = args.bool_or("muted", false)?;
                self.forward(|e| e.mute_all_remote_audio_streams(muted))
            }
            "adjustUserPlaybackSignalVolume" => {
                let uid = args.str_or("uid", "")?;
                let volume = args.i32_or("volume", 100)?;
                self.forward(|e| e.adjust_user_playback_signal_volume(uid, volume))
            }
            "adjustPlaybackSignalVolume" => {
                let volume = args.i32_or("volume", 100)?;
                self.forward(|e| e.adjust_playback_signal_volume(volume))
            }
            "renewToken" => {
                let token = args.str_or("token", "")?;
                self.forward(|e| e.renew_token(token))
            }
            "getConnectionState" => {
                self.query(json!("disconnected"), |e| e.get_connection_state().map(Value::from))
            }
            "getNetworkType" => {
                self.query(json!("unknown"), |e| e.get_network_type().map(Value::from))
            }
            "adjustRecordingSignalVolume" => {
                let volume = args.i32_or("volume", 100)?;
                self.forward(|e| e.adjust_recording_signal_volume(volume))
            }
            "muteRecordingSignal" => {
                let muted = args.bool_or("muted", false)?;
                self.forward(|e| e.mute_recording_signal(muted))
            }

            "enableLocalVideo" => {
                let enabled = args.bool_or("enabled", true)?;
                self.forward(|e| e.enable_local_video(enabled))
            }
            "startPreview" => self.forward(|e| e.start_preview()),
            "stopPreview" => self.forward(|e| e.stop_preview()),
            "muteLocalVideoStream" => {
                let muted = args.bool_or("muted", false)?;
                self.forward(|e| e.mute_local_video_stream(muted))
            }
            "muteRemoteVideoStream" => {
                let uid = args.str_or("uid", "")?;
                let muted = args.bool_or("muted", false)?;
                self.forward(|e| e.mute_remote_video_stream(uid, muted))
            }
            "muteAllRemoteVideoStreams" => {
                let muted = args.bool_or("muted", false)?;
                self.forward(|e| e.mute_all_remote_video_streams(muted))
            }
            "setupLocalVideo" => {
                let view_id = args.i64_or("viewId", 0)?;
                self.forward(|e| e.setup_local_video(view_id))
            }
            "setupRemoteVideo" => {
                let uid = args.str_or("uid", "")?;
                let view_id = args.i64_or("viewId", 0)?;
                self.forward(|e| e.setup_remote_video(uid, view_id))
            }

            "startScreenCapture" => {
                let config: ScreenCaptureConfig = args.parse()?;
                self.forward(|e| e.start_screen_capture(config))
            }
            "stopScreenCapture" => self.forward(|e| e.stop_screen_capture()),
            "updateScreenCaptureConfiguration" => {
                let config: ScreenCaptureConfig = args.parse()?;
                self.forward(|e| e.update_screen_capture_configuration(config))
            }
            "setBeautyEffectOptions" => {
                let options: BeautyOptions = args.parse()?;
                self.forward(|e| e.set_beauty_effect_options(options))
            }

            "startAudioMixing" => {
                let config: AudioMixingConfig = args.parse()?;
                self.forward(|e| e.start_audio_mixing(config))
            }
            "stopAudioMixing" => self.forward(|e| e.stop_audio_mixing()),
            "pauseAudioMixing" => self.forward(|e| e.pause_audio_mixing()),
            "resumeAudioMixing" => self.forward(|e| e.resume_audio_mixing()),
            "adjustAudioMixingVolume" => {
                let volume = args.i32_or("volume", 100)?;
                self.forward(|e| e.adjust_audio_mixing_volume(volume))
            }
            "getAudioMixingCurrentPosition" => {
                self.query(json!(0), |e| e.get_audio_mixing_current_position().map(Value::from))
            }
            "setAudioMixingPosition" => {
                let position = args.i32_or("position", 0)?;
                self.forward(|e| e.set_audio_mixing_position(position))
            }
            "playEffect" => {
                let sound_id = args.i32_or("soundId", 0)?;
                let config: AudioEffectConfig = args.parse()?;
                self.forward(|e| e.play_effect(sound_id, config))
            }
            "stopEffect" => {
                let sound_id = args.i32_or("soundId", 0)?;
                self.forward(|e| e.stop_effect(sound_id))
            }
            "stopAllEffects" => self.forward(|e| e.stop_all_effects()),
            "setEffectsVolume" => {
                let volume = args.i32_or("volume", 100)?;
                self.forward(|e| e.set_effects_volume(volume))
            }
            "preloadEffect" => {
                let sound_id = args.i32_or("soundId", 0)?;
                let file_path = args.str_or("filePath", "")?;
                self.forward(|e| e.preload_effect(sound_id, file_path))
            }
            "unloadEffect" => {
                let sound_id = args.i32_or("soundId", 0)?;
                self.forward(|e| e.unload_effect(sound_id))
            }
            "startAudioRecording" => {
                let config: AudioRecordingConfig = args.parse()?;
                self.query(json!(-1), |e| e.start_audio_recording(config).map(Value::from))
            }
            "stopAudioRecording" => self.forward(|e| e.stop_audio_recording()),

            "createDataStream" => {
                let reliable = args.bool_or("reliable", true)?;
                let ordered = args.bool_or("ordered", true)?;
                self.query(json!(0), |e| e.create_data_stream(reliable, ordered).map(Value::from))
            }
            "sendStreamMessage" => {
                let stream_id = args.i32_or("streamId", 0)?;
                let data = args.bytes_or_empty("data")?;
                self.forward(|e| e.send_stream_message(stream_id, &data))
            }

            "startRtmpStreamWithTranscoding" => {
                let url = args.non_empty_str("url")?;
                let transcoding: LiveTranscoding = args.parse()?;
                self.gated(FEATURE_LIVE, |e| e.start_rtmp_stream_with_transcoding(url, transcoding))
            }
            "stopRtmpStream" => {
                let url = args.str_or("url", "")?;
                self.forward(|e| e.stop_rtmp_stream(url))
            }
            "updateRtmpTranscoding" => {
                let transcoding: LiveTranscoding = args.parse()?;
                self.forward(|e| e.update_rtmp_transcoding(transcoding))
            }

            "takeSnapshot" => {
                let uid = args.str_or("uid", "")?;
                let file_path = args.str_or("filePath", "")?;
                self.forward(|e| e.take_snapshot(uid, file_path))
            }

            other => Err(CommandError::NotImplemented(other.to_string())),
        }
    }

    fn init(&mut self, args: &Args<'_>) -> CommandResult {
        let app_id = args.non_empty_str("appId")?.to_string();
        let api_base_url = args
            .opt_str("apiBaseUrl")?
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let signaling_url = args
            .opt_str("signalingUrl")?
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        if let Some(url) = api_base_url.as_deref() {
            url::Url::parse(url).map_err(|e| {
                CommandError::invalid_argument(format!("`apiBaseUrl` is not a valid url: {e}"))
            })?;
        }

        if self.session.state() == SessionState::Released {
            return Err(CommandError::Init("session has been released".into()));
        }

        // The ambient tokio runtime is the host execution context; without
        // one there is nowhere to run delivery and resolution tasks.
        let runtime = Handle::try_current().map_err(|_| {
            CommandError::Init("init must be called from within the host runtime".into())
        })?;

        let mut engine = self
            .factory
            .create()
            .map_err(|e| CommandError::Init(format!("engine create failed: {e}")))?;
        engine
            .init(&app_id)
            .map_err(|e| CommandError::Init(format!("engine init failed: {e}")))?;
        if let Some(url) = signaling_url.as_deref() {
            engine
                .set_signaling_server_url(url)
                .map_err(|e| CommandError::Init(e.to_string()))?;
        }
        if let Some(url) = api_base_url.as_deref() {
            engine
                .set_api_base_url(url)
                .map_err(|e| CommandError::Init(e.to_string()))?;
        }

        self.router.start(&runtime);
        self.session.api_base_url = api_base_url.clone();
        self.session.mark_initialized(app_id.clone(), engine, runtime.clone());

        match api_base_url.as_deref() {
            Some(url) => self.gate.resolve(&runtime, &app_id, url, self.feature_events.clone()),
            None => self.gate.reset_to_default(),
        }

        tracing::info!("engine initialized for app {app_id}");
        Ok(Value::Bool(true))
    }

    fn check_features(&mut self, args: &Args<'_>) -> CommandResult {
        let app_id = args.non_empty_str("appId")?;
        let api_base_url = args.non_empty_str("apiBaseUrl")?;

        let Some(runtime) = self.session.runtime.clone().or_else(|| Handle::try_current().ok())
        else {
            tracing::warn!("checkFeatures: no host runtime available");
            return Ok(Value::Bool(false));
        };
        self.gate.resolve(&runtime, app_id, api_base_url, self.feature_events.clone());
        Ok(Value::Bool(true))
    }

    fn set_api_auth_token(&mut self, args: &Args<'_>) -> CommandResult {
        let token = args.str_or("token", "")?.to_string();
        let stored = if token.is_empty() { None } else { Some(token.clone()) };
        self.session.auth_token = stored.clone();
        self.gate.set_auth_token(stored);
        self.forward(|e| e.set_api_auth_token(&token))
    }

    fn join(&mut self, args: &Args<'_>) -> CommandResult {
        let channel_id = args.str("channelId")?.to_string();
        let uid = args.str("uid")?.to_string();
        let token = args.str("token")?.to_string();

        let events = self.engine_events.clone();
        match self.session.engine_mut() {
            Some(engine) => {
                engine.set_event_handler(events);
                engine.join(&channel_id, &uid, &token).map_err(native)?;
                self.session.mark_joined(channel_id, uid);
                Ok(Value::Bool(true))
            }
            None => Ok(Value::Bool(true)),
        }
    }

    fn leave(&mut self) -> CommandResult {
        match self.session.engine_mut() {
            Some(engine) => {
                engine.leave().map_err(native)?;
                self.session.mark_left();
                Ok(Value::Bool(true))
            }
            None => Ok(Value::Bool(true)),
        }
    }

    fn release(&mut self) -> CommandResult {
        if self.session.state() == SessionState::Released {
            return Ok(Value::Bool(true));
        }
        // Unregister before touching the engine so in-flight deliveries are
        // dropped instead of reaching a sink for a dead session.
        self.router.unregister_sink();
        let engine = self.session.mark_released();
        if let Some(mut engine) = engine {
            engine.release().map_err(native)?;
        }
        tracing::info!("session released");
        Ok(Value::Bool(true))
    }

    /// Forward a fire-and-forget call to the engine. With no engine the
    /// command is a no-op reporting success, keeping the host responsive.
    fn forward(&mut self, f: impl FnOnce(&mut dyn RtcEngine) -> EngineResult<()>) -> CommandResult {
        match self.session.engine_mut() {
            Some(engine) => f(engine.as_mut()).map(|()| Value::Bool(true)).map_err(native),
            None => Ok(Value::Bool(true)),
        }
    }

    /// Forward a value-returning call; with no engine, answer `default`.
    fn query(
        &mut self,
        default: Value,
        f: impl FnOnce(&mut dyn RtcEngine) -> EngineResult<Value>,
    ) -> CommandResult {
        match self.session.engine_mut() {
            Some(engine) => f(engine.as_mut()).map_err(native),
            None => Ok(default),
        }
    }

    /// Deny unless the cached capability set grants `feature`; the engine
    /// receives no call on denial.
    fn gated(
        &mut self,
        feature: &str,
        f: impl FnOnce(&mut dyn RtcEngine) -> EngineResult<()>,
    ) -> CommandResult {
        if !self.gate.has_feature(feature) {
            return Err(CommandError::FeatureNotEnabled(format!(
                "the `{feature}` feature is not enabled for this app id"
            )));
        }
        self.forward(f)
    }
}

fn native(e: EngineError) -> CommandError {
    CommandError::Native(e.to_string())
}

fn device_list(devices: Vec<AudioDeviceInfo>) -> Value {
    Value::Array(
        devices
            .into_iter()
            .map(|d| json!({"deviceId": d.device_id, "deviceName": d.device_name}))
            .collect(),
    )
}
