//! The seam to the underlying RTC engine.
//!
//! The engine itself (capture, codecs, transport, rendering) lives outside
//! this crate; hosts plug a concrete implementation in through
//! [`EngineFactory`]. The bridge only ever issues one synchronous engine
//! call per command and reports failures as `NATIVE_ERROR`, so every
//! fallible operation returns [`EngineResult`].

use serde::Deserialize;
use thiserror::Error;

use crate::events::EventSource;

/// Failure surfaced by an engine call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(msg: impl Into<String>) -> Self {
        EngineError(msg.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Creates engine instances at `init` time.
///
/// Blanket-implemented for closures so hosts can pass
/// `|| Ok(Box::new(MyEngine::new()) as Box<dyn RtcEngine>)`.
pub trait EngineFactory: Send {
    fn create(&self) -> EngineResult<Box<dyn RtcEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> EngineResult<Box<dyn RtcEngine>> + Send,
{
    fn create(&self) -> EngineResult<Box<dyn RtcEngine>> {
        self()
    }
}

/// Client role within a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Host,
    Audience,
}

impl ClientRole {
    /// Role from its wire name; anything other than `"host"` is audience.
    pub fn from_wire(s: &str) -> Self {
        if s == "host" { ClientRole::Host } else { ClientRole::Audience }
    }
}

/// An audio capture or playback device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDeviceInfo {
    pub device_id: String,
    pub device_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoEncoderConfig {
    #[serde(default = "default_video_width")]
    pub width: i32,
    #[serde(default = "default_video_height")]
    pub height: i32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: i32,
    #[serde(default = "default_video_bitrate")]
    pub bitrate: i32,
}

fn default_video_width() -> i32 {
    640
}
fn default_video_height() -> i32 {
    480
}
fn default_frame_rate() -> i32 {
    15
}
fn default_video_bitrate() -> i32 {
    400
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenCaptureConfig {
    #[serde(default)]
    pub width: i32,
    #[serde(default)]
    pub height: i32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: i32,
    #[serde(default)]
    pub bitrate: i32,
    #[serde(default = "default_true")]
    pub capture_mouse_cursor: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeautyOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_half")]
    pub lightening_level: f64,
    #[serde(default = "default_half")]
    pub smoothness_level: f64,
    #[serde(default = "default_redness")]
    pub redness_level: f64,
}

fn default_half() -> f64 {
    0.5
}
fn default_redness() -> f64 {
    0.1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMixingConfig {
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub loopback: bool,
    #[serde(default = "default_one")]
    pub cycle: i32,
    #[serde(default)]
    pub start_pos: i32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioEffectConfig {
    #[serde(default)]
    pub file_path: String,
    #[serde(default = "default_one")]
    pub loop_count: i32,
    #[serde(default)]
    pub publish: bool,
    #[serde(default)]
    pub start_pos: i32,
}

fn default_one() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioRecordingConfig {
    #[serde(default)]
    pub file_path: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: i32,
    #[serde(default = "default_one")]
    pub channels: i32,
    #[serde(default = "default_codec_type")]
    pub codec_type: String,
    #[serde(default = "default_recording_quality")]
    pub quality: String,
}

fn default_sample_rate() -> i32 {
    32000
}
fn default_codec_type() -> String {
    "aacLc".to_string()
}
fn default_recording_quality() -> String {
    "medium".to_string()
}

/// One user's placement in an RTMP transcoding layout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodingUser {
    pub uid: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub z_order: i32,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

fn default_alpha() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveTranscoding {
    #[serde(default = "default_transcoding_width")]
    pub width: i32,
    #[serde(default = "default_transcoding_height")]
    pub height: i32,
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: i32,
    #[serde(default = "default_frame_rate")]
    pub video_framerate: i32,
    #[serde(default)]
    pub low_latency: bool,
    #[serde(default = "default_video_gop")]
    pub video_gop: i32,
    #[serde(default)]
    pub background_color: i32,
    #[serde(default)]
    pub watermark_url: Option<String>,
    #[serde(default)]
    pub transcoding_users: Vec<TranscodingUser>,
}

fn default_transcoding_width() -> i32 {
    360
}
fn default_transcoding_height() -> i32 {
    640
}
fn default_video_gop() -> i32 {
    30
}
fn default_true() -> bool {
    true
}

/// The engine surface the bridge forwards commands to, one method per
/// command. Implementations run their own internal concurrency; calls made
/// here come from the host's single control thread.
pub trait RtcEngine: Send {
    fn init(&mut self, app_id: &str) -> EngineResult<()>;
    fn set_signaling_server_url(&mut self, url: &str) -> EngineResult<()>;
    fn set_api_base_url(&mut self, url: &str) -> EngineResult<()>;
    fn set_api_auth_token(&mut self, token: &str) -> EngineResult<()>;
    /// Handler used for all engine-originated notifications. Events are
    /// emitted from engine-internal execution contexts; the [`EventSource`]
    /// marshals them onto the delivery context.
    fn set_event_handler(&mut self, events: EventSource);
    fn join(&mut self, channel_id: &str, uid: &str, token: &str) -> EngineResult<()>;
    fn leave(&mut self) -> EngineResult<()>;
    fn release(&mut self) -> EngineResult<()>;

    fn enable_local_audio(&mut self, enabled: bool) -> EngineResult<()>;
    fn mute_local_audio(&mut self, muted: bool) -> EngineResult<()>;
    fn send_channel_message(&mut self, message: &str) -> EngineResult<()>;
    fn set_client_role(&mut self, role: ClientRole) -> EngineResult<()>;
    fn set_audio_quality(&mut self, quality: &str) -> EngineResult<()>;
    fn enable_audio(&mut self) -> EngineResult<()>;
    fn disable_audio(&mut self) -> EngineResult<()>;
    fn set_audio_profile(&mut self, profile: &str, scenario: &str) -> EngineResult<()>;
    fn set_enable_speakerphone(&mut self, enabled: bool) -> EngineResult<()>;
    fn set_default_audio_route_to_speakerphone(&mut self, enabled: bool) -> EngineResult<()>;
    fn is_speakerphone_enabled(&mut self) -> EngineResult<bool>;
    fn enumerate_recording_devices(&mut self) -> EngineResult<Vec<AudioDeviceInfo>>;
    fn enumerate_playback_devices(&mut self) -> EngineResult<Vec<AudioDeviceInfo>>;
    fn set_recording_device(&mut self, device_id: &str) -> EngineResult<i32>;
    fn set_playback_device(&mut self, device_id: &str) -> EngineResult<i32>;
    fn get_recording_device_volume(&mut self) -> EngineResult<i32>;
    fn set_recording_device_volume(&mut self, volume: i32) -> EngineResult<()>;
    fn get_playback_device_volume(&mut self) -> EngineResult<i32>;
    fn set_playback_device_volume(&mut self, volume: i32) -> EngineResult<()>;
    fn mute_remote_audio_stream(&mut self, uid: &str, muted: bool) -> EngineResult<()>;
    fn mute_all_remote_audio_streams(&mut self, muted: bool) -> EngineResult<()>;
    fn adjust_user_playback_signal_volume(&mut self, uid: &str, volume: i32) -> EngineResult<()>;
    fn adjust_playback_signal_volume(&mut self, volume: i32) -> EngineResult<()>;
    fn adjust_recording_signal_volume(&mut self, volume: i32) -> EngineResult<()>;
    fn mute_recording_signal(&mut self, muted: bool) -> EngineResult<()>;
    fn renew_token(&mut self, token: &str) -> EngineResult<()>;
    fn get_connection_state(&mut self) -> EngineResult<String>;
    fn get_network_type(&mut self) -> EngineResult<String>;

    fn enable_video(&mut self) -> EngineResult<()>;
    fn disable_video(&mut self) -> EngineResult<()>;
    fn set_video_encoder_configuration(&mut self, config: VideoEncoderConfig) -> EngineResult<()>;
    fn enable_local_video(&mut self, enabled: bool) -> EngineResult<()>;
    fn start_preview(&mut self) -> EngineResult<()>;
    fn stop_preview(&mut self) -> EngineResult<()>;
    fn mute_local_video_stream(&mut self, muted: bool) -> EngineResult<()>;
    fn mute_remote_video_stream(&mut self, uid: &str, muted: bool) -> EngineResult<()>;
    fn mute_all_remote_video_streams(&mut self, muted: bool) -> EngineResult<()>;
    fn setup_local_video(&mut self, view_id: i64) -> EngineResult<()>;
    fn setup_remote_video(&mut self, uid: &str, view_id: i64) -> EngineResult<()>;

    fn start_screen_capture(&mut self, config: ScreenCaptureConfig) -> EngineResult<()>;
    fn stop_screen_capture(&mut self) -> EngineResult<()>;
    fn update_screen_capture_configuration(&mut self, config: ScreenCaptureConfig) -> EngineResult<()>;
    fn set_beauty_effect_options(&mut self, options: BeautyOptions) -> EngineResult<()>;

    fn start_audio_mixing(&mut self, config: AudioMixingConfig) -> EngineResult<()>;
    fn stop_audio_mixing(&mut self) -> EngineResult<()>;
    fn pause_audio_mixing(&mut self) -> EngineResult<()>;
    fn resume_audio_mixing(&mut self) -> EngineResult<()>;
    fn adjust_audio_mixing_volume(&mut self, volume: i32) -> EngineResult<()>;
    fn get_audio_mixing_current_position(&mut self) -> EngineResult<i32>;
    fn set_audio_mixing_position(&mut self, position: i32) -> EngineResult<()>;
    fn play_effect(&mut self, sound_id: i32, config: AudioEffectConfig) -> EngineResult<()>;
    fn stop_effect(&mut self, sound_id: i32) -> EngineResult<()>;
    fn stop_all_effects(&mut self) -> EngineResult<()>;
    fn set_effects_volume(&mut self, volume: i32) -> EngineResult<()>;
    fn preload_effect(&mut self, sound_id: i32, file_path: &str) -> EngineResult<()>;
    fn unload_effect(&mut self, sound_id: i32) -> EngineResult<()>;
    fn start_audio_recording(&mut self, config: AudioRecordingConfig) -> EngineResult<i32>;
    fn stop_audio_recording(&mut self) -> EngineResult<()>;

    fn create_data_stream(&mut self, reliable: bool, ordered: bool) -> EngineResult<i32>;
    fn send_stream_message(&mut self, stream_id: i32, data: &[u8]) -> EngineResult<()>;

    fn start_rtmp_stream_with_transcoding(
        &mut self,
        url: &str,
        transcoding: LiveTranscoding,
    ) -> EngineResult<()>;
    fn stop_rtmp_stream(&mut self, url: &str) -> EngineResult<()>;
    fn update_rtmp_transcoding(&mut self, transcoding: LiveTranscoding) -> EngineResult<()>;

    fn take_snapshot(&mut self, uid: &str, file_path: &str) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn video_encoder_config_defaults() {
        let cfg: VideoEncoderConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(cfg, VideoEncoderConfig { width: 640, height: 480, frame_rate: 15, bitrate: 400 });
    }

    #[test]
    fn video_encoder_config_rejects_wrong_type() {
        let r: Result<VideoEncoderConfig, _> = serde_json::from_value(json!({"width": "wide"}));
        assert!(r.is_err());
    }

    #[test]
    fn transcoding_defaults() {
        let t: LiveTranscoding = serde_json::from_value(json!({})).unwrap();
        assert_eq!(t.width, 360);
        assert_eq!(t.height, 640);
        assert_eq!(t.video_bitrate, 400);
        assert_eq!(t.video_framerate, 15);
        assert_eq!(t.video_gop, 30);
        assert_eq!(t.background_color, 0);
        assert!(t.watermark_url.is_none());
        assert!(t.transcoding_users.is_empty());
    }

    #[test]
    fn transcoding_user_requires_uid() {
        let r: Result<LiveTranscoding, _> = serde_json::from_value(json!({
            "transcodingUsers": [{"x": 1.0}]
        }));
        assert!(r.is_err());

        let t: LiveTranscoding = serde_json::from_value(json!({
            "transcodingUsers": [{"uid": "u1", "zOrder": 2}]
        }))
        .unwrap();
        assert_eq!(t.transcoding_users[0].uid, "u1");
        assert_eq!(t.transcoding_users[0].z_order, 2);
        assert_eq!(t.transcoding_users[0].alpha, 1.0);
    }

    #[test]
    fn recording_config_defaults() {
        let cfg: AudioRecordingConfig = serde_json::from_value(json!({"filePath": "/tmp/a.aac"})).unwrap();
        assert_eq!(cfg.sample_rate, 32000);
        assert_eq!(cfg.channels, 1);
        assert_eq!(cfg.codec_type, "aacLc");
        assert_eq!(cfg.quality, "medium");
    }

    #[test]
    fn client_role_from_wire() {
        assert_eq!(ClientRole::from_wire("host"), ClientRole::Host);
        assert_eq!(ClientRole::from_wire("audience"), ClientRole::Audience);
        assert_eq!(ClientRole::from_wire("anything"), ClientRole::Audience);
    }
}
