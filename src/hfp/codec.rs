// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Typed stack events and AT string encoding/decoding.
//!
//! The transport hands over events either already typed ([`StackEvent`])
//! or in the numeric form the native layer produces ([`RawStackEvent`]).
//! Unknown result codes arrive as raw strings and are classified by
//! [`parse_unsolicited`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::address::DeviceAddress;
use super::call::{CallDirection, CallState};
use super::policy::AudioPolicy;
use super::vendor::{self, VendorEvent};

/// Android AT capability query.
pub const ANDROID_AT_QUERY: &str = "+ANDROID=?";

/// Prefix of `+ANDROID` replies.
pub const ANDROID_AT_RESPONSE_PREFIX: &str = "+ANDROID:";

/// Capability token for sink audio policy support.
pub const SINK_AUDIO_POLICY: &str = "SINKAUDIOPOLICY";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unknown stack event type {0}")]
    UnknownEventType(u8),
    #[error("stack event without a device address")]
    MissingDevice,
    #[error("invalid value {value} for {event}")]
    InvalidValue { event: &'static str, value: i32 },
    #[error("{0} event is missing its string payload")]
    MissingString(&'static str),
}

/// Link state reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    SlcConnected { peer_features: u32, chld_features: u32 },
    Disconnecting,
}

/// SCO codec of an established audio link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoCodec {
    #[default]
    Cvsd,
    /// Wideband speech.
    Msbc,
    /// Super-wideband speech.
    Lc3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioLinkState {
    Disconnected,
    Connecting,
    Connected { codec: ScoCodec },
}

/// Final result code of an AT command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmdResultCode {
    Ok,
    Error,
    NoCarrier,
    Busy,
    NoAnswer,
    Delayed,
    Blocklisted,
    CmeError(u16),
}

impl CmdResultCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, CmdResultCode::Ok)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeKind {
    Speaker,
    Mic,
}

/// Which AG indicator changed in a call-status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallIndicator {
    Call,
    CallSetup,
    CallHeld,
    ResponseAndHold,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StackEventKind {
    ConnectionStateChanged { state: LinkState },
    AudioStateChanged { state: AudioLinkState },
    VoiceRecognitionChanged { active: bool },
    NetworkState { available: bool },
    RoamingState { roaming: bool },
    SignalStrength { level: u8 },
    BatteryLevel { level: u8 },
    OperatorName { name: String },
    CallStatus { indicator: CallIndicator, value: u8 },
    Clip { number: String },
    CallWaiting { number: String },
    CurrentCall {
        index: u32,
        direction: CallDirection,
        state: CallState,
        multiparty: bool,
        number: String,
    },
    VolumeChanged { kind: VolumeKind, level: u8 },
    CmdResult { code: CmdResultCode },
    SubscriberInfo { number: String, service_type: u8 },
    InBandRingtone { enabled: bool },
    RingIndication,
    UnknownEvent { raw: String },
}

impl StackEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackEventKind::ConnectionStateChanged { .. } => "CONNECTION_STATE_CHANGED",
            StackEventKind::AudioStateChanged { .. } => "AUDIO_STATE_CHANGED",
            StackEventKind::VoiceRecognitionChanged { .. } => "VR_STATE_CHANGED",
            StackEventKind::NetworkState { .. } => "NETWORK_STATE",
            StackEventKind::RoamingState { .. } => "ROAMING_STATE",
            StackEventKind::SignalStrength { .. } => "NETWORK_SIGNAL",
            StackEventKind::BatteryLevel { .. } => "BATTERY_LEVEL",
            StackEventKind::OperatorName { .. } => "OPERATOR_NAME",
            StackEventKind::CallStatus { .. } => "CALL_STATUS",
            StackEventKind::Clip { .. } => "CLIP",
            StackEventKind::CallWaiting { .. } => "CALL_WAITING",
            StackEventKind::CurrentCall { .. } => "CURRENT_CALLS",
            StackEventKind::VolumeChanged { .. } => "VOLUME_CHANGED",
            StackEventKind::CmdResult { .. } => "CMD_RESULT",
            StackEventKind::SubscriberInfo { .. } => "SUBSCRIBER_INFO",
            StackEventKind::InBandRingtone { .. } => "IN_BAND_RINGTONE",
            StackEventKind::RingIndication => "RING_INDICATION",
            StackEventKind::UnknownEvent { .. } => "UNKNOWN_EVENT",
        }
    }
}

/// An event from the transport, addressed to one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEvent {
    pub device: DeviceAddress,
    #[serde(flatten)]
    pub kind: StackEventKind,
}

impl StackEvent {
    pub fn new(device: DeviceAddress, kind: StackEventKind) -> Self {
        Self { device, kind }
    }
}

/// Numeric event type codes of [`RawStackEvent`].
pub mod event_type {
    pub const CONNECTION_STATE_CHANGED: u8 = 1;
    pub const AUDIO_STATE_CHANGED: u8 = 2;
    pub const VR_STATE_CHANGED: u8 = 3;
    pub const NETWORK_STATE: u8 = 4;
    pub const ROAMING_STATE: u8 = 5;
    pub const NETWORK_SIGNAL: u8 = 6;
    pub const BATTERY_LEVEL: u8 = 7;
    pub const OPERATOR_NAME: u8 = 8;
    pub const CALL: u8 = 9;
    pub const CALLSETUP: u8 = 10;
    pub const CALLHELD: u8 = 11;
    pub const CLIP: u8 = 12;
    pub const CALL_WAITING: u8 = 13;
    pub const CURRENT_CALLS: u8 = 14;
    pub const VOLUME_CHANGED: u8 = 15;
    pub const CMD_RESULT: u8 = 16;
    pub const SUBSCRIBER_INFO: u8 = 17;
    pub const RESP_AND_HOLD: u8 = 18;
    pub const RING_INDICATION: u8 = 21;
    pub const UNKNOWN_EVENT: u8 = 22;
    pub const IN_BAND_RINGTONE: u8 = 23;
}

/// Event in the native layer's numeric encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawStackEvent {
    pub device: Option<DeviceAddress>,
    pub event_type: u8,
    pub value_int: i32,
    pub value_int2: i32,
    pub value_int3: i32,
    pub value_int4: i32,
    pub value_string: Option<String>,
}

impl RawStackEvent {
    pub fn new(device: DeviceAddress, event_type: u8) -> Self {
        Self {
            device: Some(device),
            event_type,
            ..Default::default()
        }
    }

    pub fn with_ints(mut self, value_int: i32, value_int2: i32) -> Self {
        self.value_int = value_int;
        self.value_int2 = value_int2;
        self
    }

    pub fn with_string(mut self, value: impl Into<String>) -> Self {
        self.value_string = Some(value.into());
        self
    }
}

fn small(event: &'static str, value: i32) -> Result<u8, CodecError> {
    u8::try_from(value).map_err(|_| CodecError::InvalidValue { event, value })
}

fn flag(event: &'static str, value: i32) -> Result<bool, CodecError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(CodecError::InvalidValue { event, value }),
    }
}

impl RawStackEvent {
    /// Decode into a typed [`StackEvent`].
    pub fn decode(self) -> Result<StackEvent, CodecError> {
        let device = self.device.ok_or(CodecError::MissingDevice)?;
        let text = |name: &'static str| self.value_string.clone().ok_or(CodecError::MissingString(name));

        let kind = match self.event_type {
            event_type::CONNECTION_STATE_CHANGED => {
                let state = match self.value_int {
                    0 => LinkState::Disconnected,
                    1 => LinkState::Connecting,
                    2 => LinkState::Connected,
                    3 => LinkState::SlcConnected {
                        peer_features: self.value_int2 as u32,
                        chld_features: self.value_int3 as u32,
                    },
                    4 => LinkState::Disconnecting,
                    value => return Err(CodecError::InvalidValue { event: "connection state", value }),
                };
                StackEventKind::ConnectionStateChanged { state }
            }
            event_type::AUDIO_STATE_CHANGED => {
                let state = match self.value_int {
                    0 => AudioLinkState::Disconnected,
                    1 => AudioLinkState::Connecting,
                    2 => AudioLinkState::Connected { codec: ScoCodec::Cvsd },
                    3 => AudioLinkState::Connected { codec: ScoCodec::Msbc },
                    4 => AudioLinkState::Connected { codec: ScoCodec::Lc3 },
                    value => return Err(CodecError::InvalidValue { event: "audio state", value }),
                };
                StackEventKind::AudioStateChanged { state }
            }
            event_type::VR_STATE_CHANGED => StackEventKind::VoiceRecognitionChanged {
                active: flag("voice recognition", self.value_int)?,
            },
            event_type::NETWORK_STATE => StackEventKind::NetworkState {
                available: flag("network state", self.value_int)?,
            },
            event_type::ROAMING_STATE => StackEventKind::RoamingState {
                roaming: flag("roaming state", self.value_int)?,
            },
            event_type::NETWORK_SIGNAL => StackEventKind::SignalStrength {
                level: small("signal strength", self.value_int)?,
            },
            event_type::BATTERY_LEVEL => StackEventKind::BatteryLevel {
                level: small("battery level", self.value_int)?,
            },
            event_type::OPERATOR_NAME => StackEventKind::OperatorName { name: text("operator name")? },
            event_type::CALL | event_type::CALLSETUP | event_type::CALLHELD | event_type::RESP_AND_HOLD => {
                let indicator = match self.event_type {
                    event_type::CALL => CallIndicator::Call,
                    event_type::CALLSETUP => CallIndicator::CallSetup,
                    event_type::CALLHELD => CallIndicator::CallHeld,
                    _ => CallIndicator::ResponseAndHold,
                };
                StackEventKind::CallStatus {
                    indicator,
                    value: small("call indicator", self.value_int)?,
                }
            }
            event_type::CLIP => StackEventKind::Clip { number: text("clip")? },
            event_type::CALL_WAITING => StackEventKind::CallWaiting { number: text("call waiting")? },
            event_type::CURRENT_CALLS => {
                let index = u32::try_from(self.value_int)
                    .map_err(|_| CodecError::InvalidValue { event: "call index", value: self.value_int })?;
                let direction = CallDirection::from_clcc(small("call direction", self.value_int2)?)
                    .ok_or(CodecError::InvalidValue { event: "call direction", value: self.value_int2 })?;
                let state = CallState::from_clcc(small("call state", self.value_int3)?)
                    .ok_or(CodecError::InvalidValue { event: "call state", value: self.value_int3 })?;
                StackEventKind::CurrentCall {
                    index,
                    direction,
                    state,
                    multiparty: flag("multiparty", self.value_int4)?,
                    number: self.value_string.clone().unwrap_or_default(),
                }
            }
            event_type::VOLUME_CHANGED => {
                let kind = match self.value_int {
                    0 => VolumeKind::Speaker,
                    1 => VolumeKind::Mic,
                    value => return Err(CodecError::InvalidValue { event: "volume type", value }),
                };
                StackEventKind::VolumeChanged {
                    kind,
                    level: small("volume level", self.value_int2)?,
                }
            }
            event_type::CMD_RESULT => {
                let code = match self.value_int {
                    0 => CmdResultCode::Ok,
                    1 => CmdResultCode::Error,
                    2 => CmdResultCode::NoCarrier,
                    3 => CmdResultCode::Busy,
                    4 => CmdResultCode::NoAnswer,
                    5 => CmdResultCode::Delayed,
                    6 => CmdResultCode::Blocklisted,
                    7 => CmdResultCode::CmeError(
                        u16::try_from(self.value_int2)
                            .map_err(|_| CodecError::InvalidValue { event: "cme error", value: self.value_int2 })?,
                    ),
                    value => return Err(CodecError::InvalidValue { event: "command result", value }),
                };
                StackEventKind::CmdResult { code }
            }
            event_type::SUBSCRIBER_INFO => StackEventKind::SubscriberInfo {
                number: text("subscriber info")?,
                service_type: small("service type", self.value_int)?,
            },
            event_type::RING_INDICATION => StackEventKind::RingIndication,
            event_type::UNKNOWN_EVENT => StackEventKind::UnknownEvent { raw: text("unknown event")? },
            event_type::IN_BAND_RINGTONE => StackEventKind::InBandRingtone {
                enabled: flag("in-band ringtone", self.value_int)?,
            },
            other => return Err(CodecError::UnknownEventType(other)),
        };
        Ok(StackEvent { device, kind })
    }
}

/// Parsed `+ANDROID:` capability reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AndroidFeatures {
    groups: Vec<Vec<String>>,
}

impl AndroidFeatures {
    /// First field of every parenthesized group.
    pub fn features(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().filter_map(|g| g.first()).map(String::as_str)
    }

    pub fn supports_sink_audio_policy(&self) -> bool {
        self.features().any(|f| f == SINK_AUDIO_POLICY)
    }
}

/// Parse a `+ANDROID: (TOKEN,...),(TOKEN,...)` reply.
///
/// Returns `None` unless the line carries the `+ANDROID:` prefix. Empty
/// groups, extra fields, unterminated groups and trailing text are
/// tolerated.
pub fn parse_android_features(raw: &str) -> Option<AndroidFeatures> {
    let mut rest = raw.trim_start().strip_prefix(ANDROID_AT_RESPONSE_PREFIX)?;
    let mut groups = Vec::new();
    while let Some(open) = rest.find('(') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(')') else {
            break;
        };
        groups.push(after[..close].split(',').map(|f| f.trim().to_string()).collect());
        rest = &after[close + 1..];
    }
    Some(AndroidFeatures { groups })
}

/// Outbound `+ANDROID` commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AndroidAtCommand {
    Query,
    SetSinkAudioPolicy(AudioPolicy),
}

impl AndroidAtCommand {
    pub fn encode(&self) -> String {
        match self {
            AndroidAtCommand::Query => ANDROID_AT_QUERY.to_string(),
            AndroidAtCommand::SetSinkAudioPolicy(policy) => format!(
                "+ANDROID={},{},{},{}",
                SINK_AUDIO_POLICY,
                policy.call_establish.code(),
                policy.active_device_after_connection.code(),
                policy.in_band_ringtone.code()
            ),
        }
    }
}

/// Classification of an unknown-event string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsolicitedResponse {
    Android(AndroidFeatures),
    Vendor(VendorEvent),
    Unrecognized,
}

pub fn parse_unsolicited(raw: &str) -> UnsolicitedResponse {
    if let Some(features) = parse_android_features(raw) {
        return UnsolicitedResponse::Android(features);
    }
    match vendor::match_event(raw) {
        Some(event) => UnsolicitedResponse::Vendor(event),
        None => UnsolicitedResponse::Unrecognized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hfp::policy::PolicyValue;

    fn device() -> DeviceAddress {
        DeviceAddress::new([0, 1, 2, 3, 4, 5])
    }

    #[test]
    fn test_android_features_tolerant_parse() {
        let supported = [
            "+ANDROID: (SINKAUDIOPOLICY)",
            "+ANDROID: (SINKAUDIOPOLICY),(OTHERFEATURE)",
            "+ANDROID: (SINKAUDIOPOLICY),(OTHERFEATURE,1,2,3),(1,2,3)",
            "+ANDROID: (), (SINKAUDIOPOLICY) trailing",
            "+ANDROID: ( SINKAUDIOPOLICY ,1)",
        ];
        for raw in supported {
            let features = parse_android_features(raw).unwrap();
            assert!(features.supports_sink_audio_policy(), "{raw}");
        }

        let consumed_without_token = ["+ANDROID: ()", "+ANDROID: (,,,)", "+ANDROID: 123", "+ANDROID: ", "+ANDROID: (SINKAUDIOPOLICY"];
        for raw in consumed_without_token {
            let features = parse_android_features(raw).unwrap();
            assert!(!features.supports_sink_audio_policy(), "{raw}");
        }

        let not_android = ["+ANDROID= (SINKAUDIOPOLICY)", "RANDOM ^%$# STRING", ""];
        for raw in not_android {
            assert!(parse_android_features(raw).is_none(), "{raw}");
        }
    }

    #[test]
    fn test_token_must_be_first_field() {
        let features = parse_android_features("+ANDROID: (OTHER,SINKAUDIOPOLICY)").unwrap();
        assert!(!features.supports_sink_audio_policy());
    }

    #[test]
    fn test_encode_android_commands() {
        assert_eq!(AndroidAtCommand::Query.encode(), "+ANDROID=?");
        let policy = AudioPolicy::new(PolicyValue::NotAllowed, PolicyValue::Unspecified, PolicyValue::Allowed);
        assert_eq!(
            AndroidAtCommand::SetSinkAudioPolicy(policy).encode(),
            "+ANDROID=SINKAUDIOPOLICY,2,0,1"
        );
    }

    #[test]
    fn test_parse_unsolicited() {
        assert!(matches!(
            parse_unsolicited("+ANDROID: (SINKAUDIOPOLICY)"),
            UnsolicitedResponse::Android(_)
        ));
        assert!(matches!(parse_unsolicited("+XAPL=iPhone,2"), UnsolicitedResponse::Vendor(_)));
        assert_eq!(parse_unsolicited("+XAAPL=iPhone,2"), UnsolicitedResponse::Unrecognized);
    }

    #[test]
    fn test_decode_slc_connected() {
        let raw = RawStackEvent {
            device: Some(device()),
            event_type: event_type::CONNECTION_STATE_CHANGED,
            value_int: 3,
            value_int2: 0x40,
            value_int3: 0x08,
            ..Default::default()
        };
        let event = raw.decode().unwrap();
        assert_eq!(event.device, device());
        assert_eq!(
            event.kind,
            StackEventKind::ConnectionStateChanged {
                state: LinkState::SlcConnected { peer_features: 0x40, chld_features: 0x08 }
            }
        );
    }

    #[test]
    fn test_decode_current_call_and_results() {
        let raw = RawStackEvent {
            device: Some(device()),
            event_type: event_type::CURRENT_CALLS,
            value_int: 1,
            value_int2: 1,
            value_int3: 4,
            value_int4: 0,
            value_string: Some("5551212".to_string()),
        };
        assert_eq!(
            raw.decode().unwrap().kind,
            StackEventKind::CurrentCall {
                index: 1,
                direction: CallDirection::Incoming,
                state: CallState::Incoming,
                multiparty: false,
                number: "5551212".to_string(),
            }
        );

        let cme = RawStackEvent::new(device(), event_type::CMD_RESULT).with_ints(7, 3);
        assert_eq!(
            cme.decode().unwrap().kind,
            StackEventKind::CmdResult { code: CmdResultCode::CmeError(3) }
        );

        let msbc = RawStackEvent::new(device(), event_type::AUDIO_STATE_CHANGED).with_ints(3, 0);
        assert_eq!(
            msbc.decode().unwrap().kind,
            StackEventKind::AudioStateChanged {
                state: AudioLinkState::Connected { codec: ScoCodec::Msbc }
            }
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            RawStackEvent::new(device(), 99).decode(),
            Err(CodecError::UnknownEventType(99))
        );
        assert_eq!(
            RawStackEvent::new(device(), event_type::UNKNOWN_EVENT).decode(),
            Err(CodecError::MissingString("unknown event"))
        );
        assert!(matches!(
            RawStackEvent::new(device(), event_type::CURRENT_CALLS).with_ints(1, 7).decode(),
            Err(CodecError::InvalidValue { event: "call direction", .. })
        ));
    }

    #[test]
    fn test_stack_event_json_shape() {
        let event = StackEvent::new(device(), StackEventKind::UnknownEvent { raw: "+XAPL=iPhone,2".into() });
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"device":"00:01:02:03:04:05","type":"unknown_event","raw":"+XAPL=iPhone,2"}"#
        );
        let back: StackEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
