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

//! HFP client connection state machine.
//!
//! One machine serves one peer at a time. Everything it reacts to, local
//! requests, stack events and its own timers, is a [`Message`] on a single
//! [`Looper`] queue. Handlers run to completion; a requested state change is
//! applied after the handler returns, at which point the old state's timers
//! are cancelled and deferred messages are put back in front of the queue.
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> AudioOn
//!       ^______________|____________|___________|
//! ```
//!
//! AudioOn is nested in Connected: whatever AudioOn does not handle is
//! passed to the Connected handler.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::actions::{ActionKind, ActionQueue, QueuedAction};
use super::address::DeviceAddress;
use super::call::{Call, CallChange, CallDirection, CallFields, CallState, CallTable};
use super::codec::{
    parse_android_features, parse_unsolicited, AudioLinkState, CmdResultCode, LinkState, ScoCodec,
    StackEvent, StackEventKind, UnsolicitedResponse, VolumeKind, ANDROID_AT_QUERY,
};
use super::connection_policy::{ConnectionPolicy, ConnectionPolicyStore};
use super::constants::{chld_feat, peer_feat, AcceptFlag, AtCommand, CallAction, MAX_VOLUME};
use super::features::{AgFeatures, NegotiatedFeatures};
use super::looper::{Envelope, Looper};
use super::native::NativeInterface;
use super::policy::{AudioPolicy, AudioPolicyNegotiator, PolicyValue, RemoteSupport};
use super::vendor;
use crate::config::Config;
use crate::events::{
    AgEvent, AudioState, EventDispatcher, Notification, ProfileState, VoiceRecognitionState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Disconnected,
    Connecting,
    Connected,
    AudioOn,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Disconnected => "Disconnected",
            State::Connecting => "Connecting",
            State::Connected => "Connected",
            State::AudioOn => "AudioOn",
        }
    }

    pub fn profile_state(&self) -> ProfileState {
        match self {
            State::Disconnected => ProfileState::Disconnected,
            State::Connecting => ProfileState::Connecting,
            State::Connected | State::AudioOn => ProfileState::Connected,
        }
    }

    /// Whether `self` is `scope` or nested inside it.
    fn within(self, scope: State) -> bool {
        self == scope || (self == State::AudioOn && scope == State::Connected)
    }
}

/// Everything the machine processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    Connect(DeviceAddress),
    Disconnect(DeviceAddress),
    ConnectAudio,
    DisconnectAudio,
    VoiceRecognitionStart,
    VoiceRecognitionStop,
    SetMicVolume(u8),
    SetSpeakerVolume(u8),
    Dial(String),
    AcceptCall(AcceptFlag),
    RejectCall,
    HoldCall,
    TerminateCall,
    EnterPrivateMode(u32),
    ExplicitCallTransfer,
    SendDtmf(u8),
    DisableNrec,
    SendVendorAtCommand { vendor_id: u16, command: String },
    SendBiev { indicator_id: u16, value: i32 },
    QueryCurrentCalls,
    QueryOperatorName,
    SubscriberInfo,
    SetAudioPolicy(AudioPolicy),
    SetAudioRouteAllowed(bool),
    ConnectingTimeout,
    OutgoingCallTimeout,
    Stack(StackEvent),
}

impl Message {
    pub fn as_str(&self) -> &'static str {
        match self {
            Message::Connect(_) => "CONNECT",
            Message::Disconnect(_) => "DISCONNECT",
            Message::ConnectAudio => "CONNECT_AUDIO",
            Message::DisconnectAudio => "DISCONNECT_AUDIO",
            Message::VoiceRecognitionStart => "VOICE_RECOGNITION_START",
            Message::VoiceRecognitionStop => "VOICE_RECOGNITION_STOP",
            Message::SetMicVolume(_) => "SET_MIC_VOLUME",
            Message::SetSpeakerVolume(_) => "SET_SPEAKER_VOLUME",
            Message::Dial(_) => "DIAL_NUMBER",
            Message::AcceptCall(_) => "ACCEPT_CALL",
            Message::RejectCall => "REJECT_CALL",
            Message::HoldCall => "HOLD_CALL",
            Message::TerminateCall => "TERMINATE_CALL",
            Message::EnterPrivateMode(_) => "ENTER_PRIVATE_MODE",
            Message::ExplicitCallTransfer => "EXPLICIT_CALL_TRANSFER",
            Message::SendDtmf(_) => "SEND_DTMF",
            Message::DisableNrec => "DISABLE_NREC",
            Message::SendVendorAtCommand { .. } => "SEND_VENDOR_AT_COMMAND",
            Message::SendBiev { .. } => "SEND_BIEV",
            Message::QueryCurrentCalls => "QUERY_CURRENT_CALLS",
            Message::QueryOperatorName => "QUERY_OPERATOR_NAME",
            Message::SubscriberInfo => "SUBSCRIBER_INFO",
            Message::SetAudioPolicy(_) => "SET_AUDIO_POLICY",
            Message::SetAudioRouteAllowed(_) => "SET_AUDIO_ROUTE_ALLOWED",
            Message::ConnectingTimeout => "CONNECTING_TIMEOUT",
            Message::OutgoingCallTimeout => "OUTGOING_CALL_TIMEOUT",
            Message::Stack(_) => "STACK_EVENT",
        }
    }
}

/// Last known AG indicator values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgIndicators {
    pub network_available: Option<bool>,
    pub roaming: Option<bool>,
    pub signal_strength: Option<u8>,
    pub battery_level: Option<u8>,
    pub operator_name: Option<String>,
    pub subscriber_number: Option<String>,
    pub speaker_volume: Option<u8>,
    pub mic_volume: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Handled,
    Deferred,
    NotHandled,
}

/// Per-peer data, alive from the connection attempt until Disconnected.
#[derive(Debug)]
struct DeviceSession {
    device: DeviceAddress,
    features: Option<NegotiatedFeatures>,
    calls: CallTable,
    /// `+CLCC` entries collected until the listing's result code.
    call_sync: BTreeMap<u32, CallFields>,
    /// Locally dialled call the AG has not listed yet.
    outgoing: Option<Call>,
    queue: ActionQueue,
    negotiator: AudioPolicyNegotiator,
    audio: AudioState,
    wideband: bool,
    super_wideband: bool,
    in_band_ring: bool,
    voice_recognition: VoiceRecognitionState,
    indicators: AgIndicators,
}

impl DeviceSession {
    fn new(device: DeviceAddress) -> Self {
        Self {
            device,
            features: None,
            calls: CallTable::new(),
            call_sync: BTreeMap::new(),
            outgoing: None,
            queue: ActionQueue::new(),
            negotiator: AudioPolicyNegotiator::new(),
            audio: AudioState::Disconnected,
            wideband: false,
            super_wideband: false,
            in_band_ring: false,
            voice_recognition: VoiceRecognitionState::Stopped,
            indicators: AgIndicators::default(),
        }
    }

    fn has_peer_feature(&self, bit: u32) -> bool {
        self.features.map_or(false, |f| f.has_peer(bit))
    }

    fn set_codec(&mut self, codec: ScoCodec) {
        self.wideband = codec == ScoCodec::Msbc;
        self.super_wideband = codec == ScoCodec::Lc3;
    }

    fn clear_codec(&mut self) {
        self.wideband = false;
        self.super_wideband = false;
    }
}

pub struct HeadsetClientStateMachine {
    config: Config,
    native: Arc<dyn NativeInterface>,
    dispatcher: Arc<dyn EventDispatcher>,
    policies: Arc<dyn ConnectionPolicyStore>,
    looper: Looper<Message, State>,
    state: State,
    previous: Option<State>,
    pending_transition: Option<State>,
    session: Option<DeviceSession>,
    audio_route_allowed: bool,
    local_policy: AudioPolicy,
    finished: bool,
}

impl HeadsetClientStateMachine {
    pub fn new(
        config: Config,
        native: Arc<dyn NativeInterface>,
        dispatcher: Arc<dyn EventDispatcher>,
        policies: Arc<dyn ConnectionPolicyStore>,
    ) -> Self {
        let looper = Looper::new(config.looper.max_requeue);
        let audio_route_allowed = config.audio.initial_audio_route_allowed;
        let local_policy = config.audio.default_policy;
        Self {
            config,
            native,
            dispatcher,
            policies,
            looper,
            state: State::Disconnected,
            previous: None,
            pending_transition: None,
            session: None,
            audio_route_allowed,
            local_policy,
            finished: false,
        }
    }

    // ----- driving -----------------------------------------------------

    pub fn post(&mut self, message: Message) {
        self.looper.post(message);
    }

    /// Process queued messages until the queue is empty.
    pub fn dispatch_all(&mut self) {
        while let Some(envelope) = self.looper.next() {
            self.process(envelope);
        }
    }

    /// Post one message and run the queue dry.
    pub fn handle(&mut self, message: Message) {
        self.post(message);
        self.dispatch_all();
    }

    /// Advance virtual time, then process whatever came due.
    pub fn advance_time(&mut self, by: Duration) {
        self.looper.advance(by);
        self.dispatch_all();
    }

    pub fn advance_to(&mut self, now: Duration) {
        self.looper.advance_to(now);
        self.dispatch_all();
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.looper.next_deadline()
    }

    pub fn now(&self) -> Duration {
        self.looper.now()
    }

    fn process(&mut self, envelope: Envelope<Message>) {
        debug!(state = self.state.as_str(), "processing {}", envelope.message.as_str());

        let disposition = match &envelope.message {
            Message::SetAudioPolicy(policy) => {
                self.set_audio_policy(*policy);
                Disposition::Handled
            }
            Message::SetAudioRouteAllowed(allowed) => {
                self.set_audio_route_allowed(*allowed);
                Disposition::Handled
            }
            message => match self.state {
                State::Disconnected => self.process_disconnected(message),
                State::Connecting => self.process_connecting(message),
                State::Connected => self.process_connected(message),
                State::AudioOn => match self.process_audio_on(message) {
                    Disposition::NotHandled => self.process_connected(message),
                    other => other,
                },
            },
        };

        match disposition {
            Disposition::Deferred => {
                debug!(state = self.state.as_str(), "deferring {}", envelope.message.as_str());
                self.looper.defer(envelope);
            }
            Disposition::NotHandled => {
                debug!(state = self.state.as_str(), "unhandled {}", envelope.message.as_str());
            }
            Disposition::Handled => {}
        }

        if let Some(next) = self.pending_transition.take() {
            self.perform_transition(next);
        }
    }

    fn transition_to(&mut self, next: State) {
        self.pending_transition = Some(next);
    }

    fn perform_transition(&mut self, next: State) {
        let from = self.state;
        if from == next {
            return;
        }
        info!(
            peer = ?self.session.as_ref().map(|s| s.device),
            "{} -> {}",
            from.as_str(),
            next.as_str()
        );

        let cancelled = self.looper.cancel_where(|_, owner| !next.within(owner));
        if cancelled > 0 {
            debug!("cancelled {} timer(s) owned by {}", cancelled, from.as_str());
        }

        self.state = next;
        self.previous = Some(from);
        self.looper.requeue_deferred();

        match next {
            State::Disconnected => self.enter_disconnected(from),
            State::Connecting => self.enter_connecting(from),
            State::Connected => self.enter_connected(from),
            State::AudioOn => {}
        }
    }

    fn is_current(&self, device: &DeviceAddress) -> bool {
        self.session.as_ref().map_or(false, |s| s.device == *device)
    }

    // ----- Disconnected ------------------------------------------------

    fn enter_disconnected(&mut self, from: State) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let device = session.device;

        if from == State::AudioOn || session.audio != AudioState::Disconnected {
            self.dispatcher.dispatch(Notification::AudioStateChanged {
                device,
                previous: session.audio,
                state: AudioState::Disconnected,
                wideband: false,
                super_wideband: false,
            });
        }

        let mut ended: Vec<CallChange> = session.calls.clear().into_iter().map(CallChange::Removed).collect();
        if let Some(mut call) = session.outgoing.take() {
            call.state = CallState::Terminated;
            ended.push(CallChange::Removed(call));
        }
        if !ended.is_empty() {
            self.dispatcher.dispatch(Notification::CallsChanged { device, changes: ended });
        }

        self.dispatcher.dispatch(Notification::ConnectionStateChanged {
            device,
            previous: from.profile_state(),
            state: ProfileState::Disconnected,
            ag_features: None,
        });
        self.dispatcher.dispatch(Notification::InBandRingingUpdate { device, enabled: false });
        self.finished = true;
    }

    fn process_disconnected(&mut self, message: &Message) -> Disposition {
        match message {
            Message::Connect(device) => {
                if !self.native.connect(device) {
                    error!(peer = %device, "native connect refused");
                    self.dispatcher.dispatch(Notification::ConnectionStateChanged {
                        device: *device,
                        previous: ProfileState::Connecting,
                        state: ProfileState::Disconnected,
                        ag_features: None,
                    });
                    self.finished = true;
                    return Disposition::Handled;
                }
                self.session = Some(DeviceSession::new(*device));
                self.transition_to(State::Connecting);
                Disposition::Handled
            }
            Message::Stack(event) => match &event.kind {
                StackEventKind::ConnectionStateChanged { state } => match state {
                    LinkState::Connecting | LinkState::Connected => {
                        self.accept_inbound(event.device);
                        Disposition::Handled
                    }
                    LinkState::SlcConnected { .. } => {
                        // Replay the SLC in Connecting once the link is accepted.
                        if self.accept_inbound(event.device) {
                            Disposition::Deferred
                        } else {
                            Disposition::Handled
                        }
                    }
                    LinkState::Disconnected | LinkState::Disconnecting => Disposition::Handled,
                },
                _ => {
                    debug!(peer = %event.device, "ignoring {} while disconnected", event.kind.as_str());
                    Disposition::Handled
                }
            },
            Message::Disconnect(device) => {
                debug!(peer = %device, "already disconnected");
                Disposition::Handled
            }
            _ => Disposition::NotHandled,
        }
    }

    fn accept_inbound(&mut self, device: DeviceAddress) -> bool {
        if self.policies.connection_policy(&device) == ConnectionPolicy::Forbidden {
            info!(peer = %device, "incoming connection rejected by policy");
            self.dispatcher.dispatch(Notification::ConnectionStateChanged {
                device,
                previous: ProfileState::Disconnected,
                state: ProfileState::Disconnected,
                ag_features: None,
            });
            self.finished = true;
            return false;
        }
        info!(peer = %device, "incoming connection");
        self.session = Some(DeviceSession::new(device));
        self.transition_to(State::Connecting);
        true
    }

    // ----- Connecting --------------------------------------------------

    fn enter_connecting(&mut self, from: State) {
        self.finished = false;
        let Some(device) = self.current_device() else {
            return;
        };
        self.looper.post_delayed(
            Message::ConnectingTimeout,
            self.config.connecting_timeout(),
            State::Connecting,
        );
        self.dispatcher.dispatch(Notification::ConnectionStateChanged {
            device,
            previous: from.profile_state(),
            state: ProfileState::Connecting,
            ag_features: None,
        });
    }

    fn process_connecting(&mut self, message: &Message) -> Disposition {
        match message {
            Message::Disconnect(device) => {
                if self.is_current(device) {
                    self.native.disconnect(device);
                    self.transition_to(State::Disconnected);
                }
                Disposition::Handled
            }
            Message::ConnectingTimeout => {
                if let Some(device) = self.current_device() {
                    warn!(peer = %device, "connection timed out");
                    self.native.disconnect(&device);
                }
                self.transition_to(State::Disconnected);
                Disposition::Handled
            }
            Message::OutgoingCallTimeout => Disposition::Handled,
            Message::Stack(event) => {
                if !self.is_current(&event.device) {
                    warn!(peer = %event.device, "{} for unexpected device while connecting", event.kind.as_str());
                    return Disposition::Handled;
                }
                match &event.kind {
                    StackEventKind::ConnectionStateChanged { state } => {
                        match state {
                            LinkState::SlcConnected {
                                peer_features,
                                chld_features,
                            } => self.on_slc_connected(*peer_features, *chld_features),
                            LinkState::Disconnected => {
                                info!(peer = %event.device, "link dropped while connecting");
                                self.transition_to(State::Disconnected);
                            }
                            LinkState::Connecting | LinkState::Connected | LinkState::Disconnecting => {
                                debug!(peer = %event.device, "link state {:?} while connecting", state);
                            }
                        }
                        Disposition::Handled
                    }
                    StackEventKind::CmdResult { code } => {
                        self.on_connecting_cmd_result(*code);
                        Disposition::Handled
                    }
                    StackEventKind::UnknownEvent { raw } => {
                        if self.process_android_slc_command(raw, &event.device) {
                            self.transition_to(State::Connected);
                        } else {
                            debug!(peer = %event.device, "dropping {:?} while connecting", raw);
                        }
                        Disposition::Handled
                    }
                    _ => Disposition::Deferred,
                }
            }
            _ => Disposition::Deferred,
        }
    }

    fn on_slc_connected(&mut self, peer_features: u32, chld_features: u32) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let device = session.device;
        if session.features.is_some() {
            warn!(peer = %device, "duplicate SLC event ignored");
            return;
        }

        let features = NegotiatedFeatures::new(peer_features, chld_features);
        if !features.has_peer(peer_feat::ECS) {
            error!(peer = %device, "AG lacks enhanced call status, dropping link");
            self.native.disconnect(&device);
            return;
        }
        session.features = Some(features);
        info!(
            peer = %device,
            "SLC up, peer features {:#06x}, chld features {:#04x}",
            peer_features,
            chld_features
        );
        self.dispatcher.dispatch(Notification::AgFeatures {
            device,
            features: features.ag_features(),
        });

        if self.native.send_android_at(&device, ANDROID_AT_QUERY) {
            session.queue.push(QueuedAction::QueryAndroidAt);
        } else {
            warn!(peer = %device, "could not send Android AT query");
            session.negotiator.finalize(false);
            self.transition_to(State::Connected);
        }
    }

    fn on_connecting_cmd_result(&mut self, code: CmdResultCode) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.queue.pop() {
            Some(QueuedAction::QueryAndroidAt) => {
                session.negotiator.finalize(code.is_ok());
                self.transition_to(State::Connected);
            }
            Some(other) => {
                debug!("{:?} for {} while connecting", code, other.kind().as_str());
            }
            None => {
                debug!("{:?} with no pending action, ignoring", code);
            }
        }
    }

    /// Handle a `+ANDROID:` line from `device`. Returns false if it is not
    /// one, or the device is not the current peer.
    pub fn process_android_slc_command(&mut self, raw: &str, device: &DeviceAddress) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.device != *device {
            return false;
        }
        let Some(features) = parse_android_features(raw) else {
            return false;
        };
        if session.negotiator.observe(&features) {
            info!(peer = %device, "AG supports sink audio policy");
        } else {
            debug!(peer = %device, "+ANDROID reply without sink audio policy: {:?}", raw);
        }
        true
    }

    // ----- Connected ---------------------------------------------------

    fn enter_connected(&mut self, from: State) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let device = session.device;
        match from {
            State::Connecting => {
                self.dispatcher.dispatch(Notification::ConnectionStateChanged {
                    device,
                    previous: ProfileState::Connecting,
                    state: ProfileState::Connected,
                    ag_features: session.features.map(|f| f.ag_features()),
                });
                self.dispatcher.dispatch(Notification::InBandRingingUpdate { device, enabled: true });
                self.dispatcher.dispatch(Notification::BatteryLevelRequested { device });
                if self.config.audio.force_default_audio_policy {
                    self.set_audio_policy(self.config.audio.default_policy);
                }
            }
            State::AudioOn => {
                if self.config.audio.force_default_audio_policy {
                    self.set_audio_policy(self.config.audio.default_policy);
                }
            }
            State::Disconnected | State::Connected => {}
        }
    }

    fn process_connected(&mut self, message: &Message) -> Disposition {
        match message {
            Message::Connect(device) => {
                if self.is_current(device) {
                    debug!(peer = %device, "already connected");
                } else {
                    warn!(peer = %device, "connect ignored, serving {:?}", self.current_device());
                }
            }
            Message::Disconnect(device) => {
                if self.is_current(device) {
                    self.native.disconnect(device);
                    self.transition_to(State::Disconnected);
                } else {
                    debug!(peer = %device, "disconnect for device not connected");
                }
            }
            Message::ConnectAudio => {
                self.connect_audio();
            }
            Message::DisconnectAudio => {
                self.disconnect_audio();
            }
            Message::VoiceRecognitionStart => {
                self.start_voice_recognition();
            }
            Message::VoiceRecognitionStop => {
                self.stop_voice_recognition();
            }
            Message::SetMicVolume(level) => {
                self.set_mic_volume(*level);
            }
            Message::SetSpeakerVolume(level) => {
                self.set_speaker_volume(*level);
            }
            Message::Dial(number) => {
                self.dial(number);
            }
            Message::AcceptCall(flag) => {
                self.accept_call(*flag);
            }
            Message::RejectCall => {
                self.reject_call();
            }
            Message::HoldCall => {
                self.hold_call();
            }
            Message::TerminateCall => {
                self.terminate_call();
            }
            Message::EnterPrivateMode(index) => {
                self.enter_private_mode(*index);
            }
            Message::ExplicitCallTransfer => {
                self.explicit_call_transfer();
            }
            Message::SendDtmf(code) => {
                self.send_dtmf(*code);
            }
            Message::DisableNrec => {
                self.disable_nrec();
            }
            Message::SendVendorAtCommand { vendor_id, command } => {
                self.send_vendor_at_command(*vendor_id, command);
            }
            Message::SendBiev { indicator_id, value } => {
                self.send_biev(*indicator_id, *value);
            }
            Message::QueryCurrentCalls => {
                self.query_current_calls();
            }
            Message::QueryOperatorName => {
                self.query_operator_name();
            }
            Message::SubscriberInfo => {
                self.retrieve_subscriber_info();
            }
            Message::OutgoingCallTimeout => self.expire_outgoing_call(),
            Message::ConnectingTimeout => debug!("stale connecting timeout"),
            Message::SetAudioPolicy(_) | Message::SetAudioRouteAllowed(_) => {}
            Message::Stack(event) => {
                if !self.is_current(&event.device) {
                    warn!(peer = %event.device, "{} for unexpected device", event.kind.as_str());
                } else {
                    self.process_connected_event(event);
                }
            }
        }
        Disposition::Handled
    }

    fn process_connected_event(&mut self, event: &StackEvent) {
        let device = event.device;
        match &event.kind {
            StackEventKind::ConnectionStateChanged { state } => match state {
                LinkState::Disconnected => {
                    info!(peer = %device, "link disconnected");
                    self.transition_to(State::Disconnected);
                }
                other => debug!(peer = %device, "link state {:?} while connected", other),
            },
            StackEventKind::AudioStateChanged { state } => self.on_audio_state_connected(*state),
            StackEventKind::VoiceRecognitionChanged { active } => {
                let state = if *active {
                    VoiceRecognitionState::Started
                } else {
                    VoiceRecognitionState::Stopped
                };
                self.with_session(|s| s.voice_recognition = state);
                self.ag_event(AgEvent::VoiceRecognition { state });
            }
            StackEventKind::NetworkState { available } => {
                self.with_session(|s| s.indicators.network_available = Some(*available));
                self.ag_event(AgEvent::NetworkState { available: *available });
            }
            StackEventKind::RoamingState { roaming } => {
                self.with_session(|s| s.indicators.roaming = Some(*roaming));
                self.ag_event(AgEvent::Roaming { roaming: *roaming });
            }
            StackEventKind::SignalStrength { level } => {
                self.with_session(|s| s.indicators.signal_strength = Some(*level));
                self.ag_event(AgEvent::SignalStrength { level: *level });
            }
            StackEventKind::BatteryLevel { level } => {
                self.with_session(|s| s.indicators.battery_level = Some(*level));
                self.ag_event(AgEvent::BatteryLevel { level: *level });
            }
            StackEventKind::OperatorName { name } => {
                self.with_session(|s| s.indicators.operator_name = Some(name.clone()));
                self.ag_event(AgEvent::OperatorName { name: name.clone() });
            }
            StackEventKind::SubscriberInfo { number, .. } => {
                self.with_session(|s| s.indicators.subscriber_number = Some(number.clone()));
                self.ag_event(AgEvent::SubscriberInfo { number: number.clone() });
            }
            StackEventKind::VolumeChanged { kind, level } => {
                let level = (*level).min(MAX_VOLUME);
                match kind {
                    VolumeKind::Speaker => {
                        self.with_session(|s| s.indicators.speaker_volume = Some(level));
                        self.ag_event(AgEvent::SpeakerVolume { level });
                    }
                    VolumeKind::Mic => {
                        self.with_session(|s| s.indicators.mic_volume = Some(level));
                        self.ag_event(AgEvent::MicVolume { level });
                    }
                }
            }
            StackEventKind::InBandRingtone { enabled } => {
                self.with_session(|s| s.in_band_ring = *enabled);
                self.ag_event(AgEvent::InBandRing { enabled: *enabled });
            }
            StackEventKind::CallStatus { .. } | StackEventKind::Clip { .. } | StackEventKind::CallWaiting { .. } => {
                self.query_current_calls();
            }
            StackEventKind::RingIndication => {
                self.ag_event(AgEvent::Ring);
                self.query_current_calls();
            }
            StackEventKind::CurrentCall {
                index,
                direction,
                state,
                multiparty,
                number,
            } => {
                let fields = CallFields {
                    direction: *direction,
                    state: *state,
                    number: number.clone(),
                    multiparty: *multiparty,
                };
                self.with_session(|s| {
                    s.call_sync.insert(*index, fields);
                });
            }
            StackEventKind::CmdResult { code } => self.on_connected_cmd_result(*code),
            StackEventKind::UnknownEvent { raw } => self.on_unknown_event(raw),
        }
    }

    fn on_audio_state_connected(&mut self, state: AudioLinkState) {
        let audio_route_allowed = self.audio_route_allowed;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let device = session.device;
        let previous = session.audio;
        match state {
            AudioLinkState::Connected { codec } => {
                if !audio_route_allowed {
                    info!(peer = %device, "audio route not allowed, refusing SCO");
                    self.native.disconnect_audio(&device);
                    return;
                }
                session.set_codec(codec);
                session.audio = AudioState::Connected;
                self.dispatcher.dispatch(Notification::AudioStateChanged {
                    device,
                    previous,
                    state: AudioState::Connected,
                    wideband: session.wideband,
                    super_wideband: session.super_wideband,
                });
                self.transition_to(State::AudioOn);
            }
            AudioLinkState::Connecting => {
                session.audio = AudioState::Connecting;
                self.dispatcher.dispatch(Notification::AudioStateChanged {
                    device,
                    previous,
                    state: AudioState::Connecting,
                    wideband: false,
                    super_wideband: false,
                });
            }
            AudioLinkState::Disconnected => {
                session.clear_codec();
                if previous != AudioState::Disconnected {
                    session.audio = AudioState::Disconnected;
                    self.dispatcher.dispatch(Notification::AudioStateChanged {
                        device,
                        previous,
                        state: AudioState::Disconnected,
                        wideband: false,
                        super_wideband: false,
                    });
                }
            }
        }
    }

    fn on_connected_cmd_result(&mut self, code: CmdResultCode) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let device = session.device;
        let Some(action) = session.queue.pop() else {
            debug!(peer = %device, "{:?} with no pending action, ignoring", code);
            return;
        };
        debug!(peer = %device, "{:?} for {}", code, action.kind().as_str());
        let ok = code.is_ok();

        match action {
            QueuedAction::QueryAndroidAt => {
                session.negotiator.finalize(ok);
            }
            QueuedAction::SetAudioPolicy(policy) => {
                if ok {
                    session.negotiator.confirm(policy);
                } else {
                    warn!(peer = %device, "AG rejected sink audio policy: {:?}", code);
                }
            }
            QueuedAction::QueryCurrentCalls => {
                if ok {
                    self.query_calls_done();
                } else {
                    warn!(peer = %device, "call list query failed: {:?}", code);
                    session.call_sync.clear();
                    self.schedule_call_poll();
                }
            }
            QueuedAction::VoiceRecognitionStart | QueuedAction::VoiceRecognitionStop => {
                if ok {
                    let state = if action.kind() == ActionKind::VoiceRecognitionStart {
                        VoiceRecognitionState::Started
                    } else {
                        VoiceRecognitionState::Stopped
                    };
                    session.voice_recognition = state;
                    self.ag_event(AgEvent::VoiceRecognition { state });
                } else {
                    warn!(peer = %device, "{} failed: {:?}", action.kind().as_str(), code);
                }
            }
            QueuedAction::Dial { number } => {
                if ok {
                    self.query_current_calls();
                } else {
                    warn!(peer = %device, "dial {} failed: {:?}", number, code);
                    self.terminate_outgoing_call();
                }
            }
            QueuedAction::AcceptCall(_)
            | QueuedAction::RejectCall(_)
            | QueuedAction::HoldCall(_)
            | QueuedAction::TerminateCall(_)
            | QueuedAction::EnterPrivateMode(_)
            | QueuedAction::ExplicitCallTransfer => {
                if ok {
                    self.query_current_calls();
                } else {
                    warn!(peer = %device, "{} failed: {:?}", action.kind().as_str(), code);
                }
            }
            other => {
                if !ok {
                    warn!(peer = %device, "{} failed: {:?}", other.kind().as_str(), code);
                }
            }
        }
    }

    fn on_unknown_event(&mut self, raw: &str) {
        let Some(device) = self.current_device() else {
            return;
        };
        match parse_unsolicited(raw) {
            UnsolicitedResponse::Android(_) => {
                self.process_android_slc_command(raw, &device);
            }
            UnsolicitedResponse::Vendor(event) => {
                debug!(peer = %device, "vendor event {}", event.event_code);
                self.dispatcher.dispatch(Notification::VendorEvent { device, event });
            }
            UnsolicitedResponse::Unrecognized => {
                debug!(peer = %device, "dropping unrecognized event {:?}", raw);
            }
        }
    }

    // ----- AudioOn -----------------------------------------------------

    fn process_audio_on(&mut self, message: &Message) -> Disposition {
        match message {
            Message::Disconnect(device) if self.is_current(device) => {
                // Tear audio down first; Connected finishes the disconnect.
                self.native.disconnect_audio(device);
                Disposition::Deferred
            }
            Message::Stack(event) if self.is_current(&event.device) => match &event.kind {
                StackEventKind::ConnectionStateChanged {
                    state: LinkState::Disconnected,
                } => {
                    info!(peer = %event.device, "link disconnected with audio on");
                    self.transition_to(State::Disconnected);
                    Disposition::Handled
                }
                StackEventKind::AudioStateChanged { state } => {
                    self.on_audio_state_audio_on(*state);
                    Disposition::Handled
                }
                _ => Disposition::NotHandled,
            },
            _ => Disposition::NotHandled,
        }
    }

    fn on_audio_state_audio_on(&mut self, state: AudioLinkState) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let device = session.device;
        match state {
            AudioLinkState::Disconnected => {
                session.audio = AudioState::Disconnected;
                session.clear_codec();
                self.dispatcher.dispatch(Notification::AudioStateChanged {
                    device,
                    previous: AudioState::Connected,
                    state: AudioState::Disconnected,
                    wideband: false,
                    super_wideband: false,
                });
                self.transition_to(State::Connected);
            }
            AudioLinkState::Connected { codec } => {
                debug!(peer = %device, "codec now {:?}", codec);
                session.set_codec(codec);
            }
            AudioLinkState::Connecting => {
                debug!(peer = %device, "audio connecting while audio on");
            }
        }
    }

    // ----- calls -------------------------------------------------------

    fn query_calls_done(&mut self) {
        let now = self.looper.now();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let device = session.device;
        let snapshot = std::mem::take(&mut session.call_sync);
        let mut changes = session.calls.apply_snapshot(snapshot, session.in_band_ring, now);

        if let Some(placeholder) = session.outgoing.take() {
            let listed = changes
                .iter()
                .position(|c| matches!(c, CallChange::Added(call) if call.direction == CallDirection::Outgoing));
            match listed {
                Some(pos) => {
                    let index = changes[pos].call().index;
                    if let Some(call) = session.calls.get_mut(index) {
                        call.id = placeholder.id;
                        changes[pos] = CallChange::Updated(call.clone());
                    }
                    self.looper
                        .cancel_where(|m, _| matches!(m, Message::OutgoingCallTimeout));
                }
                None => session.outgoing = Some(placeholder),
            }
        }

        if !changes.is_empty() {
            debug!(peer = %device, "{} call change(s)", changes.len());
            self.dispatcher.dispatch(Notification::CallsChanged { device, changes });
        }
        self.schedule_call_poll();
    }

    fn schedule_call_poll(&mut self) {
        self.looper
            .cancel_where(|m, _| matches!(m, Message::QueryCurrentCalls));
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let calls_present = !session.calls.is_empty() || session.outgoing.is_some();
        if self.config.calls.clcc_poll_during_call && calls_present {
            self.looper.post_delayed(
                Message::QueryCurrentCalls,
                self.config.clcc_poll_interval(),
                State::Connected,
            );
        }
    }

    fn terminate_outgoing_call(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let device = session.device;
        if let Some(mut call) = session.outgoing.take() {
            call.state = CallState::Terminated;
            self.dispatcher.dispatch(Notification::CallsChanged {
                device,
                changes: vec![CallChange::Removed(call)],
            });
        }
        self.looper
            .cancel_where(|m, _| matches!(m, Message::OutgoingCallTimeout));
    }

    fn expire_outgoing_call(&mut self) {
        if self.session.as_ref().map_or(false, |s| s.outgoing.is_some()) {
            warn!("dialled call never listed by the AG, dropping it");
            self.terminate_outgoing_call();
        }
    }

    /// Send a command and, if the transport accepted it, queue `action`.
    fn send_queued(
        &mut self,
        action: QueuedAction,
        send: impl FnOnce(&dyn NativeInterface, &DeviceAddress) -> bool,
    ) -> bool {
        let kind = action.kind();
        let Some(session) = self.session.as_mut() else {
            debug!("{} without a connected device", kind.as_str());
            return false;
        };
        if session.queue.contains(kind) {
            warn!(peer = %session.device, "{} already in flight", kind.as_str());
            return false;
        }
        if !send(self.native.as_ref(), &session.device) {
            warn!(peer = %session.device, "native layer refused {}", kind.as_str());
            return false;
        }
        session.queue.push(action)
    }

    /// Query the AG's call list unless a query is already outstanding.
    pub fn query_current_calls(&mut self) -> bool {
        if self
            .session
            .as_ref()
            .map_or(false, |s| s.queue.contains(ActionKind::QueryCurrentCalls))
        {
            debug!("call list query already in flight");
            return false;
        }
        self.send_queued(QueuedAction::QueryCurrentCalls, |native, device| {
            native.query_current_calls(device)
        })
    }

    pub fn dial(&mut self, number: &str) -> bool {
        if self.session.as_ref().map_or(true, |s| s.outgoing.is_some()) {
            warn!("dial refused, no session or a dial is pending");
            return false;
        }
        let sent = self.send_queued(
            QueuedAction::Dial {
                number: number.to_string(),
            },
            |native, device| native.dial(device, number),
        );
        if !sent {
            return false;
        }

        let now = self.looper.now();
        let fields = CallFields {
            direction: CallDirection::Outgoing,
            state: CallState::Dialing,
            number: number.to_string(),
            multiparty: false,
        };
        let call = Call::new(0, fields, false, now);
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        session.outgoing = Some(call.clone());
        self.dispatcher.dispatch(Notification::CallsChanged {
            device: session.device,
            changes: vec![CallChange::Added(call)],
        });
        self.looper.post_delayed(
            Message::OutgoingCallTimeout,
            self.config.outgoing_timeout(),
            State::Connected,
        );
        true
    }

    pub fn accept_call(&mut self, flag: AcceptFlag) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        let calls = &session.calls;
        let Some(call) = calls
            .first_matching(&[CallState::Incoming, CallState::Waiting])
            .or_else(|| calls.first_matching(&[CallState::Held]))
        else {
            debug!("no call to accept");
            return false;
        };

        let action = match (call.state, flag) {
            (CallState::Incoming, AcceptFlag::None) => CallAction::Ata,
            (CallState::Incoming, _) => return false,
            (CallState::Waiting, flag) if calls.count_in_state(CallState::Active) == 0 => {
                if flag != AcceptFlag::None {
                    return false;
                }
                CallAction::Ata
            }
            (CallState::Waiting, AcceptFlag::Hold) | (CallState::Held, AcceptFlag::Hold) => CallAction::Chld2,
            (CallState::Waiting, AcceptFlag::Terminate) | (CallState::Held, AcceptFlag::Terminate) => {
                CallAction::Chld1
            }
            (CallState::Held, AcceptFlag::None) => {
                if calls.count_in_state(CallState::Active) > 0 {
                    if !session.features.map_or(false, |f| f.has_chld(chld_feat::MERGE)) {
                        debug!("AG cannot merge the held call");
                        return false;
                    }
                    CallAction::Chld3
                } else {
                    CallAction::Chld2
                }
            }
            _ => return false,
        };

        self.send_queued(QueuedAction::AcceptCall(action), |native, device| {
            native.handle_call_action(device, action, -1)
        })
    }

    pub fn reject_call(&mut self) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        let action = match session
            .calls
            .first_matching(&[CallState::Incoming, CallState::Waiting, CallState::Held])
            .map(|c| c.state)
        {
            Some(CallState::Incoming) => CallAction::Chup,
            Some(CallState::Waiting) | Some(CallState::Held) => CallAction::Chld0,
            _ => {
                debug!("no call to reject");
                return false;
            }
        };
        self.send_queued(QueuedAction::RejectCall(action), |native, device| {
            native.handle_call_action(device, action, -1)
        })
    }

    pub fn hold_call(&mut self) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        let action = if session.calls.first_matching(&[CallState::Incoming]).is_some() {
            CallAction::Btrh0
        } else if session.calls.first_matching(&[CallState::Active]).is_some() {
            CallAction::Chld2
        } else {
            debug!("no call to hold");
            return false;
        };
        self.send_queued(QueuedAction::HoldCall(action), |native, device| {
            native.handle_call_action(device, action, 0)
        })
    }

    pub fn terminate_call(&mut self) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        let has_call = session
            .calls
            .first_matching(&[
                CallState::Dialing,
                CallState::Alerting,
                CallState::Active,
                CallState::Held,
            ])
            .is_some()
            || session.outgoing.is_some();
        if !has_call {
            debug!("no call to terminate");
            return false;
        }
        let action = CallAction::Chup;
        self.send_queued(QueuedAction::TerminateCall(action), |native, device| {
            native.handle_call_action(device, action, -1)
        })
    }

    /// Split the active multiparty call at `index` off into a private call.
    pub fn enter_private_mode(&mut self, index: u32) -> bool {
        let Some(call) = self.session.as_ref().and_then(|s| s.calls.get(index)).cloned() else {
            debug!("no call {} for private mode", index);
            return false;
        };
        if call.state != CallState::Active || !call.multiparty {
            debug!("call {} is not an active multiparty call", index);
            return false;
        }
        let Ok(wire_index) = i32::try_from(index) else {
            return false;
        };
        self.send_queued(QueuedAction::EnterPrivateMode(call), |native, device| {
            native.handle_call_action(device, CallAction::Chld2x, wire_index)
        })
    }

    /// Connect the two calls and leave the conversation.
    pub fn explicit_call_transfer(&mut self) -> bool {
        if self.session.as_ref().map_or(0, |s| s.calls.len()) < 2 {
            debug!("explicit call transfer needs two calls");
            return false;
        }
        self.send_queued(QueuedAction::ExplicitCallTransfer, |native, device| {
            native.handle_call_action(device, CallAction::Chld4, -1)
        })
    }

    // ----- other commands ----------------------------------------------

    pub fn connect_audio(&mut self) -> bool {
        let Some(device) = self.current_device() else {
            return false;
        };
        if !self.native.connect_audio(&device) {
            error!(peer = %device, "native layer refused audio connect");
            return false;
        }
        true
    }

    pub fn disconnect_audio(&mut self) -> bool {
        let Some(device) = self.current_device() else {
            return false;
        };
        if !self.native.disconnect_audio(&device) {
            error!(peer = %device, "native layer refused audio disconnect");
            return false;
        }
        true
    }

    pub fn start_voice_recognition(&mut self) -> bool {
        if self.voice_recognition_state() == Some(VoiceRecognitionState::Started) {
            debug!("voice recognition already started");
            return false;
        }
        self.send_queued(QueuedAction::VoiceRecognitionStart, |native, device| {
            native.start_voice_recognition(device)
        })
    }

    pub fn stop_voice_recognition(&mut self) -> bool {
        if self.voice_recognition_state() == Some(VoiceRecognitionState::Stopped) {
            debug!("voice recognition not running");
            return false;
        }
        self.send_queued(QueuedAction::VoiceRecognitionStop, |native, device| {
            native.stop_voice_recognition(device)
        })
    }

    pub fn set_volume(&mut self, kind: VolumeKind, level: u8) -> bool {
        let level = level.min(MAX_VOLUME);
        let sent = self.send_queued(QueuedAction::SetVolume(kind), |native, device| {
            native.set_volume(device, kind, level)
        });
        if sent {
            self.with_session(|s| match kind {
                VolumeKind::Speaker => s.indicators.speaker_volume = Some(level),
                VolumeKind::Mic => s.indicators.mic_volume = Some(level),
            });
        }
        sent
    }

    pub fn set_speaker_volume(&mut self, level: u8) -> bool {
        self.set_volume(VolumeKind::Speaker, level)
    }

    pub fn set_mic_volume(&mut self, level: u8) -> bool {
        self.set_volume(VolumeKind::Mic, level)
    }

    pub fn send_dtmf(&mut self, code: u8) -> bool {
        self.send_queued(QueuedAction::SendDtmf(code), |native, device| native.send_dtmf(device, code))
    }

    pub fn disable_nrec(&mut self) -> bool {
        if !self.session.as_ref().map_or(false, |s| s.has_peer_feature(peer_feat::ECNR)) {
            debug!("AG has no echo cancellation to disable");
            return false;
        }
        self.send_queued(QueuedAction::DisableNrec, |native, device| {
            native.send_at_cmd(device, AtCommand::Nrec, 0, 0, None)
        })
    }

    /// Report an HF indicator value with `+BIEV`.
    pub fn send_biev(&mut self, indicator_id: u16, value: i32) -> bool {
        if !self.session.as_ref().map_or(false, |s| s.has_peer_feature(peer_feat::HF_IND)) {
            debug!("AG does not support HF indicators");
            return false;
        }
        self.send_queued(QueuedAction::Biev { indicator_id, value }, |native, device| {
            native.send_at_cmd(device, AtCommand::Biev, i32::from(indicator_id), value, None)
        })
    }

    pub fn send_vendor_at_command(&mut self, vendor_id: u16, command: &str) -> bool {
        if let Err(e) = vendor::validate_command(vendor_id, command) {
            warn!("{}", e);
            return false;
        }
        self.send_queued(
            QueuedAction::VendorAtCommand {
                vendor_id,
                command: command.to_string(),
            },
            |native, device| native.send_at_cmd(device, AtCommand::VendorSpecific, 0, 0, Some(command)),
        )
    }

    pub fn query_operator_name(&mut self) -> bool {
        self.send_queued(QueuedAction::QueryOperatorName, |native, device| {
            native.query_operator_name(device)
        })
    }

    pub fn retrieve_subscriber_info(&mut self) -> bool {
        self.send_queued(QueuedAction::SubscriberInfo, |native, device| {
            native.retrieve_subscriber_info(device)
        })
    }

    // ----- audio policy ------------------------------------------------

    /// Push a sink audio policy to the AG. Silently returns false while the
    /// AG is not known to support it.
    pub fn set_audio_policy(&mut self, policy: AudioPolicy) -> bool {
        self.local_policy = policy;
        let Some(session) = self.session.as_mut() else {
            debug!("audio policy stored, no connected device");
            return false;
        };
        let Some(command) = session.negotiator.encode_push(&policy) else {
            debug!(
                peer = %session.device,
                "audio policy not sent, remote support {:?}",
                session.negotiator.remote_support()
            );
            return false;
        };
        if session.queue.contains(ActionKind::SetAudioPolicy) {
            warn!(peer = %session.device, "audio policy push already in flight");
            return false;
        }
        if !self.native.send_android_at(&session.device, &command) {
            warn!(peer = %session.device, "could not send {}", command);
            return false;
        }
        session.queue.push(QueuedAction::SetAudioPolicy(policy))
    }

    /// Allow or forbid routing call audio to this device.
    pub fn set_audio_route_allowed(&mut self, allowed: bool) -> bool {
        self.audio_route_allowed = allowed;
        let mut policy = self.local_policy;
        policy.call_establish = PolicyValue::from_allowed(allowed);
        if self.config.audio.force_default_audio_policy {
            let default = self.config.audio.default_policy;
            policy.active_device_after_connection = default.active_device_after_connection;
            policy.in_band_ringtone = default.in_band_ringtone;
        }
        self.set_audio_policy(policy)
    }

    /// Override the negotiated support state.
    pub fn set_audio_policy_remote_supported(&mut self, supported: bool) {
        self.with_session(|s| s.negotiator.set_remote_supported(supported));
    }

    // ----- helpers -----------------------------------------------------

    fn with_session(&mut self, f: impl FnOnce(&mut DeviceSession)) {
        if let Some(session) = self.session.as_mut() {
            f(session);
        }
    }

    fn ag_event(&self, event: AgEvent) {
        if let Some(device) = self.current_device() {
            self.dispatcher.dispatch(Notification::AgEvent { device, event });
        }
    }

    fn voice_recognition_state(&self) -> Option<VoiceRecognitionState> {
        self.session.as_ref().map(|s| s.voice_recognition)
    }

    // ----- introspection -----------------------------------------------

    pub fn state(&self) -> State {
        self.state
    }

    pub fn previous_state(&self) -> Option<State> {
        self.previous
    }

    pub fn current_device(&self) -> Option<DeviceAddress> {
        self.session.as_ref().map(|s| s.device)
    }

    pub fn connection_state(&self, device: &DeviceAddress) -> ProfileState {
        if self.is_current(device) {
            self.state.profile_state()
        } else {
            ProfileState::Disconnected
        }
    }

    pub fn audio_state(&self, device: &DeviceAddress) -> AudioState {
        match self.session.as_ref() {
            Some(session) if session.device == *device => session.audio,
            _ => AudioState::Disconnected,
        }
    }

    /// Calls in index order, followed by a pending dialled call.
    pub fn current_calls(&self) -> Vec<Call> {
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };
        let mut calls = session.calls.list();
        calls.extend(session.outgoing.clone());
        calls
    }

    pub fn calls_in_state(&self, state: CallState) -> usize {
        self.session.as_ref().map_or(0, |s| s.calls.count_in_state(state))
    }

    pub fn call_matching(&self, states: &[CallState]) -> Option<Call> {
        self.session
            .as_ref()
            .and_then(|s| s.calls.first_matching(states))
            .cloned()
    }

    pub fn current_ag_features(&self) -> Option<AgFeatures> {
        self.session.as_ref().and_then(|s| s.features).map(|f| f.ag_features())
    }

    pub fn current_ag_events(&self) -> Option<AgIndicators> {
        self.session.as_ref().map(|s| s.indicators.clone())
    }

    pub fn audio_policy_remote_support(&self) -> RemoteSupport {
        self.session
            .as_ref()
            .map_or(RemoteSupport::Unknown, |s| s.negotiator.remote_support())
    }

    pub fn confirmed_audio_policy(&self) -> Option<AudioPolicy> {
        self.session.as_ref().and_then(|s| s.negotiator.confirmed())
    }

    pub fn local_audio_policy(&self) -> AudioPolicy {
        self.local_policy
    }

    pub fn audio_route_allowed(&self) -> bool {
        self.audio_route_allowed
    }

    pub fn in_band_ring(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.in_band_ring)
    }

    pub fn is_wideband(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.wideband)
    }

    pub fn is_super_wideband(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.super_wideband)
    }

    pub fn voice_recognition(&self) -> VoiceRecognitionState {
        self.voice_recognition_state().unwrap_or_default()
    }

    pub fn queued_actions(&self) -> Vec<QueuedAction> {
        self.session
            .as_ref()
            .map(|s| s.queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_deferred(&self, pred: impl Fn(&Message) -> bool) -> bool {
        self.looper.has_deferred(pred)
    }

    pub fn pending_timers(&self, pred: impl Fn(&Message) -> bool) -> usize {
        self.looper.pending_timers(pred)
    }

    /// Back in Disconnected after a connection attempt, with nothing queued.
    pub fn is_finished(&self) -> bool {
        self.finished && self.state == State::Disconnected && self.looper.is_idle()
    }

    /// Human-readable state summary.
    pub fn dump(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "HeadsetClientStateMachine")?;
        writeln!(out, "  state: {}", self.state.as_str())?;
        if let Some(previous) = self.previous {
            writeln!(out, "  previous: {}", previous.as_str())?;
        }
        writeln!(out, "  audio route allowed: {}", self.audio_route_allowed)?;
        writeln!(out, "  local audio policy: {:?}", self.local_policy)?;
        writeln!(out, "  deferred: {}", self.looper.deferred_len())?;
        let Some(session) = self.session.as_ref() else {
            return writeln!(out, "  no device");
        };
        writeln!(out, "  device: {}", session.device)?;
        if let Some(features) = session.features {
            writeln!(
                out,
                "  features: peer {:#06x} chld {:#04x}",
                features.peer_bits(),
                features.chld_bits()
            )?;
        }
        writeln!(
            out,
            "  audio: {:?} wbs={} swb={}",
            session.audio, session.wideband, session.super_wideband
        )?;
        writeln!(out, "  android at: {:?}", session.negotiator.remote_support())?;
        writeln!(out, "  in-band ring: {}", session.in_band_ring)?;
        writeln!(out, "  voice recognition: {:?}", session.voice_recognition)?;
        writeln!(out, "  indicators: {:?}", session.indicators)?;
        for action in session.queue.iter() {
            writeln!(out, "  queued: {}", action.kind().as_str())?;
        }
        for call in session.calls.list().iter().chain(session.outgoing.iter()) {
            writeln!(
                out,
                "  call {} {:?} {} {} mpty={} inband={}",
                call.index,
                call.direction,
                call.state.as_str(),
                call.number,
                call.multiparty,
                call.in_band_ring
            )?;
        }
        Ok(())
    }
}
