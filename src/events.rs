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

//! Outbound notifications and their delivery.

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::hfp::{AgFeatures, CallChange, DeviceAddress, VendorEvent};

/// Profile connection state as seen by the rest of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ProfileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileState::Disconnected => "DISCONNECTED",
            ProfileState::Connecting => "CONNECTING",
            ProfileState::Connected => "CONNECTED",
            ProfileState::Disconnecting => "DISCONNECTING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceRecognitionState {
    #[default]
    Stopped,
    Started,
}

/// AG indicator or setting change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgEvent {
    NetworkState { available: bool },
    Roaming { roaming: bool },
    SignalStrength { level: u8 },
    BatteryLevel { level: u8 },
    OperatorName { name: String },
    SubscriberInfo { number: String },
    InBandRing { enabled: bool },
    VoiceRecognition { state: VoiceRecognitionState },
    SpeakerVolume { level: u8 },
    MicVolume { level: u8 },
    Ring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    ConnectionStateChanged {
        device: DeviceAddress,
        previous: ProfileState,
        state: ProfileState,
        ag_features: Option<AgFeatures>,
    },
    AudioStateChanged {
        device: DeviceAddress,
        previous: AudioState,
        state: AudioState,
        wideband: bool,
        super_wideband: bool,
    },
    /// One per completed call-list sync.
    CallsChanged {
        device: DeviceAddress,
        changes: Vec<CallChange>,
    },
    AgEvent {
        device: DeviceAddress,
        event: AgEvent,
    },
    VendorEvent {
        device: DeviceAddress,
        event: VendorEvent,
    },
    AgFeatures {
        device: DeviceAddress,
        features: AgFeatures,
    },
    /// Tell the in-band ring service whether this peer is usable.
    InBandRingingUpdate {
        device: DeviceAddress,
        enabled: bool,
    },
    /// Ask the battery service to push the current level to the AG.
    BatteryLevelRequested {
        device: DeviceAddress,
    },
}

impl Notification {
    pub fn device(&self) -> DeviceAddress {
        match self {
            Notification::ConnectionStateChanged { device, .. }
            | Notification::AudioStateChanged { device, .. }
            | Notification::CallsChanged { device, .. }
            | Notification::AgEvent { device, .. }
            | Notification::VendorEvent { device, .. }
            | Notification::AgFeatures { device, .. }
            | Notification::InBandRingingUpdate { device, .. }
            | Notification::BatteryLevelRequested { device } => *device,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Notification::ConnectionStateChanged { .. } => "CONNECTION_STATE_CHANGED",
            Notification::AudioStateChanged { .. } => "AUDIO_STATE_CHANGED",
            Notification::CallsChanged { .. } => "CALLS_CHANGED",
            Notification::AgEvent { .. } => "AG_EVENT",
            Notification::VendorEvent { .. } => "VENDOR_EVENT",
            Notification::AgFeatures { .. } => "AG_FEATURES",
            Notification::InBandRingingUpdate { .. } => "IN_BAND_RINGING_UPDATE",
            Notification::BatteryLevelRequested { .. } => "BATTERY_LEVEL_REQUESTED",
        }
    }
}

/// Receives everything a session reports to the surrounding system.
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, notification: Notification);
}

/// Forwards notifications into an unbounded async channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: async_channel::Sender<Notification>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, async_channel::Receiver<Notification>) {
        let (tx, rx) = async_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl EventDispatcher for ChannelDispatcher {
    fn dispatch(&self, notification: Notification) {
        if let Err(e) = self.tx.try_send(notification) {
            warn!("Dropping {} notification: receiver closed", e.into_inner().as_str());
        }
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.notifications.lock())
    }

    pub fn count(&self, pred: impl Fn(&Notification) -> bool) -> usize {
        self.notifications.lock().iter().filter(|n| pred(n)).count()
    }
}

impl EventDispatcher for RecordingDispatcher {
    fn dispatch(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceAddress {
        DeviceAddress::new([0, 1, 2, 3, 4, 5])
    }

    #[test]
    fn test_channel_dispatcher_delivers_in_order() {
        let (dispatcher, rx) = ChannelDispatcher::new();
        dispatcher.dispatch(Notification::BatteryLevelRequested { device: device() });
        dispatcher.dispatch(Notification::InBandRingingUpdate {
            device: device(),
            enabled: true,
        });

        assert_eq!(rx.try_recv().unwrap().as_str(), "BATTERY_LEVEL_REQUESTED");
        assert_eq!(rx.try_recv().unwrap().as_str(), "IN_BAND_RINGING_UPDATE");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_dispatcher_survives_closed_receiver() {
        let (dispatcher, rx) = ChannelDispatcher::new();
        drop(rx);
        dispatcher.dispatch(Notification::BatteryLevelRequested { device: device() });
    }

    #[test]
    fn test_notification_json() {
        let notification = Notification::AgEvent {
            device: device(),
            event: AgEvent::InBandRing { enabled: true },
        };
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["type"], "ag_event");
        assert_eq!(json["device"], "00:01:02:03:04:05");
        assert_eq!(json["event"]["kind"], "in_band_ring");
        assert_eq!(json["event"]["enabled"], true);
    }

    #[test]
    fn test_recording_dispatcher() {
        let recorder = RecordingDispatcher::new();
        recorder.dispatch(Notification::BatteryLevelRequested { device: device() });
        assert_eq!(recorder.count(|n| n.device() == device()), 1);
        assert_eq!(recorder.take().len(), 1);
        assert!(recorder.notifications().is_empty());
    }
}
