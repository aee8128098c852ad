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

//! Transport abstraction towards the Bluetooth stack.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use super::address::DeviceAddress;
use super::codec::VolumeKind;
use super::constants::{AtCommand, CallAction};

/// Outbound half of the native stack.
///
/// Every method only reports whether the request was accepted for
/// transmission. The AG's answer arrives later as a stack event.
pub trait NativeInterface: Send + Sync {
    fn connect(&self, device: &DeviceAddress) -> bool;

    fn disconnect(&self, device: &DeviceAddress) -> bool;

    fn connect_audio(&self, device: &DeviceAddress) -> bool;

    fn disconnect_audio(&self, device: &DeviceAddress) -> bool;

    fn start_voice_recognition(&self, device: &DeviceAddress) -> bool;

    fn stop_voice_recognition(&self, device: &DeviceAddress) -> bool;

    fn set_volume(&self, device: &DeviceAddress, kind: VolumeKind, level: u8) -> bool;

    fn dial(&self, device: &DeviceAddress, number: &str) -> bool;

    /// `index` is only meaningful for CHLD=1x / CHLD=2x; hold passes 0,
    /// other actions -1.
    fn handle_call_action(&self, device: &DeviceAddress, action: CallAction, index: i32) -> bool;

    fn query_current_calls(&self, device: &DeviceAddress) -> bool;

    fn query_operator_name(&self, device: &DeviceAddress) -> bool;

    fn retrieve_subscriber_info(&self, device: &DeviceAddress) -> bool;

    fn send_dtmf(&self, device: &DeviceAddress, code: u8) -> bool;

    /// Structured AT command: code, two integer arguments and an optional
    /// string argument.
    fn send_at_cmd(
        &self,
        device: &DeviceAddress,
        command: AtCommand,
        arg1: i32,
        arg2: i32,
        arg: Option<&str>,
    ) -> bool;

    /// Raw `+ANDROID` command string.
    fn send_android_at(&self, device: &DeviceAddress, command: &str) -> bool;
}

/// A request recorded by [`StubTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeCall {
    Connect(DeviceAddress),
    Disconnect(DeviceAddress),
    ConnectAudio(DeviceAddress),
    DisconnectAudio(DeviceAddress),
    StartVoiceRecognition(DeviceAddress),
    StopVoiceRecognition(DeviceAddress),
    SetVolume { device: DeviceAddress, kind: VolumeKind, level: u8 },
    Dial { device: DeviceAddress, number: String },
    CallAction { device: DeviceAddress, action: CallAction, index: i32 },
    QueryCurrentCalls(DeviceAddress),
    QueryOperatorName(DeviceAddress),
    RetrieveSubscriberInfo(DeviceAddress),
    SendDtmf { device: DeviceAddress, code: u8 },
    SendAtCmd {
        device: DeviceAddress,
        command: AtCommand,
        arg1: i32,
        arg2: i32,
        arg: Option<String>,
    },
    SendAndroidAt { device: DeviceAddress, command: String },
}

/// Stub transport that logs and records every request.
pub struct StubTransport {
    calls: Mutex<Vec<NativeCall>>,
    recording: bool,
    accept: AtomicBool,
    accept_connect: AtomicBool,
    accept_android_at: AtomicBool,
}

impl Default for StubTransport {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            recording: true,
            accept: AtomicBool::new(true),
            accept_connect: AtomicBool::new(true),
            accept_android_at: AtomicBool::new(true),
        }
    }
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log requests without keeping them, for long-running replays.
    pub fn logging_only() -> Self {
        Self {
            recording: false,
            ..Self::default()
        }
    }

    /// Whether requests other than connect and `+ANDROID` are accepted.
    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn set_connect_accepted(&self, accept: bool) {
        self.accept_connect.store(accept, Ordering::SeqCst);
    }

    pub fn set_android_at_accepted(&self, accept: bool) {
        self.accept_android_at.store(accept, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<NativeCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&NativeCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// Raw `+ANDROID` strings sent so far.
    pub fn android_at_commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                NativeCall::SendAndroidAt { command, .. } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: NativeCall, flag: &AtomicBool) -> bool {
        let accepted = flag.load(Ordering::SeqCst);
        info!("[STUB] {:?} -> {}", call, if accepted { "accepted" } else { "refused" });
        if self.recording {
            self.calls.lock().push(call);
        }
        accepted
    }
}

impl NativeInterface for StubTransport {
    fn connect(&self, device: &DeviceAddress) -> bool {
        self.record(NativeCall::Connect(*device), &self.accept_connect)
    }

    fn disconnect(&self, device: &DeviceAddress) -> bool {
        self.record(NativeCall::Disconnect(*device), &self.accept)
    }

    fn connect_audio(&self, device: &DeviceAddress) -> bool {
        self.record(NativeCall::ConnectAudio(*device), &self.accept)
    }

    fn disconnect_audio(&self, device: &DeviceAddress) -> bool {
        self.record(NativeCall::DisconnectAudio(*device), &self.accept)
    }

    fn start_voice_recognition(&self, device: &DeviceAddress) -> bool {
        self.record(NativeCall::StartVoiceRecognition(*device), &self.accept)
    }

    fn stop_voice_recognition(&self, device: &DeviceAddress) -> bool {
        self.record(NativeCall::StopVoiceRecognition(*device), &self.accept)
    }

    fn set_volume(&self, device: &DeviceAddress, kind: VolumeKind, level: u8) -> bool {
        self.record(
            NativeCall::SetVolume {
                device: *device,
                kind,
                level,
            },
            &self.accept,
        )
    }

    fn dial(&self, device: &DeviceAddress, number: &str) -> bool {
        self.record(
            NativeCall::Dial {
                device: *device,
                number: number.to_string(),
            },
            &self.accept,
        )
    }

    fn handle_call_action(&self, device: &DeviceAddress, action: CallAction, index: i32) -> bool {
        self.record(
            NativeCall::CallAction {
                device: *device,
                action,
                index,
            },
            &self.accept,
        )
    }

    fn query_current_calls(&self, device: &DeviceAddress) -> bool {
        self.record(NativeCall::QueryCurrentCalls(*device), &self.accept)
    }

    fn query_operator_name(&self, device: &DeviceAddress) -> bool {
        self.record(NativeCall::QueryOperatorName(*device), &self.accept)
    }

    fn retrieve_subscriber_info(&self, device: &DeviceAddress) -> bool {
        self.record(NativeCall::RetrieveSubscriberInfo(*device), &self.accept)
    }

    fn send_dtmf(&self, device: &DeviceAddress, code: u8) -> bool {
        self.record(NativeCall::SendDtmf { device: *device, code }, &self.accept)
    }

    fn send_at_cmd(
        &self,
        device: &DeviceAddress,
        command: AtCommand,
        arg1: i32,
        arg2: i32,
        arg: Option<&str>,
    ) -> bool {
        self.record(
            NativeCall::SendAtCmd {
                device: *device,
                command,
                arg1,
                arg2,
                arg: arg.map(str::to_string),
            },
            &self.accept,
        )
    }

    fn send_android_at(&self, device: &DeviceAddress, command: &str) -> bool {
        self.record(
            NativeCall::SendAndroidAt {
                device: *device,
                command: command.to_string(),
            },
            &self.accept_android_at,
        )
    }
}
