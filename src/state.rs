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

//! Session state shared outside the session task.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::events::{AudioState, ProfileState};
use crate::hfp::{AgFeatures, Call, HeadsetClientStateMachine};

/// Snapshot of one session, refreshed after every batch of messages.
#[derive(Debug)]
pub struct SessionState {
    /// Profile connection state.
    pub connection: RwLock<ProfileState>,

    pub audio: RwLock<AudioState>,

    /// Known calls, including a dialled call the AG has not listed yet.
    pub calls: RwLock<Vec<Call>>,

    pub ag_features: RwLock<Option<AgFeatures>>,

    /// Set once the machine is back in Disconnected for good.
    pub finished: RwLock<bool>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            connection: RwLock::new(ProfileState::Disconnected),
            audio: RwLock::new(AudioState::Disconnected),
            calls: RwLock::new(Vec::new()),
            ag_features: RwLock::new(None),
            finished: RwLock::new(false),
        }
    }
}

impl SessionState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sync_from(&self, machine: &HeadsetClientStateMachine) {
        *self.connection.write() = machine.state().profile_state();
        *self.audio.write() = machine
            .current_device()
            .map_or(AudioState::Disconnected, |device| machine.audio_state(&device));
        *self.calls.write() = machine.current_calls();
        *self.ag_features.write() = machine.current_ag_features();
        *self.finished.write() = machine.is_finished();
    }

    pub fn get_connection(&self) -> ProfileState {
        *self.connection.read()
    }

    pub fn get_audio(&self) -> AudioState {
        *self.audio.read()
    }

    pub fn get_calls(&self) -> Vec<Call> {
        self.calls.read().clone()
    }

    pub fn get_ag_features(&self) -> Option<AgFeatures> {
        *self.ag_features.read()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::RecordingDispatcher;
    use crate::hfp::{ConnectionPolicy, DeviceAddress, Message, PolicyTable, StubTransport};

    #[test]
    fn test_sync_from_machine() {
        let device = DeviceAddress::new([1, 2, 3, 4, 5, 6]);
        let mut machine = HeadsetClientStateMachine::new(
            Config::default(),
            Arc::new(StubTransport::new()),
            Arc::new(RecordingDispatcher::new()),
            Arc::new(PolicyTable::new(ConnectionPolicy::Unknown)),
        );
        let state = SessionState::new();

        machine.handle(Message::Connect(device));
        state.sync_from(&machine);
        assert_eq!(state.get_connection(), ProfileState::Connecting);
        assert_eq!(state.get_audio(), AudioState::Disconnected);
        assert!(state.get_calls().is_empty());
        assert!(state.get_ag_features().is_none());
        assert!(!state.is_finished());

        machine.handle(Message::Disconnect(device));
        state.sync_from(&machine);
        assert_eq!(state.get_connection(), ProfileState::Disconnected);
        assert!(state.is_finished());
    }
}
