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

//! Async hosting of state machines: one tokio task per peer.

use anyhow::{anyhow, bail, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::address::DeviceAddress;
use super::call::Call;
use super::codec::{LinkState, StackEvent, StackEventKind};
use super::connection_policy::ConnectionPolicyStore;
use super::native::NativeInterface;
use super::state_machine::{HeadsetClientStateMachine, Message};
use crate::config::Config;
use crate::events::{AudioState, EventDispatcher, ProfileState};
use crate::state::SessionState;

/// Handle to a running session task.
pub struct SessionHandle {
    device: DeviceAddress,
    tx: mpsc::UnboundedSender<Message>,
    /// Held around every send and around the final inbox close, so a send
    /// either reaches the machine or fails.
    gate: Arc<Mutex<()>>,
    state: Arc<SessionState>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawn a session task for `device`. Must be called inside a tokio
    /// runtime.
    pub fn spawn(
        device: DeviceAddress,
        config: Config,
        native: Arc<dyn NativeInterface>,
        dispatcher: Arc<dyn EventDispatcher>,
        policies: Arc<dyn ConnectionPolicyStore>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = SessionState::new();
        let machine = HeadsetClientStateMachine::new(config, native, dispatcher, policies);
        let gate = Arc::new(Mutex::new(()));
        let task = tokio::spawn(Self::run(device, machine, rx, gate.clone(), state.clone()));
        Self {
            device,
            tx,
            gate,
            state,
            task,
        }
    }

    pub fn device(&self) -> DeviceAddress {
        self.device
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn send(&self, message: Message) -> Result<()> {
        let _gate = self.gate.lock();
        self.tx
            .send(message)
            .map_err(|e| anyhow!("session for {} has ended, dropping {}", self.device, e.0.as_str()))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished() || self.state.is_finished()
    }

    /// Message loop: wait for the next message or the next timer, whichever
    /// comes first, then let the machine catch up.
    async fn run(
        device: DeviceAddress,
        mut machine: HeadsetClientStateMachine,
        mut rx: mpsc::UnboundedReceiver<Message>,
        gate: Arc<Mutex<()>>,
        state: Arc<SessionState>,
    ) {
        let start = Instant::now();
        debug!(peer = %device, "session started");

        'session: loop {
            let deadline = machine.next_deadline();
            let timer = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(start + deadline).await,
                    None => futures::future::pending::<()>().await,
                }
            };

            tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => {
                        machine.post(message);
                        while let Ok(message) = rx.try_recv() {
                            machine.post(message);
                        }
                    }
                    None => {
                        debug!(peer = %device, "session channel closed");
                        break;
                    }
                },
                _ = timer => {}
            }

            machine.advance_to(start.elapsed());
            state.sync_from(&machine);

            // Close the inbox only once nothing is left in it.
            while machine.is_finished() {
                let guard = gate.lock();
                let mut late = 0;
                while let Ok(message) = rx.try_recv() {
                    machine.post(message);
                    late += 1;
                }
                if late == 0 {
                    rx.close();
                    break 'session;
                }
                drop(guard);
                debug!(peer = %device, "{} message(s) arrived while finishing", late);
                machine.advance_to(start.elapsed());
                state.sync_from(&machine);
            }
        }

        state.sync_from(&machine);
        info!(peer = %device, "session ended");
    }
}

/// Routes requests and stack events to per-device sessions.
pub struct HfpClientService {
    config: Config,
    native: Arc<dyn NativeInterface>,
    dispatcher: Arc<dyn EventDispatcher>,
    policies: Arc<dyn ConnectionPolicyStore>,
    sessions: RwLock<HashMap<DeviceAddress, SessionHandle>>,
}

impl HfpClientService {
    pub fn new(
        config: Config,
        native: Arc<dyn NativeInterface>,
        dispatcher: Arc<dyn EventDispatcher>,
        policies: Arc<dyn ConnectionPolicyStore>,
    ) -> Self {
        Self {
            config,
            native,
            dispatcher,
            policies,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start an outgoing connection to `device`.
    pub fn connect(&self, device: DeviceAddress) -> Result<()> {
        let mut sessions = self.sessions.write();
        Self::reap(&mut sessions);
        if let Some(session) = sessions.get(&device) {
            if session.send(Message::Connect(device)).is_ok() {
                return Ok(());
            }
            // The session closed its inbox after the reap check.
            sessions.remove(&device);
        }
        let session = self.spawn_session(device);
        session.send(Message::Connect(device))?;
        sessions.insert(device, session);
        Ok(())
    }

    pub fn disconnect(&self, device: DeviceAddress) -> Result<()> {
        self.send(device, Message::Disconnect(device))
    }

    /// Forward a request to the session serving `device`.
    pub fn send(&self, device: DeviceAddress, message: Message) -> Result<()> {
        let mut sessions = self.sessions.write();
        Self::reap(&mut sessions);
        match sessions.get(&device) {
            Some(session) => session.send(message),
            None => bail!("no session for {}", device),
        }
    }

    /// Route a transport event. A connection event from an unknown device
    /// starts an incoming session; anything else for it is dropped.
    pub fn handle_stack_event(&self, event: StackEvent) -> Result<()> {
        let device = event.device;
        let mut sessions = self.sessions.write();
        Self::reap(&mut sessions);
        if let Some(session) = sessions.get(&device) {
            match session.send(Message::Stack(event.clone())) {
                Ok(()) => return Ok(()),
                Err(_) => {
                    sessions.remove(&device);
                }
            }
        }

        let inbound = matches!(
            event.kind,
            StackEventKind::ConnectionStateChanged {
                state: LinkState::Connecting | LinkState::Connected | LinkState::SlcConnected { .. }
            }
        );
        if !inbound {
            debug!(peer = %device, "no session, dropping {}", event.kind.as_str());
            return Ok(());
        }

        let session = self.spawn_session(device);
        session.send(Message::Stack(event))?;
        sessions.insert(device, session);
        Ok(())
    }

    pub fn connection_state(&self, device: &DeviceAddress) -> ProfileState {
        self.with_state(device, |s| s.get_connection())
            .unwrap_or(ProfileState::Disconnected)
    }

    pub fn audio_state(&self, device: &DeviceAddress) -> AudioState {
        self.with_state(device, |s| s.get_audio())
            .unwrap_or(AudioState::Disconnected)
    }

    pub fn current_calls(&self, device: &DeviceAddress) -> Vec<Call> {
        self.with_state(device, |s| s.get_calls()).unwrap_or_default()
    }

    /// Devices whose session is still running.
    pub fn active_devices(&self) -> Vec<DeviceAddress> {
        let mut devices: Vec<DeviceAddress> = self
            .sessions
            .read()
            .values()
            .filter(|s| !s.is_finished())
            .map(|s| s.device())
            .collect();
        devices.sort();
        devices
    }

    fn with_state<T>(&self, device: &DeviceAddress, f: impl FnOnce(&SessionState) -> T) -> Option<T> {
        self.sessions.read().get(device).map(|s| f(s.state().as_ref()))
    }

    fn spawn_session(&self, device: DeviceAddress) -> SessionHandle {
        info!(peer = %device, "starting session");
        SessionHandle::spawn(
            device,
            self.config.clone(),
            self.native.clone(),
            self.dispatcher.clone(),
            self.policies.clone(),
        )
    }

    fn reap(sessions: &mut HashMap<DeviceAddress, SessionHandle>) {
        sessions.retain(|device, session| {
            let keep = !session.is_finished();
            if !keep {
                debug!(peer = %device, "reaping finished session");
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelDispatcher, Notification};
    use crate::hfp::codec::CmdResultCode;
    use crate::hfp::connection_policy::{ConnectionPolicy, PolicyTable};
    use crate::hfp::constants::peer_feat;
    use crate::hfp::native::{NativeCall, StubTransport};
    use std::time::Duration;

    fn device() -> DeviceAddress {
        DeviceAddress::new([0x00, 0x01, 0x02, 0x03, 0x04, 0x05])
    }

    struct Fixture {
        service: HfpClientService,
        native: Arc<StubTransport>,
        policies: Arc<PolicyTable>,
        rx: async_channel::Receiver<Notification>,
    }

    fn fixture(connecting_timeout_ms: u64) -> Fixture {
        let mut config = Config::default();
        config.connection.connecting_timeout_ms = connecting_timeout_ms;
        let native = Arc::new(StubTransport::new());
        let policies = Arc::new(PolicyTable::new(ConnectionPolicy::Unknown));
        let (dispatcher, rx) = ChannelDispatcher::new();
        let service = HfpClientService::new(config, native.clone(), Arc::new(dispatcher), policies.clone());
        Fixture {
            service,
            native,
            policies,
            rx,
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn event(kind: StackEventKind) -> StackEvent {
        StackEvent::new(device(), kind)
    }

    #[tokio::test]
    async fn test_connect_through_service() {
        let f = fixture(10_000);
        f.service.connect(device()).unwrap();
        f.service
            .handle_stack_event(event(StackEventKind::ConnectionStateChanged {
                state: LinkState::SlcConnected {
                    peer_features: peer_feat::ECS,
                    chld_features: 0,
                },
            }))
            .unwrap();
        f.service
            .handle_stack_event(event(StackEventKind::CmdResult { code: CmdResultCode::Ok }))
            .unwrap();

        wait_until(|| f.service.connection_state(&device()) == ProfileState::Connected).await;
        assert_eq!(f.service.active_devices(), vec![device()]);

        let first = f.rx.recv().await.unwrap();
        assert_eq!(first.as_str(), "CONNECTION_STATE_CHANGED");
    }

    #[tokio::test]
    async fn test_connecting_timeout_ends_session() {
        let f = fixture(50);
        f.service.connect(device()).unwrap();
        assert_eq!(f.service.active_devices(), vec![device()]);

        wait_until(|| f.service.active_devices().is_empty()).await;
        assert_eq!(f.service.connection_state(&device()), ProfileState::Disconnected);
        assert_eq!(f.native.count(|c| *c == NativeCall::Disconnect(device())), 1);
        assert!(f.service.send(device(), Message::ConnectAudio).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_connect_while_session_finishes() {
        let f = fixture(1);
        let mut accepted = 0;

        for round in 0..100u64 {
            if f.service.connect(device()).is_ok() {
                accepted += 1;
            }
            // Land the second request around the moment the first times out.
            std::thread::sleep(Duration::from_micros(500 + (round % 20) * 100));
            if f.service.connect(device()).is_ok() {
                accepted += 1;
            }
            wait_until(|| f.service.active_devices().is_empty()).await;
        }

        assert_eq!(accepted, 200);
        wait_until(|| f.native.count(|c| *c == NativeCall::Connect(device())) == accepted).await;
    }

    #[tokio::test]
    async fn test_forbidden_inbound_session() {
        let f = fixture(10_000);
        f.policies.set(device(), ConnectionPolicy::Forbidden);
        f.service
            .handle_stack_event(event(StackEventKind::ConnectionStateChanged {
                state: LinkState::Connected,
            }))
            .unwrap();

        wait_until(|| f.service.active_devices().is_empty()).await;
        assert!(f.native.calls().is_empty());
        match f.rx.recv().await.unwrap() {
            Notification::ConnectionStateChanged { previous, state, .. } => {
                assert_eq!(previous, ProfileState::Disconnected);
                assert_eq!(state, ProfileState::Disconnected);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_event_without_session_dropped() {
        let f = fixture(10_000);
        f.service
            .handle_stack_event(event(StackEventKind::BatteryLevel { level: 3 }))
            .unwrap();
        assert!(f.service.active_devices().is_empty());
        assert!(f.service.disconnect(device()).is_err());
    }
}
