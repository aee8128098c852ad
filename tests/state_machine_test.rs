//! End-to-end tests of the state machine over the stub transport.

use std::sync::Arc;
use std::time::Duration;

use hfp_client::config::Config;
use hfp_client::events::{Notification, ProfileState, RecordingDispatcher};
use hfp_client::hfp::constants::{peer_feat, vendor_id, AtCommand};
use hfp_client::hfp::{
    CmdResultCode, ConnectionPolicy, DeviceAddress, HeadsetClientStateMachine, LinkState, Message,
    NativeCall, PolicyTable, RemoteSupport, StackEvent, StackEventKind, State, StubTransport,
};

struct Setup {
    machine: HeadsetClientStateMachine,
    native: Arc<StubTransport>,
    events: Arc<RecordingDispatcher>,
}

fn device() -> DeviceAddress {
    "00:01:02:03:04:05".parse().unwrap()
}

fn setup(policy: ConnectionPolicy) -> Setup {
    let native = Arc::new(StubTransport::new());
    let events = Arc::new(RecordingDispatcher::new());
    let policies = Arc::new(PolicyTable::new(ConnectionPolicy::Unknown));
    policies.set(device(), policy);
    let machine = HeadsetClientStateMachine::new(Config::default(), native.clone(), events.clone(), policies);
    Setup {
        machine,
        native,
        events,
    }
}

fn stack(kind: StackEventKind) -> Message {
    Message::Stack(StackEvent::new(device(), kind))
}

fn link(state: LinkState) -> Message {
    stack(StackEventKind::ConnectionStateChanged { state })
}

fn slc() -> Message {
    link(LinkState::SlcConnected {
        peer_features: peer_feat::ECS | peer_feat::VREC,
        chld_features: 0,
    })
}

fn result(code: CmdResultCode) -> Message {
    stack(StackEventKind::CmdResult { code })
}

fn android_reply() -> Message {
    stack(StackEventKind::UnknownEvent {
        raw: "+ANDROID: (SINKAUDIOPOLICY)".to_string(),
    })
}

fn vendor_commands(native: &StubTransport) -> Vec<String> {
    native
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            NativeCall::SendAtCmd {
                command: AtCommand::VendorSpecific,
                arg,
                ..
            } => arg,
            _ => None,
        })
        .collect()
}

fn in_band_updates(events: &RecordingDispatcher, enabled: bool) -> usize {
    events.count(|n| matches!(n, Notification::InBandRingingUpdate { enabled: e, .. } if *e == enabled))
}

#[test]
fn test_inbound_connection_reaches_connected() {
    let mut s = setup(ConnectionPolicy::Allowed);

    s.machine.handle(link(LinkState::Connected));
    assert_eq!(s.machine.state(), State::Connecting);

    s.machine.handle(slc());
    s.machine.handle(result(CmdResultCode::Ok));
    assert_eq!(s.machine.state(), State::Connected);

    let connected = s.events.count(|n| {
        matches!(
            n,
            Notification::ConnectionStateChanged {
                state: ProfileState::Connected,
                ..
            }
        )
    });
    assert_eq!(connected, 1);
    assert_eq!(in_band_updates(&s.events, true), 1);
    assert_eq!(s.native.count(|c| matches!(c, NativeCall::Connect(_))), 0);
}

#[test]
fn test_connecting_timeout_fires_once() {
    let mut s = setup(ConnectionPolicy::Allowed);
    s.machine.handle(link(LinkState::Connected));
    assert_eq!(s.machine.state(), State::Connecting);

    s.machine.advance_time(Config::default().connecting_timeout());
    assert_eq!(s.machine.state(), State::Disconnected);
    assert_eq!(in_band_updates(&s.events, false), 1);
    assert_eq!(s.machine.pending_timers(|_| true), 0);

    s.machine.advance_time(Duration::from_secs(30));
    assert_eq!(s.native.count(|c| matches!(c, NativeCall::Disconnect(_))), 1);
    assert_eq!(in_band_updates(&s.events, false), 1);
}

#[test]
fn test_vendor_command_allow_list() {
    let mut s = setup(ConnectionPolicy::Allowed);
    s.machine.handle(Message::Connect(device()));
    s.machine.handle(slc());
    s.machine.handle(result(CmdResultCode::Ok));

    assert!(s.machine.send_vendor_at_command(vendor_id::APPLE, "+XAPL=ABCD-1234-0100,100"));
    assert_eq!(vendor_commands(&s.native), vec!["+XAPL=ABCD-1234-0100,100".to_string()]);

    s.native.clear();
    assert!(!s.machine.send_vendor_at_command(vendor_id::APPLE, "+XAAPL=ABCD-1234-0100,100"));
    assert!(!s
        .machine
        .send_vendor_at_command(vendor_id::APPLE, "+XAPL=ABCD-1234-0100,100; +XAPL=ab"));
    assert!(s.native.calls().is_empty());
}

#[test]
fn test_android_query_then_ok_is_supported() {
    let mut s = setup(ConnectionPolicy::Allowed);
    s.machine.handle(Message::Connect(device()));
    s.machine.handle(slc());
    s.machine.handle(android_reply());
    s.machine.handle(result(CmdResultCode::Ok));

    assert_eq!(s.machine.audio_policy_remote_support(), RemoteSupport::Supported);
}

#[test]
fn test_android_query_then_cme_error_is_not_supported() {
    let mut s = setup(ConnectionPolicy::Allowed);
    s.machine.handle(Message::Connect(device()));
    s.machine.handle(slc());
    s.machine.handle(android_reply());
    s.machine.handle(result(CmdResultCode::CmeError(3)));

    assert_eq!(s.machine.state(), State::Connected);
    assert_eq!(s.machine.audio_policy_remote_support(), RemoteSupport::NotSupported);
    assert!(!s.machine.set_audio_policy(Default::default()));
}

#[test]
fn test_forbidden_policy_never_touches_transport() {
    let mut s = setup(ConnectionPolicy::Forbidden);
    for state in [LinkState::Connecting, LinkState::Connected] {
        s.machine.handle(link(state));
        assert_eq!(s.machine.state(), State::Disconnected);
    }
    s.machine.handle(slc());

    assert!(s.native.calls().is_empty());
    assert_eq!(s.events.notifications().len(), 3);
    assert!(s.machine.is_finished());
}

#[test]
fn test_explicit_disconnect_while_connecting() {
    let mut s = setup(ConnectionPolicy::Allowed);
    s.machine.handle(Message::Connect(device()));
    s.machine.handle(Message::Disconnect(device()));

    assert_eq!(s.machine.state(), State::Disconnected);
    assert_eq!(s.native.count(|c| *c == NativeCall::Disconnect(device())), 1);
    assert_eq!(s.machine.pending_timers(|_| true), 0);
    assert!(s.machine.current_device().is_none());
}

#[test]
fn test_reconnect_after_disconnect() {
    let mut s = setup(ConnectionPolicy::Allowed);
    s.machine.handle(Message::Connect(device()));
    s.machine.handle(link(LinkState::Disconnected));
    assert!(s.machine.is_finished());

    s.machine.handle(Message::Connect(device()));
    assert_eq!(s.machine.state(), State::Connecting);
    assert!(!s.machine.is_finished());
    assert_eq!(s.native.count(|c| matches!(c, NativeCall::Connect(_))), 2);
}
