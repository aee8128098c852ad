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

//! Hands-free profile client.
//!
//! Drives one connection to an audio gateway: service-level setup, call
//! tracking, audio and vendor extensions.

mod actions;
mod address;
mod call;
mod codec;
mod connection_policy;
pub mod constants;
mod features;
mod looper;
mod native;
mod policy;
mod session;
mod state_machine;
mod vendor;

pub use actions::{ActionKind, ActionQueue, QueuedAction};
pub use address::{AddressParseError, DeviceAddress};
pub use call::{Call, CallChange, CallDirection, CallFields, CallState, CallTable, Upsert};
pub use codec::{
    event_type, parse_android_features, parse_unsolicited, AndroidAtCommand, AndroidFeatures,
    AudioLinkState, CallIndicator, CmdResultCode, CodecError, LinkState, RawStackEvent, ScoCodec,
    StackEvent, StackEventKind, UnsolicitedResponse, VolumeKind, ANDROID_AT_QUERY,
};
pub use connection_policy::{ConnectionPolicy, ConnectionPolicyStore, PolicyTable};
pub use features::{AgFeatures, NegotiatedFeatures};
pub use looper::{Envelope, Looper, TimerId};
pub use native::{NativeCall, NativeInterface, StubTransport};
pub use policy::{AudioPolicy, AudioPolicyNegotiator, PolicyValue, RemoteSupport};
pub use session::{HfpClientService, SessionHandle};
pub use state_machine::{AgIndicators, HeadsetClientStateMachine, Message, State};
pub use vendor::{validate_command, Operation as VendorOperation, VendorCommandError, VendorEvent};
