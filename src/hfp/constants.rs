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

//! HFP feature bits, AT command codes and call-action codes.

use serde::{Deserialize, Serialize};

/// AG feature bits reported with the service-level connection.
pub mod peer_feat {
    pub const THREE_WAY: u32 = 0x0001; // Three-way calling
    pub const ECNR: u32 = 0x0002; // Echo cancellation / noise reduction
    pub const VREC: u32 = 0x0004; // Voice recognition
    pub const INBAND: u32 = 0x0008; // In-band ring tone
    pub const VTAG: u32 = 0x0010; // Attach number to voice tag
    pub const REJECT: u32 = 0x0020; // Reject incoming call
    pub const ECS: u32 = 0x0040; // Enhanced call status
    pub const ECC: u32 = 0x0080; // Enhanced call control
    pub const EXTERR: u32 = 0x0100; // Extended error codes
    pub const CODEC: u32 = 0x0200; // Codec negotiation
    pub const HF_IND: u32 = 0x0400; // HF indicators
    pub const ESCO_S4: u32 = 0x0800; // eSCO S4 settings
}

/// CHLD (call hold and multiparty) feature bits.
pub mod chld_feat {
    pub const REL: u32 = 0x0001; // 0: release held / reject waiting
    pub const REL_ACC: u32 = 0x0002; // 1: release active, accept other
    pub const REL_X: u32 = 0x0004; // 1x: release a specific call
    pub const HOLD_ACC: u32 = 0x0008; // 2: hold active, accept other
    pub const PRIV_X: u32 = 0x0010; // 2x: private consultation
    pub const MERGE: u32 = 0x0020; // 3: add held call to conversation
    pub const MERGE_DETACH: u32 = 0x0040; // 4: explicit call transfer
}

/// Structured AT command codes understood by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AtCommand {
    Vts = 0,
    Btrh = 1,
    Chup = 2,
    Chld = 3,
    Bcc = 4,
    Cnum = 5,
    Ata = 6,
    Cops = 7,
    Atd = 8,
    Vgm = 9,
    Vgs = 10,
    Bia = 11,
    Cmee = 12,
    Binp = 13,
    Bldn = 14,
    Nrec = 15,
    VendorSpecific = 16,
    Biev = 17,
}

impl AtCommand {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Call-control actions mapped onto ATA, CHUP, CHLD and BTRH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CallAction {
    Chld0 = 0,
    Chld1 = 1,
    Chld2 = 2,
    Chld3 = 3,
    Chld4 = 4,
    Chld1x = 5,
    Chld2x = 6,
    Ata = 7,
    Chup = 8,
    Btrh0 = 9,
    Btrh1 = 10,
    Btrh2 = 11,
}

impl CallAction {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallAction::Chld0 => "CHLD=0",
            CallAction::Chld1 => "CHLD=1",
            CallAction::Chld2 => "CHLD=2",
            CallAction::Chld3 => "CHLD=3",
            CallAction::Chld4 => "CHLD=4",
            CallAction::Chld1x => "CHLD=1x",
            CallAction::Chld2x => "CHLD=2x",
            CallAction::Ata => "ATA",
            CallAction::Chup => "CHUP",
            CallAction::Btrh0 => "BTRH=0",
            CallAction::Btrh1 => "BTRH=1",
            CallAction::Btrh2 => "BTRH=2",
        }
    }
}

/// How an accepted call treats the call that is already in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptFlag {
    #[default]
    None,
    Hold,
    Terminate,
}

/// Company identifiers used to scope vendor AT commands.
pub mod vendor_id {
    pub const APPLE: u16 = 0x004C;
    pub const GOOGLE: u16 = 0x00E0;
}

/// Volume range accepted by +VGS / +VGM.
pub const MAX_VOLUME: u8 = 15;

/// Timing defaults, overridable through [`crate::config::Config`].
pub mod timing {
    /// Connecting state bound.
    pub const CONNECTING_TIMEOUT_MS: u64 = 10_000;

    /// Call-list poll period while calls exist.
    pub const CLCC_POLL_INTERVAL_MS: u64 = 2_000;

    /// Lifetime of a dialled call the AG never reported.
    pub const OUTGOING_TIMEOUT_MS: u64 = 10_000;

    /// Times a deferred message may be requeued before it is dropped.
    pub const MAX_REQUEUE: u32 = 8;
}
