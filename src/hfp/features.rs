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

//! Feature sets negotiated during the service-level connection.

use serde::{Deserialize, Serialize};

use super::constants::{chld_feat, peer_feat};

/// Raw AG and CHLD feature bits, fixed once the SLC is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NegotiatedFeatures {
    peer: u32,
    chld: u32,
}

impl NegotiatedFeatures {
    pub fn new(peer: u32, chld: u32) -> Self {
        Self { peer, chld }
    }

    pub fn peer_bits(&self) -> u32 {
        self.peer
    }

    pub fn chld_bits(&self) -> u32 {
        self.chld
    }

    pub fn has_peer(&self, bit: u32) -> bool {
        self.peer & bit != 0
    }

    pub fn has_chld(&self, bit: u32) -> bool {
        self.chld & bit != 0
    }

    /// Read-only view handed to the rest of the system.
    pub fn ag_features(&self) -> AgFeatures {
        AgFeatures {
            three_way_calling: self.has_peer(peer_feat::THREE_WAY),
            echo_cancellation: self.has_peer(peer_feat::ECNR),
            voice_recognition: self.has_peer(peer_feat::VREC),
            in_band_ring: self.has_peer(peer_feat::INBAND),
            voice_tag: self.has_peer(peer_feat::VTAG),
            reject_call: self.has_peer(peer_feat::REJECT),
            enhanced_call_status: self.has_peer(peer_feat::ECS),
            enhanced_call_control: self.has_peer(peer_feat::ECC),
            codec_negotiation: self.has_peer(peer_feat::CODEC),
            hf_indicators: self.has_peer(peer_feat::HF_IND),
            release_held_or_waiting: self.has_chld(chld_feat::REL),
            release_and_accept: self.has_chld(chld_feat::REL_ACC),
            release_specific: self.has_chld(chld_feat::REL_X),
            hold_and_accept: self.has_chld(chld_feat::HOLD_ACC),
            private_consultation: self.has_chld(chld_feat::PRIV_X),
            merge: self.has_chld(chld_feat::MERGE),
            merge_and_detach: self.has_chld(chld_feat::MERGE_DETACH),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgFeatures {
    pub three_way_calling: bool,
    pub echo_cancellation: bool,
    pub voice_recognition: bool,
    pub in_band_ring: bool,
    pub voice_tag: bool,
    pub reject_call: bool,
    pub enhanced_call_status: bool,
    pub enhanced_call_control: bool,
    pub codec_negotiation: bool,
    pub hf_indicators: bool,
    pub release_held_or_waiting: bool,
    pub release_and_accept: bool,
    pub release_specific: bool,
    pub hold_and_accept: bool,
    pub private_consultation: bool,
    pub merge: bool,
    pub merge_and_detach: bool,
}
