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

//! Audio policy values and the `+ANDROID` negotiation state.
//!
//! The AG learns our sink audio policy only after it has advertised
//! `SINKAUDIOPOLICY` in its `+ANDROID:` capability reply and the query
//! completed with OK. Until then pushes are suppressed.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::codec::{AndroidAtCommand, AndroidFeatures};

/// Tri-state value carried by each field of an [`AudioPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyValue {
    #[default]
    Unspecified,
    Allowed,
    NotAllowed,
}

impl PolicyValue {
    /// Wire code used in `+ANDROID=SINKAUDIOPOLICY,...`.
    pub fn code(&self) -> u8 {
        match self {
            PolicyValue::Unspecified => 0,
            PolicyValue::Allowed => 1,
            PolicyValue::NotAllowed => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PolicyValue::Unspecified),
            1 => Some(PolicyValue::Allowed),
            2 => Some(PolicyValue::NotAllowed),
            _ => None,
        }
    }

    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            PolicyValue::Allowed
        } else {
            PolicyValue::NotAllowed
        }
    }
}

/// Sink audio policy as pushed to the AG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioPolicy {
    pub call_establish: PolicyValue,
    pub active_device_after_connection: PolicyValue,
    pub in_band_ringtone: PolicyValue,
}

impl AudioPolicy {
    pub fn new(
        call_establish: PolicyValue,
        active_device_after_connection: PolicyValue,
        in_band_ringtone: PolicyValue,
    ) -> Self {
        Self {
            call_establish,
            active_device_after_connection,
            in_band_ringtone,
        }
    }
}

/// Whether the AG understands the sink audio policy extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteSupport {
    #[default]
    Unknown,
    Supported,
    NotSupported,
}

/// Per-session negotiation state for the sink audio policy.
#[derive(Debug, Clone, Default)]
pub struct AudioPolicyNegotiator {
    remote: RemoteSupport,
    token_seen: bool,
    confirmed: Option<AudioPolicy>,
}

impl AudioPolicyNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remote_support(&self) -> RemoteSupport {
        self.remote
    }

    pub fn is_remote_supported(&self) -> bool {
        self.remote == RemoteSupport::Supported
    }

    /// Record a `+ANDROID:` capability reply. Returns true if it
    /// advertised the sink audio policy feature.
    pub fn observe(&mut self, features: &AndroidFeatures) -> bool {
        if features.supports_sink_audio_policy() {
            self.token_seen = true;
            self.remote = RemoteSupport::Supported;
            true
        } else {
            false
        }
    }

    /// Resolve support once the `+ANDROID=?` query has completed.
    pub fn finalize(&mut self, result_ok: bool) -> RemoteSupport {
        self.remote = if result_ok && self.token_seen {
            RemoteSupport::Supported
        } else {
            RemoteSupport::NotSupported
        };
        self.token_seen = false;
        debug!("Android AT support resolved: {:?}", self.remote);
        self.remote
    }

    /// Force the support state, bypassing the query.
    pub fn set_remote_supported(&mut self, supported: bool) {
        self.remote = if supported {
            RemoteSupport::Supported
        } else {
            RemoteSupport::NotSupported
        };
    }

    /// Build the push command for `policy`, or `None` while the AG is not
    /// known to support it.
    pub fn encode_push(&self, policy: &AudioPolicy) -> Option<String> {
        if !self.is_remote_supported() {
            return None;
        }
        Some(AndroidAtCommand::SetSinkAudioPolicy(*policy).encode())
    }

    pub fn confirm(&mut self, policy: AudioPolicy) {
        self.confirmed = Some(policy);
    }

    /// Last policy the AG acknowledged.
    pub fn confirmed(&self) -> Option<AudioPolicy> {
        self.confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hfp::codec::parse_android_features;

    #[test]
    fn test_policy_codes() {
        for value in [PolicyValue::Unspecified, PolicyValue::Allowed, PolicyValue::NotAllowed] {
            assert_eq!(PolicyValue::from_code(value.code()), Some(value));
        }
        assert_eq!(PolicyValue::from_code(3), None);
        assert_eq!(PolicyValue::from_allowed(false), PolicyValue::NotAllowed);
    }

    #[test]
    fn test_push_suppressed_until_supported() {
        let mut negotiator = AudioPolicyNegotiator::new();
        let policy = AudioPolicy::new(PolicyValue::Allowed, PolicyValue::Unspecified, PolicyValue::Unspecified);
        assert_eq!(negotiator.remote_support(), RemoteSupport::Unknown);
        assert_eq!(negotiator.encode_push(&policy), None);

        negotiator.set_remote_supported(true);
        assert_eq!(
            negotiator.encode_push(&policy).as_deref(),
            Some("+ANDROID=SINKAUDIOPOLICY,1,0,0")
        );
    }

    #[test]
    fn test_finalize_requires_token_and_ok() {
        let features = parse_android_features("+ANDROID: (SINKAUDIOPOLICY)").unwrap();

        let mut negotiator = AudioPolicyNegotiator::new();
        assert!(negotiator.observe(&features));
        assert_eq!(negotiator.finalize(true), RemoteSupport::Supported);

        let mut negotiator = AudioPolicyNegotiator::new();
        negotiator.observe(&features);
        assert_eq!(negotiator.finalize(false), RemoteSupport::NotSupported);

        let mut negotiator = AudioPolicyNegotiator::new();
        assert_eq!(negotiator.finalize(true), RemoteSupport::NotSupported);
    }

    #[test]
    fn test_observe_without_token() {
        let features = parse_android_features("+ANDROID: (OTHERFEATURE)").unwrap();
        let mut negotiator = AudioPolicyNegotiator::new();
        assert!(!negotiator.observe(&features));
        assert_eq!(negotiator.remote_support(), RemoteSupport::Unknown);
    }
}
