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

//! Per-device connection policy lookup.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::address::DeviceAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPolicy {
    #[default]
    Unknown,
    Allowed,
    Forbidden,
}

/// Decides whether an inbound connection from a peer is accepted.
pub trait ConnectionPolicyStore: Send + Sync {
    fn connection_policy(&self, device: &DeviceAddress) -> ConnectionPolicy;
}

/// In-memory policy table with a fallback for unlisted devices.
#[derive(Debug, Default)]
pub struct PolicyTable {
    fallback: ConnectionPolicy,
    devices: RwLock<HashMap<DeviceAddress, ConnectionPolicy>>,
}

impl PolicyTable {
    pub fn new(fallback: ConnectionPolicy) -> Self {
        Self {
            fallback,
            devices: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, device: DeviceAddress, policy: ConnectionPolicy) {
        self.devices.write().insert(device, policy);
    }
}

impl ConnectionPolicyStore for PolicyTable {
    fn connection_policy(&self, device: &DeviceAddress) -> ConnectionPolicy {
        self.devices.read().get(device).copied().unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_with_fallback() {
        let table = PolicyTable::new(ConnectionPolicy::Allowed);
        let known = DeviceAddress::new([1, 2, 3, 4, 5, 6]);
        let unknown = DeviceAddress::new([6, 5, 4, 3, 2, 1]);
        table.set(known, ConnectionPolicy::Forbidden);

        assert_eq!(table.connection_policy(&known), ConnectionPolicy::Forbidden);
        assert_eq!(table.connection_policy(&unknown), ConnectionPolicy::Allowed);
    }
}
