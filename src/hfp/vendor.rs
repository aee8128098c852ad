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

//! Vendor-specific AT command allow-list.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::constants::vendor_id;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VendorCommandError {
    #[error("empty vendor command")]
    Empty,
    #[error("compound vendor command rejected: {0:?}")]
    Compound(String),
    #[error("vendor command {command:?} not allowed for vendor {vendor_id:#06x}")]
    NotAllowed { vendor_id: u16, command: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Set,
    Read,
}

struct CommandPattern {
    vendor_id: u16,
    word: &'static str,
    operation: Operation,
}

const COMMANDS: &[CommandPattern] = &[
    CommandPattern { vendor_id: vendor_id::APPLE, word: "+XAPL=", operation: Operation::Set },
    CommandPattern { vendor_id: vendor_id::APPLE, word: "+IPHONEACCEV=", operation: Operation::Set },
    CommandPattern { vendor_id: vendor_id::APPLE, word: "+APLSIRI?", operation: Operation::Read },
    CommandPattern { vendor_id: vendor_id::APPLE, word: "+APLEFM=", operation: Operation::Set },
];

const EVENTS: &[(u16, &str)] = &[
    (vendor_id::APPLE, "+XAPL="),
    (vendor_id::APPLE, "+APLSIRI:"),
];

/// An unsolicited result code that matched a vendor pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorEvent {
    pub vendor_id: u16,
    pub event_code: String,
    pub full_event: String,
}

/// Command word of an outbound command: through the first `=`, else
/// through the first `?`, else the whole string.
pub fn command_word(command: &str) -> &str {
    let end = command.find('=').or_else(|| command.find('?'));
    match end {
        Some(pos) => &command[..=pos],
        None => command,
    }
}

/// Check an outbound vendor command against the allow-list.
pub fn validate_command(vendor_id: u16, command: &str) -> Result<Operation, VendorCommandError> {
    if command.trim().is_empty() {
        return Err(VendorCommandError::Empty);
    }
    if command.contains(';') {
        return Err(VendorCommandError::Compound(command.to_string()));
    }
    let word = command_word(command);
    COMMANDS
        .iter()
        .find(|p| p.vendor_id == vendor_id && p.word == word)
        .map(|p| p.operation)
        .ok_or_else(|| VendorCommandError::NotAllowed {
            vendor_id,
            command: command.to_string(),
        })
}

/// Event code of an inbound result: through the first `:` or `=`.
pub fn event_code(raw: &str) -> Option<&str> {
    raw.find([':', '=']).map(|pos| &raw[..=pos])
}

/// Match an inbound unsolicited result against the known vendor events.
pub fn match_event(raw: &str) -> Option<VendorEvent> {
    let code = event_code(raw)?;
    EVENTS
        .iter()
        .find(|(_, pattern)| *pattern == code)
        .map(|(vendor_id, pattern)| VendorEvent {
            vendor_id: *vendor_id,
            event_code: pattern.to_string(),
            full_event: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_word() {
        assert_eq!(command_word("+XAPL=ABCD-1234-0100,100"), "+XAPL=");
        assert_eq!(command_word("+APLSIRI?"), "+APLSIRI?");
        assert_eq!(command_word("+NOTERM"), "+NOTERM");
    }

    #[test]
    fn test_allowed_commands() {
        assert_eq!(
            validate_command(vendor_id::APPLE, "+XAPL=ABCD-1234-0100,100"),
            Ok(Operation::Set)
        );
        assert_eq!(validate_command(vendor_id::APPLE, "+APLSIRI?"), Ok(Operation::Read));
        assert_eq!(validate_command(vendor_id::APPLE, "+IPHONEACCEV=1,1,5"), Ok(Operation::Set));
    }

    #[test]
    fn test_rejected_commands() {
        assert!(matches!(
            validate_command(vendor_id::APPLE, "+XAAPL=ABCD-1234-0100,100"),
            Err(VendorCommandError::NotAllowed { .. })
        ));
        assert!(matches!(
            validate_command(vendor_id::APPLE, "+XAPL=ABCD-1234-0100,100; +XAPL=ab"),
            Err(VendorCommandError::Compound(_))
        ));
        assert!(matches!(
            validate_command(vendor_id::GOOGLE, "+XAPL=ABCD-1234-0100,100"),
            Err(VendorCommandError::NotAllowed { .. })
        ));
        assert_eq!(validate_command(vendor_id::APPLE, "  "), Err(VendorCommandError::Empty));
    }

    #[test]
    fn test_match_event() {
        let event = match_event("+XAPL=iPhone,2").unwrap();
        assert_eq!(event.vendor_id, vendor_id::APPLE);
        assert_eq!(event.event_code, "+XAPL=");
        assert_eq!(event.full_event, "+XAPL=iPhone,2");

        let event = match_event("+APLSIRI:  2").unwrap();
        assert_eq!(event.event_code, "+APLSIRI:");

        assert!(match_event("+XAAPL=iPhone,1").is_none());
        assert!(match_event("+AAPLSIRI: 1").is_none());
        assert!(match_event("no separator").is_none());
    }
}
