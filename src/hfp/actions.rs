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

//! Commands awaiting their AT result code.
//!
//! The AG answers commands strictly in order, so each `CMD_RESULT` pops
//! the front of the queue. Only one action of each kind may be in flight.

use std::collections::VecDeque;

use super::call::Call;
use super::codec::VolumeKind;
use super::constants::CallAction;
use super::policy::AudioPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    QueryAndroidAt,
    SetAudioPolicy,
    QueryCurrentCalls,
    VoiceRecognitionStart,
    VoiceRecognitionStop,
    Dial,
    AcceptCall,
    RejectCall,
    HoldCall,
    TerminateCall,
    EnterPrivateMode,
    ExplicitCallTransfer,
    SendDtmf,
    DisableNrec,
    QueryOperatorName,
    SubscriberInfo,
    VendorAtCommand,
    Biev,
    SetSpeakerVolume,
    SetMicVolume,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::QueryAndroidAt => "QUERY_ANDROID_AT",
            ActionKind::SetAudioPolicy => "SET_AUDIO_POLICY",
            ActionKind::QueryCurrentCalls => "QUERY_CURRENT_CALLS",
            ActionKind::VoiceRecognitionStart => "VOICE_RECOGNITION_START",
            ActionKind::VoiceRecognitionStop => "VOICE_RECOGNITION_STOP",
            ActionKind::Dial => "DIAL_NUMBER",
            ActionKind::AcceptCall => "ACCEPT_CALL",
            ActionKind::RejectCall => "REJECT_CALL",
            ActionKind::HoldCall => "HOLD_CALL",
            ActionKind::TerminateCall => "TERMINATE_CALL",
            ActionKind::EnterPrivateMode => "ENTER_PRIVATE_MODE",
            ActionKind::ExplicitCallTransfer => "EXPLICIT_CALL_TRANSFER",
            ActionKind::SendDtmf => "SEND_DTMF",
            ActionKind::DisableNrec => "DISABLE_NREC",
            ActionKind::QueryOperatorName => "QUERY_OPERATOR_NAME",
            ActionKind::SubscriberInfo => "SUBSCRIBER_INFO",
            ActionKind::VendorAtCommand => "SEND_VENDOR_AT_COMMAND",
            ActionKind::Biev => "SEND_BIEV",
            ActionKind::SetSpeakerVolume => "SET_SPEAKER_VOLUME",
            ActionKind::SetMicVolume => "SET_MIC_VOLUME",
        }
    }
}

/// A command sent to the AG whose result has not arrived yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedAction {
    QueryAndroidAt,
    SetAudioPolicy(AudioPolicy),
    QueryCurrentCalls,
    VoiceRecognitionStart,
    VoiceRecognitionStop,
    Dial { number: String },
    AcceptCall(CallAction),
    RejectCall(CallAction),
    HoldCall(CallAction),
    TerminateCall(CallAction),
    EnterPrivateMode(Call),
    ExplicitCallTransfer,
    SendDtmf(u8),
    DisableNrec,
    QueryOperatorName,
    SubscriberInfo,
    VendorAtCommand { vendor_id: u16, command: String },
    Biev { indicator_id: u16, value: i32 },
    SetVolume(VolumeKind),
}

impl QueuedAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            QueuedAction::QueryAndroidAt => ActionKind::QueryAndroidAt,
            QueuedAction::SetAudioPolicy(_) => ActionKind::SetAudioPolicy,
            QueuedAction::QueryCurrentCalls => ActionKind::QueryCurrentCalls,
            QueuedAction::VoiceRecognitionStart => ActionKind::VoiceRecognitionStart,
            QueuedAction::VoiceRecognitionStop => ActionKind::VoiceRecognitionStop,
            QueuedAction::Dial { .. } => ActionKind::Dial,
            QueuedAction::AcceptCall(_) => ActionKind::AcceptCall,
            QueuedAction::RejectCall(_) => ActionKind::RejectCall,
            QueuedAction::HoldCall(_) => ActionKind::HoldCall,
            QueuedAction::TerminateCall(_) => ActionKind::TerminateCall,
            QueuedAction::EnterPrivateMode(_) => ActionKind::EnterPrivateMode,
            QueuedAction::ExplicitCallTransfer => ActionKind::ExplicitCallTransfer,
            QueuedAction::SendDtmf(_) => ActionKind::SendDtmf,
            QueuedAction::DisableNrec => ActionKind::DisableNrec,
            QueuedAction::QueryOperatorName => ActionKind::QueryOperatorName,
            QueuedAction::SubscriberInfo => ActionKind::SubscriberInfo,
            QueuedAction::VendorAtCommand { .. } => ActionKind::VendorAtCommand,
            QueuedAction::Biev { .. } => ActionKind::Biev,
            QueuedAction::SetVolume(VolumeKind::Speaker) => ActionKind::SetSpeakerVolume,
            QueuedAction::SetVolume(VolumeKind::Mic) => ActionKind::SetMicVolume,
        }
    }
}

/// FIFO of in-flight actions.
#[derive(Debug, Clone, Default)]
pub struct ActionQueue {
    actions: VecDeque<QueuedAction>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action. Returns false if one of the same kind is in flight.
    pub fn push(&mut self, action: QueuedAction) -> bool {
        if self.contains(action.kind()) {
            return false;
        }
        self.actions.push_back(action);
        true
    }

    pub fn pop(&mut self) -> Option<QueuedAction> {
        self.actions.pop_front()
    }

    pub fn front(&self) -> Option<&QueuedAction> {
        self.actions.front()
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.actions.iter().any(|a| a.kind() == kind)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedAction> {
        self.actions.iter()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = ActionQueue::new();
        assert!(queue.push(QueuedAction::QueryAndroidAt));
        assert!(queue.push(QueuedAction::QueryCurrentCalls));
        assert!(queue.push(QueuedAction::SendDtmf(1)));

        assert_eq!(queue.pop(), Some(QueuedAction::QueryAndroidAt));
        assert_eq!(queue.pop(), Some(QueuedAction::QueryCurrentCalls));
        assert_eq!(queue.pop(), Some(QueuedAction::SendDtmf(1)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_one_per_kind() {
        let mut queue = ActionQueue::new();
        assert!(queue.push(QueuedAction::SendDtmf(1)));
        assert!(!queue.push(QueuedAction::SendDtmf(2)));
        assert_eq!(queue.len(), 1);

        queue.pop();
        assert!(queue.push(QueuedAction::SendDtmf(2)));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(QueuedAction::ExplicitCallTransfer.kind().as_str(), "EXPLICIT_CALL_TRANSFER");
        assert_eq!(
            QueuedAction::SetAudioPolicy(AudioPolicy::default()).kind(),
            ActionKind::SetAudioPolicy
        );
    }
}
