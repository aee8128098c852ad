//! The bundled replay trace must decode line by line.

use hfp_client::hfp::{DeviceAddress, Message, StackEvent, StackEventKind};
use serde_json::Value;

const TRACE: &str = include_str!("../traces/connect_and_call.jsonl");

#[test]
fn test_sample_trace_decodes() {
    let mut events = 0;
    let mut commands = 0;

    for line in TRACE.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let value: Value = serde_json::from_str(line).unwrap();
        if let Some(event) = value.get("event") {
            let event: StackEvent = serde_json::from_value(event.clone()).unwrap();
            assert_eq!(event.device.to_string(), "00:01:02:03:04:05");
            events += 1;
        } else if let Some(command) = value.get("command") {
            let _: DeviceAddress = serde_json::from_value(command["device"].clone()).unwrap();
            let _: Message = serde_json::from_value(command["message"].clone()).unwrap();
            commands += 1;
        } else {
            assert!(value.get("wait_ms").and_then(Value::as_u64).is_some(), "bad line {}", line);
        }
    }

    assert!(events > 10);
    assert!(commands >= 4);
}

#[test]
fn test_message_json_shapes() {
    let message: Message = serde_json::from_str(r#"{"accept_call": "hold"}"#).unwrap();
    assert_eq!(message.as_str(), "ACCEPT_CALL");

    let message: Message = serde_json::from_str(r#""query_current_calls""#).unwrap();
    assert_eq!(message, Message::QueryCurrentCalls);

    let event: StackEvent = serde_json::from_str(
        r#"{"device": "00:01:02:03:04:05", "type": "cmd_result", "code": {"cme_error": 30}}"#,
    )
    .unwrap();
    assert!(matches!(event.kind, StackEventKind::CmdResult { .. }));
}
