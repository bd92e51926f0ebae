// Verify the JSON wire format both legs produce and accept. Agents and
// relays upgrade independently, so these shapes must never drift.

use vigil_core::types::Severity;
use vigil_protocol::frames::{AgentMessage, RawFrame, RelayMessage};
use vigil_protocol::telemetry::TelemetrySnapshot;

#[test]
fn status_update_round_trip() {
    let json = r#"{"type":"status_update","status":{"streamer":{"connected":true,"streaming":true,"recording":false,"fps":30.0,"bitrate":4500.0,"cpuUsage":12.5}}}"#;
    let frame: RawFrame = serde_json::from_str(json).unwrap();
    assert_eq!(frame.frame_type, "status_update");

    let msg = frame.as_agent_message().unwrap();
    let AgentMessage::StatusUpdate { status } = msg else {
        panic!("expected status_update");
    };
    let streamer = status.streamer.unwrap();
    assert!(streamer.streaming);
    assert_eq!(streamer.bitrate, 4500.0);
}

#[test]
fn alert_uses_camel_case_alert_type() {
    let msg = AgentMessage::Alert {
        message: "Stream stopped unexpectedly".into(),
        severity: Severity::Critical,
        alert_type: Some("stream_stopped".into()),
        context: None,
    };
    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains(r#""type":"alert""#));
    assert!(json.contains(r#""severity":"critical""#));
    assert!(json.contains(r#""alertType":"stream_stopped""#));
    // absent optionals must not serialize
    assert!(!json.contains("context"));
}

#[test]
fn command_result_error_shape() {
    let json = r#"{"type":"command_result","id":"c-1","command":"switcher.cut","error":"device_unreachable"}"#;
    let frame: RawFrame = serde_json::from_str(json).unwrap();
    let AgentMessage::CommandResult { id, result, error, .. } =
        frame.as_agent_message().unwrap()
    else {
        panic!("expected command_result");
    };
    assert_eq!(id, "c-1");
    assert!(result.is_none());
    assert_eq!(error.as_deref(), Some("device_unreachable"));
}

#[test]
fn ping_has_no_payload() {
    let frame: RawFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
    assert!(matches!(
        frame.as_agent_message(),
        Some(AgentMessage::Ping)
    ));
    assert_eq!(serde_json::to_string(&AgentMessage::Ping).unwrap(), r#"{"type":"ping"}"#);
}

#[test]
fn command_to_agent_round_trip() {
    let json = r#"{"type":"command","id":"abc","command":"router.route","params":{"output":1,"input":4}}"#;
    let msg: RelayMessage = serde_json::from_str(json).unwrap();
    let RelayMessage::Command { id, command, params } = msg else {
        panic!("expected command");
    };
    assert_eq!(id, "abc");
    assert_eq!(command, "router.route");
    assert_eq!(params["output"], 1);
}

#[test]
fn connected_uses_camel_case_venue_id() {
    let msg = RelayMessage::Connected {
        venue_id: "v-42".into(),
        name: "Grace Chapel".into(),
    };
    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains(r#""type":"connected""#));
    assert!(json.contains(r#""venueId":"v-42""#));
}

#[test]
fn unknown_type_keeps_full_body() {
    let json = r#"{"type":"gpu_stats","vram":2048}"#;
    let frame: RawFrame = serde_json::from_str(json).unwrap();
    assert!(frame.as_agent_message().is_none());
    let value = frame.into_value();
    assert_eq!(value["type"], "gpu_stats");
    assert_eq!(value["vram"], 2048);
}

#[test]
fn empty_snapshot_serializes_to_empty_object() {
    let snap = TelemetrySnapshot::default();
    assert_eq!(serde_json::to_string(&snap).unwrap(), "{}");
    assert!(!snap.is_streaming());
}

#[test]
fn snapshot_sections_are_camel_case() {
    let json = r#"{"streamHealth":{"monitoring":true,"baselineBitrate":4000.0,"recentBitrate":3900.0},"system":{"hostname":"av-1","platform":"linux","uptimeSec":120,"name":"Main"}}"#;
    let snap: TelemetrySnapshot = serde_json::from_str(json).unwrap();
    assert!(snap.stream_health.unwrap().monitoring);
    assert_eq!(snap.system.unwrap().uptime_sec, 120);
}
