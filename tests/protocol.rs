//! Protocol integration tests
//!
//! Checks the wire shapes exchanged with the conversation server

use flow_assistant::protocol::{ToolStatus, parse_control};
use flow_assistant::session::{Directive, directives_for_text};
use flow_assistant::{ClientMessage, ControlMessage, ToolDispatcher};
use serde_json::{Value, json};
use tokio_test::assert_ok;

#[test]
fn start_conversation_round_trips() {
    let message = ClientMessage::start(
        "flow-service-assistant-amelia",
        "Europe/London",
        16000,
        ToolDispatcher::definitions(),
    );

    let text = assert_ok!(message.to_json());
    let decoded: ClientMessage = serde_json::from_str(&text).unwrap();
    assert_eq!(decoded, message);

    let json: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["message"], "StartConversation");
    assert_eq!(
        json["conversation_config"]["template_id"],
        "flow-service-assistant-amelia"
    );
    assert_eq!(
        json["conversation_config"]["template_variables"]["timezone"],
        "Europe/London"
    );
    assert_eq!(
        json["audio_format"],
        json!({"type": "raw", "encoding": "pcm_s16le", "sample_rate": 16000})
    );
    assert_eq!(json["tools"][0]["type"], "function");
    assert_eq!(json["tools"][0]["function"]["name"], "set_timer");
}

#[test]
fn tool_result_and_audio_ended_shapes() {
    let result = ClientMessage::ToolResult {
        id: "call-9".to_string(),
        status: ToolStatus::Failed,
        content: "Unknown tool 'x'".to_string(),
    };
    let json: Value = serde_json::from_str(&assert_ok!(result.to_json())).unwrap();
    assert_eq!(
        json,
        json!({"message": "ToolResult", "id": "call-9", "status": "failed", "content": "Unknown tool 'x'"})
    );

    let ended = ClientMessage::AudioEnded { last_seq_no: 42 };
    let json: Value = serde_json::from_str(&ended.to_json().unwrap()).unwrap();
    assert_eq!(json, json!({"message": "AudioEnded", "last_seq_no": 42}));
}

#[test]
fn one_frame_can_carry_several_messages() {
    let text = json!({
        "message": "Info",
        "event": {"status": "thinking"},
        "prompt": {"prompt": "set a timer", "response": "Sure"},
        "passive": true
    })
    .to_string();

    let messages = parse_control(&text).unwrap();
    assert_eq!(
        messages,
        vec![
            ControlMessage::Info {
                status: "thinking".to_string()
            },
            ControlMessage::Prompt {
                prompt: "set a timer".to_string(),
                response: "Sure".to_string()
            },
            ControlMessage::Passive(true),
        ]
    );
}

#[test]
fn unknown_and_malformed_frames_produce_no_directives() {
    assert!(directives_for_text(r#"{"message":"AddPartialTranscript"}"#).is_empty());
    assert!(directives_for_text("[1, 2, 3]").is_empty());
    assert!(directives_for_text("").is_empty());
}

#[test]
fn warning_ends_the_conversation() {
    assert_eq!(
        directives_for_text(r#"{"message":"Warning","reason":"session timeout"}"#),
        vec![Directive::End("Warning: session timeout".to_string())]
    );
}
