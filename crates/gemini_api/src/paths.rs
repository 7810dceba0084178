//! Positional paths into the service's nested arrays.
//!
//! Protocol drift must only ever require edits in this file.

use serde_json::Value;

pub type Path = &'static [usize];

// Outer stream frames: ["wrb.fr", rpcId, "<inner json>", null, null, [code], ..., identifier]
pub const FRAME_TAG: usize = 0;
pub const FRAME_RPC_ID: usize = 1;
pub const FRAME_INNER: usize = 2;
pub const FRAME_ERROR_CODE: Path = &[5, 0];
pub const FRAME_ERROR_CODE_NESTED: Path = &[5, 2, 0, 1, 0];
pub const WRB_TAG: &str = "wrb.fr";

// End frame: ["e", status, null, null, bytes]
pub const END_TAG: &str = "e";
pub const END_STATUS: usize = 1;

// Inner chat reply.
pub const CONVERSATION_ID: Path = &[1, 0];
pub const REPLY_ID: Path = &[1, 1];
pub const CANDIDATES: Path = &[4];

// Relative to one candidate.
pub const CANDIDATE_ID: Path = &[0];
pub const CANDIDATE_TEXT: Path = &[1, 0];
pub const CANDIDATE_CARD_TEXT: Path = &[22, 0, 0];
pub const CANDIDATE_THOUGHTS: Path = &[37, 0, 0];
pub const CANDIDATE_WEB_IMAGES: Path = &[4];
pub const CANDIDATE_GENERATED_IMAGES: Path = &[12, 7, 0];

// Relative to one image entry.
pub const WEB_IMAGE_URL: Path = &[0, 0, 0];
pub const WEB_IMAGE_ALT: Path = &[0, 4];
pub const WEB_IMAGE_TITLE: Path = &[7, 0];
pub const GENERATED_IMAGE_URL: Path = &[0, 3, 3];
pub const GENERATED_IMAGE_ALT: Path = &[3, 5, 0];
pub const GENERATED_IMAGE_NUMBER: Path = &[3, 6];

// Chat request inner array.
pub const ENVELOPE_MESSAGE: usize = 0;
pub const ENVELOPE_LANGUAGE: usize = 1;
pub const ENVELOPE_CONTEXT: usize = 2;
pub const ENVELOPE_ANTIBOT_TOKEN: usize = 3;
pub const ENVELOPE_PAYLOAD_HASH: usize = 4;
pub const ENVELOPE_PERSONA: usize = 19;
/// Slots before the optional conversation-metadata tail.
pub const ENVELOPE_FIXED_LEN: usize = 100;
pub const CONTEXT_LEN: usize = 10;
/// Index of the files array inside the message block.
pub const MESSAGE_FILES: usize = 4;

// Persona batch payloads.
pub const PERSONA_LIST: Path = &[2];
pub const PERSONA_ID: Path = &[0];
pub const PERSONA_NAME: Path = &[1, 0];
pub const PERSONA_DESCRIPTION: Path = &[1, 1];
pub const PERSONA_PROMPT: Path = &[2, 0];
pub const CREATED_PERSONA_ID: Path = &[0];

pub fn get<'a>(value: &'a Value, path: &[usize]) -> Option<&'a Value> {
    path.iter().try_fold(value, |node, index| node.get(*index))
}

pub fn get_str<'a>(value: &'a Value, path: &[usize]) -> Option<&'a str> {
    get(value, path).and_then(Value::as_str)
}

pub fn get_i64(value: &Value, path: &[usize]) -> Option<i64> {
    get(value, path).and_then(Value::as_i64)
}

pub fn get_array<'a>(value: &'a Value, path: &[usize]) -> Option<&'a Vec<Value>> {
    get(value, path).and_then(Value::as_array)
}

/// Write `new` at `path`, growing arrays with `null` padding as needed.
pub fn set(value: &mut Value, path: &[usize], new: Value) {
    let Some((last, parents)) = path.split_last() else {
        *value = new;
        return;
    };
    let mut node = value;
    for index in parents {
        node = slot(node, *index);
    }
    *slot(node, *last) = new;
}

fn slot(node: &mut Value, index: usize) -> &mut Value {
    if !node.is_array() {
        *node = Value::Array(Vec::new());
    }
    match node {
        Value::Array(items) => {
            if items.len() <= index {
                items.resize(index + 1, Value::Null);
            }
            &mut items[index]
        }
        other => other,
    }
}
