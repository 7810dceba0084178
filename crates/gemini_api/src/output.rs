use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::paths::{self, get_array, get_str};

/// Canonical reply the service substitutes for refused prompts.
pub const SAFETY_REFUSAL: &str = "I'm a text-based AI, and that is outside of my capabilities.";

const CARD_PLACEHOLDER_PREFIX: &str = "http://googleusercontent.com/card_content/";
const GENERATED_TITLE_PREFIX: &str = "[Generated Image ";
const UPSCALE_SUFFIX: &str = "=s2048";

fn card_placeholder_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"^http://googleusercontent\.com/card_content/\d+$")
            .expect("card regex must compile")
    })
}

fn search_redirect_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"^(https?://(www\.)?google\.[a-z.]+/search\?\S+|http://googleusercontent\.com/search_content/\d+)$")
            .expect("search redirect regex must compile")
    })
}

/// Opaque identifiers threading one conversation across turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub conversation_id: String,
    pub reply_id: String,
    pub reply_candidate_id: String,
}

impl ConversationMetadata {
    pub fn new(
        conversation_id: impl Into<String>,
        reply_id: impl Into<String>,
        reply_candidate_id: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            reply_id: reply_id.into(),
            reply_candidate_id: reply_candidate_id.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conversation_id.is_empty()
            && self.reply_id.is_empty()
            && self.reply_candidate_id.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        !self.conversation_id.is_empty()
            && !self.reply_id.is_empty()
            && !self.reply_candidate_id.is_empty()
    }

    /// Wire form appended to the chat envelope.
    pub fn to_value(&self) -> Value {
        json!([
            self.conversation_id,
            self.reply_id,
            self.reply_candidate_id
        ])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebImage {
    pub url: String,
    pub title: String,
    pub alt: String,
}

/// Image produced by the model; its URL may be rewritten to request a larger rendition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    pub title: String,
    pub alt: String,
    pub upscalable: bool,
}

impl GeneratedImage {
    /// Full-size URL when upscaling is permitted, otherwise the URL as served.
    pub fn full_size_url(&self) -> String {
        if self.upscalable && !self.url.ends_with(UPSCALE_SUFFIX) {
            format!("{}{UPSCALE_SUFFIX}", self.url)
        } else {
            self.url.clone()
        }
    }
}

/// One alternative reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
    #[serde(default)]
    pub web_images: Vec<WebImage>,
    #[serde(default)]
    pub generated_images: Vec<GeneratedImage>,
}

impl Candidate {
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Decoded reply for one chat turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub metadata: ConversationMetadata,
    pub candidates: Vec<Candidate>,
    pub chosen_index: usize,
    pub is_extension_reply: bool,
}

impl ModelOutput {
    /// The selected candidate; out-of-range selections fall back to the first.
    pub fn chosen(&self) -> Option<&Candidate> {
        self.candidates
            .get(self.chosen_index)
            .or_else(|| self.candidates.first())
    }

    pub fn text(&self) -> &str {
        self.chosen().map(|candidate| candidate.text.as_str()).unwrap_or("")
    }

    pub fn thoughts(&self) -> Option<&str> {
        self.chosen().and_then(|candidate| candidate.thoughts.as_deref())
    }

    pub fn web_images(&self) -> &[WebImage] {
        self.chosen()
            .map(|candidate| candidate.web_images.as_slice())
            .unwrap_or(&[])
    }

    pub fn generated_images(&self) -> &[GeneratedImage] {
        self.chosen()
            .map(|candidate| candidate.generated_images.as_slice())
            .unwrap_or(&[])
    }

    /// Select another candidate and re-thread the candidate id.
    ///
    /// Returns `false` and leaves the output untouched when `index` is out of range.
    pub fn select(&mut self, index: usize) -> bool {
        let Some(candidate) = self.candidates.get(index) else {
            return false;
        };
        self.metadata.reply_candidate_id = candidate.candidate_id.clone();
        self.chosen_index = index;
        true
    }

    pub fn has_text(&self) -> bool {
        self.candidates.iter().any(Candidate::has_text)
    }
}

/// Exact safety refusal or a bare redirect-to-search reply.
pub fn is_blocked_reply(text: &str) -> bool {
    let text = text.trim();
    text == SAFETY_REFUSAL || search_redirect_regex().is_match(text)
}

/// Project a parsed inner reply into a [`ModelOutput`]; `None` without candidates.
pub fn project_inner(inner: &Value) -> Option<ModelOutput> {
    let raw_candidates = get_array(inner, paths::CANDIDATES)?;
    let mut is_extension_reply = false;
    let candidates = raw_candidates
        .iter()
        .filter_map(|raw| {
            let (candidate, from_card) = project_candidate(raw)?;
            is_extension_reply |= from_card;
            Some(candidate)
        })
        .collect::<Vec<_>>();
    if candidates.is_empty() {
        return None;
    }

    let mut output = ModelOutput {
        metadata: ConversationMetadata {
            conversation_id: get_str(inner, paths::CONVERSATION_ID)
                .unwrap_or_default()
                .to_owned(),
            reply_id: get_str(inner, paths::REPLY_ID).unwrap_or_default().to_owned(),
            reply_candidate_id: String::new(),
        },
        candidates,
        chosen_index: 0,
        is_extension_reply,
    };
    output.select(0);
    Some(output)
}

fn project_candidate(raw: &Value) -> Option<(Candidate, bool)> {
    let candidate_id = get_str(raw, paths::CANDIDATE_ID)?.to_owned();
    let primary = get_str(raw, paths::CANDIDATE_TEXT).unwrap_or_default();
    let card = get_str(raw, paths::CANDIDATE_CARD_TEXT).filter(|text| !text.is_empty());
    let thoughts = get_str(raw, paths::CANDIDATE_THOUGHTS)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned);
    let is_card = card_placeholder_regex().is_match(primary);

    let (text, from_card) = match card {
        Some(card) if is_card => (card, true),
        Some(card) if primary.is_empty() || thoughts.is_some() => (card, false),
        _ => (primary, false),
    };

    Some((
        Candidate {
            candidate_id,
            text: text.to_owned(),
            thoughts,
            web_images: project_web_images(raw),
            generated_images: project_generated_images(raw),
        },
        from_card,
    ))
}

fn project_web_images(raw: &Value) -> Vec<WebImage> {
    get_array(raw, paths::CANDIDATE_WEB_IMAGES)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    Some(WebImage {
                        url: get_str(entry, paths::WEB_IMAGE_URL)?.to_owned(),
                        title: get_str(entry, paths::WEB_IMAGE_TITLE)
                            .unwrap_or_default()
                            .to_owned(),
                        alt: get_str(entry, paths::WEB_IMAGE_ALT)
                            .unwrap_or_default()
                            .to_owned(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn project_generated_images(raw: &Value) -> Vec<GeneratedImage> {
    get_array(raw, paths::CANDIDATE_GENERATED_IMAGES)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let number = match paths::get(entry, paths::GENERATED_IMAGE_NUMBER) {
                        Some(Value::String(number)) => number.clone(),
                        Some(Value::Number(number)) => number.to_string(),
                        _ => String::new(),
                    };
                    Some(GeneratedImage {
                        url: get_str(entry, paths::GENERATED_IMAGE_URL)?.to_owned(),
                        title: format!("{GENERATED_TITLE_PREFIX}{number}]"),
                        alt: get_str(entry, paths::GENERATED_IMAGE_ALT)
                            .unwrap_or_default()
                            .to_owned(),
                        upscalable: true,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Encode a [`ModelOutput`] back into the inner array the service sends.
///
/// Faithful for outputs produced by [`project_inner`] with the first candidate
/// selected; generated-image titles must use the `[Generated Image N]` form.
pub fn encode_inner(output: &ModelOutput) -> Value {
    let mut inner = Value::Array(Vec::new());
    paths::set(
        &mut inner,
        paths::CONVERSATION_ID,
        json!(output.metadata.conversation_id),
    );
    paths::set(&mut inner, paths::REPLY_ID, json!(output.metadata.reply_id));

    let candidates = output
        .candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| encode_candidate(index, candidate, output.is_extension_reply))
        .collect::<Vec<_>>();
    paths::set(&mut inner, paths::CANDIDATES, Value::Array(candidates));
    inner
}

fn encode_candidate(index: usize, candidate: &Candidate, extension: bool) -> Value {
    let mut raw = Value::Array(Vec::new());
    paths::set(&mut raw, paths::CANDIDATE_ID, json!(candidate.candidate_id));
    if extension {
        paths::set(
            &mut raw,
            paths::CANDIDATE_TEXT,
            json!(format!("{CARD_PLACEHOLDER_PREFIX}{index}")),
        );
        paths::set(&mut raw, paths::CANDIDATE_CARD_TEXT, json!(candidate.text));
    } else {
        paths::set(&mut raw, paths::CANDIDATE_TEXT, json!(candidate.text));
    }
    if let Some(thoughts) = &candidate.thoughts {
        paths::set(&mut raw, paths::CANDIDATE_THOUGHTS, json!(thoughts));
    }

    if !candidate.web_images.is_empty() {
        let images = candidate
            .web_images
            .iter()
            .map(|image| {
                let mut entry = Value::Array(Vec::new());
                paths::set(&mut entry, paths::WEB_IMAGE_URL, json!(image.url));
                paths::set(&mut entry, paths::WEB_IMAGE_ALT, json!(image.alt));
                paths::set(&mut entry, paths::WEB_IMAGE_TITLE, json!(image.title));
                entry
            })
            .collect();
        paths::set(&mut raw, paths::CANDIDATE_WEB_IMAGES, Value::Array(images));
    }

    if !candidate.generated_images.is_empty() {
        let images = candidate
            .generated_images
            .iter()
            .map(|image| {
                let number = image
                    .title
                    .strip_prefix(GENERATED_TITLE_PREFIX)
                    .and_then(|rest| rest.strip_suffix(']'))
                    .unwrap_or(image.title.as_str());
                let mut entry = Value::Array(Vec::new());
                paths::set(&mut entry, paths::GENERATED_IMAGE_URL, json!(image.url));
                paths::set(&mut entry, paths::GENERATED_IMAGE_ALT, json!(image.alt));
                paths::set(&mut entry, paths::GENERATED_IMAGE_NUMBER, json!(number));
                entry
            })
            .collect();
        paths::set(
            &mut raw,
            paths::CANDIDATE_GENERATED_IMAGES,
            Value::Array(images),
        );
    }

    raw
}
