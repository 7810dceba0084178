//! Model descriptors: a name plus the opaque model-selection header.

use std::fmt;

use serde_json::json;

pub const MODEL_UNSPECIFIED: &str = "unspecified";

/// `(name, mode id)` for the models the web app offers.
const BUILTIN_MODES: [(&str, &str); 3] = [
    ("gemini-3.0-flash", "fbb127bbb056c959"),
    ("gemini-3.0-flash-thinking", "5bf011840784117a"),
    ("gemini-3.0-pro", "9d8ca3786ebdfbea"),
];

#[derive(Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    name: String,
    header: Option<String>,
}

impl ModelDescriptor {
    /// Server default; no model header is sent.
    pub fn unspecified() -> Self {
        Self {
            name: MODEL_UNSPECIFIED.to_owned(),
            header: None,
        }
    }

    /// A model selected by its mode id.
    pub fn from_mode(name: impl Into<String>, mode_id: &str) -> Self {
        Self::custom(name, mode_header(mode_id))
    }

    /// Any name with a caller-supplied header blob.
    pub fn custom(name: impl Into<String>, header: impl Into<String>) -> Self {
        let header = header.into();
        Self {
            name: name.into(),
            header: Some(header).filter(|blob| !blob.trim().is_empty()),
        }
    }

    /// Look up a built-in descriptor by name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.eq_ignore_ascii_case(MODEL_UNSPECIFIED) {
            return Some(Self::unspecified());
        }
        BUILTIN_MODES
            .iter()
            .find(|(builtin, _)| builtin.eq_ignore_ascii_case(name))
            .map(|(builtin, mode)| Self::from_mode(*builtin, mode))
    }

    pub fn builtins() -> Vec<Self> {
        std::iter::once(Self::unspecified())
            .chain(
                BUILTIN_MODES
                    .iter()
                    .map(|(name, mode)| Self::from_mode(*name, mode)),
            )
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    pub fn is_unspecified(&self) -> bool {
        self.header.is_none()
    }
}

impl Default for ModelDescriptor {
    fn default() -> Self {
        Self::unspecified()
    }
}

impl fmt::Debug for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelDescriptor").field(&self.name).finish()
    }
}

impl fmt::Display for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn mode_header(mode_id: &str) -> String {
    json!([1, null, null, null, mode_id, null, null, 0, [4], null, null, 3]).to_string()
}
