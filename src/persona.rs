//! Saved personas ("gems"): system-provided and user-created instructions.

use std::collections::BTreeMap;

use gemini_api::paths::{self, get_array, get_str};
use gemini_api::stream::RpcFrame;
use gemini_api::{BatchCall, Endpoint, ErrorKind, GeminiError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const LIST_RPC: &str = "CNgdBe";
pub const CREATE_RPC: &str = "oMH3Zd";
pub const UPDATE_RPC: &str = "kHv0Vd";
pub const DELETE_RPC: &str = "UXcSJb";

/// List visibility filters understood by the list RPC.
const VISIBILITY_SYSTEM: i64 = 3;
const VISIBILITY_SYSTEM_WITH_HIDDEN: i64 = 4;
const VISIBILITY_CUSTOM: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    /// Provided by the service rather than created by the user.
    pub predefined: bool,
}

/// Personas keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonaJar {
    personas: BTreeMap<String, Persona>,
}

impl PersonaJar {
    pub fn insert(&mut self, persona: Persona) {
        self.personas.insert(persona.id.clone(), persona);
    }

    pub fn get(&self, id: &str) -> Option<&Persona> {
        self.personas.get(id)
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Persona> {
        self.personas.values()
    }

    pub fn custom(&self) -> impl Iterator<Item = &Persona> {
        self.iter().filter(|persona| !persona.predefined)
    }

    pub fn system(&self) -> impl Iterator<Item = &Persona> {
        self.iter().filter(|persona| persona.predefined)
    }

    /// Case-insensitive name substring match.
    pub fn search<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Persona> + 'a {
        let needle = name.to_lowercase();
        self.iter()
            .filter(move |persona| persona.name.to_lowercase().contains(&needle))
    }
}

impl FromIterator<Persona> for PersonaJar {
    fn from_iter<I: IntoIterator<Item = Persona>>(iter: I) -> Self {
        let mut jar = Self::default();
        for persona in iter {
            jar.insert(persona);
        }
        jar
    }
}

/// Fields for creating or updating a persona.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonaDraft {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
}

impl PersonaDraft {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn fields(&self) -> Value {
        json!([
            self.name,
            self.description,
            self.system_prompt,
            null,
            null,
            null,
            null,
            null,
            0,
            null,
            1,
            null,
            null,
            null,
            []
        ])
    }
}

pub fn list_calls(include_hidden: bool) -> Vec<BatchCall> {
    let system = if include_hidden {
        VISIBILITY_SYSTEM_WITH_HIDDEN
    } else {
        VISIBILITY_SYSTEM
    };
    vec![
        BatchCall::new(LIST_RPC, json!([system])),
        BatchCall::new(LIST_RPC, json!([VISIBILITY_CUSTOM])),
    ]
}

pub fn create_call(draft: &PersonaDraft) -> BatchCall {
    BatchCall::new(CREATE_RPC, json!([draft.fields()]))
}

pub fn update_call(id: &str, draft: &PersonaDraft) -> BatchCall {
    let mut fields = draft.fields();
    if let Value::Array(items) = &mut fields {
        items.push(json!(0));
    }
    BatchCall::new(UPDATE_RPC, json!([id, fields]))
}

pub fn delete_call(id: &str) -> BatchCall {
    BatchCall::new(DELETE_RPC, json!([id]))
}

/// Collect every persona from the list RPC frames.
///
/// Replies arrive in call order: the first list frame answers the system
/// query from [`list_calls`], the second the custom one.
pub fn parse_list(frames: &[RpcFrame]) -> PersonaJar {
    frames
        .iter()
        .filter(|frame| frame.rpc_id == LIST_RPC)
        .enumerate()
        .flat_map(|(position, frame)| {
            let predefined = position == 0;
            frame
                .payload
                .as_ref()
                .and_then(|payload| get_array(payload, paths::PERSONA_LIST))
                .into_iter()
                .flatten()
                .filter_map(move |entry| parse_entry(entry, predefined))
        })
        .collect()
}

fn parse_entry(entry: &Value, predefined: bool) -> Option<Persona> {
    let id = get_str(entry, paths::PERSONA_ID).filter(|id| !id.is_empty())?;
    let non_empty = |path: paths::Path| {
        get_str(entry, path)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
    };
    Some(Persona {
        id: id.to_owned(),
        name: get_str(entry, paths::PERSONA_NAME).unwrap_or_default().to_owned(),
        description: non_empty(paths::PERSONA_DESCRIPTION),
        system_prompt: non_empty(paths::PERSONA_PROMPT),
        predefined,
    })
}

/// Id assigned by the create RPC.
pub fn parse_created(frames: &[RpcFrame], draft: &PersonaDraft) -> Result<Persona, GeminiError> {
    let id = frames
        .iter()
        .find(|frame| frame.rpc_id == CREATE_RPC)
        .and_then(|frame| frame.payload.as_ref())
        .and_then(|payload| get_str(payload, paths::CREATED_PERSONA_ID))
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            GeminiError::new(
                ErrorKind::Parse,
                Endpoint::Batch,
                "create persona reply carried no id",
            )
        })?;
    Ok(draft_to_persona(id, draft))
}

pub(crate) fn draft_to_persona(id: &str, draft: &PersonaDraft) -> Persona {
    let non_empty = |value: &str| Some(value.to_owned()).filter(|value| !value.is_empty());
    Persona {
        id: id.to_owned(),
        name: draft.name.clone(),
        description: non_empty(&draft.description),
        system_prompt: non_empty(&draft.system_prompt),
        predefined: false,
    }
}
