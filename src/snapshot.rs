//! Immutable, serializable form of a script (`script.json`).
//!
//! The file is a JSON array. The `_meta` object carries script metadata,
//! night orders and jinxes; official characters appear as bare ids and
//! homebrew characters as full objects.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, ScriptError};
use crate::model::Team;

pub const META_ID: &str = "_meta";

/// A non-fatal problem found while reading a script.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    /// Index of the offending entry in the JSON array, when there is one.
    pub entry: Option<usize>,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(entry: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            entry,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entry {
            Some(i) => write!(f, "entry {i}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// One `special` element: an app-integration feature flag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpecialEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<String>,
}

impl SpecialEntry {
    pub fn new(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            value: None,
            time: None,
            global: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterData {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub team: Team,
    #[serde(default)]
    pub ability: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub edition: String,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub image: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub setup: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub first_night: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub first_night_reminder: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub other_night: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub other_night_reminder: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reminders: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reminders_global: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub special: Vec<SpecialEntry>,
}

impl CharacterData {
    pub fn new(id: impl Into<String>, name: impl Into<String>, team: Team) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            team,
            ability: String::new(),
            edition: String::new(),
            image: Vec::new(),
            setup: false,
            first_night: 0.0,
            first_night_reminder: String::new(),
            other_night: 0.0,
            other_night_reminder: String::new(),
            reminders: Vec::new(),
            reminders_global: Vec::new(),
            special: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JinxData {
    pub parent: String,
    pub child: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hide_title: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bootlegger: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub first_night: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_night: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct MetaWire {
    #[serde(default)]
    id: String,
    #[serde(flatten)]
    meta: MetaData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    jinxes: Vec<JinxData>,
}

/// A character as persisted: official ones by id only.
#[derive(Clone, Debug, PartialEq)]
pub enum CharacterEntry {
    Official(String),
    Custom(CharacterData),
}

impl CharacterEntry {
    pub fn id(&self) -> &str {
        match self {
            CharacterEntry::Official(id) => id,
            CharacterEntry::Custom(data) => &data.id,
        }
    }
}

/// Everything needed to rebuild a script document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScriptSnapshot {
    pub meta: MetaData,
    /// Stored next to `script.json` as `almanac.md`, not inside it.
    pub almanac: String,
    pub characters: Vec<CharacterEntry>,
    pub jinxes: Vec<JinxData>,
}

impl ScriptSnapshot {
    /// Parses `script.json`.
    ///
    /// Malformed JSON or a root that is not an array is fatal. Anything wrong
    /// with a single entry is reported and that entry skipped.
    pub fn parse(json: &str) -> Result<(ScriptSnapshot, Vec<ValidationIssue>)> {
        let root: Value = serde_json::from_str(json).map_err(|e| ScriptError::Parse(e.to_string()))?;
        let Value::Array(entries) = root else {
            return Err(ScriptError::Parse("script must be a JSON array".into()));
        };

        let mut snapshot = ScriptSnapshot::default();
        let mut issues = Vec::new();
        let mut seen_meta = false;

        for (index, entry) in entries.into_iter().enumerate() {
            match entry {
                Value::String(id) if id == META_ID => {}
                Value::String(id) if id.trim().is_empty() => {
                    issues.push(ValidationIssue::new(Some(index), "empty character id"));
                }
                Value::String(id) => snapshot.characters.push(CharacterEntry::Official(id)),
                Value::Object(map) if map.get("id").and_then(Value::as_str) == Some(META_ID) => {
                    if seen_meta {
                        issues.push(ValidationIssue::new(Some(index), "duplicate _meta entry ignored"));
                        continue;
                    }
                    seen_meta = true;
                    match serde_json::from_value::<MetaWire>(Value::Object(map)) {
                        Ok(wire) => {
                            snapshot.meta = wire.meta;
                            snapshot.jinxes = wire.jinxes;
                        }
                        Err(e) => issues.push(ValidationIssue::new(Some(index), format!("bad _meta: {e}"))),
                    }
                }
                Value::Object(map) => match parse_character(map) {
                    Ok(character) => snapshot.characters.push(character),
                    Err(message) => issues.push(ValidationIssue::new(Some(index), message)),
                },
                other => issues.push(ValidationIssue::new(
                    Some(index),
                    format!("expected a character id or object, found {other}"),
                )),
            }
        }

        Ok((snapshot, issues))
    }

    pub fn to_value(&self) -> Result<Value> {
        let mut entries = Vec::with_capacity(self.characters.len() + 1);
        entries.push(serde_json::to_value(MetaWire {
            id: META_ID.to_string(),
            meta: self.meta.clone(),
            jinxes: self.jinxes.clone(),
        })?);
        for character in &self.characters {
            entries.push(match character {
                CharacterEntry::Official(id) => Value::String(id.clone()),
                CharacterEntry::Custom(data) => serde_json::to_value(data)?,
            });
        }
        Ok(Value::Array(entries))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_value()?)?)
    }
}

fn parse_character(map: Map<String, Value>) -> std::result::Result<CharacterEntry, String> {
    let id = match map.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        _ => return Err("character has no id".into()),
    };
    // `{ "id": "washerwoman" }` is the long form of an official reference.
    if map.len() == 1 {
        return Ok(CharacterEntry::Official(id));
    }
    serde_json::from_value::<CharacterData>(Value::Object(map))
        .map(CharacterEntry::Custom)
        .map_err(|e| format!("bad character '{id}': {e}"))
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}
