//! Read-only lookup of official characters and their artwork.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::archive::{token_path, ScriptArchive};
use crate::error::{Result, ScriptError};
use crate::snapshot::CharacterData;

pub const ROLES_JSON: &str = "roles.json";

/// Source of truth for every id it recognizes.
///
/// Implementations must be shareable across async image loads.
pub trait CharacterRepository: Send + Sync {
    fn character(&self, id: &str) -> Option<CharacterData>;

    /// Raw PNG bytes for one token slot of an official character.
    fn image(&self, id: &str, slot: usize) -> Option<Vec<u8>>;

    fn is_official(&self, id: &str) -> bool {
        self.character(id).is_some()
    }
}

/// Official characters bundled with the application.
///
/// Loaded from a directory or archive holding `roles.json` (an array of
/// character objects) and `token/{id}/{slot}.png` images.
#[derive(Debug, Default)]
pub struct BundledRepository {
    characters: HashMap<String, CharacterData>,
    images: ScriptArchive,
}

impl BundledRepository {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_parts(characters: Vec<CharacterData>, images: ScriptArchive) -> Self {
        Self {
            characters: characters.into_iter().map(|c| (c.id.clone(), c)).collect(),
            images,
        }
    }

    pub fn from_archive(archive: ScriptArchive) -> Result<Self> {
        let roles = archive
            .get(ROLES_JSON)
            .ok_or_else(|| ScriptError::Custom(format!("official repository has no {ROLES_JSON}")))?;
        let characters: Vec<CharacterData> = serde_json::from_slice(roles)?;
        debug!(count = characters.len(), "Loaded official characters");
        Ok(Self::from_parts(characters, archive))
    }

    /// Opens a repository directory, or a zip file with the same layout.
    pub fn open(path: &Path) -> Result<Self> {
        if path.is_file() {
            return Self::from_archive(ScriptArchive::open(path)?);
        }

        let mut archive = ScriptArchive::new();
        archive.put(ROLES_JSON, std::fs::read(path.join(ROLES_JSON))?);
        let token_dir = path.join("token");
        if let Ok(ids) = std::fs::read_dir(&token_dir) {
            for id_dir in ids.flatten() {
                let id = id_dir.file_name().to_string_lossy().to_string();
                let Ok(files) = std::fs::read_dir(id_dir.path()) else {
                    continue;
                };
                for file in files.flatten() {
                    let name = file.file_name().to_string_lossy().to_string();
                    match std::fs::read(file.path()) {
                        Ok(bytes) => archive.put(&format!("token/{id}/{name}"), bytes),
                        Err(e) => warn!("Skipping unreadable official image {name} for {id}: {e}"),
                    }
                }
            }
        }
        Self::from_archive(archive)
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.characters.keys().map(String::as_str)
    }
}

impl CharacterRepository for BundledRepository {
    fn character(&self, id: &str) -> Option<CharacterData> {
        self.characters.get(id).cloned()
    }

    fn image(&self, id: &str, slot: usize) -> Option<Vec<u8>> {
        self.images.get(&token_path(id, slot)).map(<[u8]>::to_vec)
    }

    fn is_official(&self, id: &str) -> bool {
        self.characters.contains_key(id)
    }
}
