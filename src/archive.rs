//! The zip container a script is saved in.
//!
//! Layout:
//! - `script.json`
//! - `almanac.md`
//! - `token/{characterId}/{slot}.png`
//! - `script/logo.png`, `script/background.png`

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;

use crate::error::{Result, ScriptError};
use crate::snapshot::{ScriptSnapshot, ValidationIssue};
use crate::util::ensure_parent;

pub const SCRIPT_JSON: &str = "script.json";
pub const ALMANAC_MD: &str = "almanac.md";
pub const LOGO_PATH: &str = "script/logo.png";
pub const BACKGROUND_PATH: &str = "script/background.png";

/// Conventional archive path of a character's token image.
pub fn token_path(character_id: &str, slot: usize) -> String {
    format!("token/{character_id}/{slot}.png")
}

/// In-memory archive contents keyed by normalized path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScriptArchive {
    entries: BTreeMap<String, Vec<u8>>,
}

impl ScriptArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every file entry of a zip archive into memory.
    pub fn from_zip_bytes(bytes: &[u8]) -> Result<Self> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = BTreeMap::new();

        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = normalize_path(entry.name());
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            entries.insert(name, data);
        }

        Ok(Self { entries })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_zip_bytes(&bytes)
    }

    pub fn to_zip_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();

        for (name, data) in &self.entries {
            // PNGs are already compressed.
            let options = if name.ends_with(".png") {
                options.compression_method(zip::CompressionMethod::Stored)
            } else {
                options
            };
            writer.start_file(name.as_str(), options)?;
            writer.write_all(data)?;
        }

        Ok(writer.finish()?.into_inner())
    }

    /// Writes the archive next to `path` first and renames it into place, so a
    /// failed save never truncates the previous file.
    pub fn save(&self, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        let bytes = self.to_zip_bytes()?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.entries.get(&normalize_path(path)).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(&normalize_path(path))
    }

    pub fn put(&mut self, path: &str, data: Vec<u8>) {
        self.entries.insert(normalize_path(path), data);
    }

    pub fn remove(&mut self, path: &str) -> Option<Vec<u8>> {
        self.entries.remove(&normalize_path(path))
    }

    /// Copies one entry to another path. Returns false if `from` is missing.
    pub fn copy(&mut self, from: &str, to: &str) -> bool {
        match self.entries.get(&normalize_path(from)).cloned() {
            Some(data) => {
                self.put(to, data);
                true
            }
            None => false,
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Token image paths stored for one character.
    pub fn token_paths(&self, character_id: &str) -> Vec<String> {
        let prefix = format!("token/{character_id}/");
        self.entries
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// Parses `script.json` and attaches `almanac.md`.
    pub fn read_snapshot(&self) -> Result<(ScriptSnapshot, Vec<ValidationIssue>)> {
        let json = self
            .get(SCRIPT_JSON)
            .ok_or_else(|| ScriptError::Parse(format!("archive has no {SCRIPT_JSON}")))?;
        let json = std::str::from_utf8(json).map_err(|e| ScriptError::Parse(e.to_string()))?;
        let (mut snapshot, issues) = ScriptSnapshot::parse(json)?;
        if let Some(almanac) = self.get(ALMANAC_MD) {
            snapshot.almanac = String::from_utf8_lossy(almanac).into_owned();
        }
        Ok((snapshot, issues))
    }

    pub fn write_snapshot(&mut self, snapshot: &ScriptSnapshot) -> Result<()> {
        self.put(SCRIPT_JSON, snapshot.to_json()?.into_bytes());
        if snapshot.almanac.is_empty() {
            self.remove(ALMANAC_MD);
        } else {
            self.put(ALMANAC_MD, snapshot.almanac.clone().into_bytes());
        }
        Ok(())
    }
}

/// Archive entry name for `path`: forward slashes, no leading slash.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}
