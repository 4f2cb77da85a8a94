use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

use crate::model::Team;

use super::decode::DecodedImage;
use super::defaults::placeholder;

/// Placeholder art with the PNG bytes that get written back into archives.
#[derive(Debug)]
pub struct DefaultArt {
    pub image: Arc<DecodedImage>,
    pub png: Vec<u8>,
}

/// Application-lifetime image caches shared by every open document.
///
/// Both maps only ever grow. Inserts keep the first value stored for a key:
/// two loads racing on the same key decode identical bytes, so whichever
/// lands first wins and the other is dropped.
#[derive(Debug, Default)]
pub struct ImageCaches {
    official: RwLock<HashMap<(String, usize), Arc<DecodedImage>>>,
    defaults: RwLock<HashMap<(Team, i32), Arc<DefaultArt>>>,
}

impl ImageCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn official(&self, id: &str, slot: usize) -> Option<Arc<DecodedImage>> {
        read(&self.official).get(&(id.to_string(), slot)).cloned()
    }

    /// Stores an official image unless one is already cached; returns the
    /// cached value either way.
    pub fn insert_official(&self, id: &str, slot: usize, image: DecodedImage) -> Arc<DecodedImage> {
        write(&self.official)
            .entry((id.to_string(), slot))
            .or_insert_with(|| Arc::new(image))
            .clone()
    }

    pub fn default_art(&self, team: Team, slot: i32) -> Arc<DefaultArt> {
        if let Some(art) = read(&self.defaults).get(&(team, slot)) {
            return Arc::clone(art);
        }
        let image = placeholder(team, slot);
        let png = image.encode_png().unwrap_or_else(|e| {
            warn!("Could not encode placeholder for {team:?} slot {slot}: {e}");
            Vec::new()
        });
        let art = Arc::new(DefaultArt {
            image: Arc::new(image),
            png,
        });
        write(&self.defaults).entry((team, slot)).or_insert(art).clone()
    }

    pub fn official_count(&self) -> usize {
        read(&self.official).len()
    }

    pub fn default_count(&self) -> usize {
        read(&self.defaults).len()
    }
}

// Entries are immutable once inserted, so a poisoned lock still holds valid data.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
