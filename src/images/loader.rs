use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::StreamExt;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::archive::{token_path, ScriptArchive};
use crate::error::{Result, ScriptError};
use crate::model::{Character, Team};
use crate::repository::CharacterRepository;
use crate::util::is_url;

use super::cache::ImageCaches;
use super::decode::DecodedImage;
use super::defaults::NETWORK_ERROR_SLOT;

/// Where the bytes for an image come from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ImageSource {
    /// A path inside the script archive.
    Archive(String),
    /// A remote image. When `persist_to` is set, fetched bytes are stored at
    /// that archive path and later loads read them from there.
    Url {
        url: String,
        persist_to: Option<String>,
    },
    /// An official character's artwork, by character id.
    Official(String),
}

/// Everything needed to resolve one image, including the team and slot whose
/// placeholder stands in when there is nothing to load.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub source: ImageSource,
    pub team: Team,
    pub slot: usize,
}

impl ImageKey {
    pub fn archive(path: impl Into<String>, team: Team, slot: usize) -> Self {
        Self {
            source: ImageSource::Archive(path.into()),
            team,
            slot,
        }
    }

    /// Key for one token slot of a character.
    pub fn for_character(character: &Character, slot: usize, official: bool) -> Self {
        let id = character.id();
        let source = if official {
            ImageSource::Official(id)
        } else {
            match character.image(slot) {
                Some(url) if is_url(&url) => ImageSource::Url {
                    url,
                    persist_to: Some(token_path(&id, slot)),
                },
                Some(path) => ImageSource::Archive(path),
                None => ImageSource::Archive(token_path(&id, slot)),
            }
        };
        Self {
            source,
            team: character.team(),
            slot,
        }
    }

    /// Logical path the per-document cache files this image under.
    pub fn cache_key(&self) -> String {
        match &self.source {
            ImageSource::Archive(path) => path.clone(),
            ImageSource::Url {
                persist_to: Some(path),
                ..
            } => path.clone(),
            ImageSource::Url { url, .. } => url.clone(),
            ImageSource::Official(id) => format!("official:{id}/{}", self.slot),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageOrigin {
    /// Decoded from real artwork.
    Stored,
    /// A team placeholder. `slot` is [`NETWORK_ERROR_SLOT`] when a fetch failed.
    Default { team: Team, slot: i32 },
}

#[derive(Clone, Debug)]
pub struct LoadedImage {
    pub image: Arc<DecodedImage>,
    pub origin: ImageOrigin,
}

impl LoadedImage {
    fn stored(image: Arc<DecodedImage>) -> Self {
        Self {
            image,
            origin: ImageOrigin::Stored,
        }
    }

    fn placeholder(image: Arc<DecodedImage>, team: Team, slot: i32) -> Self {
        Self {
            image,
            origin: ImageOrigin::Default { team, slot },
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.origin, ImageOrigin::Default { .. })
    }

    pub fn is_network_error(&self) -> bool {
        matches!(
            self.origin,
            ImageOrigin::Default {
                slot: NETWORK_ERROR_SLOT,
                ..
            }
        )
    }
}

/// Broadcast when stored artwork changes. `path: None` means reload everything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageReload {
    pub path: Option<String>,
}

/// Resolves and caches the images of one document.
///
/// Cheap to clone; clones share the archive, cache and version counter, so
/// image work can be spawned onto the runtime while the document stays on
/// the UI thread.
#[derive(Clone)]
pub struct ImageLoader {
    inner: Arc<LoaderInner>,
}

struct LoaderInner {
    archive: Mutex<ScriptArchive>,
    cache: Mutex<HashMap<String, LoadedImage>>,
    shared: Arc<ImageCaches>,
    repository: Arc<dyn CharacterRepository>,
    http: reqwest::Client,
    max_bytes: u64,
    version: AtomicU64,
    reloads: broadcast::Sender<ImageReload>,
}

impl ImageLoader {
    pub fn new(
        archive: ScriptArchive,
        shared: Arc<ImageCaches>,
        repository: Arc<dyn CharacterRepository>,
        http: reqwest::Client,
        max_bytes: u64,
    ) -> Self {
        let (reloads, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(LoaderInner {
                archive: Mutex::new(archive),
                cache: Mutex::new(HashMap::new()),
                shared,
                repository,
                http,
                max_bytes,
                version: AtomicU64::new(0),
                reloads,
            }),
        }
    }

    /// Number of reload notifications raised so far.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ImageReload> {
        self.inner.reloads.subscribe()
    }

    pub fn with_archive<R>(&self, f: impl FnOnce(&ScriptArchive) -> R) -> R {
        f(&lock(&self.inner.archive))
    }

    /// Direct archive access. Callers that change image entries should follow
    /// up with [`ImageLoader::notify_reload`].
    pub fn with_archive_mut<R>(&self, f: impl FnOnce(&mut ScriptArchive) -> R) -> R {
        f(&mut lock(&self.inner.archive))
    }

    pub fn is_cached(&self, key: &ImageKey) -> bool {
        lock(&self.inner.cache).contains_key(&key.cache_key())
    }

    /// Resolves an image. Never fails; anything that cannot be loaded comes
    /// back as a placeholder.
    pub async fn get_image(&self, key: &ImageKey) -> LoadedImage {
        let cache_key = key.cache_key();
        // Official art lives in the app-wide cache instead.
        if !matches!(key.source, ImageSource::Official(_)) {
            if let Some(hit) = lock(&self.inner.cache).get(&cache_key).cloned() {
                return hit;
            }
        }

        match &key.source {
            ImageSource::Official(id) => self.load_official(id, key).await,
            ImageSource::Url {
                url,
                persist_to: Some(path),
            } if !self.with_archive(|a| a.contains(path)) => self.load_url(url, Some(path), key).await,
            ImageSource::Url { persist_to: Some(path), .. } => self.load_archive(path, key).await,
            ImageSource::Url { url, persist_to: None } => self.load_url(url, None, key).await,
            ImageSource::Archive(path) => self.load_archive(path, key).await,
        }
    }

    /// Loads an optional script image such as the logo. Missing images stay
    /// missing instead of falling back to a placeholder.
    pub async fn get_optional(&self, reference: &str) -> Option<LoadedImage> {
        if let Some(hit) = lock(&self.inner.cache).get(reference).cloned() {
            return Some(hit);
        }
        let bytes = if is_url(reference) {
            match self.fetch(reference).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Could not fetch {reference}: {e}");
                    return None;
                }
            }
        } else {
            self.with_archive(|a| a.get(reference).map(<[u8]>::to_vec))?
        };
        match decode(bytes).await {
            Ok(image) => Some(self.remember(reference, LoadedImage::stored(Arc::new(image)))),
            Err(e) => {
                warn!("Image {reference} could not be decoded: {e}");
                None
            }
        }
    }

    /// Replaces the artwork stored at `path` and notifies observers.
    pub fn set_image(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let image = DecodedImage::decode_png(&bytes)?;
        self.with_archive_mut(|a| a.put(path, bytes));
        self.notify_reload(Some(path.to_string()));
        self.remember(path, LoadedImage::stored(Arc::new(image)));
        Ok(())
    }

    pub fn remove_image(&self, path: &str) -> bool {
        let removed = self.with_archive_mut(|a| a.remove(path)).is_some();
        if removed {
            self.notify_reload(Some(path.to_string()));
        }
        removed
    }

    /// Drops cached state for `path` (or everything) and tells observers.
    pub fn notify_reload(&self, path: Option<String>) {
        {
            let mut cache = lock(&self.inner.cache);
            match &path {
                Some(p) => {
                    cache.remove(p);
                }
                None => cache.clear(),
            }
        }
        self.inner.version.fetch_add(1, Ordering::SeqCst);
        // No receivers is fine.
        let _ = self.inner.reloads.send(ImageReload { path });
    }

    pub fn reload_all(&self) {
        self.notify_reload(None);
    }

    fn remember(&self, cache_key: &str, loaded: LoadedImage) -> LoadedImage {
        lock(&self.inner.cache).insert(cache_key.to_string(), loaded.clone());
        loaded
    }

    async fn load_archive(&self, path: &str, key: &ImageKey) -> LoadedImage {
        let bytes = self.with_archive(|a| a.get(path).map(<[u8]>::to_vec));
        match bytes {
            Some(bytes) => match decode(bytes).await {
                Ok(image) => return self.remember(path, LoadedImage::stored(Arc::new(image))),
                Err(e) => warn!("Image {path} could not be decoded, replacing with default: {e}"),
            },
            None => debug!("No image at {path}, using default"),
        }

        let slot = key.slot as i32;
        let art = self.inner.shared.default_art(key.team, slot);
        // Persist so the next load of this document sees the same art.
        self.with_archive_mut(|a| a.put(path, art.png.clone()));
        self.remember(path, LoadedImage::placeholder(Arc::clone(&art.image), key.team, slot))
    }

    async fn load_url(&self, url: &str, persist_to: Option<&str>, key: &ImageKey) -> LoadedImage {
        let cache_key = key.cache_key();
        let bytes = match self.fetch(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Could not fetch {url}: {e}");
                let art = self.inner.shared.default_art(key.team, NETWORK_ERROR_SLOT);
                // Not cached: the next request retries the network.
                return LoadedImage::placeholder(Arc::clone(&art.image), key.team, NETWORK_ERROR_SLOT);
            }
        };

        match decode(bytes.clone()).await {
            Ok(image) => {
                if let Some(path) = persist_to {
                    self.with_archive_mut(|a| a.put(path, bytes));
                }
                self.remember(&cache_key, LoadedImage::stored(Arc::new(image)))
            }
            Err(e) => {
                warn!("Image from {url} could not be decoded: {e}");
                let slot = key.slot as i32;
                let art = self.inner.shared.default_art(key.team, slot);
                self.remember(&cache_key, LoadedImage::placeholder(Arc::clone(&art.image), key.team, slot))
            }
        }
    }

    async fn load_official(&self, id: &str, key: &ImageKey) -> LoadedImage {
        let shared = &self.inner.shared;
        if let Some(image) = shared.official(id, key.slot) {
            return LoadedImage::stored(image);
        }

        if let Some(bytes) = self.inner.repository.image(id, key.slot) {
            match decode(bytes).await {
                Ok(image) => return LoadedImage::stored(shared.insert_official(id, key.slot, image)),
                Err(e) => warn!("Official image {id}/{} could not be decoded: {e}", key.slot),
            }
        } else {
            debug!("No official image for {id} slot {}", key.slot);
        }

        let slot = key.slot as i32;
        let art = shared.default_art(key.team, slot);
        LoadedImage::placeholder(Arc::clone(&art.image), key.team, slot)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.inner.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ScriptError::Custom(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        let max = self.inner.max_bytes;
        if response.content_length().is_some_and(|len| len > max) {
            return Err(ScriptError::Custom(format!("{url} is larger than {max} bytes")));
        }

        let mut stream = response.bytes_stream();
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            data.extend_from_slice(&chunk);
            if data.len() as u64 > max {
                return Err(ScriptError::Custom(format!("{url} is larger than {max} bytes")));
            }
        }
        Ok(data)
    }
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

/// Decodes off the async executor.
async fn decode(bytes: Vec<u8>) -> Result<DecodedImage> {
    tokio::task::spawn_blocking(move || DecodedImage::decode_png(&bytes))
        .await
        .map_err(|e| ScriptError::Custom(e.to_string()))?
}

// A panic while holding one of these locks cannot leave a half-written entry.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::BundledRepository;
    use crate::snapshot::CharacterData;
    use std::time::Duration;

    fn png(rgba: [u8; 4]) -> Vec<u8> {
        DecodedImage {
            width: 1,
            height: 1,
            rgba: rgba.to_vec(),
        }
        .encode_png()
        .unwrap()
    }

    fn loader_with(archive: ScriptArchive, repository: BundledRepository) -> ImageLoader {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        ImageLoader::new(
            archive,
            Arc::new(ImageCaches::new()),
            Arc::new(repository),
            http,
            1024 * 1024,
        )
    }

    fn loader() -> ImageLoader {
        loader_with(ScriptArchive::new(), BundledRepository::empty())
    }

    #[tokio::test]
    async fn test_missing_image_falls_back_and_persists() {
        let loader = loader();
        let key = ImageKey::archive("token/gossip/1.png", Team::Townsfolk, 1);

        let first = loader.get_image(&key).await;
        assert_eq!(
            first.origin,
            ImageOrigin::Default {
                team: Team::Townsfolk,
                slot: 1
            }
        );
        assert!(loader.is_cached(&key));
        assert!(loader.with_archive(|a| a.contains("token/gossip/1.png")));

        let second = loader.get_image(&key).await;
        assert!(Arc::ptr_eq(&first.image, &second.image));

        // A fresh loader over the same archive reads the persisted default.
        let archive = loader.with_archive(|a| a.clone());
        let reopened = loader_with(archive, BundledRepository::empty());
        let third = reopened.get_image(&key).await;
        assert_eq!(third.origin, ImageOrigin::Stored);
        assert_eq!(*third.image, *first.image);
    }

    #[tokio::test]
    async fn test_stored_image_is_decoded() {
        let mut archive = ScriptArchive::new();
        archive.put("token/imp/0.png", png([1, 2, 3, 255]));
        let loader = loader_with(archive, BundledRepository::empty());
        let loaded = loader
            .get_image(&ImageKey::archive("token/imp/0.png", Team::Demon, 0))
            .await;
        assert_eq!(loaded.origin, ImageOrigin::Stored);
        assert_eq!(loaded.image.pixel(0, 0), Some([1, 2, 3, 255]));
    }

    #[tokio::test]
    async fn test_set_image_bumps_version_and_broadcasts() {
        let loader = loader();
        let mut reloads = loader.subscribe();
        assert_eq!(loader.version(), 0);

        loader.set_image("script/logo.png", png([9, 9, 9, 255])).unwrap();
        assert_eq!(loader.version(), 1);
        assert_eq!(
            reloads.recv().await.unwrap(),
            ImageReload {
                path: Some("script/logo.png".into())
            }
        );
        assert!(loader.get_optional("script/logo.png").await.is_some());

        assert!(loader.set_image("script/logo.png", b"junk".to_vec()).is_err());
        assert_eq!(loader.version(), 1);

        loader.reload_all();
        assert_eq!(loader.version(), 2);
        assert_eq!(reloads.recv().await.unwrap(), ImageReload { path: None });
    }

    #[tokio::test]
    async fn test_network_error_uses_negative_slot() {
        let loader = loader();
        let key = ImageKey {
            source: ImageSource::Url {
                url: "http://127.0.0.1:9/unreachable.png".into(),
                persist_to: Some("token/x/0.png".into()),
            },
            team: Team::Outsider,
            slot: 0,
        };
        let loaded = loader.get_image(&key).await;
        assert!(loaded.is_network_error());
        assert!(!loader.is_cached(&key));
        assert!(!loader.with_archive(|a| a.contains("token/x/0.png")));
    }

    #[tokio::test]
    async fn test_official_images_use_shared_cache() {
        let mut images = ScriptArchive::new();
        images.put("token/chef/0.png", png([5, 5, 5, 255]));
        let repo = BundledRepository::from_parts(
            vec![CharacterData::new("chef", "Chef", Team::Townsfolk)],
            images,
        );
        let shared = Arc::new(ImageCaches::new());
        let http = reqwest::Client::new();
        let loader = ImageLoader::new(ScriptArchive::new(), Arc::clone(&shared), Arc::new(repo), http, 1024);

        let chef = Character::new("chef", "Chef", Team::Townsfolk);
        let good = loader.get_image(&ImageKey::for_character(&chef, 0, true)).await;
        assert_eq!(good.origin, ImageOrigin::Stored);
        assert_eq!(shared.official_count(), 1);

        let evil = loader.get_image(&ImageKey::for_character(&chef, 1, true)).await;
        assert!(evil.is_placeholder());
        // Official art is never written into the script archive.
        assert!(loader.with_archive(|a| a.is_empty()));
    }

    #[test]
    fn test_key_for_homebrew_character() {
        let c = Character::new("hermit", "Hermit", Team::Outsider);
        c.set_image(0, "https://example.com/h.png").unwrap();
        let key = ImageKey::for_character(&c, 0, false);
        assert_eq!(
            key.source,
            ImageSource::Url {
                url: "https://example.com/h.png".into(),
                persist_to: Some("token/hermit/0.png".into())
            }
        );
        assert_eq!(key.cache_key(), "token/hermit/0.png");
        let key = ImageKey::for_character(&c, 1, false);
        assert_eq!(key.source, ImageSource::Archive("token/hermit/1.png".into()));
    }
}
