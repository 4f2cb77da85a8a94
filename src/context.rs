use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::archive::ScriptArchive;
use crate::config::AppConfig;
use crate::error::Result;
use crate::images::{ImageCaches, ImageLoader};
use crate::repository::{BundledRepository, CharacterRepository};

/// Application-lifetime services shared by every open document: the official
/// repository, the app-wide image caches and one HTTP client.
#[derive(Clone)]
pub struct AppContext {
    repository: Arc<dyn CharacterRepository>,
    caches: Arc<ImageCaches>,
    http: reqwest::Client,
    max_image_bytes: u64,
}

impl AppContext {
    pub fn new(repository: Arc<dyn CharacterRepository>) -> Result<Self> {
        let defaults = AppConfig::default();
        Self::with_limits(
            repository,
            Duration::from_secs(defaults.http_timeout_secs),
            defaults.max_image_bytes,
        )
    }

    pub fn with_limits(
        repository: Arc<dyn CharacterRepository>,
        timeout: Duration,
        max_image_bytes: u64,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("botc-scripts/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            repository,
            caches: Arc::new(ImageCaches::new()),
            http,
            max_image_bytes,
        })
    }

    /// Builds the context described by the user's config. Without a
    /// configured repository every character is treated as homebrew.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let repository: Arc<dyn CharacterRepository> = match config.official_repository_path() {
            Some(path) => {
                let repo = BundledRepository::open(&path)?;
                info!(count = repo.len(), path = %path.display(), "Opened official repository");
                Arc::new(repo)
            }
            None => {
                warn!("No official repository configured");
                Arc::new(BundledRepository::empty())
            }
        };
        Self::with_limits(
            repository,
            Duration::from_secs(config.http_timeout_secs),
            config.max_image_bytes,
        )
    }

    pub fn repository(&self) -> &Arc<dyn CharacterRepository> {
        &self.repository
    }

    pub fn caches(&self) -> &Arc<ImageCaches> {
        &self.caches
    }

    /// A loader for one document's archive, backed by the shared caches.
    pub fn image_loader(&self, archive: ScriptArchive) -> ImageLoader {
        ImageLoader::new(
            archive,
            Arc::clone(&self.caches),
            Arc::clone(&self.repository),
            self.http.clone(),
            self.max_image_bytes,
        )
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("caches", &self.caches)
            .field("max_image_bytes", &self.max_image_bytes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documents_share_caches() {
        let ctx = AppContext::new(Arc::new(BundledRepository::empty())).unwrap();
        let a = ctx.clone();
        assert!(Arc::ptr_eq(a.caches(), ctx.caches()));
        ctx.caches().default_art(crate::model::Team::Demon, 0);
        assert_eq!(a.caches().default_count(), 1);
    }

    #[test]
    fn test_missing_repository_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            official_repository: Some(dir.path().join("nope").to_string_lossy().to_string()),
            ..AppConfig::default()
        };
        assert!(AppContext::from_config(&config).is_err());
        assert!(AppContext::from_config(&AppConfig::default()).is_ok());
    }
}
