//! Token artwork: decoding, placeholders and the tiered image caches.

pub mod cache;
pub mod decode;
pub mod defaults;
pub mod loader;

pub use cache::{DefaultArt, ImageCaches};
pub use decode::DecodedImage;
pub use defaults::{placeholder, NETWORK_ERROR_SLOT};
pub use loader::{ImageKey, ImageLoader, ImageOrigin, ImageReload, ImageSource, LoadedImage};
