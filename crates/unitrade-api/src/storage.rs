use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use unitrade_types::api::ImageUpload;

/// Listing images must be strictly smaller than this.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            _ => None,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    fn matches_magic(self, data: &[u8]) -> bool {
        match self {
            Self::Jpeg => data.starts_with(&[0xFF, 0xD8, 0xFF]),
            Self::Png => data.starts_with(b"\x89PNG\r\n\x1a\n"),
        }
    }
}

/// A decoded upload that passed type and size checks.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub kind: ImageKind,
    pub bytes: Bytes,
}

/// Decode and check an uploaded image. The error is the message shown next
/// to the image field.
pub fn decode_image(upload: &ImageUpload) -> Result<ImageData, &'static str> {
    let kind = ImageKind::from_content_type(&upload.content_type).ok_or("Image must be a JPEG or PNG")?;
    let bytes = B64.decode(upload.data.trim()).map_err(|_| "Image data is not valid base64")?;
    if bytes.is_empty() {
        return Err("Image is required");
    }
    if bytes.len() >= MAX_IMAGE_BYTES {
        return Err("Image must be smaller than 5 MB");
    }
    if !kind.matches_magic(&bytes) {
        return Err("Image must be a JPEG or PNG");
    }
    Ok(ImageData { kind, bytes: Bytes::from(bytes) })
}

/// Result of [`ImageStorage::save`].
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub name: String,
    pub url: String,
    /// `false` when an identical image was already on disk.
    pub created: bool,
}

/// Listing images on local disk.
///
/// Files are content-addressed as `{storage_dir}/{sha256}.{ext}`, so the same
/// picture uploaded twice is stored once.
pub struct ImageStorage {
    dir: PathBuf,
    public_base: String,
}

impl ImageStorage {
    pub async fn new(dir: PathBuf, public_base: &str) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Image storage directory: {}", dir.display());
        Ok(Self { dir, public_base: public_base.trim_end_matches('/').to_string() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path to the file for a given image name.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn public_url(&self, name: &str) -> String {
        format!("{}/images/{}", self.public_base, name)
    }

    pub async fn save(&self, image: &ImageData) -> Result<StoredImage> {
        let digest = hex::encode(Sha256::digest(&image.bytes));
        let name = format!("{}.{}", digest, image.kind.extension());
        let path = self.file_path(&name);

        let created = match fs::try_exists(&path).await {
            Ok(true) => false,
            _ => {
                fs::write(&path, &image.bytes).await?;
                true
            }
        };

        info!("Stored image {} ({} bytes, new: {})", name, image.bytes.len(), created);
        Ok(StoredImage { url: self.public_url(&name), name, created })
    }

    /// Delete an image from disk.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = self.file_path(name);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted image {}", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Image {} already gone", name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
