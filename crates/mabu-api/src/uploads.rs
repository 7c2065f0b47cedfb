use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// 5 MB cap for chat images
pub const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;

/// URL prefix the upload directory is served under.
pub const PUBLIC_PREFIX: &str = "/uploads";

const CHAT_SUBDIR: &str = "chat";

/// On-disk store for chat images. Files land at `{root}/chat/{uuid}.{ext}`
/// and are referenced as `/uploads/chat/{uuid}.{ext}`.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub async fn new(root: PathBuf) -> anyhow::Result<Self> {
        fs::create_dir_all(root.join(CHAT_SUBDIR))
            .await
            .with_context(|| format!("Failed to create upload directory {}", root.display()))?;
        info!("Upload directory: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store an image and return its public reference.
    pub async fn save_image(&self, content_type: Option<&str>, bytes: &[u8]) -> ApiResult<String> {
        let ext = image_extension(content_type).ok_or(ApiError::UnsupportedMediaType)?;
        if bytes.is_empty() {
            return Err(ApiError::Validation("Image is empty".into()));
        }
        if bytes.len() > MAX_IMAGE_SIZE {
            return Err(ApiError::PayloadTooLarge);
        }

        let name = format!("{}.{}", Uuid::new_v4(), ext);
        let path = self.root.join(CHAT_SUBDIR).join(&name);

        let mut file = fs::File::create(&path)
            .await
            .with_context(|| format!("Failed to create file {}", path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("Failed to write file {}", path.display()))?;
        file.flush().await.context("Failed to flush image")?;

        debug!("Stored {} byte image at {}", bytes.len(), path.display());
        Ok(format!("{PUBLIC_PREFIX}/{CHAT_SUBDIR}/{name}"))
    }

    /// Remove an image stored by `save_image`, given its public reference.
    /// References outside the chat directory are refused.
    pub async fn remove_image(&self, url: &str) -> anyhow::Result<()> {
        let name = url
            .strip_prefix(PUBLIC_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|rest| rest.strip_prefix(CHAT_SUBDIR))
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|name| !name.is_empty() && !name.contains(['/', '\\']) && !name.starts_with('.'))
            .with_context(|| format!("Not a stored chat image: {url}"))?;

        let path = self.root.join(CHAT_SUBDIR).join(name);
        fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        debug!("Removed image {}", path.display());
        Ok(())
    }
}

/// Only raster formats browsers display inline.
fn image_extension(content_type: Option<&str>) -> Option<&'static str> {
    let mime = content_type?.split(';').next()?.trim().to_ascii_lowercase();
    match mime.as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}
