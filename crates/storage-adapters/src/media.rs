//! # Local Image Store
//!
//! Advertisement creatives on the local filesystem, laid out as
//! `{root}/{slot}/{owner}-{id}.webp`. Uploads are decoded and re-encoded to
//! WebP; the file modification time drives the expiry sweep.

use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use domains::{image_file_name, AdId, DomainError, ImageSweepReport, ImageStore, Result, SlotType};
use tokio::fs;
use tracing::{debug, info, warn};

pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn slot_dir(&self, slot: SlotType) -> PathBuf {
        self.root.join(slot.as_str())
    }

    pub fn image_path(&self, slot: SlotType, owner_id: &str, id: AdId) -> PathBuf {
        self.slot_dir(slot).join(image_file_name(owner_id, id))
    }

    /// Creates the per-slot directories.
    pub async fn ensure_layout(&self) -> Result<()> {
        for slot in SlotType::ALL {
            fs::create_dir_all(self.slot_dir(slot)).await.map_err(DomainError::storage)?;
        }
        Ok(())
    }
}

/// Decodes any supported upload format and re-encodes it as WebP.
fn encode_webp(data: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)
        .map_err(|e| DomainError::ValidationError(format!("unreadable image: {e}")))?;
    // the WebP encoder only takes 8-bit buffers
    let img = image::DynamicImage::ImageRgba8(img.to_rgba8());
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::WebP)
        .map_err(DomainError::storage)?;
    Ok(out.into_inner())
}

fn set_mtime_now(path: &Path) -> std::io::Result<()> {
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_modified(SystemTime::now())
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn store(&self, slot: SlotType, owner_id: &str, id: AdId, data: Bytes) -> Result<()> {
        let webp = tokio::task::spawn_blocking(move || encode_webp(&data))
            .await
            .map_err(DomainError::storage)??;

        let path = self.image_path(slot, owner_id, id);
        fs::create_dir_all(self.slot_dir(slot)).await.map_err(DomainError::storage)?;
        fs::write(&path, &webp).await.map_err(DomainError::storage)?;
        debug!(path = %path.display(), bytes = webp.len(), "image stored");
        Ok(())
    }

    async fn remove(&self, slot: SlotType, owner_id: &str, id: AdId) -> Result<bool> {
        let path = self.image_path(slot, owner_id, id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DomainError::storage(e)),
        }
    }

    async fn touch(&self, slot: SlotType, owner_id: &str, id: AdId) -> Result<()> {
        let path = self.image_path(slot, owner_id, id);
        let target = path.clone();
        let result = tokio::task::spawn_blocking(move || set_mtime_now(&target))
            .await
            .map_err(DomainError::storage)?;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(DomainError::NotFound("image", path.display().to_string()))
            }
            Err(e) => Err(DomainError::storage(e)),
        }
    }

    async fn sweep_expired(&self, slot: SlotType, max_age: Duration) -> Result<ImageSweepReport> {
        let dir = self.slot_dir(slot);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "image directory missing, nothing to sweep");
                return Ok(ImageSweepReport::default());
            }
            Err(e) => return Err(DomainError::storage(e)),
        };

        let now = SystemTime::now();
        let mut report = ImageSweepReport::default();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "directory listing interrupted");
                    report.failed += 1;
                    break;
                }
            };
            let path = entry.path();

            let modified = match entry.metadata().await.and_then(|m| {
                if m.is_file() {
                    m.modified().map(Some)
                } else {
                    Ok(None)
                }
            }) {
                Ok(Some(modified)) => modified,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot stat image");
                    report.failed += 1;
                    continue;
                }
            };

            let age = now.duration_since(modified).unwrap_or_default();
            if age <= max_age {
                report.retained += 1;
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot remove expired image");
                    report.failed += 1;
                }
            }
        }

        if report.removed > 0 {
            info!(%slot, removed = report.removed, "expired images removed");
        }
        Ok(report)
    }
}
