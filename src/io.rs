use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::OffsetDateTime;

use crate::capture::{CaptureMetadata, FusedCaptureRecord};
use crate::error::PersistenceError;
use crate::sources::{ExportReply, PersistenceSink, StoreReply, StoredAsset};
use crate::types::{MarkerMetadata, PhotoMarker};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Serializes an object to a pretty-printed JSON file.
pub fn object_to_json<T: Serialize>(output_path: &Path, object: &T) -> Result<(), PersistenceError> {
    let j = serde_json::to_string_pretty(object)?;
    fs::write(output_path, j)?;
    Ok(())
}

/// Deserializes an object from a JSON file.
pub fn object_from_json<T: DeserializeOwned>(file_path: &Path) -> Result<T, PersistenceError> {
    let contents = fs::read_to_string(file_path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Written by [`DirectorySink`] on export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    #[serde(with = "time::serde::rfc3339")]
    pub exported_at: OffsetDateTime,
    pub photo_count: usize,
    pub captures: Vec<CaptureMetadata>,
}

/// Dumps the marker set (without thumbnail pixels) to a JSON file.
pub fn write_marker_report(output_path: &Path, markers: &[PhotoMarker]) -> Result<(), PersistenceError> {
    let report: Vec<MarkerMetadata> = markers.iter().map(MarkerMetadata::from).collect();
    object_to_json(output_path, &report)
}

/// Stores each capture as `<id>.png` plus `<id>.json` under one directory
/// and exports a `manifest.json` listing the session.
pub struct DirectorySink {
    root: PathBuf,
    manifest: Vec<CaptureMetadata>,
}

impl DirectorySink {
    pub fn create(root: impl AsRef<Path>) -> Result<DirectorySink, PersistenceError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(DirectorySink {
            root,
            manifest: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stored(&self) -> &[CaptureMetadata] {
        &self.manifest
    }

    fn write_capture(&mut self, record: &FusedCaptureRecord) -> Result<StoredAsset, PersistenceError> {
        let image_name = format!("{}.png", record.id);
        let image_path = self.root.join(&image_name);
        record
            .image
            .save_with_format(&image_path, image::ImageFormat::Png)?;

        let mut metadata = record.metadata.clone();
        metadata.image_path = Some(image_name);
        if let Err(e) = object_to_json(&image_path.with_extension("json"), &metadata) {
            if let Err(remove) = fs::remove_file(&image_path) {
                warn!("could not remove {}: {}", image_path.display(), remove);
            }
            return Err(e);
        }
        self.manifest.push(metadata);
        debug!("stored {}", image_path.display());
        Ok(StoredAsset {
            image_path: image_path.to_string_lossy().into_owned(),
        })
    }

    fn write_manifest(&self) -> Result<PathBuf, PersistenceError> {
        let manifest = SessionManifest {
            exported_at: OffsetDateTime::now_utc(),
            photo_count: self.manifest.len(),
            captures: self.manifest.clone(),
        };
        object_to_json(&self.root.join(MANIFEST_FILE), &manifest)?;
        Ok(self.root.clone())
    }
}

impl PersistenceSink for DirectorySink {
    fn store(&mut self, record: FusedCaptureRecord, reply: StoreReply) {
        reply.send(self.write_capture(&record));
    }

    fn export_all(&mut self, reply: ExportReply) {
        reply.send(self.write_manifest());
    }

    fn discard(&mut self, asset: &StoredAsset) {
        let image_path = PathBuf::from(&asset.image_path);
        for path in [image_path.clone(), image_path.with_extension("json")] {
            if let Err(e) = fs::remove_file(&path) {
                warn!("cannot remove {}: {}", path.display(), e);
            }
        }
        let file_name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        self.manifest
            .retain(|m| m.image_path.as_deref() != file_name.as_deref());
    }

    fn reset_session(&mut self) {
        self.manifest.clear();
    }
}
