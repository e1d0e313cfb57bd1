//! Reference registry: name → face encoding, built once from a folder of
//! reference images and read-only afterwards.

use crate::matcher::{EncodeError, FaceEncoder};
use crate::types::Reference;
use image::ImageFormat;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("cannot read reference directory {path}: {source}")]
    ReadDir { path: PathBuf, source: io::Error },
    #[error("cannot decode reference image {path}: {source}")]
    Decode { path: PathBuf, source: image::ImageError },
    #[error("no face found in reference image {path}")]
    NoFace { path: PathBuf },
    #[error("cannot encode face in {path}: {source}")]
    Encode { path: PathBuf, source: EncodeError },
}

/// Immutable set of known faces, in sorted file-path order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<Reference>,
}

impl Registry {
    pub fn from_entries(entries: Vec<Reference>) -> Self {
        Self { entries }
    }

    /// Encode every reference image in `dir`.
    ///
    /// One entry per image file, named by file stem, using the most confident
    /// face in the image. An image without any face is an error naming that
    /// file.
    pub fn load_dir<E>(dir: &Path, encoder: &mut E) -> Result<Self, RegistryError>
    where
        E: FaceEncoder + ?Sized,
    {
        let paths = image_files(dir)?;
        tracing::info!(dir = %dir.display(), count = paths.len(), "reference images found");

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let image = image::open(&path)
                .map_err(|source| RegistryError::Decode { path: path.clone(), source })?
                .to_rgb8();

            let faces = encoder
                .locate(&image)
                .map_err(|source| RegistryError::Encode { path: path.clone(), source })?;
            let Some(face) = faces.first() else {
                return Err(RegistryError::NoFace { path });
            };
            if faces.len() > 1 {
                tracing::warn!(path = %path.display(), faces = faces.len(), "several faces in reference image, using the most confident");
            }

            let embedding = encoder
                .encode(&image, face)
                .map_err(|source| RegistryError::Encode { path: path.clone(), source })?;

            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            tracing::debug!(name, path = %path.display(), "reference encoded");

            entries.push(Reference { name, embedding, source: path });
        }

        tracing::info!(entries = entries.len(), "reference registry loaded");
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[Reference] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reference> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Image files directly inside `dir`, sorted by path. Hidden files and files
/// without a known image extension are skipped.
fn image_files(dir: &Path) -> Result<Vec<PathBuf>, RegistryError> {
    let read_err = |source| RegistryError::ReadDir { path: dir.to_path_buf(), source };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        let hidden = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'));
        if hidden || !path.is_file() {
            continue;
        }
        if ImageFormat::from_path(&path).is_err() {
            tracing::debug!(path = %path.display(), "skipping non-image file");
            continue;
        }
        paths.push(path);
    }
    paths.sort();
    Ok(paths)
}

/// Remove every file in `dir`, creating the directory if missing.
/// Returns the number of files removed.
pub fn clear_reference_dir(dir: &Path) -> io::Result<usize> {
    std::fs::create_dir_all(dir)?;
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
