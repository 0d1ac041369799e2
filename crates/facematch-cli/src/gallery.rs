//! JSON-file store of enrolled face embeddings.

use facematch_core::{Embedding, EmbeddingRecord};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("gallery {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// A stored face model with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceModel {
    pub id: String,
    pub label: String,
    pub embedding: Embedding,
    pub created_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Gallery {
    pub models: Vec<FaceModel>,
}

impl Gallery {
    /// Read the gallery at `path`. A missing file is an empty gallery.
    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no gallery yet");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(GalleryError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&text).map_err(|source| GalleryError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the gallery to `path`, replacing the previous file atomically.
    pub fn save(&self, path: &Path) -> Result<(), GalleryError> {
        let io_err = |source| GalleryError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| GalleryError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    /// Enroll `embedding` under `label` and return the new model.
    pub fn add(&mut self, label: &str, embedding: Embedding) -> &FaceModel {
        self.models.push(FaceModel {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.to_string(),
            embedding,
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        &self.models[self.models.len() - 1]
    }

    /// Remove the model with `id`. Returns whether one was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.models.len();
        self.models.retain(|m| m.id != id);
        self.models.len() != before
    }

    pub fn get(&self, id: &str) -> Option<&FaceModel> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Candidate set for matching, in enrollment order.
    pub fn records(&self) -> Vec<EmbeddingRecord> {
        self.models
            .iter()
            .map(|m| EmbeddingRecord::new(m.id.clone(), m.embedding.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facematch_core::EmbeddingProvenance;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec(), EmbeddingProvenance::Genuine).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let g = Gallery::load(&dir.path().join("none.json")).unwrap();
        assert!(g.models.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/gallery.json");

        let mut g = Gallery::default();
        let id = g.add("ana", emb(&[0.6, 0.8])).id.clone();
        g.add("bruno", emb(&[1.0, 0.0]));
        g.save(&path).unwrap();

        let loaded = Gallery::load(&path).unwrap();
        assert_eq!(loaded.models.len(), 2);
        let ana = loaded.get(&id).unwrap();
        assert_eq!(ana.label, "ana");
        assert_eq!(ana.embedding.values(), &[0.6, 0.8]);
        assert!(chrono::DateTime::parse_from_rfc3339(&ana.created_at).is_ok());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_remove() {
        let mut g = Gallery::default();
        let id = g.add("ana", emb(&[1.0])).id.clone();
        assert!(!g.remove("unknown"));
        assert!(g.remove(&id));
        assert!(g.models.is_empty());
    }

    #[test]
    fn test_records_keep_order_and_ids() {
        let mut g = Gallery::default();
        let a = g.add("a", emb(&[1.0, 0.0])).id.clone();
        let b = g.add("b", emb(&[0.0, 1.0])).id.clone();
        let ids: Vec<String> = g.records().into_iter().map(|r| r.candidate_id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn test_corrupt_embedding_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        std::fs::write(
            &path,
            r#"{"models":[{"id":"1","label":"x","created_at":"","embedding":{"values":[],"provenance":"genuine"}}]}"#,
        )
        .unwrap();
        assert!(matches!(Gallery::load(&path), Err(GalleryError::Parse { .. })));
    }
}
