//! On-disk training corpus: one directory per label, one image per sample.
//!
//! ```text
//! <root>/s0/0.png
//! <root>/s0/1.png
//! <root>/s1/0.png
//! ```

use crate::types::{Label, TrainingSample};
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix of every per-label directory name.
pub const LABEL_DIR_MARKER: &str = "s";
const SAMPLE_EXTENSION: &str = "png";

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("corpus io ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("image ({path}): {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Directory-backed store of labelled grayscale face samples.
#[derive(Debug, Clone)]
pub struct TrainingCorpus {
    root: PathBuf,
    sample_size: u32,
}

impl TrainingCorpus {
    pub fn new(root: impl Into<PathBuf>, sample_size: u32) -> Self {
        Self {
            root: root.into(),
            sample_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    pub fn label_dir(&self, label: Label) -> PathBuf {
        self.root.join(format!("{LABEL_DIR_MARKER}{label}"))
    }

    /// Store `face` as sample number `index` of `label`.
    ///
    /// Faces that are not already `sample_size`² are resized first.
    pub fn write_sample(
        &self,
        label: Label,
        index: usize,
        face: &GrayImage,
    ) -> Result<PathBuf, CorpusError> {
        let dir = self.label_dir(label);
        std::fs::create_dir_all(&dir).map_err(|source| CorpusError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(format!("{index}.{SAMPLE_EXTENSION}"));
        let normalised;
        let face = if face.dimensions() == (self.sample_size, self.sample_size) {
            face
        } else {
            normalised =
                imageops::resize(face, self.sample_size, self.sample_size, FilterType::Triangle);
            &normalised
        };
        face.save(&path).map_err(|source| CorpusError::Image {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(%label, index, path = %path.display(), "wrote training sample");
        Ok(path)
    }

    /// Number of sample files stored for `label`.
    pub fn sample_count(&self, label: Label) -> Result<usize, CorpusError> {
        let dir = self.label_dir(label);
        match std::fs::read_dir(&dir) {
            Ok(entries) => Ok(entries
                .filter_map(Result::ok)
                .filter(|e| is_sample(&e.path()))
                .count()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(source) => Err(CorpusError::Io { path: dir, source }),
        }
    }

    /// Labels that have a sample directory.
    pub fn labels(&self) -> Result<Vec<Label>, CorpusError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CorpusError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };
        let mut labels: Vec<Label> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                e.file_name()
                    .to_str()?
                    .strip_prefix(LABEL_DIR_MARKER)?
                    .parse()
                    .ok()
            })
            .collect();
        labels.sort();
        Ok(labels)
    }

    /// Every stored sample, as grayscale `sample_size`² images.
    pub fn load_all(&self) -> Result<Vec<TrainingSample>, CorpusError> {
        let mut samples = Vec::new();
        for label in self.labels()? {
            let dir = self.label_dir(label);
            let entries = std::fs::read_dir(&dir).map_err(|source| CorpusError::Io {
                path: dir.clone(),
                source,
            })?;
            let mut paths: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| is_sample(p))
                .collect();
            paths.sort();

            for path in paths {
                let image = image::open(&path)
                    .map_err(|source| CorpusError::Image {
                        path: path.clone(),
                        source,
                    })?
                    .to_luma8();
                let image = if image.dimensions() == (self.sample_size, self.sample_size) {
                    image
                } else {
                    let size = self.sample_size;
                    imageops::resize(&image, size, size, FilterType::Triangle)
                };
                samples.push(TrainingSample { image, label });
            }
        }
        tracing::debug!(
            root = %self.root.display(),
            samples = samples.len(),
            "loaded training corpus"
        );
        Ok(samples)
    }
}

fn is_sample(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_sample_layout_and_size() {
        let dir = tempfile::TempDir::new().unwrap();
        let corpus = TrainingCorpus::new(dir.path(), 200);

        let face = GrayImage::from_pixel(57, 81, image::Luma([120]));
        let path = corpus.write_sample(Label(3), 0, &face).unwrap();
        assert_eq!(path, dir.path().join("s3").join("0.png"));

        let stored = image::open(&path).unwrap();
        assert_eq!((stored.width(), stored.height()), (200, 200));
        assert_eq!(stored.color(), image::ColorType::L8);
    }

    #[test]
    fn test_sample_count() {
        let dir = tempfile::TempDir::new().unwrap();
        let corpus = TrainingCorpus::new(dir.path(), 32);
        assert_eq!(corpus.sample_count(Label(0)).unwrap(), 0);

        let face = GrayImage::new(32, 32);
        for i in 0..5 {
            corpus.write_sample(Label(0), i, &face).unwrap();
        }
        // rewriting an ordinal overwrites it
        corpus.write_sample(Label(0), 2, &face).unwrap();
        assert_eq!(corpus.sample_count(Label(0)).unwrap(), 5);
    }

    #[test]
    fn test_load_all_groups_by_label() {
        let dir = tempfile::TempDir::new().unwrap();
        let corpus = TrainingCorpus::new(dir.path(), 16);
        let face = GrayImage::new(16, 16);
        corpus.write_sample(Label(0), 0, &face).unwrap();
        corpus.write_sample(Label(0), 1, &face).unwrap();
        corpus.write_sample(Label(2), 0, &face).unwrap();
        // ignored: not a label dir / not an image
        std::fs::create_dir_all(dir.path().join("models")).unwrap();
        std::fs::write(dir.path().join("label_id_map.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("s2").join("notes.txt"), b"x").unwrap();

        assert_eq!(corpus.labels().unwrap(), vec![Label(0), Label(2)]);
        let samples = corpus.load_all().unwrap();
        let labels: Vec<Label> = samples.iter().map(|s| s.label).collect();
        assert_eq!(labels, vec![Label(0), Label(0), Label(2)]);
    }

    #[test]
    fn test_load_all_normalises_foreign_samples() {
        let dir = tempfile::TempDir::new().unwrap();
        let corpus = TrainingCorpus::new(dir.path(), 20);
        std::fs::create_dir_all(dir.path().join("s1")).unwrap();
        image::RgbImage::from_pixel(40, 30, image::Rgb([10, 200, 30]))
            .save(dir.path().join("s1").join("0.png"))
            .unwrap();

        let samples = corpus.load_all().unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].image.dimensions(), (20, 20));
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let corpus = TrainingCorpus::new(dir.path().join("absent"), 200);
        assert!(corpus.load_all().unwrap().is_empty());
    }
}
