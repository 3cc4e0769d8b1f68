//! ArtiFact Dataset Indexing
//!
//! This module scans the dataset tree once and builds order-stable indices:
//! labeled `root/{real,fake}/{class}/*` splits and flat unlabeled test folders.
//! Images are not decoded here; retrieval goes through the [`Preprocessor`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::burn_dataset::{ArtifactItem, TestItem};
use super::preprocess::Preprocessor;
use super::{Authenticity, DomainClass, NUM_DOMAIN_CLASSES};
use crate::utils::error::{DuelError, Result};
use crate::utils::format_number;

/// A single labeled image reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Path to the image file
    pub path: PathBuf,
    /// Real or fake
    pub authenticity: Authenticity,
    /// Visual domain
    pub class: DomainClass,
}

/// Labeled index over one split (`train` or `validation`)
#[derive(Debug, Clone)]
pub struct ArtifactIndex {
    root_dir: PathBuf,
    samples: Vec<Sample>,
    preprocessor: Preprocessor,
}

impl ArtifactIndex {
    /// Scan a split directory following `root/{real,fake}/{class}/*`
    ///
    /// Every regular file below a class directory becomes a sample. Files and
    /// class directories are visited in name order so the index is stable
    /// across runs and platforms.
    pub fn new<P: AsRef<Path>>(root_dir: P, preprocessor: Preprocessor) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Indexing labeled split at {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(DuelError::MissingPath(root_dir));
        }

        let mut samples = Vec::new();

        for authenticity in Authenticity::SCAN_ORDER {
            let label_dir = root_dir.join(authenticity.dir_name());
            if !label_dir.is_dir() {
                return Err(DuelError::MissingPath(label_dir));
            }

            for entry in sorted_children(&label_dir)? {
                let name = entry.file_name().to_string_lossy().to_string();
                let class = DomainClass::from_dir_name(&name, entry.path())?;

                if !entry.file_type().is_dir() {
                    return Err(DuelError::MissingPath(entry.path().to_path_buf()));
                }

                let before = samples.len();
                for file in sorted_children(entry.path())? {
                    if file.file_type().is_file() {
                        samples.push(Sample {
                            path: file.path().to_path_buf(),
                            authenticity,
                            class,
                        });
                    }
                }

                debug!(
                    "{}/{}: {} files",
                    authenticity.dir_name(),
                    class,
                    samples.len() - before
                );
            }
        }

        info!("Indexed {} labeled samples", samples.len());

        Ok(Self {
            root_dir,
            samples,
            preprocessor,
        })
    }

    /// Get the number of samples in the index
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Decode and preprocess the sample at `index`
    pub fn get(&self, index: usize) -> Result<ArtifactItem> {
        let sample = self.samples.get(index).ok_or_else(|| {
            DuelError::Config(format!(
                "sample index {} out of range for {} samples",
                index,
                self.samples.len()
            ))
        })?;

        let image = self.preprocessor.load(&sample.path)?;
        Ok(ArtifactItem {
            image,
            authenticity: sample.authenticity,
            class: sample.class,
            path: sample.path.clone(),
        })
    }

    /// Total sample count per domain class, in class-index order
    pub fn class_counts(&self) -> [usize; NUM_DOMAIN_CLASSES] {
        let mut counts = [0usize; NUM_DOMAIN_CLASSES];
        for sample in &self.samples {
            counts[sample.class.index()] += 1;
        }
        counts
    }

    /// Get statistics about the index
    pub fn stats(&self) -> IndexStats {
        let mut counts: BTreeMap<String, BTreeMap<DomainClass, usize>> = BTreeMap::new();
        for sample in &self.samples {
            *counts
                .entry(sample.authenticity.dir_name().to_string())
                .or_default()
                .entry(sample.class)
                .or_insert(0) += 1;
        }

        IndexStats {
            total_samples: self.samples.len(),
            counts,
            class_totals: self.class_counts(),
        }
    }
}

/// Unlabeled index over a flat directory of test images
#[derive(Debug, Clone)]
pub struct TestIndex {
    root_dir: PathBuf,
    files: Vec<PathBuf>,
    preprocessor: Preprocessor,
}

impl TestIndex {
    /// Enumerate the files directly under `root_dir`, sorted by name
    pub fn new<P: AsRef<Path>>(root_dir: P, preprocessor: Preprocessor) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Indexing test images at {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(DuelError::MissingPath(root_dir));
        }

        let files: Vec<PathBuf> = sorted_children(&root_dir)?
            .into_iter()
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.path().to_path_buf())
            .collect();

        info!("Indexed {} test images", files.len());

        Ok(Self {
            root_dir,
            files,
            preprocessor,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// File name used as the output identifier
    pub fn identifier(&self, index: usize) -> Option<String> {
        self.files
            .get(index)
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
    }

    /// Identifiers in enumeration order
    pub fn identifiers(&self) -> Vec<String> {
        (0..self.files.len())
            .filter_map(|i| self.identifier(i))
            .collect()
    }

    /// Decode and preprocess the image at `index`
    pub fn get(&self, index: usize) -> Result<TestItem> {
        let path = self.files.get(index).ok_or_else(|| {
            DuelError::Config(format!(
                "test index {} out of range for {} images",
                index,
                self.files.len()
            ))
        })?;

        Ok(TestItem {
            image: self.preprocessor.load(path)?,
            id: self.identifier(index).unwrap_or_default(),
        })
    }
}

/// Direct children of `dir`, sorted by file name
fn sorted_children(dir: &Path) -> Result<Vec<walkdir::DirEntry>> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .map(|entry| entry.map_err(DuelError::from))
        .collect()
}

/// Statistics about a labeled index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_samples: usize,
    /// Counts keyed by label directory, then class
    pub counts: BTreeMap<String, BTreeMap<DomainClass, usize>>,
    /// Totals per domain class, in class-index order
    pub class_totals: [usize; NUM_DOMAIN_CLASSES],
}

impl IndexStats {
    /// Print statistics to console
    pub fn print(&self) {
        println!("{:<10} {:<15} {}", "Label", "Class", "Count");
        println!("{}", "-".repeat(40));
        for (label, classes) in &self.counts {
            for (class, count) in classes {
                println!("{:<10} {:<15} {}", label, class.name(), format_number(*count));
            }
        }
        println!();
        for class in DomainClass::ALL {
            let count = self.class_totals[class.index()];
            let pct = if self.total_samples > 0 {
                100.0 * count as f64 / self.total_samples as f64
            } else {
                0.0
            };
            println!("  {:<15} {:>7} ({:>5.1}%)", class.name(), format_number(count), pct);
        }
        println!("  {:<15} {:>7}", "total", format_number(self.total_samples));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) fn create_test_image(path: &Path, shade: u8) {
        let img = image::RgbImage::from_fn(10, 10, |x, y| {
            image::Rgb([shade, (x * 20) as u8, (y * 20) as u8])
        });
        img.save(path).unwrap();
    }

    /// One real and one fake image per domain class
    pub(crate) fn create_split(root: &Path) {
        for (label_idx, label) in ["real", "fake"].iter().enumerate() {
            for (class_idx, class) in super::super::CLASS_NAMES.iter().enumerate() {
                let dir = root.join(label).join(class);
                fs::create_dir_all(&dir).unwrap();
                let shade = (label_idx * 120 + class_idx * 40) as u8;
                create_test_image(&dir.join("img_0.png"), shade);
            }
        }
    }

    fn preprocessor() -> Preprocessor {
        Preprocessor::new(8, [0.5; 3], [0.5; 3])
    }

    #[test]
    fn test_index_counts_every_file() {
        let dir = TempDir::new().unwrap();
        create_split(dir.path());
        create_test_image(&dir.path().join("real/animals/img_1.png"), 7);

        let index = ArtifactIndex::new(dir.path(), preprocessor()).unwrap();
        assert_eq!(index.len(), 7);
        assert!(index.samples().iter().all(|s| s.class.index() < 3));
        assert_eq!(index.class_counts(), [2, 3, 2]);
    }

    #[test]
    fn test_index_order_and_labels() {
        let dir = TempDir::new().unwrap();
        create_split(dir.path());

        let index = ArtifactIndex::new(dir.path(), preprocessor()).unwrap();
        let samples = index.samples();

        // real first, classes in name order
        assert_eq!(samples[0].authenticity, Authenticity::Real);
        assert_eq!(samples[0].class, DomainClass::Animals);
        assert_eq!(samples[1].class, DomainClass::HumanFaces);
        assert_eq!(samples[2].class, DomainClass::Vehicles);
        assert!(samples[3..].iter().all(|s| s.authenticity == Authenticity::Fake));

        let item = index.get(0).unwrap();
        assert_eq!(item.image.len(), 3 * 8 * 8);
        assert_eq!(item.authenticity.target(), 1);
    }

    #[test]
    fn test_missing_root() {
        let err = ArtifactIndex::new("/nonexistent/artifact/train", preprocessor()).unwrap_err();
        assert!(matches!(err, DuelError::MissingPath(_)));
    }

    #[test]
    fn test_missing_label_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("real/animals")).unwrap();

        let err = ArtifactIndex::new(dir.path(), preprocessor()).unwrap_err();
        assert!(matches!(err, DuelError::MissingPath(p) if p.ends_with("fake")));
    }

    #[test]
    fn test_unknown_class_aborts() {
        let dir = TempDir::new().unwrap();
        create_split(dir.path());
        fs::create_dir_all(dir.path().join("fake/buildings")).unwrap();

        let err = ArtifactIndex::new(dir.path(), preprocessor()).unwrap_err();
        assert!(matches!(err, DuelError::UnknownClass { ref name, .. } if name == "buildings"));
    }

    #[test]
    fn test_corrupt_image_fails_on_access() {
        let dir = TempDir::new().unwrap();
        create_split(dir.path());
        fs::write(dir.path().join("real/vehicles/zz_broken.png"), b"garbage").unwrap();

        let index = ArtifactIndex::new(dir.path(), preprocessor()).unwrap();
        let broken = index
            .samples()
            .iter()
            .position(|s| s.path.ends_with("zz_broken.png"))
            .unwrap();
        assert!(matches!(index.get(broken), Err(DuelError::CorruptImage { .. })));
    }

    #[test]
    fn test_test_index_sorted_identifiers() {
        let dir = TempDir::new().unwrap();
        for name in ["c.png", "a.png", "b.png"] {
            create_test_image(&dir.path().join(name), 50);
        }

        let index = TestIndex::new(dir.path(), preprocessor()).unwrap();
        assert_eq!(index.identifiers(), vec!["a.png", "b.png", "c.png"]);
        assert_eq!(index.get(1).unwrap().id, "b.png");
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        create_split(dir.path());

        let stats = ArtifactIndex::new(dir.path(), preprocessor()).unwrap().stats();
        assert_eq!(stats.total_samples, 6);
        assert_eq!(stats.counts.len(), 2);
        assert_eq!(stats.counts["real"].len(), 3);
        assert_eq!(stats.counts["fake"][&DomainClass::Animals], 1);
        assert_eq!(stats.class_totals, [2, 2, 2]);
    }

    #[test]
    fn test_stats_json_round_trip() {
        let dir = TempDir::new().unwrap();
        create_split(dir.path());

        let stats = ArtifactIndex::new(dir.path(), preprocessor()).unwrap().stats();
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"human_faces\":1"));

        let back: IndexStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back.counts, stats.counts);
        assert_eq!(back.total_samples, 6);
    }
}
