//! Burn Batching for ArtiFact
//!
//! Items are decoded on a bounded rayon pool, then stacked by the
//! [`ArtifactBatcher`] into `[N, 3, H, W]` image tensors with one integer
//! target tensor per task.

use std::path::PathBuf;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::warn;

use super::{Authenticity, DomainClass};
use crate::utils::error::{DuelError, Result};

/// A labeled image ready for batching
#[derive(Clone, Debug)]
pub struct ArtifactItem {
    /// Image data as flattened CHW float array [3 * H * W]
    pub image: Vec<f32>,
    pub authenticity: Authenticity,
    pub class: DomainClass,
    /// Image path (for logging)
    pub path: PathBuf,
}

/// An unlabeled test image
#[derive(Clone, Debug)]
pub struct TestItem {
    /// File name, used as the output identifier
    pub id: String,
    /// Image data as flattened CHW float array [3 * H * W]
    pub image: Vec<f32>,
}

/// Check that a flattened image matches the working resolution
pub fn check_image_len(image: &[f32], image_size: usize, name: &str) -> Result<()> {
    let expected = 3 * image_size * image_size;
    if image.len() != expected {
        return Err(DuelError::ShapeMismatch {
            name: name.to_string(),
            expected: vec![3, image_size, image_size],
            found: vec![image.len()],
        });
    }
    Ok(())
}

/// A batch of labeled images
#[derive(Clone, Debug)]
pub struct ArtifactBatch<B: Backend> {
    /// Images tensor [batch_size, 3, H, W]
    pub images: Tensor<B, 4>,
    /// Real = 1, fake = 0 [batch_size]
    pub binary_targets: Tensor<B, 1, Int>,
    /// Domain class indices [batch_size]
    pub class_targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ArtifactBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stack flattened CHW images into a `[N, 3, H, W]` tensor
pub fn images_to_tensor<B: Backend>(
    images: &[&[f32]],
    image_size: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    let batch_size = images.len();
    let mut data = Vec::with_capacity(batch_size * 3 * image_size * image_size);
    for image in images {
        data.extend_from_slice(image);
    }

    Tensor::<B, 4>::from_floats(
        TensorData::new(data, [batch_size, 3, image_size, image_size]),
        device,
    )
}

/// Batcher for labeled ArtiFact items
///
/// Images are already normalized by the preprocessor, so batching is a pure
/// stacking step.
#[derive(Clone, Debug)]
pub struct ArtifactBatcher {
    image_size: usize,
}

impl ArtifactBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, ArtifactItem, ArtifactBatch<B>> for ArtifactBatcher {
    fn batch(&self, items: Vec<ArtifactItem>, device: &B::Device) -> ArtifactBatch<B> {
        let batch_size = items.len();

        let images: Vec<&[f32]> = items.iter().map(|item| item.image.as_slice()).collect();
        let images = images_to_tensor::<B>(&images, self.image_size, device);

        let binary: Vec<i64> = items
            .iter()
            .map(|item| item.authenticity.target() as i64)
            .collect();
        let classes: Vec<i64> = items.iter().map(|item| item.class.index() as i64).collect();

        let binary_targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(binary, [batch_size]), device);
        let class_targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(classes, [batch_size]), device);

        ArtifactBatch {
            images,
            binary_targets,
            class_targets,
        }
    }
}

/// Decodes batch items on a fixed-size worker pool
///
/// Results come back in the order of the requested indices. With
/// `skip_corrupt` enabled, undecodable images are logged and dropped;
/// otherwise the first failure aborts the batch.
pub struct BatchLoader {
    pool: ThreadPool,
    skip_corrupt: bool,
}

impl BatchLoader {
    pub fn new(num_workers: usize, skip_corrupt: bool) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .thread_name(|i| format!("decode-{}", i))
            .build()
            .map_err(|e| DuelError::Config(format!("failed to start decode workers: {}", e)))?;

        Ok(Self { pool, skip_corrupt })
    }

    pub fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Fetch `indices` in parallel, preserving their order
    pub fn load<T, F>(&self, indices: &[usize], fetch: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Sync,
    {
        let results: Vec<Result<T>> = self
            .pool
            .install(|| indices.par_iter().map(|&i| fetch(i)).collect());

        let mut items = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(item) => items.push(item),
                Err(err) if self.skip_corrupt && err.is_skippable() => {
                    warn!("Skipping sample: {}", err);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(items)
    }
}

/// A seeded permutation of `0..len`
pub fn shuffled_indices(len: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(rng);
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use rand::SeedableRng;
    use std::path::Path;

    type TestBackend = NdArray<f32>;

    fn item(value: f32, authenticity: Authenticity, class: DomainClass) -> ArtifactItem {
        ArtifactItem {
            image: vec![value; 3 * 4 * 4],
            authenticity,
            class,
            path: PathBuf::from("x.png"),
        }
    }

    #[test]
    fn test_batcher_shapes_and_targets() {
        let device = Default::default();
        let batcher = ArtifactBatcher::new(4);
        let items = vec![
            item(0.1, Authenticity::Real, DomainClass::Vehicles),
            item(-0.2, Authenticity::Fake, DomainClass::HumanFaces),
        ];

        let batch: ArtifactBatch<TestBackend> = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 4, 4]);
        assert_eq!(batch.len(), 2);

        let binary: Vec<i64> = batch.binary_targets.into_data().iter::<i64>().collect();
        let classes: Vec<i64> = batch.class_targets.into_data().iter::<i64>().collect();
        assert_eq!(binary, vec![1, 0]);
        assert_eq!(classes, vec![2, 0]);
    }

    #[test]
    fn test_loader_preserves_order() {
        let loader = BatchLoader::new(3, false).unwrap();
        let indices = [5, 1, 9, 0, 7];
        let out = loader.load(&indices, |i| Ok(i * 10)).unwrap();
        assert_eq!(out, vec![50, 10, 90, 0, 70]);
    }

    #[test]
    fn test_loader_skip_mode() {
        let fetch = |i: usize| {
            if i == 2 {
                Err(DuelError::CorruptImage {
                    path: PathBuf::from("bad.png"),
                    reason: "truncated".to_string(),
                })
            } else {
                Ok(i)
            }
        };

        let strict = BatchLoader::new(2, false).unwrap();
        assert!(matches!(
            strict.load(&[1, 2, 3], fetch),
            Err(DuelError::CorruptImage { .. })
        ));

        let lenient = BatchLoader::new(2, true).unwrap();
        assert_eq!(lenient.load(&[1, 2, 3], fetch).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_skip_mode_does_not_hide_other_errors() {
        let loader = BatchLoader::new(1, true).unwrap();
        let result: Result<Vec<usize>> =
            loader.load(&[0], |_| Err(DuelError::MissingPath(Path::new("gone").into())));
        assert!(matches!(result, Err(DuelError::MissingPath(_))));
    }

    #[test]
    fn test_shuffle_is_seeded_permutation() {
        let a = shuffled_indices(50, &mut ChaCha8Rng::seed_from_u64(42));
        let b = shuffled_indices(50, &mut ChaCha8Rng::seed_from_u64(42));
        assert_eq!(a, b);

        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_check_image_len() {
        assert!(check_image_len(&vec![0.0; 48], 4, "img").is_ok());
        let err = check_image_len(&vec![0.0; 47], 4, "img").unwrap_err();
        assert!(matches!(err, DuelError::ShapeMismatch { .. }));
    }
}
