//! Batch data structure and the data-loading collaborator contract

use ndarray::Array4;
use rand::rngs::StdRng;

/// A training or evaluation batch.
///
/// Images are NCHW `f32`; labels are class indices. Camera ids are present
/// for re-identification evaluation batches and optional for training.
#[derive(Clone)]
pub struct Batch {
    /// Image tensor, shape (batch, channels, height, width)
    pub images: Array4<f32>,
    /// Per-sample class labels
    pub labels: Vec<usize>,
    /// Per-sample camera ids, where the dataset provides them
    pub cam_ids: Option<Vec<usize>>,
}

impl Batch {
    /// Create a training batch without camera ids
    pub fn new(images: Array4<f32>, labels: Vec<usize>) -> Self {
        Self { images, labels, cam_ids: None }
    }

    /// Attach camera ids (evaluation batches)
    pub fn with_cam_ids(mut self, cam_ids: Vec<usize>) -> Self {
        self.cam_ids = Some(cam_ids);
        self
    }

    /// Number of samples in the batch
    pub fn size(&self) -> usize {
        self.images.dim().0
    }

    /// Decompose into (images, labels) for training
    pub fn for_train(&self) -> (&Array4<f32>, &[usize]) {
        (&self.images, &self.labels)
    }

    /// Decompose into (images, labels, camera ids) for evaluation
    pub fn for_eval(&self) -> (&Array4<f32>, &[usize], Option<&[usize]>) {
        (&self.images, &self.labels, self.cam_ids.as_deref())
    }
}

/// Data-loading collaborator.
///
/// Produces a finite, restartable sequence of batches once per epoch. The
/// engine hands in the per-epoch RNG so shuffling and sampling are
/// reproducible from (base seed, epoch) alone; the loader is free to run its
/// own prefetching underneath as long as `load` is a blocking call.
pub trait DataLoader: Send {
    /// Materialize this epoch's batches, in order
    fn load(&mut self, rng: &mut StdRng) -> Vec<Batch>;

    /// Number of batches per epoch
    fn num_batches(&self) -> usize;

    /// Number of distinct classes in the underlying train set
    fn num_classes(&self) -> usize;

    /// Class-to-index map, in index order
    fn class_map(&self) -> Vec<String>;
}
