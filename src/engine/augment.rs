//! Batch augmentation: mixup, cutmix and fmix
//!
//! Each mode blends every image with a randomly permuted partner from the
//! same batch and retains the mixing coefficient plus the permutation so the
//! loss can form the matching convex combination over original and permuted
//! labels.

use ndarray::{s, Array2, Array4, Axis, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Beta, Distribution, StandardNormal};

/// Augmentation mode, fixed at configuration time
#[derive(Clone, Copy, Debug)]
pub enum BatchAugment {
    /// Convex pixel blend: `lam * img + (1 - lam) * img[perm]`
    Mixup { alpha: f64, prob: f64 },
    /// Rectangular patch paste from the permuted image
    CutMix { alpha: f64, prob: f64 },
    /// Binary low-frequency (Fourier-basis) mask blend
    FMix { alpha: f64, decay_power: f64, prob: f64 },
}

/// What a fired augmentation recorded for the loss function
#[derive(Clone, Debug)]
pub struct AppliedAugment {
    /// Label-mixing coefficient
    pub lam: f64,
    /// Sample permutation used for the partner images
    pub index: Vec<usize>,
}

impl BatchAugment {
    /// Apply the augmentation in place with its configured probability.
    ///
    /// Returns `None` when the batch passes through unchanged (alpha <= 0,
    /// the probability gate did not fire, or the drawn lambda degenerates
    /// to 1).
    pub fn apply(&self, images: &mut Array4<f32>, rng: &mut StdRng) -> Option<AppliedAugment> {
        match *self {
            BatchAugment::Mixup { alpha, prob } => {
                let lam = gate(alpha, prob, rng)?;
                if (1.0 - lam).abs() < 1e-12 {
                    return None;
                }
                let index = permutation(images.dim().0, rng);
                apply_mixup(images, lam, &index);
                Some(AppliedAugment { lam, index })
            }
            BatchAugment::CutMix { alpha, prob } => {
                let lam = gate(alpha, prob, rng)?;
                let (n, _, h, w) = images.dim();
                let bbox = rand_bbox(w, h, lam, rng);
                let (x1, y1, x2, y2) = bbox;
                if x2 <= x1 || y2 <= y1 {
                    return None;
                }
                let index = permutation(n, rng);
                let orig = images.clone();
                for (i, &j) in index.iter().enumerate() {
                    let src = orig.slice(s![j, .., y1..y2, x1..x2]);
                    images.slice_mut(s![i, .., y1..y2, x1..x2]).assign(&src);
                }
                // adjust lambda to the exact pixel-area ratio of the patch
                let lam = patch_lambda(w, h, bbox);
                Some(AppliedAugment { lam, index })
            }
            BatchAugment::FMix { alpha, decay_power, prob } => {
                let lam = gate(alpha, prob, rng)?;
                let (n, c, h, w) = images.dim();
                let noise = low_freq_noise(h, w, decay_power, rng);
                let (mask, lam) = threshold_mask(&noise, lam);
                let index = permutation(n, rng);
                let orig = images.clone();
                for (i, &j) in index.iter().enumerate() {
                    for ch in 0..c {
                        for y in 0..h {
                            for x in 0..w {
                                let m = mask[[y, x]];
                                images[[i, ch, y, x]] =
                                    m * orig[[i, ch, y, x]] + (1.0 - m) * orig[[j, ch, y, x]];
                            }
                        }
                    }
                }
                Some(AppliedAugment { lam, index })
            }
        }
    }
}

/// Roll the probability gate and draw lambda from Beta(alpha, alpha)
fn gate(alpha: f64, prob: f64, rng: &mut StdRng) -> Option<f64> {
    if alpha <= 0.0 {
        return None;
    }
    if rng.random::<f64>() > prob {
        return None;
    }
    let beta = Beta::new(alpha, alpha).ok()?;
    Some(beta.sample(rng))
}

fn permutation(n: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut index: Vec<usize> = (0..n).collect();
    index.shuffle(rng);
    index
}

/// Blend every image with its permuted partner: `lam*img + (1-lam)*img[perm]`
pub(crate) fn apply_mixup(images: &mut Array4<f32>, lam: f64, index: &[usize]) {
    let lamf = lam as f32;
    let orig = images.clone();
    for (i, &j) in index.iter().enumerate() {
        let base = orig.index_axis(Axis(0), i);
        let partner = orig.index_axis(Axis(0), j);
        let mut dst = images.index_axis_mut(Axis(0), i);
        Zip::from(&mut dst)
            .and(&base)
            .and(&partner)
            .for_each(|d, &a, &b| *d = lamf * a + (1.0 - lamf) * b);
    }
}

/// Random patch whose area fraction approximates `1 - lam`, clipped to the
/// image. Returned as (x1, y1, x2, y2).
pub(crate) fn rand_bbox(
    w: usize,
    h: usize,
    lam: f64,
    rng: &mut StdRng,
) -> (usize, usize, usize, usize) {
    let cut_rat = (1.0 - lam).max(0.0).sqrt();
    let cut_w = (w as f64 * cut_rat) as usize;
    let cut_h = (h as f64 * cut_rat) as usize;

    let cx = rng.random_range(0..w);
    let cy = rng.random_range(0..h);

    let x1 = cx.saturating_sub(cut_w / 2);
    let y1 = cy.saturating_sub(cut_h / 2);
    let x2 = (cx + cut_w / 2).min(w);
    let y2 = (cy + cut_h / 2).min(h);
    (x1, y1, x2, y2)
}

/// Exact lambda for a pasted patch: 1 - patch_area / image_area
pub(crate) fn patch_lambda(w: usize, h: usize, bbox: (usize, usize, usize, usize)) -> f64 {
    let (x1, y1, x2, y2) = bbox;
    let area = (x2 - x1) * (y2 - y1);
    1.0 - area as f64 / (w * h) as f64
}

/// Gray-scale noise built from a truncated Fourier basis with amplitudes
/// decaying as freq^-decay_power and random phases.
pub(crate) fn low_freq_noise(h: usize, w: usize, decay_power: f64, rng: &mut StdRng) -> Array2<f32> {
    const MAX_FREQ: usize = 4;
    let tau = std::f64::consts::TAU;
    let mut noise = Array2::<f32>::zeros((h, w));
    for ky in 0..=MAX_FREQ {
        for kx in 0..=MAX_FREQ {
            if kx == 0 && ky == 0 {
                continue;
            }
            let freq = ((kx * kx + ky * ky) as f64).sqrt();
            let amp: f64 = rng.sample::<f64, _>(StandardNormal) / freq.powf(decay_power);
            let phase = rng.random::<f64>() * tau;
            for y in 0..h {
                for x in 0..w {
                    let t = tau * (kx as f64 * x as f64 / w as f64 + ky as f64 * y as f64 / h as f64)
                        + phase;
                    noise[[y, x]] += (amp * t.cos()) as f32;
                }
            }
        }
    }
    noise
}

/// Binarize noise so that the top-lam fraction of pixels is 1. Returns the
/// mask and the exact fill fraction, which becomes the recorded lambda.
pub(crate) fn threshold_mask(noise: &Array2<f32>, lam: f64) -> (Array2<f32>, f64) {
    let (h, w) = noise.dim();
    let total = h * w;
    let k = ((lam * total as f64).round() as usize).min(total);

    let flat: Vec<f32> = noise.iter().copied().collect();
    let mut order: Vec<usize> = (0..total).collect();
    order.sort_by(|&a, &b| flat[b].total_cmp(&flat[a]));

    let mut mask = Array2::<f32>::zeros((h, w));
    for &idx in order.iter().take(k) {
        mask[[idx / w, idx % w]] = 1.0;
    }
    (mask, k as f64 / total as f64)
}
