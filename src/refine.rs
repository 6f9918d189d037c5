//! Probability mask to alpha conversion
//!
//! The oracle reports background likelihood per pixel. Refinement inverts it
//! into alpha through a [`RefinementPolicy`] and then optionally smooths the
//! boundary between foreground and background.

use crate::config::{RefinementConfig, RefinementPolicy, SmoothingConfig, SmoothingKernel};
use crate::types::{AlphaBuffer, ForegroundMask};
use ndarray::Array2;

/// Converts oracle masks into alpha buffers
pub struct MaskRefiner;

impl MaskRefiner {
    /// Refine `mask` into an alpha buffer of the same dimensions
    ///
    /// Pure over fixed-size buffers; there is no failure mode.
    ///
    /// # Examples
    /// ```rust
    /// use bgcut::{ForegroundMask, MaskRefiner, RefinementConfig};
    ///
    /// let mask = ForegroundMask::uniform(4, 4, 0.0);
    /// let alpha = MaskRefiner::refine(&mask, &RefinementConfig::default());
    /// assert!(alpha.as_array().iter().all(|&a| a == 255));
    /// ```
    #[must_use]
    pub fn refine(mask: &ForegroundMask, config: &RefinementConfig) -> AlphaBuffer {
        let alpha = Self::apply_policy(mask, config.policy);

        if Self::smoothing_applies(mask.width(), mask.height(), &config.smoothing) {
            Self::smooth_edges(&alpha, config.smoothing.kernel)
        } else {
            alpha
        }
    }

    /// Map every probability to alpha without smoothing
    #[must_use]
    pub fn apply_policy(mask: &ForegroundMask, policy: RefinementPolicy) -> AlphaBuffer {
        AlphaBuffer::from_array(mask.as_array().mapv(|m| alpha_for(m, policy)))
    }

    /// Whether the smoothing pass runs for a `width` x `height` mask
    #[must_use]
    pub fn smoothing_applies(width: u32, height: u32, smoothing: &SmoothingConfig) -> bool {
        smoothing.enabled && u64::from(width) * u64::from(height) > smoothing.min_pixels
    }

    /// Average boundary pixels with their neighbourhood
    ///
    /// Only interior pixels whose alpha differs from at least one orthogonal
    /// neighbour are rewritten. Every average reads the unsmoothed input, so
    /// the result does not depend on scan order.
    #[must_use]
    pub fn smooth_edges(alpha: &AlphaBuffer, kernel: SmoothingKernel) -> AlphaBuffer {
        let source = alpha.as_array();
        let (rows, cols) = source.dim();
        let mut output = source.clone();

        if rows < 3 || cols < 3 {
            return AlphaBuffer::from_array(output);
        }

        for y in 1..rows - 1 {
            for x in 1..cols - 1 {
                if !is_boundary(source, y, x) {
                    continue;
                }
                let smoothed = match kernel {
                    SmoothingKernel::Cross => cross_average(source, y, x),
                    SmoothingKernel::Box3x3 => box_average(source, y, x),
                };
                if let Some(cell) = output.get_mut((y, x)) {
                    *cell = smoothed;
                }
            }
        }

        AlphaBuffer::from_array(output)
    }
}

fn alpha_for(probability: f32, policy: RefinementPolicy) -> u8 {
    match policy {
        RefinementPolicy::Binary { cutoff } => {
            if probability < cutoff {
                255
            } else {
                0
            }
        }
        RefinementPolicy::SoftBand { low, high } => {
            if probability < low {
                255
            } else if probability > high {
                0
            } else {
                ((1.0 - probability) * 255.0).round().clamp(0.0, 255.0) as u8
            }
        }
    }
}

const ORTHOGONAL: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

fn neighbour(source: &Array2<u8>, y: usize, x: usize, dy: isize, dx: isize) -> u32 {
    let ny = y.wrapping_add_signed(dy);
    let nx = x.wrapping_add_signed(dx);
    source.get((ny, nx)).copied().map_or(0, u32::from)
}

fn is_boundary(source: &Array2<u8>, y: usize, x: usize) -> bool {
    let centre = neighbour(source, y, x, 0, 0);
    ORTHOGONAL
        .iter()
        .any(|&(dy, dx)| neighbour(source, y, x, dy, dx) != centre)
}

fn cross_average(source: &Array2<u8>, y: usize, x: usize) -> u8 {
    let sum: u32 = neighbour(source, y, x, 0, 0)
        + ORTHOGONAL
            .iter()
            .map(|&(dy, dx)| neighbour(source, y, x, dy, dx))
            .sum::<u32>();
    (sum / 5) as u8
}

fn box_average(source: &Array2<u8>, y: usize, x: usize) -> u8 {
    let mut sum = 0u32;
    for dy in -1..=1 {
        for dx in -1..=1 {
            sum += neighbour(source, y, x, dy, dx);
        }
    }
    (sum / 9) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_smoothing() -> RefinementConfig {
        RefinementConfig {
            policy: RefinementPolicy::default(),
            smoothing: SmoothingConfig {
                enabled: false,
                ..SmoothingConfig::default()
            },
        }
    }

    fn always_smooth(kernel: SmoothingKernel) -> RefinementConfig {
        RefinementConfig {
            policy: RefinementPolicy::default(),
            smoothing: SmoothingConfig {
                enabled: true,
                min_pixels: 0,
                kernel,
            },
        }
    }

    #[test]
    fn test_uniform_foreground_is_opaque() {
        let mask = ForegroundMask::uniform(120, 100, 0.0);
        let alpha = MaskRefiner::refine(&mask, &RefinementConfig::default());
        assert_eq!(alpha.dimensions(), (120, 100));
        assert!(alpha.as_array().iter().all(|&a| a == 255));
    }

    #[test]
    fn test_uniform_background_is_transparent() {
        let mask = ForegroundMask::uniform(120, 100, 1.0);
        let alpha = MaskRefiner::refine(&mask, &RefinementConfig::default());
        assert!(alpha.as_array().iter().all(|&a| a == 0));
    }

    #[test]
    fn test_soft_band_ramp() {
        let policy = RefinementPolicy::SoftBand {
            low: 0.3,
            high: 0.7,
        };
        assert_eq!(alpha_for(0.29, policy), 255);
        assert_eq!(alpha_for(0.5, policy), 128);
        assert_eq!(alpha_for(0.71, policy), 0);
    }

    #[test]
    fn test_binary_cutoff() {
        let policy = RefinementPolicy::Binary { cutoff: 0.5 };
        assert_eq!(alpha_for(0.49, policy), 255);
        assert_eq!(alpha_for(0.5, policy), 0);
    }

    #[test]
    fn test_policies_are_monotonic() {
        let policies = [
            RefinementPolicy::default(),
            RefinementPolicy::Binary { cutoff: 0.5 },
        ];
        for policy in policies {
            let mut previous = u8::MAX;
            for step in 0..=100 {
                let alpha = alpha_for(step as f32 / 100.0, policy);
                assert!(alpha <= previous, "{policy:?} not monotonic at {step}");
                previous = alpha;
            }
        }
    }

    #[test]
    fn test_smoothing_identity_without_disagreement() {
        for kernel in [SmoothingKernel::Cross, SmoothingKernel::Box3x3] {
            let opaque = AlphaBuffer::uniform(16, 16, 255);
            assert_eq!(MaskRefiner::smooth_edges(&opaque, kernel), opaque);

            let clear = AlphaBuffer::uniform(16, 16, 0);
            assert_eq!(MaskRefiner::smooth_edges(&clear, kernel), clear);
        }
    }

    #[test]
    fn test_smoothing_touches_only_the_edge() {
        // Left half opaque, right half transparent
        let mask = ForegroundMask::from_fn(10, 6, |x, _| if x < 5 { 0.0 } else { 1.0 });
        let alpha = MaskRefiner::refine(&mask, &always_smooth(SmoothingKernel::Cross));

        // Pixels on either side of the edge are averaged
        assert_eq!(alpha.get(4, 2), Some(204));
        assert_eq!(alpha.get(5, 2), Some(51));
        // Uniform regions and the image border are untouched
        assert_eq!(alpha.get(2, 2), Some(255));
        assert_eq!(alpha.get(8, 2), Some(0));
        assert_eq!(alpha.get(4, 0), Some(255));
    }

    #[test]
    fn test_box_kernel_averages_nine() {
        let mask = ForegroundMask::from_fn(10, 6, |x, _| if x < 5 { 0.0 } else { 1.0 });
        let alpha = MaskRefiner::refine(&mask, &always_smooth(SmoothingKernel::Box3x3));
        assert_eq!(alpha.get(4, 2), Some(170));
        assert_eq!(alpha.get(5, 2), Some(85));
    }

    #[test]
    fn test_smoothing_is_idempotent_on_clean_binary_masks() {
        let alpha = AlphaBuffer::uniform(8, 8, 255);
        let once = MaskRefiner::smooth_edges(&alpha, SmoothingKernel::Cross);
        let twice = MaskRefiner::smooth_edges(&once, SmoothingKernel::Cross);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_smoothing_size_gate() {
        let smoothing = SmoothingConfig::default();
        assert!(!MaskRefiner::smoothing_applies(100, 100, &smoothing));
        assert!(MaskRefiner::smoothing_applies(101, 100, &smoothing));

        let disabled = no_smoothing().smoothing;
        assert!(!MaskRefiner::smoothing_applies(1000, 1000, &disabled));
    }

    #[test]
    fn test_small_masks_skip_smoothing_pass() {
        let alpha = AlphaBuffer::from_vec(2, 2, vec![0, 255, 255, 0]).unwrap();
        assert_eq!(MaskRefiner::smooth_edges(&alpha, SmoothingKernel::Cross), alpha);
    }
}
