//! Polar extent histogram.
//!
//! Records the largest radius a stick has reached in each of N angular
//! buckets. Bucket 0 points along +x; indices grow with atan2(y, x), so with
//! screen coordinates (+y down) bucket N/4 is straight down.

use std::f64::consts::PI;

/// Buckets per histogram.
pub const HISTOGRAM_SIZE: usize = 64;

#[derive(Clone, Debug, PartialEq)]
pub struct PolarHistogram<const N: usize = HISTOGRAM_SIZE> {
    buckets: [f64; N],
}

impl<const N: usize> Default for PolarHistogram<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PolarHistogram<N> {
    pub fn new() -> Self {
        Self { buckets: [0.0; N] }
    }

    /// Bucket index for a sample. Halves round up, matching the browser's
    /// `Math.round`, so the seam at ±π lands deterministically.
    pub fn angle_index(x: f64, y: f64) -> usize {
        let scaled = y.atan2(x) * N as f64 / (2.0 * PI);
        let rounded = (scaled + 0.5).floor() as i64;
        rounded.rem_euclid(N as i64) as usize
    }

    /// Angle (radians) at the center of bucket `i`.
    pub fn bucket_angle(i: usize) -> f64 {
        i as f64 * 2.0 * PI / N as f64
    }

    pub fn sample(&mut self, x: f64, y: f64) {
        let distance = (x * x + y * y).sqrt();
        let idx = Self::angle_index(x, y);
        if distance > self.buckets[idx] {
            self.buckets[idx] = distance;
        }
    }

    pub fn reset(&mut self) {
        self.buckets = [0.0; N];
    }

    /// Buckets strictly above `threshold`.
    pub fn fill_count(&self, threshold: f64) -> usize {
        self.buckets.iter().filter(|v| **v > threshold).count()
    }

    pub fn fill_ratio(&self, threshold: f64) -> f64 {
        self.fill_count(threshold) as f64 / N as f64
    }

    /// Every bucket has seen some movement.
    pub fn is_fully_populated(&self) -> bool {
        self.buckets.iter().all(|v| *v != 0.0)
    }

    pub fn values(&self) -> &[f64; N] {
        &self.buckets
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.buckets.to_vec()
    }

    /// Replace every bucket with `f(angle, old_radius)`, clamped to ≥ 0.
    pub fn map_radii(&mut self, mut f: impl FnMut(f64, f64) -> f64) {
        for (i, r) in self.buckets.iter_mut().enumerate() {
            *r = f(Self::bucket_angle(i), *r).max(0.0);
        }
    }

    /// Clip every bucket to the unit square, modelling the stick housing.
    pub fn trim_to_square(&mut self) {
        self.map_radii(trim_radius);
    }
}

/// Clip `radius` along its ray to the edge of the unit square.
pub fn trim_radius(angle: f64, radius: f64) -> f64 {
    // Largest of |cos| and |sin| is never below 1/sqrt(2).
    let edge = 1.0 / angle.cos().abs().max(angle.sin().abs());
    radius.min(edge)
}
