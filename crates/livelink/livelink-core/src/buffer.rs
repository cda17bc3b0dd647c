//! Per-subject frame history ordered by local time.
//!
//! Frames are kept sorted by `TimeCode::local_time()`; frames with equal times
//! keep arrival order, so the most recent arrival wins an exact-time lookup.

use crate::frame::{Frame, TimeCode};
use crate::interp::blend_curve;

/// Result of sampling the buffer at a local time.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub frame: Frame,
    /// Index of the lower bracketing frame; everything before it is prunable.
    pub lo: usize,
}

#[derive(Clone, Debug, Default)]
pub struct FrameBuffer {
    frames: Vec<Frame>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn latest(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Insert keeping time order; ties go after existing frames.
    pub fn insert(&mut self, frame: Frame) {
        let t = frame.local_time();
        let idx = self.frames.partition_point(|f| f.local_time() <= t);
        self.frames.insert(idx, frame);
    }

    /// Drop the oldest frames until at most `max` remain. Zero means unbounded.
    pub fn enforce_capacity(&mut self, max: usize) {
        if max > 0 && self.frames.len() > max {
            let excess = self.frames.len() - max;
            self.frames.drain(..excess);
        }
    }

    /// Grow every frame's curve slots to `len`, filling with unset values.
    pub fn backfill_curves(&mut self, len: usize) {
        for f in &mut self.frames {
            if f.curves.len() < len {
                f.curves.resize(len, None);
            }
        }
    }

    /// Keep only frames whose geometry matches `bone_count`.
    pub fn retain_bone_count(&mut self, bone_count: usize) {
        self.frames.retain(|f| f.transforms.len() == bone_count);
    }

    /// Remove every frame before index `idx`.
    pub fn prune_before(&mut self, idx: usize) {
        let idx = idx.min(self.frames.len());
        self.frames.drain(..idx);
    }

    /// Find `(lo, hi)` with `frames[lo].time <= t <= frames[hi].time`.
    /// Out-of-range times clamp to the first or last frame (`lo == hi`).
    pub fn bracket(&self, t: f64) -> Option<(usize, usize)> {
        if self.frames.is_empty() {
            return None;
        }
        let upper = self.frames.partition_point(|f| f.local_time() <= t);
        if upper == 0 {
            return Some((0, 0));
        }
        let lo = upper - 1;
        if upper == self.frames.len() || self.frames[lo].local_time() == t {
            return Some((lo, lo));
        }
        Some((lo, upper))
    }

    /// Build the pose at local time `t` without extrapolating.
    ///
    /// Exact hits and clamped lookups return the stored frame unchanged. When
    /// either neighbour disagrees with `bone_count` the newer frame is used
    /// verbatim rather than blending mismatched topologies.
    pub fn sample(&self, t: f64, bone_count: usize) -> Option<Sample> {
        let (lo, hi) = self.bracket(t)?;
        if lo == hi {
            return Some(Sample {
                frame: self.frames[lo].clone(),
                lo,
            });
        }
        let a = &self.frames[lo];
        let b = &self.frames[hi];
        if a.transforms.len() != bone_count || b.transforms.len() != bone_count {
            return Some(Sample {
                frame: b.clone(),
                lo,
            });
        }
        let t0 = a.local_time();
        let span = b.local_time() - t0;
        let alpha = if span > 0.0 {
            ((t - t0) / span).clamp(0.0, 1.0) as f32
        } else {
            1.0
        };
        Some(Sample {
            frame: blend_frames(a, b, alpha, t),
            lo,
        })
    }
}

fn blend_frames(a: &Frame, b: &Frame, alpha: f32, t: f64) -> Frame {
    let transforms = a
        .transforms
        .iter()
        .zip(&b.transforms)
        .map(|(ta, tb)| ta.interpolate(tb, alpha))
        .collect();
    let curve_len = a.curves.len().max(b.curves.len());
    let curves = (0..curve_len)
        .map(|i| {
            blend_curve(
                a.curves.get(i).copied().flatten(),
                b.curves.get(i).copied().flatten(),
                alpha,
            )
        })
        .collect();
    let offset = a.time_code.offset;
    Frame {
        transforms,
        curves,
        time_code: TimeCode::new(t - offset, a.time_code.frame_number, offset),
    }
}
