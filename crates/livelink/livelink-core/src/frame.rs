//! Data model for streamed subjects: skeleton topology, curve names, frames.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::interp::Transform;

/// Bone names with a parallel parent-index array (-1 marks a root).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RefSkeleton {
    pub bone_names: Vec<String>,
    pub bone_parents: Vec<i32>,
}

impl RefSkeleton {
    pub fn new(bone_names: Vec<String>, bone_parents: Vec<i32>) -> Self {
        Self {
            bone_names,
            bone_parents,
        }
    }

    /// Skeleton whose bones are all roots. Convenient for flat rigs and tests.
    pub fn flat<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        let bone_names: Vec<String> = names.into_iter().map(Into::into).collect();
        let bone_parents = vec![-1; bone_names.len()];
        Self {
            bone_names,
            bone_parents,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bone_names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bone_names.is_empty()
    }

    /// Parents must be parallel to names and point at another bone or -1.
    pub fn is_consistent(&self) -> bool {
        let n = self.bone_names.len();
        if self.bone_parents.len() != n {
            return false;
        }
        self.bone_parents
            .iter()
            .enumerate()
            .all(|(i, &p)| p == -1 || (p >= 0 && (p as usize) < n && p as usize != i))
    }
}

/// One named curve value as it arrives on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurveElement {
    pub name: String,
    pub value: f32,
}

impl CurveElement {
    pub fn new<S: Into<String>>(name: S, value: f32) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Ordered, de-duplicated curve names for a subject. Only ever grows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveKey {
    names: IndexSet<String>,
}

impl CurveKey {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get_index_of(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Lay the incoming elements out in key order, appending names not seen
    /// before. Returns the aligned values and how many names were appended.
    pub fn align(&mut self, curves: &[CurveElement]) -> (Vec<Option<f32>>, usize) {
        let before = self.names.len();
        for c in curves {
            if !self.names.contains(c.name.as_str()) {
                self.names.insert(c.name.clone());
            }
        }
        let mut values = vec![None; self.names.len()];
        for c in curves {
            if let Some(idx) = self.names.get_index_of(c.name.as_str()) {
                values[idx] = Some(c.value);
            }
        }
        (values, self.names.len() - before)
    }
}

/// Producer timestamp plus the cached producer-to-local clock offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeCode {
    /// Seconds on the producer's clock.
    pub time: f64,
    pub frame_number: i64,
    /// `local_clock - producer_time`, fixed at the subject's first frame.
    pub offset: f64,
}

impl TimeCode {
    pub fn new(time: f64, frame_number: i64, offset: f64) -> Self {
        Self {
            time,
            frame_number,
            offset,
        }
    }

    /// The frame's time translated onto the local timeline.
    #[inline]
    pub fn local_time(&self) -> f64 {
        self.time + self.offset
    }
}

/// One sample: a transform per bone and an optional value per known curve.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub transforms: Vec<Transform>,
    pub curves: Vec<Option<f32>>,
    pub time_code: TimeCode,
}

impl Frame {
    #[inline]
    pub fn local_time(&self) -> f64 {
        self.time_code.local_time()
    }
}
