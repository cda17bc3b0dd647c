//! Read-only per-tick view of a subject, published by `snapshot_tick`.

use hashbrown::HashMap;
use std::sync::Arc;

use crate::frame::{Frame, RefSkeleton};
use crate::ids::SourceId;
use crate::interp::Transform;

/// Map published once per tick; readers never touch subject buffers.
pub type SnapshotMap = HashMap<String, Arc<SubjectSnapshot>>;

#[derive(Clone, Debug)]
pub struct SubjectSnapshot {
    pub subject: String,
    pub ref_skeleton: Arc<RefSkeleton>,
    /// Curve names aligned with `frame.curves`.
    pub curve_names: Arc<[String]>,
    pub frame: Frame,
    pub last_modifier: Option<SourceId>,
    /// Bumped every time the subject's skeleton is replaced.
    pub topology_version: u64,
    /// True only on the first tick after a skeleton replacement.
    pub topology_changed: bool,
}

impl SubjectSnapshot {
    pub fn bone_transform(&self, bone: &str) -> Option<&Transform> {
        let idx = self.ref_skeleton.bone_names.iter().position(|b| b == bone)?;
        self.frame.transforms.get(idx)
    }

    pub fn curve_value(&self, curve: &str) -> Option<f32> {
        let idx = self.curve_names.iter().position(|c| c == curve)?;
        self.frame.curves.get(idx).copied().flatten()
    }

    /// Transforms line up with the skeleton and neither is empty.
    pub fn is_well_formed(&self) -> bool {
        !self.frame.transforms.is_empty()
            && self.frame.transforms.len() == self.ref_skeleton.bone_names.len()
    }
}
