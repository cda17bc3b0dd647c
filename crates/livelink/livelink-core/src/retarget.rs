//! Map a subject snapshot onto a consumer skeleton by bone name.
//!
//! Name resolution goes through a pluggable [`NameMapper`] and is memoized per
//! source bone name. The memo is dropped when the subject's topology version
//! changes or the mapper reports a new version.

use hashbrown::HashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::interp::Transform;
use crate::snapshot::SubjectSnapshot;

/// Strategy turning a source bone name into a target bone name.
pub trait NameMapper: Send {
    fn map_name(&self, source: &str) -> String;

    /// Changes whenever the mapping changes, so cached lookups can be dropped.
    fn version(&self) -> u64 {
        0
    }
}

/// Source name equals target name.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityMapper;

impl NameMapper for IdentityMapper {
    fn map_name(&self, source: &str) -> String {
        source.to_string()
    }
}

/// Explicit ordered renames; names without an entry pass through unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoneNameMap {
    version: u64,
    renames: IndexMap<String, String>,
}

impl BoneNameMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.insert(from, to);
        self
    }

    pub fn insert(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.renames.insert(from.into(), to.into());
        self.version += 1;
    }

    pub fn remove(&mut self, from: &str) -> Option<String> {
        let removed = self.renames.shift_remove(from);
        if removed.is_some() {
            self.version += 1;
        }
        removed
    }

    pub fn get(&self, from: &str) -> Option<&str> {
        self.renames.get(from).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.renames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }
}

impl NameMapper for BoneNameMap {
    fn map_name(&self, source: &str) -> String {
        self.get(source).unwrap_or(source).to_string()
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Consumer skeleton: bone names plus the default pose unmatched bones keep.
#[derive(Clone, Debug, Default)]
pub struct TargetSkeleton {
    bone_names: Vec<String>,
    reference_pose: Vec<Transform>,
    index: HashMap<String, usize>,
}

impl TargetSkeleton {
    /// `reference_pose` is padded with identity or truncated to fit the names.
    pub fn new(bone_names: Vec<String>, mut reference_pose: Vec<Transform>) -> Self {
        reference_pose.resize(bone_names.len(), Transform::IDENTITY);
        let mut index = HashMap::with_capacity(bone_names.len());
        for (i, name) in bone_names.iter().enumerate() {
            index.entry(name.clone()).or_insert(i);
        }
        Self {
            bone_names,
            reference_pose,
            index,
        }
    }

    pub fn from_names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self::new(names.into_iter().map(Into::into).collect(), Vec::new())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn bone_names(&self) -> &[String] {
        &self.bone_names
    }

    pub fn reference_pose(&self) -> &[Transform] {
        &self.reference_pose
    }

    pub fn len(&self) -> usize {
        self.bone_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bone_names.is_empty()
    }
}

/// Output of retargeting: one transform per target bone plus named curves.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pose {
    pub transforms: Vec<Transform>,
    pub curves: HashMap<String, f32>,
}

impl Pose {
    pub fn from_target(target: &TargetSkeleton) -> Self {
        Self {
            transforms: target.reference_pose().to_vec(),
            curves: HashMap::new(),
        }
    }
}

pub struct Retargeter {
    mapper: Box<dyn NameMapper>,
    mapper_version: u64,
    /// (subject, topology version) the memo was built against.
    topology: Option<(String, u64)>,
    resolved: HashMap<String, String>,
}

impl std::fmt::Debug for Retargeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retargeter")
            .field("mapper_version", &self.mapper_version)
            .field("topology", &self.topology)
            .field("resolved", &self.resolved.len())
            .finish()
    }
}

impl Default for Retargeter {
    fn default() -> Self {
        Self::new(Box::new(IdentityMapper))
    }
}

impl Retargeter {
    pub fn new(mapper: Box<dyn NameMapper>) -> Self {
        let mapper_version = mapper.version();
        Self {
            mapper,
            mapper_version,
            topology: None,
            resolved: HashMap::new(),
        }
    }

    /// Swap the mapping strategy at runtime; clears the memo.
    pub fn set_mapper(&mut self, mapper: Box<dyn NameMapper>) {
        self.mapper_version = mapper.version();
        self.mapper = mapper;
        self.resolved.clear();
    }

    /// Number of memoized source-name lookups.
    pub fn cached_names(&self) -> usize {
        self.resolved.len()
    }

    fn refresh(&mut self, snapshot: &SubjectSnapshot) {
        let version = self.mapper.version();
        let same_topology = !snapshot.topology_changed
            && self
                .topology
                .as_ref()
                .is_some_and(|(s, v)| *s == snapshot.subject && *v == snapshot.topology_version);
        if version != self.mapper_version || !same_topology {
            self.resolved.clear();
            self.mapper_version = version;
            self.topology = Some((snapshot.subject.clone(), snapshot.topology_version));
        }
    }

    /// Build a fresh pose from the target's reference pose.
    /// `None` when the snapshot is malformed.
    pub fn build_pose(&mut self, snapshot: &SubjectSnapshot, target: &TargetSkeleton) -> Option<Pose> {
        let mut pose = Pose::from_target(target);
        self.apply(snapshot, target, &mut pose).then_some(pose)
    }

    /// Write matching bones and all set curves into `pose`. Unmatched bones
    /// keep whatever `pose` already holds. Returns `false` and leaves `pose`
    /// untouched when the snapshot's transforms do not fit its skeleton.
    pub fn apply(&mut self, snapshot: &SubjectSnapshot, target: &TargetSkeleton, pose: &mut Pose) -> bool {
        if !snapshot.is_well_formed() {
            log::debug!("retarget skipped for '{}': malformed frame", snapshot.subject);
            return false;
        }
        self.refresh(snapshot);

        for (i, source_name) in snapshot.ref_skeleton.bone_names.iter().enumerate() {
            if !self.resolved.contains_key(source_name.as_str()) {
                let mapped = self.mapper.map_name(source_name);
                self.resolved.insert(source_name.clone(), mapped);
            }
            let Some(target_name) = self.resolved.get(source_name.as_str()) else {
                continue;
            };
            let Some(slot) = target
                .index_of(target_name)
                .and_then(|ti| pose.transforms.get_mut(ti))
            else {
                continue;
            };
            *slot = snapshot.frame.transforms[i];
        }

        for (name, value) in snapshot.curve_names.iter().zip(&snapshot.frame.curves) {
            if let Some(v) = value {
                pose.curves.insert(name.clone(), *v);
            }
        }
        true
    }
}
