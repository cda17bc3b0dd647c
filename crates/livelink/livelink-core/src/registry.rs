//! Thread-safe subject store and the per-tick published snapshot map.
//!
//! Locking model:
//! - `subjects` is a read-mostly table of `Arc<Mutex<Subject>>`; its write lock
//!   is only taken to add or remove a subject.
//! - Each subject has its own mutex, held just long enough to mutate or sample
//!   that subject, so unrelated producers never serialize on one another.
//! - Snapshots are published by swapping an `Arc` behind an [`ArcSwap`]; reads
//!   are lock-free and never contend with producers.

use arc_swap::ArcSwap;
use hashbrown::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::config::{ClientConfig, ConnectionSettings};
use crate::diagnostics::Diagnostics;
use crate::error::PushError;
use crate::frame::{CurveElement, RefSkeleton, TimeCode};
use crate::ids::SourceId;
use crate::interp::Transform;
use crate::snapshot::{SnapshotMap, SubjectSnapshot};
use crate::subject::Subject;

type SharedSubject = Arc<Mutex<Subject>>;

fn lock(subject: &SharedSubject) -> MutexGuard<'_, Subject> {
    subject.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct SubjectRegistry {
    subjects: RwLock<HashMap<String, SharedSubject>>,
    published: ArcSwap<SnapshotMap>,
    diagnostics: Diagnostics,
    stale_epsilon: f64,
    max_buffered_frames: usize,
    default_settings: ConnectionSettings,
}

impl Default for SubjectRegistry {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}

impl SubjectRegistry {
    pub fn new(cfg: &ClientConfig) -> Self {
        Self {
            subjects: RwLock::new(HashMap::new()),
            published: ArcSwap::from_pointee(SnapshotMap::new()),
            diagnostics: Diagnostics::default(),
            stale_epsilon: cfg.stale_epsilon_secs,
            max_buffered_frames: cfg.max_buffered_frames,
            default_settings: cfg.default_settings,
        }
    }

    fn find(&self, name: &str) -> Option<SharedSubject> {
        self.subjects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn reject(&self, err: PushError) -> Result<(), PushError> {
        log::debug!("dropping push: {err}");
        self.diagnostics.record_drop(err.reason());
        Err(err)
    }

    /// Create the subject if unseen, otherwise replace its skeleton.
    pub fn push_skeleton(&self, name: &str, ref_skeleton: RefSkeleton) -> Result<(), PushError> {
        if ref_skeleton.is_empty() {
            return self.reject(PushError::EmptySkeleton(name.to_string()));
        }
        if !ref_skeleton.is_consistent() {
            return self.reject(PushError::InconsistentSkeleton {
                subject: name.to_string(),
                bones: ref_skeleton.bone_names.len(),
                parents: ref_skeleton.bone_parents.len(),
            });
        }

        if let Some(existing) = self.find(name) {
            if lock(&existing).set_skeleton(ref_skeleton) {
                log::debug!("subject '{name}' skeleton replaced");
            }
            return Ok(());
        }

        let mut table = self.subjects.write().unwrap_or_else(PoisonError::into_inner);
        match table.get(name) {
            // Lost a race with another writer creating the same subject.
            Some(existing) => {
                lock(existing).set_skeleton(ref_skeleton);
            }
            None => {
                log::info!("subject '{name}' created");
                let subject = Subject::new(name.to_string(), ref_skeleton, self.default_settings);
                table.insert(name.to_string(), Arc::new(Mutex::new(subject)));
            }
        }
        Ok(())
    }

    /// Buffer one frame for `name`. Rejected frames are counted and dropped.
    pub fn push_frame(
        &self,
        source: SourceId,
        name: &str,
        transforms: Vec<Transform>,
        curves: &[CurveElement],
        time_code: TimeCode,
    ) -> Result<(), PushError> {
        let Some(subject) = self.find(name) else {
            return self.reject(PushError::UnknownSubject(name.to_string()));
        };
        let result = lock(&subject).push_frame(
            source,
            transforms,
            curves,
            time_code,
            self.stale_epsilon,
            self.max_buffered_frames,
        );
        match result {
            Ok(()) => {
                self.diagnostics.record_accepted();
                Ok(())
            }
            Err(err) => self.reject(err),
        }
    }

    /// Remove a subject entirely. Returns whether it existed.
    pub fn clear_subject(&self, name: &str) -> bool {
        let removed = self
            .subjects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some();
        if removed {
            log::info!("subject '{name}' cleared");
        }
        removed
    }

    /// Remove every subject last written by `source`. Returns their names.
    pub fn clear_subjects_modified_by(&self, source: SourceId) -> Vec<String> {
        let mut table = self.subjects.write().unwrap_or_else(PoisonError::into_inner);
        let owned: Vec<String> = table
            .iter()
            .filter(|(_, s)| lock(s).last_modifier() == Some(source))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &owned {
            table.remove(name);
        }
        owned
    }

    /// Evaluate every subject at local time `now` and publish the results.
    /// Call once per consumer tick.
    pub fn snapshot_tick(&self, now: f64) {
        let subjects: Vec<SharedSubject> = self
            .subjects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut map = SnapshotMap::with_capacity(subjects.len());
        for subject in &subjects {
            let snapshot = lock(subject).snapshot(now);
            if let Some(s) = snapshot {
                map.insert(s.subject.clone(), Arc::new(s));
            }
        }
        self.published.store(Arc::new(map));
        self.diagnostics.record_publish();
    }

    /// Lock-free read of the last published snapshot for `name`.
    pub fn get_snapshot(&self, name: &str) -> Option<Arc<SubjectSnapshot>> {
        self.published.load().get(name).cloned()
    }

    /// The whole published map for this tick.
    pub fn snapshots(&self) -> Arc<SnapshotMap> {
        self.published.load_full()
    }

    pub fn subject_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .subjects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn set_connection_settings(&self, name: &str, settings: ConnectionSettings) -> bool {
        match self.find(name) {
            Some(subject) => {
                lock(&subject).set_settings(settings);
                true
            }
            None => false,
        }
    }

    pub fn connection_settings(&self, name: &str) -> Option<ConnectionSettings> {
        self.with_subject(name, Subject::settings)
    }

    pub fn buffered_frames(&self, name: &str) -> Option<usize> {
        self.with_subject(name, |s| s.buffer().len())
    }

    pub fn last_modifier(&self, name: &str) -> Option<SourceId> {
        self.with_subject(name, Subject::last_modifier).flatten()
    }

    /// Run `f` against the live subject under its lock.
    pub fn with_subject<R>(&self, name: &str, f: impl FnOnce(&Subject) -> R) -> Option<R> {
        let subject = self.find(name)?;
        let guard = lock(&subject);
        let out = f(&*guard);
        Some(out)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_for_unknown_subject_is_counted() {
        let reg = SubjectRegistry::default();
        let err = reg
            .push_frame(
                SourceId::new(),
                "ghost",
                vec![Transform::IDENTITY],
                &[],
                TimeCode::default(),
            )
            .unwrap_err();
        assert_eq!(err, PushError::UnknownSubject("ghost".into()));
        assert_eq!(reg.diagnostics().snapshot().unknown_subject, 1);
    }

    #[test]
    fn empty_skeleton_is_malformed() {
        let reg = SubjectRegistry::default();
        assert!(reg.push_skeleton("a", RefSkeleton::default()).is_err());
        assert!(!reg.contains("a"));
        assert_eq!(reg.diagnostics().snapshot().malformed_skeleton, 1);
    }

    #[test]
    fn clear_subject_is_idempotent() {
        let reg = SubjectRegistry::default();
        reg.push_skeleton("a", RefSkeleton::flat(["root"])).unwrap();
        assert!(reg.clear_subject("a"));
        assert!(!reg.clear_subject("a"));
        assert!(reg.subject_names().is_empty());
    }
}
