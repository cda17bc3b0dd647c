//! Client: owns the sources and the registry and runs the per-tick cycle.
//!
//! Constructed once by the host and handed by reference to whatever consumes
//! it. Every method here runs on the consumer ("tick") thread; transport
//! threads only ever touch the shared [`SubjectRegistry`].

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::{ClientConfig, ConnectionSettings};
use crate::diagnostics::DiagnosticsSnapshot;
use crate::ids::SourceId;
use crate::registry::SubjectRegistry;
use crate::retarget::{Pose, Retargeter, TargetSkeleton};
use crate::snapshot::SubjectSnapshot;
use crate::source::{Source, SourceInfo};

struct SourceEntry {
    id: SourceId,
    source: Box<dyn Source>,
}

pub struct Client {
    cfg: ClientConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<SubjectRegistry>,
    sources: Vec<SourceEntry>,
    last_validation: Option<f64>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("cfg", &self.cfg)
            .field("sources", &self.source_ids())
            .field("last_validation", &self.last_validation)
            .finish()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Client {
    pub fn new(cfg: ClientConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(cfg: ClientConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: Arc::new(SubjectRegistry::new(&cfg)),
            cfg,
            clock,
            sources: Vec::new(),
            last_validation: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.cfg
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn registry(&self) -> &Arc<SubjectRegistry> {
        &self.registry
    }

    /// Adopt a source, assign its id and hand it the registry.
    pub fn add_source(&mut self, mut source: Box<dyn Source>) -> SourceId {
        let id = SourceId::new();
        source.attach(id, Arc::clone(&self.registry), &self.cfg);
        log::info!(
            "source {id} added ({} on {})",
            source.source_type(),
            source.machine_name()
        );
        self.sources.push(SourceEntry { id, source });
        id
    }

    /// Shut a source down and drop the subjects it was the last to write.
    pub fn remove_source(&mut self, id: SourceId) -> bool {
        let Some(pos) = self.sources.iter().position(|e| e.id == id) else {
            return false;
        };
        let mut entry = self.sources.remove(pos);
        entry.source.request_shutdown();
        let cleared = self.registry.clear_subjects_modified_by(id);
        log::info!("source {id} removed, cleared subjects {cleared:?}");
        true
    }

    pub fn remove_all_sources(&mut self) {
        let ids = self.source_ids();
        for id in ids {
            self.remove_source(id);
        }
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.iter().map(|e| e.id).collect()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn source_info(&self, id: SourceId) -> Option<SourceInfo> {
        let entry = self.sources.iter().find(|e| e.id == id)?;
        Some(SourceInfo {
            id,
            source_type: entry.source.source_type(),
            machine_name: entry.source.machine_name(),
            status: entry.source.status(),
            state: entry.source.state(),
        })
    }

    /// Poll every source once; dead ones are shut down and dropped. Their
    /// subjects stay in the registry, owned by whoever wrote them last.
    pub fn validate_sources(&mut self) -> Vec<SourceId> {
        let mut dropped = Vec::new();
        self.sources.retain_mut(|entry| {
            if entry.source.is_alive() {
                return true;
            }
            log::warn!("source {} stopped responding; removing", entry.id);
            entry.source.request_shutdown();
            dropped.push(entry.id);
            false
        });
        dropped
    }

    /// One consumer tick: validate sources when due, then publish snapshots.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        let due = match self.last_validation {
            Some(last) => now - last >= self.cfg.source_validation_interval_secs,
            None => true,
        };
        if due {
            self.validate_sources();
            self.last_validation = Some(now);
        }
        self.registry.snapshot_tick(now);
    }

    pub fn get_subject_snapshot(&self, name: &str) -> Option<Arc<SubjectSnapshot>> {
        self.registry.get_snapshot(name)
    }

    /// Retarget this tick's snapshot of `name` onto `target`.
    pub fn build_pose(
        &self,
        name: &str,
        target: &TargetSkeleton,
        retargeter: &mut Retargeter,
    ) -> Option<Pose> {
        let snapshot = self.registry.get_snapshot(name)?;
        retargeter.build_pose(&snapshot, target)
    }

    pub fn subject_names(&self) -> Vec<String> {
        self.registry.subject_names()
    }

    pub fn set_connection_settings(&self, name: &str, settings: ConnectionSettings) -> bool {
        self.registry.set_connection_settings(name, settings)
    }

    pub fn connection_settings(&self, name: &str) -> Option<ConnectionSettings> {
        self.registry.connection_settings(name)
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.registry.diagnostics().snapshot()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        for entry in &mut self.sources {
            entry.source.request_shutdown();
        }
    }
}
