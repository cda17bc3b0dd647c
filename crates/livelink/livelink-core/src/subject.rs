//! A named stream: skeleton, curve key, frame history and read cursor.

use std::sync::Arc;

use crate::buffer::FrameBuffer;
use crate::config::ConnectionSettings;
use crate::error::PushError;
use crate::frame::{CurveElement, CurveKey, Frame, RefSkeleton, TimeCode};
use crate::ids::SourceId;
use crate::interp::Transform;
use crate::snapshot::SubjectSnapshot;

#[derive(Debug)]
pub struct Subject {
    name: String,
    ref_skeleton: Arc<RefSkeleton>,
    curve_key: CurveKey,
    curve_names: Arc<[String]>,
    buffer: FrameBuffer,
    last_modifier: Option<SourceId>,
    last_read_time: Option<f64>,
    last_read_frame: Option<i64>,
    settings: ConnectionSettings,
    topology_version: u64,
    topology_changed: bool,
}

impl Subject {
    pub fn new(name: String, ref_skeleton: RefSkeleton, settings: ConnectionSettings) -> Self {
        Self {
            name,
            ref_skeleton: Arc::new(ref_skeleton),
            curve_key: CurveKey::new(),
            curve_names: Arc::from(Vec::<String>::new()),
            buffer: FrameBuffer::new(),
            last_modifier: None,
            last_read_time: None,
            last_read_frame: None,
            settings,
            topology_version: 0,
            topology_changed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ref_skeleton(&self) -> &RefSkeleton {
        &self.ref_skeleton
    }

    pub fn curve_key(&self) -> &CurveKey {
        &self.curve_key
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn last_modifier(&self) -> Option<SourceId> {
        self.last_modifier
    }

    pub fn last_read_time(&self) -> Option<f64> {
        self.last_read_time
    }

    /// Frame number of the lower bracketing frame at the last read.
    pub fn last_read_frame(&self) -> Option<i64> {
        self.last_read_frame
    }

    pub fn settings(&self) -> ConnectionSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: ConnectionSettings) {
        self.settings = settings;
    }

    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    /// Replace the skeleton. Identical redeclarations are a no-op; otherwise
    /// frames whose bone count no longer fits are dropped and the topology
    /// version advances. Returns whether the topology changed.
    pub fn set_skeleton(&mut self, ref_skeleton: RefSkeleton) -> bool {
        if *self.ref_skeleton == ref_skeleton {
            return false;
        }
        self.buffer.retain_bone_count(ref_skeleton.len());
        self.ref_skeleton = Arc::new(ref_skeleton);
        self.topology_version += 1;
        self.topology_changed = true;
        true
    }

    /// Validate and buffer one frame.
    pub fn push_frame(
        &mut self,
        source: SourceId,
        transforms: Vec<Transform>,
        curves: &[CurveElement],
        time_code: TimeCode,
        stale_epsilon: f64,
        max_frames: usize,
    ) -> Result<(), PushError> {
        if transforms.is_empty() {
            return Err(PushError::EmptyTransforms(self.name.clone()));
        }
        if transforms.len() != self.ref_skeleton.len() {
            return Err(PushError::TransformCountMismatch {
                subject: self.name.clone(),
                expected: self.ref_skeleton.len(),
                got: transforms.len(),
            });
        }
        let t = time_code.local_time();
        if !t.is_finite() {
            return Err(PushError::NonFiniteTime {
                subject: self.name.clone(),
                time: t,
            });
        }
        if let Some(last_read) = self.last_read_time {
            if t < last_read - stale_epsilon {
                return Err(PushError::StaleFrame {
                    subject: self.name.clone(),
                    time: t,
                    last_read,
                });
            }
        }

        let (values, added) = self.curve_key.align(curves);
        if added > 0 {
            self.buffer.backfill_curves(self.curve_key.len());
            self.curve_names = self.curve_key.names().map(str::to_owned).collect();
        }
        self.buffer.insert(Frame {
            transforms,
            curves: values,
            time_code,
        });
        self.buffer.enforce_capacity(max_frames);
        self.last_modifier = Some(source);
        Ok(())
    }

    /// Produce this tick's frame at local time `now` and advance the read
    /// cursor, pruning history that can no longer be bracketed.
    pub fn evaluate(&mut self, now: f64) -> Option<Frame> {
        let bone_count = self.ref_skeleton.len();
        let (frame, lo, read_time) = if self.settings.use_interpolation {
            let t = now - f64::from(self.settings.interpolation_offset);
            let sample = self.buffer.sample(t, bone_count)?;
            (sample.frame, sample.lo, t)
        } else {
            let latest = self.buffer.latest()?.clone();
            let lo = self.buffer.len() - 1;
            let t = latest.local_time();
            (latest, lo, t)
        };

        self.last_read_frame = self
            .buffer
            .frames()
            .get(lo)
            .map(|f| f.time_code.frame_number);
        self.last_read_time = Some(match self.last_read_time {
            Some(prev) => prev.max(read_time),
            None => read_time,
        });
        self.buffer.prune_before(lo);
        Some(frame)
    }

    /// Evaluate and package a read-only snapshot. Clears the one-tick
    /// topology flag.
    pub fn snapshot(&mut self, now: f64) -> Option<SubjectSnapshot> {
        let frame = self.evaluate(now)?;
        let topology_changed = std::mem::take(&mut self.topology_changed);
        Some(SubjectSnapshot {
            subject: self.name.clone(),
            ref_skeleton: Arc::clone(&self.ref_skeleton),
            curve_names: Arc::clone(&self.curve_names),
            frame,
            last_modifier: self.last_modifier,
            topology_version: self.topology_version,
            topology_changed,
        })
    }
}
