//! Interpolation helpers for bone transforms and curve values.
//!
//! Translation and scale blend linearly; rotation uses shortest-arc SLERP,
//! degrading to normalized LERP when the two rotations are nearly parallel.

use serde::{Deserialize, Serialize};

/// Above this |dot| the SLERP weights lose precision; NLERP is used instead.
const SLERP_PARALLEL_DOT: f32 = 0.9995;

/// Bone-local transform split into translation, rotation quat (x,y,z,w), scale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: [f32; 3],
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        translation: [0.0, 0.0, 0.0],
        rotation: [0.0, 0.0, 0.0, 1.0],
        scale: [1.0, 1.0, 1.0],
    };

    pub fn from_translation(translation: [f32; 3]) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    /// Component-wise blend toward `other` at `alpha` in [0, 1].
    pub fn interpolate(&self, other: &Transform, alpha: f32) -> Transform {
        Transform {
            translation: lerp_vec3(self.translation, other.translation, alpha),
            rotation: slerp_quat(self.rotation, other.rotation, alpha),
            scale: lerp_vec3(self.scale, other.scale, alpha),
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[inline]
pub fn lerp_f32(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[inline]
pub fn lerp_vec3(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        lerp_f32(a[0], b[0], t),
        lerp_f32(a[1], b[1], t),
        lerp_f32(a[2], b[2], t),
    ]
}

#[inline]
fn lerp_vec4(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    [
        lerp_f32(a[0], b[0], t),
        lerp_f32(a[1], b[1], t),
        lerp_f32(a[2], b[2], t),
        lerp_f32(a[3], b[3], t),
    ]
}

#[inline]
fn dot4(a: [f32; 4], b: [f32; 4]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2] + a[3] * b[3]
}

#[inline]
fn normalize4(mut q: [f32; 4]) -> [f32; 4] {
    let len2 = dot4(q, q);
    if len2 > 0.0 {
        let inv_len = len2.sqrt().recip();
        q[0] *= inv_len;
        q[1] *= inv_len;
        q[2] *= inv_len;
        q[3] *= inv_len;
    }
    q
}

/// Quaternion NLERP with shortest-arc correction.
#[inline]
pub fn nlerp_quat(a: [f32; 4], mut b: [f32; 4], t: f32) -> [f32; 4] {
    if dot4(a, b) < 0.0 {
        b = [-b[0], -b[1], -b[2], -b[3]];
    }
    normalize4(lerp_vec4(a, b, t))
}

/// Spherical interpolation along the shorter arc. Returns a normalized quat.
pub fn slerp_quat(a: [f32; 4], mut b: [f32; 4], t: f32) -> [f32; 4] {
    let mut d = dot4(a, b);
    if d < 0.0 {
        b = [-b[0], -b[1], -b[2], -b[3]];
        d = -d;
    }
    if d > SLERP_PARALLEL_DOT {
        return nlerp_quat(a, b, t);
    }
    let theta = d.min(1.0).acos();
    let inv_sin = theta.sin().recip();
    let wa = ((1.0 - t) * theta).sin() * inv_sin;
    let wb = (t * theta).sin() * inv_sin;
    normalize4([
        a[0] * wa + b[0] * wb,
        a[1] * wa + b[1] * wb,
        a[2] * wa + b[2] * wb,
        a[3] * wa + b[3] * wb,
    ])
}

/// Blend two optional curve samples: both set lerps, one set wins verbatim.
#[inline]
pub fn blend_curve(a: Option<f32>, b: Option<f32>, t: f32) -> Option<f32> {
    match (a, b) {
        (Some(va), Some(vb)) => Some(lerp_f32(va, vb, t)),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    }
}
