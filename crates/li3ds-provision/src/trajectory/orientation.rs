//! Attitude quaternions from SBET heading, pitch and roll.
//!
//! Composition order is ZYX: yaw about the heading axis, then pitch, then
//! roll. With `c*`/`s*` the cosine/sine of half of each angle:
//!
//! ```text
//! qw = cψ cθ cφ + sψ sθ sφ
//! qx = cψ cθ sφ − sψ sθ cφ
//! qy = cψ sθ cφ + sψ cθ sφ
//! qz = sψ cθ cφ − cψ sθ sφ
//! ```

use serde::{Deserialize, Serialize};

/// Unit quaternion `(w, x, y, z)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Build from heading (ψ), pitch (θ) and roll (φ) in radians.
    pub fn from_heading_pitch_roll(heading: f64, pitch: f64, roll: f64) -> Self {
        let (sh, ch) = (heading / 2.0).sin_cos();
        let (sp, cp) = (pitch / 2.0).sin_cos();
        let (sr, cr) = (roll / 2.0).sin_cos();

        Quaternion {
            w: ch * cp * cr + sh * sp * sr,
            x: ch * cp * sr - sh * sp * cr,
            y: ch * sp * cr + sh * cp * sr,
            z: sh * cp * cr - ch * sp * sr,
        }
    }

    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.w, self.x, self.y, self.z]
    }
}

/// SQL expressions computing `qw, qx, qy, qz` from columns holding the half
/// angles `h`, `p` and `r`, in that output order.
pub fn sql_components(h: &str, p: &str, r: &str) -> [String; 4] {
    [
        format!("cos({h}) * cos({p}) * cos({r}) + sin({h}) * sin({p}) * sin({r})"),
        format!("cos({h}) * cos({p}) * sin({r}) - sin({h}) * sin({p}) * cos({r})"),
        format!("cos({h}) * sin({p}) * cos({r}) + sin({h}) * cos({p}) * sin({r})"),
        format!("sin({h}) * cos({p}) * cos({r}) - cos({h}) * sin({p}) * sin({r})"),
    ]
}
