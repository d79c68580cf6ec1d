//! Sample conversion and patch packing.
//!
//! These mirror the view SQL in plain Rust: [`TrajectoryPoint::from_sample`]
//! is the per-sample transform (without reprojection) and [`pack_patches`]
//! is the `GROUP BY id ... ORDER BY m_time` aggregation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::orientation::Quaternion;
use super::time::GpsWeek;

/// One SBET sample as read from the source table.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SbetSample {
    /// Source row (patch) id.
    pub id: i64,
    /// Seconds into the GPS week.
    pub m_time: f64,
    /// Longitude, degrees.
    pub x: f64,
    /// Latitude, degrees.
    pub y: f64,
    /// Elevation, meters.
    pub z: f64,
    /// Radians.
    pub heading: f64,
    pub pitch: f64,
    pub roll: f64,
}

/// A point in the canonical layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrajectoryPoint {
    pub orientation: Quaternion,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Unix epoch seconds.
    pub time: f64,
}

impl TrajectoryPoint {
    pub fn from_sample(sample: &SbetSample, week: &GpsWeek) -> Self {
        Self {
            orientation: Quaternion::from_heading_pitch_roll(
                sample.heading,
                sample.pitch,
                sample.roll,
            ),
            x: sample.x,
            y: sample.y,
            z: sample.z,
            time: week.absolute_time(sample.m_time),
        }
    }

    /// Values in dimension order `qw, qx, qy, qz, x, y, z, time`.
    pub fn values(&self) -> [f64; 8] {
        let [qw, qx, qy, qz] = self.orientation.as_array();
        [qw, qx, qy, qz, self.x, self.y, self.z, self.time]
    }
}

/// Points of one source row, ordered by time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patch {
    pub id: i64,
    pub points: Vec<TrajectoryPoint>,
}

impl Patch {
    pub fn is_time_ordered(&self) -> bool {
        self.points.windows(2).all(|w| w[0].time <= w[1].time)
    }

    /// Time bounds, the values indexed by `pc_patchmin`/`pc_patchmax`.
    pub fn time_range(&self) -> Option<(f64, f64)> {
        Some((self.points.first()?.time, self.points.last()?.time))
    }
}

/// Convert samples and group them into one patch per source id.
///
/// Patches come out by ascending id; points within a patch by
/// non-decreasing time, ties keeping input order.
pub fn pack_patches(samples: &[SbetSample], week: &GpsWeek) -> Vec<Patch> {
    let mut grouped: BTreeMap<i64, Vec<TrajectoryPoint>> = BTreeMap::new();
    for sample in samples {
        grouped
            .entry(sample.id)
            .or_default()
            .push(TrajectoryPoint::from_sample(sample, week));
    }

    grouped
        .into_iter()
        .map(|(id, mut points)| {
            points.sort_by(|a, b| a.time.total_cmp(&b.time));
            Patch { id, points }
        })
        .collect()
}
