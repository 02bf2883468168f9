// THEORY:
// The `world` module describes the shape of the space every sensor reports into.
// The world is a torus: an object that leaves the right edge re-enters on the
// left, and one that leaves the bottom re-enters at the top. Two pieces of
// geometry follow from that, and every higher layer depends on them:
//
// 1.  **Wraparound Distance**: The separation along each axis is the shorter of
//     the direct gap and the gap "around the back". Two readings at x = 1 and
//     x = 99 in a 100-wide world are 2 units apart, not 98.
// 2.  **Circular Mean**: Averaging positions naively breaks across an edge (the
//     mean of 1 and 99 is 50, the far side of the world). Each coordinate is
//     instead mapped to an angle on a circle the size of its axis, averaged as a
//     weighted vector sum, and mapped back.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

/// The dimensions of the toroidal world, in world units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldBounds {
    pub width: f64,
    pub height: f64,
}

impl WorldBounds {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Euclidean norm of the per-axis wraparound separations.
    pub fn wrapped_distance(&self, a: (f64, f64), b: (f64, f64)) -> f64 {
        let dx = wrapped_separation(a.0, b.0, self.width);
        let dy = wrapped_separation(a.1, b.1, self.height);
        (dx * dx + dy * dy).sqrt()
    }

    /// Shifts `point` by whole world lengths so it is the copy nearest to
    /// `reference`. Lets a non-wrapping filter follow an object across an edge.
    pub fn unwrap_near(&self, reference: (f64, f64), point: (f64, f64)) -> (f64, f64) {
        (
            unwrap_axis(reference.0, point.0, self.width),
            unwrap_axis(reference.1, point.1, self.height),
        )
    }

    /// Maps any point back into `[0, width) x [0, height)`.
    pub fn normalize(&self, point: (f64, f64)) -> (f64, f64) {
        (normalize_axis(point.0, self.width), normalize_axis(point.1, self.height))
    }

    /// Confidence-weighted circular mean of a set of `(x, y, weight)` samples.
    /// Returns `None` for an empty set.
    pub fn circular_mean<I>(&self, samples: I) -> Option<(f64, f64)>
    where
        I: IntoIterator<Item = (f64, f64, f64)>,
    {
        let mut x_axis = AngleAccumulator::default();
        let mut y_axis = AngleAccumulator::default();
        let mut count = 0usize;

        for (x, y, weight) in samples {
            x_axis.add(x / self.width * TAU, weight);
            y_axis.add(y / self.height * TAU, weight);
            count += 1;
        }

        if count == 0 {
            return None;
        }
        Some((x_axis.mean(self.width), y_axis.mean(self.height)))
    }
}

/// Shortest separation between two coordinates on an axis that wraps at `size`.
/// Coordinates outside `[0, size)` are tolerated.
fn wrapped_separation(a: f64, b: f64, size: f64) -> f64 {
    let direct = (b - a).abs().rem_euclid(size);
    direct.min(size - direct)
}

fn unwrap_axis(reference: f64, value: f64, size: f64) -> f64 {
    value - ((value - reference) / size).round() * size
}

fn normalize_axis(value: f64, size: f64) -> f64 {
    let wrapped = value.rem_euclid(size);
    if wrapped >= size { 0.0 } else { wrapped }
}

/// Running weighted and unweighted sine/cosine sums for one axis.
#[derive(Debug, Default)]
struct AngleAccumulator {
    weighted_sin: f64,
    weighted_cos: f64,
    total_weight: f64,
    plain_sin: f64,
    plain_cos: f64,
}

impl AngleAccumulator {
    fn add(&mut self, angle: f64, weight: f64) {
        let (sin, cos) = angle.sin_cos();
        self.weighted_sin += sin * weight;
        self.weighted_cos += cos * weight;
        self.total_weight += weight;
        self.plain_sin += sin;
        self.plain_cos += cos;
    }

    /// Mean position on an axis of length `size`, normalized into `[0, size)`.
    /// When every sample carries zero weight the unweighted mean is used.
    fn mean(&self, size: f64) -> f64 {
        let (sin, cos) = if self.total_weight > f64::EPSILON {
            (self.weighted_sin, self.weighted_cos)
        } else {
            (self.plain_sin, self.plain_cos)
        };
        let position = sin.atan2(cos) / TAU * size;
        let normalized = if position < 0.0 { position + size } else { position };
        // A tiny negative angle can round up to exactly `size`.
        if normalized >= size { 0.0 } else { normalized }
    }
}
