//! Angular helpers for wind bearings: normalisation, compass labels and the
//! weighted circular mean.

const COMPASS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

const SECTOR: f64 = 360.0 / 16.0;

/// Below this resultant length the mean direction is undefined.
const MIN_RESULTANT: f64 = 1e-9;

/// Maps any finite bearing into `[0, 360)`.
pub fn normalize_bearing(degrees: f64) -> f64 {
    let b = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if b >= 360.0 { 0.0 } else { b }
}

/// 16-point compass label for a bearing, e.g. `"NNE"`.
pub fn compass_point(degrees: f64) -> &'static str {
    let b = normalize_bearing(degrees);
    let index = ((b + SECTOR / 2.0) / SECTOR) as usize % COMPASS.len();
    COMPASS[index]
}

/// Result of combining weighted (magnitude, bearing) vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindVector {
    /// Length of the weighted resultant vector.
    pub magnitude: f64,
    /// Direction of the resultant, in `[0, 360)`.
    pub bearing: f64,
}

/// One input to [`circular_mean`].
#[derive(Debug, Clone, Copy)]
pub struct BearingSample {
    pub magnitude: f64,
    pub bearing: f64,
    pub weight: f64,
}

/// Weighted mean of angular quantities by vector decomposition.
///
/// Each sample is split into north (`m·cos θ`) and east (`m·sin θ`)
/// components, weights are renormalised over the samples, components are
/// summed independently and recombined. Returns `None` when there are no
/// usable samples or the resultant is too short to have a direction
/// (e.g. two equal and opposite winds).
pub fn circular_mean(samples: &[BearingSample]) -> Option<WindVector> {
    let total: f64 = samples
        .iter()
        .filter(|s| s.weight > 0.0)
        .map(|s| s.weight)
        .sum();
    if total <= 0.0 {
        return None;
    }

    let (north, east) = samples
        .iter()
        .filter(|s| s.weight > 0.0)
        .fold((0.0, 0.0), |(n, e), s| {
            let w = s.weight / total;
            let theta = s.bearing.to_radians();
            (n + w * s.magnitude * theta.cos(), e + w * s.magnitude * theta.sin())
        });

    let magnitude = north.hypot(east);
    if magnitude < MIN_RESULTANT {
        return None;
    }

    // atan2 already resolves the quadrant when the north component is
    // negative; only the (-180, 180] range needs folding.
    let bearing = normalize_bearing(east.atan2(north).to_degrees());

    Some(WindVector { magnitude, bearing })
}
