//! Combining weighted provider readings into one consensus reading.
//!
//! Linear quantities are weighted means over the providers that reported
//! them. Wind bearing uses the circular mean. Categorical fields and
//! timestamps are taken from the heaviest provider that reported them,
//! the earlier provider winning a tie.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};

use crate::{
    bearing::{self, BearingSample},
    error::EnsembleError,
    model::{ForecastSeries, ForecastShape, Reading},
};

/// Combines `(reading, weight)` pairs into one reading.
///
/// Weights need not sum to one; they are renormalised per field over the
/// readings that actually carry that field, so a field absent from every
/// input stays absent. Non-positive weights are ignored.
pub fn aggregate_readings(inputs: &[(&Reading, f64)]) -> Result<Reading, EnsembleError> {
    let inputs: Vec<(&Reading, f64)> = inputs
        .iter()
        .copied()
        .filter(|(_, w)| w.is_finite() && *w > 0.0)
        .collect();

    match inputs.as_slice() {
        [] => return Err(EnsembleError::NothingToAggregate),
        [(only, _)] => return Ok((*only).clone()),
        _ => {}
    }

    let mean = |field: fn(&Reading) -> Option<f64>| {
        weighted_mean(inputs.iter().filter_map(|&(r, w)| field(r).map(|v| (v, w))))
    };

    Ok(Reading {
        time: heaviest(&inputs, |r| r.time),
        icon: heaviest(&inputs, |r| r.icon.clone()),
        summary: heaviest(&inputs, |r| r.summary.clone()),
        temperature: mean(|r| r.temperature),
        apparent_temperature: mean(|r| r.apparent_temperature),
        dew_point: mean(|r| r.dew_point),
        humidity: mean(|r| r.humidity),
        precip_probability: mean(|r| r.precip_probability),
        precip_intensity: mean(|r| r.precip_intensity),
        precip_type: heaviest(&inputs, |r| r.precip_type.clone()),
        pressure: mean(|r| r.pressure),
        air_density: mean(|r| r.air_density),
        cloud_cover: mean(|r| r.cloud_cover),
        uv_index: mean(|r| r.uv_index),
        wind_speed: mean(|r| r.wind_speed),
        wind_gust: mean(|r| r.wind_gust),
        wind_bearing: mean_bearing(&inputs),
        sunrise: heaviest(&inputs, |r| r.sunrise),
        sunset: heaviest(&inputs, |r| r.sunset),
    })
}

/// Aligns forecast series by time and aggregates each slot.
///
/// Hourly records are matched on the UTC hour they start in; daily records
/// on their calendar day in `offset`. A provider that does not cover a slot
/// simply does not contribute to it. Records without a timestamp cannot be
/// aligned and are skipped.
pub fn aggregate_forecasts(
    inputs: &[(&ForecastSeries, f64)],
    offset: FixedOffset,
    shape: ForecastShape,
) -> Result<ForecastSeries, EnsembleError> {
    if !inputs.iter().any(|(_, w)| w.is_finite() && *w > 0.0) {
        return Err(EnsembleError::NothingToAggregate);
    }

    let hours = align(inputs, |s| &s.hourly, |t| t.timestamp().div_euclid(3600));
    let days = align(inputs, |s| &s.daily, |t| t.with_timezone(&offset).date_naive());

    let mut hourly = Vec::with_capacity(hours.len().min(shape.hours));
    for (hour, group) in hours.into_iter().take(shape.hours) {
        let mut reading = aggregate_readings(&group)?;
        reading.time = DateTime::from_timestamp(hour * 3600, 0);
        hourly.push(reading);
    }

    let mut daily = Vec::with_capacity(days.len().min(shape.days));
    for (day, group) in days.into_iter().take(shape.days) {
        let mut reading = aggregate_readings(&group)?;
        reading.time = local_midnight(day, offset).or(reading.time);
        daily.push(reading);
    }

    Ok(ForecastSeries { hourly, daily })
}

fn align<'a, K: Ord>(
    inputs: &[(&'a ForecastSeries, f64)],
    series: fn(&ForecastSeries) -> &Vec<Reading>,
    key: impl Fn(DateTime<Utc>) -> K,
) -> BTreeMap<K, Vec<(&'a Reading, f64)>> {
    let mut slots: BTreeMap<K, Vec<(&'a Reading, f64)>> = BTreeMap::new();

    for &(s, w) in inputs {
        if !(w.is_finite() && w > 0.0) {
            continue;
        }
        let mut skipped = 0usize;
        for reading in series(s) {
            match reading.time {
                Some(t) => slots.entry(key(t)).or_default().push((reading, w)),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "dropping forecast records without a timestamp");
        }
    }

    slots
}

fn local_midnight(day: NaiveDate, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let midnight = day.and_hms_opt(0, 0, 0)?;
    offset
        .from_local_datetime(&midnight)
        .single()
        .map(|t| t.with_timezone(&Utc))
}

fn weighted_mean(values: impl Iterator<Item = (f64, f64)>) -> Option<f64> {
    let (sum, total) = values
        .filter(|(v, _)| v.is_finite())
        .fold((0.0, 0.0), |(sum, total), (v, w)| (sum + v * w, total + w));

    (total > 0.0).then(|| sum / total)
}

/// Field value of the heaviest reading that has one.
fn heaviest<T>(inputs: &[(&Reading, f64)], field: impl Fn(&Reading) -> Option<T>) -> Option<T> {
    let mut best: Option<(T, f64)> = None;
    for &(r, w) in inputs {
        if let Some(v) = field(r) {
            if best.as_ref().is_none_or(|(_, bw)| w > *bw) {
                best = Some((v, w));
            }
        }
    }
    best.map(|(v, _)| v)
}

/// Circular mean of the wind bearing.
///
/// Bearings are weighted by wind speed. A provider that reports a bearing
/// without a speed has no vector to add and is left out of that pass.
/// If the speed-weighted pass has no defined direction (calm, cancelling
/// winds, or no speeds at all) every bearing counts as a unit vector;
/// failing that, the heaviest provider's bearing is used.
fn mean_bearing(inputs: &[(&Reading, f64)]) -> Option<f64> {
    let with_bearing: Vec<(f64, Option<f64>, f64)> = inputs
        .iter()
        .filter_map(|&(r, w)| {
            let b = r.wind_bearing.filter(|b| b.is_finite())?;
            Some((b, r.wind_speed.filter(|s| s.is_finite() && *s >= 0.0), w))
        })
        .collect();

    if with_bearing.is_empty() {
        return None;
    }

    let by_speed: Vec<BearingSample> = with_bearing
        .iter()
        .filter_map(|&(bearing, speed, weight)| {
            speed.map(|magnitude| BearingSample {
                magnitude,
                bearing,
                weight,
            })
        })
        .collect();

    if let Some(v) = bearing::circular_mean(&by_speed) {
        return Some(v.bearing);
    }

    let unit: Vec<BearingSample> = with_bearing
        .iter()
        .map(|&(bearing, _, weight)| BearingSample {
            magnitude: 1.0,
            bearing,
            weight,
        })
        .collect();

    bearing::circular_mean(&unit)
        .map(|v| v.bearing)
        .or_else(|| heaviest(inputs, |r| r.wind_bearing.map(bearing::normalize_bearing)))
}
