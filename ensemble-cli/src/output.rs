//! Plain-text rendering of readings and forecasts.

use std::fmt::Write;

use chrono::FixedOffset;
use ensemble_core::{ForecastSeries, Reading};

const MPS_TO_KPH: f64 = 3.6;

fn opt(value: Option<f64>, precision: usize, unit: &str) -> String {
    match value {
        Some(v) => format!("{v:.precision$}{unit}"),
        None => "n/a".to_string(),
    }
}

fn percent(value: Option<f64>) -> String {
    opt(value.map(|v| v * 100.0), 0, "%")
}

fn wind(r: &Reading) -> String {
    let mut line = opt(r.wind_speed.map(|s| s * MPS_TO_KPH), 1, " km/h");
    if let Some(gust) = r.wind_gust {
        let _ = write!(line, " (gusts {:.1} km/h)", gust * MPS_TO_KPH);
    }
    if let (Some(dir), Some(bearing)) = (r.wind_direction(), r.wind_bearing) {
        let _ = write!(line, " {dir} ({bearing:.0}°)");
    }
    line
}

/// Multi-line summary of a single reading.
pub fn reading(r: &Reading) -> String {
    let mut out = String::new();

    let icon = r.icon.as_deref().unwrap_or("unknown").to_uppercase();
    match &r.summary {
        Some(summary) => {
            let _ = writeln!(out, "{icon}: {summary}");
        }
        None => {
            let _ = writeln!(out, "{icon}");
        }
    }

    let _ = writeln!(
        out,
        "Temperature: {} (feels like {}), humidity {}",
        opt(r.temperature, 1, "°C"),
        opt(r.apparent_temperature, 1, "°C"),
        percent(r.humidity),
    );
    let _ = writeln!(out, "Wind: {}", wind(r));
    let _ = writeln!(
        out,
        "Pressure: {}, air density {}",
        opt(r.pressure, 1, " hPa"),
        opt(r.air_density, 3, " kg/m³"),
    );

    let wet = r.precip_probability.is_some_and(|p| p > 0.0)
        || r.precip_intensity.is_some_and(|i| i > 0.0);
    if wet {
        let _ = writeln!(
            out,
            "Precipitation: {} chance of {}, {}",
            percent(r.precip_probability),
            r.precip_type.as_deref().unwrap_or("precipitation"),
            opt(r.precip_intensity, 1, " mm/h"),
        );
    }

    let _ = write!(
        out,
        "UV index: {}, cloud cover {}",
        opt(r.uv_index, 0, ""),
        percent(r.cloud_cover),
    );
    out
}

fn hour_line(r: &Reading, offset: FixedOffset) -> String {
    let time = r
        .time
        .map(|t| t.with_timezone(&offset).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());
    format!(
        "  {time}  {:>8}  {:>5}  {:<10}  {}",
        opt(r.temperature, 1, "°C"),
        percent(r.precip_probability),
        r.icon.as_deref().unwrap_or("-"),
        wind(r),
    )
}

/// Day-by-day forecast with the hourly records nested under their day.
pub fn forecast(series: &ForecastSeries, offset: FixedOffset) -> String {
    let mut out = String::new();

    for day in &series.daily {
        let Some(time) = day.time else { continue };
        let date = time.with_timezone(&offset).date_naive();

        let _ = writeln!(
            out,
            "{}  {} / {}  {}",
            date.format("%a %Y-%m-%d"),
            opt(day.temperature, 1, "°C"),
            percent(day.precip_probability),
            day.summary.as_deref().or(day.icon.as_deref()).unwrap_or(""),
        );
        for hour in series.hourly_on(date, offset) {
            let _ = writeln!(out, "{}", hour_line(hour, offset));
        }
    }

    out.trim_end().to_string()
}
