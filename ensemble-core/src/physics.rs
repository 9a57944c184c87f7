//! Derived physical quantities.

/// Specific gas constant for dry air, J/(kg·K).
const RD: f64 = 287.0531;
/// Specific gas constant for water vapor, J/(kg·K).
const RV: f64 = 461.4964;
/// 0 °C in Kelvin.
const KELVIN: f64 = 273.15;

/// Herman Wobus polynomial coefficients, c0 first.
const WOBUS: [f64; 10] = [
    0.99999683,
    -0.90826951e-02,
    0.78736169e-04,
    -0.61117958e-06,
    0.43884187e-08,
    -0.29883885e-10,
    0.21874425e-12,
    -0.17892321e-14,
    0.11112018e-16,
    -0.30994571e-19,
];

/// Saturation vapor pressure in hPa at the given dew point (°C).
pub fn saturation_vapor_pressure(dew_point_c: f64) -> f64 {
    let x = WOBUS
        .iter()
        .rev()
        .fold(0.0, |acc, c| c + dew_point_c * acc);
    6.1078 / x.powi(8)
}

/// Density of humid air in kg/m³.
///
/// `pressure_hpa` is station pressure; temperature and dew point are in °C.
pub fn air_density(temperature_c: f64, pressure_hpa: f64, dew_point_c: f64) -> f64 {
    let pv = saturation_vapor_pressure(dew_point_c);
    let t = temperature_c + KELVIN;

    100.0 * ((pressure_hpa - pv) / (RD * t) + pv / (RV * t))
}
