//! Normalisation of user-configured provider weights.

use crate::error::EnsembleError;

/// Tolerance used when deciding whether weights already sum to one.
pub const WEIGHT_EPSILON: f64 = 1e-9;

/// Turns a sparse set of `(key, weight)` slots into weights that sum to 1
/// across every slot with a non-empty key.
///
/// - Slots with an empty key are unconfigured and always get `0.0`.
/// - A total above 1 shrinks every configured weight proportionally.
/// - A total below 1 gives the deficit in equal parts to configured slots
///   whose weight is still unset (zero); explicit weights are kept.
/// - A total below 1 with no unset slot left scales every configured
///   weight up proportionally.
///
/// Fails with [`EnsembleError::NoProviders`] when no slot is configured.
/// Weights are expected to be finite and non-negative.
pub fn normalize_weights(slots: &[(&str, f64)]) -> Result<Vec<f64>, EnsembleError> {
    let (count, total) = slots
        .iter()
        .filter(|(key, _)| is_configured(key))
        .fold((0usize, 0.0_f64), |(n, s), (_, w)| (n + 1, s + *w));

    if count == 0 {
        return Err(EnsembleError::NoProviders);
    }

    let mut weights: Vec<f64> = slots
        .iter()
        .map(|(key, w)| if is_configured(key) { *w } else { 0.0 })
        .collect();

    if (total - 1.0).abs() <= WEIGHT_EPSILON {
        return Ok(weights);
    }

    if total > 1.0 {
        weights.iter_mut().for_each(|w| *w /= total);
        return Ok(weights);
    }

    let unset = slots
        .iter()
        .zip(&weights)
        .filter(|((key, _), w)| is_configured(key) && **w == 0.0)
        .count();

    if unset == 0 {
        weights.iter_mut().for_each(|w| *w /= total);
        return Ok(weights);
    }

    let share = (1.0 - total) / unset as f64;
    for ((key, _), w) in slots.iter().zip(weights.iter_mut()) {
        if is_configured(key) && *w == 0.0 {
            *w = share;
        }
    }

    Ok(weights)
}

/// A slot takes part only when its key is non-blank.
pub(crate) fn is_configured(key: &str) -> bool {
    !key.trim().is_empty()
}
