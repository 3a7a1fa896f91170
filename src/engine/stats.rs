pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`, not `n - 1`).
pub fn population_std_dev(values: &[f64]) -> Option<f64> {
    let center = mean(values)?;
    let variance = values
        .iter()
        .map(|value| (value - center).powi(2))
        .sum::<f64>()
        / values.len() as f64;
    Some(variance.sqrt())
}

pub fn reproducibility<S: AsRef<[f64]>>(per_ticket_scores: &[S]) -> f64 {
    let deviations = per_ticket_scores
        .iter()
        .map(AsRef::as_ref)
        .filter(|scores| scores.len() >= 2)
        .filter_map(population_std_dev)
        .collect::<Vec<_>>();
    mean(&deviations).unwrap_or(0.0)
}

pub fn pass_delta(first_pass: f64, second_pass: f64) -> f64 {
    (first_pass - second_pass).abs()
}

pub fn repeatability<D: AsRef<[f64]>>(per_rater_deltas: &[D]) -> f64 {
    let rater_means = per_rater_deltas
        .iter()
        .filter_map(|deltas| mean(deltas.as_ref()))
        .collect::<Vec<_>>();
    mean(&rater_means).unwrap_or(0.0)
}

pub fn total_range(scores: &[f64]) -> f64 {
    let Some(first) = scores.first() else {
        return 0.0;
    };
    let (low, high) = scores
        .iter()
        .fold((*first, *first), |(low, high), score| {
            (low.min(*score), high.max(*score))
        });
    high - low
}

/// `(reproducibility + repeatability) / range * 100`, or `None` when the
/// observed range is zero and the ratio is undefined.
pub fn rnr_percentage(avg_reproducibility: f64, avg_repeatability: f64, range: f64) -> Option<f64> {
    if range <= 0.0 {
        return None;
    }
    Some((avg_reproducibility + avg_repeatability) / range * 100.0)
}

pub fn accuracy_gap(pairs: &[(f64, f64)]) -> Option<f64> {
    let gaps = pairs
        .iter()
        .map(|(score, anchor)| (score - anchor).abs())
        .collect::<Vec<_>>();
    mean(&gaps)
}

/// Strictly below target passes; equal to target fails; missing data fails.
pub fn passes_target(value: Option<f64>, target: f64) -> bool {
    value.is_some_and(|value| value < target)
}
