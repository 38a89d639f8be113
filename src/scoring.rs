// Resilience index: population-wide normalization of the raw factors and
// their weighted combination into a 0..=100 composite (0 = most resilient,
// 100 = most vulnerable).
//
// Runs in two phases. The first collects the factor columns of every
// scorable ward; only then does the second normalize and score, so every
// ward is measured against the same full population.

use tracing::info;

use crate::config::{Bands, EngineConfig, NormalizationMethod};
use crate::error::{EngineError, RunReport};
use crate::factors::is_degenerate;
use crate::types::{Category, Factors, NormalizedFactors, Ward, WardScore};

const FACTOR_COUNT: usize = 5;

/// Min-max rescaling to [0, 1]. Returns `None` when the column has no spread,
/// in which case the factor carries no information for this population.
pub fn minmax_normalise(values: &[f64]) -> Option<Vec<f64>> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    // Relative test so that rescaling every value leaves the outcome unchanged.
    if values.is_empty() || !(range > f64::EPSILON * max.abs().max(min.abs())) {
        return None;
    }
    Some(
        values
            .iter()
            .map(|v| ((v - min) / range).clamp(0.0, 1.0))
            .collect(),
    )
}

/// Rank-based rescaling: average ranks for ties, rank r of n maps to
/// (r - 1) / (n - 1). `None` when every value ties.
pub fn percentile_normalise(values: &[f64]) -> Option<Vec<f64>> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mut indexed: Vec<(usize, f64)> = values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| a.1.total_cmp(&b.1));
    if indexed[0].1 == indexed[n - 1].1 {
        return None;
    }

    let mut ranks = vec![0.0f64; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && indexed[j + 1].1 == indexed[i].1 {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0;
        for k in i..=j {
            ranks[indexed[k].0] = avg_rank / (n - 1) as f64;
        }
        i = j + 1;
    }
    Some(ranks)
}

pub fn normalise(values: &[f64], method: NormalizationMethod) -> Option<Vec<f64>> {
    match method {
        NormalizationMethod::MinMax => minmax_normalise(values),
        NormalizationMethod::Percentile => percentile_normalise(values),
    }
}

pub fn categorize(score: f64, bands: &Bands) -> Category {
    if score >= bands.extreme {
        Category::ExtremeVulnerability
    } else if score >= bands.high {
        Category::HighVulnerability
    } else if score >= bands.moderate {
        Category::Moderate
    } else {
        Category::HighResilience
    }
}

fn factor_row(f: &Factors) -> [f64; FACTOR_COUNT] {
    [
        f.drain_density,
        f.incident_count as f64,
        f.lowlying_fraction,
        f.rainfall_anomaly,
        // Log transform keeps a few dense clusters from flattening the rest.
        (f.proximity_incidents as f64).ln_1p(),
    ]
}

/// Normalize and score the ward population. `factors` is in ward order.
pub fn score_wards(
    wards: &[Ward],
    factors: &[Factors],
    config: &EngineConfig,
    report: &mut RunReport,
) -> Vec<WardScore> {
    // Phase 1: collect the population.
    let population: Vec<usize> = (0..wards.len())
        .filter(|&i| !is_degenerate(&wards[i], config))
        .collect();
    let columns: Vec<Option<Vec<f64>>> = (0..FACTOR_COUNT)
        .map(|c| {
            let raw: Vec<f64> = population.iter().map(|&i| factor_row(&factors[i])[c]).collect();
            normalise(&raw, config.normalization)
        })
        .collect();

    // Phase 2: score each member against the collected columns.
    let weights = config.weights.as_array();
    let invert = config.directions.as_array();
    let mut composites: Vec<f64> = Vec::with_capacity(population.len());
    let mut normalized: Vec<NormalizedFactors> = Vec::with_capacity(population.len());
    for pos in 0..population.len() {
        let mut n = [0.0f64; FACTOR_COUNT];
        for c in 0..FACTOR_COUNT {
            if let Some(col) = &columns[c] {
                n[c] = if invert[c] { 1.0 - col[pos] } else { col[pos] };
            }
        }
        let composite: f64 = n.iter().zip(weights.iter()).map(|(v, w)| v * w).sum();
        composites.push((composite * 100.0).clamp(0.0, 100.0));
        normalized.push(NormalizedFactors {
            drain_density: n[0],
            incident_count: n[1],
            lowlying_fraction: n[2],
            rainfall_anomaly: n[3],
            proximity_incidents: n[4],
        });
    }

    if config.stretch_to_max {
        let max = composites.iter().copied().fold(0.0, f64::max);
        if max > 0.0 {
            for c in &mut composites {
                *c = (*c / max * 100.0).clamp(0.0, 100.0);
            }
        }
    }

    let mut scores: Vec<WardScore> = wards
        .iter()
        .zip(factors)
        .map(|(w, f)| WardScore {
            ward_id: w.id,
            name: w.name.clone(),
            factors: *f,
            normalized: None,
            composite_score: None,
            category: None,
        })
        .collect();
    for (pos, &i) in population.iter().enumerate() {
        let s = &mut scores[i];
        s.normalized = Some(normalized[pos]);
        s.composite_score = Some(composites[pos]);
        s.category = Some(categorize(composites[pos], &config.bands));
    }
    for (i, w) in wards.iter().enumerate() {
        if scores[i].composite_score.is_none() {
            report.recover(EngineError::DegenerateWard(w.id));
        }
    }

    report.wards_scored = population.len();
    info!(
        "scored {} of {} wards ({:?} normalization)",
        population.len(),
        wards.len(),
        config.normalization
    );
    scores
}
