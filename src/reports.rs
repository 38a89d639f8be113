use crate::pipeline::RunOutput;
use crate::types::{
    HotspotCell, HotspotRow, RainfallRow, RainfallSummary, RunSummary, WardScore, WardScoreRow,
    INSUFFICIENT_DATA,
};
use crate::util::{average, format_number, median};
use std::cmp::Ordering;
use std::collections::BTreeMap;

fn score_or_placeholder(v: Option<f64>, decimals: usize) -> String {
    match v {
        Some(v) => format_number(v, decimals),
        None => INSUFFICIENT_DATA.to_string(),
    }
}

/// One row per ward, in ward id order. Degenerate wards keep their raw
/// factors but show the placeholder in every derived column.
pub fn ward_table(scores: &[WardScore]) -> Vec<WardScoreRow> {
    scores
        .iter()
        .map(|s| {
            let f = &s.factors;
            let n = s.normalized;
            WardScoreRow {
                ward_id: s.ward_id,
                ward_name: s.name.clone(),
                area_sqkm: format_number(f.area_sqkm, 2),
                drain_density: format_number(f.drain_density, 4),
                incident_count: f.incident_count,
                lowlying_fraction: format_number(f.lowlying_fraction, 4),
                rainfall_anomaly: format_number(f.rainfall_anomaly, 4),
                proximity_incidents: f.proximity_incidents,
                norm_drain: score_or_placeholder(n.map(|n| n.drain_density), 4),
                norm_incident: score_or_placeholder(n.map(|n| n.incident_count), 4),
                norm_lowlying: score_or_placeholder(n.map(|n| n.lowlying_fraction), 4),
                norm_rainfall: score_or_placeholder(n.map(|n| n.rainfall_anomaly), 4),
                composite_score: score_or_placeholder(s.composite_score, 2),
                category: s.category_label().to_string(),
            }
        })
        .collect()
}

/// Same rows, most vulnerable first; unscored wards sink to the bottom and
/// ties fall back to ward id.
pub fn ranked_ward_table(scores: &[WardScore]) -> Vec<WardScoreRow> {
    let mut ordered: Vec<&WardScore> = scores.iter().collect();
    ordered.sort_by(|a, b| match (a.composite_score, b.composite_score) {
        (Some(x), Some(y)) => y
            .partial_cmp(&x)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.ward_id.cmp(&b.ward_id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.ward_id.cmp(&b.ward_id),
    });
    let owned: Vec<WardScore> = ordered.into_iter().cloned().collect();
    ward_table(&owned)
}

pub fn hotspot_table(cells: &[HotspotCell]) -> Vec<HotspotRow> {
    cells
        .iter()
        .map(|c| HotspotRow {
            ward_id: c.ward_id,
            row: c.row,
            col: c.col,
            area_sqkm: format_number(c.area_sqkm, 4),
            incident_count: c.incident_count,
            score: format_number(c.score, 4),
            level: c.level.label().to_string(),
        })
        .collect()
}

pub fn rainfall_table(summary: &RainfallSummary) -> Vec<RainfallRow> {
    summary
        .series
        .iter()
        .map(|a| RainfallRow {
            year: a.year,
            total: format_number(a.total, 2),
            deviation_from_mean: format_number(a.deviation_from_mean, 2),
        })
        .collect()
}

pub fn generate_summary(output: &RunOutput) -> RunSummary {
    let composites: Vec<f64> = output
        .scores
        .iter()
        .filter_map(|s| s.composite_score)
        .collect();
    let mut category_counts: BTreeMap<String, usize> = BTreeMap::new();
    for s in &output.scores {
        *category_counts
            .entry(s.category_label().to_string())
            .or_insert(0) += 1;
    }
    let report = &output.report;
    RunSummary {
        status: report.status(),
        wards_loaded: report.wards_loaded,
        wards_scored: report.wards_scored,
        degenerate_wards: report.degenerate_wards,
        hotspot_cells: output.hotspots.len(),
        mean_score: average(&composites),
        median_score: median(composites),
        category_counts,
        city_rainfall_anomaly: output.rainfall.city_anomaly,
        features_unassigned: report.features_unassigned,
        warnings: report.warnings.len(),
    }
}
