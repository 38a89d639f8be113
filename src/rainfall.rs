// Rainfall aggregation: annual series for trend charts and the standardized
// anomaly used as a ward factor.
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config::{RainfallConfig, RainfallResolution};
use crate::error::{RunReport, Warning};
use crate::types::{AnnualRainfall, RainfallRecord, RainfallSummary, Ward};
use crate::util::{average, std_dev};

/// Sum records into one total per year. A year carrying an annual record
/// (no month) uses that record; otherwise its monthly values are summed.
pub fn annual_totals<'a>(
    records: impl IntoIterator<Item = &'a RainfallRecord>,
) -> BTreeMap<i32, f64> {
    let mut annual: BTreeMap<i32, f64> = BTreeMap::new();
    let mut monthly: BTreeMap<i32, f64> = BTreeMap::new();
    for r in records {
        match r.month {
            None => *annual.entry(r.year).or_insert(0.0) += r.value,
            Some(_) => *monthly.entry(r.year).or_insert(0.0) += r.value,
        }
    }
    for (year, total) in monthly {
        annual.entry(year).or_insert(total);
    }
    annual
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnomalyStats {
    pub long_run_mean: f64,
    pub std_dev: f64,
    pub recent_mean: f64,
    pub anomaly: f64,
}

/// Compare the mean of the last `recent_years` totals with the long-run mean,
/// in units of the long-run standard deviation.
pub fn anomaly(totals: &BTreeMap<i32, f64>, recent_years: usize) -> AnomalyStats {
    let values: Vec<f64> = totals.values().copied().collect();
    let long_run_mean = average(&values);
    let sd = std_dev(&values);
    let take = recent_years.min(values.len());
    let recent_mean = average(&values[values.len() - take..]);
    let anomaly = if sd > 0.0 {
        (recent_mean - long_run_mean) / sd
    } else {
        0.0
    };
    AnomalyStats {
        long_run_mean,
        std_dev: sd,
        recent_mean,
        anomaly,
    }
}

/// City-wide series: untagged records when there are any, otherwise the mean
/// of the per-ward totals for each year.
fn city_totals(records: &[RainfallRecord]) -> BTreeMap<i32, f64> {
    let untagged: Vec<&RainfallRecord> = records.iter().filter(|r| r.ward_id.is_none()).collect();
    if !untagged.is_empty() {
        return annual_totals(untagged);
    }
    let mut per_year: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for totals in ward_totals(records).values() {
        for (year, total) in totals {
            per_year.entry(*year).or_default().push(*total);
        }
    }
    per_year.into_iter().map(|(y, v)| (y, average(&v))).collect()
}

fn ward_totals(records: &[RainfallRecord]) -> BTreeMap<u32, BTreeMap<i32, f64>> {
    let mut grouped: BTreeMap<u32, Vec<&RainfallRecord>> = BTreeMap::new();
    for r in records {
        if let Some(id) = r.ward_id {
            grouped.entry(id).or_default().push(r);
        }
    }
    grouped
        .into_iter()
        .map(|(id, rs)| (id, annual_totals(rs)))
        .collect()
}

pub fn summarize(
    records: &[RainfallRecord],
    wards: &[Ward],
    config: &RainfallConfig,
    report: &mut RunReport,
) -> RainfallSummary {
    let totals = city_totals(records);
    let stats = anomaly(&totals, config.recent_years);
    let series = totals
        .iter()
        .map(|(&year, &total)| AnnualRainfall {
            year,
            total,
            deviation_from_mean: total - stats.long_run_mean,
        })
        .collect();

    let mut ward_anomalies = BTreeMap::new();
    if config.resolution == RainfallResolution::PerWard {
        let per_ward = ward_totals(records);
        for ward in wards {
            match per_ward.get(&ward.id) {
                Some(t) => {
                    ward_anomalies.insert(ward.id, anomaly(t, config.recent_years).anomaly);
                }
                None => {
                    warn!("no rainfall records for ward {}; using city-wide anomaly", ward.id);
                    report.push(Warning::RainfallFallback { ward_id: ward.id });
                    ward_anomalies.insert(ward.id, stats.anomaly);
                }
            }
        }
    }

    info!(
        "rainfall: {} years, long-run mean {:.1}, city anomaly {:.3}",
        totals.len(),
        stats.long_run_mean,
        stats.anomaly
    );
    RainfallSummary {
        series,
        long_run_mean: stats.long_run_mean,
        std_dev: stats.std_dev,
        recent_mean: stats.recent_mean,
        city_anomaly: stats.anomaly,
        ward_anomalies,
    }
}

impl RainfallSummary {
    /// The anomaly that applies to a ward under the configured resolution.
    pub fn anomaly_for(&self, ward_id: u32) -> f64 {
        self.ward_anomalies
            .get(&ward_id)
            .copied()
            .unwrap_or(self.city_anomaly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::MultiPolygon;

    fn annual(year: i32, value: f64) -> RainfallRecord {
        RainfallRecord { year, month: None, value, ward_id: None }
    }

    fn ward(id: u32) -> Ward {
        Ward {
            id,
            name: format!("W{}", id),
            boundary: MultiPolygon::new(vec![]),
            area_sqkm: 1.0,
        }
    }

    #[test]
    fn monthly_records_sum_into_years() {
        let records = vec![
            RainfallRecord { year: 2001, month: Some(6), value: 100.0, ward_id: None },
            RainfallRecord { year: 2001, month: Some(7), value: 150.0, ward_id: None },
            annual(2002, 900.0),
        ];
        let totals = annual_totals(&records);
        assert_eq!(totals[&2001], 250.0);
        assert_eq!(totals[&2002], 900.0);
    }

    #[test]
    fn wet_recent_years_give_positive_anomaly() {
        let totals: BTreeMap<i32, f64> =
            [(2000, 800.0), (2001, 800.0), (2002, 1200.0), (2003, 1200.0)].into_iter().collect();
        let stats = anomaly(&totals, 2);
        assert_eq!(stats.long_run_mean, 1000.0);
        assert_eq!(stats.std_dev, 200.0);
        assert_eq!(stats.recent_mean, 1200.0);
        assert_eq!(stats.anomaly, 1.0);
    }

    #[test]
    fn flat_series_has_zero_anomaly() {
        let totals: BTreeMap<i32, f64> = [(2000, 900.0), (2001, 900.0)].into_iter().collect();
        assert_eq!(anomaly(&totals, 1).anomaly, 0.0);
        assert_eq!(anomaly(&BTreeMap::new(), 10).anomaly, 0.0);
    }

    #[test]
    fn series_carries_deviation_from_mean() {
        let records = vec![annual(1901, 700.0), annual(1902, 900.0)];
        let mut report = RunReport::default();
        let s = summarize(&records, &[], &RainfallConfig::default(), &mut report);
        assert_eq!(s.series.len(), 2);
        assert_eq!(s.series[0].deviation_from_mean, -100.0);
        assert_eq!(s.series[1].deviation_from_mean, 100.0);
        assert!(s.ward_anomalies.is_empty());
    }

    #[test]
    fn per_ward_resolution_falls_back_to_city_value() {
        let mut records = vec![annual(2000, 800.0), annual(2001, 1200.0)];
        records.push(RainfallRecord { year: 2000, month: None, value: 1200.0, ward_id: Some(1) });
        records.push(RainfallRecord { year: 2001, month: None, value: 800.0, ward_id: Some(1) });
        let config = RainfallConfig { resolution: RainfallResolution::PerWard, recent_years: 1 };
        let mut report = RunReport::default();
        let s = summarize(&records, &[ward(1), ward(2)], &config, &mut report);
        assert_eq!(s.anomaly_for(1), -1.0);
        assert_eq!(s.anomaly_for(2), s.city_anomaly);
        assert_eq!(s.city_anomaly, 1.0);
        assert_eq!(report.warnings, vec![Warning::RainfallFallback { ward_id: 2 }]);
    }
}
