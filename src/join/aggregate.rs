//! Streaming spatial-temporal aggregation for one target date.
//!
//! An [`Aggregator`] is opened over the active-work index of a date, fed
//! traffic samples one at a time in stream order, and consumed by
//! [`Aggregator::finalize`]. Finalizing takes the aggregator by value, so a
//! pass cannot be resumed or finalized twice.

use std::collections::HashMap;

use chrono::{NaiveDate, Timelike};

use crate::join::cell::{self, GeoCell};
use crate::join::distance::{distance_m, within_radius};
use crate::join::types::{AggregateKey, OutputRow, TrafficSample, WorkEvent};
use crate::join::utility::{mean, percentile_floor, round2};
use crate::join::works::ActiveWorkIndex;

const P90: f64 = 0.9;

/// Running statistics for one [`AggregateKey`].
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateState {
    flows: Vec<f64>,
    /// Label counts in first-seen order.
    status_counts: Vec<(String, u32)>,
    impact: String,
    level: String,
    min_distance_m: f64,
}

impl AggregateState {
    /// Seeds a state from the first match. Impact and level are fixed here.
    fn open(work: &WorkEvent, distance_m: f64) -> Self {
        Self {
            flows: Vec::new(),
            status_counts: Vec::new(),
            impact: work.impact.clone(),
            level: work.level.clone(),
            min_distance_m: distance_m,
        }
    }

    /// Folds one matched sample in.
    pub fn fold(&mut self, flow_per_min: Option<f64>, status: Option<&str>, distance_m: f64) {
        if let Some(flow) = flow_per_min {
            self.flows.push(flow);
        }
        if let Some(label) = status.filter(|s| !s.is_empty()) {
            match self.status_counts.iter_mut().find(|(l, _)| l == label) {
                Some((_, count)) => *count += 1,
                None => self.status_counts.push((label.to_string(), 1)),
            }
        }
        if distance_m < self.min_distance_m {
            self.min_distance_m = distance_m;
        }
    }

    pub fn min_distance_m(&self) -> f64 {
        self.min_distance_m
    }

    /// Most frequent status label.
    ///
    /// Ties go to the label that was first seen in the stream, because counts
    /// are scanned in first-seen order and only a strictly higher count
    /// replaces the current pick.
    pub fn status_mode(&self) -> Option<&str> {
        let mut best: Option<(&str, u32)> = None;
        for (label, count) in &self.status_counts {
            match best {
                Some((_, top)) if *count <= top => {}
                _ => best = Some((label.as_str(), *count)),
            }
        }
        best.map(|(label, _)| label)
    }

    fn into_row(self, key: AggregateKey) -> OutputRow {
        let traffic_status = self.status_mode().unwrap_or_default().to_string();
        OutputRow {
            work_id: key.work_id,
            segment_id: key.segment_id,
            date: key.date,
            hour: key.hour,
            avg_flow_per_min: mean(&self.flows),
            p90_flow_per_min: percentile_floor(&self.flows, P90),
            traffic_status,
            impact: self.impact,
            level: self.level,
            distance_m: self.min_distance_m.is_finite().then(|| round2(self.min_distance_m)),
        }
    }
}

/// Keyed container of aggregate states.
///
/// A state exists only once something matched its key: [`AggregateTable::fold`]
/// creates it on first access and folds into it afterwards.
#[derive(Debug, Default)]
pub struct AggregateTable {
    states: HashMap<AggregateKey, AggregateState>,
}

impl AggregateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a match into the state for `key`, creating it from `work` if absent.
    pub fn fold(
        &mut self,
        key: AggregateKey,
        work: &WorkEvent,
        sample: &TrafficSample,
        distance_m: f64,
    ) -> &AggregateState {
        let state = self
            .states
            .entry(key)
            .or_insert_with(|| AggregateState::open(work, distance_m));
        state.fold(sample.flow_per_min, sample.status.as_deref(), distance_m);
        state
    }

    pub fn get(&self, key: &AggregateKey) -> Option<&AggregateState> {
        self.states.get(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Finalizes every state into an output row, in no particular order.
    pub fn into_rows(self) -> Vec<OutputRow> {
        self.states
            .into_iter()
            .map(|(key, state)| state.into_row(key))
            .collect()
    }
}

/// Outcome of consuming one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumed {
    /// No timestamp, or a timestamp on another date.
    OtherDate,
    /// No usable position.
    Unplaced,
    /// Number of works matched (possibly zero).
    Matched(usize),
}

/// Aggregation pass over one target date.
pub struct Aggregator<'a> {
    index: &'a ActiveWorkIndex,
    date: NaiveDate,
    radius_m: f64,
    table: AggregateTable,
}

impl<'a> Aggregator<'a> {
    pub fn new(index: &'a ActiveWorkIndex, date: NaiveDate, radius_m: f64) -> Self {
        Self {
            index,
            date,
            radius_m,
            table: AggregateTable::new(),
        }
    }

    /// Matches one sample against the active works and folds every match.
    ///
    /// A sample can match several works; each match lands in its own key.
    pub fn consume(&mut self, sample: &TrafficSample) -> Consumed {
        let Some(ts) = sample.timestamp else {
            return Consumed::OtherDate;
        };
        if ts.date_naive() != self.date {
            return Consumed::OtherDate;
        }
        let hour = ts.hour();

        let Some(origin) = sample.position.and_then(GeoCell::of) else {
            return Consumed::Unplaced;
        };

        let index = self.index;
        let reach = cell::reach_for(origin.center().lat, self.radius_m);
        let mut matched = 0;
        for candidate_cell in cell::block(origin, reach) {
            for work in index.lookup(&candidate_cell) {
                let meters = distance_m(sample.position, work.position);
                if !within_radius(meters, self.radius_m) {
                    continue;
                }
                let key = AggregateKey {
                    work_id: work.work_id.clone(),
                    segment_id: sample.segment_id.clone(),
                    date: self.date,
                    hour,
                };
                self.table.fold(key, work, sample, meters);
                matched += 1;
            }
        }
        Consumed::Matched(matched)
    }

    /// Number of keys touched so far.
    pub fn key_count(&self) -> usize {
        self.table.len()
    }

    /// True while no sample has matched a work.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn finalize(self) -> Vec<OutputRow> {
        self.table.into_rows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::distance::haversine_m;
    use crate::join::types::Position;
    use crate::join::works::build_active_index;
    use chrono::{DateTime, Utc};

    const RADIUS: f64 = 150.0;

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn work(id: &str, lat: f64, lon: f64) -> WorkEvent {
        WorkEvent {
            work_id: id.to_string(),
            start: Some(day("2024-06-01")),
            end: Some(day("2024-06-03")),
            impact: "barrage_partiel".to_string(),
            level: "1".to_string(),
            position: Some(Position::new(lat, lon)),
        }
    }

    fn sample(ts: &str, lat: f64, lon: f64, flow: Option<f64>, status: &str) -> TrafficSample {
        TrafficSample {
            segment_id: "seg-1".to_string(),
            timestamp: Some(at(ts)),
            flow_per_min: flow,
            status: Some(status.to_string()).filter(|s| !s.is_empty()),
            position: Some(Position::new(lat, lon)),
        }
    }

    fn state() -> AggregateState {
        AggregateState::open(&work("w", 0.0, 0.0), 100.0)
    }

    #[test]
    fn test_scenario_two_samples_one_row() {
        let index = build_active_index(vec![work("w1", 48.860, 2.350)], day("2024-06-02"));
        let mut agg = Aggregator::new(&index, day("2024-06-02"), RADIUS);

        let s1 = sample("2024-06-02T08:15:00Z", 48.8601, 2.3501, Some(10.0), "fluide");
        let s2 = sample("2024-06-02T08:15:00Z", 48.8602, 2.3502, Some(15.0), "fluide");
        assert_eq!(agg.consume(&s1), Consumed::Matched(1));
        assert_eq!(agg.consume(&s2), Consumed::Matched(1));

        let rows = agg.finalize();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.work_id, "w1");
        assert_eq!(row.segment_id, "seg-1");
        assert_eq!(row.date, day("2024-06-02"));
        assert_eq!(row.hour, 8);
        assert_eq!(row.avg_flow_per_min, Some(12.5));
        // floor(0.9 * 1) = 0 -> lower of the two values
        assert_eq!(row.p90_flow_per_min, Some(10.0));
        assert_eq!(row.traffic_status, "fluide");
        assert_eq!(row.impact, "barrage_partiel");
        assert_eq!(row.level, "1");

        let nearest = haversine_m(Position::new(48.8601, 2.3501), Position::new(48.860, 2.350));
        assert_eq!(row.distance_m, Some(round2(nearest)));
    }

    #[test]
    fn test_far_sample_produces_nothing() {
        let index = build_active_index(vec![work("w1", 48.860, 2.350)], day("2024-06-02"));
        let mut agg = Aggregator::new(&index, day("2024-06-02"), RADIUS);

        // ~0.005° north, well beyond 150 m
        let s = sample("2024-06-02T08:00:00Z", 48.865, 2.350, Some(10.0), "fluide");
        assert_eq!(agg.consume(&s), Consumed::Matched(0));
        assert!(agg.finalize().is_empty());
    }

    #[test]
    fn test_same_cell_beyond_radius_filtered() {
        // Same 0.001° cell, but a 20 m radius is smaller than their separation.
        let index = build_active_index(vec![work("w1", 48.8596, 2.3496)], day("2024-06-02"));
        let mut agg = Aggregator::new(&index, day("2024-06-02"), 20.0);

        let s = sample("2024-06-02T08:00:00Z", 48.8604, 2.3504, Some(1.0), "");
        assert_eq!(
            GeoCell::of(s.position.unwrap()),
            GeoCell::of(Position::new(48.8596, 2.3496))
        );
        assert_eq!(agg.consume(&s), Consumed::Matched(0));
    }

    #[test]
    fn test_boundary_straddle_is_found() {
        // Work and sample round to cells two columns apart yet sit ~120 m apart.
        let w = work("w1", 48.8600, 2.3504);
        let s = sample("2024-06-02T09:00:00Z", 48.8600, 2.3520, Some(3.0), "dense");
        let d = haversine_m(w.position.unwrap(), s.position.unwrap());
        assert!(d < RADIUS, "{d}");

        let index = build_active_index(vec![w], day("2024-06-02"));
        let mut agg = Aggregator::new(&index, day("2024-06-02"), RADIUS);
        assert_eq!(agg.consume(&s), Consumed::Matched(1));
    }

    #[test]
    fn test_sample_fans_out_to_nearby_works() {
        let works = vec![work("w1", 48.8600, 2.3500), work("w2", 48.8605, 2.3505)];
        let index = build_active_index(works, day("2024-06-02"));
        let mut agg = Aggregator::new(&index, day("2024-06-02"), RADIUS);

        let s = sample("2024-06-02T10:30:00Z", 48.8602, 2.3502, Some(4.0), "fluide");
        assert_eq!(agg.consume(&s), Consumed::Matched(2));

        let mut ids: Vec<_> = agg.finalize().into_iter().map(|r| r.work_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["w1", "w2"]);
    }

    #[test]
    fn test_other_date_and_unplaced_ignored() {
        let index = build_active_index(vec![work("w1", 48.860, 2.350)], day("2024-06-02"));
        let mut agg = Aggregator::new(&index, day("2024-06-02"), RADIUS);

        let other_day = sample("2024-06-03T08:00:00Z", 48.860, 2.350, Some(1.0), "");
        assert_eq!(agg.consume(&other_day), Consumed::OtherDate);

        let mut no_ts = sample("2024-06-02T08:00:00Z", 48.860, 2.350, Some(1.0), "");
        no_ts.timestamp = None;
        assert_eq!(agg.consume(&no_ts), Consumed::OtherDate);

        let mut no_pos = sample("2024-06-02T08:00:00Z", 48.860, 2.350, Some(1.0), "");
        no_pos.position = None;
        assert_eq!(agg.consume(&no_pos), Consumed::Unplaced);

        assert_eq!(agg.key_count(), 0);
        assert!(agg.is_empty());
    }

    #[test]
    fn test_hours_split_keys() {
        let index = build_active_index(vec![work("w1", 48.860, 2.350)], day("2024-06-02"));
        let mut agg = Aggregator::new(&index, day("2024-06-02"), RADIUS);

        agg.consume(&sample("2024-06-02T08:59:59Z", 48.860, 2.350, Some(1.0), ""));
        agg.consume(&sample("2024-06-02T09:00:00Z", 48.860, 2.350, Some(2.0), ""));
        assert_eq!(agg.key_count(), 2);
        assert!(!agg.is_empty());
    }

    #[test]
    fn test_status_mode_tie_goes_to_first_seen() {
        let mut s = state();
        for label in ["sature", "fluide", "fluide", "sature"] {
            s.fold(None, Some(label), 50.0);
        }
        assert_eq!(s.status_mode(), Some("sature"));

        let mut s = state();
        for label in ["fluide", "sature", "sature", "fluide"] {
            s.fold(None, Some(label), 50.0);
        }
        assert_eq!(s.status_mode(), Some("fluide"));
    }

    #[test]
    fn test_status_mode_strict_majority() {
        let mut s = state();
        for label in ["fluide", "sature", "sature"] {
            s.fold(None, Some(label), 50.0);
        }
        assert_eq!(s.status_mode(), Some("sature"));
    }

    #[test]
    fn test_blank_status_not_counted() {
        let mut s = state();
        s.fold(Some(1.0), Some(""), 50.0);
        s.fold(Some(1.0), None, 50.0);
        assert_eq!(s.status_mode(), None);
    }

    #[test]
    fn test_min_distance_non_increasing() {
        let mut s = state();
        let mut last = s.min_distance_m();
        for d in [120.0, 80.0, 95.0, 10.0, 60.0] {
            s.fold(None, None, d);
            assert!(s.min_distance_m() <= last);
            last = s.min_distance_m();
        }
        assert_eq!(last, 10.0);
    }

    #[test]
    fn test_table_creates_on_first_fold_only() {
        let w = work("w1", 48.86, 2.35);
        let key = AggregateKey {
            work_id: "w1".to_string(),
            segment_id: "seg-1".to_string(),
            date: day("2024-06-02"),
            hour: 8,
        };
        let s = sample("2024-06-02T08:00:00Z", 48.86, 2.35, Some(5.0), "fluide");

        let mut table = AggregateTable::new();
        assert!(table.get(&key).is_none());
        table.fold(key.clone(), &w, &s, 30.0);
        table.fold(key.clone(), &w, &s, 40.0);

        assert_eq!(table.len(), 1);
        let state = table.get(&key).unwrap();
        assert_eq!(state.min_distance_m(), 30.0);
        assert_eq!(state.status_mode(), Some("fluide"));
    }

    #[test]
    fn test_missing_flow_leaves_stats_absent() {
        let index = build_active_index(vec![work("w1", 48.860, 2.350)], day("2024-06-02"));
        let mut agg = Aggregator::new(&index, day("2024-06-02"), RADIUS);
        agg.consume(&sample("2024-06-02T08:00:00Z", 48.860, 2.350, None, "fluide"));

        let rows = agg.finalize();
        assert_eq!(rows[0].avg_flow_per_min, None);
        assert_eq!(rows[0].p90_flow_per_min, None);
        assert_eq!(rows[0].distance_m, Some(0.0));
    }

    #[test]
    fn test_repeated_pass_is_identical() {
        let index = build_active_index(vec![work("w1", 48.860, 2.350)], day("2024-06-02"));
        let samples = vec![
            sample("2024-06-02T08:10:00Z", 48.8601, 2.3501, Some(10.0), "fluide"),
            sample("2024-06-02T08:20:00Z", 48.8602, 2.3499, Some(30.0), "sature"),
            sample("2024-06-02T08:30:00Z", 48.8599, 2.3502, Some(20.0), "sature"),
        ];

        let run = || {
            let mut agg = Aggregator::new(&index, day("2024-06-02"), RADIUS);
            for s in &samples {
                agg.consume(s);
            }
            agg.finalize()
        };
        assert_eq!(run(), run());
    }
}
