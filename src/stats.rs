use serde::Serialize;

use crate::join::aggregate::Consumed;

/// Counters collected over one run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RunStats {
    // partitions
    pub partitions_listed: usize,
    pub partitions_skipped: usize,
    pub partitions_without_works: usize,

    // dates
    pub dates_seen: usize,
    pub dates_processed: usize,
    pub dates_without_works: usize,

    // samples, per processed date
    pub samples_read: usize,
    pub samples_other_date: usize,
    pub samples_unplaced: usize,
    pub samples_matched: usize,
    pub matches: usize,
}

impl RunStats {
    /// Tallies the outcome of one consumed sample.
    pub fn record(&mut self, consumed: Consumed) {
        self.samples_read += 1;
        match consumed {
            Consumed::OtherDate => self.samples_other_date += 1,
            Consumed::Unplaced => self.samples_unplaced += 1,
            Consumed::Matched(0) => {}
            Consumed::Matched(n) => {
                self.samples_matched += 1;
                self.matches += n;
            }
        }
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    /// Share of in-date samples that matched at least one work.
    pub fn match_pct(&self) -> f64 {
        Self::pct(self.samples_matched, self.samples_read - self.samples_other_date)
    }
}
