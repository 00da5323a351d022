use std::ops::{Add, AddAssign};

use mzsling::SampleSummary;

/// Running totals over every input file
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProgressRecord {
    pub ms1_spectra: usize,
    pub msn_spectra: usize,
    pub ms1_points: usize,
    pub msn_points: usize,
    pub outside_time_range: usize,
    pub failed_peak_picking: usize,
    pub samples_processed: usize,
    pub samples_failed: usize,
    pub envelopes: usize,
    pub unassigned_msn: usize,
}

impl ProgressRecord {
    pub fn sum(self, rhs: Self) -> Self {
        self + rhs
    }

    /// Fold the outcome of a sample's construction phase into this record
    pub fn record_sample(&mut self, summary: &SampleSummary) {
        self.samples_processed += 1;
        self.envelopes += summary.envelopes;
        self.unassigned_msn += summary.unassigned_ms2;
    }
}

impl Add for ProgressRecord {
    type Output = ProgressRecord;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ProgressRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.ms1_spectra += rhs.ms1_spectra;
        self.msn_spectra += rhs.msn_spectra;
        self.ms1_points += rhs.ms1_points;
        self.msn_points += rhs.msn_points;
        self.outside_time_range += rhs.outside_time_range;
        self.failed_peak_picking += rhs.failed_peak_picking;
        self.samples_processed += rhs.samples_processed;
        self.samples_failed += rhs.samples_failed;
        self.envelopes += rhs.envelopes;
        self.unassigned_msn += rhs.unassigned_msn;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fold() {
        let parts = [
            ProgressRecord {
                ms1_spectra: 3,
                msn_spectra: 4,
                ..Default::default()
            },
            ProgressRecord {
                ms1_spectra: 2,
                samples_failed: 1,
                ..Default::default()
            },
        ];
        let total = parts.into_iter().fold(ProgressRecord::default(), ProgressRecord::sum);
        assert_eq!(total.ms1_spectra, 5);
        assert_eq!(total.msn_spectra, 4);
        assert_eq!(total.samples_failed, 1);
    }
}
