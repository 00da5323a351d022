use crate::aligner::AlignmentError;

/// Min-max normalization of (m/z, time) pairs onto the unit square.
///
/// An axis on which every point has the same value maps to 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescaler {
    mz: (f64, f64),
    time: (f64, f64),
}

fn scale(value: f64, (low, high): (f64, f64)) -> f64 {
    let width = high - low;
    if width > 0.0 {
        (value - low) / width
    } else {
        0.0
    }
}

fn unscale(value: f64, (low, high): (f64, f64)) -> f64 {
    low + value * (high - low)
}

impl Rescaler {
    pub fn fit(points: impl IntoIterator<Item = (f64, f64)>) -> Result<Self, AlignmentError> {
        let mut points = points.into_iter();
        let (mz, time) = points.next().ok_or(AlignmentError::NoEnvelopes)?;
        let mut this = Self {
            mz: (mz, mz),
            time: (time, time),
        };
        for (mz, time) in points {
            this.mz = (this.mz.0.min(mz), this.mz.1.max(mz));
            this.time = (this.time.0.min(time), this.time.1.max(time));
        }
        Ok(this)
    }

    pub fn mz_range(&self) -> (f64, f64) {
        self.mz
    }

    pub fn time_range(&self) -> (f64, f64) {
        self.time
    }

    pub fn normalize(&self, mz: f64, time: f64) -> [f64; 2] {
        [scale(mz, self.mz), scale(time, self.time)]
    }

    /// The inverse of [`Rescaler::normalize`], returning `(mz, time)`
    pub fn reproject(&self, point: [f64; 2]) -> (f64, f64) {
        (unscale(point[0], self.mz), unscale(point[1], self.time))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_roundtrip_and_degenerate() {
        let r = Rescaler::fit([(100.0, 1.0), (300.0, 5.0), (200.0, 3.0)]).unwrap();
        assert_eq!(r.normalize(200.0, 3.0), [0.5, 0.5]);
        assert_eq!(r.reproject([0.25, 1.0]), (150.0, 5.0));

        let r = Rescaler::fit([(100.0, 2.0), (300.0, 2.0)]).unwrap();
        assert_eq!(r.normalize(300.0, 2.0), [1.0, 0.0]);

        assert!(matches!(
            Rescaler::fit(std::iter::empty()),
            Err(AlignmentError::NoEnvelopes)
        ));
    }
}
