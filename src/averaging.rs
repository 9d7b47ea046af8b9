//! Grouping sweeps into time blocks, and averaging them.

use std::ops::Range;

use hifitime::{Duration, Epoch};
use ndarray::prelude::*;
use thiserror::Error;
use vec1::Vec1;

#[derive(Error, Debug, PartialEq)]
pub enum AveragingError {
    #[error("Sweep index {index} is beyond the {num_sweeps} available sweeps")]
    BadSweepIndex { index: usize, num_sweeps: usize },

    #[error("Sweep indices must be ascending, but {next} follows {prev}")]
    UnsortedIndices { prev: usize, next: usize },

    #[error("Sweep {index} is earlier than the sweep before it; time averaging needs time-ordered sweeps")]
    UnsortedTimestamps { index: usize },

    #[error("The time-averaging duration must be positive, but it is {0}")]
    BadDuration(Duration),
}

/// A collection of sweeps averaged together.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeblock {
    /// The timeblock index. Windows without any sweeps don't get a timeblock,
    /// so indices are always contiguous.
    pub index: usize,

    /// The range of indices into the *used* sweeps (not all sweeps in the
    /// file). e.g. If sweeps 10, 15 and 16 are used and 15 and 16 fall in
    /// the second window, the second timeblock's range is 1..3.
    pub range: Range<usize>,

    /// The timestamps of the sweeps in this timeblock.
    pub timestamps: Vec1<Epoch>,

    /// The centre of the timeblock's window. For a 60 s window starting at
    /// 00:00:00 this is 00:00:30, regardless of which sweeps were found in
    /// it. Without time averaging it is the sweep's own timestamp.
    pub median: Epoch,
}

/// Group the sweeps `sweeps_to_use` (indices into `all_timestamps`) into
/// timeblocks. With a `block_duration`, consecutive windows of that length
/// are laid down starting at the first used sweep; otherwise each sweep is
/// its own timeblock.
pub fn timestamps_to_timeblocks(
    all_timestamps: &Vec1<Epoch>,
    block_duration: Option<Duration>,
    sweeps_to_use: &Vec1<usize>,
) -> Result<Vec1<Timeblock>, AveragingError> {
    if let Some(d) = block_duration {
        if d <= Duration::ZERO {
            return Err(AveragingError::BadDuration(d));
        }
    }

    let mut timestamps_to_use = Vec::with_capacity(sweeps_to_use.len());
    for (i, &index) in sweeps_to_use.iter().enumerate() {
        let t = *all_timestamps
            .get(index)
            .ok_or(AveragingError::BadSweepIndex {
                index,
                num_sweeps: all_timestamps.len(),
            })?;
        if i > 0 {
            let prev = sweeps_to_use[i - 1];
            if index <= prev {
                return Err(AveragingError::UnsortedIndices { prev, next: index });
            }
            if t < all_timestamps[prev] {
                return Err(AveragingError::UnsortedTimestamps { index });
            }
        }
        timestamps_to_use.push(t);
    }
    let first_timestamp = timestamps_to_use[0];

    // Which window each used sweep falls in.
    let window_of = |t: Epoch| -> i128 {
        match block_duration {
            Some(d) => (t - first_timestamp).total_nanoseconds() / d.total_nanoseconds(),
            None => 0,
        }
    };

    // The timeblock starting at used sweep `start`.
    let block_at = |start: usize, index: usize| -> Timeblock {
        let window = window_of(timestamps_to_use[start]);
        let end = match block_duration {
            Some(_) => timestamps_to_use[start..]
                .iter()
                .position(|&t| window_of(t) != window)
                .map(|p| start + p)
                .unwrap_or(timestamps_to_use.len()),
            None => start + 1,
        };
        let median = match block_duration {
            Some(d) => first_timestamp + d * window as f64 + d * 0.5,
            None => timestamps_to_use[start],
        };
        let mut timestamps = Vec1::new(timestamps_to_use[start]);
        for &t in &timestamps_to_use[start + 1..end] {
            timestamps.push(t);
        }
        Timeblock {
            index,
            range: start..end,
            timestamps,
            median,
        }
    };

    let mut timeblocks = Vec1::new(block_at(0, 0));
    while timeblocks.last().range.end < timestamps_to_use.len() {
        let next = block_at(timeblocks.last().range.end, timeblocks.len());
        timeblocks.push(next);
    }
    Ok(timeblocks)
}

/// Average sweeps (axis 0) while ignoring NaNs. A cell that is NaN in every
/// sweep stays NaN.
pub fn nan_mean(sweeps: ArrayView3<f32>) -> Array2<f32> {
    let (_, num_fields, num_freqs) = sweeps.dim();
    let mut sum = Array2::<f64>::zeros((num_fields, num_freqs));
    let mut count = Array2::<u32>::zeros((num_fields, num_freqs));
    for sweep in sweeps.outer_iter() {
        ndarray::Zip::from(&mut sum)
            .and(&mut count)
            .and(&sweep)
            .for_each(|s, c, &v| {
                if !v.is_nan() {
                    *s += f64::from(v);
                    *c += 1;
                }
            });
    }
    ndarray::Zip::from(&sum)
        .and(&count)
        .map_collect(|&s, &c| if c == 0 { f32::NAN } else { (s / f64::from(c)) as f32 })
}

#[cfg(test)]
mod tests {
    use vec1::vec1;

    use super::*;

    fn timestamps(seconds: &[f64]) -> Vec1<Epoch> {
        let start = Epoch::from_gregorian_utc_at_midnight(2004, 1, 1);
        Vec1::try_from_vec(
            seconds
                .iter()
                .map(|&s| start + Duration::from_seconds(s))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn one_block_per_sweep() {
        let all = timestamps(&[0.0, 1.0, 2.0, 3.0]);
        let blocks = timestamps_to_timeblocks(&all, None, &vec1![1, 3]).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].range, 0..1);
        assert_eq!(blocks[0].median, all[1]);
        assert_eq!(blocks[1].index, 1);
        assert_eq!(blocks[1].range, 1..2);
        assert_eq!(blocks[1].median, all[3]);
    }

    #[test]
    fn windows_skip_empty_blocks() {
        // Sweeps every 4 s with a gap; 10 s windows from the first used sweep.
        let all = timestamps(&[0.0, 4.0, 8.0, 12.0, 16.0, 32.0, 36.0]);
        let blocks = timestamps_to_timeblocks(
            &all,
            Some(Duration::from_seconds(10.0)),
            &vec1![1, 2, 3, 4, 5, 6],
        )
        .unwrap();
        // Windows from 4 s: [4, 14) has 4, 8, 12; [14, 24) has 16; [24, 34)
        // has 32; [34, 44) has 36.
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].range, 0..3);
        assert_eq!(blocks[0].timestamps.len(), 3);
        assert_eq!(blocks[1].range, 3..4);
        assert_eq!(blocks[2].range, 4..5);
        assert_eq!(blocks[3].range, 5..6);
        assert_eq!(blocks[3].index, 3);

        let start = all[1];
        assert_eq!(blocks[0].median, start + Duration::from_seconds(5.0));
        assert_eq!(blocks[2].median, start + Duration::from_seconds(25.0));
    }

    #[test]
    fn bad_inputs() {
        let all = timestamps(&[0.0, 1.0, 2.0]);
        assert_eq!(
            timestamps_to_timeblocks(&all, None, &vec1![0, 3]),
            Err(AveragingError::BadSweepIndex {
                index: 3,
                num_sweeps: 3
            })
        );
        assert_eq!(
            timestamps_to_timeblocks(&all, None, &vec1![2, 1]),
            Err(AveragingError::UnsortedIndices { prev: 2, next: 1 })
        );
        assert!(matches!(
            timestamps_to_timeblocks(&all, Some(Duration::ZERO), &vec1![0]),
            Err(AveragingError::BadDuration(_))
        ));

        let unsorted = timestamps(&[5.0, 1.0]);
        assert_eq!(
            timestamps_to_timeblocks(&unsorted, None, &vec1![0, 1]),
            Err(AveragingError::UnsortedTimestamps { index: 1 })
        );
    }

    #[test]
    fn mean_ignores_nans() {
        let sweeps = array![
            [[1.0, f32::NAN, f32::NAN]],
            [[3.0, 4.0, f32::NAN]],
        ];
        let mean = nan_mean(sweeps.view());
        assert_eq!(mean.dim(), (1, 3));
        assert_eq!(mean[(0, 0)], 2.0);
        assert_eq!(mean[(0, 1)], 4.0);
        assert!(mean[(0, 2)].is_nan());
    }
}
