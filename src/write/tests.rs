use std::{collections::BTreeMap, path::PathBuf};

use approx::assert_abs_diff_eq;
use crossbeam_channel::unbounded;
use fitsio::FitsFile;
use hifitime::Duration;
use tempfile::tempdir;
use vec1::vec1;

use super::*;
use crate::averaging::timestamps_to_timeblocks;

fn context(num_sweeps: usize) -> DataContext {
    let start = Epoch::from_gregorian_utc_at_midnight(2004, 1, 1);
    DataContext {
        file: PathBuf::from("/data/P2004001.n2"),
        timestamps: Vec1::try_from_vec(
            (0..num_sweeps)
                .map(|i| start + Duration::from_seconds(i as f64))
                .collect(),
        )
        .unwrap(),
        time_res: Some(Duration::from_seconds(1.0)),
        freqs_khz: vec1![100.0, 200.0, 300.0],
        fields: vec1!["AUTO_X".to_string(), "AUTO_Z".to_string()],
        metadata: BTreeMap::new(),
    }
}

fn sweep(value: f32) -> Array2<f32> {
    let mut data = Array2::from_elem((2, 3), value);
    data[(1, 2)] = f32::NAN;
    data
}

#[test]
fn write_averaged_cube() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("out.fits");
    // Something to replace.
    std::fs::write(&output, b"stale").unwrap();

    let context = context(3);
    let timeblocks = timestamps_to_timeblocks(
        &context.timestamps,
        Some(Duration::from_seconds(2.0)),
        &vec1![0, 1, 2],
    )
    .unwrap();
    assert_eq!(timeblocks.len(), 2);

    let (tx, rx) = unbounded();
    for (i, &t) in context.timestamps.iter().enumerate() {
        tx.send((sweep(i as f32 + 1.0), t)).unwrap();
    }
    drop(tx);
    let error = AtomicCell::new(false);
    write_dynspec(
        &output,
        &context,
        Dataset::KronosN2,
        &timeblocks,
        rx,
        &error,
        None,
    )
    .unwrap();

    let mut fptr = FitsFile::open(&output).unwrap();
    let hdu = fptr.primary_hdu().unwrap();
    let image: Vec<f32> = hdu.read_image(&mut fptr).unwrap();
    // (field, timeblock, frequency)
    assert_eq!(image.len(), 2 * 2 * 3);
    assert_eq!(&image[..3], &[1.5, 1.5, 1.5]);
    assert_eq!(&image[3..6], &[3.0, 3.0, 3.0]);
    assert!(image[8].is_nan());
    assert!(image[11].is_nan());

    let dataset: String = hdu.read_key(&mut fptr, "DATASET").unwrap();
    assert_eq!(dataset, "kronos_n2");
    let nfield: i64 = hdu.read_key(&mut fptr, "NFIELD").unwrap();
    assert_eq!(nfield, 2);
    let field2: String = hdu.read_key(&mut fptr, "FIELD2").unwrap();
    assert_eq!(field2, "AUTO_Z");
    let source: String = hdu.read_key(&mut fptr, "SOURCE").unwrap();
    assert_eq!(source, "P2004001.n2");

    let hdu = fptr.hdu("TIME").unwrap();
    let nsweep: Vec<i32> = hdu.read_col(&mut fptr, "NSWEEP").unwrap();
    assert_eq!(nsweep, vec![2, 1]);
    let mjd: Vec<f64> = hdu.read_col(&mut fptr, "MJD").unwrap();
    assert_abs_diff_eq!(mjd[0], timeblocks[0].median.to_mjd_utc_days(), epsilon = 1e-9);

    let hdu = fptr.hdu("FREQ").unwrap();
    let freqs: Vec<f64> = hdu.read_col(&mut fptr, "FREQ_KHZ").unwrap();
    assert_eq!(freqs, vec![100.0, 200.0, 300.0]);
}

#[test]
fn missing_sweeps() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("out.fits");
    let context = context(3);
    let timeblocks = timestamps_to_timeblocks(&context.timestamps, None, &vec1![0, 1, 2]).unwrap();

    let (tx, rx) = unbounded();
    tx.send((sweep(1.0), context.timestamps[0])).unwrap();
    drop(tx);
    let error = AtomicCell::new(false);
    let result = write_dynspec(
        &output,
        &context,
        Dataset::KronosN2,
        &timeblocks,
        rx,
        &error,
        None,
    );
    assert!(matches!(
        result,
        Err(WriteError::MissingSweeps {
            expected: 3,
            received: 1
        })
    ));
    assert!(!output.exists());
}

#[test]
fn stops_on_error() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("out.fits");
    let context = context(1);
    let timeblocks = timestamps_to_timeblocks(&context.timestamps, None, &vec1![0]).unwrap();

    let (tx, rx) = unbounded();
    tx.send((sweep(1.0), context.timestamps[0])).unwrap();
    drop(tx);
    let error = AtomicCell::new(true);
    write_dynspec(
        &output,
        &context,
        Dataset::KronosN2,
        &timeblocks,
        rx,
        &error,
        None,
    )
    .unwrap();
    assert!(!output.exists());
}

#[test]
fn wrong_sweep_shape() {
    let dir = tempdir().unwrap();
    let context = context(1);
    let timeblocks = timestamps_to_timeblocks(&context.timestamps, None, &vec1![0]).unwrap();

    let (tx, rx) = unbounded();
    tx.send((Array2::zeros((1, 3)), context.timestamps[0]))
        .unwrap();
    drop(tx);
    let error = AtomicCell::new(false);
    assert!(matches!(
        write_dynspec(
            &dir.path().join("out.fits"),
            &context,
            Dataset::KronosN2,
            &timeblocks,
            rx,
            &error,
            None,
        ),
        Err(WriteError::BadSweepShape {
            expected: (2, 3),
            got: (1, 3)
        })
    ));
}
