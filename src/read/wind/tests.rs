use std::io::Write;

use approx::assert_abs_diff_eq;
use byteorder::{BigEndian, WriteBytesExt};
use hifitime::{Duration, Epoch};
use tempfile::NamedTempFile;

use super::*;

fn time_fields(buf: &mut Vec<u8>, receiver: i16, second: i16, frac: f32) {
    buf.write_i8(0).unwrap();
    buf.write_i8(0).unwrap();
    buf.write_i8(0).unwrap();
    buf.write_i8(0).unwrap();
    buf.write_i32::<BigEndian>(i32::from(second) * 1000).unwrap();
    buf.write_i16::<BigEndian>(receiver).unwrap();
    buf.write_u32::<BigEndian>(0).unwrap();
    for v in [1999, 1, 2, 0, 0, second] {
        buf.write_i16::<BigEndian>(v).unwrap();
    }
    buf.write_f32::<BigEndian>(frac).unwrap();
}

fn write_f32s(buf: &mut Vec<u8>, values: &[f32]) {
    for &v in values {
        buf.write_f32::<BigEndian>(v).unwrap();
    }
}

fn fortran_record(file: &mut impl Write, payload: &[u8]) {
    file.write_u32::<BigEndian>(payload.len() as u32).unwrap();
    file.write_all(payload).unwrap();
    file.write_u32::<BigEndian>(payload.len() as u32).unwrap();
}

/// A high-resolution record with 3 frequencies and 2 S/SP steps, and
/// optionally 1 Z step.
fn hres_record(second: i16, freqs: [f32; 3], with_z: bool) -> Vec<u8> {
    let nzpalf = i16::from(with_z);
    let mut buf = vec![];
    time_fields(&mut buf, 2, second, 0.5);
    buf.write_i32::<BigEndian>(i32::from(second)).unwrap(); // ISWEEP
    buf.write_i16::<BigEndian>(1).unwrap(); // IUNIT
    buf.write_i16::<BigEndian>(0).unwrap(); // NPBS
    buf.write_f32::<BigEndian>(0.0).unwrap(); // SUN_ANGLE
    buf.write_f32::<BigEndian>(20.0).unwrap(); // SPIN_RATE
    for _ in 0..8 {
        // KSPIN .. IDIPXY
        buf.write_i16::<BigEndian>(0).unwrap();
    }
    buf.write_f32::<BigEndian>(16.0).unwrap(); // SDURCY
    buf.write_f32::<BigEndian>(0.1).unwrap(); // SDURPA
    for v in [1, 3, 3, 2, nzpalf] {
        // NPALCY, NFRPAL, NPALIF, NSPALF, NZPALF
        buf.write_i16::<BigEndian>(v).unwrap();
    }
    assert_eq!(buf.len(), HresHeader::SIZE);

    write_f32s(&mut buf, &freqs);
    write_f32s(&mut buf, &[1.0, 2.0, 3.0, 3.0, 4.0, f32::NAN]); // VSPAL
    write_f32s(&mut buf, &[0.0, 0.1, 0.2, 0.3, 0.4, 0.5]); // TSPAL
    if with_z {
        write_f32s(&mut buf, &[7.0, 8.0, 9.0]); // VZPAL
        write_f32s(&mut buf, &[0.6, 0.7, 0.8]); // TZPAL
    }
    buf
}

fn averaged_record(second: i16) -> Vec<u8> {
    let mut buf = vec![];
    time_fields(&mut buf, 1, second, 0.0);
    buf.write_i16::<BigEndian>(2).unwrap(); // IUNIT
    buf.write_i16::<BigEndian>(2).unwrap(); // NFREQ
    write_f32s(&mut buf, &[1.0, 2.0, 3.0]); // GSE position
    assert_eq!(buf.len(), AveragedHeader::SIZE);
    write_f32s(&mut buf, &[20.0, 52.0]);
    write_f32s(&mut buf, &[5.0, 6.0]);
    write_f32s(&mut buf, &[4.0, 5.0]);
    write_f32s(&mut buf, &[6.0, 7.0]);
    buf
}

#[test]
fn read_hres_sweeps() {
    let mut file = NamedTempFile::new().unwrap();
    fortran_record(&mut file, &hres_record(0, [20.0, 30.0, 40.0], false));
    fortran_record(&mut file, &hres_record(16, [25.0, 30.0, 40.0], true));
    file.flush().unwrap();

    let reader = WindWavesReader::new(file.path(), WavesProduct::HighResolution).unwrap();
    let context = reader.get_data_context();
    assert_eq!(reader.get_dataset(), Dataset::WindWavesL2Hres);
    assert_eq!(context.num_sweeps(), 2);
    assert_eq!(context.fields.as_slice(), &["VSPAL", "VZPAL"]);
    assert_eq!(context.freqs_khz.as_slice(), &[20.0, 25.0, 30.0, 40.0]);
    assert_eq!(context.metadata["RECEIVER"], "RAD2");
    assert_eq!(context.metadata["IUNIT"], "1");

    let expected = Epoch::from_gregorian_utc(1999, 1, 2, 0, 0, 0, 500_000_000);
    assert!((context.timestamps[0] - expected).abs() < Duration::from_milliseconds(1.0));
    assert_abs_diff_eq!(
        context.time_res.unwrap().to_seconds(),
        16.0,
        epsilon = 1e-6
    );

    let mut data = Array2::zeros((2, 4));
    reader.read(data.view_mut(), 0).unwrap();
    // Means over the two S/SP steps; the NaN sample is ignored.
    assert_abs_diff_eq!(data[(0, 0)], 2.0);
    assert!(data[(0, 1)].is_nan());
    assert_abs_diff_eq!(data[(0, 2)], 3.0);
    assert_abs_diff_eq!(data[(0, 3)], 3.0);
    // No Z samples in the first sweep.
    assert!(data.row(1).iter().all(|v| v.is_nan()));

    reader.read(data.view_mut(), 1).unwrap();
    assert!(data[(0, 0)].is_nan());
    assert_abs_diff_eq!(data[(0, 1)], 2.0);
    assert_abs_diff_eq!(data[(1, 1)], 7.0);
    assert_abs_diff_eq!(data[(1, 3)], 9.0);

    match reader.sweeps() {
        WavesSweeps::HighResolution(s) => {
            assert_eq!(s[1].header.isweep, 16);
            assert_eq!(s[1].tzpal.len(), 3);
            assert_abs_diff_eq!(s[0].header.sdurcy, 16.0);
        }
        _ => panic!("wrong product"),
    }
}

#[test]
fn read_averaged_sweeps() {
    let mut file = NamedTempFile::new().unwrap();
    fortran_record(&mut file, &averaged_record(0));
    fortran_record(&mut file, &averaged_record(75));
    file.flush().unwrap();

    // 75 isn't a valid second.
    assert!(matches!(
        WindWavesReader::new(file.path(), WavesProduct::Averaged60s),
        Err(ReadError::Time(_))
    ));

    let mut file = NamedTempFile::new().unwrap();
    fortran_record(&mut file, &averaged_record(0));
    fortran_record(&mut file, &averaged_record(59));
    file.flush().unwrap();
    let reader = WindWavesReader::new(file.path(), WavesProduct::Averaged60s).unwrap();
    let context = reader.get_data_context();
    assert_eq!(context.fields.len(), 3);
    assert_eq!(context.freqs_khz.as_slice(), &[20.0, 52.0]);
    assert_eq!(context.metadata["RECEIVER"], "RAD1");

    let mut data = Array2::zeros((3, 2));
    reader.read(data.view_mut(), 1).unwrap();
    assert_eq!(data, array![[5.0, 6.0], [4.0, 5.0], [6.0, 7.0]]);

    match reader.sweeps() {
        WavesSweeps::Averaged60s(s) => assert_abs_diff_eq!(s[0].header.z_gse, 3.0),
        _ => panic!("wrong product"),
    }
}

#[test]
fn inconsistent_record_is_an_error() {
    let mut payload = hres_record(0, [20.0, 30.0, 40.0], false);
    payload.truncate(payload.len() - 4);
    let mut file = NamedTempFile::new().unwrap();
    fortran_record(&mut file, &payload);
    file.flush().unwrap();

    assert!(matches!(
        WindWavesReader::new(file.path(), WavesProduct::HighResolution),
        Err(ReadError::Binary(BinaryError::InconsistentRecord {
            offset: 0,
            actual: 136,
            expected: 140,
            ..
        }))
    ));
}

#[test]
fn empty_file_has_no_sweeps() {
    let file = NamedTempFile::new().unwrap();
    assert!(matches!(
        WindWavesReader::new(file.path(), WavesProduct::Averaged60s),
        Err(ReadError::NoSweeps { .. })
    ));
}
