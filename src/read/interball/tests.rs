use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use hifitime::{Duration, Epoch};
use tempfile::NamedTempFile;

use super::*;
use crate::read::ReadError;

fn record(doy: u16, msec: u32, freqs: &[f32]) -> Vec<u8> {
    let mut buf = vec![];
    buf.write_u16::<BigEndian>(1997).unwrap();
    buf.write_u16::<BigEndian>(doy).unwrap();
    buf.write_u32::<BigEndian>(msec).unwrap();
    buf.write_u16::<BigEndian>(3).unwrap();
    buf.write_u16::<BigEndian>(freqs.len() as u16).unwrap();
    for &f in freqs {
        buf.write_f32::<BigEndian>(f).unwrap();
    }
    for field in 1..=3 {
        for &f in freqs {
            buf.write_f32::<BigEndian>(field as f32 * f).unwrap();
        }
    }
    buf
}

#[test]
fn read_polrad_records() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&record(306, 1_000, &[100.0, 200.0])).unwrap();
    file.write_all(&record(306, 7_000, &[100.0, 200.0, 300.0]))
        .unwrap();
    // A record cut short.
    file.write_all(&record(306, 13_000, &[100.0])[..20]).unwrap();
    file.flush().unwrap();

    let reader = PolradReader::new(file.path()).unwrap();
    assert_eq!(reader.get_dataset(), Dataset::InterballPolrad);
    assert_eq!(reader.sweeps().len(), 2);
    assert_eq!(reader.sweeps()[1].header.nfreq, 3);

    let context = reader.get_data_context();
    assert_eq!(context.freqs_khz.as_slice(), &[100.0, 200.0, 300.0]);
    assert_eq!(context.fields.as_slice(), &["EX", "EY", "EZ"]);
    assert_eq!(context.metadata["MODE"], "3");
    let expected = Epoch::from_gregorian_utc_hms(1997, 11, 2, 0, 0, 1);
    assert!((context.timestamps[0] - expected).abs() < Duration::from_milliseconds(1.0));
    assert_eq!(context.time_res, Some(Duration::from_seconds(6.0)));

    let mut data = Array2::zeros((3, 3));
    reader.read(data.view_mut(), 0).unwrap();
    assert_eq!(data.row(0).to_vec()[..2], [100.0, 200.0]);
    assert!(data[(0, 2)].is_nan());
    assert_eq!(data[(2, 1)], 600.0);
}

#[test]
fn bad_day_of_year() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&record(366, 0, &[100.0])).unwrap();
    file.flush().unwrap();
    assert!(matches!(
        PolradReader::new(file.path()),
        Err(ReadError::Time(_))
    ));
}
