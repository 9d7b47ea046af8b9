use std::io::Write;

use approx::assert_abs_diff_eq;
use byteorder::{LittleEndian, WriteBytesExt};
use hifitime::Duration;
use tempfile::NamedTempFile;

use super::*;

fn padded(text: &str, len: usize) -> Vec<u8> {
    let mut v = text.as_bytes().to_vec();
    v.resize(len, 0);
    v
}

fn sps_file(version: &str, nchannels: i16, notes: &[u8], records: &[(f64, Vec<u16>)]) -> Vec<u8> {
    let mut buf = padded(version, 10);
    for v in [36526.5, 36526.6, 29.6, -82.3, 4095.0, 0.0] {
        buf.write_f64::<LittleEndian>(v).unwrap();
    }
    buf.write_i16::<LittleEndian>(-5).unwrap();
    buf.extend(padded("Jupiter", 10));
    buf.extend(padded("J. Doe", 20));
    buf.extend(padded("AJ4CO", 20));
    buf.extend(padded("Gainesville", 40));
    buf.write_i16::<LittleEndian>(nchannels).unwrap();
    buf.write_i32::<LittleEndian>(notes.len() as i32).unwrap();
    assert_eq!(buf.len(), SpsHeader::SIZE);
    buf.extend_from_slice(notes);
    for (t, counts) in records {
        buf.write_f64::<LittleEndian>(*t).unwrap();
        for &c in counts {
            buf.write_u16::<LittleEndian>(c).unwrap();
        }
    }
    buf
}

fn standard_notes() -> Vec<u8> {
    let mut notes = b"Observed by the back yard antenna. *[[*".to_vec();
    notes.extend_from_slice(b"LOWF 18000000");
    notes.push(0xFF);
    notes.extend_from_slice(b"HIF 24000000");
    notes.push(0xFF);
    notes.extend_from_slice(b"SWEEPS 1\nCOLOR0 16777215");
    notes.extend_from_slice(b"*]]*");
    notes
}

fn write(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn notes_are_split_into_text_and_metadata() {
    let notes = SpsNotes::parse(&standard_notes());
    assert_eq!(notes.text, "Observed by the back yard antenna.");
    assert_eq!(notes.metadata["LOWF"], "18000000");
    assert_eq!(notes.metadata["HIF"], "24000000");
    assert_eq!(notes.metadata["SWEEPS"], "1");
    assert_eq!(notes.metadata["COLOR0"], "16777215");

    let notes = SpsNotes::parse(b"*[[*logo*]]* free *[[*a 1\xFFa 2*]]*");
    assert_eq!(notes.text, "free");
    assert_eq!(notes.metadata["LOGO"], "");
    assert_eq!(notes.metadata["A"], "2");
}

#[test]
fn read_sps_sweeps() {
    let one_second = 1.0 / 86400.0;
    let records = vec![
        (36526.5, vec![10, 20, 30, 40]),
        (36526.5 + one_second, vec![11, 21, 31, 41]),
        (36526.5 + 2.0 * one_second, vec![12, 22, 32, 42]),
    ];
    let mut bytes = sps_file("*SPS1.0", 4, &standard_notes(), &records);
    // Half of a fourth record.
    bytes.extend_from_slice(&[0; 9]);
    let file = write(&bytes);

    let reader = SpsReader::new(file.path()).unwrap();
    assert_eq!(reader.get_dataset(), Dataset::RadioJoveSps);
    assert_eq!(reader.header().obs_location, "Gainesville");
    assert_eq!(reader.header().timezone, -5);
    assert!(reader.notes().text.starts_with("Observed"));

    let context = reader.get_data_context();
    assert_eq!(context.num_sweeps(), 3);
    assert_eq!(context.fields.as_slice(), &["COUNTS"]);
    assert_eq!(context.metadata["AUTHOR"], "J. Doe");
    assert_eq!(context.metadata["SOURCE"], "Jupiter");
    assert_eq!(context.freqs_khz.len(), 4);
    assert_abs_diff_eq!(*context.freqs_khz.first(), 18000.0, epsilon = 1e-6);
    assert_abs_diff_eq!(context.freqs_khz[1], 20000.0, epsilon = 1e-6);
    assert_abs_diff_eq!(*context.freqs_khz.last(), 24000.0, epsilon = 1e-6);
    assert!(
        (context.time_res.unwrap() - Duration::from_seconds(1.0)).abs()
            < Duration::from_milliseconds(1.0)
    );
    assert!(
        (context.timestamps[0] - reader.header_start()).abs() < Duration::from_milliseconds(1.0)
    );

    let mut data = Array2::zeros((1, 4));
    reader.read(data.view_mut(), 2).unwrap();
    // Channel 0 is the highest frequency.
    assert_eq!(data.row(0).to_vec(), vec![42.0, 32.0, 22.0, 12.0]);
}

#[test]
fn bad_sps_files() {
    let file = write(&sps_file("*SPD1.0", 4, &standard_notes(), &[]));
    assert!(matches!(
        SpsReader::new(file.path()),
        Err(ReadError::RadioJove(RadioJoveError::BadVersion { .. }))
    ));

    let file = write(&sps_file("*SPS1.0", 4, b"*[[*LOWF 18000000*]]*", &[]));
    assert!(matches!(
        SpsReader::new(file.path()),
        Err(ReadError::RadioJove(RadioJoveError::MissingNoteKey { key: "HIF", .. }))
    ));

    let file = write(&sps_file("*SPS1.0", 4, b"*[[*LOWF x\nHIF 2*]]*", &[]));
    assert!(matches!(
        SpsReader::new(file.path()),
        Err(ReadError::RadioJove(RadioJoveError::BadNoteValue { key: "LOWF", .. }))
    ));

    let file = write(&sps_file("*SPS1.0", 0, &standard_notes(), &[]));
    assert!(matches!(
        SpsReader::new(file.path()),
        Err(ReadError::Binary(BinaryError::BadHeaderValue {
            field: "nchannels",
            ..
        }))
    ));

    // No records at all.
    let file = write(&sps_file("*SPS1.0", 4, &standard_notes(), &[]));
    assert!(matches!(
        SpsReader::new(file.path()),
        Err(ReadError::NoSweeps { .. })
    ));

    let file = write(&[0; 100]);
    assert!(matches!(
        SpsReader::new(file.path()),
        Err(ReadError::Binary(BinaryError::Truncated { wanted: 156, .. }))
    ));
}
