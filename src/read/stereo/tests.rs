use std::{fs::File, io::Write};

use approx::assert_abs_diff_eq;
use byteorder::{BigEndian, WriteBytesExt};
use tempfile::tempdir;

use super::*;

fn record(receiver: i16, second: i16, freqs: &[f32]) -> Vec<u8> {
    let mut buf = vec![];
    for v in [2008, 3, 25, 10, 0, second] {
        buf.write_i16::<BigEndian>(v).unwrap();
    }
    buf.write_f32::<BigEndian>(0.0).unwrap();
    buf.write_i16::<BigEndian>(receiver).unwrap();
    buf.write_i16::<BigEndian>(1).unwrap();
    buf.write_i16::<BigEndian>(freqs.len() as i16).unwrap();
    buf.write_i16::<BigEndian>(0).unwrap();
    assert_eq!(buf.len(), StereoHeader::SIZE);

    for &f in freqs {
        buf.write_f32::<BigEndian>(f).unwrap();
    }
    for field in 0..6 {
        for i in 0..freqs.len() {
            buf.write_f32::<BigEndian>((field * 100 + i) as f32).unwrap();
        }
    }

    let mut out = vec![];
    out.write_u32::<BigEndian>(buf.len() as u32).unwrap();
    out.extend(&buf);
    out.write_u32::<BigEndian>(buf.len() as u32).unwrap();
    out
}

#[test]
fn read_stereo_sweeps() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stb_wav_hfr_l2_20080325_v01.dat");
    let mut f = File::create(&path).unwrap();
    f.write_all(&record(1, 0, &[125.0, 150.0])).unwrap();
    f.write_all(&record(2, 38, &[150.0, 175.0, 200.0])).unwrap();
    drop(f);

    let reader = StereoWavesReader::new(&path).unwrap();
    assert_eq!(reader.get_dataset(), Dataset::StereoWavesL2);
    assert_eq!(reader.spacecraft(), Some(Spacecraft::Behind));
    assert_eq!(reader.sweeps()[1].header.receiver, StereoReceiver::Hfr2);

    let context = reader.get_data_context();
    assert_eq!(context.metadata["SPACECRAFT"], "STEREO-B");
    assert_eq!(context.metadata["RECEIVER"], "HFR1,HFR2");
    assert_eq!(context.freqs_khz.as_slice(), &[125.0, 150.0, 175.0, 200.0]);
    assert_eq!(context.fields.len(), 6);
    assert_abs_diff_eq!(
        context.time_res.unwrap().to_seconds(),
        38.0,
        epsilon = 1e-6
    );

    let mut data = Array2::zeros((6, 4));
    reader.read(data.view_mut(), 1).unwrap();
    assert!(data[(0, 0)].is_nan());
    assert_eq!(data[(0, 1)], 0.0);
    assert_eq!(data[(0, 3)], 2.0);
    assert_eq!(data[(5, 2)], 501.0);
}

#[test]
fn inconsistent_stereo_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sta_wav_lfr_l2_20080325_v01.dat");
    let mut bytes = record(0, 0, &[10.0]);
    // Claim two frequencies in a record holding one.
    bytes[4 + 20] = 0;
    bytes[4 + 21] = 2;
    File::create(&path).unwrap().write_all(&bytes).unwrap();

    assert!(matches!(
        StereoWavesReader::new(&path),
        Err(ReadError::Binary(BinaryError::InconsistentRecord {
            expected: 80,
            actual: 52,
            ..
        }))
    ));
}

#[test]
fn spacecraft_from_name() {
    assert_eq!(
        Spacecraft::from_file_name(Path::new("/data/STA_WAV_LFR.dat")),
        Some(Spacecraft::Ahead)
    );
    assert_eq!(Spacecraft::from_file_name(Path::new("wav.dat")), None);
}
