//! Helpers for record-oriented binary files.

use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
    slice::ChunksExact,
};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use log::{trace, warn};

use super::BinaryError;

/// Fill `buf` as far as possible, returning how many bytes were read. Unlike
/// [`Read::read_exact`], hitting EOF is not an error.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Iterates over "Fortran sequential" records: a big-endian `u32` byte count,
/// the payload, then the byte count again. Each item is the byte offset of
/// the record and its payload.
pub(crate) struct FortranRecords<R> {
    reader: R,
    file: PathBuf,
    /// Total length of the stream, so byte counts can be checked before
    /// anything is allocated for them.
    len: u64,
    offset: u64,
    done: bool,
}

impl FortranRecords<BufReader<File>> {
    pub(crate) fn open(file: &Path) -> Result<Self, BinaryError> {
        let f = File::open(file)?;
        let len = f.metadata()?.len();
        Ok(FortranRecords::new(BufReader::new(f), file, len))
    }
}

impl<R: Read> FortranRecords<R> {
    pub(crate) fn new(reader: R, file: &Path, len: u64) -> FortranRecords<R> {
        FortranRecords {
            reader,
            file: file.to_path_buf(),
            len,
            offset: 0,
            done: false,
        }
    }

    fn next_record(&mut self) -> Result<Option<(u64, Vec<u8>)>, BinaryError> {
        let start = self.offset;
        let mut marker = [0; 4];
        match read_up_to(&mut self.reader, &mut marker)? {
            0 => return Ok(None),
            4 => (),
            n => {
                return Err(BinaryError::Truncated {
                    file: self.file.clone(),
                    offset: start,
                    wanted: 4,
                    available: n,
                })
            }
        }
        let leading = BigEndian::read_u32(&marker);
        let remaining = self.len.saturating_sub(start + 4);
        if u64::from(leading) + 4 > remaining {
            return Err(BinaryError::Truncated {
                file: self.file.clone(),
                offset: start,
                wanted: leading as usize + 8,
                available: (remaining + 4) as usize,
            });
        }

        let mut payload = vec![0; leading as usize];
        let n = read_up_to(&mut self.reader, &mut payload)?;
        if n != payload.len() {
            return Err(BinaryError::Truncated {
                file: self.file.clone(),
                offset: start,
                wanted: payload.len() + 8,
                available: n + 4,
            });
        }

        let n = read_up_to(&mut self.reader, &mut marker)?;
        if n != 4 {
            return Err(BinaryError::Truncated {
                file: self.file.clone(),
                offset: start,
                wanted: payload.len() + 8,
                available: payload.len() + 4 + n,
            });
        }
        let trailing = BigEndian::read_u32(&marker);
        if leading != trailing {
            return Err(BinaryError::RecordLength {
                file: self.file.clone(),
                offset: start,
                leading,
                trailing,
            });
        }

        trace!("Record at byte {start}: {leading} bytes");
        self.offset += u64::from(leading) + 8;
        Ok(Some((start, payload)))
    }
}

impl<R: Read> Iterator for FortranRecords<R> {
    type Item = Result<(u64, Vec<u8>), BinaryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(r)) => Some(Ok(r)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                // Nothing after a broken record can be trusted.
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Split `data` into records of `record_len` bytes. A short tail is an error
/// unless `allow_truncated_tail` is set, in which case it's dropped with a
/// warning (files written by live acquisition software often end mid-record).
pub(crate) fn fixed_records<'a>(
    data: &'a [u8],
    record_len: usize,
    file: &Path,
    allow_truncated_tail: bool,
) -> Result<ChunksExact<'a, u8>, BinaryError> {
    let chunks = data.chunks_exact(record_len);
    let tail = chunks.remainder().len();
    if tail != 0 {
        let offset = (data.len() - tail) as u64;
        if allow_truncated_tail {
            warn!(
                "{}: ignoring {tail} trailing bytes of an incomplete {record_len}-byte record",
                file.display()
            );
        } else {
            return Err(BinaryError::Truncated {
                file: file.to_path_buf(),
                offset,
                wanted: record_len,
                available: tail,
            });
        }
    }
    Ok(chunks)
}

/// Decode a NUL- or space-padded text field.
pub(crate) fn fixed_str(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

pub(crate) fn read_f32s<B: ByteOrder, R: Read>(reader: &mut R, n: usize) -> io::Result<Vec<f32>> {
    let mut v = vec![0.0; n];
    reader.read_f32_into::<B>(&mut v)?;
    Ok(v)
}

/// Mean of each column of a step-major block (`block[step * n + col]`),
/// ignoring NaNs. Columns without any finite value are NaN.
pub(crate) fn column_means(block: &[f32], n: usize) -> Vec<f32> {
    let mut sums = vec![0.0_f64; n];
    let mut counts = vec![0_u32; n];
    if n > 0 {
        for row in block.chunks_exact(n) {
            for ((s, c), &v) in sums.iter_mut().zip(counts.iter_mut()).zip(row) {
                if !v.is_nan() {
                    *s += f64::from(v);
                    *c += 1;
                }
            }
        }
    }
    sums.into_iter()
        .zip(counts)
        .map(|(s, c)| if c == 0 { f32::NAN } else { (s / f64::from(c)) as f32 })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use byteorder::WriteBytesExt;

    use super::*;

    fn record(payload: &[u8], trailing: Option<u32>) -> Vec<u8> {
        let mut v = vec![];
        v.write_u32::<BigEndian>(payload.len() as u32).unwrap();
        v.extend_from_slice(payload);
        v.write_u32::<BigEndian>(trailing.unwrap_or(payload.len() as u32))
            .unwrap();
        v
    }

    #[test]
    fn fortran_records_in_sequence() {
        let mut bytes = record(&[1, 2, 3], None);
        bytes.extend(record(&[4; 10], None));
        let len = bytes.len() as u64;
        let records = FortranRecords::new(Cursor::new(bytes), Path::new("x.dat"), len)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (0, vec![1, 2, 3]));
        assert_eq!(records[1].0, 11);
        assert_eq!(records[1].1, vec![4; 10]);
    }

    #[test]
    fn fortran_record_length_mismatch() {
        let mut bytes = record(&[1, 2, 3], None);
        bytes.extend(record(&[4; 10], Some(9)));
        let len = bytes.len() as u64;
        let mut records = FortranRecords::new(Cursor::new(bytes), Path::new("x.dat"), len);
        assert!(records.next().unwrap().is_ok());
        match records.next() {
            Some(Err(BinaryError::RecordLength {
                offset: 11,
                leading: 10,
                trailing: 9,
                ..
            })) => (),
            other => panic!("unexpected {other:?}"),
        }
        assert!(records.next().is_none());
    }

    #[test]
    fn fortran_record_truncated() {
        let mut bytes = record(&[1; 8], None);
        bytes.truncate(bytes.len() - 6);
        let len = bytes.len() as u64;
        let mut records = FortranRecords::new(Cursor::new(bytes), Path::new("x.dat"), len);
        assert!(matches!(
            records.next(),
            Some(Err(BinaryError::Truncated { offset: 0, .. }))
        ));
    }

    #[test]
    fn fortran_record_marker_beyond_end() {
        let mut bytes = record(&[1, 2], None);
        bytes.extend(0x7FFF_FFFF_u32.to_be_bytes());
        bytes.extend([0; 4]);
        let len = bytes.len() as u64;
        let mut records = FortranRecords::new(Cursor::new(bytes), Path::new("x.dat"), len);
        assert!(records.next().unwrap().is_ok());
        match records.next() {
            Some(Err(BinaryError::Truncated {
                offset: 10,
                wanted: 0x8000_0007,
                available: 8,
                ..
            })) => (),
            other => panic!("unexpected {other:?}"),
        }
        assert!(records.next().is_none());
    }

    #[test]
    fn fixed_record_tails() {
        let data = [0_u8; 10];
        assert_eq!(
            fixed_records(&data, 4, Path::new("x"), true).unwrap().count(),
            2
        );
        assert!(matches!(
            fixed_records(&data, 4, Path::new("x"), false),
            Err(BinaryError::Truncated {
                offset: 8,
                wanted: 4,
                available: 2,
                ..
            })
        ));
        assert_eq!(
            fixed_records(&data, 5, Path::new("x"), false)
                .unwrap()
                .count(),
            2
        );
    }

    #[test]
    fn padded_text() {
        assert_eq!(fixed_str(b"Nancay\0\0\0 "), "Nancay");
        assert_eq!(fixed_str(b"  \0"), "");
    }

    #[test]
    fn means_skip_nans() {
        let block = [1.0, f32::NAN, 3.0, f32::NAN, 5.0, 2.0];
        let means = column_means(&block, 2);
        assert_eq!(means[0], 3.0);
        assert_eq!(means[1], 2.0);
        let means = column_means(&[f32::NAN], 1);
        assert!(means[0].is_nan());
    }
}
