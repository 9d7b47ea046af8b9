//! The internal records of a version 3 CDF file.
//!
//! Every internal record starts with a big-endian 8-byte size and 4-byte
//! type, and records point at each other with absolute byte offsets (zero
//! ends a chain). Only the values of variables and attribute entries follow
//! the file's data encoding.

use std::{
    collections::BTreeSet,
    fmt,
    io::{Cursor, Read},
    path::{Path, PathBuf},
};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use itertools::Itertools;
use log::{debug, trace, warn};

use super::CdfError;
use crate::read::{binary::fixed_str, BinaryError};

pub const CDF3_MAGIC: u32 = 0xCDF3_0001;
const CDF26_MAGIC: u32 = 0xCDF2_6002;
/// Files from before version 2.6 start with this.
const CDF_OLD_MAGIC: u32 = 0x0000_FFFF;
pub const UNCOMPRESSED_MAGIC: u32 = 0x0000_FFFF;
pub const COMPRESSED_MAGIC: u32 = 0xCCCC_0001;

const CDR: i32 = 1;
const GDR: i32 = 2;
const RVDR: i32 = 3;
const ADR: i32 = 4;
const AGREDR: i32 = 5;
const VXR: i32 = 6;
const VVR: i32 = 7;
const ZVDR: i32 = 8;
const AZEDR: i32 = 9;
const CVVR: i32 = 13;

const MAX_DIMS: usize = 10;
const NAME_LEN: usize = 256;

/// How the values of a CDF are laid out in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Big,
    Little,
}

impl Encoding {
    /// IEEE encodings only; the VAX floating-point ones aren't supported.
    fn from_code(code: i32) -> Option<Encoding> {
        match code {
            1 | 2 | 5 | 7 | 9 | 11 | 12 | 18 => Some(Encoding::Big),
            4 | 6 | 13 | 16 | 17 => Some(Encoding::Little),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdfType {
    Int1,
    Int2,
    Int4,
    Int8,
    UInt1,
    UInt2,
    UInt4,
    Real4,
    Real8,
    Epoch,
    Epoch16,
    TimeTt2000,
    Char,
}

impl CdfType {
    pub fn from_code(code: i32) -> Option<CdfType> {
        Some(match code {
            1 | 41 => CdfType::Int1,
            2 => CdfType::Int2,
            4 => CdfType::Int4,
            8 => CdfType::Int8,
            11 => CdfType::UInt1,
            12 => CdfType::UInt2,
            14 => CdfType::UInt4,
            21 | 44 => CdfType::Real4,
            22 | 45 => CdfType::Real8,
            31 => CdfType::Epoch,
            32 => CdfType::Epoch16,
            33 => CdfType::TimeTt2000,
            51 | 52 => CdfType::Char,
            _ => return None,
        })
    }

    /// Bytes per element.
    pub fn size(self) -> usize {
        match self {
            CdfType::Int1 | CdfType::UInt1 | CdfType::Char => 1,
            CdfType::Int2 | CdfType::UInt2 => 2,
            CdfType::Int4 | CdfType::UInt4 | CdfType::Real4 => 4,
            CdfType::Int8 | CdfType::Real8 | CdfType::Epoch | CdfType::TimeTt2000 => 8,
            CdfType::Epoch16 => 16,
        }
    }

    /// Plain numbers, as opposed to times and text.
    pub fn is_numeric(self) -> bool {
        !matches!(
            self,
            CdfType::Epoch | CdfType::Epoch16 | CdfType::TimeTt2000 | CdfType::Char
        )
    }
}

/// Decoded values of a variable or attribute entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    /// Every integer type, and TT2000 nanoseconds.
    Int(Vec<i64>),
    /// Both float types, and EPOCH milliseconds.
    Real(Vec<f64>),
    /// EPOCH16 (seconds, picoseconds) pairs.
    Epoch16(Vec<(f64, f64)>),
    /// One string per `num_elems` characters.
    Text(Vec<String>),
}

impl Values {
    fn decode<B: ByteOrder>(bytes: &[u8], data_type: CdfType, num_elems: usize) -> Values {
        let items = bytes.chunks_exact(data_type.size());
        match data_type {
            CdfType::Int1 => Values::Int(items.map(|b| i64::from(b[0] as i8)).collect()),
            CdfType::UInt1 => Values::Int(items.map(|b| i64::from(b[0])).collect()),
            CdfType::Int2 => Values::Int(items.map(|b| i64::from(B::read_i16(b))).collect()),
            CdfType::UInt2 => Values::Int(items.map(|b| i64::from(B::read_u16(b))).collect()),
            CdfType::Int4 => Values::Int(items.map(|b| i64::from(B::read_i32(b))).collect()),
            CdfType::UInt4 => Values::Int(items.map(|b| i64::from(B::read_u32(b))).collect()),
            CdfType::Int8 | CdfType::TimeTt2000 => Values::Int(items.map(B::read_i64).collect()),
            CdfType::Real4 => Values::Real(items.map(|b| f64::from(B::read_f32(b))).collect()),
            CdfType::Real8 | CdfType::Epoch => Values::Real(items.map(B::read_f64).collect()),
            CdfType::Epoch16 => Values::Epoch16(
                items
                    .map(|b| (B::read_f64(&b[..8]), B::read_f64(&b[8..])))
                    .collect(),
            ),
            CdfType::Char => Values::Text(bytes.chunks(num_elems.max(1)).map(fixed_str).collect()),
        }
    }

    fn decode_with(encoding: Encoding, bytes: &[u8], data_type: CdfType, num_elems: usize) -> Values {
        match encoding {
            Encoding::Big => Values::decode::<BigEndian>(bytes, data_type, num_elems),
            Encoding::Little => Values::decode::<LittleEndian>(bytes, data_type, num_elems),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Values::Int(v) => v.len(),
            Values::Real(v) => v.len(),
            Values::Epoch16(v) => v.len(),
            Values::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numbers as `f64`s; `None` for text and EPOCH16 values.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            Values::Int(v) => Some(v.iter().map(|&i| i as f64).collect()),
            Values::Real(v) => Some(v.clone()),
            Values::Epoch16(_) | Values::Text(_) => None,
        }
    }

    /// The first string of text values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Values::Text(v) => v.first().map(|s| s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Values::Int(v) => write!(f, "{}", v.iter().join(", ")),
            Values::Real(v) => write!(f, "{}", v.iter().join(", ")),
            Values::Epoch16(v) => write!(
                f,
                "{}",
                v.iter().map(|(s, ps)| format!("{s}s+{ps}ps")).join(", ")
            ),
            Values::Text(v) => write!(f, "{}", v.iter().join("; ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub num: i32,
    /// zVariable (as opposed to rVariable)?
    pub z: bool,
    pub data_type: CdfType,
    /// Characters per string for text variables, otherwise 1.
    pub num_elems: usize,
    /// Stored dimension sizes; a dimension that doesn't vary is stored once.
    pub dims: Vec<usize>,
    pub record_variance: bool,
    /// The last record written, or -1 if there are none.
    pub max_rec: i32,
    compressed: bool,
    record_bytes: usize,
    vxr_head: u64,
}

impl Variable {
    pub fn num_records(&self) -> usize {
        usize::try_from(i64::from(self.max_rec) + 1).unwrap_or(0)
    }

    pub fn values_per_record(&self) -> usize {
        self.dims.iter().product()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub num: i32,
    pub global: bool,
    pub entries: Vec<AttributeEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeEntry {
    /// The entry number; for variable attributes, the variable's number.
    pub num: i32,
    /// Does this entry belong to a zVariable?
    pub z: bool,
    pub value: Values,
}

/// The big-endian fields of one internal record.
struct Fields<'a> {
    file: &'a Path,
    offset: u64,
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Fields<'a> {
    fn short(&self) -> CdfError {
        CdfError::ShortRecord {
            file: self.file.to_path_buf(),
            offset: self.offset,
        }
    }

    fn bad(&self, field: &'static str, value: i64) -> CdfError {
        CdfError::BadField {
            file: self.file.to_path_buf(),
            offset: self.offset,
            field,
            value,
        }
    }

    fn i32(&mut self) -> Result<i32, CdfError> {
        self.cursor.read_i32::<BigEndian>().map_err(|_| self.short())
    }

    fn i64(&mut self) -> Result<i64, CdfError> {
        self.cursor.read_i64::<BigEndian>().map_err(|_| self.short())
    }

    /// The offset of another record.
    fn offset(&mut self) -> Result<u64, CdfError> {
        let value = self.i64()?;
        u64::try_from(value).map_err(|_| self.bad("record offset", value))
    }

    /// A non-negative count.
    fn count(&mut self, field: &'static str) -> Result<usize, CdfError> {
        let value = self.i32()?;
        usize::try_from(value).map_err(|_| self.bad(field, value.into()))
    }

    fn i32s(&mut self, n: usize) -> Result<Vec<i32>, CdfError> {
        (0..n).map(|_| self.i32()).collect()
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], CdfError> {
        let data: &'a [u8] = *self.cursor.get_ref();
        let start = self.cursor.position() as usize;
        let end = start
            .checked_add(n)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| self.short())?;
        self.cursor.set_position(end as u64);
        Ok(&data[start..end])
    }

    fn skip_i32s(&mut self, n: usize) -> Result<(), CdfError> {
        self.bytes(4 * n).map(|_| ())
    }

    fn name(&mut self) -> Result<String, CdfError> {
        let mut buf = [0; NAME_LEN];
        self.cursor.read_exact(&mut buf).map_err(|_| self.short())?;
        Ok(fixed_str(&buf))
    }
}

/// Bounds-checked access to the internal records of a file's bytes.
struct Parser<'a> {
    file: &'a Path,
    data: &'a [u8],
    encoding: Encoding,
}

impl<'a> Parser<'a> {
    /// The type and body (everything after the size and type) of the record
    /// at `offset`, which must be one of the `expected` types.
    fn record(
        &self,
        offset: u64,
        expected: &[i32],
        what: &'static str,
    ) -> Result<(i32, &'a [u8]), CdfError> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let available = self.data.len().saturating_sub(start);
        if available < 12 {
            return Err(BinaryError::Truncated {
                file: self.file.to_path_buf(),
                offset,
                wanted: 12,
                available,
            }
            .into());
        }
        let size = BigEndian::read_i64(&self.data[start..]);
        let record_type = BigEndian::read_i32(&self.data[start + 8..]);
        let len = usize::try_from(size)
            .ok()
            .filter(|&n| n >= 12)
            .ok_or_else(|| CdfError::BadRecordSize {
                file: self.file.to_path_buf(),
                offset,
                size,
            })?;
        if len > available {
            return Err(BinaryError::Truncated {
                file: self.file.to_path_buf(),
                offset,
                wanted: len,
                available,
            }
            .into());
        }
        if !expected.contains(&record_type) {
            return Err(CdfError::UnexpectedRecord {
                file: self.file.to_path_buf(),
                offset,
                expected: what,
                found: record_type,
            });
        }
        trace!("{what} at byte {offset}: type {record_type}, {len} bytes");
        Ok((record_type, &self.data[start + 12..start + len]))
    }

    fn fields(
        &self,
        offset: u64,
        expected: &[i32],
        what: &'static str,
    ) -> Result<(i32, Fields<'a>), CdfError> {
        let (record_type, body) = self.record(offset, expected, what)?;
        Ok((
            record_type,
            Fields {
                file: self.file,
                offset,
                cursor: Cursor::new(body),
            },
        ))
    }

    /// Follow a linked list of records from `head`. `parse` returns an item
    /// and the offset of the next record.
    fn chain<T>(
        &self,
        head: u64,
        mut parse: impl FnMut(u64) -> Result<(T, u64), CdfError>,
    ) -> Result<Vec<T>, CdfError> {
        let mut visited = BTreeSet::new();
        let mut items = vec![];
        let mut offset = head;
        while offset != 0 {
            if !visited.insert(offset) {
                return Err(CdfError::Cycle {
                    file: self.file.to_path_buf(),
                    offset,
                });
            }
            let (item, next) = parse(offset)?;
            items.push(item);
            offset = next;
        }
        Ok(items)
    }

    fn dim_sizes(&self, f: &mut Fields, n: usize) -> Result<Vec<usize>, CdfError> {
        if n > MAX_DIMS {
            return Err(f.bad("number of dimensions", n as i64));
        }
        f.i32s(n)?
            .into_iter()
            .map(|s| {
                usize::try_from(s)
                    .ok()
                    .filter(|&s| s > 0)
                    .ok_or_else(|| f.bad("dimension size", s.into()))
            })
            .collect()
    }

    fn variable(&self, offset: u64, r_dims: &[usize]) -> Result<(Variable, u64), CdfError> {
        let (record_type, mut f) = self.fields(offset, &[RVDR, ZVDR], "VDR")?;
        let next = f.offset()?;
        let type_code = f.i32()?;
        let max_rec = f.i32()?;
        let vxr_head = f.offset()?;
        let _vxr_tail = f.offset()?;
        let flags = f.i32()?;
        // SRecords, rfuB, rfuC, rfuF
        f.skip_i32s(4)?;
        let num_elems = f.count("NumElems")?;
        let num = f.i32()?;
        let _cpr_or_spr = f.i64()?;
        let _blocking_factor = f.i32()?;
        let name = f.name()?;

        let z = record_type == ZVDR;
        let sizes = if z {
            let n = f.count("zNumDims")?;
            self.dim_sizes(&mut f, n)?
        } else {
            r_dims.to_vec()
        };
        let varys = f.i32s(sizes.len())?;
        let dims = sizes
            .iter()
            .zip(varys)
            .map(|(&s, vary)| if vary != 0 { s } else { 1 })
            .collect::<Vec<_>>();

        let data_type =
            CdfType::from_code(type_code).ok_or_else(|| CdfError::UnsupportedDataType {
                file: self.file.to_path_buf(),
                what: format!("variable {name}"),
                code: type_code,
            })?;
        if num_elems == 0 || (num_elems > 1 && data_type != CdfType::Char) {
            return Err(f.bad("NumElems", num_elems as i64));
        }
        if max_rec < -1 {
            return Err(f.bad("MaxRec", max_rec.into()));
        }
        let record_bytes = dims
            .iter()
            .try_fold(data_type.size(), |acc, &d| acc.checked_mul(d))
            .and_then(|n| n.checked_mul(num_elems))
            .ok_or_else(|| f.bad("record size", i64::MAX))?;

        let variable = Variable {
            name,
            num,
            z,
            data_type,
            num_elems,
            dims,
            record_variance: flags & 1 != 0,
            max_rec,
            compressed: flags & 4 != 0,
            record_bytes,
            vxr_head,
        };
        trace!("{variable:?}");
        Ok((variable, next))
    }

    fn entry(&self, offset: u64, z: bool, attribute: &str) -> Result<(AttributeEntry, u64), CdfError> {
        let (_, mut f) = if z {
            self.fields(offset, &[AZEDR], "AzEDR")?
        } else {
            self.fields(offset, &[AGREDR], "AgrEDR")?
        };
        let next = f.offset()?;
        let _attr_num = f.i32()?;
        let type_code = f.i32()?;
        let num = f.i32()?;
        let num_elems = f.count("NumElems")?;
        // NumStrings, rfB, rfC, rfD, rfE
        f.skip_i32s(5)?;

        let data_type =
            CdfType::from_code(type_code).ok_or_else(|| CdfError::UnsupportedDataType {
                file: self.file.to_path_buf(),
                what: format!("attribute {attribute}"),
                code: type_code,
            })?;
        let len = num_elems
            .checked_mul(data_type.size())
            .ok_or_else(|| f.bad("NumElems", num_elems as i64))?;
        let value = Values::decode_with(self.encoding, f.bytes(len)?, data_type, num_elems);
        Ok((AttributeEntry { num, z, value }, next))
    }

    fn attribute(&self, offset: u64) -> Result<(Attribute, u64), CdfError> {
        let (_, mut f) = self.fields(offset, &[ADR], "ADR")?;
        let next = f.offset()?;
        let agr_head = f.offset()?;
        let scope = f.i32()?;
        let num = f.i32()?;
        // NgrEntries, MAXgrEntry, rfuA
        f.skip_i32s(3)?;
        let az_head = f.offset()?;
        // NzEntries, MAXzEntry, rfuE
        f.skip_i32s(3)?;
        let name = f.name()?;

        let mut entries = self.chain(agr_head, |o| self.entry(o, false, &name))?;
        entries.extend(self.chain(az_head, |o| self.entry(o, true, &name))?);
        Ok((
            Attribute {
                name,
                num,
                // Scopes 3 and 4 are the "assumed" versions of 1 and 2.
                global: matches!(scope, 1 | 3),
                entries,
            },
            next,
        ))
    }

    /// Collect the first and last record numbers and VVR offset of every
    /// block of values below the VXR at `head`.
    fn value_blocks(
        &self,
        variable: &Variable,
        head: u64,
        visited: &mut BTreeSet<u64>,
        blocks: &mut Vec<(usize, usize, u64)>,
    ) -> Result<(), CdfError> {
        let mut offset = head;
        while offset != 0 {
            if !visited.insert(offset) {
                return Err(CdfError::Cycle {
                    file: self.file.to_path_buf(),
                    offset,
                });
            }
            let (_, mut f) = self.fields(offset, &[VXR], "VXR")?;
            let next = f.offset()?;
            let num_entries = f.count("Nentries")?;
            let num_used = f.count("NusedEntries")?;
            if num_used > num_entries {
                return Err(f.bad("NusedEntries", num_used as i64));
            }
            let firsts = f.i32s(num_entries)?;
            let lasts = f.i32s(num_entries)?;
            let offsets = (0..num_entries)
                .map(|_| f.offset())
                .collect::<Result<Vec<_>, _>>()?;

            for ((&first, &last), &child) in firsts.iter().zip(&lasts).zip(&offsets).take(num_used) {
                if first < 0 || last < first || last > variable.max_rec {
                    return Err(f.bad("VXR record range", last.into()));
                }
                let (record_type, _) = self.record(child, &[VXR, VVR, CVVR], "VXR or VVR")?;
                match record_type {
                    VXR => self.value_blocks(variable, child, visited, blocks)?,
                    CVVR => {
                        return Err(CdfError::Compressed {
                            file: self.file.to_path_buf(),
                            variable: variable.name.clone(),
                        })
                    }
                    _ => blocks.push((first as usize, last as usize, child)),
                }
            }
            offset = next;
        }
        Ok(())
    }
}

/// Reorder the values of each record from column-major (first index varies
/// fastest) to row-major (last index varies fastest).
pub(crate) fn column_to_row_major(bytes: &mut [u8], dims: &[usize], value_bytes: usize) {
    let num_values: usize = dims.iter().product();
    let record_bytes = num_values * value_bytes;
    if dims.len() < 2 || record_bytes == 0 {
        return;
    }
    let col_strides = dims
        .iter()
        .scan(1, |stride, &d| {
            let s = *stride;
            *stride *= d;
            Some(s)
        })
        .collect::<Vec<_>>();
    for record in bytes.chunks_exact_mut(record_bytes) {
        let column_major = record.to_vec();
        for row_index in 0..num_values {
            let mut rem = row_index;
            let mut col_index = 0;
            for (&d, &stride) in dims.iter().zip(&col_strides).rev() {
                col_index += (rem % d) * stride;
                rem /= d;
            }
            record[row_index * value_bytes..][..value_bytes]
                .copy_from_slice(&column_major[col_index * value_bytes..][..value_bytes]);
        }
    }
}

/// An open CDF: its header records, decoded, and its bytes for reading
/// variable values on demand.
pub struct CdfFile {
    file: PathBuf,
    data: Vec<u8>,
    /// (version, release, increment) of the library that wrote the file.
    pub version: (i32, i32, i32),
    pub encoding: Encoding,
    pub row_major: bool,
    /// rVariables then zVariables, each in file order.
    pub variables: Vec<Variable>,
    pub attributes: Vec<Attribute>,
}

impl CdfFile {
    pub fn open<P: AsRef<Path>>(file: P) -> Result<CdfFile, CdfError> {
        let file = file.as_ref();
        let data = std::fs::read(file)?;
        CdfFile::from_bytes(file, data)
    }

    pub fn from_bytes(file: &Path, data: Vec<u8>) -> Result<CdfFile, CdfError> {
        if data.len() < 8 {
            return Err(BinaryError::Truncated {
                file: file.to_path_buf(),
                offset: 0,
                wanted: 8,
                available: data.len(),
            }
            .into());
        }
        match BigEndian::read_u32(&data) {
            CDF3_MAGIC => (),
            magic @ (CDF26_MAGIC | CDF_OLD_MAGIC) => {
                return Err(CdfError::UnsupportedVersion {
                    file: file.to_path_buf(),
                    magic,
                })
            }
            got => {
                return Err(BinaryError::BadMagic {
                    file: file.to_path_buf(),
                    offset: 0,
                    expected: CDF3_MAGIC,
                    got,
                }
                .into())
            }
        }
        match BigEndian::read_u32(&data[4..]) {
            UNCOMPRESSED_MAGIC => (),
            COMPRESSED_MAGIC => {
                return Err(CdfError::CompressedFile {
                    file: file.to_path_buf(),
                })
            }
            got => {
                return Err(BinaryError::BadMagic {
                    file: file.to_path_buf(),
                    offset: 4,
                    expected: UNCOMPRESSED_MAGIC,
                    got,
                }
                .into())
            }
        }

        // The encoding isn't known until the CDR is read, but nothing before
        // it depends on it.
        let mut parser = Parser {
            file,
            data: &data,
            encoding: Encoding::Big,
        };
        let (_, mut f) = parser.fields(8, &[CDR], "CDR")?;
        let gdr_offset = f.offset()?;
        let version = f.i32()?;
        let release = f.i32()?;
        let encoding_code = f.i32()?;
        let flags = f.i32()?;
        // rfuA, rfuB
        f.skip_i32s(2)?;
        let increment = f.i32()?;
        let encoding =
            Encoding::from_code(encoding_code).ok_or_else(|| CdfError::UnsupportedEncoding {
                file: file.to_path_buf(),
                encoding: encoding_code,
            })?;
        if flags & 2 == 0 {
            return Err(CdfError::MultiFile {
                file: file.to_path_buf(),
            });
        }
        parser.encoding = encoding;

        let (_, mut f) = parser.fields(gdr_offset, &[GDR], "GDR")?;
        let rvdr_head = f.offset()?;
        let zvdr_head = f.offset()?;
        let adr_head = f.offset()?;
        let _eof = f.i64()?;
        let num_rvars = f.i32()?;
        let num_attrs = f.i32()?;
        let _r_max_rec = f.i32()?;
        let r_num_dims = f.count("rNumDims")?;
        let num_zvars = f.i32()?;
        let _uir_head = f.i64()?;
        // rfuC, LeapSecondLastUpdated, rfuE
        f.skip_i32s(3)?;
        let r_dims = parser.dim_sizes(&mut f, r_num_dims)?;

        let mut variables = parser.chain(rvdr_head, |o| parser.variable(o, &r_dims))?;
        variables.extend(parser.chain(zvdr_head, |o| parser.variable(o, &r_dims))?);
        let attributes = parser.chain(adr_head, |o| parser.attribute(o))?;

        debug!(
            "CDF {version}.{release}.{increment}, {encoding:?} endian, {} major",
            if flags & 1 != 0 { "row" } else { "column" }
        );
        debug!(
            "{} variables ({num_rvars} r, {num_zvars} z declared), {} attributes ({num_attrs} declared)",
            variables.len(),
            attributes.len()
        );

        Ok(CdfFile {
            file: file.to_path_buf(),
            data,
            version: (version, release, increment),
            encoding,
            row_major: flags & 1 != 0,
            variables,
            attributes,
        })
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn global_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| a.global)
    }

    /// The entry of the variable-scope attribute `name` for `variable`.
    pub fn variable_attribute(&self, variable: &Variable, name: &str) -> Option<&Values> {
        self.attributes
            .iter()
            .filter(|a| !a.global && a.name.eq_ignore_ascii_case(name))
            .flat_map(|a| &a.entries)
            .find(|e| e.num == variable.num && e.z == variable.z)
            .map(|e| &e.value)
    }

    /// Read every record of a variable, in row-major order.
    pub fn read_variable(&self, variable: &Variable) -> Result<Values, CdfError> {
        if variable.compressed {
            return Err(CdfError::Compressed {
                file: self.file.clone(),
                variable: variable.name.clone(),
            });
        }
        let parser = Parser {
            file: &self.file,
            data: &self.data,
            encoding: self.encoding,
        };
        let num_records = variable.num_records();
        let total = num_records
            .checked_mul(variable.record_bytes)
            .filter(|&n| n <= self.data.len())
            .ok_or_else(|| CdfError::BadField {
                file: self.file.clone(),
                offset: 0,
                field: "MaxRec",
                value: variable.max_rec.into(),
            })?;

        let mut blocks = vec![];
        parser.value_blocks(variable, variable.vxr_head, &mut BTreeSet::new(), &mut blocks)?;
        let mut bytes = vec![0; total];
        let mut num_written = 0;
        for (first, last, offset) in blocks {
            let (_, body) = parser.record(offset, &[VVR], "VVR")?;
            // `last` was checked against MaxRec, so this fits in `bytes`.
            let len = (last - first + 1) * variable.record_bytes;
            if body.len() < len {
                return Err(BinaryError::InconsistentRecord {
                    file: self.file.clone(),
                    offset,
                    expected: len,
                    actual: body.len(),
                }
                .into());
            }
            bytes[first * variable.record_bytes..][..len].copy_from_slice(&body[..len]);
            num_written += last - first + 1;
        }
        if num_written < num_records {
            warn!(
                "{}: variable {} has values for only {num_written} of its {num_records} records",
                self.file.display(),
                variable.name
            );
        }

        if !self.row_major {
            column_to_row_major(
                &mut bytes,
                &variable.dims,
                variable.num_elems * variable.data_type.size(),
            );
        }
        Ok(Values::decode_with(
            self.encoding,
            &bytes,
            variable.data_type,
            variable.num_elems,
        ))
    }
}
