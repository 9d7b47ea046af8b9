//! Layouts and decoding of PDS3 `TABLE` objects.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{trace, warn};

use super::{
    label::{Object, Value},
    Pds3Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer { endian: Endian, signed: bool },
    Real(Endian),
    Character,
    /// Times and dates are kept as their text.
    Time,
    AsciiInteger,
    AsciiReal,
}

impl DataType {
    /// Interpret a `DATA_TYPE` value. In ASCII tables the generic `INTEGER`
    /// and `REAL` types are text.
    pub fn parse(s: &str, ascii_table: bool) -> Option<DataType> {
        use DataType::*;
        use Endian::*;

        let s = s.trim().to_ascii_uppercase().replace(' ', "_");
        let data_type = match s.as_str() {
            "INTEGER" | "REAL" | "FLOAT" if ascii_table => {
                if s == "INTEGER" {
                    AsciiInteger
                } else {
                    AsciiReal
                }
            }
            "MSB_INTEGER" | "INTEGER" | "SUN_INTEGER" | "MAC_INTEGER" => Integer {
                endian: Big,
                signed: true,
            },
            "LSB_INTEGER" | "PC_INTEGER" | "VAX_INTEGER" => Integer {
                endian: Little,
                signed: true,
            },
            "MSB_UNSIGNED_INTEGER" | "UNSIGNED_INTEGER" | "SUN_UNSIGNED_INTEGER"
            | "MAC_UNSIGNED_INTEGER" => Integer {
                endian: Big,
                signed: false,
            },
            "LSB_UNSIGNED_INTEGER" | "PC_UNSIGNED_INTEGER" | "VAX_UNSIGNED_INTEGER" => Integer {
                endian: Little,
                signed: false,
            },
            "IEEE_REAL" | "REAL" | "FLOAT" | "SUN_REAL" | "MAC_REAL" => Real(Big),
            "PC_REAL" => Real(Little),
            "CHARACTER" => Character,
            "TIME" | "DATE" => Time,
            "ASCII_INTEGER" => AsciiInteger,
            "ASCII_REAL" => AsciiReal,
            _ => return None,
        };
        Some(data_type)
    }

    fn size_is_valid(self, bytes: usize) -> bool {
        match self {
            DataType::Integer { .. } => matches!(bytes, 1 | 2 | 4 | 8),
            DataType::Real(_) => matches!(bytes, 4 | 8),
            _ => bytes > 0,
        }
    }
}

/// A `COLUMN` object. Byte positions are zero-based here, unlike the label.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLayout {
    pub name: String,
    pub data_type: DataType,
    pub start: usize,
    pub items: usize,
    pub item_bytes: usize,
    pub item_offset: usize,
    pub scaling_factor: Option<f64>,
    pub offset: Option<f64>,
    pub unit: Option<String>,
}

impl ColumnLayout {
    fn from_object(object: &Object, ascii_table: bool) -> Result<ColumnLayout, Pds3Error> {
        let name = object.get_str("NAME").unwrap_or(&object.name).to_string();
        let data_type_text = object
            .get_str("DATA_TYPE")
            .ok_or_else(|| missing(&name, "DATA_TYPE"))?;
        let data_type = DataType::parse(data_type_text, ascii_table).ok_or_else(|| {
            Pds3Error::UnsupportedDataType {
                column: name.clone(),
                data_type: data_type_text.to_string(),
            }
        })?;
        let start_byte = required_usize(object, &name, "START_BYTE")?;
        if start_byte == 0 {
            return Err(bad_keyword(&name, "START_BYTE", "0"));
        }
        let bytes = required_usize(object, &name, "BYTES")?;
        let items = optional_usize(object, &name, "ITEMS")?.unwrap_or(1);
        if items == 0 {
            return Err(bad_keyword(&name, "ITEMS", "0"));
        }
        let item_bytes = optional_usize(object, &name, "ITEM_BYTES")?.unwrap_or(bytes / items);
        let item_offset = optional_usize(object, &name, "ITEM_OFFSET")?.unwrap_or(item_bytes);
        if !data_type.size_is_valid(item_bytes) {
            return Err(Pds3Error::UnsupportedItemSize {
                column: name,
                data_type: data_type_text.to_string(),
                bytes: item_bytes,
            });
        }

        Ok(ColumnLayout {
            data_type,
            start: start_byte - 1,
            items,
            item_bytes,
            item_offset,
            scaling_factor: object.get("SCALING_FACTOR").and_then(Value::as_f64),
            offset: object.get("OFFSET").and_then(Value::as_f64),
            unit: object.get_str("UNIT").map(|s| s.to_string()),
            name,
        })
    }

    /// One past the last byte of the row this column uses, or `None` if the
    /// label's numbers don't fit in a `usize`.
    fn end(&self) -> Option<usize> {
        (self.items - 1)
            .checked_mul(self.item_offset)?
            .checked_add(self.start)?
            .checked_add(self.item_bytes)
    }

    fn is_scaled(&self) -> bool {
        self.scaling_factor.is_some() || self.offset.is_some()
    }
}

/// A `TABLE`-like object: how its rows are laid out in the data file.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    pub name: String,
    pub ascii: bool,
    pub rows: usize,
    pub row_bytes: usize,
    pub row_prefix_bytes: usize,
    pub row_suffix_bytes: usize,
    pub columns: Vec<ColumnLayout>,
}

impl TableLayout {
    pub fn from_object(object: &Object) -> Result<TableLayout, Pds3Error> {
        let name = object.name.clone();
        let format = object
            .get_str("INTERCHANGE_FORMAT")
            .ok_or_else(|| missing(&name, "INTERCHANGE_FORMAT"))?;
        let ascii = match format.to_ascii_uppercase().as_str() {
            "ASCII" => true,
            "BINARY" => false,
            other => return Err(bad_keyword(&name, "INTERCHANGE_FORMAT", other)),
        };
        let rows = required_usize(object, &name, "ROWS")?;
        let row_bytes = required_usize(object, &name, "ROW_BYTES")?;
        let row_prefix_bytes = optional_usize(object, &name, "ROW_PREFIX_BYTES")?.unwrap_or(0);
        let row_suffix_bytes = optional_usize(object, &name, "ROW_SUFFIX_BYTES")?.unwrap_or(0);

        let stride = row_prefix_bytes
            .checked_add(row_bytes)
            .and_then(|n| n.checked_add(row_suffix_bytes))
            .ok_or_else(|| bad_keyword(&name, "ROW_BYTES", &row_bytes.to_string()))?;
        if rows.checked_mul(stride).is_none() {
            return Err(bad_keyword(&name, "ROWS", &rows.to_string()));
        }

        // Only COLUMN children are decoded; CONTAINER and any other nested
        // objects are skipped with a warning.
        let mut columns = vec![];
        for child in object.objects() {
            if !child.name.eq_ignore_ascii_case("COLUMN") {
                warn!("{name}: ignoring {} object", child.name);
                continue;
            }
            let column = ColumnLayout::from_object(child, ascii)?;
            match column.end() {
                Some(end) if end <= row_bytes => (),
                Some(end) => {
                    return Err(Pds3Error::ColumnOutOfRow {
                        column: column.name,
                        end,
                        row_bytes,
                    })
                }
                None => {
                    return Err(bad_keyword(&column.name, "ITEMS", &column.items.to_string()))
                }
            }
            trace!(
                "{name}: column {} at byte {}, {} x {} bytes",
                column.name,
                column.start,
                column.items,
                column.item_bytes
            );
            columns.push(column);
        }

        Ok(TableLayout {
            name,
            ascii,
            rows,
            row_bytes,
            row_prefix_bytes,
            row_suffix_bytes,
            columns,
        })
    }

    /// The number of bytes from the start of one row to the next.
    pub fn stride(&self) -> usize {
        self.row_prefix_bytes
            .saturating_add(self.row_bytes)
            .saturating_add(self.row_suffix_bytes)
    }

    /// Decode the rows of this table from `data`, which must hold at least
    /// `rows * stride()` bytes.
    pub(super) fn decode(&self, data: &[u8]) -> Result<Table, Pds3Error> {
        let stride = self.stride();
        let rows = data
            .chunks_exact(stride.max(1))
            .take(self.rows)
            .map(|row| &row[self.row_prefix_bytes..self.row_prefix_bytes + self.row_bytes])
            .collect::<Vec<_>>();

        let columns = self
            .columns
            .iter()
            .map(|layout| decode_column(layout, &rows))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Table {
            name: self.name.clone(),
            rows: self.rows,
            columns,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Integer(Vec<i64>),
    Real(Vec<f64>),
    Text(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Integer(v) => v.len(),
            ColumnData::Real(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric values as floats.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            ColumnData::Integer(v) => Some(v.iter().map(|&i| i as f64).collect()),
            ColumnData::Real(v) => Some(v.clone()),
            ColumnData::Text(_) => None,
        }
    }
}

/// A decoded column. `data` holds `items` values per row, row after row.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub items: usize,
    pub unit: Option<String>,
    pub data: ColumnData,
}

impl Column {
    /// The values of one row.
    pub fn row_f64(&self, row: usize) -> Option<Vec<f64>> {
        let range = row * self.items..(row + 1) * self.items;
        match &self.data {
            ColumnData::Integer(v) => v
                .get(range)
                .map(|v| v.iter().map(|&i| i as f64).collect()),
            ColumnData::Real(v) => v.get(range).map(|v| v.to_vec()),
            ColumnData::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub rows: usize,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

fn decode_int<B: ByteOrder>(b: &[u8], signed: bool) -> Option<i64> {
    let value = match (signed, b.len()) {
        (true, 1) => i64::from(b[0] as i8),
        (false, 1) => i64::from(b[0]),
        (true, 2) => i64::from(B::read_i16(b)),
        (false, 2) => i64::from(B::read_u16(b)),
        (true, 4) => i64::from(B::read_i32(b)),
        (false, 4) => i64::from(B::read_u32(b)),
        (true, 8) => B::read_i64(b),
        (false, 8) => return i64::try_from(B::read_u64(b)).ok(),
        _ => return None,
    };
    Some(value)
}

fn decode_real<B: ByteOrder>(b: &[u8]) -> Option<f64> {
    match b.len() {
        4 => Some(f64::from(B::read_f32(b))),
        8 => Some(B::read_f64(b)),
        _ => None,
    }
}

fn decode_column(layout: &ColumnLayout, rows: &[&[u8]]) -> Result<Column, Pds3Error> {
    let bad_value = |row: usize, bytes: &[u8]| Pds3Error::BadValue {
        column: layout.name.clone(),
        row,
        text: String::from_utf8_lossy(bytes).trim().to_string(),
    };

    let items = rows.iter().enumerate().flat_map(|(r, row)| {
        (0..layout.items).map(move |i| {
            let start = layout.start + i * layout.item_offset;
            (r, &row[start..start + layout.item_bytes])
        })
    });
    let text = |b: &[u8]| String::from_utf8_lossy(b).trim().to_string();

    let data = match layout.data_type {
        DataType::Integer { endian, signed } => ColumnData::Integer(
            items
                .map(|(r, b)| {
                    match endian {
                        Endian::Big => decode_int::<BigEndian>(b, signed),
                        Endian::Little => decode_int::<LittleEndian>(b, signed),
                    }
                    .ok_or_else(|| bad_value(r, b))
                })
                .collect::<Result<_, _>>()?,
        ),
        DataType::Real(endian) => ColumnData::Real(
            items
                .map(|(r, b)| {
                    match endian {
                        Endian::Big => decode_real::<BigEndian>(b),
                        Endian::Little => decode_real::<LittleEndian>(b),
                    }
                    .ok_or_else(|| bad_value(r, b))
                })
                .collect::<Result<_, _>>()?,
        ),
        DataType::AsciiInteger => ColumnData::Integer(
            items
                .map(|(r, b)| text(b).parse().map_err(|_| bad_value(r, b)))
                .collect::<Result<_, _>>()?,
        ),
        DataType::AsciiReal => ColumnData::Real(
            items
                .map(|(r, b)| {
                    // Fortran writes doubles with a D exponent.
                    text(b).replace(['D', 'd'], "E").parse().map_err(|_| bad_value(r, b))
                })
                .collect::<Result<_, _>>()?,
        ),
        DataType::Character | DataType::Time => ColumnData::Text(
            items
                .map(|(_, b)| text(b).trim_matches('"').to_string())
                .collect(),
        ),
    };

    let data = match (layout.is_scaled(), data) {
        (true, ColumnData::Text(t)) => {
            warn!("Column {}: can't scale text values", layout.name);
            ColumnData::Text(t)
        }
        (true, numeric) => {
            let scale = layout.scaling_factor.unwrap_or(1.0);
            let offset = layout.offset.unwrap_or(0.0);
            let values = numeric.to_f64().unwrap_or_default();
            ColumnData::Real(values.into_iter().map(|v| v * scale + offset).collect())
        }
        (false, data) => data,
    };

    Ok(Column {
        name: layout.name.clone(),
        items: layout.items,
        unit: layout.unit.clone(),
        data,
    })
}

fn missing(object: &str, keyword: &'static str) -> Pds3Error {
    Pds3Error::MissingKeyword {
        object: object.to_string(),
        keyword,
    }
}

fn bad_keyword(object: &str, keyword: &'static str, value: &str) -> Pds3Error {
    Pds3Error::BadKeyword {
        object: object.to_string(),
        keyword,
        value: value.to_string(),
    }
}

fn optional_usize(
    object: &Object,
    object_name: &str,
    keyword: &'static str,
) -> Result<Option<usize>, Pds3Error> {
    match object.get(keyword) {
        None => Ok(None),
        Some(value) => value
            .as_i64()
            .and_then(|i| usize::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| bad_keyword(object_name, keyword, &value.to_string())),
    }
}

fn required_usize(
    object: &Object,
    object_name: &str,
    keyword: &'static str,
) -> Result<usize, Pds3Error> {
    optional_usize(object, object_name, keyword)?.ok_or_else(|| missing(object_name, keyword))
}
