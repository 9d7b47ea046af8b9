//! Planetary Data System version 3 products.
//!
//! A product is described by an ODL label, either in its own `.lbl` file or
//! at the start of the data file. Labels point at their data objects with
//! `^NAME` keywords; only table objects are decoded here.

pub mod label;
pub mod table;
#[cfg(test)]
mod tests;

pub use label::{BlockKind, LabelError, Object, Value};
pub use table::{Column, ColumnData, ColumnLayout, DataType, Table, TableLayout};

use std::{
    fs::File,
    io::{BufRead, BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use log::{debug, trace};
use thiserror::Error;

use super::BinaryError;

#[derive(Error, Debug)]
pub enum Pds3Error {
    #[error(transparent)]
    Label(#[from] LabelError),

    #[error("Object {object}: missing keyword {keyword}")]
    MissingKeyword {
        object: String,
        keyword: &'static str,
    },

    #[error("Object {object}: invalid {keyword} value '{value}'")]
    BadKeyword {
        object: String,
        keyword: &'static str,
        value: String,
    },

    #[error("The label has no object named {name}")]
    NoSuchObject { name: String },

    #[error("Object {name} has no data pointer")]
    NoPointer { name: String },

    #[error("Can't interpret the ^{name} pointer '{value}'")]
    BadPointer { name: String, value: String },

    #[error("The ^{name} pointer counts records, but the label has no RECORD_BYTES")]
    NoRecordBytes { name: String },

    #[error("Couldn't find data file {name} in {}", dir.display())]
    MissingDataFile { dir: PathBuf, name: String },

    #[error("Column {column}: unsupported data type {data_type}")]
    UnsupportedDataType { column: String, data_type: String },

    #[error("Column {column}: {data_type} values can't be {bytes} bytes")]
    UnsupportedItemSize {
        column: String,
        data_type: String,
        bytes: usize,
    },

    #[error("Column {column} ends at byte {end}, beyond the {row_bytes}-byte row")]
    ColumnOutOfRow {
        column: String,
        end: usize,
        row_bytes: usize,
    },

    #[error("Column {column}, row {row}: can't decode '{text}'")]
    BadValue {
        column: String,
        row: usize,
        text: String,
    },

    #[error(transparent)]
    Binary(#[from] BinaryError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// Where a `^NAME` pointer says an object starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPointer {
    /// `None` when the object is in the same file as the label.
    pub file: Option<String>,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// A 1-based record number.
    Record(u64),
    /// A 1-based byte number.
    Byte(u64),
}

impl DataPointer {
    pub fn from_value(name: &str, value: &Value) -> Result<DataPointer, Pds3Error> {
        let bad = || Pds3Error::BadPointer {
            name: name.to_string(),
            value: value.to_string(),
        };
        let location = |v: &Value| -> Result<Location, Pds3Error> {
            let n = v
                .as_i64()
                .and_then(|n| u64::try_from(n).ok())
                .filter(|&n| n > 0)
                .ok_or_else(bad)?;
            match v.unit() {
                Some(u) if u.eq_ignore_ascii_case("BYTES") => Ok(Location::Byte(n)),
                None => Ok(Location::Record(n)),
                Some(_) => Err(bad()),
            }
        };

        match value {
            Value::Integer { .. } => Ok(DataPointer {
                file: None,
                location: location(value)?,
            }),
            Value::Text(f) | Value::Identifier(f) | Value::Symbol(f) => Ok(DataPointer {
                file: Some(f.clone()),
                location: Location::Record(1),
            }),
            Value::Sequence(v) => match v.as_slice() {
                [file, offset] => Ok(DataPointer {
                    file: Some(file.as_str().ok_or_else(bad)?.to_string()),
                    location: location(offset)?,
                }),
                [file] => Ok(DataPointer {
                    file: Some(file.as_str().ok_or_else(bad)?.to_string()),
                    location: Location::Record(1),
                }),
                _ => Err(bad()),
            },
            _ => Err(bad()),
        }
    }
}

/// Read the text of a label: the whole of a detached label, or the start of
/// a file up to and including its `END` line.
fn read_label_text(file: &Path) -> Result<String, Pds3Error> {
    let mut reader = BufReader::new(File::open(file)?);
    let mut bytes = vec![];
    let mut line = vec![];
    while reader.read_until(b'\n', &mut line)? > 0 {
        bytes.extend_from_slice(&line);
        if String::from_utf8_lossy(&line).trim() == "END" {
            break;
        }
        line.clear();
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Find `name` in `dir`, ignoring case if there is no exact match. PDS
/// volumes are often copied between case-sensitive and -insensitive file
/// systems.
fn find_data_file(dir: &Path, name: &str) -> Result<PathBuf, Pds3Error> {
    let exact = dir.join(name);
    if exact.exists() {
        return Ok(exact);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry
            .file_name()
            .to_str()
            .map(|n| n.eq_ignore_ascii_case(name))
            .unwrap_or(false)
        {
            return Ok(entry.path());
        }
    }
    Err(Pds3Error::MissingDataFile {
        dir: dir.to_path_buf(),
        name: name.to_string(),
    })
}

/// A labelled product.
#[derive(Debug, Clone)]
pub struct Pds3Product {
    label_file: PathBuf,
    label: Object,
}

impl Pds3Product {
    pub fn open<P: AsRef<Path>>(file: P) -> Result<Pds3Product, Pds3Error> {
        let file = file.as_ref();
        debug!("Using PDS3 label: {}", file.display());
        let text = read_label_text(file)?;
        let label = label::parse(&text)?;
        debug!(
            "{} statements, {} objects",
            label.statements.len(),
            label.objects().count()
        );
        Ok(Pds3Product {
            label_file: file.to_path_buf(),
            label,
        })
    }

    pub fn label(&self) -> &Object {
        &self.label
    }

    pub fn label_file(&self) -> &Path {
        &self.label_file
    }

    /// The names of pointed-to objects that can be read as tables.
    pub fn table_names(&self) -> Vec<&str> {
        self.label
            .pointers()
            .map(|(name, _)| name)
            .filter(|name| {
                self.label
                    .find_object(name)
                    .map(|o| o.get("INTERCHANGE_FORMAT").is_some() && o.get("ROWS").is_some())
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn table_layout(&self, name: &str) -> Result<TableLayout, Pds3Error> {
        let object = self
            .label
            .find_object(name)
            .ok_or_else(|| Pds3Error::NoSuchObject {
                name: name.to_string(),
            })?;
        TableLayout::from_object(object)
    }

    /// Resolve the `^NAME` pointer of an object into a file and byte offset.
    pub fn locate(&self, name: &str) -> Result<(PathBuf, u64), Pds3Error> {
        let value = self
            .label
            .pointers()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
            .ok_or_else(|| Pds3Error::NoPointer {
                name: name.to_string(),
            })?;
        let pointer = DataPointer::from_value(name, value)?;

        let file = match &pointer.file {
            None => self.label_file.clone(),
            Some(f) => {
                let dir = match self.label_file.parent() {
                    Some(d) if !d.as_os_str().is_empty() => d,
                    _ => Path::new("."),
                };
                find_data_file(dir, f)?
            }
        };
        let bad_pointer = || Pds3Error::BadPointer {
            name: name.to_string(),
            value: value.to_string(),
        };
        let offset = match pointer.location {
            Location::Byte(b) => b.checked_sub(1).ok_or_else(bad_pointer)?,
            Location::Record(r) => {
                let record_bytes = self
                    .label
                    .get("RECORD_BYTES")
                    .and_then(Value::as_i64)
                    .and_then(|n| u64::try_from(n).ok())
                    .ok_or_else(|| Pds3Error::NoRecordBytes {
                        name: name.to_string(),
                    })?;
                r.checked_sub(1)
                    .and_then(|r| r.checked_mul(record_bytes))
                    .ok_or_else(bad_pointer)?
            }
        };
        trace!("^{name} -> {} at byte {offset}", file.display());
        Ok((file, offset))
    }

    pub fn read_table(&self, name: &str) -> Result<Table, Pds3Error> {
        let layout = self.table_layout(name)?;
        let (file, offset) = self.locate(name)?;
        debug!(
            "Reading table {name}: {} rows of {} bytes from {}",
            layout.rows,
            layout.stride(),
            file.display()
        );

        let wanted = layout
            .rows
            .checked_mul(layout.stride())
            .ok_or_else(|| Pds3Error::BadKeyword {
                object: name.to_string(),
                keyword: "ROWS",
                value: layout.rows.to_string(),
            })?;
        let mut f = File::open(&file)?;
        let file_len = f.metadata()?.len();
        let available = file_len.saturating_sub(offset) as usize;
        if available < wanted {
            return Err(BinaryError::Truncated {
                file,
                offset,
                wanted,
                available,
            }
            .into());
        }
        f.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0; wanted];
        f.read_exact(&mut data)?;

        layout.decode(&data)
    }
}
