use std::{fs::File, io::Write};

use approx::assert_abs_diff_eq;
use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use indoc::{formatdoc, indoc};
use tempfile::tempdir;

use super::*;

const LABEL: &str = indoc! {r#"
    PDS_VERSION_ID = PDS3
    /* A comment
       over two lines */
    RECORD_TYPE = FIXED_LENGTH
    RECORD_BYTES = 128
    FILE_RECORDS = 16#10#
    PRODUCT_ID = "RPWS_KEY_T2004001"
    DESCRIPTION = "A description
      over two lines."
    TARGET_NAME = {SATURN, 'SOLAR WIND'}
    START_TIME = 2004-001T00:00:00.000
    SAMPLE_FREQS = (1.5, 2.5 , -3)
    FILTER = (10 <KHZ>, 20 <KHZ>)
    ^TABLE = 3
    OBJECT = TABLE
      INTERCHANGE_FORMAT = BINARY
      GROUP = NOTES
        AUTHOR = 'X'
      END_GROUP
      OBJECT = COLUMN
        NAME = TIME
      END_OBJECT = COLUMN
    END_OBJECT
    END
"#};

#[test]
fn parse_label_values() {
    let label = label::parse(LABEL).unwrap();
    assert_eq!(label.kind, BlockKind::Root);
    assert_eq!(label.get_str("pds_version_id"), Some("PDS3"));
    assert_eq!(label.get("RECORD_BYTES").and_then(Value::as_i64), Some(128));
    assert_eq!(label.get("FILE_RECORDS").and_then(Value::as_i64), Some(16));
    assert_eq!(label.get_str("PRODUCT_ID"), Some("RPWS_KEY_T2004001"));
    assert!(label
        .get_str("DESCRIPTION")
        .unwrap()
        .ends_with("over two lines."));
    assert_eq!(
        label.get("TARGET_NAME"),
        Some(&Value::Set(vec![
            Value::Identifier("SATURN".to_string()),
            Value::Symbol("SOLAR WIND".to_string()),
        ]))
    );
    assert_eq!(
        label.get_str("START_TIME"),
        Some("2004-001T00:00:00.000")
    );

    let freqs = label.get("SAMPLE_FREQS").unwrap();
    assert_eq!(freqs.to_string(), "(1.5, 2.5, -3)");
    match label.get("FILTER") {
        Some(Value::Sequence(v)) => {
            assert_eq!(v.len(), 2);
            assert_eq!(v[1].unit(), Some("KHZ"));
            assert_abs_diff_eq!(v[1].as_f64().unwrap(), 20.0);
        }
        other => panic!("unexpected FILTER {other:?}"),
    }

    // Line numbers count the comment.
    assert_eq!(label.statements[1].key, "RECORD_TYPE");
    assert_eq!(label.statements[1].line, 4);

    let pointers = label.pointers().collect::<Vec<_>>();
    assert_eq!(pointers.len(), 1);
    assert_eq!(pointers[0].0, "TABLE");

    let table = label.find_object("table").unwrap();
    assert_eq!(table.children.len(), 2);
    assert_eq!(table.children[0].kind, BlockKind::Group);
    assert_eq!(table.children[0].get_str("AUTHOR"), Some("X"));
    assert_eq!(table.objects().count(), 1);
    assert_eq!(
        table.find_object("COLUMN").unwrap().get_str("NAME"),
        Some("TIME")
    );
}

#[test]
fn bad_labels() {
    assert!(matches!(
        label::parse("OBJECT = TABLE\nEND_OBJECT = COLUMN\nEND\n"),
        Err(LabelError::MismatchedEnd { line: 2, .. })
    ));
    assert!(matches!(
        label::parse("OBJECT = TABLE\nEND_GROUP\nEND\n"),
        Err(LabelError::MismatchedEnd { .. })
    ));
    assert!(matches!(
        label::parse("OBJECT = TABLE\n  A = 1\nEND\n"),
        Err(LabelError::MismatchedEnd { line: 3, .. })
    ));
    assert!(matches!(
        label::parse("A = 1\n"),
        Err(LabelError::MissingEnd)
    ));
    assert!(matches!(
        label::parse("A = \"open\nEND\n"),
        Err(LabelError::Unterminated { line: 1, .. })
    ));
    assert!(matches!(
        label::parse("A = (1, 2\n"),
        Err(LabelError::Unexpected { .. })
    ));
    assert!(matches!(
        label::parse("A = 1 B = = 2\nEND"),
        Err(LabelError::Unexpected { line: 1, .. })
    ));
    assert!(matches!(
        label::parse("A = 20#1#\nEND"),
        Err(LabelError::BadRadixInteger { .. })
    ));
}

#[test]
fn pointers() {
    let parse = |text: &str| {
        let label = label::parse(&format!("^TABLE = {text}\nEND")).unwrap();
        DataPointer::from_value("TABLE", label.get("^TABLE").unwrap())
    };
    assert_eq!(
        parse("12").unwrap(),
        DataPointer {
            file: None,
            location: Location::Record(12)
        }
    );
    assert_eq!(parse("601 <BYTES>").unwrap().location, Location::Byte(601));
    assert_eq!(
        parse("\"T2004001.DAT\"").unwrap(),
        DataPointer {
            file: Some("T2004001.DAT".to_string()),
            location: Location::Record(1)
        }
    );
    assert_eq!(
        parse("(\"T2004001.DAT\", 3)").unwrap().location,
        Location::Record(3)
    );
    assert_eq!(
        parse("(\"T2004001.DAT\", 1025 <BYTES>)").unwrap().location,
        Location::Byte(1025)
    );
    assert!(matches!(parse("0"), Err(Pds3Error::BadPointer { .. })));
    assert!(matches!(
        parse("12 <KHZ>"),
        Err(Pds3Error::BadPointer { .. })
    ));
}

#[test]
fn data_types() {
    assert_eq!(
        DataType::parse("MSB_INTEGER", false),
        Some(DataType::Integer {
            endian: table::Endian::Big,
            signed: true
        })
    );
    assert_eq!(
        DataType::parse("pc_real", false),
        Some(DataType::Real(table::Endian::Little))
    );
    assert_eq!(DataType::parse("INTEGER", true), Some(DataType::AsciiInteger));
    assert_eq!(DataType::parse("REAL", true), Some(DataType::AsciiReal));
    assert_eq!(DataType::parse("COMPLEX", false), None);
}

const BINARY_LABEL: &str = indoc! {r#"
    PDS_VERSION_ID = PDS3
    ^SPECTRUM_TABLE = ("spectrum.dat", 5 <BYTES>)
    OBJECT = SPECTRUM_TABLE
      INTERCHANGE_FORMAT = BINARY
      ROWS = 2
      ROW_BYTES = 14
      ROW_PREFIX_BYTES = 2
      OBJECT = COLUMN
        NAME = SWEEP
        DATA_TYPE = LSB_UNSIGNED_INTEGER
        START_BYTE = 1
        BYTES = 2
      END_OBJECT = COLUMN
      OBJECT = COLUMN
        NAME = POWER
        DATA_TYPE = PC_REAL
        START_BYTE = 3
        BYTES = 8
        ITEMS = 2
        ITEM_BYTES = 4
        UNIT = "V2/M2/HZ"
      END_OBJECT = COLUMN
      OBJECT = COLUMN
        NAME = GAIN
        DATA_TYPE = MSB_INTEGER
        START_BYTE = 11
        BYTES = 2
        SCALING_FACTOR = 0.5
        OFFSET = 1
      END_OBJECT = COLUMN
      OBJECT = COLUMN
        NAME = FLAG
        DATA_TYPE = CHARACTER
        START_BYTE = 13
        BYTES = 2
      END_OBJECT = COLUMN
    END_OBJECT = SPECTRUM_TABLE
    END
"#};

fn binary_row(sweep: u16, power: [f32; 2], gain: i16, flag: &str) -> Vec<u8> {
    let mut buf = vec![0xAA, 0xBB];
    buf.write_u16::<LittleEndian>(sweep).unwrap();
    for p in power {
        buf.write_f32::<LittleEndian>(p).unwrap();
    }
    buf.write_i16::<BigEndian>(gain).unwrap();
    buf.extend_from_slice(flag.as_bytes());
    buf
}

#[test]
fn read_detached_binary_table() {
    let dir = tempdir().unwrap();
    let label_file = dir.path().join("spectrum.lbl");
    File::create(&label_file)
        .unwrap()
        .write_all(BINARY_LABEL.as_bytes())
        .unwrap();
    // The pointer names the file in lower case.
    let mut data = File::create(dir.path().join("SPECTRUM.DAT")).unwrap();
    data.write_all(&[0; 4]).unwrap();
    data.write_all(&binary_row(7, [1.5, 2.5], -4, "OK")).unwrap();
    data.write_all(&binary_row(8, [3.5, 4.5], 10, "NO")).unwrap();
    drop(data);

    let product = Pds3Product::open(&label_file).unwrap();
    assert_eq!(product.table_names(), vec!["SPECTRUM_TABLE"]);
    let layout = product.table_layout("SPECTRUM_TABLE").unwrap();
    assert!(!layout.ascii);
    assert_eq!(layout.stride(), 16);
    assert_eq!(layout.columns.len(), 4);

    let table = product.read_table("SPECTRUM_TABLE").unwrap();
    assert_eq!(table.rows, 2);
    assert_eq!(
        table.column("SWEEP").unwrap().data,
        ColumnData::Integer(vec![7, 8])
    );
    let power = table.column("power").unwrap();
    assert_eq!(power.items, 2);
    assert_eq!(power.unit.as_deref(), Some("V2/M2/HZ"));
    assert_eq!(power.row_f64(1), Some(vec![3.5, 4.5]));
    assert_eq!(
        table.column("GAIN").unwrap().data,
        ColumnData::Real(vec![-1.0, 6.0])
    );
    assert_eq!(
        table.column("FLAG").unwrap().data,
        ColumnData::Text(vec!["OK".to_string(), "NO".to_string()])
    );
}

#[test]
fn short_data_file() {
    let dir = tempdir().unwrap();
    let label_file = dir.path().join("spectrum.lbl");
    File::create(&label_file)
        .unwrap()
        .write_all(BINARY_LABEL.as_bytes())
        .unwrap();
    let mut data = File::create(dir.path().join("spectrum.dat")).unwrap();
    data.write_all(&[0; 4]).unwrap();
    data.write_all(&binary_row(7, [1.5, 2.5], -4, "OK")).unwrap();
    drop(data);

    let product = Pds3Product::open(&label_file).unwrap();
    assert!(matches!(
        product.read_table("SPECTRUM_TABLE"),
        Err(Pds3Error::Binary(BinaryError::Truncated {
            offset: 4,
            wanted: 32,
            available: 16,
            ..
        }))
    ));
    assert!(matches!(
        product.read_table("IMAGE"),
        Err(Pds3Error::NoSuchObject { .. })
    ));
}

fn attached_label(offset: usize) -> String {
    formatdoc! {r#"
        PDS_VERSION_ID = PDS3
        ^TABLE = {:06} <BYTES>
        OBJECT = TABLE
          INTERCHANGE_FORMAT = ASCII
          ROWS = 2
          ROW_BYTES = 31
          OBJECT = COLUMN
            NAME = TIME
            DATA_TYPE = TIME
            START_BYTE = 1
            BYTES = 17
          END_OBJECT = COLUMN
          OBJECT = COLUMN
            NAME = COUNT
            DATA_TYPE = ASCII_INTEGER
            START_BYTE = 19
            BYTES = 2
          END_OBJECT = COLUMN
          OBJECT = COLUMN
            NAME = FLUX
            DATA_TYPE = ASCII_REAL
            START_BYTE = 22
            BYTES = 8
          END_OBJECT = COLUMN
        END_OBJECT = TABLE
        END
    "#, offset}
}

#[test]
fn read_attached_ascii_table() {
    let label_len = attached_label(0).len();
    let mut contents = attached_label(label_len + 1);
    contents.push_str(&format!("{:17} {:2} {:8}\r\n", "2004-001T00:00:00", 12, "1.50E+00"));
    contents.push_str(&format!("{:17} {:2} {:8}\r\n", "2004-001T00:01:00", 3, "2.5D-01"));

    let dir = tempdir().unwrap();
    let file = dir.path().join("T2004001.TAB");
    File::create(&file)
        .unwrap()
        .write_all(contents.as_bytes())
        .unwrap();

    let product = Pds3Product::open(&file).unwrap();
    let (data_file, offset) = product.locate("TABLE").unwrap();
    assert_eq!(data_file, file);
    assert_eq!(offset, label_len as u64);

    let table = product.read_table("TABLE").unwrap();
    assert_eq!(
        table.column("TIME").unwrap().data,
        ColumnData::Text(vec![
            "2004-001T00:00:00".to_string(),
            "2004-001T00:01:00".to_string()
        ])
    );
    assert_eq!(
        table.column("COUNT").unwrap().data,
        ColumnData::Integer(vec![12, 3])
    );
    let flux = table.column("FLUX").unwrap().data.to_f64().unwrap();
    assert_abs_diff_eq!(flux[0], 1.5);
    assert_abs_diff_eq!(flux[1], 0.25);
}

#[test]
fn column_must_fit_in_row() {
    let label = label::parse(indoc! {"
        OBJECT = TABLE
          INTERCHANGE_FORMAT = BINARY
          ROWS = 1
          ROW_BYTES = 4
          OBJECT = COLUMN
            NAME = X
            DATA_TYPE = MSB_INTEGER
            START_BYTE = 3
            BYTES = 4
          END_OBJECT
        END_OBJECT
        END
    "})
    .unwrap();
    let table = label.find_object("TABLE").unwrap();
    assert!(matches!(
        TableLayout::from_object(table),
        Err(Pds3Error::ColumnOutOfRow {
            end: 6,
            row_bytes: 4,
            ..
        })
    ));
}

#[test]
fn oversized_layout_numbers() {
    let layout = |rows: &str, items: &str| {
        let label = label::parse(&formatdoc! {"
            OBJECT = TABLE
              INTERCHANGE_FORMAT = BINARY
              ROWS = {rows}
              ROW_BYTES = 4
              OBJECT = COLUMN
                NAME = X
                DATA_TYPE = MSB_INTEGER
                START_BYTE = 1
                BYTES = 4
                ITEMS = {items}
                ITEM_BYTES = 4
              END_OBJECT
            END_OBJECT
            END
        "})
        .unwrap();
        TableLayout::from_object(label.find_object("TABLE").unwrap())
    };

    assert!(layout("1", "1").is_ok());
    assert!(matches!(
        layout("1", "9223372036854775807"),
        Err(Pds3Error::BadKeyword {
            keyword: "ITEMS",
            ..
        })
    ));
    assert!(matches!(
        layout("9223372036854775807", "1"),
        Err(Pds3Error::BadKeyword { keyword: "ROWS", .. })
    ));
}

#[test]
fn oversized_record_pointer() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("spectrum.lbl");
    File::create(&file)
        .unwrap()
        .write_all(
            indoc! {"
                PDS_VERSION_ID = PDS3
                RECORD_BYTES = 4
                ^TABLE = 9223372036854775807
                ^IMAGE = 2
                END
            "}
            .as_bytes(),
        )
        .unwrap();

    let product = Pds3Product::open(&file).unwrap();
    assert!(matches!(
        product.locate("TABLE"),
        Err(Pds3Error::BadPointer { .. })
    ));
    assert_eq!(product.locate("IMAGE").unwrap().1, 4);
}
