//! Conversion of semicolon-separated, decimal-comma tables to canonical CSV.
//!
//! Only fields that are entirely a decimal-comma number (`-2,5`, `10,00`) are
//! rewritten. Everything else, including text that happens to contain a
//! comma, is copied byte for byte. Rows keep their order and field count,
//! and blank lines are kept as empty rows.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use csv::{ByteRecord, ReaderBuilder, Writer, WriterBuilder};
use regex::bytes::Regex;

use crate::error::AppError;

static DECIMAL_COMMA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?\d+,\d+$").expect("decimal-comma pattern is valid")
});

/// Rewrites a single field; returns `None` when it is not a decimal-comma number.
fn rewrite_field(field: &[u8]) -> Option<Vec<u8>> {
    if !DECIMAL_COMMA.is_match(field) {
        return None;
    }
    Some(
        field
            .iter()
            .map(|&b| if b == b',' { b'.' } else { b })
            .collect(),
    )
}

/// Streams `input` to `output`, converting every row.
///
/// Input is split into lines first so that blank lines survive; a quoted
/// field spanning several lines is collected before it is parsed.
///
/// Returns the number of rows written, blank ones included.
pub fn convert<R: Read, W: Write>(input: R, output: W) -> Result<u64, AppError> {
    let mut parser = ReaderBuilder::new();
    parser.delimiter(b';').has_headers(false).flexible(true);
    let mut builder = WriterBuilder::new();
    builder.delimiter(b',').flexible(true);
    let mut writer = builder.from_writer(output);

    let mut input = BufReader::new(input);
    let mut line = Vec::new();
    let mut pending = Vec::new();
    let mut rows = 0;

    loop {
        line.clear();
        if input.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if pending.is_empty() && is_blank(&line) {
            writer.flush()?;
            let mut inner = writer.into_inner().map_err(|e| e.into_error())?;
            inner.write_all(b"\n")?;
            writer = builder.from_writer(inner);
            rows += 1;
            continue;
        }
        pending.extend_from_slice(&line);
        if quotes_balanced(&pending) {
            rows += write_records(&parser, &pending, &mut writer)?;
            pending.clear();
        }
    }
    if !pending.is_empty() {
        rows += write_records(&parser, &pending, &mut writer)?;
    }

    writer.flush()?;
    Ok(rows)
}

fn is_blank(line: &[u8]) -> bool {
    line == b"\n" || line == b"\r\n"
}

/// An odd number of quotes means a quoted field continues on the next line.
fn quotes_balanced(text: &[u8]) -> bool {
    text.iter().filter(|&&b| b == b'"').count() % 2 == 0
}

/// Parses one chunk of complete lines and writes its converted records.
fn write_records<W: Write>(
    parser: &ReaderBuilder,
    chunk: &[u8],
    writer: &mut Writer<W>,
) -> Result<u64, AppError> {
    let mut reader = parser.from_reader(chunk);
    let mut record = ByteRecord::new();
    let mut converted = ByteRecord::new();
    let mut rows = 0;

    while reader.read_byte_record(&mut record)? {
        converted.clear();
        for field in record.iter() {
            match rewrite_field(field) {
                Some(rewritten) => converted.push_field(&rewritten),
                None => converted.push_field(field),
            }
        }
        writer.write_byte_record(&converted)?;
        rows += 1;
    }
    Ok(rows)
}

/// Path of the converted sibling of a scratch file.
pub fn converted_path(input: &Path) -> PathBuf {
    let mut name = input
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".csv");
    input.with_file_name(name)
}

/// Converts the file at `input` into a new sibling file and returns its path.
///
/// The input file is left in place; deleting it is up to the caller.
pub fn convert_file(input: &Path) -> Result<PathBuf, AppError> {
    let output_path = converted_path(input);
    let reader = File::open(input)?;
    let writer = File::create(&output_path)?;

    if let Err(e) = convert(reader, writer) {
        let _ = std::fs::remove_file(&output_path);
        return Err(e);
    }

    tracing::debug!(input = %input.display(), output = %output_path.display(), "Converted table");
    Ok(output_path)
}
