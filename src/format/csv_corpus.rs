//! CSV corpus encoding

use std::io::Write;

use crate::CorpusError;
use super::hex_bytes;

/// CSV writer with a `hex,text` header row pending.
pub(super) fn writer<W: Write>(out: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().has_headers(true).from_writer(out)
}

/// Write and flush one record.
pub(super) fn write_record<W: Write>(
    out: &mut csv::Writer<W>,
    binary: &[u8],
    text: &str,
) -> Result<(), CorpusError> {
    out.serialize(Record {
        hex: hex_bytes(binary),
        text,
    })?;
    out.flush()?;
    Ok(())
}

#[derive(serde::Serialize)]
struct Record<'a> {
    hex: String,
    text: &'a str,
}
