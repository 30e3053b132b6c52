use crate::database::record::Payload;
use crate::error::RustyTableError;
use crate::export::cell_text;
use csv::WriterBuilder;
use std::io::Write;

/// Writes the header then one line per payload; missing keys are blank.
pub(crate) fn write<W: Write>(header: &[String], payloads: &[Payload], writer: W) -> Result<(), RustyTableError> {
    let mut writer = WriterBuilder::new().from_writer(writer);
    writer.write_record(header)?;
    for payload in payloads {
        writer.write_record(
            header
                .iter()
                .map(|column| payload.get(column).map(cell_text).unwrap_or_default()),
        )?;
    }
    writer.flush()?;
    Ok(())
}
