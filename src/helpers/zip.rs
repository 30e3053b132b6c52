//! ZIP archive helpers for Office Open XML workbooks.
//! Reading looks parts up case-insensitively; writing streams an XML part
//! straight into a new archive entry.

use crate::error::RustyTableError;
use crate::helpers::xml::XmlReader;
use quick_xml::Writer;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use std::io::Write;
use zip::read::ZipFile;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;
use zip::ZipArchive;
use zip::ZipWriter;

/// Helper trait for locating parts inside a workbook archive
pub(crate) trait ZipHelper<RS: Read + Seek> {
    /// Gets a file from the ZIP archive by name (case-insensitive, path separator agnostic)
    fn file(&'_ mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, RustyTableError>;

    /// Creates an XML reader for a file within the ZIP archive
    fn xml_reader(
        &'_ mut self,
        name: &str,
    ) -> Result<Option<XmlReader<BufReader<ZipFile<'_, RS>>>>, RustyTableError>;
}

impl<RS: Read + Seek> ZipHelper<RS> for ZipArchive<RS> {
    fn file(&'_ mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, RustyTableError> {
        let pattern = name.replace('\\', "/");
        let path = self
            .file_names()
            .find(|file_name| pattern.eq_ignore_ascii_case(file_name))
            .map(|file_name| file_name.to_owned());
        match path.map(|file_name| self.by_name(&file_name)).transpose() {
            Ok(Some(file)) => Ok(Some(file)),
            Ok(None) | Err(ZipError::FileNotFound) => Ok(None),
            Err(error) => Err(error)?,
        }
    }

    fn xml_reader(
        &'_ mut self,
        name: &str,
    ) -> Result<Option<XmlReader<BufReader<ZipFile<'_, RS>>>>, RustyTableError> {
        let reader = self
            .file(name)?
            .map(|file| XmlReader::new(BufReader::new(file)));
        Ok(reader)
    }
}

/// Helper trait for producing workbook parts
pub(crate) trait ZipWriterHelper: Write + Sized {
    /// Starts a deflated entry and lets `body` write its XML content
    fn xml_part<F>(&mut self, name: &str, body: F) -> Result<(), RustyTableError>
    where
        F: FnOnce(&mut Writer<&mut Self>) -> Result<(), RustyTableError>;
}

impl<W: Write + Seek> ZipWriterHelper for ZipWriter<W> {
    fn xml_part<F>(&mut self, name: &str, body: F) -> Result<(), RustyTableError>
    where
        F: FnOnce(&mut Writer<&mut Self>) -> Result<(), RustyTableError>,
    {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        self.start_file(name, options)?;
        let mut writer = Writer::new(self);
        body(&mut writer)
    }
}
