//! OLE compound file reader, the container format of legacy `.xls` workbooks.
//! The file is loaded into memory once; streams are then read by name.

use crate::error::RustyTableError;
use crate::helpers::bytes::le_u16;
use crate::helpers::bytes::le_u32;
use crate::helpers::bytes::le_u32_iter;
use crate::helpers::bytes::le_u64;
use encoding_rs::UTF_16LE;
use std::collections::HashMap;
use thiserror::Error;

const SIGNATURE: u64 = 0xE11A_B1A1_E011_CFD0;
const HEADER_SIZE: usize = 512;
const DIRECTORY_ENTRY_SIZE: usize = 128;
const MINI_SECTOR_SIZE: usize = 64;
const ROOT_ENTRY: &str = "Root Entry";
/// Highest regular sector id; larger ids mark free sectors and chain ends
const MAX_REG_SECT: u32 = 0xFFFF_FFFA;
const END_OF_CHAIN: u32 = 0xFFFF_FFFE;

/// Errors raised while reading a compound file.
#[derive(Error, Debug)]
pub enum CfbError {
    #[error("Invalid OLE signature (not an office document?)")]
    Signature,

    #[error("Invalid sector size '2 ^ {1}' for major version '{0}'")]
    SectorSize(u16, u16),

    #[error("Sector {0} lies outside the file")]
    SectorOutOfRange(u32),

    #[error("Sector chain starting at {0} never ends")]
    CyclicChain(u32),

    #[error("The file is truncated or has an invalid compound file structure")]
    Truncated,
}

/// An OLE compound file held in memory.
pub(crate) struct CompoundFile {
    streams: HashMap<String, Entry>,
    fat: Vec<u32>,
    sectors: Sectors,
    mini_fat: Vec<u32>,
    mini_sectors: Sectors,
    mini_stream_cutoff: usize,
}

impl CompoundFile {
    pub(crate) fn new(data: Vec<u8>) -> Result<Self, RustyTableError> {
        if data.len() < HEADER_SIZE {
            Err(CfbError::Truncated)?
        }
        if le_u64(&data[0..8]) != SIGNATURE {
            Err(CfbError::Signature)?
        }
        let major_version = le_u16(&data[26..28]);
        let sector_shift = le_u16(&data[30..32]);
        let sector_size = match (major_version, sector_shift) {
            (3, 9) => 512,
            // version 4 pads the header out to a whole 4096 byte sector
            (4, 12) => 4096,
            _ => Err(CfbError::SectorSize(major_version, sector_shift))?,
        };
        let directory_start = le_u32(&data[48..52]);
        let mini_stream_cutoff = le_u32(&data[56..60]) as usize;
        let mini_fat_start = le_u32(&data[60..64]);
        let difat_start = le_u32(&data[68..72]);
        let difat = le_u32_iter(&data[76..HEADER_SIZE]).collect::<Vec<_>>();

        let sectors = Sectors {
            data,
            size: sector_size,
            base: sector_size,
        };
        let fat = load_fat(&sectors, difat, difat_start)?;
        let mut streams = HashMap::new();
        for bytes in read_chain(&fat, &sectors, directory_start)?.chunks_exact(DIRECTORY_ENTRY_SIZE) {
            if let Some((name, entry)) = read_entry(bytes, major_version) {
                streams.insert(name, entry);
            }
        }
        let root = streams.get(ROOT_ENTRY).ok_or(CfbError::Truncated)?;
        let mut mini_data = read_chain(&fat, &sectors, root.start)?;
        mini_data.truncate(root.size);
        let mini_fat = le_u32_iter(&read_chain(&fat, &sectors, mini_fat_start)?).collect();

        Ok(CompoundFile {
            streams,
            fat,
            sectors,
            mini_fat,
            mini_sectors: Sectors {
                data: mini_data,
                size: MINI_SECTOR_SIZE,
                base: 0,
            },
            mini_stream_cutoff,
        })
    }

    /// Reads a whole stream, or `None` when the file has no stream of that name.
    pub(crate) fn read(&self, name: &str) -> Result<Option<Vec<u8>>, RustyTableError> {
        let Some(entry) = self.streams.get(name) else {
            return Ok(None);
        };
        let mut bytes = if entry.size < self.mini_stream_cutoff {
            read_chain(&self.mini_fat, &self.mini_sectors, entry.start)?
        } else {
            read_chain(&self.fat, &self.sectors, entry.start)?
        };
        if bytes.len() < entry.size {
            Err(CfbError::Truncated)?
        }
        bytes.truncate(entry.size);
        Ok(Some(bytes))
    }
}

/// Directory entry of a stream (or of the root storage, which owns the mini stream).
struct Entry {
    start: u32,
    size: usize,
}

/// Equally sized sectors; sector 0 starts at `base`.
struct Sectors {
    data: Vec<u8>,
    size: usize,
    base: usize,
}

impl Sectors {
    fn get(&self, index: u32) -> Result<&[u8], CfbError> {
        let source = (index as usize)
            .checked_mul(self.size)
            .and_then(|offset| offset.checked_add(self.base))
            .filter(|source| *source < self.data.len())
            .ok_or(CfbError::SectorOutOfRange(index))?;
        let target = self.data.len().min(source + self.size);
        Ok(&self.data[source..target])
    }

    fn count(&self) -> usize {
        self.data.len().saturating_sub(self.base).div_ceil(self.size)
    }
}

/// Collects the allocation table from the header's sector list and any further list sectors.
fn load_fat(sectors: &Sectors, mut difat: Vec<u32>, mut next: u32) -> Result<Vec<u32>, RustyTableError> {
    let mut visited = 0usize;
    while next <= MAX_REG_SECT {
        visited += 1;
        if visited > sectors.count() {
            Err(CfbError::CyclicChain(next))?
        }
        // the last entry of a list sector points to the next list sector
        let mut entries = le_u32_iter(sectors.get(next)?).collect::<Vec<_>>();
        next = entries.pop().unwrap_or(END_OF_CHAIN);
        difat.extend(entries);
    }

    let mut fat = Vec::new();
    for index in difat.into_iter().filter(|index| *index <= MAX_REG_SECT) {
        fat.extend(le_u32_iter(sectors.get(index)?));
    }
    Ok(fat)
}

/// Concatenates the sectors of the chain starting at `start`.
fn read_chain(fat: &[u32], sectors: &Sectors, start: u32) -> Result<Vec<u8>, RustyTableError> {
    let mut content = Vec::new();
    let mut index = start;
    // an acyclic chain visits every sector at most once
    let mut remaining = fat.len();
    while index <= MAX_REG_SECT {
        if remaining == 0 {
            Err(CfbError::CyclicChain(start))?
        }
        remaining -= 1;
        content.extend_from_slice(sectors.get(index)?);
        index = *fat.get(index as usize).ok_or(CfbError::SectorOutOfRange(index))?;
    }
    Ok(content)
}

fn read_entry(bytes: &[u8], major_version: u16) -> Option<(String, Entry)> {
    let name_size = (le_u16(&bytes[64..66]) as usize).min(64);
    // unused slots have no name and object type 0
    if name_size < 2 || bytes[66] == 0 {
        return None;
    }
    let (name, _) = UTF_16LE.decode_without_bom_handling(&bytes[..name_size]);
    let name = name.split('\0').next().unwrap_or_default().to_owned();
    let start = le_u32(&bytes[116..120]);
    let size = if major_version == 3 {
        u64::from(le_u32(&bytes[120..124]))
    } else {
        le_u64(&bytes[120..128])
    };
    Some((
        name,
        Entry {
            start,
            size: usize::try_from(size).ok()?,
        },
    ))
}
