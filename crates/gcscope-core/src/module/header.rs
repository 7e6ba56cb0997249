//! PE header probe for in-memory images.
//!
//! Module records from a dump sometimes lack the image size, and the
//! binary-store key for a prefetch needs the link timestamp and image size.
//! Both live in the image's PE header, which dumps usually capture even when
//! the rest of the image is missing.

use object::pe::{ImageDosHeader, ImageNtHeaders32, ImageNtHeaders64, IMAGE_NT_OPTIONAL_HDR64_MAGIC};
use object::read::pe::{optional_header_magic, ImageNtHeaders, ImageOptionalHeader};
use object::LittleEndian as LE;

use crate::source::MemorySource;
use crate::types::Address;

/// Bytes read from the image base when probing.
const HEADER_PROBE_SIZE: usize = 0x1000;

/// The two header fields the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader
{
    /// Link timestamp from the COFF file header
    pub time_date_stamp: u32,
    /// `SizeOfImage` from the optional header
    pub size_of_image: u32,
}

impl ImageHeader
{
    /// Read and parse the header of the image loaded at `base`.
    ///
    /// Returns `None` if the header is not captured or does not parse.
    pub fn probe(source: &dyn MemorySource, base: Address) -> Option<Self>
    {
        let mut bytes = vec![0u8; HEADER_PROBE_SIZE];
        let read = source.read_bytes(base, &mut bytes);
        bytes.truncate(read);
        Self::parse(&bytes)
    }

    /// Parse a PE32 or PE32+ header from the start of an image.
    pub fn parse(data: &[u8]) -> Option<Self>
    {
        if optional_header_magic(data).ok()? == IMAGE_NT_OPTIONAL_HDR64_MAGIC {
            Self::parse_nt::<ImageNtHeaders64>(data)
        } else {
            Self::parse_nt::<ImageNtHeaders32>(data)
        }
    }

    fn parse_nt<Pe: ImageNtHeaders>(data: &[u8]) -> Option<Self>
    {
        let dos_header = ImageDosHeader::parse(data).ok()?;
        let mut offset = u64::from(dos_header.nt_headers_offset());
        let (nt_headers, _) = Pe::parse(data, &mut offset).ok()?;
        Some(Self {
            time_date_stamp: nt_headers.file_header().time_date_stamp.get(LE),
            size_of_image: nt_headers.optional_header().size_of_image(),
        })
    }
}
