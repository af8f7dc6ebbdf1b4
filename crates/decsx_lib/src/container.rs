use std::fmt;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{DecsxError, Reader};

pub const IMAGE_MAGIC: &[u8; 18] = b"Cotopha Image file";
/// The magic is followed by reserved bytes up to this size.
pub const HEADER_LEN: usize = 0x40;
const RECORD_HEADER_LEN: usize = 12;

/// Fixed-width 8-byte Section identifier. Padding is part of the id
/// (`"global  "` and `"global"` are different Sections).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectionId(pub [u8; 8]);

impl SectionId {
    pub const IMAGE: SectionId = SectionId(*b"image   ");
    pub const FUNCTION: SectionId = SectionId(*b"function");
    pub const GLOBAL: SectionId = SectionId(*b"global  ");
    pub const CONST_STR: SectionId = SectionId(*b"conststr");
    pub const LINK_INFO: SectionId = SectionId(*b"linkinf ");

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// The id with trailing padding (spaces and NULs) removed, for display and
    /// file names.
    pub fn trimmed(&self) -> String {
        String::from_utf8_lossy(&self.0)
            .trim_end_matches([' ', '\0'])
            .to_string()
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SectionId({:?})", String::from_utf8_lossy(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    raw: Vec<u8>,
}

impl Header {
    /// Opaque bytes following the magic. Kept, never interpreted.
    pub fn reserved(&self) -> &[u8] {
        &self.raw[IMAGE_MAGIC.len()..]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    id: SectionId,
    payload: Vec<u8>,
}

impl Section {
    pub fn new(id: SectionId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    pub fn id(&self) -> SectionId {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn reader(&self) -> Reader<'_> {
        Reader::new(&self.payload)
    }
}

/// A loaded image: header plus every Section in file order.
#[derive(Debug, Clone)]
pub struct Container {
    header: Header,
    sections: Vec<Section>,
}

impl Container {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DecsxError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| DecsxError::io(path, e))?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecsxError> {
        let mut r = Reader::new(data);
        let header = read_header(&mut r)?;

        let mut sections = Vec::new();
        while !r.is_at_end() {
            sections.push(read_section(&mut r)?);
        }
        debug!("loaded {} section(s)", sections.len());

        Ok(Self { header, sections })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Every Section carrying `id`, in file order. Ids are not unique.
    pub fn sections_with_id(&self, id: SectionId) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(move |s| s.id == id)
    }

    /// The first image Section, if any.
    pub fn image(&self) -> Option<&Section> {
        let mut images = self.sections_with_id(SectionId::IMAGE);
        let first = images.next()?;
        let extra = images.count();
        if extra > 0 {
            warn!("{} image sections found, only the first is decompiled", extra + 1);
        }
        Some(first)
    }
}

fn read_header(r: &mut Reader<'_>) -> Result<Header, DecsxError> {
    if r.remaining() < HEADER_LEN {
        let data = r.data();
        if !data.starts_with(IMAGE_MAGIC) {
            let found = &data[..data.len().min(IMAGE_MAGIC.len())];
            return Err(DecsxError::BadMagic(String::from_utf8_lossy(found).into_owned()));
        }
        return Err(DecsxError::Eof {
            pos: 0,
            need: HEADER_LEN,
            remaining: r.remaining(),
        });
    }
    let raw = r.get_bytes(HEADER_LEN)?;
    if &raw[..IMAGE_MAGIC.len()] != IMAGE_MAGIC {
        return Err(DecsxError::BadMagic(
            String::from_utf8_lossy(&raw[..IMAGE_MAGIC.len()]).into_owned(),
        ));
    }
    Ok(Header { raw: raw.to_vec() })
}

fn read_section(r: &mut Reader<'_>) -> Result<Section, DecsxError> {
    let offset = r.pos();
    if r.remaining() < RECORD_HEADER_LEN {
        return Err(DecsxError::TruncatedRecord {
            offset,
            remaining: r.remaining(),
        });
    }
    let id = SectionId(r.get_array()?);
    let size = r.get_u32()?;
    if size as usize > r.remaining() {
        return Err(DecsxError::TruncatedSection {
            id: id.to_string(),
            offset,
            declared: size,
            available: r.remaining(),
        });
    }
    let payload = r.get_bytes(size as usize)?.to_vec();
    debug!("section {:?} at {}: {} bytes", id, offset, size);
    Ok(Section { id, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        let mut out = IMAGE_MAGIC.to_vec();
        out.resize(HEADER_LEN, 0);
        out
    }

    fn record(id: &[u8; 8], payload: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn loads_sections_in_file_order() {
        let mut data = header();
        data.extend(record(b"function", &[1, 2, 3, 4]));
        data.extend(record(b"conststr", &[9; 10]));

        let c = Container::from_bytes(&data).unwrap();
        let ids: Vec<_> = c.sections().iter().map(|s| (s.id(), s.payload().len())).collect();
        assert_eq!(ids, vec![(SectionId::FUNCTION, 4), (SectionId::CONST_STR, 10)]);
        assert_eq!(c.header().reserved().len(), HEADER_LEN - IMAGE_MAGIC.len());
    }

    #[test]
    fn bad_magic_is_a_format_error() {
        let mut data = b"Cotopha Image fiLe".to_vec();
        data.resize(HEADER_LEN, 0);
        data.extend(record(b"function", &[0; 4]));

        let err = Container::from_bytes(&data).unwrap_err();
        assert!(matches!(err, DecsxError::BadMagic(_)));
        assert_eq!(err.kind(), crate::ErrorKind::Format);
    }

    #[test]
    fn short_garbage_reports_bad_magic() {
        assert!(matches!(Container::from_bytes(b"PK\x03\x04"), Err(DecsxError::BadMagic(_))));
    }

    #[test]
    fn header_only_file_has_no_sections() {
        let c = Container::from_bytes(&header()).unwrap();
        assert!(c.sections().is_empty());
        assert!(c.image().is_none());
    }

    #[test]
    fn truncated_payload_fails() {
        let mut data = header();
        data.extend(record(b"image   ", &[0; 16]));
        data.truncate(data.len() - 1);
        match Container::from_bytes(&data) {
            Err(DecsxError::TruncatedSection { declared, available, offset, .. }) => {
                assert_eq!((declared, available, offset), (16, 15, HEADER_LEN));
            }
            other => panic!("expected TruncatedSection, got {other:?}"),
        }
    }

    #[test]
    fn partial_record_header_fails() {
        let mut data = header();
        data.extend(record(b"function", &[]));
        data.extend_from_slice(b"glob");
        assert!(matches!(
            Container::from_bytes(&data),
            Err(DecsxError::TruncatedRecord { remaining: 4, .. })
        ));
    }

    #[test]
    fn duplicate_ids_are_all_kept() {
        let mut data = header();
        data.extend(record(b"image   ", &[1]));
        data.extend(record(b"image   ", &[2, 2]));
        let c = Container::from_bytes(&data).unwrap();
        assert_eq!(c.sections_with_id(SectionId::IMAGE).count(), 2);
        assert_eq!(c.image().unwrap().payload(), &[1]);
    }

    #[test]
    fn trimmed_id_drops_padding() {
        assert_eq!(SectionId::GLOBAL.trimmed(), "global");
        assert_eq!(SectionId::GLOBAL.to_string(), "global  ");
    }
}
