use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::export::file_name_for;
use crate::{DecsxError, ImageMetadata, ListingLayout, Reader};

const BYTES_PER_ROW: usize = 16;

/// Target of the dispatcher: decodes one function per call and accumulates the
/// results until `write_listing`.
///
/// `decompile_function` is called from several threads at once, so
/// implementations synchronise their own state.
pub trait Decompiler: Sync {
    /// `image` is positioned at `offset` inside the image Section.
    fn decompile_function(&self, image: &mut Reader<'_>, offset: u32) -> Result<(), DecsxError>;

    fn write_listing(&self, output_dir: &Path) -> Result<(), DecsxError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionListing {
    pub offset: u32,
    pub name: Option<String>,
    pub len: usize,
    pub text: String,
}

impl FunctionListing {
    fn file_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{:08x}_{}.txt", self.offset, file_name_for(name)),
            None => format!("{:08x}.txt", self.offset),
        }
    }
}

#[derive(Debug, Clone)]
enum Annotation {
    Str(String),
    Link(String),
}

/// Hex listing of each function's byte span, annotated with the string
/// literals and link symbols referenced inside it.
///
/// A function spans from its offset to the next known function start, or to
/// the end of the image.
#[derive(Debug)]
pub struct ImageListing {
    layout: ListingLayout,
    names: BTreeMap<u32, String>,
    starts: Vec<u32>,
    annotations: BTreeMap<u32, Vec<Annotation>>,
    listings: Mutex<BTreeMap<u32, FunctionListing>>,
}

impl ImageListing {
    pub fn new(metadata: &ImageMetadata, layout: ListingLayout) -> Self {
        let functions = &metadata.functions;

        let mut names = BTreeMap::new();
        for (offset, name) in &functions.named_offsets {
            names.entry(*offset).or_insert_with(|| name.clone());
        }

        let mut starts = functions.dispatch_offsets();
        starts.sort_unstable();
        starts.dedup();

        let mut annotations: BTreeMap<u32, Vec<Annotation>> = BTreeMap::new();
        for (offset, s) in &metadata.strings.strings {
            annotations.entry(*offset).or_default().push(Annotation::Str(s.clone()));
        }
        for (offset, s) in &metadata.links.symbols {
            annotations.entry(*offset).or_default().push(Annotation::Link(s.clone()));
        }

        Self {
            layout,
            names,
            starts,
            annotations,
            listings: Mutex::new(BTreeMap::new()),
        }
    }

    fn span_end(&self, offset: u32, image_len: usize) -> usize {
        let idx = self.starts.partition_point(|&s| s <= offset);
        match self.starts.get(idx) {
            Some(&next) => (next as usize).min(image_len),
            None => image_len,
        }
    }

    fn render(&self, offset: u32, bytes: &[u8]) -> String {
        let mut out = String::new();
        let name = self.names.get(&offset).map(String::as_str).unwrap_or("<init>");
        out.push_str(&format!("function {name} @ 0x{offset:08x} ({} bytes)\n", bytes.len()));

        for (row, chunk) in bytes.chunks(BYTES_PER_ROW).enumerate() {
            let start = offset as usize + row * BYTES_PER_ROW;
            out.push_str(&format!("{start:08x} "));
            for b in chunk {
                out.push_str(&format!(" {b:02x}"));
            }
            out.push('\n');

            let end = start + chunk.len();
            let Ok(lo) = u32::try_from(start) else { continue };
            let hi = u32::try_from(end).unwrap_or(u32::MAX);
            for (at, notes) in self.annotations.range(lo..hi) {
                for note in notes {
                    match note {
                        Annotation::Str(s) => {
                            out.push_str(&format!("          ; {at:08x} string {s:?}\n"));
                        }
                        Annotation::Link(s) => {
                            out.push_str(&format!("          ; {at:08x} link {s}\n"));
                        }
                    }
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.listings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.lock().is_empty()
    }

    pub fn listing(&self, offset: u32) -> Option<FunctionListing> {
        self.listings.lock().get(&offset).cloned()
    }

    /// All listings, ordered by offset.
    pub fn listings(&self) -> Vec<FunctionListing> {
        self.listings.lock().values().cloned().collect()
    }
}

impl Decompiler for ImageListing {
    fn decompile_function(&self, image: &mut Reader<'_>, offset: u32) -> Result<(), DecsxError> {
        let end = self.span_end(offset, image.data().len());
        let len = end.saturating_sub(image.pos());
        let bytes = image.get_bytes(len)?;
        let text = self.render(offset, bytes);

        let listing = FunctionListing {
            offset,
            name: self.names.get(&offset).cloned(),
            len,
            text,
        };
        // duplicate offsets render identically; keep the first
        self.listings.lock().entry(offset).or_insert(listing);
        debug!("function 0x{offset:x}: {len} bytes");
        Ok(())
    }

    fn write_listing(&self, output_dir: &Path) -> Result<(), DecsxError> {
        let listings = self.listings();
        match self.layout {
            ListingLayout::PerFunction => {
                let dir = output_dir.join("listing");
                fs::create_dir_all(&dir).map_err(|e| DecsxError::io(&dir, e))?;
                for l in &listings {
                    let path = dir.join(l.file_name());
                    fs::write(&path, &l.text).map_err(|e| DecsxError::io(&path, e))?;
                }
            }
            ListingLayout::Single => {
                fs::create_dir_all(output_dir).map_err(|e| DecsxError::io(output_dir, e))?;
                let text = listings.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n");
                let path = output_dir.join("listing.txt");
                fs::write(&path, text).map_err(|e| DecsxError::io(&path, e))?;
            }
        }
        Ok(())
    }
}
