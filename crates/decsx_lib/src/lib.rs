use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod container;
pub mod dispatch;
pub mod export;
pub mod listing;
pub mod reader;
pub mod tables;

pub use container::{Container, Header, Section, SectionId};
pub use dispatch::{DispatchProgress, DispatchReport, TaskFailure, dispatch};
pub use export::{export_listing, export_sections};
pub use listing::{Decompiler, FunctionListing, ImageListing};
pub use reader::Reader;
pub use tables::{
    ConstStringTable, Decoded, FunctionTable, GlobalTable, GlobalType, GlobalVariable, ImageMetadata, LinkInfoTable,
    SectionTable, decode_table,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingLayout {
    /// One file per function under `listing/`.
    PerFunction,
    /// Everything in a single `listing.txt`.
    Single,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Upper bound on concurrently running decompile tasks.
    pub jobs: usize,
    pub layout: ListingLayout,
    pub export_sections: bool,
    /// Turn isolated per-function failures into an error once output is written.
    pub strict: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            jobs: 3,
            layout: ListingLayout::PerFunction,
            export_sections: true,
            strict: false,
        }
    }
}

impl ExportOptions {
    pub fn concurrency(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.jobs).unwrap_or(NonZeroUsize::MIN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Format,
    Decompile,
}

#[derive(Debug, Error)]
pub enum DecsxError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("bad image magic: expected \"Cotopha Image file\", found {0:?}")]
    BadMagic(String),

    #[error("unexpected end of input at {pos} (need {need}, remaining {remaining})")]
    Eof { pos: usize, need: usize, remaining: usize },

    #[error("invalid element count {count} at {pos} (remaining {remaining} bytes)")]
    InvalidLength { pos: usize, count: u32, remaining: usize },

    #[error("truncated section record at {offset} ({remaining} bytes left)")]
    TruncatedRecord { offset: usize, remaining: usize },

    #[error("section `{id}` at {offset} declares {declared} bytes but only {available} remain")]
    TruncatedSection {
        id: String,
        offset: usize,
        declared: u32,
        available: usize,
    },

    #[error("offset 0x{offset:x} outside image of {len} bytes")]
    OffsetOutOfRange { offset: usize, len: usize },

    #[error("section `{id}`: {source}")]
    Section {
        id: String,
        #[source]
        source: Box<DecsxError>,
    },

    #[error("{0} function(s) failed to decompile")]
    DecompileFailures(usize),
}

impl DecsxError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DecsxError::Io { path: path.into(), source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DecsxError::Io { .. } => ErrorKind::Io,
            DecsxError::DecompileFailures(_) => ErrorKind::Decompile,
            DecsxError::Section { source, .. } => source.kind(),
            _ => ErrorKind::Format,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    pub sections_written: Vec<PathBuf>,
    /// `None` when the container has no image section.
    pub dispatch: Option<DispatchReport>,
}

/// Writes sections and function listings for an already loaded container.
///
/// Per-function decompile failures are isolated: they are logged, counted in
/// the returned report, and only surface as an error when `options.strict` is
/// set (after every file has been written).
pub fn export_container(
    container: &Container,
    metadata: &ImageMetadata,
    output_dir: &Path,
    options: &ExportOptions,
    on_launch: impl FnMut(DispatchProgress),
) -> Result<ExportSummary, DecsxError> {
    std::fs::create_dir_all(output_dir).map_err(|e| DecsxError::io(output_dir, e))?;

    let mut summary = ExportSummary::default();
    if options.export_sections {
        summary.sections_written = export_sections(container, output_dir)?;
        info!("wrote {} section(s) to {}", summary.sections_written.len(), output_dir.display());
    }

    let Some(image) = container.image() else {
        warn!("no image section, skipping decompilation");
        return Ok(summary);
    };

    let target = ImageListing::new(metadata, options.layout);
    let offsets = metadata.functions.dispatch_offsets();
    info!("decompiling {} function(s) with {} job(s)", offsets.len(), options.concurrency());
    let report = dispatch(image.payload(), &offsets, &target, options.concurrency(), on_launch);
    export_listing(&target, output_dir)?;

    let failed = report.failures.len();
    summary.dispatch = Some(report);
    if options.strict && failed > 0 {
        return Err(DecsxError::DecompileFailures(failed));
    }
    Ok(summary)
}

pub fn export_image_with_options(
    input: &Path,
    output_dir: &Path,
    options: &ExportOptions,
    on_launch: impl FnMut(DispatchProgress),
) -> Result<ExportSummary, DecsxError> {
    let container = Container::open(input)?;
    let metadata = ImageMetadata::decode(&container);
    export_container(&container, &metadata, output_dir, options, on_launch)
}

pub fn export_image(input: &Path, output_dir: &Path) -> Result<ExportSummary, DecsxError> {
    export_image_with_options(input, output_dir, &ExportOptions::default(), |_| {})
}
