use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::{Container, Decompiler, DecsxError};

/// Makes `s` usable as a single path component.
pub(crate) fn file_name_for(s: &str) -> String {
    let mut out: String = s
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if out.is_empty() || out.chars().all(|c| c == '.') {
        out.insert(0, '_');
    }
    out
}

/// Writes every Section's payload verbatim to `output_dir/<id>`, recognized or
/// not. A name already written gets the first free `.1`, `.2`, ... suffix, in
/// file order.
pub fn export_sections(container: &Container, output_dir: &Path) -> Result<Vec<PathBuf>, DecsxError> {
    fs::create_dir_all(output_dir).map_err(|e| DecsxError::io(output_dir, e))?;

    let mut used: HashSet<String> = HashSet::new();
    let mut written = Vec::with_capacity(container.sections().len());
    for section in container.sections() {
        let base = file_name_for(&section.id().trimmed());
        let mut name = base.clone();
        let mut k = 0;
        while used.contains(&name) {
            k += 1;
            name = format!("{base}.{k}");
        }
        used.insert(name.clone());

        let path = output_dir.join(name);
        fs::write(&path, section.payload()).map_err(|e| DecsxError::io(&path, e))?;
        debug!("wrote {} ({} bytes)", path.display(), section.payload().len());
        written.push(path);
    }
    Ok(written)
}

/// Asks `target` to materialize everything it decoded. Call after `dispatch`
/// has returned.
pub fn export_listing<D: Decompiler + ?Sized>(target: &D, output_dir: &Path) -> Result<(), DecsxError> {
    target.write_listing(output_dir)
}
