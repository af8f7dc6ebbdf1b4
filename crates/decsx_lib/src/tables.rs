use std::collections::BTreeMap;
use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{Container, DecsxError, Reader, SectionId};

/// Size of the unidentified block that follows a nonzero parent length.
const PARENT_BLOCK_LEN: usize = 112;

/// A typed view decoded from every Section with a given id.
pub trait SectionTable: Default {
    const ID: SectionId;

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecsxError>;

    /// Folds the result of a later Section with the same id into `self`.
    fn merge(&mut self, later: Self);
}

#[derive(Debug)]
pub struct Decoded<T> {
    pub table: T,
    /// One entry per Section that failed; its partial contents are dropped.
    pub failures: Vec<DecsxError>,
}

/// Decodes every Section matching `T::ID`. A failing Section is reported and
/// skipped, the remaining ones are still decoded.
pub fn decode_table<T: SectionTable>(container: &Container) -> Decoded<T> {
    let mut table = T::default();
    let mut failures = Vec::new();

    for section in container.sections_with_id(T::ID) {
        let mut r = section.reader();
        match T::decode(&mut r) {
            Ok(t) => {
                if !r.is_at_end() {
                    debug!("section {:?}: {} trailing byte(s) ignored", T::ID, r.remaining());
                }
                table.merge(t);
            }
            Err(e) => {
                warn!("section {:?} skipped: {}", T::ID, e);
                failures.push(DecsxError::Section {
                    id: T::ID.to_string(),
                    source: Box::new(e),
                });
            }
        }
    }

    Decoded { table, failures }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionTable {
    pub init_offsets: Vec<u32>,
    pub named_offsets: Vec<(u32, String)>,
}

impl FunctionTable {
    /// Name of the first named entry at `offset`.
    pub fn name_of(&self, offset: u32) -> Option<&str> {
        self.named_offsets
            .iter()
            .find(|(o, _)| *o == offset)
            .map(|(_, name)| name.as_str())
    }

    /// Init functions first, then named ones, both in table order. Duplicates
    /// are kept.
    pub fn dispatch_offsets(&self) -> Vec<u32> {
        self.init_offsets
            .iter()
            .copied()
            .chain(self.named_offsets.iter().map(|(o, _)| *o))
            .collect()
    }
}

impl SectionTable for FunctionTable {
    const ID: SectionId = SectionId::FUNCTION;

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecsxError> {
        let init_offsets = r.get_u32_list()?;

        let unused = r.get_u32()?;
        debug!("function table: unused field = {unused}");

        let count = r.get_u32()?;
        let mut named_offsets = Vec::new();
        for _ in 0..count {
            let offset = r.get_u32()?;
            let name = r.get_utf16_string()?;
            named_offsets.push((offset, name));
        }

        Ok(Self { init_offsets, named_offsets })
    }

    fn merge(&mut self, later: Self) {
        self.init_offsets.extend(later.init_offsets);
        self.named_offsets.extend(later.named_offsets);
    }
}

impl fmt::Display for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Initialization functions:")?;
        for offset in &self.init_offsets {
            writeln!(f, "\t0x{offset:X}")?;
        }
        writeln!(f, "All functions:")?;
        for (idx, (offset, name)) in self.named_offsets.iter().enumerate() {
            writeln!(f, "\t({idx:4x}) 0x{offset:X}:\t{name}")?;
        }
        Ok(())
    }
}

/// Reads `count` entries of `(string, offset_count, offsets...)` into `map`.
/// Later writes to the same offset win.
fn read_string_refs(r: &mut Reader<'_>, map: &mut BTreeMap<u32, String>) -> Result<(), DecsxError> {
    let count = r.get_u32()?;
    for _ in 0..count {
        let s = r.get_utf16_string()?;
        for offset in r.get_u32_list()? {
            map.insert(offset, s.clone());
        }
    }
    Ok(())
}

/// Image offsets of string literal uses, mapped to the literal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstStringTable {
    pub strings: BTreeMap<u32, String>,
}

impl ConstStringTable {
    pub fn get(&self, offset: u32) -> Option<&str> {
        self.strings.get(&offset).map(String::as_str)
    }
}

impl SectionTable for ConstStringTable {
    const ID: SectionId = SectionId::CONST_STR;

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecsxError> {
        let mut strings = BTreeMap::new();
        read_string_refs(r, &mut strings)?;
        Ok(Self { strings })
    }

    fn merge(&mut self, later: Self) {
        self.strings.extend(later.strings);
    }
}

impl fmt::Display for ConstStringTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "conststr section:")?;
        for (offset, s) in &self.strings {
            writeln!(f, "\t{offset:X}: {s}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalType {
    /// Tag 0: user type, named by `declared_type_name`.
    Custom,
    Reference,
    Parent,
    Unknown,
    Integer,
    Real,
    String,
    /// Any tag outside 0..=6. Decoded like `Custom`, without the name.
    Other(u32),
}

impl GlobalType {
    pub fn from_tag(tag: u32) -> Self {
        match tag {
            0 => GlobalType::Custom,
            1 => GlobalType::Reference,
            2 => GlobalType::Parent,
            3 => GlobalType::Unknown,
            4 => GlobalType::Integer,
            5 => GlobalType::Real,
            6 => GlobalType::String,
            other => GlobalType::Other(other),
        }
    }

    pub fn tag(self) -> u32 {
        match self {
            GlobalType::Custom => 0,
            GlobalType::Reference => 1,
            GlobalType::Parent => 2,
            GlobalType::Unknown => 3,
            GlobalType::Integer => 4,
            GlobalType::Real => 5,
            GlobalType::String => 6,
            GlobalType::Other(tag) => tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub name: String,
    pub type_tag: GlobalType,
    pub declared_type_name: Option<String>,
    /// Raw initializer word. For `Real` this is the unconverted bit pattern,
    /// for `Parent` the length field, for `String` an unidentified word.
    pub init_value: Option<u32>,
}

impl GlobalVariable {
    pub fn type_name(&self) -> String {
        match self.type_tag {
            GlobalType::Custom => self.declared_type_name.clone().unwrap_or_default(),
            GlobalType::Reference => "Reference".into(),
            GlobalType::Parent => "parent".into(),
            GlobalType::Unknown => "unknown_type".into(),
            GlobalType::Integer => "Integer".into(),
            GlobalType::Real => "Real".into(),
            GlobalType::String => "String".into(),
            GlobalType::Other(tag) => format!("type_{tag}"),
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, DecsxError> {
        let name = r.get_utf16_string()?;
        let type_tag = GlobalType::from_tag(r.get_u32()?);
        let declared_type_name = match type_tag {
            GlobalType::Custom => Some(r.get_utf16_string()?),
            _ => None,
        };

        let init_value = match type_tag {
            GlobalType::Parent => {
                let len = r.get_u32()?;
                if len != 0 {
                    warn!("global `{name}`: parent length {len} is nonzero, skipping {PARENT_BLOCK_LEN} bytes");
                    r.skip(PARENT_BLOCK_LEN)?;
                }
                Some(len)
            }
            GlobalType::Integer | GlobalType::Real => Some(r.get_u32()?),
            GlobalType::String => {
                let v = r.get_u32()?;
                if v != 0 {
                    warn!("global `{name}`: string initializer word is {v:#x}, expected 0");
                }
                Some(v)
            }
            GlobalType::Other(tag) => {
                warn!("global `{name}`: unrecognized type tag {tag}");
                None
            }
            GlobalType::Custom | GlobalType::Reference | GlobalType::Unknown => None,
        };

        Ok(Self {
            name,
            type_tag,
            declared_type_name,
            init_value,
        })
    }
}

impl fmt::Display for GlobalVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.type_name(), self.name)?;
        match (self.type_tag, self.init_value) {
            (GlobalType::Integer, Some(v)) => write!(f, "\n\t\tInitialization value: {}", v as i32),
            (GlobalType::Real, Some(v)) => {
                write!(f, "\n\t\tInitialization value: {:.6} (raw {v:#010x})", f32::from_bits(v))
            }
            (GlobalType::Parent, Some(v)) => write!(f, "\n\t\tUnknown PARENT field: {v}"),
            (GlobalType::String, Some(v)) => write!(f, "\n\t\tUnknown STRING field: {v}"),
            _ => Ok(()),
        }
    }
}

/// Global declarations in slot order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalTable {
    pub globals: Vec<GlobalVariable>,
}

impl SectionTable for GlobalTable {
    const ID: SectionId = SectionId::GLOBAL;

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecsxError> {
        let count = r.get_u32()?;
        let mut globals = Vec::new();
        for _ in 0..count {
            globals.push(GlobalVariable::read(r)?);
        }
        Ok(Self { globals })
    }

    fn merge(&mut self, later: Self) {
        self.globals.extend(later.globals);
    }
}

impl fmt::Display for GlobalTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "global section:")?;
        for g in &self.globals {
            writeln!(f, "\t{g}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfoTable {
    pub targets: Vec<u32>,
    pub symbols: BTreeMap<u32, String>,
}

impl SectionTable for LinkInfoTable {
    const ID: SectionId = SectionId::LINK_INFO;

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecsxError> {
        let targets = r.get_u32_list()?;

        let skipped = r.get_u32_list()?;
        if !skipped.is_empty() {
            warn!("link info: {} entries in a list expected to be empty, ignored", skipped.len());
        }

        let mut symbols = BTreeMap::new();
        read_string_refs(r, &mut symbols)?;
        Ok(Self { targets, symbols })
    }

    fn merge(&mut self, later: Self) {
        self.targets.extend(later.targets);
        self.symbols.extend(later.symbols);
    }
}

impl fmt::Display for LinkInfoTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "linkinf section:")?;
        for offset in &self.targets {
            writeln!(f, "\ttarget 0x{offset:X}")?;
        }
        for (offset, s) in &self.symbols {
            writeln!(f, "\t{offset:X}: {s}")?;
        }
        Ok(())
    }
}

/// All four tables decoded from one container.
#[derive(Debug, Default)]
pub struct ImageMetadata {
    pub functions: FunctionTable,
    pub strings: ConstStringTable,
    pub globals: GlobalTable,
    pub links: LinkInfoTable,
    pub failures: Vec<DecsxError>,
}

impl ImageMetadata {
    pub fn decode(container: &Container) -> Self {
        let mut failures = Vec::new();
        let mut take = |d: &mut Vec<DecsxError>| failures.append(d);

        let mut functions = decode_table::<FunctionTable>(container);
        take(&mut functions.failures);
        let mut strings = decode_table::<ConstStringTable>(container);
        take(&mut strings.failures);
        let mut links = decode_table::<LinkInfoTable>(container);
        take(&mut links.failures);
        let mut globals = decode_table::<GlobalTable>(container);
        take(&mut globals.failures);

        debug!(
            "decoded {} init + {} named function(s), {} string ref(s), {} global(s), {} link target(s)",
            functions.table.init_offsets.len(),
            functions.table.named_offsets.len(),
            strings.table.strings.len(),
            globals.table.globals.len(),
            links.table.targets.len(),
        );

        Self {
            functions: functions.table,
            strings: strings.table,
            globals: globals.table,
            links: links.table,
            failures,
        }
    }
}
