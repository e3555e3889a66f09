/*!
 * Symbol Extractor
 *
 * Enumerates the bytecode segments of a container and extracts the external
 * symbols each segment references. A container is an APK/ZIP archive, a
 * directory of `classes*.dex` files, or a single bare DEX file.
 */

use super::dex::{DexFile, DexSymbols};
use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::limits::{DEX_NAME_PREFIX, DEX_NAME_SUFFIX, PRIMARY_DEX_NAME};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";
const DEX_MAGIC: &[u8; 4] = b"dex\n";

/// One bytecode segment inside a container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DexEntry {
    pub container: PathBuf,
    /// Segment name inside the container, e.g. `classes2.dex`
    pub segment: String,
}

impl fmt::Display for DexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.container.display(), self.segment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Archive,
    Directory,
    BareDex,
}

/// Segment index for `classes.dex` (1), `classesN.dex` (N); `None` otherwise
pub fn segment_index(name: &str) -> Option<u32> {
    let middle = name
        .strip_prefix(DEX_NAME_PREFIX)?
        .strip_suffix(DEX_NAME_SUFFIX)?;
    if middle.is_empty() {
        return Some(1);
    }
    if middle.starts_with('0') || !middle.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    middle.parse::<u32>().ok().filter(|index| *index >= 2)
}

/// Reads containers and segments; holds no state between calls
#[derive(Debug, Default, Clone, Copy)]
pub struct SymbolExtractor;

impl SymbolExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Segments of `container`, in container order
    pub fn get_segments(&self, container: &Path) -> SandboxResult<Vec<DexEntry>> {
        let names = match detect_kind(container)? {
            ContainerKind::Archive => archive_segments(container)?,
            ContainerKind::Directory => directory_segments(container)?,
            ContainerKind::BareDex => vec![PRIMARY_DEX_NAME.to_string()],
        };

        debug!(
            container = %container.display(),
            segments = names.len(),
            "Enumerated bytecode segments"
        );
        Ok(names
            .into_iter()
            .map(|segment| DexEntry {
                container: container.to_path_buf(),
                segment,
            })
            .collect())
    }

    /// Raw bytes of one segment; the container is reopened on every call
    pub fn read_segment(&self, entry: &DexEntry) -> SandboxResult<Vec<u8>> {
        match detect_kind(&entry.container)? {
            ContainerKind::Archive => {
                let file = File::open(&entry.container)?;
                let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
                let mut segment = archive.by_name(&entry.segment).map_err(|e| match e {
                    zip::result::ZipError::FileNotFound => {
                        SandboxError::NotFound(format!("segment {} not found", entry))
                    }
                    other => other.into(),
                })?;
                let mut bytes = Vec::with_capacity(segment.size() as usize);
                segment.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
            ContainerKind::Directory => {
                let path = entry.container.join(&entry.segment);
                std::fs::read(&path).map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        SandboxError::NotFound(format!("segment {} not found", entry))
                    }
                    _ => e.into(),
                })
            }
            ContainerKind::BareDex => {
                if entry.segment != PRIMARY_DEX_NAME {
                    return Err(SandboxError::NotFound(format!(
                        "segment {} not found",
                        entry
                    )));
                }
                Ok(std::fs::read(&entry.container)?)
            }
        }
    }

    /// Parse one segment and add its external symbols to `symbols`
    pub fn load_symbols(&self, entry: &DexEntry, symbols: &mut DexSymbols) -> SandboxResult<()> {
        let bytes = self.read_segment(entry)?;
        let dex = DexFile::parse(&bytes).map_err(|e| annotate(e, entry))?;
        dex.collect_external_symbols(symbols)
            .map_err(|e| annotate(e, entry))?;
        trace!(
            segment = %entry,
            methods = symbols.method_count(),
            fields = symbols.field_count(),
            "Extracted referenced symbols"
        );
        Ok(())
    }
}

fn annotate(err: SandboxError, entry: &DexEntry) -> SandboxError {
    match err {
        SandboxError::CorruptFormat(msg) => {
            SandboxError::CorruptFormat(format!("{}: {}", entry, msg))
        }
        other => other,
    }
}

fn detect_kind(container: &Path) -> SandboxResult<ContainerKind> {
    let metadata = std::fs::metadata(container).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            SandboxError::NotFound(format!("container {} does not exist", container.display()))
        }
        _ => e.into(),
    })?;
    if metadata.is_dir() {
        return Ok(ContainerKind::Directory);
    }

    let mut magic = [0u8; 4];
    let mut file = File::open(container)?;
    let read = file.read(&mut magic)?;
    match &magic[..read] {
        m if m == ZIP_MAGIC => Ok(ContainerKind::Archive),
        m if m == DEX_MAGIC => Ok(ContainerKind::BareDex),
        _ => Err(SandboxError::CorruptFormat(format!(
            "{} is neither an archive nor a DEX image",
            container.display()
        ))),
    }
}

fn archive_segments(container: &Path) -> SandboxResult<Vec<String>> {
    let file = File::open(container)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
    let mut names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        if segment_index(entry.name()).is_some() {
            names.push(entry.name().to_string());
        }
    }
    Ok(names)
}

fn directory_segments(container: &Path) -> SandboxResult<Vec<String>> {
    let mut indexed = Vec::new();
    for dir_entry in std::fs::read_dir(container)? {
        let dir_entry = dir_entry?;
        if !dir_entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = dir_entry.file_name().to_str() {
            if let Some(index) = segment_index(name) {
                indexed.push((index, name.to_string()));
            }
        }
    }
    indexed.sort_unstable();
    Ok(indexed.into_iter().map(|(_, name)| name).collect())
}
