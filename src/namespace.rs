//! Definition discovery: source trees and definition file names.
//!
//! A root namespace is a directory whose name is the namespace name. Every
//! definition file beneath it is named `[<port-id>.]<ShortName>.<major>.<minor>.dsdl`
//! and its nested directories form the rest of the full name.

use crate::error::{DefinitionError, Diagnostic, Locator};
use crate::types::Version;
use crate::validate::check_name_component;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFINITION_EXTENSION: &str = "dsdl";
/// Accepted for older namespaces.
pub const LEGACY_EXTENSION: &str = "uavcan";

fn is_definition_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(DEFINITION_EXTENSION) | Some(LEGACY_EXTENSION)
    )
}

/// Where definition sources come from.
pub trait SourceTree {
    /// Every definition file under `root`, sorted.
    fn list(&self, root: &Path) -> io::Result<Vec<PathBuf>>;
    fn read(&self, path: &Path) -> io::Result<String>;
}

/// Definitions on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystem;

impl FileSystem {
    fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::walk(&path, out)?;
            } else if is_definition_file(&path) {
                out.push(path);
            }
        }
        Ok(())
    }
}

impl SourceTree for FileSystem {
    fn list(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        Self::walk(root, &mut out)?;
        out.sort();
        Ok(out)
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// Definitions held in memory, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    files: BTreeMap<PathBuf, String>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, source: impl Into<String>) -> &mut Self {
        self.files.insert(path.into(), source.into());
        self
    }

    pub fn with(mut self, path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }
}

impl SourceTree for MemoryTree {
    fn list(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        Ok(self
            .files
            .keys()
            .filter(|p| p.starts_with(root) && is_definition_file(p))
            .cloned()
            .collect())
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: no such definition", path.display()),
            )
        })
    }
}

/// Identity of a definition in the table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionKey {
    pub full_name: String,
    pub version: Version,
}

impl fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.full_name, self.version)
    }
}

/// A definition file located under a root namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionFile {
    pub path: PathBuf,
    pub root: PathBuf,
    /// `root.nested.ShortName`
    pub full_name: String,
    pub version: Version,
    pub fixed_port_id: Option<u32>,
}

impl DefinitionFile {
    /// Derive name, version and fixed port ID from a path under `root`.
    pub fn from_path(root: &Path, path: &Path) -> Result<Self, DefinitionError> {
        let root_name = root
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                DefinitionError::Syntax(format!(
                    "root namespace directory {} has no usable name",
                    root.display()
                ))
            })?;
        let relative = path.strip_prefix(root).map_err(|_| {
            DefinitionError::Syntax(format!(
                "{} is not inside root namespace {}",
                path.display(),
                root.display()
            ))
        })?;

        let mut components = vec![root_name.to_string()];
        if let Some(parent) = relative.parent() {
            for component in parent.components() {
                let text = component.as_os_str().to_str().ok_or_else(|| {
                    DefinitionError::Syntax(format!("non-UTF-8 path {}", path.display()))
                })?;
                components.push(text.to_string());
            }
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DefinitionError::Syntax(format!("invalid file name {}", path.display())))?;
        let stem = file_name
            .strip_suffix(&format!(".{}", DEFINITION_EXTENSION))
            .or_else(|| file_name.strip_suffix(&format!(".{}", LEGACY_EXTENSION)))
            .ok_or_else(|| {
                DefinitionError::Syntax(format!("{} is not a definition file", file_name))
            })?;

        let parts: Vec<&str> = stem.split('.').collect();
        let (port, short_name, major, minor) = match parts.as_slice() {
            [port, name, major, minor] => (Some(*port), *name, *major, *minor),
            [name, major, minor] => (None, *name, *major, *minor),
            _ => {
                return Err(DefinitionError::Syntax(format!(
                    "invalid definition file name `{}`; expected [<port-id>.]<Name>.<major>.<minor>.{}",
                    file_name, DEFINITION_EXTENSION
                )))
            }
        };

        let fixed_port_id = port.map(parse_port_id).transpose()?;
        let version = Version::new(parse_version(major, file_name)?, parse_version(minor, file_name)?);
        if version == Version::new(0, 0) {
            return Err(DefinitionError::Syntax(format!(
                "version 0.0 is not allowed in `{}`",
                file_name
            )));
        }

        components.push(short_name.to_string());
        for component in &components {
            check_name_component(component)?;
        }

        Ok(DefinitionFile {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
            full_name: components.join("."),
            version,
            fixed_port_id,
        })
    }

    pub fn key(&self) -> DefinitionKey {
        DefinitionKey {
            full_name: self.full_name.clone(),
            version: self.version,
        }
    }

    pub fn short_name(&self) -> &str {
        self.full_name.rsplit('.').next().unwrap_or(&self.full_name)
    }

    /// Namespace the definition lives in; relative references resolve against it.
    pub fn namespace(&self) -> &str {
        self.full_name.rsplit_once('.').map(|(ns, _)| ns).unwrap_or("")
    }

    pub fn root_namespace(&self) -> &str {
        self.full_name.split('.').next().unwrap_or(&self.full_name)
    }
}

fn parse_version(text: &str, file_name: &str) -> Result<u8, DefinitionError> {
    let valid = !text.is_empty()
        && text.chars().all(|c| c.is_ascii_digit())
        && (text == "0" || !text.starts_with('0'));
    if !valid {
        return Err(DefinitionError::Syntax(format!(
            "invalid version number `{}` in `{}`",
            text, file_name
        )));
    }
    text.parse().map_err(|_| {
        DefinitionError::Syntax(format!(
            "version number {} in `{}` exceeds 255",
            text, file_name
        ))
    })
}

fn parse_port_id(text: &str) -> Result<u32, DefinitionError> {
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return Err(DefinitionError::Syntax(format!(
            "invalid fixed port ID `{}`",
            text
        )));
    }
    if text.len() > 1 && text.starts_with('0') {
        return Err(DefinitionError::PortIdRange(format!(
            "fixed port ID `{}` has leading zeros",
            text
        )));
    }
    text.parse()
        .map_err(|_| DefinitionError::PortIdRange(format!("fixed port ID `{}` is out of range", text)))
}

/// Every definition file under `root`. Files whose names do not parse are reported
/// instead of returned.
pub fn discover(tree: &dyn SourceTree, root: &Path) -> (Vec<DefinitionFile>, Vec<Diagnostic>) {
    let mut files = Vec::new();
    let mut diagnostics = Vec::new();
    let paths = match tree.list(root) {
        Ok(paths) => paths,
        Err(e) => {
            diagnostics.push(Diagnostic::error(
                Locator::file(root),
                DefinitionError::Io(e.to_string()),
            ));
            return (files, diagnostics);
        }
    };
    for path in paths {
        match DefinitionFile::from_path(root, &path) {
            Ok(file) => files.push(file),
            Err(e) => diagnostics.push(Diagnostic::error(Locator::file(&path), e)),
        }
    }
    tracing::debug!(root = %root.display(), definitions = files.len(), "discovered definitions");
    (files, diagnostics)
}
