//! Compilation session: definition table, composite arena and demand-driven builds.
//!
//! A definition is built the first time something asks for it. While it is being
//! built its key is marked pending, so a request that comes back to it is a cycle.
//! Published definitions stay in the table for the life of the session; failures
//! are remembered separately and never enter the table.

use crate::ast::TypeName;
use crate::builder::{build_definition, Built, Resolver};
use crate::error::{DefinitionError, Diagnostic, Locator};
use crate::namespace::{discover, DefinitionFile, DefinitionKey, SourceTree};
use crate::options::Options;
use crate::parser::parse;
use crate::types::{
    CompositeId, CompositeRef, CompositeTable, CompositeType, Definition, ServiceType, Version,
};
use crate::validate::{check_fixed_port_id, validate_composite};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
enum Entry {
    Pending,
    Published(Definition),
}

/// Result of [`Session::build_all`].
#[derive(Debug, Clone)]
pub struct Report {
    /// Target-root definitions that were published, sorted by key.
    pub published: Vec<DefinitionKey>,
    /// Every diagnostic of the session so far.
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

pub struct Session<T: SourceTree> {
    tree: T,
    options: Options,
    roots: Vec<PathBuf>,
    target_keys: BTreeSet<DefinitionKey>,
    files: BTreeMap<DefinitionKey, DefinitionFile>,
    /// Keys provided by more than one file, with every providing file.
    ambiguous: BTreeMap<DefinitionKey, Vec<DefinitionFile>>,
    versions: BTreeMap<String, BTreeSet<Version>>,
    table: BTreeMap<DefinitionKey, Entry>,
    failed: BTreeMap<DefinitionKey, DefinitionError>,
    arena: Vec<CompositeType>,
    stack: Vec<DefinitionKey>,
    diagnostics: Vec<Diagnostic>,
    builds: usize,
}

impl<T: SourceTree> Session<T> {
    pub fn new(tree: T, options: Options) -> Self {
        Session {
            tree,
            options,
            roots: Vec::new(),
            target_keys: BTreeSet::new(),
            files: BTreeMap::new(),
            ambiguous: BTreeMap::new(),
            versions: BTreeMap::new(),
            table: BTreeMap::new(),
            failed: BTreeMap::new(),
            arena: Vec::new(),
            stack: Vec::new(),
            diagnostics: Vec::new(),
            builds: 0,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Add a root whose definitions [`build_all`](Self::build_all) builds.
    pub fn add_target_root(&mut self, root: impl Into<PathBuf>) {
        let root = root.into();
        for key in self.add_root(&root) {
            self.target_keys.insert(key);
        }
    }

    /// Add a root used only to satisfy references.
    pub fn add_lookup_root(&mut self, root: impl Into<PathBuf>) {
        let root = root.into();
        self.add_root(&root);
    }

    fn add_root(&mut self, root: &Path) -> Vec<DefinitionKey> {
        if self.roots.iter().any(|r| r == root) {
            return self
                .files
                .values()
                .filter(|f| f.root == root)
                .map(DefinitionFile::key)
                .collect();
        }
        self.roots.push(root.to_path_buf());
        let (files, diagnostics) = discover(&self.tree, root);
        self.diagnostics.extend(diagnostics);
        let mut keys = Vec::new();
        for file in files {
            let key = file.key();
            keys.push(key.clone());
            self.versions
                .entry(file.full_name.clone())
                .or_default()
                .insert(file.version);
            if let Some(existing) = self.files.get(&key) {
                self.ambiguous
                    .entry(key.clone())
                    .or_insert_with(|| vec![existing.clone()])
                    .push(file);
                continue;
            }
            self.files.insert(key, file);
        }
        keys
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Number of definition builds started so far.
    pub fn build_count(&self) -> usize {
        self.builds
    }

    pub fn definition(&self, key: &DefinitionKey) -> Option<&Definition> {
        match self.table.get(key) {
            Some(Entry::Published(definition)) => Some(definition),
            _ => None,
        }
    }

    /// Every published definition, sorted by key.
    pub fn published(&self) -> impl Iterator<Item = (&DefinitionKey, &Definition)> {
        self.table.iter().filter_map(|(key, entry)| match entry {
            Entry::Published(definition) => Some((key, definition)),
            Entry::Pending => None,
        })
    }

    /// Resolve a fully qualified message type, building it on demand. A missing version
    /// selects the newest major, then the newest minor.
    pub fn resolve(&mut self, name: &TypeName) -> Result<&CompositeType, DefinitionError> {
        match self.resolve_definition(name)?.clone() {
            Definition::Message(id) => Ok(self.composite(id)),
            Definition::Service(service) => Err(DefinitionError::Lookup(format!(
                "{}.{} is a service; resolve its definition instead",
                service.name, service.version
            ))),
        }
    }

    /// Resolve a fully qualified message or service definition.
    pub fn resolve_definition(&mut self, name: &TypeName) -> Result<&Definition, DefinitionError> {
        let key = self.select(&name.name, name.major, name.minor)?;
        self.ensure_built(&key)?;
        self.definition(&key)
            .ok_or_else(|| DefinitionError::Lookup(format!("{} was not published", key)))
    }

    /// Build every definition under the target roots.
    pub fn build_all(&mut self) -> Report {
        let keys: Vec<DefinitionKey> = self.target_keys.iter().cloned().collect();
        for key in &keys {
            // Failures are already recorded as diagnostics.
            let _ = self.ensure_built(key);
        }
        Report {
            published: keys
                .into_iter()
                .filter(|k| self.definition(k).is_some())
                .collect(),
            diagnostics: self.diagnostics.clone(),
        }
    }

    fn select(
        &self,
        full_name: &str,
        major: Option<u32>,
        minor: Option<u32>,
    ) -> Result<DefinitionKey, DefinitionError> {
        let versions = self
            .versions
            .get(full_name)
            .ok_or_else(|| DefinitionError::Lookup(format!("no type named {}", full_name)))?;
        let major = match major {
            Some(major) => major,
            None => versions
                .iter()
                .next_back()
                .map(|v| u32::from(v.major))
                .ok_or_else(|| DefinitionError::Lookup(format!("no type named {}", full_name)))?,
        };
        let candidates: Vec<Version> = versions
            .iter()
            .filter(|v| u32::from(v.major) == major)
            .copied()
            .collect();
        if candidates.is_empty() {
            return Err(DefinitionError::Lookup(format!(
                "no suitable major version of {}: {}",
                full_name, major
            )));
        }
        let version = match minor {
            Some(minor) => candidates
                .iter()
                .find(|v| u32::from(v.minor) == minor)
                .copied()
                .ok_or_else(|| {
                    DefinitionError::Lookup(format!(
                        "no suitable minor version of {}.{}: {}",
                        full_name, major, minor
                    ))
                })?,
            None => candidates.last().copied().ok_or_else(|| {
                DefinitionError::Lookup(format!("no suitable minor version of {}.{}", full_name, major))
            })?,
        };
        Ok(DefinitionKey {
            full_name: full_name.to_string(),
            version,
        })
    }

    /// Make sure `key` is published, building it if needed.
    fn ensure_built(&mut self, key: &DefinitionKey) -> Result<(), DefinitionError> {
        if let Some(error) = self.failed.get(key) {
            return Err(error.clone());
        }
        match self.table.get(key) {
            Some(Entry::Published(_)) => return Ok(()),
            Some(Entry::Pending) => {
                let start = self.stack.iter().position(|k| k == key).unwrap_or(0);
                let mut cycle: Vec<String> = self.stack[start..].iter().map(|k| k.to_string()).collect();
                cycle.push(key.to_string());
                return Err(DefinitionError::CyclicDependency(cycle));
            }
            None => {}
        }
        if let Some(files) = self.ambiguous.get(key) {
            let listed: Vec<String> = files.iter().map(|f| f.path.display().to_string()).collect();
            let place = match files.first() {
                Some(first) if files.iter().all(|f| f.root == first.root) => {
                    format!("more than once in {}", first.root.display())
                }
                _ => "in more than one root".to_string(),
            };
            let error = DefinitionError::AmbiguousDefinition(format!(
                "{} is defined {}: {}",
                key,
                place,
                listed.join(", ")
            ));
            for file in files {
                self.diagnostics
                    .push(Diagnostic::error(Locator::file(&file.path), error.clone()));
            }
            self.failed.insert(key.clone(), error.clone());
            return Err(error);
        }
        let file = self
            .files
            .get(key)
            .cloned()
            .ok_or_else(|| DefinitionError::Lookup(format!("no type named {}", key)))?;

        tracing::debug!(definition = %key, path = %file.path.display(), "building definition");
        self.builds += 1;
        self.table.insert(key.clone(), Entry::Pending);
        self.stack.push(key.clone());
        let result = self.build_file(&file);
        self.stack.pop();
        self.table.remove(key);

        match result {
            Ok(definition) => {
                tracing::debug!(definition = %key, "published");
                self.table.insert(key.clone(), Entry::Published(definition));
                Ok(())
            }
            Err(error) => {
                tracing::debug!(definition = %key, %error, "build failed");
                self.failed.insert(key.clone(), error.clone());
                Err(error)
            }
        }
    }

    fn build_file(&mut self, file: &DefinitionFile) -> Result<Definition, DefinitionError> {
        let source = match self.tree.read(&file.path) {
            Ok(source) => source,
            Err(e) => return Err(self.fail(Locator::file(&file.path), DefinitionError::Io(e.to_string()))),
        };
        let tree = match parse(&source) {
            Ok(tree) => tree,
            Err(e) => return Err(self.fail(Locator::at(&file.path, e.line), e.into())),
        };

        let options = self.options.clone();
        let outcome = build_definition(file, &tree, self, &options);
        let root_cause = outcome
            .diagnostics
            .iter()
            .find(|d| d.is_error())
            .map(|d| d.error.clone());
        self.diagnostics.extend(outcome.diagnostics);
        let built = match (outcome.built, root_cause) {
            (Some(built), None) => built,
            (_, Some(cause)) => return Err(cause),
            (None, None) => {
                return Err(self.fail(
                    Locator::file(&file.path),
                    DefinitionError::Syntax("definition produced no composite".to_string()),
                ))
            }
        };

        let composites: Vec<&CompositeType> = match &built {
            Built::Message(message) => vec![message],
            Built::Service { request, response } => vec![request, response],
        };
        let mut findings = Vec::new();
        for composite in &composites {
            findings.extend(validate_composite(composite, &*self, &options));
        }
        if let Some(port_id) = file.fixed_port_id {
            if let Err(e) = check_fixed_port_id(
                port_id,
                matches!(built, Built::Service { .. }),
                file.root_namespace(),
                options.allow_unregulated_fixed_port_id,
            ) {
                findings.push(Diagnostic::error(Locator::file(&file.path), e));
            }
        }
        let root_cause = findings.iter().find(|d| d.is_error()).map(|d| d.error.clone());
        self.diagnostics.extend(findings);
        if let Some(cause) = root_cause {
            return Err(cause);
        }

        if let Some(previous) = self.preceding_minor(file) {
            let problems = self.check_compatibility(&previous, &built);
            if !problems.is_empty() {
                let mut first = None;
                for problem in problems {
                    let error = DefinitionError::Compatibility(format!(
                        "{} is not compatible with {}: {}",
                        file.key(),
                        previous,
                        problem
                    ));
                    first.get_or_insert_with(|| error.clone());
                    self.diagnostics
                        .push(Diagnostic::error(Locator::file(&file.path), error));
                }
                if let Some(error) = first {
                    return Err(error);
                }
            }
        }

        Ok(self.publish(file, built))
    }

    fn fail(&mut self, locator: Locator, error: DefinitionError) -> DefinitionError {
        self.diagnostics.push(Diagnostic::error(locator, error.clone()));
        error
    }

    /// The nearest older minor version of the same major, if it builds.
    fn preceding_minor(&mut self, file: &DefinitionFile) -> Option<DefinitionKey> {
        let version = self
            .versions
            .get(&file.full_name)?
            .range(..file.version)
            .rev()
            .find(|v| v.major == file.version.major)
            .copied()?;
        let key = DefinitionKey {
            full_name: file.full_name.clone(),
            version,
        };
        self.ensure_built(&key).ok()?;
        Some(key)
    }

    fn check_compatibility(&self, previous: &DefinitionKey, built: &Built) -> Vec<String> {
        let policy = &self.options.compatibility;
        match (self.definition(previous), built) {
            (Some(Definition::Message(id)), Built::Message(newer)) => {
                policy.check(self.composite(*id), newer, self)
            }
            (Some(Definition::Service(service)), Built::Service { request, response }) => {
                let mut problems = policy.check(self.composite(service.request), request, self);
                problems.extend(policy.check(self.composite(service.response), response, self));
                problems
            }
            (Some(_), _) => vec!["a message and a service cannot share a major version".to_string()],
            (None, _) => Vec::new(),
        }
    }

    fn publish(&mut self, file: &DefinitionFile, built: Built) -> Definition {
        match built {
            Built::Message(message) => Definition::Message(self.push(message)),
            Built::Service { request, response } => Definition::Service(ServiceType {
                name: file.full_name.clone(),
                version: file.version,
                deprecated: request.deprecated,
                fixed_port_id: file.fixed_port_id,
                request: self.push(request),
                response: self.push(response),
            }),
        }
    }

    fn push(&mut self, composite: CompositeType) -> CompositeId {
        let id = CompositeId(self.arena.len());
        self.arena.push(composite);
        id
    }
}

impl<T: SourceTree> CompositeTable for Session<T> {
    fn composite(&self, id: CompositeId) -> &CompositeType {
        &self.arena[id.0]
    }
}

impl<T: SourceTree> Resolver for Session<T> {
    fn resolve_reference(
        &mut self,
        name: &TypeName,
        origin: &DefinitionFile,
    ) -> Result<CompositeRef, DefinitionError> {
        let full_name = if name.is_relative() {
            format!("{}.{}", origin.namespace(), name.name)
        } else {
            name.name.clone()
        };
        let key = self.select(&full_name, name.major, name.minor)?;
        let origin_key = origin.key();
        if key.full_name == origin_key.full_name && key.version != origin_key.version {
            return Err(DefinitionError::Lookup(format!(
                "{} cannot refer to another version of itself ({})",
                origin_key, key
            )));
        }

        if let Err(error) = self.ensure_built(&key) {
            return Err(match error {
                DefinitionError::CyclicDependency(cycle) if cycle.contains(&origin_key.to_string()) => {
                    DefinitionError::CyclicDependency(cycle)
                }
                cause => DefinitionError::Lookup(format!("dependency {} failed: {}", key, cause)),
            });
        }
        match self.definition(&key) {
            Some(Definition::Message(id)) => Ok(CompositeRef {
                id: *id,
                name: key.full_name.clone(),
                version: key.version,
            }),
            Some(Definition::Service(_)) => Err(DefinitionError::Lookup(format!(
                "service type {} cannot be used as a field or value",
                key
            ))),
            None => Err(DefinitionError::Lookup(format!("{} was not published", key))),
        }
    }
}
