// Template Provider
//
// Named templates, JSON schemas and code mappings are organised in layers.
// Lookup walks the layers from the highest priority down; a layer may map a
// name to `None`, a tombstone that hides the name in every lower layer.
//
// Layers loaded from a directory are parsed once per process and shared
// through a read-mostly cache.

use crate::code_mapping::CodeMapping;
use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use crate::template::Template;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Template file extension, stripped from template names
pub const TEMPLATE_EXTENSION: &str = ".liquid";

const METADATA_FILE: &str = "metadata.json";
const CODE_MAPPING_NAMES: [&str; 2] = ["CodeSystem/CodeSystem", "ValueSet/ValueSet"];
const SCHEMA_FOLDERS: [&str; 2] = ["Schema", "Schemas"];

/// Source of templates for a conversion
pub trait TemplateProvider: Send + Sync {
    /// Parsed template registered under `name`
    fn get_template(&self, name: &str) -> Option<Arc<Template>>;

    /// JSON schema registered under `name` (extension included)
    fn get_schema(&self, name: &str) -> Option<Arc<serde_json::Value>>;

    /// Code mapping registered under `name`, combined across layers
    fn get_code_mapping(&self, name: &str) -> Result<Option<CodeMapping>>;
}

/// Content registered under a name
#[derive(Debug, Clone)]
pub enum TemplateEntry {
    Template(Arc<Template>),
    Schema(Arc<serde_json::Value>),
    CodeMapping(Arc<CodeMapping>),
}

/// What a source name holds, judged from its path
#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryKind {
    Template(String),
    Schema(String),
    CodeMapping(String),
    Skip,
}

/// Normalizes separators: `\` becomes `/`, leading `./` and `/` are dropped
pub fn normalize_name(name: &str) -> String {
    let name = name.trim().replace('\\', "/");
    let name = name.trim_start_matches("./").trim_start_matches('/');
    name.to_string()
}

/// Names to try for `name` when rendering under a root template in `parent`:
/// the parent-relative name first, then the name itself
pub fn candidate_names(parent: &str, name: &str) -> Vec<String> {
    let name = normalize_name(name);
    if parent.is_empty() || name.starts_with(&format!("{}/", parent)) {
        vec![name]
    } else {
        vec![format!("{}/{}", parent, name), name]
    }
}

/// Directory part of a template name, `""` for top-level names
pub fn parent_path(name: &str) -> String {
    let name = normalize_name(name);
    match name.rfind('/') {
        Some(pos) => name[..pos].to_string(),
        None => String::new(),
    }
}

fn classify(raw: &str) -> EntryKind {
    let name = normalize_name(raw);
    let file_name = name.rsplit('/').next().unwrap_or_default();

    if file_name.eq_ignore_ascii_case(METADATA_FILE) {
        return EntryKind::Skip;
    }
    if let Some(stem) = name.strip_suffix(TEMPLATE_EXTENSION) {
        return EntryKind::Template(stem.to_string());
    }
    if let Some(stem) = name.strip_suffix(".json") {
        if is_code_mapping_name(stem) {
            return EntryKind::CodeMapping(stem.to_string());
        }
        let in_schema_folder = name.split('/').any(|part| SCHEMA_FOLDERS.contains(&part));
        if in_schema_folder || name.ends_with(".schema.json") {
            return EntryKind::Schema(name);
        }
        return EntryKind::Skip;
    }
    if is_code_mapping_name(&name) {
        return EntryKind::CodeMapping(name);
    }
    if file_name.contains('.') {
        return EntryKind::Skip;
    }
    EntryKind::Template(name)
}

fn is_code_mapping_name(name: &str) -> bool {
    CODE_MAPPING_NAMES.iter().any(|suffix| name.ends_with(suffix))
}

/// One layer of named entries
#[derive(Debug, Default, Clone)]
pub struct TemplateLayer {
    entries: HashMap<String, Option<TemplateEntry>>,
}

impl TemplateLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a layer from `(name, source)` pairs; `None` sources are
    /// tombstones
    pub fn from_sources<I, N, S>(sources: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, Option<S>)>,
        N: AsRef<str>,
        S: AsRef<str>,
    {
        let mut layer = Self::new();
        for (name, source) in sources {
            match source {
                Some(source) => layer.insert_source(name.as_ref(), source.as_ref())?,
                None => layer.tombstone(name.as_ref()),
            }
        }
        Ok(layer)
    }

    /// Parses `source` according to what `name` designates
    pub fn insert_source(&mut self, name: &str, source: &str) -> Result<()> {
        match classify(name) {
            EntryKind::Template(name) => {
                let template = Template::parse(&name, source)?;
                self.entries
                    .insert(name, Some(TemplateEntry::Template(Arc::new(template))));
            }
            EntryKind::Schema(name) => {
                let schema: serde_json::Value = serde_json::from_str(source).map_err(|e| {
                    FhirConverterError::template_load(
                        FhirConverterErrorCode::InvalidJsonSchema,
                        format!("Schema '{}' is not valid JSON: {}", name, e),
                    )
                })?;
                self.entries
                    .insert(name, Some(TemplateEntry::Schema(Arc::new(schema))));
            }
            EntryKind::CodeMapping(name) => {
                let mapping = CodeMapping::from_json(source)?;
                self.entries
                    .insert(name, Some(TemplateEntry::CodeMapping(Arc::new(mapping))));
            }
            EntryKind::Skip => {
                log::trace!("Skipping non-template entry '{}'", name);
            }
        }
        Ok(())
    }

    /// Hides `name` in every lower layer
    pub fn tombstone(&mut self, name: &str) {
        let key = match classify(name) {
            EntryKind::Template(n) | EntryKind::Schema(n) | EntryKind::CodeMapping(n) => n,
            EntryKind::Skip => normalize_name(name),
        };
        self.entries.insert(key, None);
    }

    /// Loads every template, schema and code mapping under `root`
    pub fn from_directory(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(FhirConverterError::template_load(
                FhirConverterErrorCode::TemplateFolderNotFound,
                format!("Template folder '{}' not found", root.display()),
            ));
        }

        let mut layer = Self::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir).map_err(|e| folder_error(&dir, e))? {
                let path = entry.map_err(|e| folder_error(&dir, e))?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(root) else {
                    continue;
                };
                let name = relative.to_string_lossy();
                if classify(&name) == EntryKind::Skip {
                    continue;
                }
                let source = fs::read_to_string(&path).map_err(|e| {
                    FhirConverterError::template_load(
                        FhirConverterErrorCode::TemplateNotFound,
                        format!("Cannot read template '{}': {}", path.display(), e),
                    )
                })?;
                layer.insert_source(&name, source.trim_start_matches('\u{feff}'))?;
            }
        }

        log::debug!(
            "Loaded {} template entries from '{}'",
            layer.len(),
            root.display()
        );
        Ok(layer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `None` if the layer does not mention `name`, `Some(None)` for a
    /// tombstone
    pub fn get(&self, name: &str) -> Option<Option<&TemplateEntry>> {
        self.entries.get(name).map(Option::as_ref)
    }
}

fn folder_error(dir: &Path, error: std::io::Error) -> FhirConverterError {
    FhirConverterError::template_load(
        FhirConverterErrorCode::TemplateFolderNotFound,
        format!("Cannot read template folder '{}': {}", dir.display(), error),
    )
}

/// Parsed directory layers keyed by canonical path
static DIRECTORY_CACHE: Lazy<RwLock<HashMap<PathBuf, Arc<TemplateLayer>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Returns the cached layer for `root`, loading it on first use
pub fn cached_directory_layer(root: &Path) -> Result<Arc<TemplateLayer>> {
    let key = root.canonicalize().map_err(|_| {
        FhirConverterError::template_load(
            FhirConverterErrorCode::TemplateFolderNotFound,
            format!("Template folder '{}' not found", root.display()),
        )
    })?;

    if let Some(layer) = DIRECTORY_CACHE.read().get(&key) {
        log::trace!("Template cache hit for '{}'", key.display());
        return Ok(Arc::clone(layer));
    }

    let layer = Arc::new(TemplateLayer::from_directory(&key)?);
    let mut cache = DIRECTORY_CACHE.write();
    // Another thread may have loaded it meanwhile; keep the first copy
    Ok(Arc::clone(cache.entry(key).or_insert(layer)))
}

/// Ordered layers, index 0 has the highest priority
#[derive(Debug, Default, Clone)]
pub struct TemplateCollection {
    layers: Vec<Arc<TemplateLayer>>,
}

impl TemplateCollection {
    pub fn new(layers: Vec<Arc<TemplateLayer>>) -> Self {
        Self { layers }
    }

    /// In-memory layers of `name -> source`; `None` sources are tombstones
    pub fn from_memory(layers: Vec<HashMap<String, Option<String>>>) -> Result<Self> {
        let layers = layers
            .into_iter()
            .map(|sources| TemplateLayer::from_sources(sources).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(layers))
    }

    /// All templates under `root`, shared through the process-wide cache
    pub fn from_directory(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(vec![cached_directory_layer(root.as_ref())?]))
    }

    /// Custom layers stacked on top of a directory
    pub fn with_overrides(
        overrides: Vec<HashMap<String, Option<String>>>,
        root: impl AsRef<Path>,
    ) -> Result<Self> {
        let mut collection = Self::from_memory(overrides)?;
        collection.layers.push(cached_directory_layer(root.as_ref())?);
        Ok(collection)
    }

    pub fn layers(&self) -> &[Arc<TemplateLayer>] {
        &self.layers
    }

    /// First entry for `name` walking down the layers. A tombstone ends the
    /// walk with no result.
    pub fn lookup(&self, name: &str) -> Option<&TemplateEntry> {
        let name = normalize_name(name);
        for layer in &self.layers {
            if let Some(entry) = layer.get(&name) {
                return entry;
            }
        }
        None
    }
}

impl TemplateProvider for TemplateCollection {
    fn get_template(&self, name: &str) -> Option<Arc<Template>> {
        match self.lookup(name.strip_suffix(TEMPLATE_EXTENSION).unwrap_or(name)) {
            Some(TemplateEntry::Template(template)) => Some(Arc::clone(template)),
            _ => None,
        }
    }

    fn get_schema(&self, name: &str) -> Option<Arc<serde_json::Value>> {
        match self.lookup(name) {
            Some(TemplateEntry::Schema(schema)) => Some(Arc::clone(schema)),
            _ => None,
        }
    }

    fn get_code_mapping(&self, name: &str) -> Result<Option<CodeMapping>> {
        let name = normalize_name(name);
        let mut combined: Option<CodeMapping> = None;
        for layer in &self.layers {
            match layer.get(&name) {
                None => continue,
                Some(Some(TemplateEntry::CodeMapping(mapping))) => match combined.as_mut() {
                    Some(higher) => higher.append(mapping)?,
                    None => combined = Some(mapping.as_ref().clone()),
                },
                // Tombstone or a different kind of entry hides lower layers
                Some(_) => break,
            }
        }
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_path() {
        assert_eq!(classify("Hl7v2\\ADT_A01.liquid"), EntryKind::Template("Hl7v2/ADT_A01".into()));
        assert_eq!(classify("metadata.json"), EntryKind::Skip);
        assert_eq!(
            classify("Schema/Patient.schema.json"),
            EntryKind::Schema("Schema/Patient.schema.json".into())
        );
        assert_eq!(
            classify("CodeSystem/CodeSystem.json"),
            EntryKind::CodeMapping("CodeSystem/CodeSystem".into())
        );
        assert_eq!(classify("README.md"), EntryKind::Skip);
        assert_eq!(classify("ADT_A01"), EntryKind::Template("ADT_A01".into()));
    }

    #[test]
    fn candidates_prefer_parent_relative_names() {
        assert_eq!(
            candidate_names("Hl7v2", "CodeSystem/CodeSystem"),
            vec!["Hl7v2/CodeSystem/CodeSystem".to_string(), "CodeSystem/CodeSystem".to_string()]
        );
        assert_eq!(candidate_names("", "a/b"), vec!["a/b".to_string()]);
        assert_eq!(parent_path("Hl7v2/ADT_A01"), "Hl7v2");
        assert_eq!(parent_path("ADT_A01"), "");
    }
}
