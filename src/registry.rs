//! Schema Registry
//!
//! Stores named schemas and resolves parent/child composition into flattened
//! field sets. Inheritance is an acyclic tree keyed by name: every schema
//! points at its declaring ancestor, and `resolve` merges the chain root-first
//! so descendants override ancestors on name collision.
//!
//! Resolved field sets are memoised. Any mutation (registration or
//! re-parenting) drops the whole cache.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::rc::Rc;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use petgraph::algo::{kosaraju_scc, toposort};
use petgraph::graph::DiGraph;
use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, SchemaError};
use crate::schema::{FieldType, ResolvedFields, Schema, SchemaDefinition};

/// On-disk layouts accepted by [`SchemaRegistry::load_file`]
#[derive(Deserialize)]
#[serde(untagged)]
enum DefinitionFile {
    Many { schemas: Vec<SchemaDefinition> },
    List(Vec<SchemaDefinition>),
    One(SchemaDefinition),
}

impl DefinitionFile {
    fn into_definitions(self) -> Vec<SchemaDefinition> {
        match self {
            DefinitionFile::Many { schemas } | DefinitionFile::List(schemas) => schemas,
            DefinitionFile::One(def) => vec![def],
        }
    }
}

/// The schema registry
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    /// Registered schemas by name
    schemas: HashMap<String, Schema>,
    /// Registration order, for stable listings
    order: Vec<String>,
    /// Memoised resolution results
    resolved: RefCell<HashMap<String, Rc<ResolvedFields>>>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered schemas
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Get a registered schema node (own fields only)
    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    /// Names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Register a schema tree as a new root
    pub fn add_schema(&mut self, definition: SchemaDefinition) -> Result<()> {
        self.register_tree(definition, None)
    }

    /// Register a schema tree beneath an already registered schema
    pub fn add_schema_under(&mut self, parent: &str, definition: SchemaDefinition) -> Result<()> {
        if !self.contains(parent) {
            return Err(self.unknown(parent));
        }
        self.register_tree(definition, Some(parent.to_string()))
    }

    /// Move a schema under a different parent (or make it a root).
    ///
    /// This is the only mutation that can introduce a cycle, so the cycle
    /// check re-runs and the change is rolled back if it fails.
    pub fn set_parent(&mut self, name: &str, parent: Option<&str>) -> Result<()> {
        for schema in std::iter::once(name).chain(parent) {
            if !self.contains(schema) {
                return Err(self.unknown(schema));
            }
        }
        let previous = match self.schemas.get_mut(name) {
            Some(schema) => std::mem::replace(&mut schema.parent, parent.map(String::from)),
            None => None,
        };

        if let Err(err) = self.check_cycles() {
            if let Some(schema) = self.schemas.get_mut(name) {
                schema.parent = previous;
            }
            return Err(err);
        }

        debug!(schema = name, parent = ?parent, "schema re-parented");
        self.invalidate();
        Ok(())
    }

    /// Resolve the flattened field set of a schema.
    ///
    /// Walks the ancestor chain up to the root and merges it root-first, so a
    /// descendant's definition of a field replaces its ancestors'. The merged
    /// set must be usable on its own: every `dependsOn` names a field in it,
    /// dependencies are acyclic, and every reference names a registered schema.
    pub fn resolve(&self, name: &str) -> Result<Rc<ResolvedFields>> {
        if let Some(cached) = self.resolved.borrow().get(name) {
            return Ok(Rc::clone(cached));
        }

        let chain = self.ancestry(name)?;
        let mut fields = ResolvedFields::new();
        for schema in chain.iter().rev() {
            for (field, spec) in &schema.properties {
                fields.insert(field.clone(), spec.clone());
            }
        }

        self.check_resolved(name, &fields)?;

        let fields = Rc::new(fields);
        self.resolved
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&fields));
        Ok(fields)
    }

    /// The schema followed by its ancestors, innermost first
    pub fn ancestry(&self, name: &str) -> Result<Vec<&Schema>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(name);

        while let Some(schema_name) = current {
            let schema = self
                .schemas
                .get(schema_name)
                .ok_or_else(|| self.unknown(schema_name))?;
            if !seen.insert(schema_name) {
                let mut cycle: Vec<String> = chain.iter().map(|s: &&Schema| s.name.clone()).collect();
                cycle.push(schema_name.to_string());
                return Err(SchemaError::CyclicSchema { cycle });
            }
            chain.push(schema);
            current = schema.parent.as_deref();
        }

        Ok(chain)
    }

    /// Load definitions from a JSON or TOML file. Returns the registered root names.
    ///
    /// A file holds one definition, a list of definitions, or a
    /// `{ schemas = [...] }` table.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let file: DefinitionFile = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };

        // Nothing from the file is registered unless all of it is valid
        let definitions = file.into_definitions();
        self.check_incoming(&definitions)?;

        let roots: Vec<String> = definitions.iter().map(|d| d.name.clone()).collect();
        for definition in definitions {
            self.insert_tree(definition, None);
        }
        self.invalidate();
        debug!(path = %path.display(), roots = roots.len(), "loaded schema definitions");
        Ok(roots)
    }

    /// Load every `.json` / `.toml` definition file beneath a directory, in path order
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<Vec<String>> {
        let mut files: Vec<_> = WalkDir::new(dir.as_ref())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("json") | Some("toml")))
            .collect();
        files.sort();

        let mut roots = Vec::new();
        for file in files {
            roots.extend(self.load_file(&file)?);
        }
        Ok(roots)
    }

    /// Closest registered name to `query`, if any is a plausible match
    pub fn suggest(&self, query: &str) -> Option<String> {
        let matcher = SkimMatcherV2::default();
        self.order
            .iter()
            .filter_map(|name| {
                matcher
                    .fuzzy_match(name, query)
                    .or_else(|| matcher.fuzzy_match(query, name))
                    .map(|score| (score, name))
            })
            .max_by_key(|(score, _)| *score)
            .map(|(_, name)| name.clone())
    }

    pub(crate) fn unknown(&self, name: &str) -> SchemaError {
        SchemaError::UnknownSchema {
            name: name.to_string(),
            suggestion: self.suggest(name),
        }
    }

    fn register_tree(&mut self, definition: SchemaDefinition, parent: Option<String>) -> Result<()> {
        self.check_incoming(std::slice::from_ref(&definition))?;
        self.insert_tree(definition, parent);
        self.invalidate();
        Ok(())
    }

    /// Validate definition trees against each other and the registry, before any is inserted
    fn check_incoming(&self, definitions: &[SchemaDefinition]) -> Result<()> {
        let mut incoming = HashSet::new();
        for name in definitions.iter().flat_map(SchemaDefinition::names) {
            if self.contains(name) || !incoming.insert(name) {
                return Err(SchemaError::DuplicateSchema {
                    name: name.to_string(),
                });
            }
        }
        definitions.iter().try_for_each(check_definition)
    }

    fn insert_tree(&mut self, definition: SchemaDefinition, parent: Option<String>) {
        let mut pending = vec![(definition, parent)];
        while let Some((def, parent)) = pending.pop() {
            let SchemaDefinition {
                name,
                properties,
                child_schemas,
            } = def;

            debug!(schema = %name, parent = ?parent, fields = properties.len(), "registering schema");
            for child in child_schemas.into_iter().rev() {
                pending.push((child, Some(name.clone())));
            }
            self.order.push(name.clone());
            self.schemas
                .insert(name.clone(), Schema::new(name, properties, parent));
        }
    }

    fn check_resolved(&self, name: &str, fields: &ResolvedFields) -> Result<()> {
        for (field, spec) in fields {
            if let FieldType::Reference(target) = &spec.field_type {
                if !self.contains(target) {
                    return Err(SchemaError::InvalidDefinition {
                        name: name.to_string(),
                        reason: format!("field '{}' references unregistered schema '{}'", field, target),
                    });
                }
            }
        }
        dependency_order(name, fields).map(|_| ())
    }

    /// Detect parent cycles across the whole registry
    fn check_cycles(&self) -> Result<()> {
        let mut graph = DiGraph::<&str, ()>::with_capacity(self.schemas.len(), self.schemas.len());
        let indices: HashMap<&str, _> = self
            .order
            .iter()
            .map(|name| (name.as_str(), graph.add_node(name.as_str())))
            .collect();

        for schema in self.schemas.values() {
            if let Some(parent) = &schema.parent {
                if let (Some(&from), Some(&to)) = (indices.get(schema.name.as_str()), indices.get(parent.as_str())) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        for component in kosaraju_scc(&graph) {
            let self_loop = component.len() == 1 && graph.contains_edge(component[0], component[0]);
            if component.len() > 1 || self_loop {
                // Report the cycle as a walk along parent links
                let start = graph[component[0]];
                return Err(match self.ancestry(start) {
                    Err(err @ SchemaError::CyclicSchema { .. }) => err,
                    _ => SchemaError::CyclicSchema {
                        cycle: component.iter().map(|&idx| graph[idx].to_string()).collect(),
                    },
                });
            }
        }

        Ok(())
    }

    fn invalidate(&self) {
        let mut resolved = self.resolved.borrow_mut();
        if !resolved.is_empty() {
            debug!(entries = resolved.len(), "invalidating resolved schema cache");
            resolved.clear();
        }
    }
}

/// Dependent fields of a resolved set, ordered so every field comes after the
/// dependent field its condition reads
pub(crate) fn dependency_order<'f>(schema: &str, fields: &'f ResolvedFields) -> Result<Vec<&'f str>> {
    let invalid = |reason: String| SchemaError::InvalidDefinition {
        name: schema.to_string(),
        reason,
    };

    let mut graph = DiGraph::<&str, ()>::new();
    let mut nodes = HashMap::new();
    for (name, spec) in fields {
        if spec.depends_on.is_some() {
            nodes.insert(name.as_str(), graph.add_node(name.as_str()));
        }
    }

    for (name, spec) in fields {
        let Some(dependency) = &spec.depends_on else {
            continue;
        };
        if !fields.contains_key(&dependency.field) {
            return Err(invalid(format!(
                "field '{}' depends on undeclared field '{}'",
                name, dependency.field
            )));
        }
        if let (Some(&from), Some(&to)) = (nodes.get(dependency.field.as_str()), nodes.get(name.as_str())) {
            graph.add_edge(from, to, ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(|idx| graph[idx]).collect()),
        Err(cycle) => Err(invalid(format!(
            "dependency cycle through field '{}'",
            graph[cycle.node_id()]
        ))),
    }
}

fn check_definition(definition: &SchemaDefinition) -> Result<()> {
    if definition.name.trim().is_empty() {
        return Err(SchemaError::InvalidDefinition {
            name: definition.name.clone(),
            reason: "schema name is empty".to_string(),
        });
    }
    for (field, spec) in &definition.properties {
        spec.check().map_err(|reason| SchemaError::InvalidDefinition {
            name: definition.name.clone(),
            reason: format!("field '{}': {}", field, reason),
        })?;
    }
    definition.child_schemas.iter().try_for_each(check_definition)
}
