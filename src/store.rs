//! Persistent catalog store.
//!
//! Attack graphs, workflow signatures and conditions each live in one JSON
//! document on disk holding a list of entity objects. Documents are read
//! once at startup (invalid state is fatal) and rewritten in full on every
//! CRUD change; the rewrite goes through a sibling temp file and a rename
//! so that a crash never leaves a half-written catalog behind.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::catalog::{Catalog, Catalogs};
use crate::condition::{Condition, ConditionSpec};
use crate::error::{Error, StoreError};
use crate::graph::AttackGraph;
use crate::workflow::WorkflowSignature;

/// Locations of the three catalog documents.
#[derive(Debug, Clone)]
pub struct StorePaths {
    /// Attack-graph template document.
    pub graphs: PathBuf,
    /// Workflow signature document.
    pub workflows: PathBuf,
    /// Condition document.
    pub conditions: PathBuf,
}

/// Reads and rewrites the catalog documents.
#[derive(Debug)]
pub struct Store {
    paths: StorePaths,
}

impl Store {
    /// Creates a store over the given document paths.
    #[must_use]
    pub const fn new(paths: StorePaths) -> Self {
        Self { paths }
    }

    /// Loads all three documents into fresh catalogs.
    ///
    /// A missing document is an empty catalog (first boot); any present
    /// document must parse and every entity must satisfy its invariants.
    ///
    /// # Errors
    ///
    /// Returns a parse, syntax or invariant error; all of them are fatal
    /// at startup.
    pub fn load(&self) -> Result<Catalogs, Error> {
        let catalogs = Catalogs::default();

        let condition_specs: Vec<ConditionSpec> = read_document(&self.paths.conditions)?;
        check_unique_ids(&self.paths.conditions, condition_specs.iter().map(|c| c.id))?;
        for spec in condition_specs {
            let condition = Condition::try_from(spec)?;
            catalogs.conditions.insert(condition.id, condition);
        }

        let conditions = catalogs.conditions.snapshot();

        let graphs: Vec<AttackGraph> = read_document(&self.paths.graphs)?;
        check_unique_ids(&self.paths.graphs, graphs.iter().map(|g| g.id))?;
        for graph in graphs {
            graph.validate(&conditions)?;
            catalogs.graphs.insert(graph.id, graph);
        }

        let workflows: Vec<WorkflowSignature> = read_document(&self.paths.workflows)?;
        check_unique_ids(&self.paths.workflows, workflows.iter().map(|w| w.id))?;
        for workflow in workflows {
            workflow.validate(&conditions)?;
            catalogs.workflows.insert(workflow.id, workflow);
        }

        info!(
            conditions = catalogs.conditions.len(),
            graphs = catalogs.graphs.len(),
            workflows = catalogs.workflows.len(),
            "catalogs loaded"
        );
        Ok(catalogs)
    }

    /// Rewrites the condition document from the current catalog state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on serialization or I/O failure.
    pub fn persist_conditions(&self, catalog: &Catalog<Condition>) -> Result<(), StoreError> {
        let specs: Vec<ConditionSpec> = catalog
            .snapshot()
            .values()
            .map(|c| ConditionSpec::from(c.as_ref()))
            .collect();
        write_document(&self.paths.conditions, &specs)
    }

    /// Rewrites the graph document from the current catalog state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on serialization or I/O failure.
    pub fn persist_graphs(&self, catalog: &Catalog<AttackGraph>) -> Result<(), StoreError> {
        let graphs: Vec<AttackGraph> = catalog
            .snapshot()
            .values()
            .map(|g| g.as_ref().clone())
            .collect();
        write_document(&self.paths.graphs, &graphs)
    }

    /// Rewrites the workflow document from the current catalog state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on serialization or I/O failure.
    pub fn persist_workflows(
        &self,
        catalog: &Catalog<WorkflowSignature>,
    ) -> Result<(), StoreError> {
        let workflows: Vec<WorkflowSignature> = catalog
            .snapshot()
            .values()
            .map(|w| w.as_ref().clone())
            .collect();
        write_document(&self.paths.workflows, &workflows)
    }
}

/// Reads one catalog document; missing files yield an empty list.
fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "catalog document missing; starting empty");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    serde_json::from_str(&text).map_err(|e| StoreError::Invalid {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Atomically replaces one catalog document.
fn write_document<T: Serialize>(path: &Path, entities: &[T]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_vec_pretty(entities).map_err(|e| StoreError::Invalid {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

/// Rejects documents carrying the same id twice.
fn check_unique_ids(path: &Path, ids: impl Iterator<Item = u32>) -> Result<(), StoreError> {
    let mut seen = std::collections::BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(StoreError::Invalid {
                path: path.to_path_buf(),
                message: format!("duplicate entity id {id}"),
            });
        }
    }
    Ok(())
}
