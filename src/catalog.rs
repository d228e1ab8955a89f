//! Copy-on-write registries for conditions, graph templates and workflow
//! signatures.
//!
//! Catalogs are read-mostly: every alert pass snapshots them once and sees
//! a consistent view for the whole pass, while CRUD requests swap a fresh
//! map in atomically. Maps are ordered by id so that iteration order (and
//! therefore engine and planner behavior) is deterministic.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::condition::Condition;
use crate::graph::AttackGraph;
use crate::workflow::WorkflowSignature;

/// A frozen catalog view.
pub type Snapshot<T> = Arc<BTreeMap<u32, Arc<T>>>;

/// A copy-on-write registry keyed by entity id.
#[derive(Debug)]
pub struct Catalog<T> {
    inner: RwLock<Snapshot<T>>,
}

impl<T> Catalog<T> {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(BTreeMap::new())),
        }
    }

    /// Creates a catalog pre-populated from `(id, entity)` pairs.
    pub fn from_entries(entries: impl IntoIterator<Item = (u32, T)>) -> Self {
        let map: BTreeMap<u32, Arc<T>> = entries
            .into_iter()
            .map(|(id, entity)| (id, Arc::new(entity)))
            .collect();
        Self {
            inner: RwLock::new(Arc::new(map)),
        }
    }

    /// Returns the current frozen view.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot<T> {
        // A poisoned lock still holds a structurally valid map.
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Looks up a single entity.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<Arc<T>> {
        self.snapshot().get(&id).cloned()
    }

    /// Inserts or replaces an entity, swapping in a fresh map.
    pub fn insert(&self, id: u32, entity: T) {
        self.mutate(|map| {
            map.insert(id, Arc::new(entity));
        });
    }

    /// Removes an entity; returns whether it existed.
    pub fn remove(&self, id: u32) -> bool {
        let mut removed = false;
        self.mutate(|map| {
            removed = map.remove(&id).is_some();
        });
        removed
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether the catalog holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mutate(&self, apply: impl FnOnce(&mut BTreeMap<u32, Arc<T>>)) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut map = (**guard).clone();
        apply(&mut map);
        *guard = Arc::new(map);
    }
}

impl<T> Default for Catalog<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The three registries the engine runs against.
#[derive(Debug, Default)]
pub struct Catalogs {
    /// Condition registry.
    pub conditions: Catalog<Condition>,
    /// Attack-graph template registry.
    pub graphs: Catalog<AttackGraph>,
    /// Workflow signature registry.
    pub workflows: Catalog<WorkflowSignature>,
}

/// Consistent view over all three catalogs for one alert pass.
pub struct CatalogView {
    /// Conditions at snapshot time.
    pub conditions: Snapshot<Condition>,
    /// Graph templates at snapshot time.
    pub graphs: Snapshot<AttackGraph>,
    /// Workflow signatures at snapshot time.
    pub workflows: Snapshot<WorkflowSignature>,
}

impl Catalogs {
    /// Snapshots all three catalogs at once.
    #[must_use]
    pub fn snapshot(&self) -> CatalogView {
        CatalogView {
            conditions: self.conditions.snapshot(),
            graphs: self.graphs.snapshot(),
            workflows: self.workflows.snapshot(),
        }
    }
}
