//! Capabilities consumed from the host platform, and arena lookup by location.

use std::collections::BTreeMap;
use std::sync::RwLock;

use flint_core::{
    ArenaContext, ArenaId, BlockSubject, Boundary, EntityChangeSubject, EntityCreationSubject,
    Location3D, MutationDescription, RecordHeader, RollbackRecord, StateBlob,
};
use thiserror::Error;

use crate::logger::{ChangeLogger, LogError, LogOutcome};

/// A platform-side reversal or lookup failed.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct AdapterError {
    reason: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AdapterError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn with_source(
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Live-world operations the rollback engine delegates to.
///
/// Every reversal receives the record's header (id, world, state flag) and
/// the kind-specific subject. `state` is `None` when the record carries no
/// blob or the blob was lost.
pub trait PlatformAdapter: Send + Sync {
    /// The world the arena is configured for right now.
    fn current_world_of(&self, arena: &ArenaId) -> Result<String, AdapterError>;

    fn rollback_block(
        &self,
        header: &RecordHeader,
        block: &BlockSubject,
        state: Option<&StateBlob>,
    ) -> Result<(), AdapterError>;

    fn rollback_entity_creation(
        &self,
        header: &RecordHeader,
        created: &EntityCreationSubject,
    ) -> Result<(), AdapterError>;

    fn rollback_entity_change(
        &self,
        header: &RecordHeader,
        changed: &EntityChangeSubject,
        state: Option<&StateBlob>,
    ) -> Result<(), AdapterError>;

    /// Prefetch hint for the entities a batch refers to. Best effort.
    fn cache_entities_for(
        &self,
        _arena: &ArenaId,
        _batch: &[RollbackRecord],
    ) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Finds the arenas a world location belongs to.
pub trait ArenaDirectory: Send + Sync {
    /// Arenas with a round in progress whose boundary contains `location`.
    fn arenas_containing(&self, location: &Location3D) -> Vec<ArenaContext>;
}

#[derive(Clone, Debug)]
struct Site {
    context: ArenaContext,
    boundary: Boundary,
    round_active: bool,
}

/// Directory over an explicit set of registered arenas.
#[derive(Default)]
pub struct StaticArenaDirectory {
    sites: RwLock<BTreeMap<ArenaId, Site>>,
}

impl StaticArenaDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) an arena. Rounds start inactive.
    pub fn register(&self, context: ArenaContext, boundary: Boundary) {
        if let Ok(mut sites) = self.sites.write() {
            sites.insert(
                context.arena.clone(),
                Site {
                    context,
                    boundary,
                    round_active: false,
                },
            );
        }
    }

    pub fn unregister(&self, arena: &ArenaId) -> bool {
        self.sites
            .write()
            .map(|mut sites| sites.remove(arena).is_some())
            .unwrap_or(false)
    }

    /// Returns false when the arena is not registered.
    pub fn set_round_active(&self, arena: &ArenaId, active: bool) -> bool {
        let Ok(mut sites) = self.sites.write() else {
            return false;
        };
        match sites.get_mut(arena) {
            Some(site) => {
                site.round_active = active;
                true
            }
            None => false,
        }
    }
}

impl ArenaDirectory for StaticArenaDirectory {
    fn arenas_containing(&self, location: &Location3D) -> Vec<ArenaContext> {
        let Ok(sites) = self.sites.read() else {
            return Vec::new();
        };
        sites
            .values()
            .filter(|site| site.round_active)
            .filter(|site| {
                location
                    .world
                    .as_deref()
                    .is_none_or(|world| world == site.context.world)
            })
            .filter(|site| site.boundary.contains(location))
            .map(|site| site.context.clone())
            .collect()
    }
}

/// Logs a mutation at `location` into every arena that contains it.
pub fn route_change(
    directory: &dyn ArenaDirectory,
    logger: &ChangeLogger,
    location: &Location3D,
    description: MutationDescription,
) -> Vec<(ArenaId, Result<LogOutcome, LogError>)> {
    directory
        .arenas_containing(location)
        .into_iter()
        .map(|context| {
            let outcome = logger.log_change(&context, description.clone());
            (context.arena, outcome)
        })
        .collect()
}
