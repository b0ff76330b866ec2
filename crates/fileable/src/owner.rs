//! Owner resolution
//!
//! File records store only an owner type tag and id. The registry maps each
//! tag to a lookup so a record can be traced back to the entity it belongs to.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use fileable_core::{FileOwner, Id, OwnerRef};
use futures::future::{BoxFuture, FutureExt};

use crate::error::{FileError, FileResult};

/// An owner resolved through the registry
pub type SharedOwner = Arc<dyn FileOwner + Send + Sync>;

type OwnerLookup = Arc<dyn Fn(Id) -> BoxFuture<'static, Option<SharedOwner>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct OwnerRegistry {
    lookups: HashMap<String, OwnerLookup>,
}

impl OwnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the lookup for one owner type tag
    pub fn register<F, Fut>(&mut self, owner_type: impl Into<String>, lookup: F)
    where
        F: Fn(Id) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<SharedOwner>> + Send + 'static,
    {
        self.lookups
            .insert(owner_type.into(), Arc::new(move |id| lookup(id).boxed()));
    }

    pub fn with<F, Fut>(mut self, owner_type: impl Into<String>, lookup: F) -> Self
    where
        F: Fn(Id) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<SharedOwner>> + Send + 'static,
    {
        self.register(owner_type, lookup);
        self
    }

    pub fn is_registered(&self, owner_type: &str) -> bool {
        self.lookups.contains_key(owner_type)
    }

    /// Resolve an owner reference. `Ok(None)` means the type is known but
    /// no entity has that id.
    pub async fn resolve(&self, owner: &OwnerRef) -> FileResult<Option<SharedOwner>> {
        let lookup = self
            .lookups
            .get(&owner.owner_type)
            .ok_or_else(|| FileError::UnknownOwnerType(owner.owner_type.clone()))?;
        Ok(lookup(owner.owner_id).await)
    }
}
