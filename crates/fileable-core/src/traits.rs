//! Core traits shared by file records and their owners

use std::fmt;

use serde::{Deserialize, Serialize};

/// Primary key type
pub type Id = i64;

/// Trait for entities that have a primary key
pub trait Identifiable {
    fn id(&self) -> Option<Id>;
    fn is_persisted(&self) -> bool {
        self.id().is_some()
    }
    fn is_new_record(&self) -> bool {
        !self.is_persisted()
    }
}

/// Capability of any entity that can have files attached.
///
/// An owner is identified by a type tag (e.g. "Post", "User") and an id.
/// The pair is what gets stored on every file record, so the owner's own
/// storage never has to know about files.
pub trait FileOwner {
    /// Type tag of the owning entity
    fn owner_type(&self) -> &str;

    /// Identifier of the owning entity
    fn owner_id(&self) -> Id;

    /// The tagged reference stored on file records
    fn owner_ref(&self) -> OwnerRef {
        OwnerRef::new(self.owner_type(), self.owner_id())
    }
}

/// Tagged reference to an owner, as persisted on a file record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub owner_type: String,
    pub owner_id: Id,
}

impl OwnerRef {
    pub fn new(owner_type: impl Into<String>, owner_id: Id) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id,
        }
    }
}

impl FileOwner for OwnerRef {
    fn owner_type(&self) -> &str {
        &self.owner_type
    }

    fn owner_id(&self) -> Id {
        self.owner_id
    }

    fn owner_ref(&self) -> OwnerRef {
        self.clone()
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.owner_type, self.owner_id)
    }
}
