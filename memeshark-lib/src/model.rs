//! The data model shared by every component of the deduplication engine.
//!
//! Identity fields (`CommitId`, `CesId`, ...) are newtype wrappers over
//! `bson::oid::ObjectId`, following the same pattern `NonZeroOid` uses to
//! wrap a raw `git2::Oid` elsewhere in this lineage of tools: the wrapped
//! type statically prevents mixing up ids that happen to share a
//! representation.

use std::fmt::{self, Display};

use bson::oid::ObjectId;
use bson::Document;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub ObjectId);

        impl $name {
            /// Wrap a raw object id.
            pub fn new(inner: ObjectId) -> Self {
                Self(inner)
            }

            /// The wrapped raw id.
            pub fn inner(&self) -> ObjectId {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<ObjectId> for $name {
            fn from(inner: ObjectId) -> Self {
                Self(inner)
            }
        }
    };
}

id_newtype!(ProjectId);
id_newtype!(VcsSystemId);
id_newtype!(CommitId);
id_newtype!(CesId);

/// A summary of a commit as returned by `StoreGateway::commits_of`: just
/// enough to build the commit DAG (§4.2 prefers streaming this over the
/// full `Commit` document).
#[derive(Clone, Debug)]
pub struct CommitSummary {
    pub commit_id: CommitId,
    pub revision_hash: String,
    pub parents: Vec<String>,
}

/// A full commit document. The core only ever rewrites `code_entity_states`.
#[derive(Clone, Debug)]
pub struct Commit {
    pub commit_id: CommitId,
    pub vcs_system_id: VcsSystemId,
    pub revision_hash: String,
    pub parents: Vec<String>,
    pub code_entity_states: Vec<CesId>,
}

/// The identity-within-commit key of a CES: unique per commit.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub long_name: String,
    pub file_id: String,
}

impl EntityKey {
    pub fn new(long_name: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            long_name: long_name.into(),
            file_id: file_id.into(),
        }
    }
}

/// A Code Entity State record.
///
/// `attributes` holds every domain field opaque to the core (type,
/// location, metrics, ...) as a `bson::Document` — the same representation
/// the MongoDB driver already hands back for a document's fields, so the
/// equivalence predicate never has to translate between wire format and
/// comparison format.
#[derive(Clone, Debug)]
pub struct CodeEntityState {
    pub id: CesId,
    pub commit_id: CommitId,
    pub key: EntityKey,
    pub ce_parent_id: Option<CesId>,
    pub attributes: Document,
}

impl CodeEntityState {
    pub fn long_name(&self) -> &str {
        &self.key.long_name
    }
}
