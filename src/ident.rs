//! Entity identities.
//!
//! Permanent identities ([`Entid`]) are assigned by the transactor at commit
//! time and never change. Temporary identities ([`TempId`]) are placeholders a
//! caller declares on a [`Transaction`](crate::tx::Transaction) to let several
//! statements talk about an entity that does not exist yet.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// First id handed out to user entities.
///
/// Ids below this value belong to schema attributes.
pub const USER_PARTITION_START: u64 = 0x1_0000;

/// Base of the transaction partition. The transaction committed at basis `t`
/// has id `TX_PARTITION_START + t`.
pub const TX_PARTITION_START: u64 = 0x1000_0000_0000;

/// Permanent, store-assigned entity identifier.
///
/// # Examples
///
/// ```
/// use tessera::Entid;
///
/// let id = Entid::new(65_536);
/// assert_eq!(id.get(), 65_536);
/// assert!(!id.is_tx());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entid(u64);

impl Entid {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Id of the transaction entity committed at basis `t`.
    #[must_use]
    pub const fn tx(t: u64) -> Self {
        Self(TX_PARTITION_START + t)
    }

    /// Returns true if this id names a transaction entity.
    #[must_use]
    pub const fn is_tx(self) -> bool {
        self.0 > TX_PARTITION_START
    }

    /// Returns true if this id lies in the user partition.
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.0 >= USER_PARTITION_START && self.0 < TX_PARTITION_START
    }

    /// For a transaction entity, the basis `t` it committed.
    #[must_use]
    pub const fn tx_t(self) -> Option<u64> {
        if self.is_tx() {
            Some(self.0 - TX_PARTITION_START)
        } else {
            None
        }
    }
}

impl fmt::Display for Entid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Entid> for u64 {
    fn from(id: Entid) -> Self {
        id.0
    }
}

/// Scope of one transaction's temporary ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxScope(Uuid);

impl TxScope {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Transaction-scoped placeholder for an entity that is not persisted yet.
///
/// A `TempId` is only obtained from [`Transaction::tempid`](crate::tx::Transaction::tempid)
/// and is meaningful only to that transaction. Handing it to a different
/// transaction is rejected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TempId {
    scope: TxScope,
    label: Arc<str>,
}

impl TempId {
    pub(crate) fn new(scope: TxScope, label: &str) -> Self {
        Self {
            scope,
            label: Arc::from(label),
        }
    }

    /// The caller-supplied label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) const fn scope(&self) -> TxScope {
        self.scope
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#tmp[{}]", self.label)
    }
}

/// The entity position of a statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// An entity already in the store.
    Entid(Entid),
    /// A not-yet-created entity of the current transaction.
    TempId(TempId),
}

impl EntityRef {
    /// Returns the temporary id, if any.
    #[must_use]
    pub const fn as_tempid(&self) -> Option<&TempId> {
        match self {
            Self::TempId(t) => Some(t),
            Self::Entid(_) => None,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entid(e) => write!(f, "{e}"),
            Self::TempId(t) => write!(f, "{t}"),
        }
    }
}

impl From<Entid> for EntityRef {
    fn from(id: Entid) -> Self {
        Self::Entid(id)
    }
}

impl From<TempId> for EntityRef {
    fn from(id: TempId) -> Self {
        Self::TempId(id)
    }
}

impl From<&TempId> for EntityRef {
    fn from(id: &TempId) -> Self {
        Self::TempId(id.clone())
    }
}
