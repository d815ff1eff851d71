//! Transaction batches.
//!
//! A [`Transaction`] is the atomic unit of submission: an ordered list of
//! [`Statement`]s together with the temporary ids it declared. Statements
//! may only use tempids their own transaction declared.

mod validation;

pub(crate) use validation::{validate, CheckedStatement};

use std::fmt;

use crate::ident::{EntityRef, TempId, TxScope};
use crate::value::{TxValue, Value};

/// One elementary write instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Assert `v` for attribute `a` of `e`.
    Add {
        e: EntityRef,
        a: String,
        v: TxValue,
    },
    /// Retract `v` from attribute `a` of `e`. Retracting an absent value is a no-op.
    Retract {
        e: EntityRef,
        a: String,
        v: TxValue,
    },
    /// Replace the value of a cardinality-one attribute only if it currently
    /// equals `old` (`None` means "currently unset").
    Cas {
        e: EntityRef,
        a: String,
        old: Option<Value>,
        new: TxValue,
    },
    /// Retract every current value of every attribute of `e`.
    RetractEntity {
        e: EntityRef,
    },
}

impl Statement {
    /// Returns true for statements that assert data.
    #[must_use]
    pub const fn is_assertion(&self) -> bool {
        matches!(self, Self::Add { .. } | Self::Cas { .. })
    }

    /// The entity position.
    #[must_use]
    pub const fn entity(&self) -> &EntityRef {
        match self {
            Self::Add { e, .. }
            | Self::Retract { e, .. }
            | Self::Cas { e, .. }
            | Self::RetractEntity { e } => e,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add { e, a, v } => write!(f, "[:db/add {e} {a} {v}]"),
            Self::Retract { e, a, v } => write!(f, "[:db/retract {e} {a} {v}]"),
            Self::Cas { e, a, old, new } => match old {
                Some(old) => write!(f, "[:db/cas {e} {a} {old} {new}]"),
                None => write!(f, "[:db/cas {e} {a} nil {new}]"),
            },
            Self::RetractEntity { e } => write!(f, "[:db/retractEntity {e}]"),
        }
    }
}

/// Map-like shorthand for several assertions about one entity.
///
/// [`Transaction::add_map`] flattens it into [`Statement::Add`]s.
///
/// # Examples
///
/// ```
/// use tessera::{EntityMap, Transaction};
///
/// let mut tx = Transaction::new();
/// let alice = tx.tempid("alice");
/// tx.add_map(
///     EntityMap::new(&alice)
///         .set(":person/email", "a@x.com")
///         .set(":person/name", "A"),
/// );
/// assert_eq!(tx.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct EntityMap {
    e: EntityRef,
    attrs: Vec<(String, TxValue)>,
}

impl EntityMap {
    #[must_use]
    pub fn new(e: impl Into<EntityRef>) -> Self {
        Self {
            e: e.into(),
            attrs: Vec::new(),
        }
    }

    /// Adds an attribute/value pair. Repeat the attribute for several values
    /// of a cardinality-many attribute.
    #[must_use]
    pub fn set(mut self, a: impl Into<String>, v: impl Into<TxValue>) -> Self {
        self.attrs.push((a.into(), v.into()));
        self
    }

    fn into_statements(self) -> impl Iterator<Item = Statement> {
        let e = self.e;
        self.attrs.into_iter().map(move |(a, v)| Statement::Add {
            e: e.clone(),
            a,
            v,
        })
    }
}

/// An ordered batch of statements submitted atomically.
///
/// # Examples
///
/// ```
/// use tessera::Transaction;
///
/// let mut tx = Transaction::new();
/// let user = tx.tempid("user");
/// tx.add(&user, ":person/email", "a@x.com")
///   .add(&user, ":person/name", "A");
/// assert!(tx.is_declared(&user));
/// ```
#[derive(Debug, Clone)]
pub struct Transaction {
    scope: TxScope,
    statements: Vec<Statement>,
    tempids: Vec<TempId>,
    basis_t: Option<u64>,
}

impl Transaction {
    /// Creates an empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scope: TxScope::new(),
            statements: Vec::new(),
            tempids: Vec::new(),
            basis_t: None,
        }
    }

    /// Declares a temporary id. Declaring the same label twice returns the
    /// same `TempId`.
    pub fn tempid(&mut self, label: impl AsRef<str>) -> TempId {
        let label = label.as_ref();
        if let Some(existing) = self.tempids.iter().find(|t| t.label() == label) {
            return existing.clone();
        }
        let tempid = TempId::new(self.scope, label);
        self.tempids.push(tempid.clone());
        tempid
    }

    /// Appends an assertion.
    pub fn add(
        &mut self,
        e: impl Into<EntityRef>,
        a: impl Into<String>,
        v: impl Into<TxValue>,
    ) -> &mut Self {
        self.push(Statement::Add {
            e: e.into(),
            a: a.into(),
            v: v.into(),
        })
    }

    /// Appends a retraction.
    pub fn retract(
        &mut self,
        e: impl Into<EntityRef>,
        a: impl Into<String>,
        v: impl Into<TxValue>,
    ) -> &mut Self {
        self.push(Statement::Retract {
            e: e.into(),
            a: a.into(),
            v: v.into(),
        })
    }

    /// Appends a compare-and-swap.
    pub fn cas(
        &mut self,
        e: impl Into<EntityRef>,
        a: impl Into<String>,
        old: Option<Value>,
        new: impl Into<TxValue>,
    ) -> &mut Self {
        self.push(Statement::Cas {
            e: e.into(),
            a: a.into(),
            old,
            new: new.into(),
        })
    }

    /// Appends a whole-entity retraction.
    pub fn retract_entity(&mut self, e: impl Into<EntityRef>) -> &mut Self {
        self.push(Statement::RetractEntity { e: e.into() })
    }

    /// Flattens an [`EntityMap`] into assertions.
    pub fn add_map(&mut self, map: EntityMap) -> &mut Self {
        self.statements.extend(map.into_statements());
        self
    }

    /// Appends a prebuilt statement.
    pub fn push(&mut self, statement: Statement) -> &mut Self {
        self.statements.push(statement);
        self
    }

    /// Records the basis `t` of the snapshot this transaction was built from.
    ///
    /// Under an `Entity` or `Attribute` conflict policy, the commit fails with
    /// a conflict if a later transaction wrote what this one writes.
    #[must_use]
    pub fn with_basis(mut self, basis_t: u64) -> Self {
        self.basis_t = Some(basis_t);
        self
    }

    #[must_use]
    pub const fn basis_t(&self) -> Option<u64> {
        self.basis_t
    }

    #[must_use]
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Tempids declared by this transaction, in declaration order.
    #[must_use]
    pub fn declared_tempids(&self) -> &[TempId] {
        &self.tempids
    }

    /// Returns true if `tempid` was declared by this transaction.
    #[must_use]
    pub fn is_declared(&self, tempid: &TempId) -> bool {
        tempid.scope() == self.scope && self.tempids.contains(tempid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}
