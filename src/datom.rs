//! Datoms: the facts recorded in the log.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ident::Entid;
use crate::value::Value;

/// One fact: entity `e` has (or no longer has) value `v` for attribute `a`,
/// as recorded by transaction `tx`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Datom {
    pub e: Entid,
    pub a: Entid,
    pub v: Value,
    pub tx: Entid,
    /// `true` for an assertion, `false` for a retraction.
    pub added: bool,
}

impl Datom {
    #[must_use]
    pub const fn assertion(e: Entid, a: Entid, v: Value, tx: Entid) -> Self {
        Self {
            e,
            a,
            v,
            tx,
            added: true,
        }
    }

    #[must_use]
    pub const fn retraction(e: Entid, a: Entid, v: Value, tx: Entid) -> Self {
        Self {
            e,
            a,
            v,
            tx,
            added: false,
        }
    }
}

impl fmt::Display for Datom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} {} {} {}]", self.e, self.a, self.v, self.tx, self.added)
    }
}
