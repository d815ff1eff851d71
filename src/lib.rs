//! # Tessera
//!
//! An append-only, time-indexed fact store. Writes are submitted as atomic
//! batches that may refer to entities that do not exist yet through
//! temporary ids; the transactor assigns permanent ids at commit and reports
//! the mapping.
//!
//! ## Core Concepts
//!
//! - **Datom**: one fact `[entity attribute value tx added]`
//! - **Transaction**: an ordered batch of statements, committed all-or-nothing
//! - **TempId**: a placeholder for an entity, scoped to one transaction
//! - **Db**: an immutable snapshot pinned at a basis `t`
//! - **TxReport**: before/after snapshots, applied datoms, tempid mapping
//!
//! ## Usage
//!
//! ```
//! use tessera::{
//!     resolve_tempid, Attribute, Connection, Schema, Transaction, Unique, Value, ValueType,
//! };
//!
//! let schema = Schema::builder()
//!     .attribute(Attribute::new(":person/email", ValueType::String).unique(Unique::Identity))
//!     .attribute(Attribute::new(":person/name", ValueType::String))
//!     .build()?;
//! let conn = Connection::new(schema)?;
//!
//! let mut tx = Transaction::new();
//! let user = tx.tempid("user");
//! tx.add(&user, ":person/email", "a@x.com")
//!   .add(&user, ":person/name", "A");
//! let report = conn.transact(tx)?;
//!
//! let id = resolve_tempid(&report.db_after, &report.tempids, &user)?;
//! assert_eq!(report.db_after.value(id, ":person/name")?, Some(Value::from("A")));
//! assert_eq!(report.db_before.value(id, ":person/name")?, None);
//! # Ok::<(), tessera::DbError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod datom;
pub mod db;
pub mod error;
pub mod ident;
pub mod report;
pub mod schema;
pub mod storage;
pub mod transactor;
pub mod tx;
pub mod value;

pub use config::{ConflictPolicy, PersistentConfig, StoreConfig};
pub use connection::Connection;
pub use datom::Datom;
pub use db::Db;
pub use error::{Conflict, DbError, DbResult, Rejection, SchemaError};
pub use ident::{EntityRef, Entid, TempId};
pub use report::{resolve_tempid, TempIds, TxReport};
pub use schema::{Attribute, Cardinality, Schema, Unique};
pub use storage::{StorageError, TxJournal, TxRecord};
pub use transactor::runtime::TxHandle;
pub use tx::{EntityMap, Statement, Transaction};
pub use value::{TxValue, Value, ValueType};
