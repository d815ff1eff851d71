//! End-to-end tests for transaction submission and tempid resolution.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use tessera::ident::USER_PARTITION_START;
use tessera::{
    resolve_tempid, Attribute, Conflict, ConflictPolicy, Connection, DbError, EntityMap, Entid,
    Rejection, Schema, StoreConfig, Transaction, Unique, Value, ValueType,
};

fn schema() -> Schema {
    Schema::builder()
        .attribute(Attribute::new(":person/email", ValueType::String).unique(Unique::Identity))
        .attribute(Attribute::new(":person/name", ValueType::String))
        .attribute(Attribute::new(":person/age", ValueType::Long))
        .attribute(Attribute::new(":person/friend", ValueType::Ref).many())
        .attribute(Attribute::new(":person/tag", ValueType::Keyword).many())
        .build()
        .unwrap()
}

fn conn() -> Connection {
    Connection::new(schema()).unwrap()
}

fn conn_with(policy: ConflictPolicy) -> Connection {
    Connection::with_config(schema(), StoreConfig::default().with_conflict_policy(policy)).unwrap()
}

fn person(conn: &Connection, email: &str, name: &str) -> Entid {
    let mut tx = Transaction::new();
    let p = tx.tempid("p");
    tx.add_map(
        EntityMap::new(&p)
            .set(":person/email", email)
            .set(":person/name", name),
    );
    conn.transact(tx).unwrap().resolve_tempid(&p).unwrap()
}

#[test]
fn test_before_precedes_after() {
    let conn = conn();
    let mut tx = Transaction::new();
    let a = tx.tempid("a");
    tx.add(&a, ":person/name", "A");
    let first = conn.transact(tx).unwrap();
    assert!(first.db_before.basis_t() < first.db_after.basis_t());

    let mut tx = Transaction::new();
    let b = tx.tempid("b");
    tx.add(&b, ":person/name", "B");
    let second = conn.transact(tx).unwrap();
    assert_eq!(second.db_before, first.db_after);
    assert_eq!(second.db_after.basis_t(), first.db_after.basis_t() + 1);
}

#[test]
fn test_every_tempid_gets_fresh_distinct_id() {
    let conn = conn();
    let mut tx = Transaction::new();
    let ids: Vec<_> = (0..10).map(|i| tx.tempid(format!("t{i}"))).collect();
    for (i, t) in ids.iter().enumerate() {
        tx.add(t, ":person/name", format!("n{i}"));
    }
    let report = conn.transact(tx).unwrap();

    assert_eq!(report.tempids.len(), 10);
    let mut seen = HashSet::new();
    for t in &ids {
        let e = report.resolve_tempid(t).unwrap();
        assert!(e.get() >= USER_PARTITION_START);
        assert!(!report.db_before.exists(e).unwrap());
        assert!(report.db_after.exists(e).unwrap());
        assert!(seen.insert(e), "{e} assigned twice");
    }
}

#[test]
fn test_resolution_is_idempotent() {
    let conn = conn();
    let mut tx = Transaction::new();
    let a = tx.tempid("a");
    tx.add(&a, ":person/name", "A");
    let report = conn.transact(tx).unwrap();
    let first = resolve_tempid(&report.db_after, &report.tempids, &a).unwrap();
    let second = resolve_tempid(&report.db_after, &report.tempids, &a).unwrap();
    assert_eq!(first, second);
    assert_eq!(report.tempids.get_by_label("a"), Some(first));
}

#[test]
fn test_empty_transaction_rejected() {
    let conn = conn();
    let err = conn.transact(Transaction::new()).unwrap_err();
    assert!(matches!(err, DbError::Rejected(Rejection::EmptyTransaction)));
    assert!(err.is_rejection());
    assert_eq!(conn.db().unwrap().basis_t(), 0);
}

#[test]
fn test_undeclared_tempid_rejected() {
    let conn = conn();
    let mut other = Transaction::new();
    let foreign = other.tempid("x");

    let mut tx = Transaction::new();
    tx.add(&foreign, ":person/name", "X");
    let err = conn.transact(tx).unwrap_err();
    assert!(matches!(
        err,
        DbError::Rejected(Rejection::UndeclaredTempId { .. })
    ));
    assert_eq!(conn.db().unwrap().basis_t(), 0);
}

#[test]
fn test_one_tempid_many_attributes() {
    let conn = conn();
    let mut tx = Transaction::new();
    let tmp1 = tx.tempid("tmp1");
    tx.add(&tmp1, ":person/email", "a@x.com")
        .add(&tmp1, ":person/name", "A");
    let report = conn.transact(tx).unwrap();

    assert_eq!(report.tempids.len(), 1);
    let p = report.resolve_tempid(&tmp1).unwrap();
    assert_eq!(
        report.db_after.value(p, ":person/name").unwrap(),
        Some(Value::from("A"))
    );
    assert_eq!(
        report.db_after.value(p, ":person/email").unwrap(),
        Some(Value::from("a@x.com"))
    );
}

#[test]
fn test_report_from_other_transaction_is_mismatch() {
    let conn = conn();
    let mut tx = Transaction::new();
    let a = tx.tempid("a");
    tx.add(&a, ":person/name", "A");
    let first = conn.transact(tx).unwrap();

    let mut tx = Transaction::new();
    let b = tx.tempid("b");
    tx.add(&b, ":person/name", "B");
    let second = conn.transact(tx).unwrap();

    assert!(matches!(
        resolve_tempid(&second.db_after, &first.tempids, &a),
        Err(DbError::SnapshotMismatch { .. })
    ));
    assert!(matches!(
        first.resolve_tempid(&b),
        Err(DbError::UnknownTempId { .. })
    ));
}

#[test]
fn test_report_from_other_store_is_mismatch() {
    let (left, right) = (conn(), conn());
    let mut tx = Transaction::new();
    let t = tx.tempid("t");
    tx.add(&t, ":person/name", "left");
    let on_left = left.transact(tx).unwrap();

    let mut tx = Transaction::new();
    let u = tx.tempid("t");
    tx.add(&u, ":person/name", "right");
    let on_right = right.transact(tx).unwrap();

    // Same t and same allocated id, but a different store.
    assert_eq!(on_left.db_after.basis_t(), on_right.db_after.basis_t());
    assert!(matches!(
        resolve_tempid(&on_right.db_after, &on_left.tempids, &t),
        Err(DbError::SnapshotMismatch { .. })
    ));
    assert!(resolve_tempid(&on_left.db_after, &on_left.tempids, &t).is_ok());
}

#[test]
fn test_new_identity_value_claimed_twice_is_rejected() {
    let conn = conn();
    let mut tx = Transaction::new();
    let a = tx.tempid("a");
    let b = tx.tempid("b");
    // Upserts only resolve against stored entities, so two tempids claiming
    // the same new identity value do not merge.
    tx.add(&a, ":person/email", "twin@x.com")
        .add(&b, ":person/email", "twin@x.com");
    assert!(matches!(
        conn.transact(tx),
        Err(DbError::Rejected(Rejection::UniqueViolation { .. }))
    ));
    assert_eq!(conn.db().unwrap().basis_t(), 0);

    // Once stored, the value upserts as usual.
    let twin = person(&conn, "twin@x.com", "Twin");
    let mut tx = Transaction::new();
    let c = tx.tempid("c");
    tx.add(&c, ":person/email", "twin@x.com");
    assert_eq!(conn.transact(tx).unwrap().resolve_tempid(&c).unwrap(), twin);
}

#[test]
fn test_upsert_reuses_entity() {
    let conn = conn();
    let alice = person(&conn, "a@x.com", "A");

    let mut tx = Transaction::new();
    let again = tx.tempid("again");
    tx.add(&again, ":person/email", "a@x.com")
        .add(&again, ":person/age", 30i64);
    let report = conn.transact(tx).unwrap();

    assert_eq!(report.resolve_tempid(&again).unwrap(), alice);
    let entity = report.db_after.entity(alice).unwrap();
    assert_eq!(entity[":person/name"], vec![Value::from("A")]);
    assert_eq!(entity[":person/age"], vec![Value::Long(30)]);
}

#[test]
fn test_refs_between_new_entities() {
    let conn = conn();
    let mut tx = Transaction::new();
    let a = tx.tempid("a");
    let b = tx.tempid("b");
    tx.add(&a, ":person/name", "A")
        .add(&b, ":person/name", "B")
        .add(&a, ":person/friend", &b)
        .add(&b, ":person/friend", &a);
    let report = conn.transact(tx).unwrap();
    let (ea, eb) = (
        report.resolve_tempid(&a).unwrap(),
        report.resolve_tempid(&b).unwrap(),
    );
    assert_eq!(
        report.db_after.values(ea, ":person/friend").unwrap(),
        vec![Value::Ref(eb)]
    );
    assert_eq!(
        report.db_after.values(eb, ":person/friend").unwrap(),
        vec![Value::Ref(ea)]
    );
}

#[test]
fn test_cardinality_one_replaces_value() {
    let conn = conn();
    let alice = person(&conn, "a@x.com", "A");
    let mut tx = Transaction::new();
    tx.add(alice, ":person/name", "Alice");
    let report = conn.transact(tx).unwrap();

    assert_eq!(
        report.db_after.values(alice, ":person/name").unwrap(),
        vec![Value::from("Alice")]
    );
    assert_eq!(
        report.db_before.values(alice, ":person/name").unwrap(),
        vec![Value::from("A")]
    );
    assert_eq!(report.tx_data.iter().filter(|d| !d.added).count(), 1);
}

#[test]
fn test_type_mismatch_rejected() {
    let conn = conn();
    let mut tx = Transaction::new();
    let a = tx.tempid("a");
    tx.add(&a, ":person/age", "thirty");
    assert!(matches!(
        conn.transact(tx),
        Err(DbError::Rejected(Rejection::TypeMismatch { .. }))
    ));
}

#[test]
fn test_cas_conflict_is_retryable() {
    let conn = conn();
    let alice = person(&conn, "a@x.com", "A");

    let mut tx = Transaction::new();
    tx.cas(alice, ":person/name", Some(Value::from("B")), "C");
    let err = conn.transact(tx).unwrap_err();
    assert!(matches!(err, DbError::Conflict(Conflict::CasFailed { .. })));
    assert!(err.is_conflict());
    assert!(err.is_retryable());

    let mut tx = Transaction::new();
    tx.cas(alice, ":person/name", Some(Value::from("A")), "C");
    let report = conn.transact(tx).unwrap();
    assert_eq!(
        report.db_after.value(alice, ":person/name").unwrap(),
        Some(Value::from("C"))
    );
}

#[test]
fn test_serial_policy_ignores_stale_basis() {
    let conn = conn_with(ConflictPolicy::Serial);
    let alice = person(&conn, "a@x.com", "A");
    let basis = conn.db().unwrap().basis_t();

    let mut tx = Transaction::new();
    tx.add(alice, ":person/name", "B");
    conn.transact(tx).unwrap();

    let mut stale = Transaction::new().with_basis(basis);
    stale.add(alice, ":person/name", "C");
    assert!(conn.transact(stale).is_ok());
}

#[test]
fn test_entity_policy_conflicts_on_any_attribute() {
    let conn = conn_with(ConflictPolicy::Entity);
    let alice = person(&conn, "a@x.com", "A");
    let basis = conn.db().unwrap().basis_t();

    let mut tx = Transaction::new();
    tx.add(alice, ":person/name", "B");
    conn.transact(tx).unwrap();

    let mut stale = Transaction::new().with_basis(basis);
    stale.add(alice, ":person/age", 40i64);
    let err = conn.transact(stale).unwrap_err();
    assert!(matches!(
        err,
        DbError::Conflict(Conflict::EntityWritten { entid, .. }) if entid == alice
    ));
}

#[test]
fn test_attribute_policy_allows_disjoint_writes() {
    let conn = conn_with(ConflictPolicy::Attribute);
    let alice = person(&conn, "a@x.com", "A");
    let basis = conn.db().unwrap().basis_t();

    let mut tx = Transaction::new();
    tx.add(alice, ":person/name", "B");
    conn.transact(tx).unwrap();

    let mut disjoint = Transaction::new().with_basis(basis);
    disjoint.add(alice, ":person/age", 40i64);
    assert!(conn.transact(disjoint).is_ok());

    let mut overlapping = Transaction::new().with_basis(basis);
    overlapping.add(alice, ":person/name", "C");
    assert!(matches!(
        conn.transact(overlapping),
        Err(DbError::Conflict(Conflict::AttributeWritten { .. }))
    ));
}

#[test]
fn test_snapshots_never_change() {
    let conn = conn();
    let alice = person(&conn, "a@x.com", "A");
    let snapshot = conn.db().unwrap();

    let mut tx = Transaction::new();
    tx.retract_entity(alice);
    conn.transact(tx).unwrap();

    assert_eq!(
        snapshot.value(alice, ":person/name").unwrap(),
        Some(Value::from("A"))
    );
    assert!(conn.db().unwrap().entity(alice).unwrap().is_empty());
    assert_eq!(snapshot.as_of(0).unwrap().value(alice, ":person/name").unwrap(), None);
}

#[test]
fn test_concurrent_submitters_are_serialized() {
    let conn = Arc::new(conn());
    let handles: Vec<_> = (0..4)
        .map(|w| {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                (0..25)
                    .map(|i| {
                        let mut tx = Transaction::new();
                        let e = tx.tempid("e");
                        tx.add(&e, ":person/name", format!("w{w}-{i}"));
                        let report = conn.transact(tx).unwrap();
                        (report.db_before.basis_t(), report.db_after.basis_t())
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut commits: Vec<(u64, u64)> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    commits.sort_unstable();
    for (i, (before, after)) in commits.iter().enumerate() {
        assert_eq!(*before, i as u64);
        assert_eq!(*after, i as u64 + 1);
    }
    assert_eq!(conn.db().unwrap().basis_t(), 100);
}

#[test]
fn test_tx_entity_records_instant() {
    let conn = conn();
    let mut tx = Transaction::new();
    let a = tx.tempid("a");
    tx.add(&a, ":person/tag", Value::keyword(":tag/new"));
    let report = conn.transact(tx).unwrap();

    assert_eq!(report.db_after.tx_id(), Some(report.tx_id));
    assert_eq!(
        report.db_after.tx_instant().unwrap(),
        Some(report.tx_instant)
    );
    assert_eq!(
        report.db_after.value(report.tx_id, ":db/txInstant").unwrap(),
        Some(Value::Instant(report.tx_instant))
    );
    assert_eq!(report.db_after.tx_ids().collect::<Vec<_>>(), vec![report.tx_id]);
}
