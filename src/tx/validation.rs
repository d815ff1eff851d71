//! Static transaction checks.
//!
//! Everything that can be decided from the transaction and the schema alone
//! is checked here, before the transactor takes the log lock. Checks that
//! need the current state (entity existence, uniqueness, conflicts) live in
//! the write path.

use crate::error::Rejection;
use crate::ident::{EntityRef, Entid, TempId};
use crate::schema::{Cardinality, Schema};
use crate::tx::{Statement, Transaction};
use crate::value::{TxValue, Value};

/// A statement whose attribute has been resolved and whose types match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CheckedStatement {
    Add {
        e: EntityRef,
        a: Entid,
        v: TxValue,
    },
    Retract {
        e: Entid,
        a: Entid,
        v: Value,
    },
    Cas {
        e: Entid,
        a: Entid,
        old: Option<Value>,
        new: TxValue,
    },
    RetractEntity {
        e: Entid,
    },
}

fn check_declared(tx: &Transaction, tempid: &TempId) -> Result<(), Rejection> {
    if tx.is_declared(tempid) {
        Ok(())
    } else {
        Err(Rejection::UndeclaredTempId {
            tempid: tempid.to_string(),
        })
    }
}

fn check_ref(tx: &Transaction, e: &EntityRef) -> Result<(), Rejection> {
    match e {
        EntityRef::TempId(t) => check_declared(tx, t),
        EntityRef::Entid(_) => Ok(()),
    }
}

fn check_value(tx: &Transaction, v: &TxValue) -> Result<(), Rejection> {
    match v {
        TxValue::TempId(t) => check_declared(tx, t),
        TxValue::Value(_) => Ok(()),
    }
}

/// Retractions and compare-and-swap only make sense for existing entities.
fn permanent(e: &EntityRef) -> Result<Entid, Rejection> {
    match e {
        EntityRef::Entid(id) => Ok(*id),
        EntityRef::TempId(t) => Err(Rejection::TempIdInRetraction {
            tempid: t.to_string(),
        }),
    }
}

fn concrete(v: &TxValue) -> Result<Value, Rejection> {
    match v {
        TxValue::Value(v) => Ok(v.clone()),
        TxValue::TempId(t) => Err(Rejection::TempIdInRetraction {
            tempid: t.to_string(),
        }),
    }
}

fn resolve_attribute(schema: &Schema, ident: &str) -> Result<Entid, Rejection> {
    let Some((id, _)) = schema.attribute(ident) else {
        return Err(Rejection::UnknownAttribute {
            ident: ident.to_string(),
        });
    };
    if schema.is_reserved(id) {
        return Err(Rejection::ReservedAttribute {
            ident: ident.to_string(),
        });
    }
    Ok(id)
}

fn check_type(schema: &Schema, a: Entid, v: &TxValue) -> Result<(), Rejection> {
    let Some(attr) = schema.attribute_by_id(a) else {
        return Err(Rejection::UnknownAttribute {
            ident: a.to_string(),
        });
    };
    let actual = v.value_type();
    if actual != attr.value_type {
        return Err(Rejection::TypeMismatch {
            ident: attr.ident.clone(),
            expected: attr.value_type,
            actual,
        });
    }
    Ok(())
}

fn check_statement(
    tx: &Transaction,
    schema: &Schema,
    statement: &Statement,
) -> Result<CheckedStatement, Rejection> {
    check_ref(tx, statement.entity())?;

    match statement {
        Statement::Add { e, a, v } => {
            check_value(tx, v)?;
            let a = resolve_attribute(schema, a)?;
            check_type(schema, a, v)?;
            Ok(CheckedStatement::Add {
                e: e.clone(),
                a,
                v: v.clone(),
            })
        }
        Statement::Retract { e, a, v } => {
            check_value(tx, v)?;
            let e = permanent(e)?;
            let v_checked = concrete(v)?;
            let a = resolve_attribute(schema, a)?;
            check_type(schema, a, v)?;
            Ok(CheckedStatement::Retract { e, a, v: v_checked })
        }
        Statement::Cas { e, a, old, new } => {
            check_value(tx, new)?;
            let e = permanent(e)?;
            let a_id = resolve_attribute(schema, a)?;
            check_type(schema, a_id, new)?;
            if let Some(old) = old {
                check_type(schema, a_id, &TxValue::Value(old.clone()))?;
            }
            let cardinality = schema
                .attribute_by_id(a_id)
                .map_or(Cardinality::One, |attr| attr.cardinality);
            if cardinality == Cardinality::Many {
                return Err(Rejection::CasOnCardinalityMany { ident: a.clone() });
            }
            Ok(CheckedStatement::Cas {
                e,
                a: a_id,
                old: old.clone(),
                new: new.clone(),
            })
        }
        Statement::RetractEntity { e } => Ok(CheckedStatement::RetractEntity { e: permanent(e)? }),
    }
}

/// Checks a transaction against the schema.
///
/// Fails on the first offending statement.
pub(crate) fn validate(tx: &Transaction, schema: &Schema) -> Result<Vec<CheckedStatement>, Rejection> {
    if tx.is_empty() {
        return Err(Rejection::EmptyTransaction);
    }
    tx.statements()
        .iter()
        .map(|s| check_statement(tx, schema, s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, DB_TX_INSTANT};
    use crate::value::ValueType;

    fn schema() -> Schema {
        Schema::builder()
            .attribute(Attribute::new(":person/name", ValueType::String))
            .attribute(Attribute::new(":person/friend", ValueType::Ref).many())
            .build()
            .unwrap()
    }

    #[test]
    fn test_empty_transaction() {
        let tx = Transaction::new();
        assert_eq!(validate(&tx, &schema()), Err(Rejection::EmptyTransaction));
    }

    #[test]
    fn test_undeclared_tempid_as_entity() {
        let mut other = Transaction::new();
        let foreign = other.tempid("x");
        let mut tx = Transaction::new();
        tx.add(&foreign, ":person/name", "A");
        assert!(matches!(
            validate(&tx, &schema()),
            Err(Rejection::UndeclaredTempId { .. })
        ));
    }

    #[test]
    fn test_undeclared_tempid_as_value() {
        let mut other = Transaction::new();
        let foreign = other.tempid("x");
        let mut tx = Transaction::new();
        let me = tx.tempid("me");
        tx.add(&me, ":person/friend", &foreign);
        assert!(matches!(
            validate(&tx, &schema()),
            Err(Rejection::UndeclaredTempId { .. })
        ));
    }

    #[test]
    fn test_unknown_and_reserved_attribute() {
        let mut tx = Transaction::new();
        let e = tx.tempid("e");
        tx.add(&e, ":person/age", 3i64);
        assert!(matches!(
            validate(&tx, &schema()),
            Err(Rejection::UnknownAttribute { .. })
        ));

        let mut tx = Transaction::new();
        let e = tx.tempid("e");
        tx.add(&e, DB_TX_INSTANT, chrono::Utc::now());
        assert!(matches!(
            validate(&tx, &schema()),
            Err(Rejection::ReservedAttribute { .. })
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let mut tx = Transaction::new();
        let e = tx.tempid("e");
        tx.add(&e, ":person/name", 42i64);
        assert_eq!(
            validate(&tx, &schema()),
            Err(Rejection::TypeMismatch {
                ident: ":person/name".to_string(),
                expected: ValueType::String,
                actual: ValueType::Long,
            })
        );
    }

    #[test]
    fn test_tempid_value_needs_ref_attribute() {
        let mut tx = Transaction::new();
        let e = tx.tempid("e");
        tx.add(&e, ":person/name", &e);
        assert!(matches!(
            validate(&tx, &schema()),
            Err(Rejection::TypeMismatch { actual: ValueType::Ref, .. })
        ));
    }

    #[test]
    fn test_retract_of_tempid_rejected() {
        let mut tx = Transaction::new();
        let e = tx.tempid("e");
        tx.retract(&e, ":person/name", "A");
        assert!(matches!(
            validate(&tx, &schema()),
            Err(Rejection::TempIdInRetraction { .. })
        ));
    }

    #[test]
    fn test_cas_on_many_rejected() {
        let mut tx = Transaction::new();
        tx.cas(Entid::new(65_536), ":person/friend", None, Entid::new(65_537));
        assert!(matches!(
            validate(&tx, &schema()),
            Err(Rejection::CasOnCardinalityMany { .. })
        ));
    }

    #[test]
    fn test_valid_batch_resolves_attributes() {
        let mut tx = Transaction::new();
        let e = tx.tempid("e");
        tx.add(&e, ":person/name", "A");
        let checked = validate(&tx, &schema()).unwrap();
        let name = schema().entid(":person/name").unwrap();
        assert_eq!(
            checked,
            vec![CheckedStatement::Add {
                e: EntityRef::TempId(e),
                a: name,
                v: "A".into(),
            }]
        );
    }
}
