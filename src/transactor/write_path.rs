//! Transactor write path.
//!
//! Turns checked statements into the datoms of one transaction, against the
//! log state at the moment of commit:
//! 1. reserve a slot for every tempid the batch uses
//! 2. resolve upserts through unique-identity attributes
//! 3. allocate fresh ids for the remaining slots
//! 4. fold the statements into per-(entity, attribute) pending changes
//! 5. enforce uniqueness and the conflict policy
//! 6. emit retractions and assertions
//!
//! Nothing here mutates the log; a failure leaves no trace.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::config::ConflictPolicy;
use crate::datom::Datom;
use crate::error::{Conflict, DbResult, Rejection};
use crate::ident::{EntityRef, Entid, TempId};
use crate::schema::{Cardinality, Schema, TX_INSTANT};
use crate::storage::LogState;
use crate::tx::CheckedStatement;
use crate::value::{TxValue, Value};

/// Datoms and id assignments of a transaction ready to be journaled.
#[derive(Debug)]
pub(crate) struct Prepared {
    pub datoms: Vec<Datom>,
    pub tempids: BTreeMap<TempId, Entid>,
    pub next_entid: u64,
}

#[derive(Debug, Default)]
struct Pending {
    base: Vec<Value>,
    asserted: Vec<Value>,
    retracted: Vec<Value>,
}

impl Pending {
    fn removes(&self, v: &Value, cardinality: Cardinality) -> bool {
        if self.retracted.contains(v) {
            return true;
        }
        cardinality == Cardinality::One && self.asserted.first().is_some_and(|a| a != v)
    }

    /// Value a cardinality-one attribute will hold once the batch so far applies.
    fn effective_one(&self) -> Option<&Value> {
        self.asserted
            .first()
            .or_else(|| self.base.iter().find(|v| !self.retracted.contains(v)))
    }
}

struct WritePath<'a> {
    state: &'a LogState,
    schema: &'a Schema,
    basis_t: u64,
    slots: BTreeMap<TempId, Option<Entid>>,
    next_entid: u64,
    pending: HashMap<(Entid, Entid), Pending>,
    order: Vec<(Entid, Entid)>,
}

impl<'a> WritePath<'a> {
    fn new(state: &'a LogState, schema: &'a Schema) -> Self {
        let basis_t = state.basis_t();
        let next_entid = state.next_entid(basis_t);
        Self {
            state,
            schema,
            basis_t,
            slots: BTreeMap::new(),
            next_entid,
            pending: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn ident(&self, a: Entid) -> String {
        self.schema
            .ident(a)
            .map_or_else(|| a.to_string(), str::to_string)
    }

    fn cardinality(&self, a: Entid) -> Cardinality {
        self.schema
            .attribute_by_id(a)
            .map_or(Cardinality::One, |attr| attr.cardinality)
    }

    fn reserve_slots(&mut self, statements: &[CheckedStatement]) -> Vec<TempId> {
        let mut order = Vec::new();
        let mut reserve = |t: &TempId, slots: &mut BTreeMap<TempId, Option<Entid>>| {
            if !slots.contains_key(t) {
                slots.insert(t.clone(), None);
                order.push(t.clone());
            }
        };
        for s in statements {
            match s {
                CheckedStatement::Add { e, v, .. } => {
                    if let EntityRef::TempId(t) = e {
                        reserve(t, &mut self.slots);
                    }
                    if let TxValue::TempId(t) = v {
                        reserve(t, &mut self.slots);
                    }
                }
                CheckedStatement::Cas { new: TxValue::TempId(t), .. } => reserve(t, &mut self.slots),
                _ => {}
            }
        }
        order
    }

    fn resolve_upserts(&mut self, statements: &[CheckedStatement]) -> Result<(), Rejection> {
        for s in statements {
            let CheckedStatement::Add {
                e: EntityRef::TempId(t),
                a,
                v: TxValue::Value(v),
            } = s
            else {
                continue;
            };
            if !self.schema.attribute_by_id(*a).is_some_and(|attr| attr.is_identity()) {
                continue;
            }
            let Some(owner) = self.state.owner_of(*a, v, self.basis_t) else {
                continue;
            };
            match self.slots.get(t).copied().flatten() {
                None => {
                    self.slots.insert(t.clone(), Some(owner));
                }
                Some(first) if first != owner => {
                    return Err(Rejection::ConflictingUpsert {
                        tempid: t.to_string(),
                        first,
                        second: owner,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn allocate(&mut self, order: &[TempId]) {
        for t in order {
            if let Some(slot) = self.slots.get_mut(t) {
                if slot.is_none() {
                    *slot = Some(Entid::new(self.next_entid));
                    self.next_entid += 1;
                }
            }
        }
    }

    fn entity(&self, e: &EntityRef) -> Result<Entid, Rejection> {
        match e {
            // New entities are only reachable through their tempid.
            EntityRef::Entid(id) => {
                if self.state.entity_exists(*id, self.basis_t) {
                    Ok(*id)
                } else {
                    Err(Rejection::UnknownEntity { entid: *id })
                }
            }
            EntityRef::TempId(t) => self.slots.get(t).copied().flatten().ok_or_else(|| {
                Rejection::UndeclaredTempId {
                    tempid: t.to_string(),
                }
            }),
        }
    }

    fn value(&self, v: &TxValue) -> Result<Value, Rejection> {
        match v {
            TxValue::Value(Value::Ref(target)) => {
                self.entity(&EntityRef::Entid(*target))?;
                Ok(Value::Ref(*target))
            }
            TxValue::Value(v) => Ok(v.clone()),
            TxValue::TempId(t) => Ok(Value::Ref(self.entity(&EntityRef::TempId(t.clone()))?)),
        }
    }

    fn pending(&mut self, e: Entid, a: Entid) -> &mut Pending {
        let state = self.state;
        let basis_t = self.basis_t;
        let order = &mut self.order;
        self.pending.entry((e, a)).or_insert_with(|| {
            order.push((e, a));
            Pending {
                base: state.current_values(e, a, basis_t),
                ..Pending::default()
            }
        })
    }

    fn add(&mut self, e: Entid, a: Entid, v: Value) -> Result<(), Rejection> {
        let cardinality = self.cardinality(a);
        let conflict = Rejection::DatomConflict {
            entid: e,
            ident: self.ident(a),
        };
        let p = self.pending(e, a);
        if p.asserted.contains(&v) {
            return Ok(());
        }
        if p.retracted.contains(&v) {
            return Err(conflict);
        }
        if cardinality == Cardinality::One && !p.asserted.is_empty() {
            return Err(conflict);
        }
        p.asserted.push(v);
        Ok(())
    }

    fn retract(&mut self, e: Entid, a: Entid, v: Value) -> Result<(), Rejection> {
        let conflict = Rejection::DatomConflict {
            entid: e,
            ident: self.ident(a),
        };
        let p = self.pending(e, a);
        if p.asserted.contains(&v) {
            return Err(conflict);
        }
        if !p.retracted.contains(&v) {
            p.retracted.push(v);
        }
        Ok(())
    }

    fn cas(&mut self, e: Entid, a: Entid, old: Option<&Value>, new: Value) -> DbResult<()> {
        let ident = self.ident(a);
        let found = self.pending(e, a).effective_one().cloned();
        if found.as_ref() != old {
            return Err(Conflict::CasFailed {
                entid: e,
                ident,
                expected: old.map_or_else(|| "nil".to_string(), Value::to_string),
                found: found.map_or_else(|| "nil".to_string(), |v| v.to_string()),
            }
            .into());
        }
        Ok(self.add(e, a, new)?)
    }

    fn retract_entity(&mut self, e: Entid) -> Result<(), Rejection> {
        for (a, values) in self.state.current_attributes(e, self.basis_t) {
            for v in values {
                self.retract(e, a, v)?;
            }
        }
        Ok(())
    }

    fn apply(&mut self, statements: &[CheckedStatement]) -> DbResult<()> {
        for s in statements {
            match s {
                CheckedStatement::Add { e, a, v } => {
                    let e = self.entity(e)?;
                    let v = self.value(v)?;
                    self.add(e, *a, v)?;
                }
                CheckedStatement::Retract { e, a, v } => {
                    let e = self.entity(&EntityRef::Entid(*e))?;
                    self.retract(e, *a, v.clone())?;
                }
                CheckedStatement::Cas { e, a, old, new } => {
                    let e = self.entity(&EntityRef::Entid(*e))?;
                    let new = self.value(new)?;
                    self.cas(e, *a, old.as_ref(), new)?;
                }
                CheckedStatement::RetractEntity { e } => {
                    let e = self.entity(&EntityRef::Entid(*e))?;
                    self.retract_entity(e)?;
                }
            }
        }
        Ok(())
    }

    fn check_unique(&self) -> Result<(), Rejection> {
        let mut claimed: HashMap<(Entid, &Value), Entid> = HashMap::new();
        for &(e, a) in &self.order {
            let Some(attr) = self.schema.attribute_by_id(a) else {
                continue;
            };
            if !attr.is_unique() {
                continue;
            }
            let p = &self.pending[&(e, a)];
            for v in p.asserted.iter().filter(|v| !p.base.contains(v)) {
                if let Some(&other) = claimed.get(&(a, v)) {
                    if other != e {
                        return Err(Rejection::UniqueViolation {
                            ident: attr.ident.clone(),
                            value: v.to_string(),
                            owner: other,
                        });
                    }
                }
                claimed.insert((a, v), e);

                let Some(owner) = self.state.owner_of(a, v, self.basis_t) else {
                    continue;
                };
                if owner == e {
                    continue;
                }
                let released = self
                    .pending
                    .get(&(owner, a))
                    .is_some_and(|op| op.removes(v, attr.cardinality));
                if !released {
                    return Err(Rejection::UniqueViolation {
                        ident: attr.ident.clone(),
                        value: v.to_string(),
                        owner,
                    });
                }
            }
        }
        Ok(())
    }

    fn emit(&self, tx_id: Entid, instant: DateTime<Utc>) -> Vec<Datom> {
        let mut datoms = vec![Datom::assertion(tx_id, TX_INSTANT, Value::Instant(instant), tx_id)];
        for &(e, a) in &self.order {
            let p = &self.pending[&(e, a)];
            let cardinality = self.cardinality(a);
            for v in p.base.iter().filter(|v| p.removes(v, cardinality)) {
                datoms.push(Datom::retraction(e, a, v.clone(), tx_id));
            }
            for v in p.asserted.iter().filter(|v| !p.base.contains(v)) {
                datoms.push(Datom::assertion(e, a, v.clone(), tx_id));
            }
        }
        datoms
    }

    fn check_conflicts(
        &self,
        policy: ConflictPolicy,
        basis: u64,
        datoms: &[Datom],
    ) -> Result<(), Conflict> {
        if policy == ConflictPolicy::Serial {
            return Ok(());
        }
        let entities: HashSet<Entid> = datoms.iter().skip(1).map(|d| d.e).collect();
        let keys: HashSet<(Entid, Entid)> = datoms.iter().skip(1).map(|d| (d.e, d.a)).collect();

        for (meta, written) in self.state.since(basis) {
            for d in written.iter().filter(|d| d.e != meta.tx_id) {
                match policy {
                    ConflictPolicy::Entity if entities.contains(&d.e) => {
                        return Err(Conflict::EntityWritten {
                            entid: d.e,
                            t: meta.t,
                            basis_t: basis,
                        });
                    }
                    ConflictPolicy::Attribute if keys.contains(&(d.e, d.a)) => {
                        return Err(Conflict::AttributeWritten {
                            entid: d.e,
                            ident: self.ident(d.a),
                            t: meta.t,
                            basis_t: basis,
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

/// Resolves a checked batch into the datoms of transaction `tx_id`.
///
/// # Errors
///
/// - `Rejected` for batches that are invalid against the current state
/// - `Conflict` for failed compare-and-swap or writes that overlap a
///   transaction committed after the batch's basis
pub(crate) fn prepare(
    statements: &[CheckedStatement],
    basis: Option<u64>,
    state: &LogState,
    schema: &Schema,
    policy: ConflictPolicy,
    tx_id: Entid,
    instant: DateTime<Utc>,
) -> DbResult<Prepared> {
    if let Some(basis_t) = basis {
        if basis_t > state.basis_t() {
            return Err(Rejection::BasisInFuture {
                basis_t,
                current_t: state.basis_t(),
            }
            .into());
        }
    }

    let mut wp = WritePath::new(state, schema);
    let order = wp.reserve_slots(statements);
    wp.resolve_upserts(statements)?;
    wp.allocate(&order);
    wp.apply(statements)?;
    wp.check_unique()?;

    let datoms = wp.emit(tx_id, instant);
    if let Some(basis_t) = basis {
        wp.check_conflicts(policy, basis_t, &datoms)?;
    }

    let tempids = wp
        .slots
        .iter()
        .filter_map(|(t, e)| e.map(|e| (t.clone(), e)))
        .collect();

    Ok(Prepared {
        datoms,
        tempids,
        next_entid: wp.next_entid,
    })
}
