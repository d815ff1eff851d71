//! Attribute schema.
//!
//! Every datom names its attribute by [`Entid`]. The schema maps idents such as
//! `:person/email` to those ids and records each attribute's value type,
//! cardinality and uniqueness. Attribute ids are positional: the built-in
//! attributes come first, user attributes follow in definition order.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::ident::Entid;
use crate::value::ValueType;

/// `:db/ident`: keyword name of an entity.
pub const DB_IDENT: &str = ":db/ident";
/// `:db/doc`: documentation string.
pub const DB_DOC: &str = ":db/doc";
/// `:db/txInstant`: wall-clock time of a transaction. Written by the transactor only.
pub const DB_TX_INSTANT: &str = ":db/txInstant";

/// Id of `:db/txInstant`.
pub const TX_INSTANT: Entid = Entid::new(3);

static IDENT_RE: OnceLock<Regex> = OnceLock::new();

fn ident_regex() -> &'static Regex {
    IDENT_RE.get_or_init(|| {
        Regex::new(r"^:[A-Za-z_][\w.\-]*/[A-Za-z_][\w.\-]*$").expect("ident regex compiles")
    })
}

/// Returns true if `ident` has the `:namespace/name` shape.
#[must_use]
pub fn is_valid_ident(ident: &str) -> bool {
    ident_regex().is_match(ident)
}

/// How many values an entity may hold for an attribute at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    #[default]
    One,
    Many,
}

/// Uniqueness constraint of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unique {
    /// At most one entity may hold a given value.
    Value,
    /// Like `Value`, and a tempid asserting an existing value resolves to
    /// the entity that holds it (upsert).
    Identity,
}

/// Definition of one attribute.
///
/// # Examples
///
/// ```
/// use tessera::{Attribute, Cardinality, Unique, ValueType};
///
/// let email = Attribute::new(":person/email", ValueType::String).unique(Unique::Identity);
/// assert_eq!(email.cardinality, Cardinality::One);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub ident: String,
    pub value_type: ValueType,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<Unique>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl Attribute {
    /// Creates a cardinality-one, non-unique attribute.
    #[must_use]
    pub fn new(ident: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            ident: ident.into(),
            value_type,
            cardinality: Cardinality::One,
            unique: None,
            doc: None,
        }
    }

    /// Makes the attribute cardinality-many.
    #[must_use]
    pub const fn many(mut self) -> Self {
        self.cardinality = Cardinality::Many;
        self
    }

    /// Adds a uniqueness constraint.
    #[must_use]
    pub const fn unique(mut self, unique: Unique) -> Self {
        self.unique = Some(unique);
        self
    }

    /// Adds a doc string.
    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique.is_some()
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.unique == Some(Unique::Identity)
    }
}

fn builtin_attributes() -> Vec<Attribute> {
    vec![
        Attribute::new(DB_IDENT, ValueType::Keyword).unique(Unique::Identity),
        Attribute::new(DB_DOC, ValueType::String),
        Attribute::new(DB_TX_INSTANT, ValueType::Instant),
    ]
}

/// The set of attributes a store understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    by_id: BTreeMap<Entid, Attribute>,
    by_ident: BTreeMap<String, Entid>,
    builtin_count: usize,
}

#[derive(Deserialize)]
struct SchemaDocument {
    attributes: Vec<Attribute>,
}

impl Schema {
    /// Starts a schema containing only the built-in attributes.
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Parses a JSON document of the form `{"attributes": [...]}`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Parse` for malformed JSON and the usual
    /// builder errors for invalid attributes.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let doc: SchemaDocument = serde_json::from_str(json).map_err(|e| SchemaError::Parse {
            message: e.to_string(),
        })?;
        let mut builder = Self::builder();
        for attr in doc.attributes {
            builder = builder.attribute(attr);
        }
        builder.build()
    }

    fn from_attributes(user: Vec<Attribute>) -> Result<Self, SchemaError> {
        let builtins = builtin_attributes();
        let builtin_count = builtins.len();
        let mut by_id = BTreeMap::new();
        let mut by_ident = BTreeMap::new();

        for (idx, attr) in builtins.into_iter().chain(user).enumerate() {
            if !is_valid_ident(&attr.ident) {
                return Err(SchemaError::InvalidIdent { ident: attr.ident });
            }
            if idx >= builtin_count && attr.ident.starts_with(":db/") {
                return Err(SchemaError::ReservedNamespace { ident: attr.ident });
            }
            let id = Entid::new(idx as u64 + 1);
            if by_ident.insert(attr.ident.clone(), id).is_some() {
                return Err(SchemaError::DuplicateAttribute { ident: attr.ident });
            }
            by_id.insert(id, attr);
        }

        Ok(Self {
            by_id,
            by_ident,
            builtin_count,
        })
    }

    /// Looks up an attribute by ident.
    #[must_use]
    pub fn attribute(&self, ident: &str) -> Option<(Entid, &Attribute)> {
        let id = *self.by_ident.get(ident)?;
        self.by_id.get(&id).map(|a| (id, a))
    }

    /// Looks up an attribute by id.
    #[must_use]
    pub fn attribute_by_id(&self, id: Entid) -> Option<&Attribute> {
        self.by_id.get(&id)
    }

    /// Returns the ident of an attribute id.
    #[must_use]
    pub fn ident(&self, id: Entid) -> Option<&str> {
        self.by_id.get(&id).map(|a| a.ident.as_str())
    }

    /// Returns the attribute id of an ident.
    #[must_use]
    pub fn entid(&self, ident: &str) -> Option<Entid> {
        self.by_ident.get(ident).copied()
    }

    /// Returns true if user statements may not write this attribute.
    #[must_use]
    pub fn is_reserved(&self, id: Entid) -> bool {
        id == TX_INSTANT
    }

    /// User-defined attributes in id order.
    pub fn user_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.by_id.values().skip(self.builtin_count)
    }

    /// Number of attributes, built-ins included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Checks that `self` only appends attributes to `stored`.
    ///
    /// Attribute ids are positional, so a stored attribute may not change or
    /// move.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Incompatible` describing the first difference.
    pub fn check_extends(&self, stored: &[Attribute]) -> Result<(), SchemaError> {
        let current: Vec<&Attribute> = self.user_attributes().collect();
        if current.len() < stored.len() {
            return Err(SchemaError::Incompatible {
                reason: format!(
                    "stored schema has {} user attributes, new schema has {}",
                    stored.len(),
                    current.len()
                ),
            });
        }
        for (old, new) in stored.iter().zip(current) {
            if old != new {
                return Err(SchemaError::Incompatible {
                    reason: format!("attribute {} changed or moved (found {})", old.ident, new.ident),
                });
            }
        }
        Ok(())
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::builder().build().expect("built-in attributes are valid")
    }
}

/// Builder for [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    attributes: Vec<Attribute>,
}

impl SchemaBuilder {
    /// Appends an attribute.
    #[must_use]
    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Builds the schema.
    ///
    /// # Errors
    ///
    /// Fails on malformed idents, duplicates, or attributes in the `:db`
    /// namespace.
    pub fn build(self) -> Result<Schema, SchemaError> {
        Schema::from_attributes(self.attributes)
    }
}
