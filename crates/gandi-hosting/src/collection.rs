//! Cached per-kind collections.

use crate::entity::{Entity, EntityRef};
use crate::Result;
use gandi_core::{EntityKind, Error, Value};
use gandi_xmlrpc::Gateway;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tracing::info;

/// How to pick entities out of a [`Collection`].
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Element at a position
    Position(usize),
    /// Elements in a range of positions
    Range(Range<usize>),
    /// First element whose searchable attributes contain the value
    Value(Value),
}

impl From<usize> for Lookup {
    fn from(position: usize) -> Self {
        Self::Position(position)
    }
}

impl From<Range<usize>> for Lookup {
    fn from(range: Range<usize>) -> Self {
        Self::Range(range)
    }
}

impl From<Value> for Lookup {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Lookup {
    fn from(value: &str) -> Self {
        Self::Value(Value::from(value))
    }
}

/// Result of a [`Lookup`].
#[derive(Debug, Clone, Copy)]
pub enum Selection<'a> {
    /// Positional or searchable lookup
    One(Option<&'a EntityRef>),
    /// Range lookup
    Many(&'a [EntityRef]),
}

impl<'a> Selection<'a> {
    /// The single element, if the lookup selected one.
    #[must_use]
    pub fn one(self) -> Option<&'a EntityRef> {
        match self {
            Self::One(entity) => entity,
            Self::Many(_) => None,
        }
    }

    /// The selected elements.
    #[must_use]
    pub fn many(self) -> &'a [EntityRef] {
        match self {
            Self::One(Some(entity)) => std::slice::from_ref(entity),
            Self::One(None) => &[],
            Self::Many(entities) => entities,
        }
    }
}

/// Ordered list of the entities of one kind, as returned by `<kind>.list`.
pub struct Collection {
    kind: EntityKind,
    gateway: Arc<dyn Gateway>,
    items: Vec<EntityRef>,
}

impl Collection {
    /// Lists every entity of `kind`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Unsupported`] for kinds without a list call and
    /// propagates gateway failures.
    pub async fn load(kind: EntityKind, gateway: Arc<dyn Gateway>) -> Result<Self> {
        let items = list(kind, &gateway).await?;
        info!(kind = %kind, count = items.len(), "collection loaded");
        Ok(Self {
            kind,
            gateway,
            items,
        })
    }

    /// Re-lists the collection, dropping entities that disappeared.
    ///
    /// The previous contents are kept when the call fails.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures.
    pub async fn refresh(&mut self) -> Result<()> {
        self.items = list(self.kind, &self.gateway).await?;
        info!(kind = %self.kind, count = self.items.len(), "collection refreshed");
        Ok(())
    }

    /// Kind of the elements.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Elements in listing order.
    pub fn iter(&self) -> std::slice::Iter<'_, EntityRef> {
        self.items.iter()
    }

    /// Element at `position`.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&EntityRef> {
        self.items.get(position)
    }

    /// Elements in `range`, clamped to the collection bounds.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> &[EntityRef] {
        let end = range.end.min(self.items.len());
        let start = range.start.min(end);
        &self.items[start..end]
    }

    /// First element, in order, for which any searchable attribute equals
    /// `value`.
    #[must_use]
    pub fn find(&self, value: &Value) -> Option<&EntityRef> {
        self.items.iter().find(|entity| entity.matches(value))
    }

    /// Element with the given remote identifier.
    #[must_use]
    pub fn find_by_id(&self, id: i64) -> Option<&EntityRef> {
        self.items.iter().find(|entity| entity.id() == Some(id))
    }

    /// Applies a [`Lookup`].
    #[must_use]
    pub fn lookup(&self, lookup: &Lookup) -> Selection<'_> {
        match lookup {
            Lookup::Position(position) => Selection::One(self.get(*position)),
            Lookup::Range(range) => Selection::Many(self.slice(range.clone())),
            Lookup::Value(value) => Selection::One(self.find(value)),
        }
    }

    pub(crate) fn push(&mut self, entity: EntityRef) {
        self.items.push(entity);
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("kind", &self.kind)
            .field("items", &self.items)
            .finish_non_exhaustive()
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a EntityRef;
    type IntoIter = std::slice::Iter<'a, EntityRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

async fn list(kind: EntityKind, gateway: &Arc<dyn Gateway>) -> Result<Vec<EntityRef>> {
    if !kind.is_listed() {
        return Err(Error::Unsupported {
            kind,
            operation: "list",
        });
    }

    let answer = gateway.call(&kind.method("list"), Vec::new()).await?;
    let Value::Array(values) = answer else {
        return Err(Error::ParseError(format!(
            "{kind}.list returned {}, expected an array",
            answer.type_name()
        )));
    };

    values
        .into_iter()
        .map(|value| match value {
            Value::Struct(record) => Ok(Entity::new_ref(kind, Arc::clone(gateway), record)),
            other => Err(Error::ParseError(format!(
                "{kind}.list returned a {} element",
                other.type_name()
            ))),
        })
        .collect()
}
