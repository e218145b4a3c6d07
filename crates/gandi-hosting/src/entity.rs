//! Mapped entities.
//!
//! An [`Entity`] wraps one raw record. Fields named `<kind>_id` or
//! `<kinds>_id`, where the kind has a collection, are relationships: they are
//! resolved lazily through the owning [`crate::Hosting`] and cached on the
//! entity until its next [`Entity::refresh`]. Every other field is a plain
//! property, updatable only when the kind's [`crate::Schema`] says so.
//!
//! Entities are shared: the same [`EntityRef`] is held by a collection and by
//! every relationship that resolved to it.

use crate::schema::schema_for;
use crate::Result;
use gandi_core::value::DATETIME_FORMAT;
use gandi_core::{EntityKind, Error, Record, Value, VmState};
use gandi_xmlrpc::Gateway;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Shared handle on an entity.
pub type EntityRef = Arc<Entity>;

/// Suffix marking a relationship field.
const RELATION_SUFFIX: &str = "_id";

/// Whether a plain property can be changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read-only property
    ReadOnly,
    /// Property accepted by `update`
    Updatable,
}

/// A plain property of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Field name
    pub name: String,
    /// Access mode
    pub access: Access,
}

/// Number of entities a relationship points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// `<kind>_id`: a single identifier
    One,
    /// `<kinds>_id`: a list of identifiers
    Many,
}

/// A relationship field of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Name the relationship is resolved by (`datacenter`, `disks`)
    pub name: String,
    /// Raw field holding the identifier(s) (`datacenter_id`, `disks_id`)
    pub field: String,
    /// Kind of the related entities
    pub kind: EntityKind,
    /// Single or multi-valued
    pub cardinality: Cardinality,
}

impl Relation {
    /// Classifies `field`, returning `None` for plain fields.
    #[must_use]
    pub fn classify(field: &str) -> Option<Self> {
        let base = field.strip_suffix(RELATION_SUFFIX)?;
        if let Some(kind) = EntityKind::listed_by_name(base) {
            return Some(Self {
                name: base.to_string(),
                field: field.to_string(),
                kind,
                cardinality: Cardinality::One,
            });
        }
        EntityKind::listed_by_plural(base).map(|kind| Self {
            name: base.to_string(),
            field: field.to_string(),
            kind,
            cardinality: Cardinality::Many,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Resolved {
    One(EntityRef),
    Many(Vec<EntityRef>),
}

#[derive(Default)]
struct EntityState {
    record: Record,
    relations: BTreeMap<String, Relation>,
    resolved: BTreeMap<String, Resolved>,
}

impl EntityState {
    fn build(record: Record) -> Self {
        let relations = record
            .keys()
            .filter_map(|field| Relation::classify(field))
            .map(|relation| (relation.name.clone(), relation))
            .collect();

        Self {
            record,
            relations,
            resolved: BTreeMap::new(),
        }
    }
}

/// A local handle on one remote object.
pub struct Entity {
    kind: EntityKind,
    gateway: Arc<dyn Gateway>,
    state: RwLock<EntityState>,
}

impl Entity {
    /// Wraps `record` as an entity of `kind`.
    #[must_use]
    pub fn from_record(kind: EntityKind, gateway: Arc<dyn Gateway>, record: Record) -> Self {
        Self {
            kind,
            gateway,
            state: RwLock::new(EntityState::build(record)),
        }
    }

    /// Wraps `record` and returns a shared handle.
    #[must_use]
    pub fn new_ref(kind: EntityKind, gateway: Arc<dyn Gateway>, record: Record) -> EntityRef {
        Arc::new(Self::from_record(kind, gateway, record))
    }

    /// Fetches `<kind>.info` for `id` and wraps the result.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures; fails with [`Error::ParseError`] when the
    /// answer is not a record.
    pub async fn fetch(kind: EntityKind, gateway: Arc<dyn Gateway>, id: i64) -> Result<EntityRef> {
        let record = fetch_record(gateway.as_ref(), kind, id).await?;
        Ok(Self::new_ref(kind, gateway, record))
    }

    /// Kind of this entity.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Remote identifier.
    #[must_use]
    pub fn id(&self) -> Option<i64> {
        self.read().record.get("id").and_then(Value::as_i64)
    }

    /// Current value of `field`, relationship identifiers included.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<Value> {
        self.read().record.get(field).cloned()
    }

    /// Current value of `field` when it is a string.
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<String> {
        self.read()
            .record
            .get(field)
            .and_then(Value::as_str)
            .map(ToString::to_string)
    }

    /// Copy of the whole underlying record.
    #[must_use]
    pub fn snapshot(&self) -> Record {
        self.read().record.clone()
    }

    /// Plain properties with their access mode, relationships excluded.
    #[must_use]
    pub fn properties(&self) -> Vec<Property> {
        let schema = schema_for(self.kind);
        let state = self.read();
        state
            .record
            .keys()
            .filter(|field| Relation::classify(field).is_none())
            .map(|field| Property {
                name: field.clone(),
                access: if schema.is_updatable(field) {
                    Access::Updatable
                } else {
                    Access::ReadOnly
                },
            })
            .collect()
    }

    /// Relationships declared by the record.
    #[must_use]
    pub fn relations(&self) -> Vec<Relation> {
        self.read().relations.values().cloned().collect()
    }

    /// Relationship named `name`, if any.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<Relation> {
        self.read().relations.get(name).cloned()
    }

    /// Returns true if any searchable attribute equals `value`.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        let state = self.read();
        schema_for(self.kind)
            .searchable
            .iter()
            .any(|attr| state.record.get(*attr) == Some(value))
    }

    /// VM state, for virtual machines.
    #[must_use]
    pub fn state(&self) -> Option<VmState> {
        if self.kind != EntityKind::Vm {
            return None;
        }
        self.get_str("state").map(|state| VmState::from(state.as_str()))
    }

    /// Returns true for VMs in a usable state.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state().is_some_and(|state| state.is_valid())
    }

    /// Re-fetches the record and rebuilds every property.
    ///
    /// Resolved relationships are dropped. When the call fails the previous
    /// state is kept.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures.
    pub async fn refresh(&self) -> Result<()> {
        let id = self.require_id()?;
        let record = fetch_record(self.gateway.as_ref(), self.kind, id).await?;
        *self.write() = EntityState::build(record);
        debug!(kind = %self.kind, id, "entity refreshed");
        Ok(())
    }

    pub(crate) fn require_id(&self) -> Result<i64> {
        self.id().ok_or_else(|| {
            Error::ParseError(format!("{} record without an integer `id`", self.kind))
        })
    }

    pub(crate) fn apply_update(&self, field: &str, value: Value) {
        self.write().record.insert(field.to_string(), value);
    }

    pub(crate) fn cached(&self, name: &str) -> Option<Resolved> {
        self.read().resolved.get(name).cloned()
    }

    pub(crate) fn cache(&self, name: &str, resolved: Resolved) {
        self.write().resolved.insert(name.to_string(), resolved);
    }

    fn read(&self) -> RwLockReadGuard<'_, EntityState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntityState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn fetch_record(gateway: &dyn Gateway, kind: EntityKind, id: i64) -> Result<Record> {
    gateway
        .call(&kind.method("info"), vec![Value::Int(id)])
        .await?
        .into_record()
        .ok_or_else(|| Error::ParseError(format!("{kind}.info did not return a record")))
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &self.kind)
            .field("record", &self.read().record)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        let record = &state.record;
        let field = |name: &str| {
            record
                .get(name)
                .map_or_else(|| "-".to_string(), ToString::to_string)
        };

        match self.kind {
            EntityKind::Datacenter => write!(
                f,
                "<Datacenter {}: {}, {} ({})>",
                field("id"),
                field("name"),
                field("country"),
                field("iso")
            ),
            EntityKind::Image => write!(
                f,
                "<Image {}: {} ({}) - datacenter {} - {}>",
                field("id"),
                field("label"),
                field("os_arch"),
                field("datacenter_id"),
                field("visibility")
            ),
            EntityKind::Vm => {
                let console = record.get("console").and_then(Value::as_bool) == Some(true)
                    || record.get("console").and_then(Value::as_i64).is_some_and(|c| c != 0);
                write!(
                    f,
                    "<VM {}: {} - {}{}>",
                    field("id"),
                    field("hostname"),
                    field("state"),
                    if console { " - console on" } else { "" }
                )
            }
            EntityKind::Disk => write!(
                f,
                "<Disk {}: {} - {}>",
                field("id"),
                field("name"),
                field("label")
            ),
            EntityKind::Iface => write!(
                f,
                "<Iface {}: {} - {} - {}>",
                field("id"),
                field("bandwidth"),
                field("type"),
                field("state")
            ),
            EntityKind::Ip => write!(
                f,
                "<Ip {}: {} ({}) - {}>",
                field("id"),
                field("ip"),
                field("reverse"),
                field("state")
            ),
            EntityKind::Operation => write!(
                f,
                "<Operation {}: {} - {}>",
                field("id"),
                field("type"),
                field("step")
            ),
            EntityKind::Product => {
                let expiration = record
                    .get("date_end")
                    .and_then(Value::as_datetime)
                    .map_or_else(|| "-".to_string(), |d| d.format("%d/%m/%Y").to_string());
                write!(
                    f,
                    "<Product {}: {} {}(s) - expiration: {expiration}>",
                    field("id"),
                    field("quantity"),
                    field("product_name")
                )
            }
            EntityKind::Resource => {
                let counters: Vec<String> = [
                    "bandwidth", "cores", "disk", "ips", "memory", "servers", "shares", "slots",
                ]
                .iter()
                .filter_map(|name| record.get(*name).map(|value| format!("{name}: {value}")))
                .collect();
                write!(f, "<{} resources: {} >", field("type"), counters.join(" | "))
            }
            EntityKind::Account => write!(
                f,
                "<Account {}: {} ({})>",
                field("id"),
                field("handle"),
                field("fullname")
            ),
        }
    }
}

/// Parses a `dateTime` string field the way the service formats it.
///
/// # Errors
///
/// Returns [`Error::ParseError`] when the text does not match.
pub fn parse_datetime(text: &str) -> Result<chrono::NaiveDateTime> {
    Ok(chrono::NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)?)
}
