//! Client facade.
//!
//! [`Hosting`] owns the gateway, one lazily listed [`Collection`] per kind,
//! the [`OperationLog`] and the [`Account`] view. Every create, update,
//! delete and action goes through it so that the resulting operation is
//! logged, polled to completion and followed by the matching cache refresh.

use crate::account::Account;
use crate::collection::Collection;
use crate::entity::{Cardinality, Entity, EntityRef, Relation, Resolved};
use crate::operation::{Operation, OperationLog, DEFAULT_POLL_INTERVAL};
use crate::schema::{schema_for, DeleteHook};
use crate::Result;
use gandi_core::config::HostingConfig;
use gandi_core::ids::{DatacenterId, DiskId, IfaceId, ImageId, IpId, VmId};
use gandi_core::{EntityKind, Error, Record, Step, Value, VmState};
use gandi_xmlrpc::{Gateway, XmlRpcClientBuilder};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a creation.
#[derive(Debug, Clone)]
pub enum Created {
    /// The operation completed and the new entity was fetched.
    Entity(EntityRef),
    /// The operation ended in another step; nothing was fetched.
    Failed(Step),
}

impl Created {
    /// The new entity, if any.
    #[must_use]
    pub fn entity(&self) -> Option<&EntityRef> {
        match self {
            Self::Entity(entity) => Some(entity),
            Self::Failed(_) => None,
        }
    }

    /// Consumes the outcome, keeping the new entity.
    #[must_use]
    pub fn into_entity(self) -> Option<EntityRef> {
        match self {
            Self::Entity(entity) => Some(entity),
            Self::Failed(_) => None,
        }
    }

    /// Final step of the creation operation.
    #[must_use]
    pub fn step(&self) -> Step {
        match self {
            Self::Entity(_) => Step::Done,
            Self::Failed(step) => step.clone(),
        }
    }
}

/// Entry point of the object mapper.
///
/// A facade assumes a single caller: every method that may reach the remote
/// service takes `&mut self`.
pub struct Hosting {
    gateway: Arc<dyn Gateway>,
    collections: BTreeMap<EntityKind, Collection>,
    operations: OperationLog,
    account: Account,
    config: Option<HostingConfig>,
    poll_interval: Duration,
    wait_timeout: Option<Duration>,
}

impl Hosting {
    /// Creates a facade over `gateway`. Nothing is fetched until first use.
    #[must_use]
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            account: Account::new(Arc::clone(&gateway)),
            gateway,
            collections: BTreeMap::new(),
            operations: OperationLog::new(),
            config: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: None,
        }
    }

    /// Builds an XML-RPC backed facade from a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, is invalid or has no
    /// `hosting.key`.
    pub fn from_config(path: impl AsRef<Path>) -> Result<Self> {
        let config = HostingConfig::from_file(path)?;
        let client = XmlRpcClientBuilder::from_config(&config)?.build()?;
        info!(uri = config.uri(), "hosting client configured");
        Ok(Self::new(Arc::new(client)).with_config(config))
    }

    /// Attaches a configuration, readable through [`Hosting::get_option`].
    #[must_use]
    pub fn with_config(mut self, config: HostingConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the delay between two operation polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bounds every operation wait; unbounded by default.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Replaces the operation log, e.g. with a bounded one.
    #[must_use]
    pub fn with_operation_log(mut self, log: OperationLog) -> Self {
        self.operations = log;
        self
    }

    /// Attached configuration.
    #[must_use]
    pub const fn config(&self) -> Option<&HostingConfig> {
        self.config.as_ref()
    }

    /// Reads `option` from `section` of the attached configuration.
    #[must_use]
    pub fn get_option(&self, section: &str, option: &str) -> Option<&toml::Value> {
        self.config
            .as_ref()
            .and_then(|config| config.get_option(section, option))
    }

    /// Underlying gateway.
    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    /// Issues a raw call.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.gateway.call(method, args).await
    }

    /// Operations issued through this facade, oldest first.
    #[must_use]
    pub const fn operations(&self) -> &OperationLog {
        &self.operations
    }

    /// Account view.
    pub fn account(&mut self) -> &mut Account {
        &mut self.account
    }

    /// Collection of `kind`, listed on first access and cached afterwards.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Unsupported`] for kinds without a collection and
    /// propagates gateway failures.
    pub async fn container(&mut self, kind: EntityKind) -> Result<&mut Collection> {
        if !kind.is_listed() {
            return Err(Error::Unsupported {
                kind,
                operation: "list",
            });
        }

        let gateway = Arc::clone(&self.gateway);
        match self.collections.entry(kind) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let collection = Collection::load(kind, gateway).await?;
                Ok(entry.insert(collection))
            }
        }
    }

    /// Collection of `kind` if it was already listed.
    #[must_use]
    pub fn collection(&self, kind: EntityKind) -> Option<&Collection> {
        self.collections.get(&kind)
    }

    /// Re-lists the collection of `kind`, or lists it for the first time.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures.
    pub async fn refresh_collection(&mut self, kind: EntityKind) -> Result<()> {
        match self.collections.get_mut(&kind) {
            Some(collection) => collection.refresh().await,
            None => self.container(kind).await.map(|_| ()),
        }
    }

    /// Scans the collection of `kind` for the entity with identifier `id`.
    ///
    /// # Errors
    ///
    /// Propagates listing failures.
    pub async fn get_by_id(&mut self, kind: EntityKind, id: i64) -> Result<Option<EntityRef>> {
        Ok(self.container(kind).await?.find_by_id(id).cloned())
    }

    /// Resolves the single relationship `name` of `entity`.
    ///
    /// Returns `None` when the identifier is not in the related collection.
    /// A resolved entity is cached until the next [`Entity::refresh`].
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownRelation`] when `entity` has no such field,
    /// with [`Error::InvalidRequest`] when it is multi-valued, and propagates
    /// listing failures.
    pub async fn related(&mut self, entity: &Entity, name: &str) -> Result<Option<EntityRef>> {
        let relation = relation_of(entity, name, Cardinality::One)?;
        if let Some(Resolved::One(cached)) = entity.cached(name) {
            return Ok(Some(cached));
        }

        let Some(id) = entity.get(&relation.field).as_ref().and_then(Value::as_i64) else {
            return Ok(None);
        };

        let found = self.get_by_id(relation.kind, id).await?;
        if let Some(found) = &found {
            entity.cache(name, Resolved::One(Arc::clone(found)));
        }
        Ok(found)
    }

    /// Resolves the multi-valued relationship `name` of `entity`.
    ///
    /// Identifiers missing from the related collection are omitted; `None`
    /// stands for an empty result.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownRelation`] when `entity` has no such field,
    /// with [`Error::InvalidRequest`] when it is single-valued, and propagates
    /// listing failures.
    pub async fn related_many(
        &mut self,
        entity: &Entity,
        name: &str,
    ) -> Result<Option<Vec<EntityRef>>> {
        let relation = relation_of(entity, name, Cardinality::Many)?;
        if let Some(Resolved::Many(cached)) = entity.cached(name) {
            return Ok(Some(cached));
        }

        let ids: Vec<i64> = entity
            .get(&relation.field)
            .as_ref()
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();

        let collection = self.container(relation.kind).await?;
        let found: Vec<EntityRef> = ids
            .iter()
            .filter_map(|id| collection.find_by_id(*id).cloned())
            .collect();

        if found.is_empty() {
            return Ok(None);
        }
        entity.cache(name, Resolved::Many(found.clone()));
        Ok(Some(found))
    }

    /// Creates an entity of `kind`.
    ///
    /// Every mandatory creation field must be present; fields outside the
    /// kind's creation spec are dropped. On `DONE` the new entity is fetched
    /// and the collection re-listed. Any other final step is reported as
    /// [`Created::Failed`].
    ///
    /// # Errors
    ///
    /// Fails before any remote call with [`Error::Unsupported`] or
    /// [`Error::MissingField`], and propagates gateway failures.
    pub async fn create(&mut self, kind: EntityKind, fields: Record) -> Result<Created> {
        let schema = schema_for(kind);
        if !schema.mutable {
            return Err(Error::Unsupported {
                kind,
                operation: "create",
            });
        }
        if let Some(field) = schema.mandatory_fields().find(|field| !fields.contains_key(*field)) {
            return Err(Error::MissingField {
                kind,
                field: field.to_string(),
            });
        }

        let spec: Record = fields
            .into_iter()
            .filter(|(field, _)| schema.accepts_on_create(field))
            .collect();

        let operation = self.run(&kind.method("create"), vec![Value::Struct(spec)]).await?;
        let step = operation.step();
        if !step.is_done() {
            return Ok(Created::Failed(step));
        }

        let id = target_of(&operation, kind)?;
        let entity = Entity::fetch(kind, Arc::clone(&self.gateway), id).await?;
        self.refresh_collection(kind).await?;
        info!(kind = %kind, id, "entity created");
        Ok(Created::Entity(entity))
    }

    /// Updates `fields` of `entity` and returns the final step.
    ///
    /// The local copy is left untouched; see [`Hosting::set`].
    ///
    /// # Errors
    ///
    /// Fails before any remote call with [`Error::NotUpdatable`] or
    /// [`Error::Unsupported`], and propagates gateway failures.
    pub async fn update(&mut self, entity: &Entity, fields: Record) -> Result<Step> {
        let kind = entity.kind();
        let schema = schema_for(kind);
        if !schema.mutable {
            return Err(Error::Unsupported {
                kind,
                operation: "update",
            });
        }
        if let Some(field) = fields.keys().find(|field| !schema.is_updatable(field)) {
            return Err(Error::NotUpdatable {
                kind,
                field: field.clone(),
            });
        }

        let id = entity.require_id()?;
        let operation = self
            .run(&kind.method("update"), vec![Value::Int(id), Value::Struct(fields)])
            .await?;
        Ok(operation.step())
    }

    /// Sets one property and returns the final step.
    ///
    /// The local value changes only when the update reaches `DONE`; any other
    /// step leaves it as it was and is returned for the caller to inspect.
    ///
    /// # Errors
    ///
    /// Same as [`Hosting::update`].
    pub async fn set(&mut self, entity: &Entity, field: &str, value: Value) -> Result<Step> {
        let mut fields = Record::new();
        fields.insert(field.to_string(), value.clone());

        let step = self.update(entity, fields).await?;
        if step.is_done() {
            entity.apply_update(field, value);
        }
        Ok(step)
    }

    /// Deletes `entity` and returns the final step.
    ///
    /// A running VM is stopped first. On `DONE` the collection is re-listed.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Unsupported`] for read-only kinds and propagates
    /// gateway failures.
    pub async fn delete(&mut self, entity: &Entity) -> Result<Step> {
        let kind = entity.kind();
        let schema = schema_for(kind);
        if !schema.mutable {
            return Err(Error::Unsupported {
                kind,
                operation: "delete",
            });
        }
        let id = entity.require_id()?;

        if let Some(DeleteHook::StopIfRunning) = schema.delete_hook {
            entity.refresh().await?;
            if entity.state() == Some(VmState::Running) {
                debug!(kind = %kind, id, "stopping before delete");
                self.action(entity, "stop").await?;
            }
        }

        let step = self
            .run(&kind.method("delete"), vec![Value::Int(id)])
            .await?
            .step();
        if step.is_done() {
            self.refresh_collection(kind).await?;
            info!(kind = %kind, id, "entity deleted");
        }
        Ok(step)
    }

    /// Runs the `verb` action of `entity`, then refreshes it.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidRequest`] when the kind has no such action,
    /// and propagates gateway failures.
    pub async fn action(&mut self, entity: &Entity, verb: &str) -> Result<Step> {
        let kind = entity.kind();
        if !schema_for(kind).has_action(verb) {
            return Err(Error::InvalidRequest(format!("{kind} has no `{verb}` action")));
        }
        let id = entity.require_id()?;

        let step = self.run(&kind.method(verb), vec![Value::Int(id)]).await?.step();
        entity.refresh().await?;
        Ok(step)
    }

    /// Starts a VM.
    ///
    /// # Errors
    ///
    /// See [`Hosting::action`].
    pub async fn start(&mut self, vm: &Entity) -> Result<Step> {
        self.action(vm, "start").await
    }

    /// Stops a VM.
    ///
    /// # Errors
    ///
    /// See [`Hosting::action`].
    pub async fn stop(&mut self, vm: &Entity) -> Result<Step> {
        self.action(vm, "stop").await
    }

    /// Reboots a VM.
    ///
    /// # Errors
    ///
    /// See [`Hosting::action`].
    pub async fn reboot(&mut self, vm: &Entity) -> Result<Step> {
        self.action(vm, "reboot").await
    }

    /// Creates a disk named `name` from `image`, in the image's datacenter.
    ///
    /// On `DONE` the new disk is fetched and appended to the disk collection
    /// without re-listing it, unless the collection already holds it (as it
    /// does when this call lists the disks for the first time).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidRequest`] when `image` is not an image,
    /// with [`Error::MissingField`] when it lacks `datacenter_id` or
    /// `disk_id`, and propagates gateway failures.
    pub async fn copy_image_as(
        &mut self,
        image: &Entity,
        name: &str,
        repulse_from: Option<Value>,
    ) -> Result<Created> {
        if image.kind() != EntityKind::Image {
            return Err(Error::InvalidRequest(format!(
                "cannot copy a {} as a disk",
                image.kind()
            )));
        }
        let required = |field: &str| {
            image.get(field).ok_or_else(|| Error::MissingField {
                kind: EntityKind::Image,
                field: field.to_string(),
            })
        };

        let mut spec = Record::new();
        spec.insert("datacenter_id".to_string(), required("datacenter_id")?);
        spec.insert("name".to_string(), Value::from(name));
        if let Some(repulse_from) = repulse_from {
            spec.insert("repulse_from".to_string(), repulse_from);
        }
        let disk_id = required("disk_id")?;

        let operation = self
            .run(
                &EntityKind::Disk.method("create_from"),
                vec![Value::Struct(spec), disk_id],
            )
            .await?;
        let step = operation.step();
        if !step.is_done() {
            return Ok(Created::Failed(step));
        }

        let id = target_of(&operation, EntityKind::Disk)?;
        let gateway = Arc::clone(&self.gateway);
        let disks = self.container(EntityKind::Disk).await?;
        let disk = match disks.find_by_id(id).cloned() {
            Some(listed) => listed,
            None => {
                let disk = Entity::fetch(EntityKind::Disk, gateway, id).await?;
                disks.push(Arc::clone(&disk));
                disk
            }
        };
        info!(id, name, "image copied to disk");
        Ok(Created::Entity(disk))
    }

    /// Issues a mutating call, logs the returned operation and waits for it.
    async fn run(&mut self, method: &str, args: Vec<Value>) -> Result<Arc<Operation>> {
        let raw = self.gateway.call(method, args).await?;
        let record = raw.into_record().ok_or_else(|| {
            Error::ParseError(format!("{method} did not return an operation"))
        })?;

        let operation = Arc::new(Operation::from_record(Arc::clone(&self.gateway), record));
        self.operations.push(Arc::clone(&operation));
        debug!(method, id = ?operation.id(), step = %operation.step(), "operation started");

        let step = operation
            .wait_completion(self.wait_timeout, self.poll_interval)
            .await?;
        if step.is_done() {
            info!(method, id = ?operation.id(), "operation done");
        } else {
            warn!(method, id = ?operation.id(), step = %step, "operation did not complete");
        }
        Ok(operation)
    }
}

macro_rules! kind_accessors {
    ($($plural:ident, $by_id:ident, $id:ty => $kind:ident;)*) => {
        impl Hosting {
            $(
                #[doc = concat!("Cached `", stringify!($plural), "` collection, listed on first access.")]
                ///
                /// # Errors
                ///
                /// Propagates listing failures.
                pub async fn $plural(&mut self) -> Result<&Collection> {
                    self.container(EntityKind::$kind).await.map(|collection| &*collection)
                }

                #[doc = concat!("Looks up one of the `", stringify!($plural), "` by identifier.")]
                ///
                /// # Errors
                ///
                /// Propagates listing failures.
                pub async fn $by_id(&mut self, id: $id) -> Result<Option<EntityRef>> {
                    self.get_by_id(EntityKind::$kind, id.get()).await
                }
            )*
        }
    };
}

kind_accessors! {
    datacenters, get_datacenter_by_id, DatacenterId => Datacenter;
    images, get_image_by_id, ImageId => Image;
    vms, get_vm_by_id, VmId => Vm;
    disks, get_disk_by_id, DiskId => Disk;
    ifaces, get_iface_by_id, IfaceId => Iface;
    ips, get_ip_by_id, IpId => Ip;
}

fn relation_of(entity: &Entity, name: &str, cardinality: Cardinality) -> Result<Relation> {
    let relation = entity.relation(name).ok_or_else(|| Error::UnknownRelation {
        kind: entity.kind(),
        name: name.to_string(),
    })?;

    if relation.cardinality != cardinality {
        let expected = match relation.cardinality {
            Cardinality::One => "single-valued",
            Cardinality::Many => "multi-valued",
        };
        return Err(Error::InvalidRequest(format!(
            "`{name}` of {} is {expected}",
            entity.kind()
        )));
    }
    Ok(relation)
}

fn target_of(operation: &Operation, kind: EntityKind) -> Result<i64> {
    operation.target_id(kind).ok_or_else(|| {
        Error::ParseError(format!(
            "operation {:?} carries no `{}_id`",
            operation.id(),
            kind.name()
        ))
    })
}

impl fmt::Debug for Hosting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hosting")
            .field("collections", &self.collections)
            .field("operations", &self.operations)
            .field("account", &self.account)
            .field("poll_interval", &self.poll_interval)
            .field("wait_timeout", &self.wait_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{record, value, ScriptedGateway};
    use async_trait::async_trait;
    use mockall::mock;
    use serde_json::json;
    use std::io::Write;

    mock! {
        Remote {}

        #[async_trait]
        impl Gateway for Remote {
            async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value>;
        }
    }

    fn silent_remote() -> Arc<MockRemote> {
        let mut remote = MockRemote::new();
        remote.expect_call().times(0);
        Arc::new(remote)
    }

    fn vm(gateway: Arc<dyn Gateway>) -> EntityRef {
        Entity::new_ref(
            EntityKind::Vm,
            gateway,
            record(json!({
                "id": 11,
                "hostname": "web01",
                "state": "running",
                "memory": 256,
                "datacenter_id": 1,
                "disks_id": [21, 99]
            })),
        )
    }

    fn done(id: i64) -> serde_json::Value {
        json!({"id": id, "step": "DONE"})
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_applies_value_when_done() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("vm.update", json!({"id": 100, "step": "WAIT"}));
        gateway.respond_json("operation.info", done(100));

        let mut hosting = Hosting::new(gateway.clone());
        let vm = vm(gateway.clone());
        let step = hosting.set(&vm, "memory", Value::Int(1024)).await.unwrap();

        assert_eq!(step, Step::Done);
        assert_eq!(vm.get("memory"), Some(Value::Int(1024)));

        let mut expected = Record::new();
        expected.insert("memory".to_string(), Value::Int(1024));
        assert_eq!(
            gateway.calls(),
            vec![
                ("vm.update".to_string(), vec![Value::Int(11), Value::Struct(expected)]),
                ("operation.info".to_string(), vec![Value::Int(100)]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_keeps_value_when_update_fails() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("vm.update", json!({"id": 100, "step": "WAIT"}));
        gateway.respond_json("operation.info", json!({"id": 100, "step": "ERROR"}));

        let mut hosting = Hosting::new(gateway.clone());
        let vm = vm(gateway);
        let step = hosting.set(&vm, "memory", Value::Int(1024)).await.unwrap();

        assert_eq!(step, Step::Error);
        assert_eq!(vm.get("memory"), Some(Value::Int(256)));
    }

    #[tokio::test]
    async fn test_non_updatable_field_makes_no_call() {
        let remote = silent_remote();
        let mut hosting = Hosting::new(remote.clone());
        let vm = vm(remote);

        let err = hosting
            .set(&vm, "hostname", Value::from("web02"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::NotUpdatable {
                kind: EntityKind::Vm,
                field: "hostname".to_string()
            }
        );
        assert!(hosting.operations().is_empty());
    }

    #[tokio::test]
    async fn test_missing_mandatory_field_makes_no_call() {
        let mut hosting = Hosting::new(silent_remote());
        let fields = record(json!({"datacenter_id": 1, "name": "data", "size": 1024}));

        let err = hosting.create(EntityKind::Disk, fields).await.unwrap_err();
        assert_eq!(
            err,
            Error::MissingField {
                kind: EntityKind::Disk,
                field: "type".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_read_only_kinds_cannot_be_created() {
        let mut hosting = Hosting::new(silent_remote());
        let err = hosting
            .create(EntityKind::Datacenter, Record::new())
            .await
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_create_drops_unknown_fields_and_relists() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("disk.create", json!({"id": 5, "step": "DONE", "disk_id": 55}));
        gateway.respond_json("disk.info", json!({"id": 55, "name": "data"}));
        gateway.respond_json("disk.list", json!([{"id": 55, "name": "data"}]));

        let mut hosting = Hosting::new(gateway.clone());
        let fields = record(json!({
            "datacenter_id": 1,
            "name": "data",
            "size": 1024,
            "type": "data",
            "kernel": "2.6.32"
        }));
        let created = hosting.create(EntityKind::Disk, fields).await.unwrap();

        let disk = created.into_entity().unwrap();
        assert_eq!(disk.id(), Some(55));
        assert_eq!(gateway.methods(), vec!["disk.create", "disk.info", "disk.list"]);

        let calls = gateway.calls();
        let sent = calls[0].1[0].as_record().unwrap();
        assert!(!sent.contains_key("kernel"));
        assert_eq!(sent.len(), 4);
        assert_eq!(hosting.disks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_create_reports_the_step() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("ip.create", json!({"id": 6, "step": "ERROR"}));

        let mut hosting = Hosting::new(gateway.clone());
        let fields = record(json!({"datacenter_id": 1, "ip_version": 4}));
        let created = hosting.create(EntityKind::Ip, fields).await.unwrap();

        assert!(created.entity().is_none());
        assert_eq!(created.step(), Step::Error);
        assert_eq!(gateway.methods(), vec!["ip.create"]);
        assert_eq!(hosting.operations().len(), 1);
    }

    #[tokio::test]
    async fn test_collections_are_listed_once() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json(
            "vm.list",
            json!([{"id": 1, "hostname": "a"}, {"id": 2, "hostname": "b"}]),
        );

        let mut hosting = Hosting::new(gateway.clone());
        assert_eq!(hosting.vms().await.unwrap().len(), 2);
        let found = hosting.get_vm_by_id(VmId::new(2)).await.unwrap().unwrap();
        assert_eq!(found.get_str("hostname").as_deref(), Some("b"));
        assert!(hosting.get_vm_by_id(VmId::new(3)).await.unwrap().is_none());
        assert_eq!(gateway.count("vm.list"), 1);
        assert!(hosting.collection(EntityKind::Vm).is_some());
        assert!(hosting.collection(EntityKind::Disk).is_none());
    }

    #[tokio::test]
    async fn test_unlisted_kind_has_no_container() {
        let mut hosting = Hosting::new(silent_remote());
        let err = hosting.container(EntityKind::Product).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_relationships_resolve_through_collections() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("datacenter.list", json!([{"id": 1, "name": "Paris", "iso": "FR"}]));
        gateway.respond_json("disk.list", json!([{"id": 21, "name": "sys"}]));

        let mut hosting = Hosting::new(gateway.clone());
        let vm = vm(gateway.clone());

        let datacenter = hosting.related(&vm, "datacenter").await.unwrap().unwrap();
        assert_eq!(datacenter.get_str("iso").as_deref(), Some("FR"));
        let again = hosting.related(&vm, "datacenter").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&datacenter, &again));

        // 99 is not listed and is omitted
        let disks = hosting.related_many(&vm, "disks").await.unwrap().unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].id(), Some(21));

        let listed = hosting.get_disk_by_id(DiskId::new(21)).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&disks[0], &listed));
    }

    #[tokio::test]
    async fn test_absent_relationships_are_none() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("datacenter.list", json!([{"id": 1, "name": "Paris"}]));
        gateway.respond_json("iface.list", json!([]));

        let mut hosting = Hosting::new(gateway.clone());
        let vm = Entity::new_ref(
            EntityKind::Vm,
            gateway,
            record(json!({"id": 3, "datacenter_id": 7, "ifaces_id": [4]})),
        );

        assert!(hosting.related(&vm, "datacenter").await.unwrap().is_none());
        assert!(hosting.related_many(&vm, "ifaces").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relationship_misuse_is_rejected() {
        let remote = silent_remote();
        let mut hosting = Hosting::new(remote.clone());
        let vm = vm(remote);

        let err = hosting.related(&vm, "flex").await.unwrap_err();
        assert!(matches!(err, Error::UnknownRelation { .. }));

        let err = hosting.related(&vm, "disks").await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        let err = hosting.related_many(&vm, "datacenter").await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_deleting_a_running_vm_stops_it_first() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("vm.info", json!({"id": 11, "hostname": "web01", "state": "running"}));
        gateway.respond_json("vm.info", json!({"id": 11, "hostname": "web01", "state": "halted"}));
        gateway.respond_json("vm.stop", done(201));
        gateway.respond_json("vm.delete", done(202));
        gateway.respond_json("vm.list", json!([]));

        let mut hosting = Hosting::new(gateway.clone());
        let vm = vm(gateway.clone());
        let step = hosting.delete(&vm).await.unwrap();

        assert_eq!(step, Step::Done);
        assert_eq!(
            gateway.methods(),
            vec!["vm.info", "vm.stop", "vm.info", "vm.delete", "vm.list"]
        );
        let ids: Vec<_> = hosting.operations().iter().filter_map(|op| op.id()).collect();
        assert_eq!(ids, vec![201, 202]);
    }

    #[tokio::test]
    async fn test_deleting_a_halted_vm_skips_the_stop() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("vm.info", json!({"id": 11, "state": "halted"}));
        gateway.respond_json("vm.delete", json!({"id": 202, "step": "ERROR"}));

        let mut hosting = Hosting::new(gateway.clone());
        let vm = vm(gateway.clone());
        let step = hosting.delete(&vm).await.unwrap();

        assert_eq!(step, Step::Error);
        assert_eq!(gateway.methods(), vec!["vm.info", "vm.delete"]);
    }

    #[tokio::test]
    async fn test_actions_refresh_the_vm() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("vm.reboot", done(300));
        gateway.respond_json("vm.info", json!({"id": 11, "state": "running"}));

        let mut hosting = Hosting::new(gateway.clone());
        let vm = vm(gateway.clone());
        assert_eq!(hosting.reboot(&vm).await.unwrap(), Step::Done);
        assert_eq!(gateway.methods(), vec!["vm.reboot", "vm.info"]);

        let disk = Entity::new_ref(EntityKind::Disk, gateway, record(json!({"id": 1})));
        let err = hosting.start(&disk).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_copy_image_appends_the_new_disk() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("disk.create_from", json!({"id": 8, "step": "DONE", "disk_id": 88}));
        gateway.respond_json("disk.info", json!({"id": 88, "name": "copy"}));
        gateway.respond_json("disk.list", json!([{"id": 21, "name": "sys"}]));

        let mut hosting = Hosting::new(gateway.clone());
        let image = Entity::new_ref(
            EntityKind::Image,
            gateway.clone(),
            record(json!({"id": 3, "label": "Debian 6", "datacenter_id": 1, "disk_id": 77})),
        );

        let created = hosting
            .copy_image_as(&image, "copy", Some(Value::Int(21)))
            .await
            .unwrap();
        assert_eq!(created.entity().and_then(|d| d.id()), Some(88));

        let calls = gateway.calls();
        assert_eq!(
            calls[0].1,
            vec![
                value(json!({"datacenter_id": 1, "name": "copy", "repulse_from": 21})),
                Value::Int(77)
            ]
        );

        let disks = hosting.disks().await.unwrap();
        let ids: Vec<_> = disks.iter().filter_map(|d| d.id()).collect();
        assert_eq!(ids, vec![21, 88]);
        assert_eq!(gateway.count("disk.list"), 1);
    }

    #[tokio::test]
    async fn test_copy_image_lists_the_new_disk_once() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("disk.create_from", json!({"id": 8, "step": "DONE", "disk_id": 88}));
        gateway.respond_json(
            "disk.list",
            json!([{"id": 21, "name": "sys"}, {"id": 88, "name": "copy"}]),
        );

        let mut hosting = Hosting::new(gateway.clone());
        let image = Entity::new_ref(
            EntityKind::Image,
            gateway.clone(),
            record(json!({"id": 3, "label": "Debian 6", "datacenter_id": 1, "disk_id": 77})),
        );

        let created = hosting.copy_image_as(&image, "copy", None).await.unwrap();
        let disk = created.into_entity().unwrap();

        let disks = hosting.disks().await.unwrap();
        let ids: Vec<_> = disks.iter().filter_map(|d| d.id()).collect();
        assert_eq!(ids, vec![21, 88]);
        assert!(Arc::ptr_eq(&disk, disks.find_by_id(88).unwrap()));
        assert_eq!(gateway.count("disk.info"), 0);
        assert_eq!(gateway.count("disk.list"), 1);
    }

    #[tokio::test]
    async fn test_operation_log_records_every_operation_in_order() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("vm.update", json!({"id": 1, "step": "ERROR"}));
        gateway.respond_json("vm.start", done(2));
        gateway.respond_json("vm.info", json!({"id": 11, "state": "running"}));
        gateway.respond_json("iface.create", json!({"id": 3, "step": "ERROR"}));

        let mut hosting = Hosting::new(gateway.clone());
        let vm = vm(gateway.clone());
        hosting.set(&vm, "memory", Value::Int(512)).await.unwrap();
        hosting.start(&vm).await.unwrap();
        hosting
            .create(
                EntityKind::Iface,
                record(json!({"datacenter_id": 1, "ip_version": 6})),
            )
            .await
            .unwrap();

        let ids: Vec<_> = hosting.operations().iter().filter_map(|op| op.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(hosting.operations().total(), 3);
    }

    #[tokio::test]
    async fn test_bounded_operation_log() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("vm.stop", done(1));
        gateway.respond_json("vm.info", json!({"id": 11, "state": "halted"}));

        let mut hosting =
            Hosting::new(gateway.clone()).with_operation_log(OperationLog::with_capacity(1));
        let vm = vm(gateway);
        hosting.stop(&vm).await.unwrap();
        hosting.stop(&vm).await.unwrap();

        assert_eq!(hosting.operations().len(), 1);
        assert_eq!(hosting.operations().total(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_bounds_operations() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("vm.update", json!({"id": 9, "step": "WAIT"}));
        gateway.respond_json("operation.info", json!({"id": 9, "step": "RUN"}));

        let mut hosting = Hosting::new(gateway.clone())
            .with_poll_interval(Duration::from_secs(2))
            .with_wait_timeout(Some(Duration::from_secs(4)));
        let vm = vm(gateway.clone());
        let step = hosting.set(&vm, "memory", Value::Int(512)).await.unwrap();

        assert_eq!(step, Step::Other("RUN".to_string()));
        assert_eq!(gateway.count("operation.info"), 2);
        assert_eq!(vm.get("memory"), Some(Value::Int(256)));
    }

    #[test]
    fn test_options_come_from_the_attached_config() {
        let config = HostingConfig::from_toml_str(
            "[hosting]\nkey = \"k\"\n\n[defaults]\nmemory = 512\n",
        )
        .unwrap();
        let hosting = Hosting::new(silent_remote()).with_config(config);

        assert_eq!(
            hosting.get_option("defaults", "memory").and_then(toml::Value::as_integer),
            Some(512)
        );
        assert!(hosting.get_option("defaults", "cores").is_none());
        assert!(Hosting::new(silent_remote()).get_option("defaults", "memory").is_none());
    }

    #[test]
    fn test_from_config_requires_a_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[hosting]\nuri = \"https://example.com/\"").unwrap();

        let err = Hosting::from_config(file.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_from_config_builds_an_xmlrpc_facade() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[hosting]\nkey = \"k\"\n\n[defaults]\ndatacenter = \"FR\"").unwrap();

        let hosting = Hosting::from_config(file.path()).unwrap();
        assert_eq!(
            hosting.get_option("defaults", "datacenter").and_then(toml::Value::as_str),
            Some("FR")
        );
        assert!(hosting.config().is_some());
    }
}
