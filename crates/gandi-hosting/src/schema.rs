//! Static per-kind field tables.
//!
//! Each entity kind declares which of its fields can be searched, which can be
//! changed after creation and which are accepted at creation time. Everything
//! else about a kind is derived from its raw records.

use gandi_core::EntityKind;

/// Whether a creation field must be supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Creation fails locally when absent.
    Mandatory,
    /// Forwarded when present.
    Optional,
}

/// Work performed before a delete call is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteHook {
    /// Refresh the entity and stop it first if it is running.
    StopIfRunning,
}

/// Field table for one entity kind.
#[derive(Debug)]
pub struct Schema {
    /// Kind described by this table.
    pub kind: EntityKind,
    /// Fields compared, in order, by collection lookups.
    pub searchable: &'static [&'static str],
    /// Fields accepted by `update`.
    pub updatable: &'static [&'static str],
    /// Fields accepted by `create`; anything else is dropped.
    pub create_spec: &'static [(&'static str, Requirement)],
    /// Whether create, update and delete are offered.
    pub mutable: bool,
    /// Hook run before delete.
    pub delete_hook: Option<DeleteHook>,
    /// Action verbs callable as `<kind>.<verb>` with the entity id.
    pub actions: &'static [&'static str],
}

impl Schema {
    /// Returns true if `field` may be updated.
    #[must_use]
    pub fn is_updatable(&self, field: &str) -> bool {
        self.updatable.contains(&field)
    }

    /// Returns true if `verb` is an action of this kind.
    #[must_use]
    pub fn has_action(&self, verb: &str) -> bool {
        self.actions.contains(&verb)
    }

    /// Iterates over the mandatory creation fields.
    pub fn mandatory_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.create_spec
            .iter()
            .filter(|(_, requirement)| *requirement == Requirement::Mandatory)
            .map(|(field, _)| *field)
    }

    /// Returns true if `field` is part of the creation spec.
    #[must_use]
    pub fn accepts_on_create(&self, field: &str) -> bool {
        self.create_spec.iter().any(|(name, _)| *name == field)
    }
}

const fn read_only(kind: EntityKind, searchable: &'static [&'static str]) -> Schema {
    Schema {
        kind,
        searchable,
        updatable: &[],
        create_spec: &[],
        mutable: false,
        delete_hook: None,
        actions: &[],
    }
}

static DATACENTER: Schema = read_only(EntityKind::Datacenter, &["name", "country", "iso"]);

static IMAGE: Schema = read_only(EntityKind::Image, &["label", "name"]);

static VM: Schema = Schema {
    kind: EntityKind::Vm,
    searchable: &["hostname"],
    updatable: &["vm_max_memory", "shares", "memory", "console", "password"],
    create_spec: &[],
    mutable: true,
    delete_hook: Some(DeleteHook::StopIfRunning),
    actions: &["stop", "start", "reboot"],
};

static DISK: Schema = Schema {
    kind: EntityKind::Disk,
    searchable: &["name"],
    updatable: &["name", "size", "kernel", "cmdline_option", "cmdline"],
    create_spec: &[
        ("datacenter_id", Requirement::Mandatory),
        ("name", Requirement::Mandatory),
        ("size", Requirement::Mandatory),
        ("type", Requirement::Mandatory),
        ("repulse_from", Requirement::Optional),
    ],
    mutable: true,
    delete_hook: None,
    actions: &[],
};

static IFACE: Schema = Schema {
    kind: EntityKind::Iface,
    searchable: &[],
    updatable: &["bandwidth"],
    create_spec: &[
        ("datacenter_id", Requirement::Mandatory),
        ("ip_version", Requirement::Mandatory),
        ("bandwidth", Requirement::Optional),
    ],
    mutable: true,
    delete_hook: None,
    actions: &[],
};

static IP: Schema = Schema {
    kind: EntityKind::Ip,
    searchable: &["ip", "reverse"],
    updatable: &["reverse"],
    create_spec: &[
        ("datacenter_id", Requirement::Mandatory),
        ("ip_version", Requirement::Mandatory),
        ("reverse", Requirement::Optional),
    ],
    mutable: true,
    delete_hook: None,
    actions: &[],
};

static OPERATION: Schema = read_only(EntityKind::Operation, &[]);
static PRODUCT: Schema = read_only(EntityKind::Product, &[]);
static RESOURCE: Schema = read_only(EntityKind::Resource, &[]);
static ACCOUNT: Schema = read_only(EntityKind::Account, &[]);

/// Returns the field table of `kind`.
#[must_use]
pub fn schema_for(kind: EntityKind) -> &'static Schema {
    match kind {
        EntityKind::Datacenter => &DATACENTER,
        EntityKind::Image => &IMAGE,
        EntityKind::Vm => &VM,
        EntityKind::Disk => &DISK,
        EntityKind::Iface => &IFACE,
        EntityKind::Ip => &IP,
        EntityKind::Operation => &OPERATION,
        EntityKind::Product => &PRODUCT,
        EntityKind::Resource => &RESOURCE,
        EntityKind::Account => &ACCOUNT,
    }
}
