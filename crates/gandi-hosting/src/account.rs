//! Lazily cached view of the account.

use crate::entity::{Entity, EntityRef};
use crate::Result;
use gandi_core::{EntityKind, Error, Record, Value};
use gandi_xmlrpc::Gateway;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Account information, products and resource counters.
///
/// Everything is fetched with a single `account.info` call on first access
/// and kept until [`Account::refresh`].
pub struct Account {
    gateway: Arc<dyn Gateway>,
    info: Option<Record>,
    products: Option<Vec<EntityRef>>,
    resources: Option<BTreeMap<String, EntityRef>>,
}

impl Account {
    /// Creates an empty view; nothing is fetched yet.
    #[must_use]
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            info: None,
            products: None,
            resources: None,
        }
    }

    /// The raw `account.info` record.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures.
    pub async fn info(&mut self) -> Result<&Record> {
        let info = match self.info.take() {
            Some(info) => info,
            None => self
                .gateway
                .call(&EntityKind::Account.method("info"), Vec::new())
                .await?
                .into_record()
                .ok_or_else(|| {
                    Error::ParseError("account.info did not return a record".to_string())
                })?,
        };
        Ok(self.info.insert(info))
    }

    /// One field of the account record.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures.
    pub async fn field(&mut self, name: &str) -> Result<Option<Value>> {
        Ok(self.info().await?.get(name).cloned())
    }

    /// Account owner's full name.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures.
    pub async fn fullname(&mut self) -> Result<Option<String>> {
        self.string_field("fullname").await
    }

    /// Account handle.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures.
    pub async fn handle(&mut self) -> Result<Option<String>> {
        self.string_field("handle").await
    }

    /// Account identifier.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures.
    pub async fn id(&mut self) -> Result<Option<i64>> {
        Ok(self.field("id").await?.as_ref().and_then(Value::as_i64))
    }

    /// Products held by the account, `None` when there are none.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures.
    pub async fn products(&mut self) -> Result<Option<&[EntityRef]>> {
        if self.products.is_none() {
            let gateway = Arc::clone(&self.gateway);
            let products: Vec<EntityRef> = self
                .info()
                .await?
                .get("products")
                .and_then(Value::as_array)
                .unwrap_or_default()
                .iter()
                .filter_map(Value::as_record)
                .map(|record| {
                    Entity::new_ref(EntityKind::Product, Arc::clone(&gateway), record.clone())
                })
                .collect();

            if !products.is_empty() {
                self.products = Some(products);
            }
        }

        Ok(self.products.as_deref())
    }

    /// Resource counters keyed by type (`available`, `granted`, `used`, ...),
    /// `None` when there are none.
    ///
    /// Each Resource entity carries its key in a `type` field.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures.
    pub async fn resources(&mut self) -> Result<Option<&BTreeMap<String, EntityRef>>> {
        if self.resources.is_none() {
            let gateway = Arc::clone(&self.gateway);
            let resources: BTreeMap<String, EntityRef> = self
                .info()
                .await?
                .get("resources")
                .and_then(Value::as_record)
                .map(|table| {
                    table
                        .iter()
                        .filter_map(|(kind, counters)| {
                            let mut record = counters.as_record()?.clone();
                            record.insert("type".to_string(), Value::from(kind.as_str()));
                            Some((
                                kind.clone(),
                                Entity::new_ref(EntityKind::Resource, Arc::clone(&gateway), record),
                            ))
                        })
                        .collect()
                })
                .unwrap_or_default();

            if !resources.is_empty() {
                self.resources = Some(resources);
            }
        }

        Ok(self.resources.as_ref())
    }

    /// Drops the cached info, products and resources.
    pub fn refresh(&mut self) {
        self.info = None;
        self.products = None;
        self.resources = None;
    }

    async fn string_field(&mut self, name: &str) -> Result<Option<String>> {
        Ok(self
            .field(name)
            .await?
            .as_ref()
            .and_then(Value::as_str)
            .map(ToString::to_string))
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("info", &self.info)
            .field("products", &self.products)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = |name: &str| {
            self.info
                .as_ref()
                .and_then(|info| info.get(name))
                .map_or_else(|| "-".to_string(), ToString::to_string)
        };
        write!(
            f,
            "<Account {}: {} ({})>",
            field("id"),
            field("handle"),
            field("fullname")
        )
    }
}
