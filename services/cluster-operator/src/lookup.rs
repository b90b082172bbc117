//! Name to identifier resolution, memoized for the life of the owner.
//!
//! Provider identifiers behind a given name never change once created, so
//! entries never expire. Lookups hold the cache lock across the provider
//! query: a miss is resolved exactly once even when several callers ask for
//! the same name at the same time.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use strato_cloud::{NetworkApi, Vpc};
use strato_reconcile::{Error, Missing, Result, ResultExt};
use tokio::sync::Mutex;
use tracing::debug;

/// A provider query filtering objects by name.
#[async_trait]
pub trait NameIndex: Send + Sync {
    type Id: Clone + Debug + Send + Sync;

    /// What the index resolves, for error messages.
    const WHAT: Missing;

    /// Every object carrying `name`. May return zero or several.
    async fn query(&self, name: &str) -> Result<Vec<Self::Id>>;
}

/// Memoizing wrapper around a [`NameIndex`].
pub struct CachedLookup<I: NameIndex> {
    index: I,
    cache: Mutex<HashMap<String, I::Id>>,
}

impl<I: NameIndex> CachedLookup<I> {
    pub fn new(index: I) -> Self {
        Self {
            index,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve one name.
    ///
    /// Exactly one match is required. No match fails with
    /// `ExecutionFailed`, several with `TooManyResults`; neither is cached.
    pub async fn lookup(&self, name: &str) -> Result<I::Id> {
        let mut cache = self.cache.lock().await;
        if let Some(id) = cache.get(name) {
            return Ok(id.clone());
        }
        let id = self.resolve(name).await?;
        cache.insert(name.to_string(), id.clone());
        Ok(id)
    }

    /// Resolve a fixed set of names.
    ///
    /// When every name is cached no provider call is made; otherwise only the
    /// missing names are queried.
    pub async fn lookup_all(&self, names: &[&str]) -> Result<BTreeMap<String, I::Id>> {
        let mut cache = self.cache.lock().await;

        // A name listed twice is still one miss.
        let missing: BTreeSet<&str> = names
            .iter()
            .copied()
            .filter(|name| !cache.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            debug!(what = %I::WHAT, missing = ?missing, "resolving uncached names");
        }
        for name in missing {
            let id = self.resolve(name).await?;
            cache.insert(name.to_string(), id);
        }

        Ok(names
            .iter()
            .filter_map(|name| cache.get(*name).map(|id| (name.to_string(), id.clone())))
            .collect())
    }

    /// Number of cached names.
    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }

    async fn resolve(&self, name: &str) -> Result<I::Id> {
        let mut matches = self
            .index
            .query(name)
            .await
            .with_context(|| format!("looking up {} {name}", I::WHAT))?;
        match matches.len() {
            1 => {
                let id = matches.remove(0);
                debug!(what = %I::WHAT, name, ?id, "resolved name");
                Ok(id)
            }
            0 => Err(Error::ExecutionFailed(format!(
                "{} '{name}': expected one, got 0",
                I::WHAT
            ))),
            count => Err(Error::TooManyResults {
                what: I::WHAT,
                name: name.to_string(),
                count,
            }),
        }
    }
}

/// Route table IDs by `Name` tag.
pub struct RouteTableIndex {
    api: Arc<dyn NetworkApi>,
}

impl RouteTableIndex {
    pub fn new(api: Arc<dyn NetworkApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl NameIndex for RouteTableIndex {
    type Id = String;

    const WHAT: Missing = Missing::RouteTable;

    async fn query(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .api
            .describe_route_tables(name)
            .await?
            .into_iter()
            .map(|route_table| route_table.id)
            .collect())
    }
}

/// VPCs (ID and CIDR) by `Name` tag.
pub struct VpcIndex {
    api: Arc<dyn NetworkApi>,
}

impl VpcIndex {
    pub fn new(api: Arc<dyn NetworkApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl NameIndex for VpcIndex {
    type Id = Vpc;

    const WHAT: Missing = Missing::Vpc;

    async fn query(&self, name: &str) -> Result<Vec<Vpc>> {
        Ok(self.api.describe_vpcs(name).await?)
    }
}
