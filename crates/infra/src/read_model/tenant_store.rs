use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use stockledger_core::TenantId;

/// Tenant-isolated key/value store for derived, rebuildable state.
///
/// Every call is keyed by tenant; a tenant can never observe or clear another
/// tenant's entries. Values are disposable: they can always be recomputed from
/// the ledger.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn upsert(&self, tenant_id: TenantId, key: K, value: V);
    fn remove(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    /// All values of a tenant, ordered by key.
    fn list(&self, tenant_id: TenantId) -> Vec<V>;
    /// Atomically swap a tenant's whole content (rebuild support).
    fn replace_tenant(&self, tenant_id: TenantId, entries: Vec<(K, V)>);
    fn clear_tenant(&self, tenant_id: TenantId);
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        (**self).upsert(tenant_id, key, value)
    }

    fn remove(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).remove(tenant_id, key)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        (**self).list(tenant_id)
    }

    fn replace_tenant(&self, tenant_id: TenantId, entries: Vec<(K, V)>) {
        (**self).replace_tenant(tenant_id, entries)
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        (**self).clear_tenant(tenant_id)
    }
}

/// In-memory tenant-isolated store.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    inner: RwLock<HashMap<TenantId, BTreeMap<K, V>>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Clone + Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&tenant_id)?.get(key).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.entry(tenant_id).or_default().insert(key, value);
        }
    }

    fn remove(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let mut map = self.inner.write().ok()?;
        map.get_mut(&tenant_id)?.remove(key)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.get(&tenant_id)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    fn replace_tenant(&self, tenant_id: TenantId, entries: Vec<(K, V)>) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(tenant_id, entries.into_iter().collect());
        }
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&tenant_id);
        }
    }
}
