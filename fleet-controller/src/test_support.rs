//! Doublures partagées par les tests du service et de la boucle de sync.

use crate::error::{RemoteError, StoreError};
use crate::models::{Credential, Unit, UnitRecord};
use crate::remote::RemoteLink;
use crate::store::{UnitStore, UnitsMap};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;

pub fn unit(id: &str) -> Unit {
    Unit {
        unit_id: id.into(),
        unit_name: format!("unit {id}"),
        version: "8.5".into(),
        subscription_type: "community".into(),
        system_id: format!("sys-{id}"),
        created: OffsetDateTime::now_utc(),
    }
}

/// Store mémoire avec pannes injectables
#[derive(Default)]
pub struct MemoryStore {
    pub units: Mutex<UnitsMap>,
    pub fail_writes: AtomicBool,
    pub fail_list: AtomicBool,
    pub list_calls: AtomicUsize,
}

impl MemoryStore {
    fn broken() -> StoreError {
        StoreError::Io(std::io::Error::other("disk unplugged"))
    }

    pub fn with_units(ids: &[&str]) -> Self {
        let store = Self::default();
        {
            let mut units = store.units.lock();
            for id in ids {
                units.insert(
                    id.to_string(),
                    UnitRecord {
                        unit: unit(id),
                        credential: Some(Credential::issue("root", "pw")),
                    },
                );
            }
        }
        store
    }
}

#[async_trait]
impl UnitStore for MemoryStore {
    async fn put(&self, mut unit: Unit, credential: Option<Credential>) -> Result<Option<UnitRecord>, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::broken());
        }
        let mut units = self.units.lock();
        let credential = match units.get(&unit.unit_id) {
            Some(existing) => {
                unit.created = existing.unit.created;
                credential.or_else(|| existing.credential.clone())
            }
            None => credential,
        };
        Ok(units.insert(unit.unit_id.clone(), UnitRecord { unit, credential }))
    }

    async fn get(&self, unit_id: &str) -> Result<Option<UnitRecord>, StoreError> {
        Ok(self.units.lock().get(unit_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Unit>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Self::broken());
        }
        let mut list: Vec<Unit> = self.units.lock().values().map(|r| r.unit.clone()).collect();
        list.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        Ok(list)
    }

    async fn delete(&self, unit_id: &str) -> Result<bool, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::broken());
        }
        Ok(self.units.lock().remove(unit_id).is_some())
    }
}

/// Remote link scripté : les unités listées dans `down` échouent
#[derive(Default)]
pub struct FakeRemote {
    pub down: Mutex<HashSet<String>>,
    pub fetches: Mutex<Vec<String>>,
    pub pushes: Mutex<Vec<(String, uuid::Uuid)>>,
    /// latence simulée de chaque fetch_status
    pub fetch_delay: Duration,
}

impl FakeRemote {
    pub fn with_down(ids: &[&str]) -> Self {
        let remote = Self::default();
        remote.down.lock().extend(ids.iter().map(|id| id.to_string()));
        remote
    }

    pub fn with_fetch_delay(fetch_delay: Duration) -> Self {
        Self {
            fetch_delay,
            ..Self::default()
        }
    }

    fn unreachable(unit_id: &str) -> RemoteError {
        RemoteError::Unreachable {
            unit_id: unit_id.to_string(),
            reason: "connection refused".into(),
        }
    }
}

#[async_trait]
impl RemoteLink for FakeRemote {
    async fn fetch_status(&self, unit: &Unit, _credential: &Credential) -> Result<serde_json::Value, RemoteError> {
        self.fetches.lock().push(unit.unit_id.clone());
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        if self.down.lock().contains(&unit.unit_id) {
            return Err(Self::unreachable(&unit.unit_id));
        }
        Ok(serde_json::json!({ "unit_id": unit.unit_id, "uptime": 42 }))
    }

    async fn push_credential(&self, unit: &Unit, credential: &Credential) -> Result<(), RemoteError> {
        if self.down.lock().contains(&unit.unit_id) {
            return Err(Self::unreachable(&unit.unit_id));
        }
        self.pushes.lock().push((unit.unit_id.clone(), credential.credential_id));
        Ok(())
    }
}
