/**
 * STATUS CACHE - Vue mémoire du dernier statut connu de chaque unité
 *
 * RÔLE : chemin rapide pour l'API "unit info", alimenté uniquement par
 * la registration et la boucle de sync.
 *
 * FONCTIONNEMENT :
 * - DashMap unit_id -> Arc<CachedStatus>, init() une seule fois au boot
 * - set() remplace la valeur entière (jamais de mutation en place)
 * - Aucune expiration : un fetch raté laisse l'entrée précédente
 * - Un fetch n'écrit que si l'unité existe encore avec le même credential
 */

use crate::error::CacheError;
use crate::store::UnitStore;
use dashmap::DashMap;
use std::sync::{Arc, OnceLock};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

/// Dernier statut remonté par une unité
#[derive(Debug, Clone, serde::Serialize)]
pub struct CachedStatus {
    pub payload: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
}

#[derive(Default)]
pub struct StatusCache {
    entries: OnceLock<DashMap<String, Arc<CachedStatus>>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alloue la map ; retourne false si déjà initialisée (no-op)
    pub fn init(&self) -> bool {
        let mut first = false;
        self.entries.get_or_init(|| {
            first = true;
            DashMap::new()
        });
        first
    }

    /// Écrase l'entrée de l'unité, last-write-wins
    pub fn set(&self, unit_id: &str, payload: serde_json::Value) -> Result<Arc<CachedStatus>, CacheError> {
        let entries = self.entries.get().ok_or(CacheError::Uninitialized)?;
        let status = Arc::new(CachedStatus {
            payload,
            fetched_at: OffsetDateTime::now_utc(),
        });
        entries.insert(unit_id.to_string(), Arc::clone(&status));
        Ok(status)
    }

    /// Écrit le résultat d'un fetch fait avec `credential_id`.
    ///
    /// Retourne `Ok(false)` sans rien laisser en cache si l'unité a été
    /// supprimée ou re-registrée pendant le fetch. La vérification est refaite
    /// après l'écriture : un delete qui passe entre les deux retire l'entrée
    /// lui-même, sinon c'est elle qui est retirée ici.
    pub async fn set_if_current(
        &self,
        store: &dyn UnitStore,
        unit_id: &str,
        credential_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<bool, CacheError> {
        if !holds_credential(store, unit_id, credential_id).await {
            return Ok(false);
        }
        let status = self.set(unit_id, payload)?;
        if !holds_credential(store, unit_id, credential_id).await {
            self.discard(unit_id, &status);
            return Ok(false);
        }
        Ok(true)
    }

    /// Retire l'entrée seulement si c'est encore `status`
    fn discard(&self, unit_id: &str, status: &Arc<CachedStatus>) -> bool {
        self.entries
            .get()
            .map(|entries| entries.remove_if(unit_id, |_, current| Arc::ptr_eq(current, status)).is_some())
            .unwrap_or(false)
    }

    pub fn get(&self, unit_id: &str) -> Option<Arc<CachedStatus>> {
        self.entries
            .get()?
            .get(unit_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Réservé à la suppression d'une unité
    pub fn remove(&self, unit_id: &str) -> bool {
        self.entries
            .get()
            .map(|entries| entries.remove(unit_id).is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.get().map(DashMap::len).unwrap_or(0)
    }
}

async fn holds_credential(store: &dyn UnitStore, unit_id: &str, credential_id: Uuid) -> bool {
    match store.credential(unit_id).await {
        Ok(Some(credential)) => credential.credential_id == credential_id,
        Ok(None) => false,
        Err(e) => {
            warn!(unit_id = %unit_id, error = %e, "credential check failed, status dropped");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_init_is_idempotent() {
        let cache = StatusCache::new();
        assert!(cache.init());
        cache.set("u1", json!({"a": 1})).unwrap();
        assert!(!cache.init());
        // la seconde init ne vide pas la map
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_set_before_init_is_rejected() {
        let cache = StatusCache::new();
        assert!(matches!(cache.set("u1", json!({})), Err(CacheError::Uninitialized)));
        assert!(cache.get("u1").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_get_unknown_is_absent() {
        let cache = StatusCache::new();
        cache.init();
        assert!(cache.get("nope").is_none());
    }

    #[test]
    fn test_set_overwrites_and_remove() {
        let cache = StatusCache::new();
        cache.init();
        cache.set("u1", json!({"v": 1})).unwrap();
        cache.set("u1", json!({"v": 2})).unwrap();
        assert_eq!(cache.get("u1").unwrap().payload, json!({"v": 2}));

        assert!(cache.remove("u1"));
        assert!(!cache.remove("u1"));
        assert!(cache.get("u1").is_none());
    }

    #[tokio::test]
    async fn test_set_if_current_checks_store() {
        let store = MemoryStore::with_units(&["u1"]);
        let credential_id = store.units.lock()["u1"].credential.as_ref().unwrap().credential_id;
        let cache = StatusCache::new();
        cache.init();

        assert!(cache.set_if_current(&store, "u1", credential_id, json!({"v": 1})).await.unwrap());
        assert_eq!(cache.get("u1").unwrap().payload, json!({"v": 1}));

        // credential tourné : l'ancien fetch n'écrase pas
        assert!(!cache.set_if_current(&store, "u1", Uuid::new_v4(), json!({"v": 2})).await.unwrap());
        assert_eq!(cache.get("u1").unwrap().payload, json!({"v": 1}));

        // unité inconnue du store
        assert!(!cache.set_if_current(&store, "u2", credential_id, json!({})).await.unwrap());
        assert!(cache.get("u2").is_none());
    }

    #[test]
    fn test_discard_keeps_newer_entry() {
        let cache = StatusCache::new();
        cache.init();
        let old = cache.set("u1", json!({"v": 1})).unwrap();
        cache.set("u1", json!({"v": 2})).unwrap();

        assert!(!cache.discard("u1", &old));
        assert_eq!(cache.get("u1").unwrap().payload, json!({"v": 2}));
    }

    #[test]
    fn test_concurrent_readers_see_whole_payloads() {
        let cache = Arc::new(StatusCache::new());
        cache.init();

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let id = format!("u{}", i % 10);
                        cache.set(&id, json!({"id": id, "writer": w, "seq": i})).unwrap();
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let id = format!("u{}", i % 10);
                        if let Some(status) = cache.get(&id) {
                            // payload complet et cohérent avec sa clé
                            assert_eq!(status.payload["id"], json!(id));
                            assert!(status.payload["seq"].is_number());
                        }
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 10);
    }
}
