/**
 * UNIT STORE - Persistance des unités enregistrées
 *
 * RÔLE : registre durable des unités (fiche publique + credential).
 * Clé = unit_id fourni par l'unité elle-même, jamais régénéré.
 *
 * FONCTIONNEMENT :
 * - Cache mémoire HashMap protégé par RwLock tokio
 * - Chaque écriture est flushée dans un fichier JSON
 * - Échec du flush => rollback mémoire + StoreError, aucun retry interne
 * - list() renvoie un snapshot, la boucle de sync itère sans tenir de lock
 */

use crate::error::StoreError;
use crate::models::{Credential, Unit, UnitRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub type UnitsMap = HashMap<String, UnitRecord>;

/// Interface clé-valeur attendue par le service et la boucle de sync
#[async_trait]
pub trait UnitStore: Send + Sync {
    /// Écrit la fiche et retourne la précédente, en une seule section critique.
    /// `created` d'une fiche existante est conservé ; `credential = None`
    /// conserve le credential existant.
    async fn put(&self, unit: Unit, credential: Option<Credential>) -> Result<Option<UnitRecord>, StoreError>;

    async fn get(&self, unit_id: &str) -> Result<Option<UnitRecord>, StoreError>;

    /// Snapshot des unités, trié par unit_id
    async fn list(&self) -> Result<Vec<Unit>, StoreError>;

    /// Retourne false si l'unité n'existait pas
    async fn delete(&self, unit_id: &str) -> Result<bool, StoreError>;

    async fn credential(&self, unit_id: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.get(unit_id).await?.and_then(|record| record.credential))
    }
}

/// Store fichier JSON, même principe que le registre d'agents du kernel
pub struct JsonUnitStore {
    units: RwLock<UnitsMap>,
    data_file: PathBuf,
}

impl JsonUnitStore {
    /// Ouvre le store ; fichier absent = démarrage à vide
    pub async fn open<P: Into<PathBuf>>(data_file: P) -> Result<Self, StoreError> {
        let data_file = data_file.into();
        let units = if tokio::fs::try_exists(&data_file).await? {
            let content = tokio::fs::read_to_string(&data_file).await?;
            if content.trim().is_empty() {
                UnitsMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            if let Some(parent) = data_file.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            info!(path = %data_file.display(), "no existing units file, starting fresh");
            UnitsMap::new()
        };

        info!(count = units.len(), path = %data_file.display(), "units loaded");
        Ok(Self {
            units: RwLock::new(units),
            data_file,
        })
    }

    async fn flush(&self, units: &UnitsMap) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(units)?;
        // écriture atomique : fichier temporaire puis rename
        let tmp = self.data_file.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.data_file).await?;
        Ok(())
    }
}

#[async_trait]
impl UnitStore for JsonUnitStore {
    async fn put(&self, mut unit: Unit, credential: Option<Credential>) -> Result<Option<UnitRecord>, StoreError> {
        let mut units = self.units.write().await;
        let unit_id = unit.unit_id.clone();
        let credential = match units.get(&unit_id) {
            Some(existing) => {
                unit.created = existing.unit.created;
                credential.or_else(|| existing.credential.clone())
            }
            None => credential,
        };

        let previous = units.insert(unit_id.clone(), UnitRecord { unit, credential });
        if let Err(e) = self.flush(&units).await {
            match previous {
                Some(record) => units.insert(unit_id, record),
                None => units.remove(&unit_id),
            };
            return Err(e);
        }

        debug!(unit_id = %unit_id, replaced = previous.is_some(), "unit stored");
        Ok(previous)
    }

    async fn get(&self, unit_id: &str) -> Result<Option<UnitRecord>, StoreError> {
        Ok(self.units.read().await.get(unit_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Unit>, StoreError> {
        let mut list: Vec<Unit> = self
            .units
            .read()
            .await
            .values()
            .map(|record| record.unit.clone())
            .collect();
        list.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        Ok(list)
    }

    async fn delete(&self, unit_id: &str) -> Result<bool, StoreError> {
        let mut units = self.units.write().await;
        let Some(removed) = units.remove(unit_id) else {
            return Ok(false);
        };

        if let Err(e) = self.flush(&units).await {
            units.insert(unit_id.to_string(), removed);
            return Err(e);
        }

        debug!(unit_id = %unit_id, "unit deleted");
        Ok(true)
    }
}
