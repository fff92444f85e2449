/**
 * UNITS SERVICE - Registration et gestion des unités distantes
 *
 * RÔLE : handshake de registration, émission des credentials et tokens,
 * lecture des fiches et du statut en cache pour l'API.
 *
 * FONCTIONNEMENT :
 * - Validation stricte avant tout effet de bord
 * - Registration d'un id déjà connu = rotation du credential
 * - Erreurs store/validation remontées, erreurs réseau seulement loggées
 * - Premier fetch de statut immédiat, la boucle de sync prend le relais
 */

use crate::cache::{CachedStatus, StatusCache};
use crate::error::UnitError;
use crate::models::{Credential, RegistrationKind, RegistrationOutcome, RegistrationRequest, Unit, UnitToken};
use crate::remote::RemoteLink;
use crate::store::UnitStore;
use crate::tokens::TokenIssuer;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct UnitService {
    store: Arc<dyn UnitStore>,
    remote: Arc<dyn RemoteLink>,
    cache: Arc<StatusCache>,
    tokens: Arc<TokenIssuer>,
}

impl UnitService {
    pub fn new(
        store: Arc<dyn UnitStore>,
        remote: Arc<dyn RemoteLink>,
        cache: Arc<StatusCache>,
        tokens: Arc<TokenIssuer>,
    ) -> Self {
        Self {
            store,
            remote,
            cache,
            tokens,
        }
    }

    pub async fn register(&self, req: RegistrationRequest) -> Result<RegistrationOutcome, UnitError> {
        let missing = req.missing_fields();
        if !missing.is_empty() {
            return Err(UnitError::Validation(missing));
        }

        let mut unit = Unit {
            unit_id: req.unit_id.trim().to_string(),
            unit_name: req.unit_name,
            version: req.version.unwrap_or_default(),
            subscription_type: req.subscription_type.unwrap_or_default(),
            system_id: req.system_id.unwrap_or_default(),
            created: OffsetDateTime::now_utc(),
        };
        let credential = Credential::issue(&req.username, &req.password);

        // lecture de l'ancienne fiche et écriture dans la même section critique du store
        let kind = match self.store.put(unit.clone(), Some(credential.clone())).await? {
            None => RegistrationKind::New,
            Some(previous) => {
                unit.created = previous.unit.created;
                RegistrationKind::Reregistered {
                    previous_credential: previous.credential.map(|c| c.credential_id),
                }
            }
        };

        if let RegistrationKind::Reregistered { previous_credential } = &kind {
            let revoked = self.tokens.revoke_unit(&unit.unit_id);
            info!(
                unit_id = %unit.unit_id,
                previous_credential = ?previous_credential,
                revoked,
                "unit re-registered, credential rotated"
            );
        } else {
            info!(unit_id = %unit.unit_id, name = %unit.unit_name, "unit registered");
        }

        if let Err(e) = self.remote.push_credential(&unit, &credential).await {
            warn!(unit_id = %unit.unit_id, error = %e, "credential push failed");
        }
        let status_cached = self.refresh_status(&unit, &credential).await;

        Ok(RegistrationOutcome {
            unit,
            kind,
            status_cached,
        })
    }

    /// Fetch + écriture cache ; échec = entrée laissée telle quelle
    async fn refresh_status(&self, unit: &Unit, credential: &Credential) -> bool {
        let payload = match self.remote.fetch_status(unit, credential).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(unit_id = %unit.unit_id, error = %e, "initial status fetch failed, next sync will retry");
                return false;
            }
        };

        match self
            .cache
            .set_if_current(self.store.as_ref(), &unit.unit_id, credential.credential_id, payload)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                debug!(unit_id = %unit.unit_id, "unit deleted or re-registered during fetch, status dropped");
                false
            }
            Err(e) => {
                warn!(unit_id = %unit.unit_id, error = %e, "status not cached");
                false
            }
        }
    }

    pub async fn list_units(&self) -> Result<Vec<Unit>, UnitError> {
        Ok(self.store.list().await?)
    }

    pub async fn get_unit(&self, unit_id: &str) -> Result<Unit, UnitError> {
        self.store
            .get(unit_id)
            .await?
            .map(|record| record.unit)
            .ok_or_else(|| UnitError::NotFound(unit_id.to_string()))
    }

    /// Supprime la fiche, le statut en cache et les tokens de l'unité
    pub async fn delete_unit(&self, unit_id: &str) -> Result<(), UnitError> {
        if !self.store.delete(unit_id).await? {
            return Err(UnitError::NotFound(unit_id.to_string()));
        }
        self.cache.remove(unit_id);
        let revoked = self.tokens.revoke_unit(unit_id);
        info!(unit_id = %unit_id, revoked, "unit deleted");
        Ok(())
    }

    pub async fn issue_token(&self, unit_id: &str) -> Result<UnitToken, UnitError> {
        let unit = self.get_unit(unit_id).await?;
        let token = self.tokens.issue(&unit.unit_id);
        debug!(unit_id = %unit_id, expires_at = %token.expires_at, "token issued");
        Ok(token)
    }

    /// unit_id porté par un token encore valide
    pub fn validate_token(&self, token: &str) -> Option<String> {
        self.tokens.validate(token)
    }

    /// None = jamais synchronisée (différent de "unité down")
    pub fn cached_status(&self, unit_id: &str) -> Option<Arc<CachedStatus>> {
        self.cache.get(unit_id)
    }
}
