//! Tokens d'accès scopés à une unité.
//!
//! Opaques (64 hex), gardés en mémoire uniquement : un redémarrage du
//! contrôleur invalide tous les tokens émis.

use crate::models::UnitToken;
use dashmap::DashMap;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

struct Grant {
    unit_id: String,
    expires_at: OffsetDateTime,
}

pub struct TokenIssuer {
    grants: DashMap<String, Grant>,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            grants: DashMap::new(),
            ttl,
        }
    }

    pub fn issue(&self, unit_id: &str) -> UnitToken {
        let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        let issued_at = OffsetDateTime::now_utc();
        let expires_at = issued_at + self.ttl;

        // purge des grants expirés jamais présentés
        self.grants.retain(|_, grant| grant.expires_at > issued_at);
        self.grants.insert(
            token.clone(),
            Grant {
                unit_id: unit_id.to_string(),
                expires_at,
            },
        );

        UnitToken {
            token,
            unit_id: unit_id.to_string(),
            issued_at,
            expires_at,
        }
    }

    /// unit_id associé au token, None si inconnu ou expiré
    pub fn validate(&self, token: &str) -> Option<String> {
        let now = OffsetDateTime::now_utc();
        let grant = self.grants.get(token)?;
        if grant.expires_at > now {
            return Some(grant.unit_id.clone());
        }
        drop(grant); // libère le shard avant remove
        self.grants.remove(token);
        None
    }

    /// Révoque tous les tokens d'une unité, retourne le nombre supprimé
    pub fn revoke_unit(&self, unit_id: &str) -> usize {
        let before = self.grants.len();
        self.grants.retain(|_, grant| grant.unit_id != unit_id);
        before.saturating_sub(self.grants.len())
    }
}
