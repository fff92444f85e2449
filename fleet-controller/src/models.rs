use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;
use uuid::Uuid;

/// Fiche publique d'une unité enregistrée (jamais de secret ici)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub unit_id: String,
    pub unit_name: String,
    pub version: String,
    pub subscription_type: String,
    pub system_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

/// Requête de registration envoyée par l'unité elle-même
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationRequest {
    #[serde(default)]
    pub unit_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub unit_name: String,
    pub version: Option<String>,
    pub subscription_type: Option<String>,
    pub system_id: Option<String>,
}

impl RegistrationRequest {
    /// Liste des champs obligatoires absents ou vides
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("unit_id", &self.unit_id),
            ("username", &self.username),
            ("password", &self.password),
            ("unit_name", &self.unit_name),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Secret permettant au contrôleur de s'authentifier sur l'API de l'unité
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    pub credential_id: Uuid,
    pub username: String,
    #[serde(serialize_with = "expose_password", deserialize_with = "wrap_password")]
    pub password: SecretString,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
}

impl Credential {
    /// Nouveau credential : chaque appel produit un credential_id différent
    pub fn issue(username: &str, password: &str) -> Self {
        Self {
            credential_id: Uuid::new_v4(),
            username: username.to_string(),
            password: SecretString::from(password.to_string()),
            issued_at: OffsetDateTime::now_utc(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("credential_id", &self.credential_id)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

fn expose_password<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

fn wrap_password<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

/// Enregistrement persistant : fiche publique + credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    pub unit: Unit,
    pub credential: Option<Credential>,
}

/// Branche prise par une registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationKind {
    New,
    /// L'unité existait déjà : métadonnées mises à jour, credential tourné
    Reregistered { previous_credential: Option<Uuid> },
}

#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub unit: Unit,
    pub kind: RegistrationKind,
    /// true si le premier fetch de statut a alimenté le cache
    pub status_cached: bool,
}

/// Token d'accès scopé à une seule unité
#[derive(Debug, Clone, Serialize)]
pub struct UnitToken {
    pub token: String,
    pub unit_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}
