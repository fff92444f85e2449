//! Taxonomie d'erreurs du contrôleur.
//!
//! Validation/NotFound/Store remontent à l'appelant ; RemoteError n'est
//! jamais fatal pour la registration ni pour la boucle de sync.

/// Erreurs de la couche de persistance des unités
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Erreurs réseau vers une unité distante
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("unit {unit_id} did not answer within {timeout_secs}s")]
    Timeout { unit_id: String, timeout_secs: u64 },
    #[error("unit {unit_id} unreachable: {reason}")]
    Unreachable { unit_id: String, reason: String },
    #[error("unit {unit_id} answered HTTP {status}")]
    Status { unit_id: String, status: u16 },
    #[error("unit {unit_id} sent an invalid payload: {reason}")]
    Decode { unit_id: String, reason: String },
    #[error("invalid remote link configuration: {0}")]
    Config(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("status cache used before init()")]
    Uninitialized,
}

/// Erreurs exposées par le service des unités
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error("validation failed: missing or empty fields: {}", .0.join(", "))]
    Validation(Vec<&'static str>),
    #[error("unit not found: {0}")]
    NotFound(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
