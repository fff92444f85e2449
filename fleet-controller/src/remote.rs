/**
 * REMOTE LINK - Appels réseau vers une unité distante
 *
 * RÔLE : récupérer le statut live d'une unité ("remote info") et lui pousser
 * son credential au moment de la registration.
 *
 * FONCTIONNEMENT :
 * - URL de base construite depuis un template `{unit_id}` (config)
 * - Timeout par appel : une unité injoignable ne bloque pas un cycle de sync
 * - Aucun retry ici, la politique appartient à l'appelant
 */

use crate::config::RemoteConf;
use crate::error::RemoteError;
use crate::models::{Credential, Unit};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;

#[async_trait]
pub trait RemoteLink: Send + Sync {
    /// Statut auto-déclaré de l'unité, payload opaque
    async fn fetch_status(&self, unit: &Unit, credential: &Credential) -> Result<serde_json::Value, RemoteError>;

    async fn push_credential(&self, unit: &Unit, credential: &Credential) -> Result<(), RemoteError>;
}

pub struct HttpRemoteLink {
    client: reqwest::Client,
    url_template: String,
    timeout: Duration,
}

impl HttpRemoteLink {
    pub fn new(conf: &RemoteConf) -> Result<Self, RemoteError> {
        if conf.url_template.trim().is_empty() {
            return Err(RemoteError::Config("empty url_template".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(conf.timeout())
            .danger_accept_invalid_certs(conf.accept_invalid_certs)
            .build()
            .map_err(|e| RemoteError::Config(e.to_string()))?;

        Ok(Self {
            client,
            url_template: conf.url_template.clone(),
            timeout: conf.timeout(),
        })
    }

    fn base_url(&self, unit_id: &str) -> String {
        self.url_template
            .replace("{unit_id}", unit_id)
            .trim_end_matches('/')
            .to_string()
    }

    fn request_error(&self, unit_id: &str, e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout {
                unit_id: unit_id.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else if e.is_decode() {
            RemoteError::Decode {
                unit_id: unit_id.to_string(),
                reason: e.to_string(),
            }
        } else {
            RemoteError::Unreachable {
                unit_id: unit_id.to_string(),
                reason: e.to_string(),
            }
        }
    }

    fn check_status(unit_id: &str, response: &reqwest::Response) -> Result<(), RemoteError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RemoteError::Status {
                unit_id: unit_id.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl RemoteLink for HttpRemoteLink {
    async fn fetch_status(&self, unit: &Unit, credential: &Credential) -> Result<serde_json::Value, RemoteError> {
        let url = format!("{}/api/info", self.base_url(&unit.unit_id));
        let response = self
            .client
            .get(&url)
            .basic_auth(&credential.username, Some(credential.password.expose_secret()))
            .send()
            .await
            .map_err(|e| self.request_error(&unit.unit_id, e))?;

        Self::check_status(&unit.unit_id, &response)?;
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| self.request_error(&unit.unit_id, e))
    }

    async fn push_credential(&self, unit: &Unit, credential: &Credential) -> Result<(), RemoteError> {
        let url = format!("{}/api/controller/credential", self.base_url(&unit.unit_id));
        let body = serde_json::json!({
            "unit_id": unit.unit_id,
            "credential_id": credential.credential_id.to_string(),
            "issued_at": credential.issued_at.format(&Rfc3339).unwrap_or_default(),
        });

        let response = self
            .client
            .post(&url)
            .basic_auth(&credential.username, Some(credential.password.expose_secret()))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(&unit.unit_id, e))?;

        Self::check_status(&unit.unit_id, &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::OffsetDateTime;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn unit(id: &str) -> Unit {
        Unit {
            unit_id: id.into(),
            unit_name: "edge".into(),
            version: String::new(),
            subscription_type: String::new(),
            system_id: String::new(),
            created: OffsetDateTime::now_utc(),
        }
    }

    async fn setup(timeout_secs: u64) -> (MockServer, HttpRemoteLink) {
        let server = MockServer::start().await;
        let conf = RemoteConf {
            url_template: format!("{}/units/{{unit_id}}/", server.uri()),
            timeout_secs,
            accept_invalid_certs: false,
        };
        (server, HttpRemoteLink::new(&conf).unwrap())
    }

    #[tokio::test]
    async fn test_fetch_status_success() {
        let (server, link) = setup(5).await;
        Mock::given(method("GET"))
            .and(path("/units/u1/api/info"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hostname": "fw-1"})))
            .mount(&server)
            .await;

        let info = link.fetch_status(&unit("u1"), &Credential::issue("root", "pw")).await.unwrap();
        assert_eq!(info, json!({"hostname": "fw-1"}));
    }

    #[tokio::test]
    async fn test_fetch_status_http_error() {
        let (server, link) = setup(5).await;
        Mock::given(method("GET"))
            .and(path("/units/u1/api/info"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = link.fetch_status(&unit("u1"), &Credential::issue("root", "bad")).await;
        assert!(
            matches!(result, Err(RemoteError::Status { status: 401, .. })),
            "expected Status error, got: {result:?}"
        );
    }

    #[tokio::test]
    async fn test_fetch_status_invalid_json() {
        let (server, link) = setup(5).await;
        Mock::given(method("GET"))
            .and(path("/units/u1/api/info"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let result = link.fetch_status(&unit("u1"), &Credential::issue("root", "pw")).await;
        assert!(matches!(result, Err(RemoteError::Decode { .. })), "got: {result:?}");
    }

    #[tokio::test]
    async fn test_fetch_status_timeout() {
        let (server, link) = setup(1).await;
        Mock::given(method("GET"))
            .and(path("/units/slow/api/info"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let result = link.fetch_status(&unit("slow"), &Credential::issue("root", "pw")).await;
        assert!(matches!(result, Err(RemoteError::Timeout { timeout_secs: 1, .. })), "got: {result:?}");
    }

    #[tokio::test]
    async fn test_push_credential() {
        let (server, link) = setup(5).await;
        Mock::given(method("POST"))
            .and(path("/units/u1/api/controller/credential"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        link.push_credential(&unit("u1"), &Credential::issue("root", "pw")).await.unwrap();
    }

    #[test]
    fn test_empty_template_is_rejected() {
        let conf = RemoteConf {
            url_template: "  ".into(),
            ..RemoteConf::default()
        };
        assert!(matches!(HttpRemoteLink::new(&conf), Err(RemoteError::Config(_))));
    }
}
