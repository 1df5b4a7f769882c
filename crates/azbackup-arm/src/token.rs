use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ArmError;

/// Scope for Azure Resource Manager calls.
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
/// Scope for the blob data plane.
pub const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

const DEFAULT_LOGIN_BASE: &str = "https://login.microsoftonline.com";

/// Abstraction over Azure token acquisition, so tests can inject a fixed token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self, scope: &str) -> Result<String, ArmError>;
}

/// Pick a provider: service principal when both client id and secret are
/// present, otherwise the Azure CLI's logged-in account.
pub fn token_provider(
    tenant_id: &str,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> Arc<dyn TokenProvider> {
    match (client_id, client_secret) {
        (Some(cid), Some(cs)) if !cid.is_empty() && !cs.is_empty() => {
            Arc::new(ServicePrincipalTokenProvider::new(tenant_id, cid, cs))
        }
        _ => Arc::new(AzureCliTokenProvider {
            tenant_id: Some(tenant_id.to_string()).filter(|t| !t.is_empty()),
        }),
    }
}

// ── Service Principal ─────────────────────────────────────────────────────────

/// Client-credentials flow against Entra ID, caching one token per scope
/// until a minute before it expires.
pub struct ServicePrincipalTokenProvider {
    tenant_id:     String,
    client_id:     String,
    client_secret: String,
    login_base:    String,
    client:        reqwest::Client,
    cache:         Mutex<HashMap<String, (String, Instant)>>,
}

impl ServicePrincipalTokenProvider {
    pub fn new(tenant_id: &str, client_id: &str, client_secret: &str) -> Self {
        Self::with_login_base(tenant_id, client_id, client_secret, DEFAULT_LOGIN_BASE)
    }

    pub fn with_login_base(tenant_id: &str, client_id: &str, client_secret: &str, login_base: &str) -> Self {
        Self {
            tenant_id:     tenant_id.to_string(),
            client_id:     client_id.to_string(),
            client_secret: client_secret.to_string(),
            login_base:    login_base.trim_end_matches('/').to_string(),
            client:        reqwest::Client::new(),
            cache:         Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TokenProvider for ServicePrincipalTokenProvider {
    async fn token(&self, scope: &str) -> Result<String, ArmError> {
        {
            let guard = self.cache.lock().await;
            if let Some((tok, expiry)) = guard.get(scope) {
                if Instant::now() < *expiry {
                    return Ok(tok.clone());
                }
            }
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.login_base, self.tenant_id);
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];
        debug!(scope, "requesting service principal token");
        let resp: Value = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ArmError::Token(format!("SP token request: {}", e)))?
            .json()
            .await
            .map_err(|e| ArmError::Token(format!("SP token decode: {}", e)))?;

        let tok = resp["access_token"]
            .as_str()
            .ok_or_else(|| {
                let reason = resp["error_description"].as_str().unwrap_or("no access_token in response");
                ArmError::Token(format!("SP token: {}", reason))
            })?
            .to_string();
        let expires_in = resp["expires_in"].as_u64().unwrap_or(3600);
        let expiry = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60));

        self.cache.lock().await.insert(scope.to_string(), (tok.clone(), expiry));
        Ok(tok)
    }
}

// ── Azure CLI ─────────────────────────────────────────────────────────────────

pub struct AzureCliTokenProvider {
    pub tenant_id: Option<String>,
}

#[async_trait]
impl TokenProvider for AzureCliTokenProvider {
    async fn token(&self, scope: &str) -> Result<String, ArmError> {
        let mut cmd = Command::new("az");
        cmd.args(["account", "get-access-token", "--scope", scope, "--output", "json"]);
        if let Some(tenant) = &self.tenant_id {
            cmd.args(["--tenant", tenant]);
        }
        let output = cmd.output().await.map_err(|e| {
            ArmError::Token(format!(
                "az CLI not found: {}. Install Azure CLI or configure service principal credentials.",
                e
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ArmError::Token(format!(
                "az account get-access-token failed: {}. Run 'az login' first.",
                stderr.trim()
            )));
        }

        let resp: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ArmError::Token(format!("az CLI output parse: {}", e)))?;
        resp["accessToken"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ArmError::Token("az CLI: no accessToken in output".into()))
    }
}

// ── Static (tests) ────────────────────────────────────────────────────────────

/// The same bearer token for every scope.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self, _scope: &str) -> Result<String, ArmError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[tokio::test]
    async fn service_principal_token_is_cached_per_scope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("client_id=client-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok-abc",
                "expires_in": 3599
            })))
            .expect(2)
            .mount(&server)
            .await;

        let sp = ServicePrincipalTokenProvider::with_login_base("tenant-1", "client-1", "s3cret", &server.uri());
        assert_eq!(sp.token(MANAGEMENT_SCOPE).await.unwrap(), "tok-abc");
        assert_eq!(sp.token(MANAGEMENT_SCOPE).await.unwrap(), "tok-abc");
        // A different scope is a separate token.
        assert_eq!(sp.token(STORAGE_SCOPE).await.unwrap(), "tok-abc");
    }

    #[tokio::test]
    async fn service_principal_error_description_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client",
                "error_description": "AADSTS7000215: Invalid client secret provided."
            })))
            .mount(&server)
            .await;

        let sp = ServicePrincipalTokenProvider::with_login_base("tenant-1", "client-1", "bad", &server.uri());
        let err = sp.token(MANAGEMENT_SCOPE).await.unwrap_err();
        assert!(err.to_string().contains("AADSTS7000215"), "got: {}", err);
    }

    #[tokio::test]
    async fn static_token_ignores_scope() {
        let t = StaticToken("fixed".into());
        assert_eq!(t.token(STORAGE_SCOPE).await.unwrap(), "fixed");
    }
}
