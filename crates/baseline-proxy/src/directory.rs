//! Counterparty directory
//!
//! Caches, per organization address:
//!
//! - `baseline.organization.{address}` → the participant (address + URL)
//! - `baseline.organization.{address}.credential` → vault secret id of the
//!   peer-issued verifiable credential
//!
//! An endpoint miss falls back to the on-chain registry: `getOrg(address)`
//! returns a tuple whose third element is the base64-encoded messaging URL.
//! All writes are serialized by a lock named for the cache key.

use crate::config::CounterpartyConfig;
use crate::context::TokenVendor;
use crate::error::{ProxyError, Result};
use crate::kv::{KvStore, MutexRegistry};
use base64::Engine;
use baseline_clients::{ChainClient, VaultClient};
use baseline_types::Participant;
use std::sync::Arc;
use uuid::Uuid;

pub struct CounterpartyDirectory {
    kv: Arc<KvStore>,
    locks: Arc<MutexRegistry>,
    tokens: Arc<TokenVendor>,
    vault: Arc<dyn VaultClient>,
    chain: Arc<dyn ChainClient>,
    vault_id: Option<Uuid>,
    registry_contract_address: Option<String>,
    default_counterparties: Vec<CounterpartyConfig>,
}

fn organization_key(address: &str) -> String {
    format!("baseline.organization.{address}")
}

fn credential_key(address: &str) -> String {
    format!("baseline.organization.{address}.credential")
}

impl CounterpartyDirectory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kv: Arc<KvStore>,
        locks: Arc<MutexRegistry>,
        tokens: Arc<TokenVendor>,
        vault: Arc<dyn VaultClient>,
        chain: Arc<dyn ChainClient>,
        vault_id: Option<Uuid>,
        registry_contract_address: Option<String>,
        default_counterparties: Vec<CounterpartyConfig>,
    ) -> Self {
        Self {
            kv,
            locks,
            tokens,
            vault,
            chain,
            vault_id,
            registry_contract_address,
            default_counterparties,
        }
    }

    pub fn lookup_organization(&self, address: &str) -> Option<Participant> {
        let raw = self.kv.get(&organization_key(address))?;
        serde_json::from_str(&raw).ok()
    }

    /// Cache a participant under its organization key
    pub async fn cache_organization(&self, participant: &Participant) -> Result<()> {
        let address = participant
            .address
            .as_deref()
            .ok_or_else(|| ProxyError::Config("cannot cache participant without address".into()))?;

        let key = organization_key(address);
        let _guard = self.locks.lock(&key).await;
        self.kv.set(key, serde_json::to_string(participant)?);
        Ok(())
    }

    /// Resolve a counterparty's messaging endpoint, falling back to the
    /// on-chain registry on a cache miss and caching the result.
    pub async fn resolve_messaging_endpoint(&self, address: &str) -> Result<Option<String>> {
        if let Some(org) = self.lookup_organization(address) {
            if org.url.is_some() {
                return Ok(org.url);
            }
        }

        let registry_address = match self.registry_contract_address.as_deref() {
            Some(addr) => addr,
            None => {
                tracing::warn!(
                    address,
                    "cannot resolve messaging endpoint without a registry contract address"
                );
                return Ok(None);
            }
        };

        let token = self.tokens.vend().await?;
        let encoded = self.chain.get_org(&token, registry_address, address).await?;

        let encoded = match encoded.as_str() {
            Some(encoded) => encoded.to_string(),
            None => {
                tracing::warn!(address, "registry returned a non-string messaging endpoint");
                return Ok(None);
            }
        };

        let endpoint = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());

        let Some(endpoint) = endpoint else {
            tracing::warn!(address, "failed to base64 decode registry messaging endpoint");
            return Ok(None);
        };

        let participant = Participant::new(address).with_url(endpoint.clone());
        self.cache_organization(&participant).await?;
        tracing::debug!(address, endpoint = %endpoint, "resolved counterparty messaging endpoint");

        Ok(Some(endpoint))
    }

    /// Fetch the cached verifiable credential issued by a counterparty
    pub async fn lookup_issued_vc(&self, address: &str) -> Option<String> {
        let secret_id = self.kv.get(&credential_key(address))?;
        let vault_id = self.vault_id?;

        let token = match self.tokens.vend().await {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(address, error = %err, "failed to vend token for credential fetch");
                return None;
            }
        };

        match self.vault.fetch_secret(&token, &vault_id, &secret_id).await {
            Ok(secret) => Some(secret.value),
            Err(err) => {
                tracing::warn!(address, error = %err, "failed to fetch cached verifiable credential");
                None
            }
        }
    }

    /// Persist a counterparty-issued verifiable credential in the vault and
    /// cache the secret id under the credential key.
    pub async fn cache_issued_vc(&self, address: &str, vc: &str) -> Result<()> {
        let vault_id = self
            .vault_id
            .ok_or_else(|| ProxyError::Config("vault id not configured".into()))?;

        let token = self.tokens.vend().await?;
        let secret_name = format!("verifiable credential for {address}");
        let secret = self
            .vault
            .create_secret(
                &token,
                &vault_id,
                vc,
                &secret_name,
                &secret_name,
                "verifiable_credential",
            )
            .await?;

        let key = credential_key(address);
        let _guard = self.locks.lock(&key).await;
        self.kv.set(key, secret.id.to_string());
        Ok(())
    }

    /// Seed the directory with the statically configured counterparties
    pub async fn resolve_counterparties(&self) {
        tracing::debug!(
            count = self.default_counterparties.len(),
            "resolving baseline counterparties"
        );

        for counterparty in self.default_counterparties.clone() {
            let mut participant = Participant::new(&counterparty.address);
            if let Some(url) = &counterparty.url {
                participant = participant.with_url(url);
            }

            match self.cache_organization(&participant).await {
                Ok(()) => {
                    tracing::debug!(address = %counterparty.address, "cached baseline counterparty")
                }
                Err(err) => {
                    tracing::warn!(address = %counterparty.address, error = %err, "failed to cache counterparty")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use baseline_clients::{
        AccessToken, ChainClient, ClientError, IdentityClient, Secret, SecretRef, VaultClient,
    };
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct StaticIdentity;

    #[async_trait]
    impl IdentityClient for StaticIdentity {
        async fn create_token(
            &self,
            _refresh_token: &str,
            _organization_id: &str,
        ) -> baseline_clients::Result<AccessToken> {
            Ok(AccessToken {
                access_token: "jwt".into(),
            })
        }
    }

    struct StaticChain {
        endpoint: String,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl ChainClient for StaticChain {
        async fn execute_contract(
            &self,
            _token: &str,
            _contract_address: &str,
            method: &str,
            _params: Vec<Value>,
        ) -> baseline_clients::Result<Value> {
            assert_eq!(method, "getOrg");
            *self.calls.lock().unwrap() += 1;
            let encoded =
                base64::engine::general_purpose::STANDARD.encode(self.endpoint.as_bytes());
            Ok(json!(["0xname", "0xowner", encoded]))
        }
    }

    struct UnusedVault;

    #[async_trait]
    impl VaultClient for UnusedVault {
        async fn create_secret(
            &self,
            _token: &str,
            _vault_id: &Uuid,
            _value: &str,
            _name: &str,
            _description: &str,
            _kind: &str,
        ) -> baseline_clients::Result<SecretRef> {
            Err(ClientError::UnexpectedResponse("unused".into()))
        }

        async fn fetch_secret(
            &self,
            _token: &str,
            _vault_id: &Uuid,
            _secret_id: &str,
        ) -> baseline_clients::Result<Secret> {
            Err(ClientError::UnexpectedResponse("unused".into()))
        }
    }

    fn directory(chain: Arc<StaticChain>) -> CounterpartyDirectory {
        let identity: Arc<dyn IdentityClient> = Arc::new(StaticIdentity);
        let organization = Arc::new(std::sync::RwLock::new(crate::config::OrganizationConfig {
            organization_id: Some(Uuid::new_v4().to_string()),
            refresh_token: Some("refresh".into()),
            ..Default::default()
        }));

        CounterpartyDirectory::new(
            Arc::new(KvStore::new()),
            Arc::new(MutexRegistry::new()),
            Arc::new(TokenVendor::new(identity, organization)),
            Arc::new(UnusedVault),
            chain,
            None,
            Some("0xregistry".into()),
            vec![CounterpartyConfig {
                address: "0xseed".into(),
                url: Some("nats://seed.example:4222".into()),
            }],
        )
    }

    #[tokio::test]
    async fn test_endpoint_miss_resolves_via_registry() {
        let chain = Arc::new(StaticChain {
            endpoint: "nats://peer.example:4222".into(),
            calls: Mutex::new(0),
        });
        let directory = directory(chain.clone());

        let endpoint = directory
            .resolve_messaging_endpoint("0xpeer")
            .await
            .unwrap();
        assert_eq!(endpoint.as_deref(), Some("nats://peer.example:4222"));
        assert_eq!(*chain.calls.lock().unwrap(), 1);

        // second resolution hits the cache; no further chain calls
        let endpoint = directory
            .resolve_messaging_endpoint("0xpeer")
            .await
            .unwrap();
        assert_eq!(endpoint.as_deref(), Some("nats://peer.example:4222"));
        assert_eq!(*chain.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_default_counterparties_seeded() {
        let chain = Arc::new(StaticChain {
            endpoint: String::new(),
            calls: Mutex::new(0),
        });
        let directory = directory(chain);

        directory.resolve_counterparties().await;

        let org = directory.lookup_organization("0xseed").unwrap();
        assert_eq!(org.url.as_deref(), Some("nats://seed.example:4222"));
    }
}
