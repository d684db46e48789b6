//! Shared test fixtures: recording mock clients and a proxy context wired
//! to in-memory storage.

use async_trait::async_trait;
use base64::Engine;
use baseline_bus::MessageBus;
use baseline_clients::{
    AccessToken, ChainClient, ClientError, IdentityClient, PrivacyClient, ProveResponse, Secret,
    SecretRef, SorClient, VaultClient, VerifyResponse,
};
use baseline_proxy::config::{OrganizationConfig, ProxyConfig};
use baseline_proxy::context::{ProxyContext, TokenVendor};
use baseline_proxy::directory::CounterpartyDirectory;
use baseline_proxy::kv::{KvStore, MutexRegistry};
use baseline_proxy::pipeline::PeerGateway;
use baseline_proxy::records::RecordStore;
use baseline_proxy::registry::{InMemoryRegistryStorage, WorkflowRegistry};
use baseline_types::Prover;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

pub const ORG_ADDRESS: &str = "0xorg-local";
pub const PEER_ADDRESS: &str = "0xorg-peer";
pub const PEER_ENDPOINT: &str = "nats://peer.example:4222";

pub struct MockIdentity;

#[async_trait]
impl IdentityClient for MockIdentity {
    async fn create_token(
        &self,
        _refresh_token: &str,
        _organization_id: &str,
    ) -> baseline_clients::Result<AccessToken> {
        Ok(AccessToken {
            access_token: "test-access-token".into(),
        })
    }
}

/// Privacy service double; records prover/prove/verify traffic
pub struct MockPrivacy {
    pub verify_result: AtomicBool,
    pub created: Mutex<Vec<Value>>,
    pub proved: Mutex<Vec<(String, Value)>>,
    pub verified: Mutex<Vec<(String, Value, Value)>>,
}

impl MockPrivacy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            verify_result: AtomicBool::new(true),
            created: Mutex::new(Vec::new()),
            proved: Mutex::new(Vec::new()),
            verified: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl PrivacyClient for MockPrivacy {
    async fn create_prover(&self, _token: &str, params: Value) -> baseline_clients::Result<Prover> {
        self.created.lock().unwrap().push(params.clone());
        Ok(Prover {
            id: Some(Uuid::new_v4()),
            identifier: params
                .get("identifier")
                .and_then(Value::as_str)
                .map(str::to_string),
            name: params.get("name").and_then(Value::as_str).map(str::to_string),
            provider: Some("gnark".into()),
            proving_scheme: Some("groth16".into()),
            curve: Some("BN256".into()),
            status: Some("provisioned".into()),
            ..Default::default()
        })
    }

    async fn fetch_prover(&self, _token: &str, prover_id: &str) -> baseline_clients::Result<Prover> {
        Ok(Prover {
            id: Uuid::parse_str(prover_id).ok(),
            status: Some("provisioned".into()),
            ..Default::default()
        })
    }

    async fn prove(
        &self,
        _token: &str,
        prover_id: &str,
        witness: Value,
    ) -> baseline_clients::Result<ProveResponse> {
        self.proved
            .lock()
            .unwrap()
            .push((prover_id.to_string(), witness));
        Ok(ProveResponse {
            proof: json!("proof-material"),
        })
    }

    async fn verify(
        &self,
        _token: &str,
        prover_id: &str,
        _store: bool,
        proof: Value,
        witness: Value,
    ) -> baseline_clients::Result<VerifyResponse> {
        self.verified
            .lock()
            .unwrap()
            .push((prover_id.to_string(), proof, witness));
        Ok(VerifyResponse {
            result: self.verify_result.load(Ordering::SeqCst),
        })
    }
}

/// System-of-record double; every created object gets a fresh internal id
pub struct MockSor {
    pub created: Mutex<Vec<Value>>,
    pub updated: Mutex<Vec<(String, Value)>>,
    pub statuses: Mutex<Vec<(String, Value)>>,
    next_id: AtomicU32,
}

impl MockSor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            created: Mutex::new(Vec::new()),
            updated: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
        })
    }
}

#[async_trait]
impl SorClient for MockSor {
    async fn create_object(&self, params: Value) -> baseline_clients::Result<Value> {
        self.created.lock().unwrap().push(params);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "id": format!("sor-obj-{id}") }))
    }

    async fn update_object(&self, id: &str, payload: Value) -> baseline_clients::Result<()> {
        self.updated.lock().unwrap().push((id.to_string(), payload));
        Ok(())
    }

    async fn update_object_status(&self, id: &str, params: Value) -> baseline_clients::Result<()> {
        self.statuses.lock().unwrap().push((id.to_string(), params));
        Ok(())
    }
}

/// Chain double serving `getOrg` lookups for one peer
pub struct MockChain {
    pub calls: Mutex<u32>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(0),
        })
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn execute_contract(
        &self,
        _token: &str,
        _contract_address: &str,
        method: &str,
        params: Vec<Value>,
    ) -> baseline_clients::Result<Value> {
        assert_eq!(method, "getOrg");
        *self.calls.lock().unwrap() += 1;

        let address = params
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if address != PEER_ADDRESS {
            return Err(ClientError::Rpc {
                status: 404,
                body: "org not registered".into(),
            });
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(PEER_ENDPOINT.as_bytes());
        Ok(json!(["Peer Org", address, encoded]))
    }
}

/// Vault double with an in-memory secret store
pub struct MockVault {
    secrets: Mutex<HashMap<String, String>>,
}

impl MockVault {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            secrets: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl VaultClient for MockVault {
    async fn create_secret(
        &self,
        _token: &str,
        _vault_id: &Uuid,
        value: &str,
        _name: &str,
        _description: &str,
        _kind: &str,
    ) -> baseline_clients::Result<SecretRef> {
        let id = Uuid::new_v4();
        self.secrets
            .lock()
            .unwrap()
            .insert(id.to_string(), value.to_string());
        Ok(SecretRef { id })
    }

    async fn fetch_secret(
        &self,
        _token: &str,
        _vault_id: &Uuid,
        secret_id: &str,
    ) -> baseline_clients::Result<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(secret_id)
            .map(|value| Secret {
                value: value.clone(),
            })
            .ok_or_else(|| ClientError::Rpc {
                status: 404,
                body: "secret not found".into(),
            })
    }
}

/// Peer gateway double recording publishes
pub struct MockPeerGateway {
    pub published: Mutex<Vec<(String, String, Vec<u8>)>>,
    pub credential: Option<String>,
    pub fail_publish: AtomicBool,
}

impl MockPeerGateway {
    pub fn new(credential: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            published: Mutex::new(Vec::new()),
            credential: credential.map(str::to_string),
            fail_publish: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl PeerGateway for MockPeerGateway {
    async fn publish(
        &self,
        endpoint: &str,
        _bearer_token: &str,
        _connection_name: &str,
        subject: &str,
        payload: &[u8],
    ) -> Result<(), String> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        self.published
            .lock()
            .unwrap()
            .push((endpoint.to_string(), subject.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn request_credential(
        &self,
        _endpoint: &str,
        _address: &str,
    ) -> Result<String, String> {
        self.credential
            .clone()
            .ok_or_else(|| "credential endpoint unavailable".into())
    }
}

/// Everything a pipeline test needs, with handles onto the doubles
pub struct TestHarness {
    pub ctx: Arc<ProxyContext>,
    pub privacy: Arc<MockPrivacy>,
    pub sor: Arc<MockSor>,
    pub chain: Arc<MockChain>,
}

pub fn harness() -> TestHarness {
    let mut config = ProxyConfig::default();
    config.organization = OrganizationConfig {
        address: Some(ORG_ADDRESS.into()),
        organization_id: Some(Uuid::new_v4().to_string()),
        refresh_token: Some("refresh-token".into()),
        workgroup_id: None,
        messaging_endpoint: Some("nats://local.example:4222".into()),
        vault_id: Some(Uuid::new_v4().to_string()),
    };
    config.registry.contract_address = Some("0xregistry".into());

    let identity: Arc<dyn IdentityClient> = Arc::new(MockIdentity);
    let privacy = MockPrivacy::new();
    let sor = MockSor::new();
    let chain = MockChain::new();
    let vault = MockVault::new();

    let organization = Arc::new(RwLock::new(config.organization.clone()));
    let tokens = Arc::new(TokenVendor::new(identity, organization.clone()));

    let kv = Arc::new(KvStore::new());
    let locks = Arc::new(MutexRegistry::new());
    let records = Arc::new(RecordStore::new(kv.clone(), locks.clone()));

    let vault_id = config
        .organization
        .vault_id
        .as_deref()
        .and_then(|id| Uuid::parse_str(id).ok());
    let directory = Arc::new(CounterpartyDirectory::new(
        kv,
        locks,
        tokens.clone(),
        vault,
        chain.clone(),
        vault_id,
        config.registry.contract_address.clone(),
        Vec::new(),
    ));

    let bus = MessageBus::new();
    let storage = Arc::new(InMemoryRegistryStorage::new());
    let registry = Arc::new(WorkflowRegistry::new(
        storage,
        bus.clone(),
        privacy.clone(),
    ));

    let ctx = Arc::new(ProxyContext {
        config,
        organization,
        tokens,
        privacy: privacy.clone(),
        sor: sor.clone(),
        bus,
        records,
        directory,
        registry,
    });

    TestHarness {
        ctx,
        privacy,
        sor,
        chain,
    }
}
