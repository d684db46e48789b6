//! Server bootstrap
//!
//! Builds the HTTP clients, caches and registry from configuration, wires
//! each durable subject to its consumer, seeds the counterparty directory
//! and serves the HTTP edge.

use crate::api::{create_router, AppState};
use crate::config::{ProxyConfig, StorageConfig};
use crate::context::{ProxyContext, TokenVendor};
use crate::directory::CounterpartyDirectory;
use crate::error::{ProxyError, Result};
use crate::kv::{KvStore, MutexRegistry};
use crate::pipeline::{
    Dispatcher, HttpPeerGateway, InboundPipeline, InviteDispatcher, WorkflowDeployHandler,
    WorkstepDeployHandler, WorkstepFinalizeDeployHandler,
};
use crate::records::RecordStore;
use crate::registry::{
    InMemoryRegistryStorage, PostgresRegistryStorage, RegistryStorage, WorkflowRegistry,
};
use baseline_bus::{subject, ConsumerConfig, MessageBus};
use baseline_clients::{
    ChainClient, HttpChainClient, HttpIdentityClient, HttpPrivacyClient, HttpSorClient,
    HttpVaultClient, IdentityClient, PrivacyClient, SorClient, VaultClient,
};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

pub struct Server {
    state: AppState,
}

impl Server {
    pub async fn new(config: ProxyConfig) -> Result<Self> {
        let identity: Arc<dyn IdentityClient> =
            Arc::new(HttpIdentityClient::new(&config.services.ident_url)?);
        let vault: Arc<dyn VaultClient> = Arc::new(HttpVaultClient::new(&config.services.vault_url)?);
        let privacy: Arc<dyn PrivacyClient> =
            Arc::new(HttpPrivacyClient::new(&config.services.privacy_url)?);
        let chain: Arc<dyn ChainClient> = Arc::new(HttpChainClient::new(&config.services.nchain_url)?);

        let sor_url = config
            .services
            .sor_url
            .clone()
            .ok_or_else(|| ProxyError::Config("system of record url not configured".into()))?;
        let sor: Arc<dyn SorClient> = Arc::new(HttpSorClient::new(
            sor_url,
            config.services.sor_bearer_token.clone(),
        )?);

        let organization = Arc::new(RwLock::new(config.organization.clone()));
        let tokens = Arc::new(TokenVendor::new(identity.clone(), organization.clone()));

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
            chain,
            vault_id,
            config.registry.contract_address.clone(),
            config.registry.default_counterparties.clone(),
        ));

        let bus = MessageBus::new();

        let storage: Arc<dyn RegistryStorage> = match &config.storage {
            StorageConfig::Memory => Arc::new(InMemoryRegistryStorage::new()),
            StorageConfig::Postgres {
                url,
                max_connections,
                connect_timeout_secs,
            } => Arc::new(
                PostgresRegistryStorage::connect(url, *max_connections, *connect_timeout_secs)
                    .await?,
            ),
        };
        let registry = Arc::new(WorkflowRegistry::new(storage, bus.clone(), privacy.clone()));

        let ctx = Arc::new(ProxyContext {
            config,
            organization,
            tokens,
            privacy,
            sor,
            bus,
            records,
            directory,
            registry,
        });

        Ok(Self {
            state: AppState::new(ctx),
        })
    }

    /// Subscribe each durable subject to its consumer and install the
    /// non-durable relay from `baseline` into `baseline.inbound`.
    fn subscribe_consumers(&self) -> Result<()> {
        let ctx = &self.state.ctx;
        let bus = &ctx.bus;
        let workers = ctx.config.bus.consumer_concurrency;
        let config = ConsumerConfig::default();

        bus.relay(subject::SUBJECT_BASELINE, subject::SUBJECT_INBOUND);

        bus.subscribe(
            subject::SUBJECT_INBOUND,
            config.clone(),
            workers,
            Arc::new(InboundPipeline::new(ctx.clone())),
        );

        let gateway = Arc::new(HttpPeerGateway::new().map_err(ProxyError::Server)?);
        bus.subscribe(
            subject::SUBJECT_PROTOCOL_MESSAGE_OUTBOUND,
            config.clone(),
            workers,
            Arc::new(Dispatcher::new(ctx.clone(), gateway)),
        );

        bus.subscribe(
            subject::SUBJECT_INVITATION_OUTBOUND,
            config.clone(),
            workers,
            Arc::new(InviteDispatcher::new()),
        );

        bus.subscribe(
            subject::SUBJECT_WORKSTEP_DEPLOY,
            config.clone(),
            workers,
            Arc::new(WorkstepDeployHandler::new(ctx.clone())),
        );
        bus.subscribe(
            subject::SUBJECT_WORKSTEP_FINALIZE_DEPLOY,
            config.clone(),
            workers,
            Arc::new(WorkstepFinalizeDeployHandler::new(ctx.clone())),
        );
        bus.subscribe(
            subject::SUBJECT_WORKFLOW_DEPLOY,
            config,
            workers,
            Arc::new(WorkflowDeployHandler::new(ctx.clone())),
        );

        Ok(())
    }

    pub async fn run(self) -> Result<()> {
        self.subscribe_consumers()?;

        // seed the directory off the serving path
        let directory = self.state.ctx.directory.clone();
        tokio::spawn(async move {
            directory.resolve_counterparties().await;
        });

        let listen_addr = self.state.ctx.config.server.listen_addr;
        let listener = tokio::net::TcpListener::bind(listen_addr).await?;
        tracing::info!(listen_addr = %listen_addr, "baseline proxy listening");

        axum::serve(listener, create_router(self.state.clone()))
            .await
            .map_err(|err| ProxyError::Server(err.to_string()))
    }
}
