use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dyad_dtl::{client_transport, ClientTransport, DtlMode};
use dyad_kvs::MetadataStore;
use dyad_storage::StorageView;
use dyad_types::ParticipantId;
use tokio::sync::Mutex;

use crate::config::DyadConfig;
use crate::error::DyadError;

/// Per-participant state shared by every produce and consume.
pub struct ManagedContext {
    config: DyadConfig,
    store: Arc<dyn MetadataStore>,
    self_id: ParticipantId,
    mode: DtlMode,
    pub(crate) transport: Mutex<Box<dyn ClientTransport>>,
    storage: Option<StorageView>,
    reenter: AtomicBool,
    initialized: AtomicBool,
    sync_health: AtomicBool,
}

impl std::fmt::Debug for ManagedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedContext")
            .field("self_id", &self.self_id)
            .field("mode", &self.mode)
            .field("namespace", &self.config.kvs_namespace)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl ManagedContext {
    /// Validate `config`, bring up the consumer transport and, when asked
    /// to, read the mount table.
    pub async fn init(config: DyadConfig, store: Arc<dyn MetadataStore>) -> Result<Self, DyadError> {
        config.validate()?;
        let transport = client_transport(config.dtl.mode, &config.dtl, store.rank()).await?;
        let ctx = Self::with_transport(config, store, transport)?;
        Ok(if ctx.config.topology_check {
            match StorageView::from_mounts() {
                Ok(view) => ctx.with_storage_view(view),
                Err(status) => {
                    tracing::warn!(%status, "storage topology unavailable, transfers always copy");
                    ctx
                }
            }
        } else {
            ctx
        })
    }

    /// Like [`init`](Self::init), configured from `DYAD_*` variables only.
    pub async fn from_env(store: Arc<dyn MetadataStore>) -> Result<Self, DyadError> {
        let mut config = DyadConfig::default();
        config.apply_env()?;
        Self::init(config, store).await
    }

    /// Build a context around an already constructed transport.
    pub fn with_transport(
        config: DyadConfig,
        store: Arc<dyn MetadataStore>,
        transport: Box<dyn ClientTransport>,
    ) -> Result<Self, DyadError> {
        config.validate()?;
        let self_id = store.rank();
        if config.participant() != self_id {
            tracing::warn!(
                configured = config.rank,
                %self_id,
                "configured rank differs from the store's rank, records are owned by the store's"
            );
        }
        let mode = transport.mode();
        tracing::info!(
            %self_id,
            %mode,
            namespace = %config.kvs_namespace,
            producer = ?config.producer_path,
            consumer = ?config.consumer_path,
            "dyad context initialized"
        );
        Ok(Self {
            config,
            store,
            self_id,
            mode,
            transport: Mutex::new(transport),
            storage: None,
            reenter: AtomicBool::new(true),
            initialized: AtomicBool::new(true),
            sync_health: AtomicBool::new(false),
        })
    }

    pub fn with_storage_view(mut self, view: StorageView) -> Self {
        tracing::debug!(mounts = view.len(), "storage view attached");
        self.storage = Some(view);
        self
    }

    pub fn config(&self) -> &DyadConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn self_id(&self) -> ParticipantId {
        self.self_id
    }

    pub fn mode(&self) -> DtlMode {
        self.mode
    }

    pub fn namespace(&self) -> &str {
        &self.config.kvs_namespace
    }

    pub fn producer_root(&self) -> Option<&Path> {
        self.config.producer_path.as_deref()
    }

    pub fn consumer_root(&self) -> Option<&Path> {
        self.config.consumer_path.as_deref()
    }

    pub fn storage_view(&self) -> Option<&StorageView> {
        self.storage.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// False while a produce or consume is running on this context.
    /// Interposing wrappers check it to pass their own file calls through.
    pub fn reenter(&self) -> bool {
        self.reenter.load(Ordering::Acquire)
    }

    /// Whether a produce or consume has passed the consistency check.
    pub fn sync_health(&self) -> bool {
        self.sync_health.load(Ordering::Acquire)
    }

    pub(crate) fn record_health(&self) {
        if self.config.check {
            self.sync_health.store(true, Ordering::Release);
        }
    }

    pub(crate) fn enter(&self) -> ReenterGuard<'_> {
        ReenterGuard::new(&self.reenter)
    }

    pub(crate) fn ensure_initialized(&self) -> Result<(), DyadError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(DyadError::NoContext)
        }
    }

    /// Shut the transport down. Later operations fail with `NoContext`;
    /// calling it again is a no-op.
    pub async fn finalize(&self) -> Result<(), DyadError> {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let mut transport = self.transport.lock().await;
        transport.close_connection().await?;
        transport.finalize().await?;
        tracing::info!(self_id = %self.self_id, "dyad context finalized");
        Ok(())
    }
}

/// Clears the reenter flag for the lifetime of the guard and restores the
/// previous value on drop.
pub struct ReenterGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl<'a> ReenterGuard<'a> {
    pub fn new(flag: &'a AtomicBool) -> Self {
        let previous = flag.swap(false, Ordering::AcqRel);
        Self { flag, previous }
    }
}

impl Drop for ReenterGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::Release);
    }
}
