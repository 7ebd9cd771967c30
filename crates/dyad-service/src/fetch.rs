use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dyad_dtl::{FetchRequest, ServerTransport, FETCH_TOPIC};
use dyad_kvs::{MetadataStore, Request, RequestHandler, Responder};
use dyad_storage::StorageView;
use dyad_types::{DyadCode, Result, Status};
use dyad_utils::{read_whole_file, resolve_under_root};
use tracing::{debug, info, warn};

/// Serves the files below one producer root.
///
/// Every request runs in its own task with its own server connection, so
/// transfers in flight never share endpoint state.
pub struct FetchService {
    transport: Arc<dyn ServerTransport>,
    root: PathBuf,
    storage: Option<StorageView>,
}

impl FetchService {
    pub fn new(transport: Arc<dyn ServerTransport>, root: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            root: root.into(),
            storage: None,
        }
    }

    /// Skip transfers to consumers that mount the same remote device.
    pub fn with_storage_view(mut self, view: StorageView) -> Self {
        self.storage = Some(view);
        self
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Register under the fetch topic on `store`.
    pub async fn register(self: Arc<Self>, store: &dyn MetadataStore) -> Result<()> {
        info!(rank = %store.rank(), root = %self.root.display(), "registering fetch service");
        store.register_service(FETCH_TOPIC, self).await
    }

    fn shares_device(&self, request: &FetchRequest, full_path: &std::path::Path) -> bool {
        let (Some(view), Some(theirs)) = (&self.storage, &request.storage) else {
            return false;
        };
        let ours = view.check_if_local_storage(full_path);
        ours.same_device(theirs)
    }
}

#[async_trait]
impl RequestHandler for FetchService {
    async fn handle(&self, request: Request, responder: Responder) -> Result<()> {
        let fetch = self.transport.unpack_request(&request.payload)?;
        debug!(sender = %request.sender, path = %fetch.path, "fetch requested");

        let full_path = resolve_under_root(&self.root, &fetch.path).ok_or_else(|| {
            Status::with_message(
                DyadCode::BAD_MANAGED_PATH,
                format!("{:?} is outside {}", fetch.path, self.root.display()),
            )
        })?;

        if self.shares_device(&fetch, &full_path) {
            debug!(path = %full_path.display(), "consumer mounts the same device");
            return Err(Status::with_message(
                DyadCode::NO_TRANSFER_NEEDED,
                full_path.display().to_string(),
            ));
        }

        let data = Bytes::from(read_whole_file(&full_path)?);
        let size = data.len();
        self.transport.respond(&fetch, size as u64, &responder).await?;

        let mut conn = self.transport.establish_connection(&fetch, &responder).await?;
        let sent = conn.send(data).await;
        if let Err(e) = conn.close().await {
            warn!(error = %e, "closing transfer connection failed");
        }
        sent?;

        info!(sender = %request.sender, path = %full_path.display(), bytes = size, "file sent");
        Ok(())
    }
}
