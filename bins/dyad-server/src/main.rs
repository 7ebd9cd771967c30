use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use dyad_app::{run_application, AppInfo, Application};
use dyad_core::DyadConfig;
use dyad_dtl::{server_transport, ServerTransport};
use dyad_kvs::RemoteStore;
use dyad_service::FetchService;
use dyad_storage::StorageView;
use dyad_types::{DyadCode, Result, Status};
use dyad_utils::{create_directory_tree, STAGING_DIR_MODE};

/// Producer-side daemon: serves fetches for files below the producer path.
#[derive(Parser, Debug)]
#[command(name = "dyad-server", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "DYAD_CONFIG")]
    config: Option<PathBuf>,

    /// Dump default configuration and exit
    #[arg(long)]
    dump_default_config: bool,
}

struct FetchServer {
    config: DyadConfig,
    store: Option<Arc<RemoteStore>>,
    transport: Option<Arc<dyn ServerTransport>>,
}

#[async_trait]
impl Application for FetchServer {
    fn name(&self) -> &str {
        "dyad-server"
    }

    async fn start(&mut self) -> Result<AppInfo> {
        let config = &self.config;
        let root = config.producer_path.clone().ok_or_else(|| {
            Status::with_message(DyadCode::BAD_CONFIG, "producer_path is required to serve fetches")
        })?;
        create_directory_tree(&root, STAGING_DIR_MODE)?;

        let transport = server_transport(config.dtl.mode, &config.dtl).await?;
        let mut service = FetchService::new(Arc::clone(&transport), root);
        if config.topology_check {
            match StorageView::from_mounts() {
                Ok(view) => service = service.with_storage_view(view),
                Err(status) => tracing::warn!(%status, "storage topology unavailable"),
            }
        }

        let broker = config
            .broker_address()
            .map_err(|e| Status::with_message(DyadCode::BAD_CONFIG, e.to_string()))?;
        let bind = config
            .service_address()
            .map_err(|e| Status::with_message(DyadCode::BAD_CONFIG, e.to_string()))?;
        let store = Arc::new(RemoteStore::new(config.participant(), broker, bind));
        Arc::new(service).register(store.as_ref()).await?;

        let mut info = AppInfo::new(self.name(), Some(config.participant()));
        info.addresses.extend(store.service_addr().await);
        self.store = Some(store);
        self.transport = Some(transport);
        Ok(info)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(store) = self.store.take() {
            store.shutdown().await;
        }
        if let Some(transport) = self.transport.take() {
            transport.finalize().await?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dump_default_config {
        print!("{}", DyadConfig::default().to_toml_string()?);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => DyadConfig::load(path)?,
        None => DyadConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;

    let _guard = dyad_logging::init_logging(&config.log)?;
    tracing::info!(
        config = ?args.config,
        rank = config.rank,
        mode = %config.dtl.mode,
        producer = ?config.producer_path,
        "starting dyad server"
    );

    run_application(FetchServer {
        config,
        store: None,
        transport: None,
    })
    .await?;
    Ok(())
}
