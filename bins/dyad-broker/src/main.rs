use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use dyad_app::{run_application, AppInfo, Application};
use dyad_core::DyadConfig;
use dyad_kvs::BrokerService;
use dyad_net::Server;
use dyad_net_tcp::TcpListener;
use dyad_types::{Address, Result, Status};

/// Metadata broker: location records and the participant directory.
#[derive(Parser, Debug)]
#[command(name = "dyad-broker", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "DYAD_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address; defaults to `broker_addr` from the config
    #[arg(short, long)]
    listen: Option<String>,

    /// Dump default configuration and exit
    #[arg(long)]
    dump_default_config: bool,
}

struct Broker {
    listen: Address,
    server: Server,
    service: Arc<BrokerService>,
}

impl Broker {
    fn new(listen: Address) -> Self {
        Self {
            listen,
            server: Server::new(),
            service: Arc::new(BrokerService::new()),
        }
    }
}

#[async_trait]
impl Application for Broker {
    fn name(&self) -> &str {
        "dyad-broker"
    }

    async fn start(&mut self) -> Result<AppInfo> {
        let listener = TcpListener::bind(self.listen).await.map_err(Status::from)?;
        self.server.register_service(self.service.clone());
        let addr = self.server.start(listener);
        let mut info = AppInfo::new(self.name(), None);
        info.addresses.push(addr);
        Ok(info)
    }

    async fn stop(&mut self) -> Result<()> {
        self.server.stop();
        tracing::info!(participants = self.service.directory_len(), "broker stopped");
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
    if let Some(listen) = args.listen {
        config.broker_addr = listen;
    }
    config.validate()?;

    let _guard = dyad_logging::init_logging(&config.log)?;
    tracing::info!(config = ?args.config, listen = %config.broker_addr, "starting dyad broker");

    run_application(Broker::new(config.broker_address()?)).await?;
    Ok(())
}
