use async_trait::async_trait;
use dyad_types::{Address, ParticipantId, Result};
use serde::{Deserialize, Serialize};

/// Describes a running daemon instance, logged once it is up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    pub participant: Option<ParticipantId>,
    pub pid: u32,
    pub addresses: Vec<Address>,
}

impl AppInfo {
    pub fn new(name: impl Into<String>, participant: Option<ParticipantId>) -> Self {
        Self {
            name: name.into(),
            participant,
            pid: std::process::id(),
            addresses: Vec::new(),
        }
    }
}

/// Lifecycle shared by the broker and the fetch service daemons.
#[async_trait]
pub trait Application: Send + Sync + 'static {
    fn name(&self) -> &str;
    async fn start(&mut self) -> Result<AppInfo>;
    async fn stop(&mut self) -> Result<()>;
}

/// Wait for CTRL+C or SIGTERM.
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("received CTRL+C");
        }
        _ = sigterm.recv() => { tracing::info!("received SIGTERM"); }
    }
    Ok(())
}

/// Start the application, wait for a shutdown signal, stop it.
pub async fn run_application<A: Application>(mut app: A) -> Result<()> {
    let info = app.start().await?;
    tracing::info!(
        name = %info.name,
        participant = ?info.participant,
        pid = info.pid,
        addresses = ?info.addresses,
        "application started"
    );
    wait_for_shutdown_signal().await?;
    app.stop().await?;
    tracing::info!(name = app.name(), "application stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dyad_types::AddressType;

    struct Dummy {
        started: bool,
    }

    #[async_trait]
    impl Application for Dummy {
        fn name(&self) -> &str {
            "dummy"
        }
        async fn start(&mut self) -> Result<AppInfo> {
            self.started = true;
            let mut info = AppInfo::new("dummy", Some(ParticipantId(3)));
            info.addresses
                .push(Address::from_octets(127, 0, 0, 1, 7000, AddressType::TCP));
            Ok(info)
        }
        async fn stop(&mut self) -> Result<()> {
            self.started = false;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let mut app = Dummy { started: false };
        let info = app.start().await.unwrap();
        assert!(app.started);
        assert_eq!(info.participant, Some(ParticipantId(3)));
        assert_eq!(info.pid, std::process::id());
        app.stop().await.unwrap();
        assert!(!app.started);
    }

    #[test]
    fn test_app_info_serde() {
        let info = AppInfo::new("dyad-broker", None);
        let json = serde_json::to_string(&info).unwrap();
        let parsed: AppInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, "dyad-broker");
        assert!(parsed.participant.is_none());
    }
}
