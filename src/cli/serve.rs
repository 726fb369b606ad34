use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;
use crate::serve_session::ServeSession;
use crate::web::LiveServer;

/// Run the live-sync daemon and wait for Roblox Studio to connect.
#[derive(Debug, Parser)]
pub struct ServeCommand {
    /// The port to listen on. Defaults to the configured port, or 8080.
    #[clap(long)]
    pub port: Option<u16>,

    /// Directory scripts are projected into. Defaults to the configured
    /// sync directory, or `./sync`.
    #[clap(long)]
    pub sync_dir: Option<PathBuf>,

    /// Where to maintain the sourcemap. Defaults to the configured path, or
    /// `./sourcemap.json`.
    #[clap(long)]
    pub sourcemap: Option<PathBuf>,
}

impl ServeCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let mut config = Config::load();
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(sync_dir) = self.sync_dir {
            config.sync_dir = sync_dir;
        }
        if let Some(sourcemap) = self.sourcemap {
            config.sourcemap_path = sourcemap;
        }

        log::info!(
            "Syncing into {} (sourcemap at {})",
            config.sync_dir.display(),
            config.sourcemap_path.display()
        );

        let session = ServeSession::new(&config)?;
        let server = LiveServer::new(session.port(), session.session_sender(), session.outbound());

        // Runs until the process is stopped; only a bind failure gets here.
        server.start()?;
        drop(session);
        Ok(())
    }
}
