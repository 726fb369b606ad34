use std::{path::PathBuf, thread, time::Duration};

use anyhow::Context;
use clap::Parser;

use crate::build::load_and_build;
use crate::config::Config;
use crate::message::DaemonMessage;
use crate::pack::EditorBridge;

/// Build the instance stream from the sourcemap and send it to the editor
/// as a one-shot `buildSnapshot`, without entering live sync.
#[derive(Debug, Parser)]
pub struct PushCommand {
    /// The port to listen on. Defaults to the configured port, or 8080.
    #[clap(long)]
    pub port: Option<u16>,

    /// Sourcemap to build from. Defaults to the configured sourcemap path.
    #[clap(long)]
    pub sourcemap: Option<PathBuf>,
}

impl PushCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let config = Config::load();
        let port = self.port.unwrap_or(config.port);
        let sourcemap_path = self.sourcemap.unwrap_or(config.sourcemap_path);

        let instances = load_and_build(&sourcemap_path)
            .with_context(|| format!("Failed to build from {}", sourcemap_path.display()))?;
        let count = instances.len();

        let bridge = EditorBridge::start(port)?;
        println!("Waiting for Roblox Studio to connect on port {}...", port);
        bridge.wait_for_connection()?;

        bridge.send(DaemonMessage::BuildSnapshot { data: instances });
        // Give the socket a moment to flush before the process exits.
        thread::sleep(Duration::from_millis(500));

        println!("Pushed {} instances to the editor.", count);
        Ok(())
    }
}
