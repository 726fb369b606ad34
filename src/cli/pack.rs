use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use crate::config::Config;
use crate::pack::{merge_snapshot, EditorBridge, SNAPSHOT_TIMEOUT};
use crate::sourcemap;

/// Request a property-laden snapshot from the editor and fold it into the
/// sourcemap for later restoration.
#[derive(Debug, Parser)]
pub struct PackCommand {
    /// The port to listen on. Defaults to the configured port, or 8080.
    #[clap(long)]
    pub port: Option<u16>,

    /// Only pack scripts and their descendants.
    #[clap(long)]
    pub scripts_only: bool,

    /// Where to write the packed sourcemap. Defaults to the configured
    /// sourcemap path.
    #[clap(long, short)]
    pub output: Option<PathBuf>,
}

impl PackCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let config = Config::load();
        let port = self.port.unwrap_or(config.port);
        let output = self.output.unwrap_or(config.sourcemap_path);

        let bridge = EditorBridge::start(port)?;
        println!("Waiting for Roblox Studio to connect on port {}...", port);
        bridge.wait_for_connection()?;

        log::info!("Editor connected; requesting a property snapshot");
        let snapshot = bridge.request_snapshot(true, self.scripts_only, SNAPSHOT_TIMEOUT)?;
        let count = snapshot.len();

        // An existing sourcemap contributes its filePaths; anything else
        // about it is rebuilt from the snapshot.
        let previous = sourcemap::load(&output).ok();
        let mode = if self.scripts_only { "scripts" } else { "full" };
        let packed = merge_snapshot(snapshot, previous.as_ref(), mode);

        sourcemap::write(&packed, &output)
            .with_context(|| format!("Failed to write {}", output.display()))?;

        println!("Packed {} instances into {}.", count, output.display());
        Ok(())
    }
}
