use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use crate::build::load_and_build;
use crate::config::Config;

/// Produce the instance stream described by the sourcemap, without talking
/// to the editor. Nodes lacking a guid are assigned fresh ones.
#[derive(Debug, Parser)]
pub struct BuildCommand {
    /// Sourcemap to build from. Defaults to the configured sourcemap path.
    #[clap(long)]
    pub sourcemap: Option<PathBuf>,

    /// Where to write the instance stream. Omit to use stdout.
    #[clap(long, short)]
    pub output: Option<PathBuf>,
}

impl BuildCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let config = Config::load();
        let sourcemap_path = self.sourcemap.unwrap_or(config.sourcemap_path);

        let instances = load_and_build(&sourcemap_path)
            .with_context(|| format!("Failed to build from {}", sourcemap_path.display()))?;

        let json = serde_json::to_string_pretty(&instances)?;
        match &self.output {
            Some(output) => {
                fs_err::write(output, json)?;
                log::info!(
                    "Built {} instances from {} into {}",
                    instances.len(),
                    sourcemap_path.display(),
                    output.display()
                );
            }
            None => println!("{}", json),
        }

        Ok(())
    }
}
