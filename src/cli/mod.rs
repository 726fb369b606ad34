//! The clap surface: global flags plus one struct per subcommand.

mod build;
mod completions;
mod pack;
mod push;
mod serve;

use std::io::{self, IsTerminal};

use clap::{Parser, ValueEnum};

pub use self::build::BuildCommand;
pub use self::completions::CompletionsCommand;
pub use self::pack::PackCommand;
pub use self::push::PushCommand;
pub use self::serve::ServeCommand;

#[derive(Debug, Parser)]
#[clap(name = "Azul", version, about)]
pub struct Options {
    #[clap(flatten)]
    pub global: GlobalOptions,

    #[clap(subcommand)]
    pub subcommand: Subcommand,
}

impl Options {
    pub fn run(self) -> anyhow::Result<()> {
        match self.subcommand {
            Subcommand::Serve(subcommand) => subcommand.run(),
            Subcommand::Build(subcommand) => subcommand.run(),
            Subcommand::Push(subcommand) => subcommand.run(),
            Subcommand::Pack(subcommand) => subcommand.run(),
            Subcommand::Completions(subcommand) => subcommand.run(),
        }
    }
}

/// Flags shared by every subcommand.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Raise log verbosity; stack the flag for more detail.
    #[clap(long = "verbose", short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// When to use ANSI colors in terminal output.
    #[clap(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorChoice {
    /// Color only when stderr is a terminal.
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    /// Whether stderr output should carry ANSI escapes.
    pub fn use_ansi(self) -> bool {
        match self {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => io::stderr().is_terminal(),
        }
    }
}

#[derive(Debug, Parser)]
pub enum Subcommand {
    Serve(ServeCommand),
    Build(BuildCommand),
    Push(PushCommand),
    Pack(PackCommand),
    Completions(CompletionsCommand),
}

impl Subcommand {
    pub fn command_name(&self) -> &'static str {
        match self {
            Subcommand::Serve(_) => "serve",
            Subcommand::Build(_) => "build",
            Subcommand::Push(_) => "push",
            Subcommand::Pack(_) => "pack",
            Subcommand::Completions(_) => "completions",
        }
    }
}
