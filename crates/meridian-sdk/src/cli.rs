//! Command-line flags shared by every plugin binary.

use clap::Parser;

/// Flags handled by the SDK. Plugins with extra flags should resolve them
/// before handing control to [`crate::plugin::Plugin::run`].
#[derive(Parser, Debug, Default)]
#[command(about = "Run a Meridian device plugin", disable_version_flag = true)]
pub struct Cli {
    /// Run the plugin with debug logging.
    #[arg(long)]
    pub debug: bool,

    /// Print plugin version information and exit.
    #[arg(long)]
    pub version: bool,

    /// Load and validate configuration, then exit without serving.
    #[arg(long)]
    pub dry_run: bool,
}
