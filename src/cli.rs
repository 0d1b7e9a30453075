use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use promotekit::ImageChange;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "promoter")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Promote container images into GitOps environments", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/promoter/config.toml)
    #[arg(long, global = true, env = "PROMOTER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Pin new image tags in an overlay and publish the rendered branch
    Promote(PromoteArgs),

    /// Check tools and configuration
    Doctor,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct PromoteArgs {
    /// Repository URL (ssh or https)
    #[arg(long, required_unless_present = "request")]
    pub repo: Option<String>,

    /// Branch holding the overlays
    #[arg(long, required_unless_present = "request")]
    pub source_branch: Option<String>,

    /// Rendered branch to publish to
    #[arg(long, required_unless_present = "request")]
    pub target_branch: Option<String>,

    /// Overlay directory in the source branch (default: the target branch name)
    #[arg(long)]
    pub overlay: Option<PathBuf>,

    /// Image to pin, as REPO:TAG (repeatable)
    #[arg(long = "image", value_name = "REPO:TAG", required_unless_present = "request")]
    pub images: Vec<ImageChange>,

    /// Read the whole request from a JSON file
    #[arg(
        long,
        value_name = "FILE",
        conflicts_with_all = ["repo", "source_branch", "target_branch", "overlay", "images"]
    )]
    pub request: Option<PathBuf>,

    /// Keep the workspace on disk for inspection
    #[arg(long)]
    pub keep_workspace: bool,

    /// Do not notify the deployment controller
    #[arg(long)]
    pub no_sync: bool,
}
