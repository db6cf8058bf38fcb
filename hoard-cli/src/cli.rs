use std::path::PathBuf;

use clap::{ArgAction, Parser};
use hoard_engine::{EngineKind, RemuxMode};
use hoard_sources::TimelineSource;

#[derive(Debug, Parser)]
#[command(
    name = "hoard",
    version,
    about = "Archive the media posted by an account",
    long_about = "Resolves every photo, GIF and video posted by an account, downloads them into \
                  one directory and, when MEGA credentials are available, uploads the results."
)]
pub struct Args {
    /// Account to archive; a leading `@` is ignored
    pub username: String,

    /// Directory that receives the downloads
    #[arg(short, long, env = "HOARD_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Number of items processed in parallel
    #[arg(short = 'j', long, value_parser = clap::value_parser!(u32).range(1..=64))]
    pub concurrency: Option<u32>,

    /// Configuration file (defaults to the platform config dir)
    #[arg(short, long, env = "HOARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Engine used for HLS manifests
    #[arg(long, value_enum)]
    pub engine: Option<EngineKind>,

    /// Remux concatenated HLS streams with ffmpeg
    #[arg(long, value_enum)]
    pub remux: Option<RemuxMode>,

    /// Timeline crawled for media: `search` (skips retweets) or `media`
    #[arg(long)]
    pub source: Option<TimelineSource>,

    /// Nitter instance to use instead of discovery; may be repeated
    #[arg(long = "instance", value_delimiter = ',')]
    pub instances: Vec<String>,

    /// Stop after this many timeline pages (0 for no limit)
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// Proxy URL for all HTTP requests (http://, https:// or socks5://)
    #[arg(long, env = "HOARD_PROXY")]
    pub proxy: Option<String>,

    /// Keep everything local even when credentials are available
    #[arg(long)]
    pub no_upload: bool,

    /// Write a JSON run report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Also write daily-rotated log files into this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}
