use std::process::ExitCode;

use clap::Parser;
use hoard::report::exit;
use hoard::{Args, logging};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _guard = match logging::init_logging(args.verbose, args.quiet, args.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("hoard: {e}");
            return ExitCode::from(exit::FATAL);
        }
    };

    ExitCode::from(hoard::run(args).await)
}
