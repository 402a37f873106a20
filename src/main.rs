//! panplay - play cloud-drive videos in a local media player
//!
//! # Usage
//!
//! ```bash
//! panplay play <drive_id> <file_id> --parent <dir_id>
//! panplay play <drive_id> <file_id> --no-playlist --dry-run --json
//! panplay match-subtitle "Ep02.mkv" Ep01.srt Ep02.srt
//! panplay config
//! ```

use clap::Parser;

use panplay::cli::{Cli, Command, ExitCode, Output};
use panplay::{commands, logging};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    run_cli(cli).await.into()
}

/// Run CLI command and return exit code
async fn run_cli(cli: Cli) -> ExitCode {
    let output = Output::new(&cli);
    let config_path = cli.config.as_deref();
    let config = commands::load_config(config_path);

    match cli.command {
        Command::Play(cmd) => commands::play_cmd(cmd, &config, &output).await,

        Command::MatchSubtitle(cmd) => commands::match_subtitle_cmd(cmd, &output),

        Command::Config(cmd) => commands::config_cmd(cmd, &config, config_path, &output),
    }
}
