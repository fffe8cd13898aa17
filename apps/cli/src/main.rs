//! kbmirror CLI — export ServiceNow knowledge bases to Markdown.
//!
//! Reads every article the configured account can see, converts the HTML
//! bodies to Markdown, and writes them as `<kb>/<category>/<title>.md`.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    // Credentials may live in a local .env; real environment variables win.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
