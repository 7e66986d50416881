mod commands;
mod config;
mod global_opts;
mod history;
mod host;
pub(crate) mod license_enforcement;
mod session;
mod store;
mod surface;

use std::env;

use clap::{Parser, command};
use commands::{
    HistoryCommand, LicenseCommand, TrackingCommand, handle_history_command,
    handle_license_command, handle_tracking_command,
};
use regex::Regex;
use session::{SessionCommand, handle_session_command};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Args)]
struct MarkdownHelpCommand;

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Run an enforcement session against a simulated page
    Session(SessionCommand),

    /// Inspect or change the stored license
    License(LicenseCommand),

    /// Inspect the persisted tracking data
    Tracking(TrackingCommand),

    /// Print saved analysis history (premium)
    History(HistoryCommand),

    #[command(hide = true)]
    MarkdownHelp(MarkdownHelpCommand),
}

fn setup_logging() {
    use std::io::IsTerminal;
    use tracing_subscriber::{
        filter::{EnvFilter, LevelFilter},
        fmt,
    };

    let color = std::io::stderr().is_terminal()
        && (match env::var("COLORTERM") {
            Ok(value) => value == "truecolor" || value == "24bit",
            _ => false,
        } || match env::var("TERM") {
            Ok(value) => value == "direct" || value == "truecolor",
            _ => false,
        });

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    // Logs go to stderr so stdout stays clean for command output.
    let fmt = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    if color {
        fmt.event_format(fmt::format().pretty())
            .with_file(false)
            .with_line_number(false)
            .with_ansi(color)
            .init();
    } else {
        fmt.with_file(false)
            .with_line_number(false)
            .with_ansi(false)
            .init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let opts = Cli::parse();

    setup_logging();

    match opts.command {
        Commands::Session(session_command) => {
            handle_session_command(session_command).await?;
        }
        Commands::License(license_command) => handle_license_command(license_command)?,
        Commands::Tracking(tracking_command) => handle_tracking_command(tracking_command)?,
        Commands::History(history_command) => handle_history_command(history_command)?,
        Commands::MarkdownHelp(_) => {
            let options = clap_markdown::MarkdownOptions::new().show_footer(false);

            let markdown = clap_markdown::help_markdown_custom::<Cli>(&options).replace("↴", "");

            // Demote the top two levels of headers by one level each
            let subheader_demotion_re = Regex::new(r"(?m)^## ")?;
            let header_demotion_re = Regex::new(r"(?m)^# ")?;

            let markdown = subheader_demotion_re.replace_all(&markdown, "### ");
            let markdown = header_demotion_re.replace_all(&markdown, "## ");

            println!("{markdown}");
        }
    }

    Ok(())
}
