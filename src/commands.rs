use std::sync::Arc;

use anyhow::{Context as _, bail};
use clap::{Args, Subcommand};
use colored::Colorize as _;
use tracing::info;

use crate::{
    config::Config,
    global_opts::GlobalOpts,
    history::AnalysisHistory,
    license_enforcement::{
        Plan,
        license::{LicenseLookup, LicenseRecord, LicenseStore, is_well_formed_key},
        messages,
        state::HISTORY_FEATURE,
        tracker::premium_decision,
        tracking::{TrackingCaps, TrackingLog},
        validator::{Validation, validate},
    },
    store::KeyValueStore,
};

#[derive(Args, Debug)]
pub(crate) struct OriginOpts {
    #[clap(flatten)]
    global_opts: GlobalOpts,

    /// Hostname whose records are read or written
    #[arg(short, long, env = "CO_GUARD_ORIGIN", default_value = "localhost")]
    origin: String,
}

impl OriginOpts {
    fn open(&self) -> anyhow::Result<(Config, Arc<dyn KeyValueStore>)> {
        let config = self.global_opts.load_config()?;
        let store = self.global_opts.open_store(&self.origin)?;
        Ok((config, store))
    }

    fn validation(&self, store: &Arc<dyn KeyValueStore>) -> Validation {
        validate(&LicenseStore::new(store.clone()).read(), &self.origin)
    }
}

fn tracking_log(config: &Config, store: Arc<dyn KeyValueStore>) -> TrackingLog {
    TrackingLog::new(
        store,
        TrackingCaps {
            tracking_log: config.tracking_log_cap,
            feature_usage: config.feature_usage_cap,
            license_violations: config.license_violations_cap,
        },
    )
}

#[derive(Args, Debug)]
pub(crate) struct LicenseCommand {
    #[clap(flatten)]
    origin_opts: OriginOpts,

    #[command(subcommand)]
    subcommand: LicenseSubcommands,
}

#[derive(Debug, Subcommand)]
enum LicenseSubcommands {
    /// Store a license record for the origin
    Activate {
        /// License key, formatted CO-XXXX-XXXX-XXXX-XXXX
        #[arg(short, long, env = "CO_GUARD_LICENSE_KEY")]
        key: String,

        /// Domain the license covers (repeatable)
        #[arg(short, long = "domain", required = true)]
        domains: Vec<String>,

        /// Plan granted by the license
        #[arg(short, long, value_enum, default_value_t = Plan::Pro)]
        plan: Plan,
    },

    /// Show the stored license and whether it authorizes the origin
    Show,

    /// Remove the stored license (requires a license valid for the origin)
    Clear,
}

pub(crate) fn handle_license_command(command: LicenseCommand) -> anyhow::Result<()> {
    let LicenseCommand {
        origin_opts,
        subcommand,
    } = command;
    let (_, store) = origin_opts.open()?;
    let licenses = LicenseStore::new(store.clone());

    match subcommand {
        LicenseSubcommands::Activate { key, domains, plan } => {
            if !is_well_formed_key(&key) {
                bail!("License key {key:?} is not of the form CO-XXXX-XXXX-XXXX-XXXX");
            }

            let record = LicenseRecord::new(key, domains, plan);
            licenses.write(&record)?;

            info!(
                origin = %origin_opts.origin,
                plan = %record.plan,
                domains = ?record.domains,
                "License activated"
            );

            if !record.covers(&origin_opts.origin) {
                println!(
                    "{}",
                    format!(
                        "Warning: the license does not list {}, so it will not authorize this origin.",
                        origin_opts.origin
                    )
                    .yellow()
                );
            }
        }
        LicenseSubcommands::Show => {
            match licenses.read() {
                LicenseLookup::Absent => println!("No license stored for {}", origin_opts.origin),
                LicenseLookup::Malformed(err) => {
                    println!("{}", format!("Stored license is malformed: {err}").red());
                }
                LicenseLookup::Present(record) => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&record)
                            .context("Failed to serialize license record")?
                    );
                }
            }

            println!("{}", describe_validation(&origin_opts.validation(&store)));
        }
        LicenseSubcommands::Clear => {
            if !origin_opts.validation(&store).authorized {
                bail!(
                    "Clearing the license requires a license valid for {}",
                    origin_opts.origin
                );
            }

            licenses.clear()?;
            info!(origin = %origin_opts.origin, "License cleared");
        }
    }

    Ok(())
}

fn describe_validation(validation: &Validation) -> String {
    if validation.authorized {
        format!("Authorized: yes (plan {})", validation.plan)
    } else {
        match validation.reason {
            Some(reason) => format!("Authorized: no ({})", reason.message()),
            None => "Authorized: no (no license)".to_owned(),
        }
    }
}

#[derive(Args, Debug)]
pub(crate) struct TrackingCommand {
    #[clap(flatten)]
    origin_opts: OriginOpts,

    #[command(subcommand)]
    subcommand: TrackingSubcommands,
}

#[derive(Debug, Subcommand)]
enum TrackingSubcommands {
    /// Print tracking log entries as JSON lines, oldest first
    Show {
        /// Only print the most recent entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Clear the tracking log (requires a license valid for the origin)
    Clear,

    /// Print the staged violation report and usage evidence
    Report,
}

pub(crate) fn handle_tracking_command(command: TrackingCommand) -> anyhow::Result<()> {
    let TrackingCommand {
        origin_opts,
        subcommand,
    } = command;
    let (config, store) = origin_opts.open()?;
    let log = tracking_log(&config, store.clone());

    match subcommand {
        TrackingSubcommands::Show { limit } => {
            for entry in most_recent(log.raw_entries(), limit) {
                println!("{entry}");
            }
        }
        TrackingSubcommands::Clear => {
            if !origin_opts.validation(&store).authorized {
                bail!(
                    "Clearing tracking data requires a license valid for {}",
                    origin_opts.origin
                );
            }

            log.clear()?;
            info!(origin = %origin_opts.origin, "Tracking data cleared");
        }
        TrackingSubcommands::Report => {
            match log.staged_report() {
                Some(report) => println!(
                    "{}",
                    serde_json::to_string_pretty(&report)
                        .context("Failed to serialize violation report")?
                ),
                None => println!("No violation report staged"),
            }

            let feature_usage = log.feature_usage();
            let unlicensed = log.unlicensed_usage_reports();
            println!(
                "Premium feature clicks: {} ({} unlicensed)",
                feature_usage.len(),
                feature_usage.iter().filter(|entry| !entry.licensed).count()
            );
            println!("Unlicensed usage reports: {}", unlicensed.len());
            if let Some(last) = unlicensed.last() {
                println!(
                    "Last unlicensed usage: {} checks at {}",
                    last.usage_count, last.timestamp
                );
            }
        }
    }

    Ok(())
}

fn most_recent<T>(mut entries: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }
    entries
}

#[derive(Args, Debug)]
pub(crate) struct HistoryCommand {
    #[clap(flatten)]
    origin_opts: OriginOpts,
}

/// Prints saved analyses. Reading history is itself a premium feature.
pub(crate) fn handle_history_command(command: HistoryCommand) -> anyhow::Result<()> {
    let HistoryCommand { origin_opts } = command;
    let (config, store) = origin_opts.open()?;

    let validation = origin_opts.validation(&store);
    let decision = premium_decision(
        &config.premium_features,
        validation.plan,
        validation.authorized,
        HISTORY_FEATURE,
    );

    if let Some(required) = decision.upgrade_to {
        eprintln!("{}", messages::upgrade_prompt(HISTORY_FEATURE, required).blue());
        return Ok(());
    }

    let history = AnalysisHistory::new(store, config.analysis_history_cap).load();
    if history.is_empty() {
        println!("No analysis history for {}", origin_opts.origin);
    }
    for entry in history {
        println!("{entry}");
    }

    Ok(())
}
