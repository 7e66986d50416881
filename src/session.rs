use std::{path::PathBuf, str::FromStr, sync::Arc};

use anyhow::{Context as _, bail, ensure};
use clap::Args;
use tokio::{
    io::{AsyncBufReadExt as _, BufReader},
    select, signal,
    sync::mpsc::{UnboundedSender, unbounded_channel},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    global_opts::GlobalOpts,
    host::{Host as _, HostProfile, SimulatedHost, WindowMetrics},
    license_enforcement::{EnforcementContext, EnforcementDeps},
    surface::{ConsoleSurface, DomMutation, Interaction, RemovedNode},
};

const SESSION_HELP: &str = "\
Page events, one per line:
  click <feature> [premium]        click a control carrying a feature name
  copy <chars>                     copy a selection of <chars> characters
  key                              press a key
  feature <name>                   request a feature through the gate
  analyze <keyword> <score> <text> run a billable analysis
  history                          show saved analyses
  remove-watermark                 remove the watermark node
  attr <name>                      change an attribute on the page
  remove-script <src>              unload scripts whose source contains <src>
  add-script <src>                 load a script
  resize <ow> <oh> <iw> <ih>       set outer and inner window size
  status                           show usage information
  report                           show tracked events and the staged report
  clear                            clear tracking data (licensed only)
  clear-license                    remove the stored license (licensed only)
  quit                             end the session";

#[derive(Args, Debug)]
pub(crate) struct SessionCommand {
    #[clap(flatten)]
    global_opts: GlobalOpts,

    /// Host profile describing the simulated page (YAML)
    #[arg(short, long, env = "CO_GUARD_HOST_PROFILE")]
    profile: Option<PathBuf>,

    /// Page URL to simulate when no host profile is given
    #[arg(
        short,
        long,
        env = "CO_GUARD_PAGE_URL",
        default_value = "http://localhost/",
        conflicts_with = "profile"
    )]
    url: String,
}

/// One line of session input.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PageCommand {
    Interaction(Interaction),
    Feature(String),
    Analyze {
        keyword: String,
        score: f64,
        content: String,
    },
    History,
    RemoveWatermark,
    Attribute(String),
    RemoveScript(String),
    AddScript(String),
    Resize(WindowMetrics),
    Status,
    Report,
    Clear,
    ClearLicense,
    Help,
    Quit,
}

impl FromStr for PageCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> anyhow::Result<Self> {
        let line = line.trim();
        let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let args = rest.split_whitespace().collect::<Vec<_>>();

        let single_arg = |what: &str| -> anyhow::Result<String> {
            match args[..] {
                [arg] => Ok(arg.to_owned()),
                _ => bail!("Expected exactly one {what} for {command:?}"),
            }
        };

        Ok(match command {
            "click" => match args[..] {
                [feature] => PageCommand::Interaction(Interaction::Click {
                    feature: Some(feature.to_owned()),
                    premium: false,
                }),
                [feature, "premium"] => PageCommand::Interaction(Interaction::Click {
                    feature: Some(feature.to_owned()),
                    premium: true,
                }),
                [] => PageCommand::Interaction(Interaction::Click {
                    feature: None,
                    premium: false,
                }),
                _ => bail!("Usage: click <feature> [premium]"),
            },
            "copy" => {
                let selection_len = single_arg("character count")?
                    .parse()
                    .context("Copy length must be a non-negative integer")?;
                PageCommand::Interaction(Interaction::Copy { selection_len })
            }
            "key" => PageCommand::Interaction(Interaction::KeyDown),
            "feature" => PageCommand::Feature(single_arg("feature name")?),
            "analyze" => {
                let mut parts = rest.splitn(3, char::is_whitespace);
                let (Some(keyword), Some(score), Some(content)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    bail!("Usage: analyze <keyword> <score> <content>");
                };
                let score = score
                    .parse::<f64>()
                    .with_context(|| format!("Invalid analysis score {score:?}"))?;
                ensure!(!content.trim().is_empty(), "Analysis content must not be empty");

                PageCommand::Analyze {
                    keyword: keyword.to_lowercase(),
                    score,
                    content: content.trim().to_owned(),
                }
            }
            "history" => PageCommand::History,
            "remove-watermark" => PageCommand::RemoveWatermark,
            "attr" => PageCommand::Attribute(single_arg("attribute name")?),
            "remove-script" => PageCommand::RemoveScript(single_arg("script source")?),
            "add-script" => PageCommand::AddScript(single_arg("script source")?),
            "resize" => {
                let dims = args
                    .iter()
                    .map(|value| value.parse::<u32>())
                    .collect::<Result<Vec<_>, _>>()
                    .context("Window dimensions must be non-negative integers")?;
                let [outer_width, outer_height, inner_width, inner_height] = dims[..] else {
                    bail!("Usage: resize <outer width> <outer height> <inner width> <inner height>");
                };
                PageCommand::Resize(WindowMetrics {
                    outer_width,
                    outer_height,
                    inner_width,
                    inner_height,
                })
            }
            "status" => PageCommand::Status,
            "report" => PageCommand::Report,
            "clear" => PageCommand::Clear,
            "clear-license" => PageCommand::ClearLicense,
            "help" | "?" => PageCommand::Help,
            "quit" | "exit" => PageCommand::Quit,
            other => bail!("Unknown page event {other:?} (try \"help\")"),
        })
    }
}

struct Page {
    context: Arc<EnforcementContext>,
    host: Arc<SimulatedHost>,
    mutations: UnboundedSender<DomMutation>,
    interactions: UnboundedSender<Interaction>,
}

impl Page {
    /// Applies one command, returning false when the session should end.
    fn apply(&self, command: PageCommand) -> anyhow::Result<bool> {
        match command {
            PageCommand::Interaction(interaction) => self
                .interactions
                .send(interaction)
                .context("Interaction feed closed")?,
            PageCommand::Feature(feature) => {
                let allowed = self.context.check_premium_access(&feature);
                println!("{feature}: {}", if allowed { "allowed" } else { "denied" });
            }
            PageCommand::Analyze {
                keyword,
                score,
                content,
            } => self.analyze(&keyword, score, &content),
            PageCommand::History => {
                let history = self.context.load_history();
                if history.is_empty() {
                    println!("No analysis history yet.");
                }
                for entry in history {
                    println!("{entry}");
                }
            }
            PageCommand::RemoveWatermark => self
                .mutations
                .send(DomMutation::ChildList {
                    removed: vec![RemovedNode::with_attribute(
                        &self.context.config().watermark_attribute,
                        "",
                    )],
                })
                .context("Mutation feed closed")?,
            PageCommand::Attribute(name) => self
                .mutations
                .send(DomMutation::Attributes { name })
                .context("Mutation feed closed")?,
            PageCommand::RemoveScript(src) => {
                let removed = self.host.remove_scripts(&src);
                info!(%src, removed, "Scripts unloaded");
            }
            PageCommand::AddScript(src) => self.host.add_script(&src),
            PageCommand::Resize(metrics) => self.host.resize(metrics),
            PageCommand::Status => println!("{}", self.context.usage_info()),
            PageCommand::Report => {
                println!("Tracked events: {}", self.context.tracking_data().len());
                match self.context.staged_report() {
                    Some(report) => println!(
                        "Report staged at {} with {} entries",
                        report.timestamp,
                        report.violations.len()
                    ),
                    None => println!("No violation report staged."),
                }
            }
            PageCommand::Clear => {
                if self.context.clear_tracking_data() {
                    println!("Tracking data cleared.");
                } else {
                    println!("Tracking data can only be cleared with a valid license.");
                }
            }
            PageCommand::ClearLicense => {
                if self.context.clear_license()? {
                    println!("License cleared. It stays active until the next license check.");
                } else {
                    println!("The license can only be cleared with a valid license.");
                }
            }
            PageCommand::Help => println!("{SESSION_HELP}"),
            PageCommand::Quit => return Ok(false),
        }

        Ok(true)
    }

    fn analyze(&self, keyword: &str, score: f64, content: &str) {
        self.context.track_article_usage();

        for feature in ["ai-suggestions", "competitor-analysis"] {
            if self.context.check_premium_access(feature) {
                println!("{feature}: included for {keyword:?}");
            }
        }

        if self.context.save_analysis(content, keyword, score) {
            println!("Analysis saved.");
        }
    }
}

#[instrument(skip_all)]
pub(crate) async fn handle_session_command(command: SessionCommand) -> anyhow::Result<()> {
    let SessionCommand {
        global_opts,
        profile,
        url,
    } = command;

    let config = global_opts.load_config()?;

    let profile = if let Some(path) = profile {
        HostProfile::load(&path)?
    } else {
        let mut profile = HostProfile::for_url(&url);
        // Without a profile, simulate a page that loads every protection script.
        profile.scripts = config
            .protection_scripts
            .iter()
            .map(|name| format!("/js/{name}"))
            .collect();
        profile
    };

    let host = Arc::new(SimulatedHost::new(profile)?);
    let store = global_opts.open_store(&host.hostname())?;

    let context = EnforcementContext::initialize(EnforcementDeps {
        config,
        store,
        host: host.clone(),
        surface: Arc::new(ConsoleSurface),
    });

    let (mutation_tx, mutation_rx) = unbounded_channel();
    let (interaction_tx, interaction_rx) = unbounded_channel();
    let tasks = context.start(mutation_rx, interaction_rx);
    debug!(tasks = tasks.len(), "Session started");

    let page = Page {
        context: Arc::clone(&context),
        host,
        mutations: mutation_tx,
        interactions: interaction_tx,
    };

    println!(
        "Session {} on {}",
        context.identity().session_id,
        context.domain()
    );
    println!("{}", context.usage_info());
    eprintln!("Type \"help\" for the list of page events.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read page event")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<PageCommand>() {
                    Ok(command) => {
                        if !page.apply(command)? {
                            break;
                        }
                    }
                    Err(err) => warn!("{err:#}"),
                }
            },
            _ = signal::ctrl_c() => {
                info!("Received SIGINT, ending session");
                break;
            },
        }
    }

    info!("{}", context.usage_info());
    tasks.shutdown().await;

    Ok(())
}
