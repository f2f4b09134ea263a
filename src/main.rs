use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process;

use tnt_git_hook::api_client::TntClient;
use tnt_git_hook::commit::LogSource;
use tnt_git_hook::config::{ApiConfig, DEFAULT_PROJECT_CONFIG_PATH, ProjectConfig};
use tnt_git_hook::hook::{self, RecordOptions};
use tnt_git_hook::keychain::{self, Credentials, KeyringStore};
use tnt_git_hook::{evidence, output};

/// TNT git hook: record pushed commits as evidence in TNT.
///
/// Each push appends its commits to a daily automatic activity, one
/// evidence section per remote repository.
#[derive(Parser, Debug)]
#[command(
    name = "tnt-git-hook",
    version,
    about,
    after_help = "Examples:\n  tnt-git-hook set-credentials\n  tnt-git-hook setup --organization Autentia --project Internal --role Developer\n  tnt-git-hook record --commit-msgs-file /tmp/commits --remote \"$remote_url\"\n  tnt-git-hook compose --commit-msgs 'abc;Ana;2024-03-15 10:00;Fix bug'"
)]
struct Cli {
    /// Use a TNT instance on localhost and print detailed progress.
    #[arg(long, global = true)]
    debug: bool,

    /// Print detailed progress.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Override the TNT API base URL.
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store TNT credentials in the OS keychain.
    SetCredentials {
        /// TNT user name; prompted for when absent.
        #[arg(long)]
        user: Option<String>,
    },

    /// Choose the organization, project and role pushes are imputed to.
    Setup {
        #[arg(long)]
        organization: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        role: Option<String>,
        /// Where to write the project config.
        #[arg(long, default_value = DEFAULT_PROJECT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Pre-push entry point: record the pushed commits in TNT.
    Record {
        #[command(flatten)]
        log: LogArgs,
        /// Remote URL being pushed to. Credentials in it are redacted.
        #[arg(long)]
        remote: Option<String>,
        /// Project config written by `setup`.
        #[arg(long, default_value = DEFAULT_PROJECT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Print the description a push would produce, without contacting TNT.
    Compose {
        #[command(flatten)]
        log: LogArgs,
        #[arg(long)]
        remote: Option<String>,
        /// File holding the description of an existing automatic activity.
        #[arg(long)]
        description_file: Option<PathBuf>,
    },
}

/// Commit log, one `sha;author;date;message` line per commit, newest first.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct LogArgs {
    /// The commit log itself.
    #[arg(long = "commit-msgs", allow_hyphen_values = true)]
    commit_msgs: Option<String>,
    /// File containing the commit log.
    #[arg(long = "commit-msgs-file")]
    commit_msgs_file: Option<PathBuf>,
}

impl LogArgs {
    fn source(self) -> LogSource {
        match (self.commit_msgs, self.commit_msgs_file) {
            (_, Some(path)) => LogSource::File(path),
            (Some(raw), None) => LogSource::Inline(raw),
            (None, None) => LogSource::Inline(String::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommand dispatch
// ---------------------------------------------------------------------------

fn run_set_credentials(user: Option<String>) -> Result<()> {
    let username = match user {
        Some(user) => user,
        None => dialoguer::Input::<String>::new()
            .with_prompt("TNT user")
            .interact_text()
            .context("failed to read user")?,
    };
    let password = dialoguer::Password::new()
        .with_prompt("TNT password")
        .interact()
        .context("failed to read password")?;

    keychain::store(&KeyringStore::default(), &Credentials::new(username, password))?;
    output::success("Stored", "TNT credentials in the keychain");
    Ok(())
}

fn prompt_if_missing(value: Option<String>, prompt: &str) -> Result<String> {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
        return Ok(value);
    }
    if !io::stdin().is_terminal() {
        anyhow::bail!("--{} is required when not running interactively", prompt.to_lowercase());
    }
    dialoguer::Input::<String>::new()
        .with_prompt(prompt)
        .interact_text()
        .with_context(|| format!("failed to read {}", prompt.to_lowercase()))
}

fn run_setup(
    cli_api_url: Option<&str>,
    debug: bool,
    organization: Option<String>,
    project: Option<String>,
    role: Option<String>,
    config_path: &Path,
) -> Result<()> {
    let organization = prompt_if_missing(organization, "Organization")?;
    let project = prompt_if_missing(project, "Project")?;
    let role = prompt_if_missing(role, "Role")?;

    let credentials = keychain::load(&KeyringStore::default())?;
    let api = ApiConfig::load()?.resolve(cli_api_url, debug);
    let mut client = TntClient::new(&api, api.timeout)?;
    output::action("Checking", &format!("{organization} / {project} / {role} in TNT"));
    client.authenticate(&credentials)?;

    let config = hook::verify_setup(&client, &organization, &project, &role)?;
    config.save_to(config_path)?;
    output::success("Configured", &format!("{}", config_path.display()));
    Ok(())
}

fn run_record(options: RecordOptions) -> Result<()> {
    let project = ProjectConfig::load_from(&options.project_config)?;
    match hook::run_record(&options, &project, &KeyringStore::default()) {
        Ok(recorded) => {
            let verb = if recorded.updated_activity.is_some() {
                "Updated"
            } else {
                "Created"
            };
            output::success(
                verb,
                &format!(
                    "evidence for {} - {} ({} commit(s))",
                    recorded.project, recorded.role, recorded.commits
                ),
            );
            Ok(())
        }
        Err(e) if project.ignore_errors => {
            output::fail("Error", &format!("{e:#}"));
            output::note("ignore_errors is set in the project config; the push goes on");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn run_compose(
    log: LogSource,
    remote: Option<String>,
    description_file: Option<PathBuf>,
) -> Result<()> {
    let prior = match description_file {
        Some(path) => Some(
            std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read description file {}", path.display()))?,
        ),
        None => None,
    };
    let composed = hook::compose_preview(
        &log,
        remote.as_deref(),
        prior.as_deref(),
        evidence::local_today(),
    )?;
    output::detail(&format!("start date: {}", composed.start_date));
    println!("{}", composed.description);
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    output::set_verbose(cli.verbose || cli.debug);

    let result = match cli.command {
        Command::SetCredentials { user } => run_set_credentials(user),
        Command::Setup {
            organization,
            project,
            role,
            config,
        } => run_setup(
            cli.api_url.as_deref(),
            cli.debug,
            organization,
            project,
            role,
            &config,
        ),
        Command::Record {
            log,
            remote,
            config,
        } => run_record(RecordOptions {
            log: log.source(),
            remote,
            project_config: config,
            api_url: cli.api_url,
            debug: cli.debug,
        }),
        Command::Compose {
            log,
            remote,
            description_file,
        } => run_compose(log.source(), remote, description_file),
    };

    if let Err(e) = result {
        output::fail("Error", &format!("{e:#}"));
        process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
