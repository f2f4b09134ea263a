//! Pre-push orchestration.
//!
//! `record` turns the commits of one push into today's automatic evidence
//! activity: load the commit log, sanitize the remote, authenticate, look up
//! the configured organization/project/role, fetch today's activities, merge
//! and submit. `compose` runs only the merge, offline.

use anyhow::{Context, Result};
use std::path::PathBuf;
use time::Date;

use crate::activity::{self, Role, SaveActivityRequest};
use crate::api_client::{TntApi, TntClient};
use crate::commit::{self, CommitRecord, LogSource};
use crate::config::{ApiConfig, ProjectConfig};
use crate::evidence::{self, DESCRIPTION_MAX_CHARS, Evidence, MergeStrategy};
use crate::keychain::{self, KeychainStore};
use crate::output;
use crate::remote;

/// Everything `record` needs from the command line.
#[derive(Debug, Clone)]
pub struct RecordOptions {
    pub log: LogSource,
    /// Remote URL as git reports it; may carry credentials.
    pub remote: Option<String>,
    pub project_config: PathBuf,
    pub api_url: Option<String>,
    pub debug: bool,
}

/// What a successful submission did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub project: String,
    pub role: String,
    /// Id of the activity that was updated; `None` when one was created.
    pub updated_activity: Option<i64>,
    pub commits: usize,
    pub strategy: MergeStrategy,
    /// Whether older text was dropped to fit the description limit.
    pub truncated: bool,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run the whole pre-push flow against the real keychain and TNT.
pub fn run_record(
    options: &RecordOptions,
    project: &ProjectConfig,
    keychain: &dyn KeychainStore,
) -> Result<Recorded> {
    let records = commit::load(&options.log)?;
    if options.remote.as_deref().is_some_and(remote::has_credentials) {
        output::detail("credentials redacted from the remote URL");
    }
    let remote = remote::sanitize_opt(options.remote.as_deref());
    output::detail(&format!("{} commit(s) to record", records.len()));
    if let Some(remote) = &remote {
        output::detail(&format!("remote: {remote}"));
    }

    // Before the HTTP client exists: the local offset is only readable while
    // the process is single-threaded.
    let today = evidence::local_today();

    let credentials = keychain::load(keychain)?;
    let api = ApiConfig::load()?.resolve(options.api_url.as_deref(), options.debug);
    if api.is_non_https {
        output::note(&format!("TNT API is not using HTTPS: {}", api.base_url));
    }
    output::detail(&format!("TNT API: {}", api.base_url));

    let mut client = TntClient::new(&api, project.timeout())?;
    client.authenticate(&credentials)?;

    record_push(&client, project, &records, remote.as_deref(), today)
}

/// Merge `records` into the automatic activity of `today` and submit it.
///
/// `remote` must already be sanitized.
pub fn record_push(
    api: &dyn TntApi,
    project: &ProjectConfig,
    records: &[CommitRecord],
    remote: Option<&str>,
    today: Date,
) -> Result<Recorded> {
    let role = resolve_role(api, project)?;

    let activities = api
        .activities_on(today)
        .context("failed to fetch today's activities")?;
    let existing = activity::find_automatic_evidence(project, &activities);
    match existing {
        Some(existing) => output::detail(&format!("updating activity {}", existing.id)),
        None => output::detail("creating a new activity"),
    }

    let Evidence {
        description,
        start_date,
        strategy,
        truncated,
    } = evidence::compose_on(
        records,
        existing.map(|a| a.description.as_str()),
        remote,
        today,
    );
    for line in composition_details(strategy, truncated) {
        output::detail(&line);
    }

    let request = SaveActivityRequest {
        id: existing.map(|a| a.id),
        start_date,
        duration: 0,
        billable: false,
        description,
        project_role_id: role.id,
    };
    api.save_activity(&request)
        .context("failed to save evidence activity")?;

    Ok(Recorded {
        project: project.project.clone(),
        role: project.role.clone(),
        updated_activity: request.id,
        commits: records.len(),
        strategy,
        truncated,
    })
}

/// Check that the organization, project and role exist in TNT and return
/// the config naming them.
pub fn verify_setup(
    api: &dyn TntApi,
    organization: &str,
    project: &str,
    role: &str,
) -> Result<ProjectConfig> {
    let config = ProjectConfig::new(organization, project, role);
    resolve_role(api, &config)?;
    Ok(config)
}

/// Compose without touching the network. `prior` is the description of an
/// existing automatic activity, if any.
pub fn compose_preview(
    log: &LogSource,
    remote: Option<&str>,
    prior: Option<&str>,
    today: Date,
) -> Result<Evidence> {
    let records = commit::load(log)?;
    let remote = remote::sanitize_opt(remote);
    let composed = evidence::compose_on(&records, prior, remote.as_deref(), today);
    for line in composition_details(composed.strategy, composed.truncated) {
        output::detail(&line);
    }
    Ok(composed)
}

/// Verbose lines describing how a description was composed.
fn composition_details(strategy: MergeStrategy, truncated: bool) -> Vec<String> {
    let mut lines = vec![format!("merge strategy: {strategy}")];
    if truncated {
        lines.push(format!(
            "description truncated to {DESCRIPTION_MAX_CHARS} characters"
        ));
    }
    lines
}

fn resolve_role(api: &dyn TntApi, project: &ProjectConfig) -> Result<Role> {
    let organization = api.organization_by_name(&project.organization)?;
    let tnt_project = api.project_by_name(&organization, &project.project)?;
    api.role_by_name(&tnt_project, &project.role)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
