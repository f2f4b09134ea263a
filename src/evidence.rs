//! Evidence composition.
//!
//! Given the commits of one push, the description of today's automatic
//! activity (if any) and the sanitized remote of the repository, produce the
//! description to submit and the activity's start time.
//!
//! Three merge strategies exist, selected by [`MergeStrategy::select`]:
//!
//! 1. **NoRemote**: the hook could not name a remote. The whole description
//!    is folded into a single legacy block under one marker.
//! 2. **NewEvidence**: the remote has no block yet (or there is no activity
//!    yet). A new section is appended after everything already there.
//! 3. **UpdateExisting**: a section already names the remote. Only that
//!    section grows; every other chunk is re-emitted untouched.
//!
//! Commits already listed in the target block are not listed again, so
//! pushing the same commits twice leaves the description as it was.
//! The result is cut to [`DESCRIPTION_MAX_CHARS`] characters last, with
//! [`CONTINUATION`] appended when anything was dropped.

use time::macros::time;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::activity::Activity;
use crate::commit::CommitRecord;
use crate::section::{self, MARKER_LINE};

/// Separator between rendered commits, and between batches of one block.
pub const RECORD_SEPARATOR: &str = "\n-----\n";

/// Longest description the API stores untouched (2048 minus room for the
/// continuation marker).
pub const DESCRIPTION_MAX_CHARS: usize = 2043;

/// Appended to a description cut at [`DESCRIPTION_MAX_CHARS`].
pub const CONTINUATION: &str = "\n...";

/// Automatic activities always start at this local time.
pub const START_TIME: Time = time!(5:00);

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// The outcome of one composition, ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    pub description: String,
    /// Today at [`START_TIME`], without offset.
    pub start_date: PrimitiveDateTime,
    /// How the commits were merged into the prior description.
    pub strategy: MergeStrategy,
    /// Whether the description was cut to [`DESCRIPTION_MAX_CHARS`].
    pub truncated: bool,
}

/// How the new commits are merged into the existing description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    NoRemote,
    NewEvidence,
    /// Append to the chunk at `index` of [`section::split`].
    UpdateExisting { index: usize },
}

impl MergeStrategy {
    /// Pick the strategy for a push.
    ///
    /// Only evidence sections are candidates: text ahead of the first marker
    /// is never claimed, even if it mentions the remote. When no section
    /// names the remote, the new section is appended.
    pub fn select(existing: Option<&str>, identifier: Option<&str>) -> Self {
        let Some(identifier) = identifier else {
            return MergeStrategy::NoRemote;
        };
        let Some(existing) = existing else {
            return MergeStrategy::NewEvidence;
        };

        let header = header_line(identifier);
        section::split(existing)
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, chunk)| section::contains(chunk, &header))
            .map(|(index, _)| MergeStrategy::UpdateExisting { index })
            .unwrap_or(MergeStrategy::NewEvidence)
    }

    /// Merge `records` into `existing` according to this strategy.
    ///
    /// The result is not truncated. `identifier` is required by
    /// [`MergeStrategy::NewEvidence`] and ignored otherwise.
    pub fn apply(
        self,
        records: &[CommitRecord],
        existing: Option<&str>,
        identifier: Option<&str>,
    ) -> String {
        match self {
            MergeStrategy::NoRemote => merge_without_remote(records, existing),
            MergeStrategy::NewEvidence => {
                append_section(records, existing, identifier.unwrap_or_default())
            }
            MergeStrategy::UpdateExisting { index } => {
                update_section(records, existing.unwrap_or_default(), index)
            }
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStrategy::NoRemote => write!(f, "no remote"),
            MergeStrategy::NewEvidence => write!(f, "new evidence section"),
            MergeStrategy::UpdateExisting { index } => {
                write!(f, "update evidence section {index}")
            }
        }
    }
}

/// Compose the evidence for a push against today's automatic activity.
pub fn compose(
    records: &[CommitRecord],
    existing: Option<&Activity>,
    identifier: Option<&str>,
) -> Evidence {
    compose_on(
        records,
        existing.map(|activity| activity.description.as_str()),
        identifier,
        local_today(),
    )
}

/// [`compose`] against a bare description and an explicit calendar day.
///
/// An empty or blank identifier counts as no identifier.
pub fn compose_on(
    records: &[CommitRecord],
    existing_description: Option<&str>,
    identifier: Option<&str>,
    today: Date,
) -> Evidence {
    let identifier = identifier.map(str::trim).filter(|id| !id.is_empty());
    let strategy = MergeStrategy::select(existing_description, identifier);
    let merged = strategy.apply(records, existing_description, identifier);
    let merged_chars = merged.chars().count();
    let description = truncate(merged);

    Evidence {
        truncated: merged_chars > DESCRIPTION_MAX_CHARS,
        description,
        start_date: start_of(today),
        strategy,
    }
}

/// Render commits oldest first, separated by [`RECORD_SEPARATOR`].
pub fn render_batch<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = &'a CommitRecord>,
{
    records
        .into_iter()
        .map(CommitRecord::render)
        .collect::<Vec<_>>()
        .join(RECORD_SEPARATOR)
}

/// Cut a description to [`DESCRIPTION_MAX_CHARS`] characters.
///
/// Longer descriptions lose their tail and end in [`CONTINUATION`].
pub fn truncate(description: String) -> String {
    match description.char_indices().nth(DESCRIPTION_MAX_CHARS) {
        Some((cut, _)) => {
            let mut truncated = description[..cut].to_string();
            truncated.push_str(CONTINUATION);
            truncated
        }
        None => description,
    }
}

/// Start time of an automatic activity on `day`.
pub fn start_of(day: Date) -> PrimitiveDateTime {
    PrimitiveDateTime::new(day, START_TIME)
}

/// Today's date in the local time zone, or in UTC when the local offset
/// cannot be determined.
pub fn local_today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Line that opens the section of `identifier`.
fn header_line(identifier: &str) -> String {
    format!("{identifier}\n")
}

/// Fold everything into one block: drop the old markers, keep their text,
/// then add the new commits.
fn merge_without_remote(records: &[CommitRecord], existing: Option<&str>) -> String {
    let previous = existing
        .map(|description| description.replace(MARKER_LINE, ""))
        .unwrap_or_default();
    let batch = render_batch(unrecorded(records, &previous));

    let mut out = MARKER_LINE.to_string();
    out.push_str(&append_batch(&previous, &batch));
    out
}

/// Append a new section for `identifier` after the whole description.
fn append_section(records: &[CommitRecord], existing: Option<&str>, identifier: &str) -> String {
    let mut out = existing.unwrap_or_default().to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(MARKER_LINE);
    out.push_str(&header_line(identifier));
    out.push_str(&render_batch(records));
    out
}

/// Grow the section at `index`, leaving every other chunk as it was.
fn update_section(records: &[CommitRecord], existing: &str, index: usize) -> String {
    let mut chunks = section::split(existing);
    let Some(chunk) = chunks.get(index) else {
        return existing.to_string();
    };

    // Keep the newline that separates this section from the next marker.
    let (body, trailing) = match chunk.strip_suffix('\n') {
        Some(body) => (body, "\n"),
        None => (chunk.as_str(), ""),
    };
    let batch = render_batch(unrecorded(records, chunk));
    let updated = format!("{}{trailing}", append_batch(body, &batch));

    chunks[index] = updated;
    section::join(&chunks)
}

/// Records whose sha is not already listed in `text`.
fn unrecorded<'a>(
    records: &'a [CommitRecord],
    text: &'a str,
) -> impl Iterator<Item = &'a CommitRecord> + 'a {
    records.iter().filter(move |record| {
        record.sha().is_empty() || !text.lines().any(|line| line == record.sha())
    })
}

/// Join an existing block and a new batch with the record separator.
fn append_batch(body: &str, batch: &str) -> String {
    if batch.is_empty() {
        body.to_string()
    } else if body.is_empty() {
        batch.to_string()
    } else if body.ends_with('\n') {
        format!("{body}-----\n{batch}")
    } else {
        format!("{body}{RECORD_SEPARATOR}{batch}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
