use std::fmt::Display;

use anyhow::{Result, bail};
use log::{info, warn};
use serde::Serialize;
use similar::TextDiff;

use crate::api::{ApiErrorKind, EditRequest, WikiReadApi, WikiWriteApi, api_error_kind};
use crate::config::DEFAULT_CONFLICT_RETRIES;
use crate::pages::PageItem;

const FALLBACK_SUMMARY: &str = "automated cleanup";

/// Position and title of the page being worked on, for page-scoped log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    pub index: usize,
    pub title: String,
}

impl PageContext {
    pub fn new(index: usize, title: &str) -> Self {
        Self {
            index,
            title: title.to_string(),
        }
    }

    pub fn msg(&self, message: impl Display) {
        info!("Page {} {}: {message}", self.index, self.title);
    }

    pub fn warn(&self, message: impl Display) {
        warn!("Page {} {}: WARNING: {message}", self.index, self.title);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Unchanged,
    Changed { text: String, notes: Vec<String> },
    Skipped { reason: String },
}

pub trait PageProcessor {
    fn process(
        &mut self,
        page: &PageContext,
        text: &str,
        api: &mut dyn WikiReadApi,
    ) -> Result<PageOutcome>;

    /// End-of-run output for report tasks.
    fn summary(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct EditOptions {
    pub dry_run: bool,
    pub verbose: bool,
    pub summary_prefix: Option<String>,
    pub max_conflict_retries: usize,
    pub minor: bool,
    pub bot: bool,
}

impl Default for EditOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            verbose: false,
            summary_prefix: None,
            max_conflict_retries: DEFAULT_CONFLICT_RETRIES,
            minor: false,
            bot: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageAction {
    Unchanged,
    WouldSave,
    Saved,
    Skipped,
    Missing,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub index: usize,
    pub title: String,
    pub action: PageAction,
    pub summary: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub visited: usize,
    pub changed: usize,
    pub saved: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: usize,
    pub conflicts: usize,
    pub pages: Vec<PageResult>,
    pub request_count: usize,
}

impl RunReport {
    fn record(&mut self, result: PageResult) {
        match result.action {
            PageAction::Unchanged => self.unchanged += 1,
            PageAction::WouldSave => self.changed += 1,
            PageAction::Saved => {
                self.changed += 1;
                self.saved += 1;
            }
            PageAction::Skipped | PageAction::Missing => self.skipped += 1,
            PageAction::Error => self.errors += 1,
        }
        self.pages.push(result);
    }
}

/// Apply `processor` to every page. Per-page failures are logged and
/// recorded in the report rather than stopping the run.
pub fn run_edits<A, P>(
    api: &mut A,
    pages: &[PageItem],
    processor: &mut P,
    options: &EditOptions,
) -> RunReport
where
    A: WikiWriteApi,
    P: PageProcessor + ?Sized,
{
    let mut report = RunReport {
        dry_run: options.dry_run,
        ..RunReport::default()
    };

    for item in pages {
        report.visited += 1;
        let page = PageContext::new(item.index, &item.title);
        let result = edit_one(api, item, &page, processor, options, &mut report.conflicts);
        report.record(result);
    }

    report.request_count = api.request_count();
    report
}

fn edit_one<A, P>(
    api: &mut A,
    item: &PageItem,
    page: &PageContext,
    processor: &mut P,
    options: &EditOptions,
    conflicts: &mut usize,
) -> PageResult
where
    A: WikiWriteApi,
    P: PageProcessor + ?Sized,
{
    let mut result = PageResult {
        index: item.index,
        title: item.title.clone(),
        action: PageAction::Error,
        summary: None,
        detail: None,
    };

    let mut attempt = 0usize;
    loop {
        let (text, base_timestamp) = match load_text(api, item, options.dry_run) {
            Ok(Some(loaded)) => loaded,
            Ok(None) => {
                page.warn("page does not exist, skipping");
                result.action = PageAction::Missing;
                return result;
            }
            Err(error) => {
                page.warn(format!("failed to fetch page: {error:#}"));
                result.detail = Some(format!("{error:#}"));
                return result;
            }
        };

        let outcome = match processor.process(page, &text, api) {
            Ok(outcome) => outcome,
            Err(error) => {
                page.warn(format!("{error:#}"));
                result.detail = Some(format!("{error:#}"));
                return result;
            }
        };

        let (new_text, notes) = match outcome {
            PageOutcome::Unchanged => {
                result.action = PageAction::Unchanged;
                return result;
            }
            PageOutcome::Skipped { reason } => {
                page.warn(&reason);
                result.action = PageAction::Skipped;
                result.detail = Some(reason);
                return result;
            }
            PageOutcome::Changed { text: new_text, notes } => (new_text, notes),
        };
        if new_text == text {
            result.action = PageAction::Unchanged;
            return result;
        }

        let summary = build_summary(options.summary_prefix.as_deref(), &notes);
        result.summary = Some(summary.clone());

        if options.dry_run {
            page.msg(format!("Would save with comment = {summary}"));
            if options.verbose {
                page.msg(format!("Diff:\n{}", render_diff(&item.title, &text, &new_text)));
            }
            result.action = PageAction::WouldSave;
            return result;
        }

        let request = EditRequest {
            title: item.title.clone(),
            text: new_text,
            summary: summary.clone(),
            base_timestamp,
            minor: options.minor,
            bot: options.bot,
            allow_create: false,
        };
        match api.edit_page(&request) {
            Ok(saved) if saved.no_change => {
                page.msg("server reported no change");
                result.action = PageAction::Unchanged;
                return result;
            }
            Ok(_) => {
                page.msg(format!("Saved with comment = {summary}"));
                result.action = PageAction::Saved;
                return result;
            }
            Err(error) if api_error_kind(&error) == Some(ApiErrorKind::EditConflict) => {
                *conflicts += 1;
                if attempt >= options.max_conflict_retries {
                    page.warn(format!(
                        "edit conflict persisted after {attempt} retries, giving up"
                    ));
                    result.detail = Some("edit conflict".to_string());
                    return result;
                }
                attempt += 1;
                page.msg(format!(
                    "edit conflict, refetching and retrying ({attempt}/{})",
                    options.max_conflict_retries
                ));
            }
            Err(error) => {
                page.warn(format!("failed to save: {error:#}"));
                result.detail = Some(format!("{error:#}"));
                return result;
            }
        }
    }
}

/// Page text plus the revision timestamp to guard the save with. Dump text
/// is only trusted for dry runs.
fn load_text<A>(
    api: &mut A,
    item: &PageItem,
    dry_run: bool,
) -> Result<Option<(String, Option<String>)>>
where
    A: WikiReadApi,
{
    if dry_run {
        if let Some(text) = &item.text {
            return Ok(Some((text.clone(), None)));
        }
    }
    let remote = api.get_page(&item.title)?;
    if !remote.exists {
        return Ok(None);
    }
    if !dry_run && remote.timestamp.is_none() {
        bail!("API returned no revision timestamp for {}", item.title);
    }
    Ok(Some((remote.content, remote.timestamp)))
}

/// Collapse repeated notes in first-seen order: `a, b, a` becomes `a (2); b`.
pub fn group_notes<S: AsRef<str>>(notes: &[S]) -> String {
    let mut grouped: Vec<(&str, usize)> = Vec::new();
    for note in notes {
        let note = note.as_ref().trim();
        if note.is_empty() {
            continue;
        }
        match grouped.iter_mut().find(|(seen, _)| *seen == note) {
            Some((_, count)) => *count += 1,
            None => grouped.push((note, 1)),
        }
    }
    grouped
        .into_iter()
        .map(|(note, count)| {
            if count > 1 {
                format!("{note} ({count})")
            } else {
                note.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn build_summary<S: AsRef<str>>(prefix: Option<&str>, notes: &[S]) -> String {
    let grouped = group_notes(notes);
    let body = if grouped.is_empty() {
        FALLBACK_SUMMARY.to_string()
    } else {
        grouped
    };
    match prefix {
        Some(prefix) => format!("{prefix}{body}"),
        None => body,
    }
}

pub fn render_diff(title: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("{title} (current)"), &format!("{title} (proposed)"))
        .to_string()
}
