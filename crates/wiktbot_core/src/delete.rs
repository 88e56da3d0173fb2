use std::thread::sleep;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Serialize;

use crate::api::{ApiErrorKind, WikiWriteApi, api_error_kind};
use crate::config::DEFAULT_DELETE_ATTEMPTS;
use crate::edit::PageContext;
use crate::pages::PageItem;

#[derive(Debug, Clone)]
pub struct DeleteOptions {
    pub reason: String,
    pub dry_run: bool,
    pub max_attempts: usize,
    pub retry_delay_ms: u64,
}

impl DeleteOptions {
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.trim().to_string(),
            dry_run: true,
            max_attempts: DEFAULT_DELETE_ATTEMPTS,
            retry_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStatus {
    Deleted,
    WouldDelete,
    AlreadyMissing,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletePageResult {
    pub index: usize,
    pub title: String,
    pub status: DeleteStatus,
    pub attempts: usize,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteReport {
    pub dry_run: bool,
    pub reason: String,
    pub deleted: usize,
    pub already_missing: usize,
    pub failed: usize,
    pub pages: Vec<DeletePageResult>,
    pub request_count: usize,
}

pub fn delete_pages<A: WikiWriteApi>(
    api: &mut A,
    pages: &[PageItem],
    options: &DeleteOptions,
) -> Result<DeleteReport> {
    if options.reason.trim().is_empty() {
        bail!("delete requires a non-empty reason");
    }

    let mut report = DeleteReport {
        dry_run: options.dry_run,
        reason: options.reason.trim().to_string(),
        ..DeleteReport::default()
    };

    for item in pages {
        let page = PageContext::new(item.index, &item.title);
        let result = if options.dry_run {
            page.msg(format!("Would delete with reason = {}", report.reason));
            DeletePageResult {
                index: item.index,
                title: item.title.clone(),
                status: DeleteStatus::WouldDelete,
                attempts: 0,
                detail: None,
            }
        } else {
            delete_one(api, item, &page, options, &report.reason)
        };
        match result.status {
            DeleteStatus::Deleted | DeleteStatus::WouldDelete => report.deleted += 1,
            DeleteStatus::AlreadyMissing => report.already_missing += 1,
            DeleteStatus::Failed => report.failed += 1,
        }
        report.pages.push(result);
    }

    report.request_count = api.request_count();
    Ok(report)
}

fn delete_one<A: WikiWriteApi>(
    api: &mut A,
    item: &PageItem,
    page: &PageContext,
    options: &DeleteOptions,
    reason: &str,
) -> DeletePageResult {
    let max_attempts = options.max_attempts.max(1);
    let mut result = DeletePageResult {
        index: item.index,
        title: item.title.clone(),
        status: DeleteStatus::Failed,
        attempts: 0,
        detail: None,
    };

    while result.attempts < max_attempts {
        result.attempts += 1;
        let error = match api.delete_page(&item.title, reason) {
            Ok(()) => {
                page.msg(format!("Deleted with reason = {reason}"));
                result.status = DeleteStatus::Deleted;
                return result;
            }
            Err(error) => error,
        };

        match api_error_kind(&error) {
            Some(ApiErrorKind::MissingTitle) => {
                page.msg("page does not exist, nothing to delete");
                result.status = DeleteStatus::AlreadyMissing;
                return result;
            }
            Some(ApiErrorKind::Protected | ApiErrorKind::PermissionDenied) => {
                page.warn(format!("cannot delete: {error:#}"));
                result.detail = Some(format!("{error:#}"));
                return result;
            }
            _ => {}
        }

        result.detail = Some(format!("{error:#}"));
        if result.attempts < max_attempts {
            page.warn(format!(
                "delete failed (attempt {}/{max_attempts}), retrying: {error:#}",
                result.attempts
            ));
            sleep(Duration::from_millis(options.retry_delay_ms));
        }
    }

    page.warn(format!("giving up after {max_attempts} attempts"));
    result
}
