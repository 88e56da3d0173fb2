//! Maintenance tasks built on the edit driver. Each task is a [`PageProcessor`].

pub mod redundant;
pub mod reports;
pub mod templates;
pub mod text;

use anyhow::Result;

use crate::api::WikiReadApi;
use crate::edit::{PageContext, PageOutcome, PageProcessor};
use crate::sections::find_language_section;

/// Runs a task on one language section instead of the whole page.
pub struct LanguageScope {
    inner: Box<dyn PageProcessor>,
    lang: Option<String>,
    partial_page: bool,
}

impl LanguageScope {
    /// With `partial_page`, incoming text is already the language section.
    pub fn new(inner: Box<dyn PageProcessor>, lang: Option<String>, partial_page: bool) -> Self {
        Self {
            inner,
            lang: lang.filter(|lang| !lang.trim().is_empty()),
            partial_page,
        }
    }
}

impl PageProcessor for LanguageScope {
    fn process(
        &mut self,
        page: &PageContext,
        text: &str,
        api: &mut dyn WikiReadApi,
    ) -> Result<PageOutcome> {
        let Some(lang) = self.lang.as_deref() else {
            return self.inner.process(page, text, api);
        };
        if self.partial_page {
            return self.inner.process(page, text, api);
        }
        let Some(found) = find_language_section(text, lang) else {
            return Ok(PageOutcome::Skipped {
                reason: format!("can't find {lang} section"),
            });
        };
        Ok(match self.inner.process(page, &found.section, api)? {
            PageOutcome::Changed { text, notes } => PageOutcome::Changed {
                text: found.reassemble(&text),
                notes,
            },
            other => other,
        })
    }

    fn summary(&self) -> Option<String> {
        self.inner.summary()
    }
}

/// Split a comma-separated CLI list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}
