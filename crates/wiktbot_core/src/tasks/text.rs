use anyhow::{Context, Result};
use regex::Regex;

use crate::api::WikiReadApi;
use crate::edit::{PageContext, PageOutcome, PageProcessor};
use crate::sections::rename_section_headers;

/// Regex substitution over the page text. `$1`-style group references work
/// in the replacement.
pub struct RegexReplace {
    pattern: Regex,
    replacement: String,
    note: String,
}

impl RegexReplace {
    pub fn new(pattern: &str, replacement: &str, note: Option<String>) -> Result<Self> {
        let regex =
            Regex::new(pattern).with_context(|| format!("invalid regex pattern: {pattern}"))?;
        let note = note
            .filter(|note| !note.trim().is_empty())
            .unwrap_or_else(|| format!("replace /{pattern}/ with \"{replacement}\""));
        Ok(Self {
            pattern: regex,
            replacement: replacement.to_string(),
            note,
        })
    }
}

impl PageProcessor for RegexReplace {
    fn process(
        &mut self,
        _page: &PageContext,
        text: &str,
        _api: &mut dyn WikiReadApi,
    ) -> Result<PageOutcome> {
        let count = self.pattern.find_iter(text).count();
        if count == 0 {
            return Ok(PageOutcome::Unchanged);
        }
        let replaced = self
            .pattern
            .replace_all(text, self.replacement.as_str())
            .into_owned();
        if replaced == text {
            return Ok(PageOutcome::Unchanged);
        }
        Ok(PageOutcome::Changed {
            text: replaced,
            notes: vec![self.note.clone(); count],
        })
    }
}

pub struct RenameHeader {
    from: String,
    to: String,
}

impl RenameHeader {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.trim().to_string(),
            to: to.trim().to_string(),
        }
    }
}

impl PageProcessor for RenameHeader {
    fn process(
        &mut self,
        _page: &PageContext,
        text: &str,
        _api: &mut dyn WikiReadApi,
    ) -> Result<PageOutcome> {
        let (renamed, count) = rename_section_headers(text, &self.from, &self.to);
        if count == 0 {
            return Ok(PageOutcome::Unchanged);
        }
        Ok(PageOutcome::Changed {
            text: renamed,
            notes: vec![format!("rename ={}= header to ={}=", self.from, self.to); count],
        })
    }
}
