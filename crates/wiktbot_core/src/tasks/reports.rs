use std::collections::BTreeMap;

use anyhow::{Context, Result};
use regex::Regex;

use crate::api::WikiReadApi;
use crate::edit::{PageContext, PageOutcome, PageProcessor};
use crate::pages::format_dump_entry;
use crate::wikitext::parse_text;

/// Count `name=value` pairs used with the given templates across the run.
pub struct TallyParams {
    templates: Vec<String>,
    counts: BTreeMap<String, usize>,
}

impl TallyParams {
    pub fn new(templates: Vec<String>) -> Self {
        Self {
            templates,
            counts: BTreeMap::new(),
        }
    }

    /// Entries sorted by count, most frequent first, then by key.
    pub fn sorted_counts(&self) -> Vec<(&str, usize)> {
        let mut entries = self
            .counts
            .iter()
            .map(|(key, count)| (key.as_str(), *count))
            .collect::<Vec<_>>();
        entries.sort_by(|left, right| right.1.cmp(&left.1).then(left.0.cmp(right.0)));
        entries
    }
}

impl PageProcessor for TallyParams {
    fn process(
        &mut self,
        _page: &PageContext,
        text: &str,
        _api: &mut dyn WikiReadApi,
    ) -> Result<PageOutcome> {
        for template in parse_text(text).all_templates() {
            if !template.matches_name(&self.templates) {
                continue;
            }
            for param in template.params() {
                let key = format!("{}={}", param.name(), param.value().trim());
                *self.counts.entry(key).or_insert(0) += 1;
            }
        }
        Ok(PageOutcome::Unchanged)
    }

    fn summary(&self) -> Option<String> {
        let lines = self
            .sorted_counts()
            .into_iter()
            .map(|(key, count)| format!("{key} = {count}"))
            .collect::<Vec<_>>();
        Some(lines.join("\n"))
    }
}

/// Collect lines (or whole pages, as a text dump) that match a regex.
pub struct FindRegex {
    pattern: Regex,
    output_dump: bool,
    output: Vec<String>,
}

impl FindRegex {
    pub fn new(pattern: &str, output_dump: bool) -> Result<Self> {
        let pattern =
            Regex::new(pattern).with_context(|| format!("invalid regex pattern: {pattern}"))?;
        Ok(Self {
            pattern,
            output_dump,
            output: Vec::new(),
        })
    }
}

impl PageProcessor for FindRegex {
    fn process(
        &mut self,
        page: &PageContext,
        text: &str,
        _api: &mut dyn WikiReadApi,
    ) -> Result<PageOutcome> {
        if !self.pattern.is_match(text) {
            return Ok(PageOutcome::Unchanged);
        }
        if self.output_dump {
            self.output
                .push(format_dump_entry(page.index, &page.title, text));
            return Ok(PageOutcome::Unchanged);
        }
        let pattern = &self.pattern;
        for line in text.lines().filter(|line| pattern.is_match(line)) {
            self.output.push(format!(
                "Page {} {}: Found match for regex: {line}",
                page.index, page.title
            ));
        }
        Ok(PageOutcome::Unchanged)
    }

    fn summary(&self) -> Option<String> {
        if self.output_dump {
            Some(self.output.concat())
        } else {
            Some(self.output.join("\n"))
        }
    }
}
