use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use log::debug;
use regex::Regex;

use crate::api::{NS_CATEGORY, WikiReadApi};

static DUMP_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ms)^Page [0-9]+ ([^\n]*?): -------- begin text --------\n(.*?)\n-------- end text --------$",
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSource {
    Category { name: String, recursive: bool },
    References { template: String },
    Links { title: String },
    Titles(Vec<String>),
    PageFile(PathBuf),
    /// Text dump file; `-` reads standard input.
    Dump(PathBuf),
}

impl PageSource {
    pub fn needs_api(&self) -> bool {
        matches!(
            self,
            Self::Category { .. } | Self::References { .. } | Self::Links { .. }
        )
    }
}

/// 1-based inclusive bounds on the enumerated page list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRange {
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl PageRange {
    pub fn contains(&self, index: usize) -> bool {
        self.start.is_none_or(|start| index >= start) && self.end.is_none_or(|end| index <= end)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageSelection {
    pub sources: Vec<PageSource>,
    pub namespaces: Vec<i32>,
    pub range: PageRange,
}

impl PageSelection {
    pub fn needs_api(&self) -> bool {
        self.sources.iter().any(PageSource::needs_api)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageItem {
    pub index: usize,
    pub title: String,
    /// Text taken from a dump; `None` means fetch it from the wiki.
    pub text: Option<String>,
}

/// Enumerate every source in order, numbering pages from 1, and keep the
/// ones inside the range.
pub fn collect_pages<A>(selection: &PageSelection, api: &mut A) -> Result<Vec<PageItem>>
where
    A: WikiReadApi + ?Sized,
{
    let mut entries: Vec<(String, Option<String>)> = Vec::new();
    for source in &selection.sources {
        match source {
            PageSource::Category { name, recursive } => {
                let titles = category_titles(api, name, &selection.namespaces, *recursive)?;
                entries.extend(titles.into_iter().map(|title| (title, None)));
            }
            PageSource::References { template } => {
                let titles = api
                    .template_references(template, &selection.namespaces)
                    .with_context(|| format!("failed to list references to {template}"))?;
                entries.extend(titles.into_iter().map(|title| (title, None)));
            }
            PageSource::Links { title } => {
                let titles = api
                    .links_to(title, &selection.namespaces)
                    .with_context(|| format!("failed to list links to {title}"))?;
                entries.extend(titles.into_iter().map(|title| (title, None)));
            }
            PageSource::Titles(titles) => {
                entries.extend(titles.iter().map(|title| (title.trim().to_string(), None)));
            }
            PageSource::PageFile(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("failed to read page file {}", path.display()))?;
                entries.extend(parse_page_file(&content).into_iter().map(|title| (title, None)));
            }
            PageSource::Dump(path) => {
                let content = read_dump(path)?;
                entries.extend(
                    parse_text_dump(&content)
                        .into_iter()
                        .map(|(title, text)| (title, Some(text))),
                );
            }
        }
    }

    debug!("enumerated {} pages", entries.len());
    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(offset, (title, text))| PageItem {
            index: offset + 1,
            title,
            text,
        })
        .filter(|item| selection.range.contains(item.index))
        .collect())
}

/// Titles of a category's members; with `recursive`, subcategories are
/// walked too, each at most once.
pub fn category_titles<A>(
    api: &mut A,
    category: &str,
    namespaces: &[i32],
    recursive: bool,
) -> Result<Vec<String>>
where
    A: WikiReadApi + ?Sized,
{
    if !recursive {
        let members = api
            .category_members(category, namespaces)
            .with_context(|| format!("failed to list members of {category}"))?;
        return Ok(members.into_iter().map(|member| member.title).collect());
    }

    let mut titles = Vec::new();
    let mut seen_titles = BTreeSet::new();
    let mut visited = BTreeSet::new();
    let mut pending = vec![strip_category_prefix(category)];
    while let Some(current) = pending.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        let members = api
            .category_members(&current, &[])
            .with_context(|| format!("failed to list members of {current}"))?;
        let mut subcategories = Vec::new();
        for member in members {
            if member.namespace == NS_CATEGORY {
                subcategories.push(strip_category_prefix(&member.title));
            }
            let wanted = namespaces.is_empty() || namespaces.contains(&member.namespace);
            if wanted && seen_titles.insert(member.title.clone()) {
                titles.push(member.title);
            }
        }
        pending.extend(subcategories.into_iter().rev());
    }
    Ok(titles)
}

/// One title per line; blank lines and `#` comments are skipped.
pub fn parse_page_file(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

/// Split a text dump into `(title, text)` pairs.
pub fn parse_text_dump(content: &str) -> Vec<(String, String)> {
    DUMP_ENTRY
        .captures_iter(content)
        .map(|captures| {
            let title = captures.get(1).map_or("", |m| m.as_str()).to_string();
            let text = captures.get(2).map_or("", |m| m.as_str()).to_string();
            (title, text)
        })
        .collect()
}

pub fn format_dump_entry(index: usize, title: &str, text: &str) -> String {
    format!(
        "Page {index} {title}: -------- begin text --------\n{text}\n-------- end text --------\n"
    )
}

/// Accept a namespace number or one of the common namespace names.
pub fn parse_namespace(value: &str) -> Result<i32> {
    let value = value.trim();
    if let Ok(number) = value.parse::<i32>() {
        return Ok(number);
    }
    let id = match value.to_ascii_lowercase().as_str() {
        "" | "main" | "(main)" => 0,
        "talk" => 1,
        "user" => 2,
        "wiktionary" | "project" => 4,
        "file" => 6,
        "mediawiki" => 8,
        "template" => 10,
        "help" => 12,
        "category" => 14,
        "appendix" => 100,
        "rhymes" => 106,
        "thesaurus" => 110,
        "citations" => 114,
        "reconstruction" => 118,
        "module" => 828,
        _ => bail!("unknown namespace: {value}"),
    };
    Ok(id)
}

fn read_dump(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        return io::read_to_string(io::stdin()).context("failed to read dump from stdin");
    }
    fs::read_to_string(path).with_context(|| format!("failed to read dump {}", path.display()))
}

fn strip_category_prefix(title: &str) -> String {
    let title = title.trim();
    match title.split_once(':') {
        Some((prefix, rest)) if prefix.trim().eq_ignore_ascii_case("category") => {
            rest.trim().to_string()
        }
        _ => title.to_string(),
    }
}
