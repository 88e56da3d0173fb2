use std::sync::LazyLock;

use regex::Regex;

static HEADER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^=[^\n]*=[ \t]*$").unwrap());
static TRAILING_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n----+[ \t]*\n*\z").unwrap());

/// One header-delimited chunk of a page. The lead has an empty header and level 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub header: String,
    pub level: usize,
    pub title: String,
    pub body: String,
}

impl Section {
    fn lead(body: &str) -> Self {
        Self {
            header: String::new(),
            level: 0,
            title: String::new(),
            body: body.to_string(),
        }
    }

    pub fn is_lead(&self) -> bool {
        self.level == 0
    }
}

/// A level-2 language section cut out of its page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSection {
    pub before: String,
    pub section: String,
    pub after: String,
}

impl LanguageSection {
    pub fn reassemble(&self, section: &str) -> String {
        format!("{}{section}{}", self.before, self.after)
    }
}

pub fn split_text_into_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current = Section::lead("");
    let mut cursor = 0usize;

    for line in HEADER_LINE.find_iter(text) {
        let Some((level, title)) = parse_header(line.as_str()) else {
            continue;
        };
        let header_end = if text[line.end()..].starts_with('\n') {
            line.end() + 1
        } else {
            line.end()
        };
        current.body = text[cursor..line.start()].to_string();
        sections.push(current);
        current = Section {
            header: text[line.start()..header_end].to_string(),
            level,
            title,
            body: String::new(),
        };
        cursor = header_end;
    }

    current.body = text[cursor..].to_string();
    sections.push(current);
    sections
}

pub fn join_sections(sections: &[Section]) -> String {
    let mut out = String::new();
    for section in sections {
        out.push_str(&section.header);
        out.push_str(&section.body);
    }
    out
}

/// Locate `==lang==` and everything below it up to the next level-2 header.
/// A trailing `----` separator is left with the text after the section.
pub fn find_language_section(text: &str, lang: &str) -> Option<LanguageSection> {
    let sections = split_text_into_sections(text);
    let start = sections
        .iter()
        .position(|section| section.level == 2 && section.title == lang.trim())?;
    let end = sections[start + 1..]
        .iter()
        .position(|section| section.level != 0 && section.level <= 2)
        .map_or(sections.len(), |offset| start + 1 + offset);

    let before = join_sections(&sections[..start]);
    let mut section = join_sections(&sections[start..end]);
    let mut after = join_sections(&sections[end..]);
    if let Some(separator) = TRAILING_SEPARATOR.find(&section) {
        let cut = separator.start() + 1;
        after = format!("{}{after}", &section[cut..]);
        section.truncate(cut);
    }
    Some(LanguageSection {
        before,
        section,
        after,
    })
}

/// Swap in new text for the `lang` section. `None` when the page has no such section.
pub fn replace_language_section(text: &str, lang: &str, new_section: &str) -> Option<String> {
    find_language_section(text, lang).map(|found| found.reassemble(new_section))
}

/// Rename every header titled `from`, at any level. Returns the new text and
/// the number of headers renamed.
pub fn rename_section_headers(text: &str, from: &str, to: &str) -> (String, usize) {
    let from = from.trim();
    let to = to.trim();
    let mut sections = split_text_into_sections(text);
    let mut renamed = 0usize;
    for section in &mut sections {
        if section.is_lead() || section.title != from {
            continue;
        }
        section.header = section.header.replacen(from, to, 1);
        section.title = to.to_string();
        renamed += 1;
    }
    (join_sections(&sections), renamed)
}

fn parse_header(line: &str) -> Option<(usize, String)> {
    let line = line.trim_end();
    let open = line.bytes().take_while(|byte| *byte == b'=').count();
    let close = line.bytes().rev().take_while(|byte| *byte == b'=').count();
    if open + close >= line.len() {
        return None;
    }
    let level = open.min(close).min(6);
    let title = line[level..line.len() - level].trim();
    if title.is_empty() {
        return None;
    }
    Some((level, title.to_string()))
}
