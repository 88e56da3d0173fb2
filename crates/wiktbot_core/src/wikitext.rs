//! Light template tree over raw wikitext.
//!
//! Text is split into plain runs and top-level `{{...}}` invocations. Every
//! node keeps its source text verbatim, so unparsing an untouched tree gives
//! back the input byte for byte. Nested templates inside parameter values are
//! reached through [`Wikitext::for_each_template_mut`], which re-parses values
//! on demand.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

const RAW_TAGS: [(&str, &[u8]); 3] = [
    ("nowiki", b"</nowiki"),
    ("pre", b"</pre"),
    ("math", b"</math"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Template(Template),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Wikitext {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw_name: String,
    params: Vec<Param>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    raw_name: String,
    name: String,
    value: String,
    showkey: bool,
}

pub fn parse_text(text: &str) -> Wikitext {
    let constructs = Constructs::scan(text);
    let mut nodes = Vec::new();
    let mut text_start = 0usize;
    let mut at = 0usize;

    while at < text.len() {
        match constructs.span_at(at) {
            Some((end, Construct::Template)) => {
                if text_start < at {
                    nodes.push(Node::Text(text[text_start..at].to_string()));
                }
                nodes.push(Node::Template(Template::from_inner(&text[at + 2..end - 2])));
                at = end;
                text_start = at;
            }
            Some((end, Construct::Markup | Construct::Argument)) => at = end,
            Some((_, Construct::Link)) | None => at += 1,
        }
    }

    if text_start < text.len() {
        nodes.push(Node::Text(text[text_start..].to_string()));
    }
    Wikitext { nodes }
}

impl Wikitext {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn templates(&self) -> impl Iterator<Item = &Template> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Template(template) => Some(template),
            Node::Text(_) => None,
        })
    }

    pub fn templates_mut(&mut self) -> impl Iterator<Item = &mut Template> {
        self.nodes.iter_mut().filter_map(|node| match node {
            Node::Template(template) => Some(template),
            Node::Text(_) => None,
        })
    }

    /// Visit every template, outer ones before the ones nested in their values.
    pub fn for_each_template_mut<F>(&mut self, mut visit: F)
    where
        F: FnMut(&mut Template),
    {
        visit_nodes(&mut self.nodes, &mut visit);
    }

    /// Collect every template (nested ones included) in document order.
    pub fn all_templates(&self) -> Vec<Template> {
        let mut out = Vec::new();
        collect_templates(&self.nodes, &mut out);
        out
    }
}

impl fmt::Display for Wikitext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            match node {
                Node::Text(text) => f.write_str(text)?,
                Node::Template(template) => write!(f, "{template}")?,
            }
        }
        Ok(())
    }
}

fn visit_nodes<F>(nodes: &mut [Node], visit: &mut F)
where
    F: FnMut(&mut Template),
{
    for node in nodes {
        if let Node::Template(template) = node {
            visit(template);
            for param in &mut template.params {
                if !param.value.contains("{{") {
                    continue;
                }
                let mut inner = parse_text(&param.value);
                visit_nodes(&mut inner.nodes, visit);
                let rendered = inner.to_string();
                if rendered != param.value {
                    param.value = rendered;
                }
            }
        }
    }
}

fn collect_templates(nodes: &[Node], out: &mut Vec<Template>) {
    for node in nodes {
        if let Node::Template(template) = node {
            out.push(template.clone());
            for param in &template.params {
                if param.value.contains("{{") {
                    collect_templates(&parse_text(&param.value).nodes, out);
                }
            }
        }
    }
}

impl Template {
    pub fn new(name: &str) -> Self {
        Self {
            raw_name: name.to_string(),
            params: Vec::new(),
        }
    }

    fn from_inner(inner: &str) -> Self {
        // (start, end, first top-level `=`) for the name and each parameter.
        let mut pieces: Vec<(usize, usize, Option<usize>)> = Vec::new();
        let mut piece_start = 0usize;
        let mut equals = None;
        for (at, byte) in top_level_delimiters(inner, b"|=") {
            if byte == b'|' {
                pieces.push((piece_start, at, equals));
                piece_start = at + 1;
                equals = None;
            } else if equals.is_none() {
                equals = Some(at);
            }
        }
        pieces.push((piece_start, inner.len(), equals));

        let mut pieces = pieces.into_iter();
        let raw_name = pieces
            .next()
            .map_or("", |(start, end, _)| &inner[start..end])
            .to_string();
        let mut params = Vec::new();
        let mut positional = 0usize;
        for (start, end, equals) in pieces {
            match equals {
                Some(eq) => {
                    let raw = &inner[start..eq];
                    params.push(Param {
                        raw_name: raw.to_string(),
                        name: raw.trim().to_string(),
                        value: inner[eq + 1..end].to_string(),
                        showkey: true,
                    });
                }
                None => {
                    positional += 1;
                    params.push(Param::positional(positional, &inner[start..end]));
                }
            }
        }
        Self { raw_name, params }
    }

    /// Name with comments removed and surrounding whitespace trimmed.
    pub fn name(&self) -> String {
        strip_comments(&self.raw_name).trim().to_string()
    }

    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    /// Compare against candidate names the way MediaWiki resolves titles.
    pub fn matches_name<S: AsRef<str>>(&self, candidates: &[S]) -> bool {
        let own = normalize_template_name(&self.raw_name);
        candidates
            .iter()
            .any(|candidate| normalize_template_name(candidate.as_ref()) == own)
    }

    /// Rename, keeping the whitespace that surrounded the old name.
    pub fn set_name(&mut self, name: &str) {
        let (lead, trail) = surrounding_whitespace(&self.raw_name);
        self.raw_name = format!("{lead}{}{trail}", name.trim());
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Vec<Param> {
        &mut self.params
    }

    /// Last parameter with the given name; MediaWiki uses the last duplicate.
    pub fn param(&self, name: &str) -> Option<&Param> {
        let name = name.trim();
        self.params.iter().rev().find(|param| param.name == name)
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    pub fn has_nonempty_param(&self, name: &str) -> bool {
        self.param(name)
            .is_some_and(|param| !param.value.trim().is_empty())
    }

    /// Raw value text, or an empty string when the parameter is absent.
    pub fn get_param(&self, name: &str) -> String {
        self.param(name)
            .map(|param| param.value.clone())
            .unwrap_or_default()
    }

    pub fn get_param_trimmed(&self, name: &str) -> String {
        self.get_param(name).trim().to_string()
    }

    /// Remove every occurrence of `name` and return the value of the last one.
    ///
    /// A positional parameter that still has positional parameters after it
    /// is blanked instead so the later ones keep their numbers.
    pub fn remove_param(&mut self, name: &str) -> Option<String> {
        let name = name.trim();
        let value = self.param(name)?.value.clone();
        let mut index = self.params.len();
        while index > 0 {
            index -= 1;
            if self.params[index].name != name {
                continue;
            }
            let keeps_position = !self.params[index].showkey
                && self.params[index + 1..].iter().any(|param| !param.showkey);
            if keeps_position {
                self.params[index].value.clear();
            } else {
                self.params.remove(index);
            }
        }
        Some(value)
    }

    /// Update `name` in place, or append it when absent.
    pub fn set_param(&mut self, name: &str, value: &str) {
        self.set_param_with(name, value, None);
    }

    /// Update `name` in place, or insert it before `before` (appending when
    /// `before` is absent too).
    pub fn set_param_before(&mut self, name: &str, value: &str, before: &str) {
        self.set_param_with(name, value, Some(before));
    }

    fn set_param_with(&mut self, name: &str, value: &str, before: Option<&str>) {
        let name = name.trim();
        if let Some(index) = self.params.iter().rposition(|param| param.name == name) {
            if !self.params[index].showkey && has_top_level_equals(value) {
                self.key_positionals_from(index);
            }
            let param = &mut self.params[index];
            param.value = replace_keeping_spacing(&param.value, value);
            return;
        }

        let index = before
            .and_then(|before| {
                let before = before.trim();
                self.params.iter().position(|param| param.name == before)
            })
            .unwrap_or(self.params.len());
        let param = self.build_param(index, name, value);
        self.params.insert(index, param);
    }

    /// Rename a parameter in place. Returns `false` when it is absent.
    pub fn rename_param(&mut self, old: &str, new: &str) -> bool {
        let old = old.trim();
        let new = new.trim();
        let Some(index) = self.params.iter().rposition(|param| param.name == old) else {
            return false;
        };
        if !self.params[index].showkey {
            self.key_positionals_from(index + 1);
        }
        let param = &mut self.params[index];
        if param.showkey {
            let (lead, trail) = surrounding_whitespace(&param.raw_name);
            param.raw_name = format!("{lead}{new}{trail}");
        } else {
            param.showkey = true;
            param.raw_name = new.to_string();
        }
        param.name = new.to_string();
        true
    }

    /// Write every positional parameter from `index` on as `n=value`.
    fn key_positionals_from(&mut self, index: usize) {
        for param in &mut self.params[index..] {
            if !param.showkey {
                param.showkey = true;
                param.raw_name = param.name.clone();
            }
        }
    }

    /// Values of `first`, `pref2`, `pref3`, ... up to the first empty one.
    /// A numeric `first` walks consecutive numbers instead.
    pub fn fetch_param_chain(&self, first: &str, pref: &str) -> Vec<String> {
        let chain = ParamChain::new(first, pref);
        let mut out = Vec::new();
        for position in 1.. {
            let value = self.get_param_trimmed(&chain.name_at(position));
            if value.is_empty() {
                break;
            }
            out.push(value);
        }
        out
    }

    /// Remove every member of the chain. Returns how many parameters went away.
    pub fn remove_param_chain(&mut self, first: &str, pref: &str) -> usize {
        let chain = ParamChain::new(first, pref);
        let before = self.params.len();
        self.params.retain(|param| chain.position_of(&param.name).is_none());
        before - self.params.len()
    }

    /// Replace the chain with `values`, placing the new members where the
    /// first old member was (or before `before`, or at the end).
    pub fn set_param_chain<S: AsRef<str>>(
        &mut self,
        values: &[S],
        first: &str,
        pref: &str,
        before: Option<&str>,
    ) {
        let chain = ParamChain::new(first, pref);
        let existing = self
            .params
            .iter()
            .position(|param| chain.position_of(&param.name).is_some());
        self.params
            .retain(|param| chain.position_of(&param.name).is_none());

        let mut index = existing
            .or_else(|| {
                before.and_then(|before| {
                    let before = before.trim();
                    self.params.iter().position(|param| param.name == before)
                })
            })
            .unwrap_or(self.params.len());

        for (offset, value) in values.iter().enumerate() {
            let name = chain.name_at(offset + 1);
            let param = self.build_param(index, &name, value.as_ref());
            self.params.insert(index, param);
            index += 1;
        }
    }

    fn build_param(&self, index: usize, name: &str, value: &str) -> Param {
        let next_slot = 1 + self.params[..index]
            .iter()
            .filter(|param| !param.showkey)
            .count();
        let later_positional = self.params[index..].iter().any(|param| !param.showkey);
        let fits_slot = name.parse::<usize>().ok() == Some(next_slot)
            && !later_positional
            && !has_top_level_equals(value);
        if fits_slot {
            return Param::positional(next_slot, value);
        }

        let (name_lead, name_trail, value_lead, value_trail) = self.keyed_spacing();
        Param {
            raw_name: format!("{name_lead}{name}{name_trail}"),
            name: name.to_string(),
            value: format!("{value_lead}{value}{value_trail}"),
            showkey: true,
        }
    }

    /// Most common whitespace layout among keyed parameters, first one wins ties.
    fn keyed_spacing(&self) -> (String, String, String, String) {
        let mut counts: BTreeMap<(String, String, String, String), (usize, usize)> =
            BTreeMap::new();
        for (order, param) in self.params.iter().filter(|param| param.showkey).enumerate() {
            let (name_lead, name_trail) = surrounding_whitespace(&param.raw_name);
            let (value_lead, value_trail) = surrounding_whitespace(&param.value);
            let key = (
                name_lead.to_string(),
                name_trail.to_string(),
                value_lead.to_string(),
                value_trail.to_string(),
            );
            counts.entry(key).or_insert((0, order)).0 += 1;
        }
        counts
            .into_iter()
            .max_by(|(_, (left_count, left_order)), (_, (right_count, right_order))| {
                left_count
                    .cmp(right_count)
                    .then(right_order.cmp(left_order))
            })
            .map(|(key, _)| key)
            .unwrap_or_default()
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{{")?;
        f.write_str(&self.raw_name)?;
        for param in &self.params {
            f.write_str("|")?;
            if param.showkey {
                f.write_str(&param.raw_name)?;
                f.write_str("=")?;
            }
            f.write_str(&param.value)?;
        }
        f.write_str("}}")
    }
}

impl Param {
    fn positional(position: usize, value: &str) -> Self {
        Self {
            raw_name: String::new(),
            name: position.to_string(),
            value: value.to_string(),
            showkey: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether the parameter was written as `name=value`.
    pub fn showkey(&self) -> bool {
        self.showkey
    }
}

struct ParamChain<'a> {
    first: &'a str,
    pref: &'a str,
    numeric_start: Option<usize>,
}

impl<'a> ParamChain<'a> {
    fn new(first: &'a str, pref: &'a str) -> Self {
        let first = first.trim();
        Self {
            first,
            pref: pref.trim(),
            numeric_start: first.parse::<usize>().ok(),
        }
    }

    fn name_at(&self, position: usize) -> String {
        match self.numeric_start {
            Some(start) => (start + position - 1).to_string(),
            None if position == 1 => self.first.to_string(),
            None => format!("{}{position}", self.pref),
        }
    }

    fn position_of(&self, name: &str) -> Option<usize> {
        if let Some(start) = self.numeric_start {
            let number = name.parse::<usize>().ok()?;
            return (number >= start).then(|| number - start + 1);
        }
        if name == self.first {
            return Some(1);
        }
        let suffix = name.strip_prefix(self.pref)?;
        if suffix.is_empty() || !suffix.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        suffix.parse::<usize>().ok().filter(|position| *position >= 2)
    }
}

/// Normalize a template name for comparison: comments stripped, underscores
/// as spaces, collapsed whitespace, no `Template:` prefix, first letter upper.
pub fn normalize_template_name(name: &str) -> String {
    let stripped = strip_comments(name).replace('_', " ");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let without_prefix = match collapsed.split_once(':') {
        Some((prefix, rest)) if prefix.trim().eq_ignore_ascii_case("template") => {
            rest.trim().to_string()
        }
        _ => collapsed,
    };
    let mut chars = without_prefix.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start + 4..].find("-->") {
            Some(end) => rest = &rest[start + 4 + end + 3..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

fn replace_keeping_spacing(old: &str, new: &str) -> String {
    if old.trim().is_empty() {
        return format!("{}{old}", new.trim());
    }
    let (lead, trail) = surrounding_whitespace(old);
    format!("{lead}{}{trail}", new.trim())
}

fn surrounding_whitespace(text: &str) -> (&str, &str) {
    let trimmed_start = text.trim_start();
    let lead = &text[..text.len() - trimmed_start.len()];
    let trail = &trimmed_start[trimmed_start.trim_end().len()..];
    (lead, trail)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Construct {
    /// Comment or raw tag (`nowiki`, `pre`, `math`).
    Markup,
    /// Template argument `{{{...}}}`.
    Argument,
    Template,
    Link,
}

/// Where each comment, raw tag, template, argument and link starting in a
/// text ends.
struct Constructs {
    spans: HashMap<usize, (usize, Construct)>,
}

impl Constructs {
    /// Single left-to-right pass in the manner of the MediaWiki preprocessor:
    /// a closer only matches the innermost open bracket, and brackets still
    /// open at the end of the text are plain text.
    fn scan(text: &str) -> Self {
        let bytes = text.as_bytes();
        let mut spans = HashMap::new();
        let mut open: Vec<(usize, Construct)> = Vec::new();
        let mut markup = MarkupFinder::new();
        let mut at = 0usize;

        while at < bytes.len() {
            match bytes[at] {
                b'<' => match markup.skip(bytes, at) {
                    Some(end) => {
                        spans.insert(at, (end, Construct::Markup));
                        at = end;
                    }
                    None => at += 1,
                },
                b'{' => {
                    let run = run_length(bytes, at);
                    open_braces(&mut open, at, run);
                    at += run;
                }
                b'}' => {
                    let run = run_length(bytes, at);
                    close_braces(&mut open, &mut spans, at, run);
                    at += run;
                }
                b'[' => {
                    let run = run_length(bytes, at);
                    if run >= 2 {
                        open.push((at + run - 2, Construct::Link));
                    }
                    at += run;
                }
                b']' => {
                    let run = run_length(bytes, at);
                    if run >= 2 {
                        if let Some(&(start, Construct::Link)) = open.last() {
                            open.pop();
                            spans.insert(start, (at + 2, Construct::Link));
                        }
                    }
                    at += run;
                }
                _ => at += 1,
            }
        }

        Self { spans }
    }

    fn span_at(&self, at: usize) -> Option<(usize, Construct)> {
        self.spans.get(&at).copied()
    }
}

/// `{{{` opens an argument; longer runs open templates from the left until
/// three or fewer braces remain.
fn open_braces(open: &mut Vec<(usize, Construct)>, at: usize, run: usize) {
    let mut start = at;
    let mut left = run;
    while left >= 2 {
        if left == 3 {
            open.push((start, Construct::Argument));
            break;
        }
        open.push((start, Construct::Template));
        start += 2;
        left -= 2;
    }
}

fn close_braces(
    open: &mut Vec<(usize, Construct)>,
    spans: &mut HashMap<usize, (usize, Construct)>,
    at: usize,
    run: usize,
) {
    let mut at = at;
    let mut left = run;
    while left >= 2 {
        match open.last().copied() {
            Some((start, Construct::Argument)) if left >= 3 => {
                spans.insert(start, (at + 3, Construct::Argument));
                at += 3;
                left -= 3;
            }
            // `{{{x}}` is a brace followed by a template.
            Some((start, Construct::Argument)) => {
                spans.insert(start + 1, (at + 2, Construct::Template));
                at += 2;
                left -= 2;
            }
            Some((start, Construct::Template)) => {
                spans.insert(start, (at + 2, Construct::Template));
                at += 2;
                left -= 2;
            }
            _ => break,
        }
        open.pop();
    }
}

fn run_length(bytes: &[u8], at: usize) -> usize {
    let byte = bytes[at];
    bytes[at..].iter().take_while(|next| **next == byte).count()
}

/// Comment and raw tag ends. Each needle search remembers its last answer,
/// so a forward scan over the text stays linear.
struct MarkupFinder {
    comment_end: Finder,
    tag_end: Finder,
    closers: [Finder; 3],
}

impl MarkupFinder {
    fn new() -> Self {
        Self {
            comment_end: Finder::new(b"-->"),
            tag_end: Finder::new(b">"),
            closers: RAW_TAGS.map(|(_, closer)| Finder::new(closer)),
        }
    }

    /// End (exclusive) of the comment or raw tag starting at `at`.
    fn skip(&mut self, bytes: &[u8], at: usize) -> Option<usize> {
        let rest = &bytes[at..];
        if rest.starts_with(b"<!--") {
            // An unterminated comment runs to the end of the text.
            return Some(
                self.comment_end
                    .find(bytes, at + 4)
                    .map_or(bytes.len(), |end| end + 3),
            );
        }
        for ((tag, _), closer) in RAW_TAGS.iter().zip(self.closers.iter_mut()) {
            if !opens_tag(rest, tag) {
                continue;
            }
            let open_end = self.tag_end.find(bytes, at)?;
            if bytes[open_end - 1] == b'/' {
                return Some(open_end + 1);
            }
            let close_at = closer.find(bytes, open_end + 1)?;
            let close_end = self.tag_end.find(bytes, close_at)?;
            return Some(close_end + 1);
        }
        None
    }
}

struct Finder {
    needle: &'static [u8],
    last: Option<(usize, Option<usize>)>,
}

impl Finder {
    fn new(needle: &'static [u8]) -> Self {
        Self { needle, last: None }
    }

    fn find(&mut self, bytes: &[u8], from: usize) -> Option<usize> {
        if let Some((searched_from, found)) = self.last {
            if from >= searched_from && found.is_none_or(|found| from <= found) {
                return found;
            }
        }
        let found = find_ascii_ci(bytes, from, self.needle);
        self.last = Some((from, found));
        found
    }
}

fn opens_tag(rest: &[u8], tag: &str) -> bool {
    let len = tag.len();
    rest.len() > len + 1
        && rest[1..=len].eq_ignore_ascii_case(tag.as_bytes())
        && matches!(rest[len + 1], b'>' | b'/' | b' ' | b'\t' | b'\n')
}

/// Offsets of `delimiters` outside comments, raw tags, links, templates and
/// template arguments.
fn top_level_delimiters(text: &str, delimiters: &[u8]) -> Vec<(usize, u8)> {
    let constructs = Constructs::scan(text);
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut at = 0usize;
    while at < bytes.len() {
        if let Some((end, _)) = constructs.span_at(at) {
            at = end;
            continue;
        }
        if delimiters.contains(&bytes[at]) {
            out.push((at, bytes[at]));
        }
        at += 1;
    }
    out
}

fn has_top_level_equals(text: &str) -> bool {
    !top_level_delimiters(text, b"=").is_empty()
}

fn find_ascii_ci(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from > bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .map(|offset| from + offset)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{Node, Template, normalize_template_name, parse_text, strip_comments};

    fn first_template(text: &str) -> Template {
        parse_text(text)
            .templates()
            .next()
            .cloned()
            .expect("template")
    }

    #[test]
    fn unparse_reproduces_input() {
        let samples = [
            "",
            "plain text only",
            "{{en-noun}}",
            "a {{l|en|[[foo|bar]]}} b {{{1|x}}} c",
            "{{t|a|{{q|b|c=d}}|e=f}}\n* {{unterminated|x\n",
            "<!-- {{hidden|x}} --> {{shown}} <nowiki>{{raw}}</nowiki>",
            "{{#if:{{{1|}}}|yes|no}} {{DEFAULTSORT:abc}}",
            "{{{{{1}}}}} }} {{ {{",
            "{{head\n|en\n|noun\n|head=a b\n}}",
            "ünïcödé {{l|ru|сло́во}} ✓",
        ];
        for sample in samples {
            assert_eq!(parse_text(sample).to_string(), sample, "sample: {sample:?}");
        }
    }

    #[test]
    fn parses_positional_and_named_params() {
        let template = first_template("{{en-noun| s |pl2=foo|es}}");
        assert_eq!(template.name(), "en-noun");
        let names = template
            .params()
            .iter()
            .map(|param| (param.name().to_string(), param.showkey()))
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                ("1".to_string(), false),
                ("pl2".to_string(), true),
                ("2".to_string(), false),
            ]
        );
        assert_eq!(template.get_param("1"), " s ");
        assert_eq!(template.get_param_trimmed("1"), "s");
        assert_eq!(template.get_param("missing"), "");
    }

    #[test]
    fn pipes_inside_links_and_nested_templates_do_not_split() {
        let template = first_template("{{ux|en|[[a|b]] {{m|en|x|y=z}}|t=gloss}}");
        assert_eq!(template.params().len(), 3);
        assert_eq!(template.get_param("2"), "[[a|b]] {{m|en|x|y=z}}");
        assert_eq!(template.get_param("t"), "gloss");
    }

    #[test]
    fn equals_in_comment_does_not_make_a_key() {
        let template = first_template("{{t|<!-- a=b -->value}}");
        assert_eq!(template.get_param("1"), "<!-- a=b -->value");
    }

    #[test]
    fn templates_in_comments_and_nowiki_are_text() {
        let parsed = parse_text("<!-- {{a}} --><nowiki>{{b}}</nowiki>{{c}}<pre>{{d}}</pre>");
        let names = parsed.templates().map(Template::name).collect::<Vec<_>>();
        assert_eq!(names, vec!["c".to_string()]);
    }

    #[test]
    fn unterminated_template_stays_text() {
        let parsed = parse_text("{{broken|x and {{ok}}");
        assert_eq!(parsed.templates().count(), 1);
        assert_eq!(parsed.templates().next().map(Template::name).as_deref(), Some("ok"));
        assert!(matches!(parsed.nodes().first(), Some(Node::Text(text)) if text == "{{broken|x and "));
    }

    #[test]
    fn unbalanced_openers_parse_in_linear_time() {
        let samples = [
            "{{ ".repeat(200),
            format!("{{{{t|{}}}}}", "[[ ".repeat(200)),
            format!("{}{{{{ok}}}}", "{{{ [[ <!-- ".repeat(200)),
        ];
        for sample in &samples {
            let started = Instant::now();
            let parsed = parse_text(sample);
            assert!(started.elapsed() < Duration::from_secs(1), "slow: {sample:.40}");
            assert_eq!(parsed.to_string(), *sample);
        }
        assert_eq!(parse_text(&samples[0]).templates().count(), 0);
        assert_eq!(parse_text(&samples[1]).templates().count(), 0);
    }

    #[test]
    fn unclosed_link_inside_template_keeps_it_text() {
        let parsed = parse_text("{{a|[[b}} {{c}}");
        let names = parsed.templates().map(Template::name).collect::<Vec<_>>();
        assert_eq!(names, vec!["c".to_string()]);

        let template = first_template("{{a|b]]|c}}");
        assert_eq!(template.get_param("1"), "b]]");
        assert_eq!(template.get_param("2"), "c");
    }

    #[test]
    fn name_matching_follows_title_normalization() {
        let template = first_template("{{ Template:auto_cat <!-- x --> }}");
        assert!(template.matches_name(&["auto cat"]));
        assert!(template.matches_name(&["Auto cat"]));
        assert!(!template.matches_name(&["autocat"]));
        assert_eq!(normalize_template_name("template: en-noun"), "En-noun");
        assert_eq!(strip_comments("a<!-- b -->c<!-- d"), "ac");
    }

    #[test]
    fn set_name_keeps_surrounding_whitespace() {
        let mut parsed = parse_text("{{charactercat\n|x}} {{ foo }}");
        for template in parsed.templates_mut() {
            if template.matches_name(&["charactercat"]) {
                template.set_name("auto cat");
            } else {
                template.set_name("bar");
            }
        }
        assert_eq!(parsed.to_string(), "{{auto cat\n|x}} {{ bar }}");
    }

    #[test]
    fn set_param_updates_in_place_keeping_spacing() {
        let mut template = first_template("{{head\n|en\n|noun\n|sort = old \n}}");
        template.set_param("sort", "new");
        assert_eq!(template.to_string(), "{{head\n|en\n|noun\n|sort = new \n}}");
    }

    #[test]
    fn set_param_appends_with_prevailing_layout() {
        let mut template = first_template("{{infobox\n| a = 1\n| b = 2\n}}");
        template.set_param("c", "3");
        assert_eq!(template.to_string(), "{{infobox\n| a = 1\n| b = 2\n| c = 3\n}}");

        let mut inline = first_template("{{l|en|word}}");
        inline.set_param("3", "alt");
        inline.set_param("t", "gloss");
        assert_eq!(inline.to_string(), "{{l|en|word|alt|t=gloss}}");
    }

    #[test]
    fn set_param_keys_positional_slots_that_do_not_fit() {
        let mut template = first_template("{{l|en}}");
        template.set_param("4", "x");
        assert_eq!(template.to_string(), "{{l|en|4=x}}");

        let mut template = first_template("{{l|en}}");
        template.set_param("2", "a=b");
        assert_eq!(template.to_string(), "{{l|en|2=a=b}}");

        let mut template = first_template("{{l|en|x}}");
        template.set_param("2", "a=b");
        assert_eq!(template.to_string(), "{{l|en|2=a=b}}");

        let mut template = first_template("{{l|en|x|y}}");
        template.set_param("2", "a=b");
        assert_eq!(template.to_string(), "{{l|en|2=a=b|3=y}}");
        let reparsed = first_template(&template.to_string());
        assert_eq!(reparsed.get_param("2"), "a=b");
        assert_eq!(reparsed.get_param("3"), "y");
    }

    #[test]
    fn set_param_before_inserts_at_named_position() {
        let mut template = first_template("{{t|en|x|tr=y|sc=Latn}}");
        template.set_param_before("alt", "z", "sc");
        assert_eq!(template.to_string(), "{{t|en|x|tr=y|alt=z|sc=Latn}}");
        template.set_param_before("g", "m", "missing");
        assert_eq!(template.to_string(), "{{t|en|x|tr=y|alt=z|sc=Latn|g=m}}");
    }

    #[test]
    fn remove_param_blanks_positional_with_later_positionals() {
        let mut template = first_template("{{t|a|b|c|k=v}}");
        assert_eq!(template.remove_param("2").as_deref(), Some("b"));
        assert_eq!(template.to_string(), "{{t|a||c|k=v}}");
        assert_eq!(template.remove_param("3").as_deref(), Some("c"));
        assert_eq!(template.to_string(), "{{t|a||k=v}}");
        assert_eq!(template.remove_param("k").as_deref(), Some("v"));
        assert_eq!(template.remove_param("k"), None);
        assert_eq!(template.to_string(), "{{t|a|}}");
    }

    #[test]
    fn remove_param_drops_duplicates_and_returns_last_value() {
        let mut template = first_template("{{t|sort=a|x|sort=b}}");
        assert_eq!(template.get_param("sort"), "b");
        assert_eq!(template.remove_param("sort").as_deref(), Some("b"));
        assert_eq!(template.to_string(), "{{t|x}}");
    }

    #[test]
    fn rename_param_keeps_position_and_spacing() {
        let mut template = first_template("{{t|en| lit =x|y}}");
        assert!(template.rename_param("lit", "literally"));
        assert!(template.rename_param("2", "alt"));
        assert!(!template.rename_param("missing", "x"));
        assert_eq!(template.to_string(), "{{t|en| literally =x|alt=y}}");
    }

    #[test]
    fn rename_middle_positional_keys_the_ones_after_it() {
        let mut template = first_template("{{t|en|x|y}}");
        assert!(template.rename_param("2", "alt"));
        assert_eq!(template.to_string(), "{{t|en|alt=x|3=y}}");

        let reparsed = first_template(&template.to_string());
        assert_eq!(reparsed.get_param("alt"), "x");
        assert_eq!(reparsed.get_param("3"), "y");
        assert_eq!(reparsed.get_param("2"), "");
    }

    #[test]
    fn fetch_param_chain_stops_at_first_gap() {
        let template = first_template("{{head|en|noun|head=a|head2=b|head4=d}}");
        assert_eq!(template.fetch_param_chain("head", "head"), vec!["a", "b"]);
        assert_eq!(template.fetch_param_chain("2", ""), vec!["noun"]);
        assert!(template.fetch_param_chain("tr", "tr").is_empty());
    }

    #[test]
    fn set_param_chain_replaces_members_in_place() {
        let mut template = first_template("{{head|en|noun|head=a|head2=b|sc=Latn|head4=d}}");
        template.set_param_chain(&["x", "y", "z"], "head", "head", None);
        assert_eq!(
            template.to_string(),
            "{{head|en|noun|head=x|head2=y|head3=z|sc=Latn}}"
        );

        let mut template = first_template("{{head|en|noun|sc=Latn}}");
        template.set_param_chain(&["q"], "tr", "tr", Some("sc"));
        assert_eq!(template.to_string(), "{{head|en|noun|tr=q|sc=Latn}}");
        assert_eq!(template.remove_param_chain("tr", "tr"), 1);
    }

    #[test]
    fn set_param_chain_positional_values_stay_unkeyed() {
        let mut template = first_template("{{syn|en|a|b|q=x}}");
        template.set_param_chain(&["c", "d", "e"], "2", "", None);
        assert_eq!(template.to_string(), "{{syn|en|c|d|e|q=x}}");
    }

    #[test]
    fn for_each_template_mut_reaches_nested_templates() {
        let mut parsed = parse_text("{{ux|en|a {{m|en|b}} c|t={{gloss|{{m|en|d}}}}}} tail");
        let mut seen = Vec::new();
        parsed.for_each_template_mut(|template| {
            seen.push(template.name());
            if template.matches_name(&["m"]) {
                template.set_name("mention");
            }
        });
        assert_eq!(seen, vec!["ux", "m", "gloss", "m"]);
        assert_eq!(
            parsed.to_string(),
            "{{ux|en|a {{mention|en|b}} c|t={{gloss|{{mention|en|d}}}}}} tail"
        );
        assert_eq!(parsed.all_templates().len(), 4);
    }

    #[test]
    fn all_templates_lists_nested_templates_without_changes() {
        let text = "{{ux|en|a {{m|en|b}}|t={{gloss|{{m|en|d}}}}}} {{{1|{{x}}}}}";
        let parsed = parse_text(text);
        let names = parsed
            .all_templates()
            .iter()
            .map(Template::name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["ux", "m", "gloss", "m"]);
        assert_eq!(parsed.to_string(), text);
    }

    #[test]
    fn new_template_renders_bare_name() {
        let mut template = Template::new("auto cat");
        assert_eq!(template.to_string(), "{{auto cat}}");
        template.set_param("sort", "a");
        assert_eq!(template.to_string(), "{{auto cat|sort=a}}");
    }
}
