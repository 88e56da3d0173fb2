use anyhow::Result;

use crate::api::WikiReadApi;
use crate::edit::{PageContext, PageOutcome, PageProcessor};
use crate::wikitext::parse_text;

fn outcome(original: &str, text: String, notes: Vec<String>) -> PageOutcome {
    if notes.is_empty() || text == original {
        PageOutcome::Unchanged
    } else {
        PageOutcome::Changed { text, notes }
    }
}

/// Rename every invocation of any of `from` to `to`.
pub struct RenameTemplate {
    from: Vec<String>,
    to: String,
}

impl RenameTemplate {
    pub fn new(from: Vec<String>, to: &str) -> Self {
        Self {
            from,
            to: to.trim().to_string(),
        }
    }
}

impl PageProcessor for RenameTemplate {
    fn process(
        &mut self,
        _page: &PageContext,
        text: &str,
        _api: &mut dyn WikiReadApi,
    ) -> Result<PageOutcome> {
        let mut parsed = parse_text(text);
        let mut notes = Vec::new();
        parsed.for_each_template_mut(|template| {
            if template.matches_name(&self.from) {
                notes.push(format!("rename {{{{{}}}}} to {{{{{}}}}}", template.name(), self.to));
                template.set_name(&self.to);
            }
        });
        Ok(outcome(text, parsed.to_string(), notes))
    }
}

/// Rename a parameter of the given templates, leaving it alone when the new
/// name is already in use.
pub struct RenameParam {
    templates: Vec<String>,
    from: String,
    to: String,
}

impl RenameParam {
    pub fn new(templates: Vec<String>, from: &str, to: &str) -> Self {
        Self {
            templates,
            from: from.trim().to_string(),
            to: to.trim().to_string(),
        }
    }
}

impl PageProcessor for RenameParam {
    fn process(
        &mut self,
        page: &PageContext,
        text: &str,
        _api: &mut dyn WikiReadApi,
    ) -> Result<PageOutcome> {
        let mut parsed = parse_text(text);
        let mut notes = Vec::new();
        parsed.for_each_template_mut(|template| {
            if !template.matches_name(&self.templates) || !template.has_param(&self.from) {
                return;
            }
            if template.has_param(&self.to) {
                page.warn(format!(
                    "{} already has {}=, not renaming {}=: {template}",
                    template.name(),
                    self.to,
                    self.from
                ));
                return;
            }
            template.rename_param(&self.from, &self.to);
            notes.push(format!(
                "rename {}= to {}= in {{{{{}}}}}",
                self.from,
                self.to,
                template.name()
            ));
        });
        Ok(outcome(text, parsed.to_string(), notes))
    }
}

/// Remove a parameter from the given templates, optionally only when its
/// trimmed value equals `only_value`.
pub struct RemoveParam {
    templates: Vec<String>,
    param: String,
    only_value: Option<String>,
}

impl RemoveParam {
    pub fn new(templates: Vec<String>, param: &str, only_value: Option<String>) -> Self {
        Self {
            templates,
            param: param.trim().to_string(),
            only_value: only_value.map(|value| value.trim().to_string()),
        }
    }
}

impl PageProcessor for RemoveParam {
    fn process(
        &mut self,
        _page: &PageContext,
        text: &str,
        _api: &mut dyn WikiReadApi,
    ) -> Result<PageOutcome> {
        let mut parsed = parse_text(text);
        let mut notes = Vec::new();
        parsed.for_each_template_mut(|template| {
            if !template.matches_name(&self.templates) || !template.has_param(&self.param) {
                return;
            }
            if let Some(expected) = &self.only_value {
                if template.get_param_trimmed(&self.param) != *expected {
                    return;
                }
            }
            template.remove_param(&self.param);
            notes.push(format!(
                "remove {}= from {{{{{}}}}}",
                self.param,
                template.name()
            ));
        });
        Ok(outcome(text, parsed.to_string(), notes))
    }
}

/// Replace `{{charactercat}}` with `{{auto cat}}`, dropping any parameters.
#[derive(Default)]
pub struct CharacterCat;

impl PageProcessor for CharacterCat {
    fn process(
        &mut self,
        page: &PageContext,
        text: &str,
        _api: &mut dyn WikiReadApi,
    ) -> Result<PageOutcome> {
        let mut parsed = parse_text(text);
        let mut notes = Vec::new();
        for template in parsed.templates_mut() {
            if !template.matches_name(&["charactercat"]) {
                continue;
            }
            if template.params().is_empty() {
                notes.push("convert {{charactercat}} to {{auto cat}}".to_string());
            } else {
                page.msg(format!("dropping parameters of {template}"));
                notes.push(
                    "convert {{charactercat|...}} to {{auto cat}}, dropping params".to_string(),
                );
                template.params_mut().clear();
            }
            template.set_name("auto cat");
        }
        Ok(outcome(text, parsed.to_string(), notes))
    }
}

#[cfg(test)]
mod tests {
    use super::{CharacterCat, RemoveParam, RenameParam, RenameTemplate};
    use crate::api::mock::MockWiki;
    use crate::edit::{PageContext, PageOutcome, PageProcessor};

    fn run(processor: &mut dyn PageProcessor, text: &str) -> PageOutcome {
        let mut api = MockWiki::default();
        processor
            .process(&PageContext::new(1, "test"), text, &mut api)
            .expect("process")
    }

    fn changed(outcome: PageOutcome) -> (String, Vec<String>) {
        match outcome {
            PageOutcome::Changed { text, notes } => (text, notes),
            other => panic!("expected a change, got {other:?}"),
        }
    }

    #[test]
    fn rename_template_handles_aliases_and_nesting() {
        let mut task = RenameTemplate::new(vec!["l-self".to_string(), "lself".to_string()], "l");
        let (text, notes) = changed(run(
            &mut task,
            "{{lself|en|a}} {{ux|en|{{l-self|en|b}}}} {{l|en|c}}",
        ));
        assert_eq!(text, "{{l|en|a}} {{ux|en|{{l|en|b}}}} {{l|en|c}}");
        assert_eq!(notes, vec!["rename {{lself}} to {{l}}", "rename {{l-self}} to {{l}}"]);
        assert_eq!(run(&mut task, "{{l|en|x}}"), PageOutcome::Unchanged);
    }

    #[test]
    fn rename_param_skips_templates_already_using_the_name() {
        let mut task = RenameParam::new(vec!["head".to_string()], "head", "1head");
        let (text, notes) = changed(run(
            &mut task,
            "{{head|en|noun|head=a}}\n{{head|en|verb|head=b|1head=c}}",
        ));
        assert_eq!(
            text,
            "{{head|en|noun|1head=a}}\n{{head|en|verb|head=b|1head=c}}"
        );
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn remove_param_respects_value_filter() {
        let mut task = RemoveParam::new(vec!["en-noun".to_string()], "sort", Some("x".to_string()));
        let (text, _) = changed(run(&mut task, "{{en-noun|sort=x}} {{en-noun|sort=y}}"));
        assert_eq!(text, "{{en-noun}} {{en-noun|sort=y}}");

        let mut any_value = RemoveParam::new(vec!["en-noun".to_string()], "sort", None);
        let (text, notes) = changed(run(&mut any_value, "{{en-noun|sort=x}} {{en-noun|sort=y}}"));
        assert_eq!(text, "{{en-noun}} {{en-noun}}");
        assert_eq!(notes.len(), 2);
    }

    #[test]
    fn charactercat_becomes_auto_cat() {
        let mut task = CharacterCat;
        let (text, notes) = changed(run(&mut task, "==Translingual==\n...\n{{charactercat}}\n"));
        assert_eq!(text, "==Translingual==\n...\n{{auto cat}}\n");
        assert_eq!(notes, vec!["convert {{charactercat}} to {{auto cat}}"]);

        let (text, _) = changed(run(&mut task, "{{Charactercat|Latn}}"));
        assert_eq!(text, "{{auto cat}}");
        assert_eq!(run(&mut task, "{{auto cat}}"), PageOutcome::Unchanged);
    }
}
