use anyhow::{Context, Result};

use crate::api::WikiReadApi;
use crate::edit::{PageContext, PageOutcome, PageProcessor};
use crate::wikitext::parse_text;

/// Drop a parameter when the server renders the template the same without it.
pub struct RemoveRedundantParam {
    templates: Vec<String>,
    param: String,
}

impl RemoveRedundantParam {
    pub fn new(templates: Vec<String>, param: &str) -> Self {
        Self {
            templates,
            param: param.trim().to_string(),
        }
    }
}

impl PageProcessor for RemoveRedundantParam {
    fn process(
        &mut self,
        page: &PageContext,
        text: &str,
        api: &mut dyn WikiReadApi,
    ) -> Result<PageOutcome> {
        let mut parsed = parse_text(text);
        let mut notes = Vec::new();
        for template in parsed.templates_mut() {
            if !template.matches_name(&self.templates) || !template.has_param(&self.param) {
                continue;
            }
            let original = template.to_string();
            let mut candidate = template.clone();
            candidate.remove_param(&self.param);
            let candidate = candidate.to_string();

            let before = api
                .expand_template(&original, &page.title)
                .with_context(|| format!("failed to expand {original}"))?;
            let after = api
                .expand_template(&candidate, &page.title)
                .with_context(|| format!("failed to expand {candidate}"))?;
            if before != after {
                page.msg(format!(
                    "keeping {}= in {original}: expansion differs without it",
                    self.param
                ));
                continue;
            }
            template.remove_param(&self.param);
            notes.push(format!(
                "remove redundant {}= from {{{{{}}}}}",
                self.param,
                template.name()
            ));
        }

        let new_text = parsed.to_string();
        if notes.is_empty() || new_text == text {
            return Ok(PageOutcome::Unchanged);
        }
        Ok(PageOutcome::Changed {
            text: new_text,
            notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::RemoveRedundantParam;
    use crate::api::mock::MockWiki;
    use crate::edit::{PageContext, PageOutcome, PageProcessor};

    #[test]
    fn removes_only_params_that_do_not_change_expansion() {
        let mut api = MockWiki::default();
        api.expansions.insert(
            "{{en-noun|head=cat}}".to_string(),
            "<b>cat</b>".to_string(),
        );
        api.expansions
            .insert("{{en-noun}}".to_string(), "<b>cat</b>".to_string());
        api.expansions.insert(
            "{{en-noun|head=[[big]] cat}}".to_string(),
            "<b>big cat</b>".to_string(),
        );

        let mut task = RemoveRedundantParam::new(vec!["en-noun".to_string()], "head");
        let page = PageContext::new(1, "cat");

        let outcome = task
            .process(&page, "{{en-noun|head=cat}}", &mut api)
            .expect("process");
        assert_eq!(
            outcome,
            PageOutcome::Changed {
                text: "{{en-noun}}".to_string(),
                notes: vec!["remove redundant head= from {{en-noun}}".to_string()],
            }
        );

        let outcome = task
            .process(&page, "{{en-noun|head=[[big]] cat}}", &mut api)
            .expect("process");
        assert_eq!(outcome, PageOutcome::Unchanged);
        assert_eq!(api.request_count, 4);
    }
}
