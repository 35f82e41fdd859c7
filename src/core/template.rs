//! Instruction templates.
//!
//! Task instructions may reference the output of another task with
//! `{task_name.output}` and run inputs with `{input_name}`. Anything that
//! does not look like a placeholder (for example literal JSON) is left alone.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Matches `{name}` and `{name.output}`, tolerating inner whitespace.
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_\-]*)(\.output)?\s*\}").unwrap()
});

/// A parsed instruction template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
}

impl Template {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
        }
    }

    /// The raw template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of tasks whose output this template references, in order of
    /// first appearance.
    pub fn output_refs(&self) -> Vec<String> {
        self.refs(true)
    }

    /// Names of run inputs this template references, in order of first
    /// appearance.
    pub fn input_refs(&self) -> Vec<String> {
        self.refs(false)
    }

    fn refs(&self, outputs: bool) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in PLACEHOLDER_RE.captures_iter(&self.source) {
            if caps.get(2).is_some() != outputs {
                continue;
            }
            let name = caps[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Substitute task outputs and run inputs.
    ///
    /// Placeholders with no matching value are kept verbatim.
    pub fn render(
        &self,
        outputs: &HashMap<String, String>,
        inputs: &HashMap<String, String>,
    ) -> String {
        PLACEHOLDER_RE
            .replace_all(&self.source, |caps: &regex::Captures| {
                let name = &caps[1];
                let value = if caps.get(2).is_some() {
                    outputs.get(name)
                } else {
                    inputs.get(name)
                };
                match value {
                    Some(v) => v.clone(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// Substitute run inputs only, leaving output references untouched.
pub fn render_inputs(text: &str, inputs: &HashMap<String, String>) -> String {
    Template::new(text).render(&HashMap::new(), inputs)
}
