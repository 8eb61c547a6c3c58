//! Typed SQL template resolution.
//!
//! File-defined transforms reference their inputs and output through named
//! placeholders (`{{raw_dataset}}`, `{{destination}}`, ...) rather than
//! hard-coded table names. Resolution maps each placeholder to a
//! fully-qualified table reference and rejects any placeholder left
//! unresolved instead of emitting malformed SQL silently.

use anyhow::Result;
use std::collections::BTreeMap;

/// Placeholder-to-table-reference mapping for one template render.
#[derive(Debug, Default, Clone)]
pub struct TemplateContext {
    entries: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a placeholder name to a fully-qualified table reference.
    pub fn bind(mut self, placeholder: &str, table_ref: &str) -> Self {
        self.entries
            .insert(placeholder.to_string(), table_ref.to_string());
        self
    }

    /// Substitute every bound placeholder in `template`.
    ///
    /// Fails if the rendered text still contains a `{{...}}` marker, naming
    /// the first unresolved placeholder.
    pub fn render(&self, template: &str) -> Result<String> {
        let mut rendered = template.to_string();
        for (placeholder, table_ref) in &self.entries {
            rendered = rendered.replace(&format!("{{{{{placeholder}}}}}"), table_ref);
        }

        if let Some(start) = rendered.find("{{") {
            let rest = &rendered[start + 2..];
            let name = rest
                .find("}}")
                .map(|end| &rest[..end])
                .unwrap_or(rest)
                .trim();
            anyhow::bail!("SQL template contains unresolved placeholder '{{{{{name}}}}}'");
        }

        Ok(rendered)
    }
}
