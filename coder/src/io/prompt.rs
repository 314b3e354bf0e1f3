//! System prompt rendering from the capability registry.

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::io::tools::Registry;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

#[derive(Debug, Clone, Serialize)]
struct ToolContext {
    name: &'static str,
    signature: &'static str,
    description: &'static str,
}

/// Render the system prompt listing every registered capability in order.
pub fn render_system_prompt(registry: &Registry, root: &Path) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("system", SYSTEM_TEMPLATE)
        .context("load system prompt template")?;
    let tools: Vec<ToolContext> = registry
        .capabilities()
        .map(|c| ToolContext {
            name: c.name(),
            signature: c.signature(),
            description: c.description(),
        })
        .collect();
    let rendered = env
        .get_template("system")?
        .render(context! {
            tools => tools,
            root => root.display().to_string(),
        })
        .context("render system prompt")?;
    debug!(chars = rendered.len(), "system prompt rendered");
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_capabilities_in_registry_order() {
        let registry = Registry::standard().expect("registry");
        let prompt = render_system_prompt(&registry, Path::new("/work/demo")).expect("render");
        let read = prompt.find("• read_file(filename: str)").expect("read_file listed");
        let delete = prompt.find("• delete(path: str)").expect("delete listed");
        assert!(read < delete);
        assert!(prompt.contains("Read the complete contents of a file."));
        assert!(prompt.contains("FORMAT: tool: tool_name({'key': 'value'})"));
        assert!(prompt.contains("/work/demo"));
    }
}
