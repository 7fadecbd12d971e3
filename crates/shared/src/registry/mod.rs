use std::collections::HashMap;
use std::sync::Arc;

use crate::schemas::ToolDescriptor;
use crate::tools::{toolbelts, Tool};

/// Lookup of available tools by name.
///
/// Built once at startup and only read afterwards, so it can be shared
/// across sessions behind an `Arc`.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every bundled toolbelt.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for tool in toolbelts::clock::tools() {
            registry.register(tool);
        }
        for tool in toolbelts::file_smith::tools() {
            registry.register(tool);
        }
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.descriptor())
            .collect()
    }

    /// Descriptors for the named subset, skipping unknown names.
    pub fn descriptors_for(&self, names: &[String]) -> Vec<ToolDescriptor> {
        names
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.descriptor())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_register_every_toolbelt() {
        let registry = ToolRegistry::with_defaults();
        assert_eq!(
            registry.names(),
            vec![
                "Clock::current_time",
                "Clock::elapsed_since",
                "FileSmith::list_directory",
                "FileSmith::read_file",
                "FileSmith::write_file",
            ]
        );
        assert_eq!(registry.len(), 5);
        assert!(registry.get("Clock::current_time").is_some());
        assert!(registry.get("Clock::tomorrow").is_none());
    }

    #[test]
    fn descriptors_carry_json_schema() {
        let registry = ToolRegistry::with_defaults();
        let descriptors = registry.descriptors_for(&["Clock::elapsed_since".to_string(), "missing".to_string()]);
        assert_eq!(descriptors.len(), 1);

        let d = &descriptors[0];
        assert_eq!(d.tool_type, "function");
        assert_eq!(d.name(), "Clock::elapsed_since");
        assert_eq!(d.function.parameters["type"], "object");
        assert_eq!(d.function.parameters["required"][0], "timestamp");
        assert_eq!(d.function.parameters["properties"]["timestamp"]["type"], "integer");
    }

    #[tokio::test]
    async fn server_tools_execute_in_process() {
        let registry = ToolRegistry::with_defaults();
        let clock = registry.get("Clock::current_time").unwrap();
        assert!(!clock.requires_permission());
        let result = clock.execute(&Default::default()).await.unwrap();
        assert!(result.success);
        assert!(result.text().contains("unix_seconds"));
    }
}
