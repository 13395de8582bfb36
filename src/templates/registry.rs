use std::collections::HashMap;
use std::fmt;

use super::{flows, tasks, FlowTemplate, TaskTemplate};

pub struct TemplateRegistry {
    flows: HashMap<String, Box<dyn FlowTemplate>>,
    tasks: HashMap<String, Box<dyn TaskTemplate>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self {
            flows: HashMap::new(),
            tasks: HashMap::new(),
        }
    }

    pub fn register_flow(
        &mut self,
        flow: impl FlowTemplate + 'static,
    ) -> Option<Box<dyn FlowTemplate>> {
        self.flows.insert(flow.name().to_owned(), Box::new(flow))
    }

    pub fn register_task(
        &mut self,
        task: impl TaskTemplate + 'static,
    ) -> Option<Box<dyn TaskTemplate>> {
        self.tasks.insert(task.name().to_owned(), Box::new(task))
    }

    pub fn get_flow(&self, name: &str) -> Option<&dyn FlowTemplate> {
        self.flows.get(name).map(|f| f.as_ref())
    }

    pub fn get_task(&self, name: &str) -> Option<&dyn TaskTemplate> {
        self.tasks.get(name).map(|t| t.as_ref())
    }

    pub fn flow_names(&self) -> Vec<&str> {
        self.flows.keys().map(String::as_str).collect()
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("flows", &self.flow_names())
            .field("tasks", &self.task_names())
            .finish()
    }
}

pub fn default_registry() -> TemplateRegistry {
    let mut registry = TemplateRegistry::new();

    registry.register_flow(flows::ExampleFlow);
    registry.register_flow(flows::ExampleBlockedFlow);
    registry.register_flow(flows::ExampleFailureFlow);
    registry.register_flow(flows::ExampleLargeFlow);

    registry.register_task(tasks::ExampleTask);
    registry.register_task(tasks::ExampleBlockedTask);
    registry.register_task(tasks::ExampleFailureTask);

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_starts_empty() {
        let registry = TemplateRegistry::new();
        assert!(registry.flow_names().is_empty());
        assert!(registry.task_names().is_empty());
    }

    #[test]
    fn default_registry_has_sample_templates() {
        let registry = default_registry();

        assert!(registry.get_flow("example").is_some());
        assert!(registry.get_flow("example_blocked").is_some());
        assert!(registry.get_flow("example_failure").is_some());
        assert!(registry.get_flow("example_large").is_some());

        assert!(registry.get_task("example").is_some());
        assert!(registry.get_task("example_blocked").is_some());
        assert!(registry.get_task("example_failure").is_some());
    }

    #[test]
    fn get_missing_returns_none() {
        let registry = TemplateRegistry::new();
        assert!(registry.get_flow("nope").is_none());
        assert!(registry.get_task("nope").is_none());
    }

    #[test]
    fn registry_debug_shows_names() {
        let registry = default_registry();
        let debug = format!("{registry:?}");
        assert!(debug.contains("example"));
    }
}
