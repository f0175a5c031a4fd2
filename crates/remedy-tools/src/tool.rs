use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use remedy_types::{RemedyError, Result, State};

/// Name and description under which a tool is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
}

/// A pure state transform.
///
/// `apply` takes ownership of the current state and returns the complete
/// replacement. Tools never see each other and never keep state between calls.
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    fn apply(&self, state: State) -> Result<State>;
}

/// Adapter that turns a closure into a [`Tool`].
pub struct FnTool<F> {
    definition: ToolDefinition,
    func: F,
}

impl<F> FnTool<F>
where
    F: Fn(State) -> Result<State> + Send + Sync,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>, func: F) -> Self {
        Self {
            definition: ToolDefinition {
                name: name.into(),
                description: description.into(),
            },
            func,
        }
    }
}

impl<F> Tool for FnTool<F>
where
    F: Fn(State) -> Result<State> + Send + Sync,
{
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn apply(&self, state: State) -> Result<State> {
        (self.func)(state)
    }
}

/// Registry that holds named tools and provides lookup.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Install a tool under its definition name, replacing any previous one.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let def = tool.definition();
        if self.tools.insert(def.name.clone(), Box::new(tool)).is_some() {
            tracing::debug!(tool = %def.name, "Replaced registered tool");
        }
    }

    /// Install a closure as a tool.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, description: impl Into<String>, func: F)
    where
        F: Fn(State) -> Result<State> + Send + Sync + 'static,
    {
        self.register(FnTool::new(name, description, func));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Look up a tool for `node`, failing with `UnknownTool` when absent.
    pub fn resolve(&self, name: &str, node: &str) -> Result<&dyn Tool> {
        self.get(name).ok_or_else(|| RemedyError::UnknownTool {
            tool: name.to_string(),
            node: node.to_string(),
        })
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
