//! Built-in data remediation tools.

mod apply_rules;
pub(crate) mod generate_rules;
pub(crate) mod identify_anomalies;
pub(crate) mod profile_data;

pub use apply_rules::{apply_to_rows, ApplyRulesTool};
pub use generate_rules::{clean_replacement, generate, GenerateRulesTool};
pub use identify_anomalies::{detect, IdentifyAnomaliesTool};
pub use profile_data::{profile_rows, ProfileDataTool};

use crate::tool::ToolRegistry;

/// A registry holding the four remediation tools under their canonical names.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ProfileDataTool);
    registry.register(IdentifyAnomaliesTool);
    registry.register(GenerateRulesTool);
    registry.register(ApplyRulesTool);
    registry
}
