//! The fixed registry of agent tool names a task may be restricted to.

use crate::error::{Error, Result};

/// Tools the agent runtime understands. `allowed_tools` entries must come
/// from this set; names are case-sensitive to match the agent's own.
pub const VALID_TOOLS: &[&str] = &[
    "Read",
    "Write",
    "Edit",
    "Glob",
    "Grep",
    "Bash",
    "Task",
    "TodoWrite",
    "WebFetch",
    "WebSearch",
    "NotebookEdit",
];

/// Tools granted when a task does not restrict them.
pub const DEFAULT_TOOLS: &[&str] = &["Read", "Write", "Edit", "Bash", "Glob", "Grep"];

pub fn is_valid_tool(name: &str) -> bool {
    VALID_TOOLS.contains(&name)
}

/// Validate an `allowed_tools` list against the registry.
pub fn validate_allowed_tools(tools: &[String]) -> Result<()> {
    for tool in tools {
        if !is_valid_tool(tool) {
            return Err(Error::Validation(format!("invalid tool name: {tool}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_members_are_valid() {
        for tool in VALID_TOOLS {
            assert!(is_valid_tool(tool));
        }
    }

    #[test]
    fn names_are_case_sensitive() {
        assert!(is_valid_tool("Bash"));
        assert!(!is_valid_tool("bash"));
        assert!(!is_valid_tool("BASH"));
    }

    #[test]
    fn unknown_tool_rejected() {
        let tools = vec!["Read".to_string(), "DeleteEverything".to_string()];
        let err = validate_allowed_tools(&tools).unwrap_err();
        assert!(err.to_string().contains("DeleteEverything"));
    }

    #[test]
    fn empty_list_is_valid() {
        assert!(validate_allowed_tools(&[]).is_ok());
    }

    #[test]
    fn default_tools_are_subset_of_registry() {
        for tool in DEFAULT_TOOLS {
            assert!(is_valid_tool(tool), "{tool} missing from registry");
        }
    }
}
