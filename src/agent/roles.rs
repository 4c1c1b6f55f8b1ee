//! Agent roles: system prompt plus tool set

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Root of a build: researches, creates the project, deploys
    Planner,
    /// Decides the file layout and delegates each file
    Structurer,
    /// Writes one file
    FileWriter,
    /// Root of a chat refinement on an existing project
    Refiner,
}

const PLANNER_PROMPT: &str = "You are the lead of a small web studio. Turn the user's request into a \
static website. Research with web_search when facts or inspiration help. Call start_project once \
with a short site name, then delegate_structure with a complete plan (pages, sections, copy, visual \
style). When the structure is done, call deploy_site and reply with a one-paragraph summary.";

const STRUCTURER_PROMPT: &str = "You design the file layout of a static website. The entry page is \
index.html; stylesheets and scripts live under css/ and js/. Use list_files to see what exists, then \
call delegate_file once per file with a precise brief that names the shared class names and links \
between files. Reply with the list of files when every file is written.";

const FILE_WRITER_PROMPT: &str = "You write exactly one file of a static website. Produce complete, \
valid, self-contained content and save it with write_file. Use read_file to stay consistent with \
files that already exist. Reply with one sentence describing what you wrote.";

const REFINER_PROMPT: &str = "You edit an existing static website at the user's request. Read \
index.html first. Prefer refine_file with small targeted operations (each selector must match \
exactly one element); rewrite a whole file with write_file only when the change is structural. \
Reply with a short description of what changed.";

impl AgentRole {
    pub const ALL: [AgentRole; 4] = [
        AgentRole::Planner,
        AgentRole::Structurer,
        AgentRole::FileWriter,
        AgentRole::Refiner,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Structurer => "structurer",
            AgentRole::FileWriter => "file_writer",
            AgentRole::Refiner => "refiner",
        }
    }

    pub fn system_prompt(self) -> &'static str {
        match self {
            AgentRole::Planner => PLANNER_PROMPT,
            AgentRole::Structurer => STRUCTURER_PROMPT,
            AgentRole::FileWriter => FILE_WRITER_PROMPT,
            AgentRole::Refiner => REFINER_PROMPT,
        }
    }

    pub fn tool_names(self) -> &'static [&'static str] {
        match self {
            AgentRole::Planner => &["web_search", "start_project", "delegate_structure", "deploy_site"],
            AgentRole::Structurer => &["list_files", "delegate_file"],
            AgentRole::FileWriter => &["read_file", "write_file"],
            AgentRole::Refiner => &["read_file", "write_file", "list_files", "refine_file"],
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_match_serde_names() {
        for role in AgentRole::ALL {
            let json = serde_json::to_value(role).unwrap();
            assert_eq!(json, role.label());
        }
    }

    #[test]
    fn test_delegation_tools_by_role() {
        // Delegation tools only appear where a child role exists to receive them
        assert!(AgentRole::Planner.tool_names().contains(&"delegate_structure"));
        assert!(AgentRole::Structurer.tool_names().contains(&"delegate_file"));
        assert!(!AgentRole::FileWriter.tool_names().iter().any(|t| t.starts_with("delegate")));
        assert!(!AgentRole::Refiner.tool_names().iter().any(|t| t.starts_with("delegate")));
    }
}
