use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One slash command advertised by the agent CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashCommand {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub argument_hint: String,
}

/// Snapshot of the agent's initialize response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerInfo {
    pub commands: Vec<SlashCommand>,
}

impl ServerInfo {
    /// Read command metadata out of an initialize control response. Entries
    /// that are bare strings (older CLIs) become commands with empty
    /// descriptions; entries that fail to parse are dropped.
    pub fn from_initialize_response(response: &Value) -> Self {
        let commands = response
            .get("commands")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        if let Some(name) = entry.as_str() {
                            return Some(SlashCommand {
                                name: name.to_owned(),
                                description: String::new(),
                                argument_hint: String::new(),
                            });
                        }
                        serde_json::from_value(entry.clone()).ok()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { commands }
    }
}
