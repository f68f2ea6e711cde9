use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use courier_protocol::{AgentError, AgentResult};
use serde_json::Value;

use crate::guard::PermissionGuard;

const MOBILE_DISPLAY_HINT: &str = "You are being driven from a mobile chat client. \
     Keep responses concise and skimmable on a small screen.";

/// The bridge is headless; interactive approval, when enabled, lives in the
/// permission guard rather than in a prompt loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionMode {
    #[default]
    Bypass,
}

impl PermissionMode {
    pub fn as_cli_flag(&self) -> &'static str {
        match self {
            Self::Bypass => "bypassPermissions",
        }
    }
}

/// System prompt contract: the CLI's default preset is preserved and a short
/// hint is appended. There is deliberately no way to replace the preset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPrompt {
    append: String,
}

impl SystemPrompt {
    pub fn preset_with_append(append: impl Into<String>) -> Self {
        Self {
            append: append.into(),
        }
    }

    pub fn append_text(&self) -> &str {
        &self.append
    }
}

/// Everything the agent client needs to spawn and drive one CLI session.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub cwd: PathBuf,
    pub resume_session: Option<String>,
    pub model: Option<String>,
    pub betas: Vec<String>,
    pub permission_mode: PermissionMode,
    pub system_prompt: SystemPrompt,
    pub guard: Option<Arc<PermissionGuard>>,
    pub agent_binary: PathBuf,
    pub agent_config_dir: PathBuf,
}

/// Per-query inputs to [`OptionsBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct OptionsRequest {
    pub cwd: PathBuf,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub betas: Vec<String>,
    pub approved_directory: Option<PathBuf>,
}

/// Builds [`AgentOptions`], reading the CLI user's settings file once per
/// builder lifetime.
pub struct OptionsBuilder {
    agent_config_dir: PathBuf,
    agent_binary: PathBuf,
    enforce_boundaries: bool,
    cli_settings: OnceLock<Value>,
}

impl OptionsBuilder {
    pub fn new(agent_config_dir: impl Into<PathBuf>, agent_binary: impl Into<PathBuf>) -> Self {
        Self {
            agent_config_dir: agent_config_dir.into(),
            agent_binary: agent_binary.into(),
            enforce_boundaries: true,
            cli_settings: OnceLock::new(),
        }
    }

    /// Disable the tool-permission guard entirely (single-tenant deployments
    /// that trust the agent with the whole machine).
    pub fn without_boundary_enforcement(mut self) -> Self {
        self.enforce_boundaries = false;
        self
    }

    pub fn build(&self, request: OptionsRequest) -> AgentResult<AgentOptions> {
        if request.cwd.as_os_str().is_empty() {
            return Err(AgentError::Configuration(
                "options field 'cwd' must not be empty".to_owned(),
            ));
        }
        if request.cwd.is_relative() {
            return Err(AgentError::Configuration(format!(
                "options field 'cwd' must be absolute, got '{}'",
                request.cwd.display()
            )));
        }

        let settings = self.cli_settings();
        let model = request.model.or_else(|| {
            settings
                .get("model")
                .and_then(Value::as_str)
                .map(str::to_owned)
        });

        let guard = match (&request.approved_directory, self.enforce_boundaries) {
            (Some(approved), true) => Some(Arc::new(PermissionGuard::new(
                request.cwd.clone(),
                vec![approved.clone()],
                self.agent_config_dir.clone(),
            ))),
            _ => None,
        };

        Ok(AgentOptions {
            cwd: request.cwd,
            resume_session: request.session_id.filter(|id| !id.is_empty()),
            model,
            betas: request.betas,
            permission_mode: PermissionMode::Bypass,
            system_prompt: SystemPrompt::preset_with_append(MOBILE_DISPLAY_HINT),
            guard,
            agent_binary: self.agent_binary.clone(),
            agent_config_dir: self.agent_config_dir.clone(),
        })
    }

    fn cli_settings(&self) -> &Value {
        self.cli_settings
            .get_or_init(|| read_cli_settings(&self.agent_config_dir))
    }
}

fn read_cli_settings(agent_config_dir: &Path) -> Value {
    let settings_path = agent_config_dir.join("settings.json");
    let raw = match std::fs::read_to_string(&settings_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Value::Object(Default::default());
        }
        Err(err) => {
            tracing::warn!(
                path = %settings_path.display(),
                error = %err,
                "failed to read CLI settings file"
            );
            return Value::Object(Default::default());
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(
                path = %settings_path.display(),
                error = %err,
                "CLI settings file is not valid JSON; treating as empty"
            );
            Value::Object(Default::default())
        }
    }
}
