use serde::{Deserialize, Serialize};

/// Answer mode picked by the user; decides which agent the server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Default,
    Research,
    Fortune,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Default => "default",
            Mode::Research => "research",
            Mode::Fortune => "fortune",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "default" | "chat" => Some(Mode::Default),
            "research" | "research_agent" => Some(Mode::Research),
            "fortune" | "fortune_agent" => Some(Mode::Fortune),
            _ => None,
        }
    }

    pub fn all() -> Vec<Mode> {
        vec![Mode::Default, Mode::Research, Mode::Fortune]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Mode::Default => "Chat",
            Mode::Research => "Deep Research (tools + RAG)",
            Mode::Fortune => "Fortune Analysis",
        }
    }

    /// `agent_name` sent with the request.
    pub fn agent_name(&self) -> &'static str {
        match self {
            Mode::Default => "default",
            Mode::Research => "research_agent",
            Mode::Fortune => "fortune_agent",
        }
    }
}
