//! User commands consumed by the state machine and the input handler

use super::context::LlmResponse;
use crate::operations::Operation;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageDirection {
    Next,
    Prev,
}

/// Closed set of commands, each with its own payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum Command {
    Help,
    Quit,
    Queries,
    Mutations,
    GoBack,
    NavigatePage {
        direction: PageDirection,
    },
    SelectOperation {
        operation_name: String,
    },
    ToggleSearch,
    UpdateSearch {
        query: String,
    },
    SubmitOperationConfig {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        configuration_rules: Option<String>,
    },
    CancelOperationConfig,
    DeferOperationConfig,
    ResumeUnfinished {
        id: String,
    },
    Modify,
    Cancel,
    Regenerate,
    Accept,
    Retry,
    WriteOperationToFile {
        operation: Operation,
        llm_response: LlmResponse,
    },
}

/// Field-less command name, as listed in `available_actions`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandName {
    Help,
    Quit,
    Queries,
    Mutations,
    GoBack,
    NavigatePage,
    SelectOperation,
    ToggleSearch,
    UpdateSearch,
    SubmitOperationConfig,
    CancelOperationConfig,
    DeferOperationConfig,
    ResumeUnfinished,
    Modify,
    Cancel,
    Regenerate,
    Accept,
    Retry,
    WriteOperationToFile,
}

impl CommandName {
    pub const ALL: [CommandName; 19] = [
        Self::Help,
        Self::Quit,
        Self::Queries,
        Self::Mutations,
        Self::GoBack,
        Self::NavigatePage,
        Self::SelectOperation,
        Self::ToggleSearch,
        Self::UpdateSearch,
        Self::SubmitOperationConfig,
        Self::CancelOperationConfig,
        Self::DeferOperationConfig,
        Self::ResumeUnfinished,
        Self::Modify,
        Self::Cancel,
        Self::Regenerate,
        Self::Accept,
        Self::Retry,
        Self::WriteOperationToFile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::Quit => "quit",
            Self::Queries => "queries",
            Self::Mutations => "mutations",
            Self::GoBack => "go_back",
            Self::NavigatePage => "navigate_page",
            Self::SelectOperation => "select_operation",
            Self::ToggleSearch => "toggle_search",
            Self::UpdateSearch => "update_search",
            Self::SubmitOperationConfig => "submit_operation_config",
            Self::CancelOperationConfig => "cancel_operation_config",
            Self::DeferOperationConfig => "defer_operation_config",
            Self::ResumeUnfinished => "resume_unfinished",
            Self::Modify => "modify",
            Self::Cancel => "cancel",
            Self::Regenerate => "regenerate",
            Self::Accept => "accept",
            Self::Retry => "retry",
            Self::WriteOperationToFile => "write_operation_to_file",
        }
    }
}

impl std::fmt::Display for CommandName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommandName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase().replace('-', "_");
        let alias = match s.as_str() {
            "?" | "h" => Some(Self::Help),
            "q" | "exit" => Some(Self::Quit),
            "back" => Some(Self::GoBack),
            "submit" => Some(Self::SubmitOperationConfig),
            "defer" => Some(Self::DeferOperationConfig),
            "resume" => Some(Self::ResumeUnfinished),
            "select" => Some(Self::SelectOperation),
            "search" => Some(Self::UpdateSearch),
            _ => None,
        };
        alias
            .or_else(|| Self::ALL.iter().copied().find(|name| name.as_str() == s))
            .ok_or_else(|| format!("unknown command: {}", s))
    }
}

impl Command {
    pub fn name(&self) -> CommandName {
        match self {
            Self::Help => CommandName::Help,
            Self::Quit => CommandName::Quit,
            Self::Queries => CommandName::Queries,
            Self::Mutations => CommandName::Mutations,
            Self::GoBack => CommandName::GoBack,
            Self::NavigatePage { .. } => CommandName::NavigatePage,
            Self::SelectOperation { .. } => CommandName::SelectOperation,
            Self::ToggleSearch => CommandName::ToggleSearch,
            Self::UpdateSearch { .. } => CommandName::UpdateSearch,
            Self::SubmitOperationConfig { .. } => CommandName::SubmitOperationConfig,
            Self::CancelOperationConfig => CommandName::CancelOperationConfig,
            Self::DeferOperationConfig => CommandName::DeferOperationConfig,
            Self::ResumeUnfinished { .. } => CommandName::ResumeUnfinished,
            Self::Modify => CommandName::Modify,
            Self::Cancel => CommandName::Cancel,
            Self::Regenerate => CommandName::Regenerate,
            Self::Accept => CommandName::Accept,
            Self::Retry => CommandName::Retry,
            Self::WriteOperationToFile { .. } => CommandName::WriteOperationToFile,
        }
    }

    /// Parse the console syntax `name [argument text]`.
    ///
    /// `write_operation_to_file` is internal and cannot be typed.
    pub fn parse_line(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            bail!("empty command");
        }
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        let name: CommandName = head.parse().map_err(anyhow::Error::msg)?;
        let arg = (!rest.is_empty()).then(|| rest.to_string());

        let command = match name {
            CommandName::Help => Self::Help,
            CommandName::Quit => Self::Quit,
            CommandName::Queries => Self::Queries,
            CommandName::Mutations => Self::Mutations,
            CommandName::GoBack => Self::GoBack,
            CommandName::NavigatePage => {
                let direction = match rest.to_lowercase().as_str() {
                    "" | "next" | "n" | ">" => PageDirection::Next,
                    "prev" | "previous" | "p" | "<" => PageDirection::Prev,
                    other => bail!("navigate_page expects next or prev, got {}", other),
                };
                Self::NavigatePage { direction }
            }
            CommandName::SelectOperation => match arg {
                Some(operation_name) => Self::SelectOperation { operation_name },
                None => bail!("select_operation needs an operation name"),
            },
            CommandName::ToggleSearch => Self::ToggleSearch,
            CommandName::UpdateSearch => Self::UpdateSearch {
                query: rest.to_string(),
            },
            CommandName::SubmitOperationConfig => Self::SubmitOperationConfig {
                configuration_rules: arg,
            },
            CommandName::CancelOperationConfig => Self::CancelOperationConfig,
            CommandName::DeferOperationConfig => Self::DeferOperationConfig,
            CommandName::ResumeUnfinished => match arg {
                Some(id) => Self::ResumeUnfinished { id },
                None => bail!("resume_unfinished needs an id such as query:get all artists"),
            },
            CommandName::Modify => Self::Modify,
            CommandName::Cancel => Self::Cancel,
            CommandName::Regenerate => Self::Regenerate,
            CommandName::Accept => Self::Accept,
            CommandName::Retry => Self::Retry,
            CommandName::WriteOperationToFile => {
                bail!("write_operation_to_file is issued by the pipeline, not typed")
            }
        };
        Ok(command)
    }
}
