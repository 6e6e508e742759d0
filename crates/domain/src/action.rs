use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::InvalidAdminAction;

/// Decision taken by a human risk reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminAction {
    Approve,
    Reject,
}

impl AdminAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminAction::Approve => "APPROVE",
            AdminAction::Reject => "REJECT",
        }
    }
}

impl std::fmt::Display for AdminAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdminAction {
    type Err = InvalidAdminAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "APPROVE" => Ok(AdminAction::Approve),
            "REJECT" => Ok(AdminAction::Reject),
            _ => Err(InvalidAdminAction(s.to_string())),
        }
    }
}
