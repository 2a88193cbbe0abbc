use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::common::MemberId;

/// Member - a chat participant, provisioned once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MemberKind,
    pub description: Option<String>,
}

impl Member {
    pub fn human(id: impl Into<MemberId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: MemberKind::Human,
            description: None,
        }
    }

    pub fn agent(id: impl Into<MemberId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: MemberKind::Agent,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_agent(&self) -> bool {
        self.kind == MemberKind::Agent
    }
}

/// Member kind enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberKind {
    Human,
    Agent,
}

impl std::fmt::Display for MemberKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberKind::Human => write!(f, "human"),
            MemberKind::Agent => write!(f, "agent"),
        }
    }
}

impl std::str::FromStr for MemberKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "human" => Ok(MemberKind::Human),
            "agent" => Ok(MemberKind::Agent),
            _ => Err(anyhow::anyhow!("Invalid member kind: {}", s)),
        }
    }
}
