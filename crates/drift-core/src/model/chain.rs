//! Chain: one continuous fabrication run

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::EntityId;

/// Lifecycle of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    Draft,
    Ready,
    Fabricate,
    Complete,
    Failed,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainState::Draft => "Draft",
            ChainState::Ready => "Ready",
            ChainState::Fabricate => "Fabricate",
            ChainState::Complete => "Complete",
            ChainState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// One continuous fabrication run, created once at startup from a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    pub id: EntityId,
    pub template_key: String,
    pub state: ChainState,
}

impl Chain {
    pub fn new(id: EntityId, template_key: impl Into<String>) -> Self {
        Self {
            id,
            template_key: template_key.into(),
            state: ChainState::Draft,
        }
    }
}
