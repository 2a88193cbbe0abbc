use std::collections::HashMap;
use std::sync::Arc;

use crate::common::MemberId;
use crate::kernel::BaseReplyAgent;

/// Reply implementations keyed by agent member id.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<MemberId, Arc<dyn BaseReplyAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, member_id: impl Into<MemberId>, agent: Arc<dyn BaseReplyAgent>) {
        self.agents.insert(member_id.into(), agent);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_agent(mut self, member_id: impl Into<MemberId>, agent: Arc<dyn BaseReplyAgent>) -> Self {
        self.register(member_id, agent);
        self
    }

    pub fn get(&self, member_id: &MemberId) -> Option<Arc<dyn BaseReplyAgent>> {
        self.agents.get(member_id).cloned()
    }

    pub fn contains(&self, member_id: &MemberId) -> bool {
        self.agents.contains_key(member_id)
    }

    /// Registered agent ids, sorted.
    pub fn ids(&self) -> Vec<MemberId> {
        let mut ids: Vec<MemberId> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
