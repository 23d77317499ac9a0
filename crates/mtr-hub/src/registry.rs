use mtr_core::push::AgentInfo;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRecord {
    pub name: String,
    pub profiles: Vec<String>,
}

#[derive(Debug, Default)]
pub struct AgentRegistry {
    records: HashMap<String, AgentRecord>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A re-register on the same connection resets its profiles.
    pub fn register(&mut self, conn_id: &str, name: String) {
        self.records.insert(
            conn_id.to_string(),
            AgentRecord {
                name,
                profiles: Vec::new(),
            },
        );
    }

    // False (and no change) when the connection never registered.
    pub fn report_profiles(&mut self, conn_id: &str, profiles: Vec<String>) -> bool {
        match self.records.get_mut(conn_id) {
            Some(record) => {
                record.profiles = profiles;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, conn_id: &str) -> Option<AgentRecord> {
        self.records.remove(conn_id)
    }

    // Duplicate names shadow each other; which record wins is unspecified.
    pub fn find_by_name(&self, name: &str) -> Option<String> {
        self.records
            .iter()
            .find(|(_, record)| record.name == name)
            .map(|(conn_id, _)| conn_id.clone())
    }

    // Sorted by name so snapshots are stable across map iteration order.
    pub fn snapshot(&self) -> Vec<AgentInfo> {
        let mut agents: Vec<AgentInfo> = self
            .records
            .values()
            .map(|record| AgentInfo {
                name: record.name.clone(),
                profiles: record.profiles.clone(),
            })
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }
}
