use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::types::{AgentRecord, LeadRecord, Session};
use crate::storage::{AgentStore, LeadSink, SessionStore};

/// In-memory store for tests and embedded use. State lives only as long as
/// the store instance.
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, Session>>,
    leads: Mutex<Vec<LeadRecord>>,
    agents: Mutex<HashMap<String, AgentRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            leads: Mutex::new(Vec::new()),
            agents: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn session_key(agent_id: &str, session_id: &str) -> String {
    format!("{}/{}", agent_id, session_id)
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load_session(&self, agent_id: &str, session_id: &str) -> Result<Option<Session>> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions.get(&session_key(agent_id, session_id)).cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        let key = session_key(&session.agent_id, &session.session_id);
        self.sessions.lock().unwrap().insert(key, session.clone());
        Ok(())
    }
}

#[async_trait]
impl LeadSink for MemoryStore {
    async fn append_lead(&self, lead: &LeadRecord) -> Result<()> {
        self.leads.lock().unwrap().push(lead.clone());
        Ok(())
    }

    async fn list_leads(&self, agent_id: &str) -> Result<Vec<LeadRecord>> {
        let leads = self.leads.lock().unwrap();
        Ok(leads
            .iter()
            .filter(|lead| lead.agent_id == agent_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn put_agent(&self, agent: &AgentRecord) -> Result<()> {
        self.agents
            .lock()
            .unwrap()
            .insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        Ok(self.agents.lock().unwrap().get(agent_id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let mut agents: Vec<AgentRecord> =
            self.agents.lock().unwrap().values().cloned().collect();
        agents.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(agents)
    }
}
