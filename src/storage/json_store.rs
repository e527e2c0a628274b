use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::engine::types::{AgentRecord, LeadRecord, Session};
use crate::storage::{AgentStore, LeadSink, SessionStore};

/// File-backed store: one JSON file per agent, session, and lead.
///
/// Layout under the base directory:
///   agents/{agent_id}.json
///   sessions/{agent_id}/{session_id}.json
///   leads/{agent_id}/{lead_id}.json
pub struct JsonStore {
    base_dir: PathBuf,
    lock: RwLock<()>,
}

impl JsonStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        }
    }

    fn agent_path(&self, agent_id: &str) -> PathBuf {
        self.base_dir
            .join("agents")
            .join(format!("{}.json", sanitize(agent_id)))
    }

    fn session_path(&self, agent_id: &str, session_id: &str) -> PathBuf {
        self.base_dir
            .join("sessions")
            .join(sanitize(agent_id))
            .join(format!("{}.json", sanitize(session_id)))
    }

    fn lead_dir(&self, agent_id: &str) -> PathBuf {
        self.base_dir.join("leads").join(sanitize(agent_id))
    }

    async fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, path).await?;

        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(value))
    }
}

/// File names come from externally-supplied ids; keep them path-safe.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl SessionStore for JsonStore {
    async fn load_session(&self, agent_id: &str, session_id: &str) -> Result<Option<Session>> {
        let _lock = self.lock.read().await;
        self.read_json(&self.session_path(agent_id, session_id)).await
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        let _lock = self.lock.write().await;
        let path = self.session_path(&session.agent_id, &session.session_id);
        self.write_json(&path, session).await
    }
}

#[async_trait]
impl LeadSink for JsonStore {
    async fn append_lead(&self, lead: &LeadRecord) -> Result<()> {
        let _lock = self.lock.write().await;
        let path = self
            .lead_dir(&lead.agent_id)
            .join(format!("{}.json", sanitize(&lead.id)));
        self.write_json(&path, lead).await
    }

    async fn list_leads(&self, agent_id: &str) -> Result<Vec<LeadRecord>> {
        let _lock = self.lock.read().await;

        let dir = self.lead_dir(agent_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut leads = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Ok(data) = tokio::fs::read_to_string(&path).await
                && let Ok(lead) = serde_json::from_str::<LeadRecord>(&data)
            {
                leads.push(lead);
            }
        }

        leads.sort_by(|a, b| a.captured_at.cmp(&b.captured_at));
        Ok(leads)
    }
}

#[async_trait]
impl AgentStore for JsonStore {
    async fn put_agent(&self, agent: &AgentRecord) -> Result<()> {
        let _lock = self.lock.write().await;
        self.write_json(&self.agent_path(&agent.id), agent).await
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        let _lock = self.lock.read().await;
        self.read_json(&self.agent_path(agent_id)).await
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let _lock = self.lock.read().await;

        let dir = self.base_dir.join("agents");
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut agents = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Ok(data) = tokio::fs::read_to_string(&path).await
                && let Ok(agent) = serde_json::from_str::<AgentRecord>(&data)
            {
                agents.push(agent);
            }
        }

        agents.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(agents)
    }
}
