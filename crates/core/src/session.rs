use crate::models::QaTurn;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Question/answer history per session id, kept for the lifetime of the process.
#[derive(Debug, Default)]
pub struct SessionLog {
    sessions: RwLock<HashMap<String, Vec<QaTurn>>>,
    limit: Option<usize>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `limit` turns per session, dropping the oldest first.
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            sessions: RwLock::default(),
            limit,
        }
    }

    pub async fn record(&self, session_id: &str, question: &str, answer: &str) {
        let mut sessions = self.sessions.write().await;
        let turns = sessions.entry(session_id.to_string()).or_default();
        turns.push(QaTurn {
            question: question.to_string(),
            answer: answer.to_string(),
        });

        if let Some(limit) = self.limit {
            if turns.len() > limit {
                let excess = turns.len() - limit;
                turns.drain(..excess);
            }
        }
    }

    /// Turns in the order they were asked; empty for unknown sessions.
    pub async fn history(&self, session_id: &str) -> Vec<QaTurn> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}
