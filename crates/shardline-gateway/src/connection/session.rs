//! Session state
//!
//! What a link must remember across sockets to resume instead of starting
//! over.

use crate::protocol::ResumePayload;

/// Resume capability of one link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    id: Option<String>,
    sequence: Option<u64>,
    resume_url: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session id from the startup payload
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Last sequence number received
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// URL the gateway asked resumes to use
    pub fn resume_url(&self) -> Option<&str> {
        self.resume_url.as_deref()
    }

    /// A session is known; the next socket resumes
    pub fn can_resume(&self) -> bool {
        self.id.is_some()
    }

    /// Remember a new session
    pub fn start(&mut self, id: String, resume_url: Option<String>) {
        tracing::debug!(session_id = %id, "Session started");
        self.id = Some(id);
        self.resume_url = resume_url;
    }

    /// Apply a dispatch sequence number; it never moves backwards
    pub fn observe(&mut self, sequence: u64) {
        match self.sequence {
            Some(last) if sequence < last => {
                tracing::debug!(last, sequence, "Ignoring out of order sequence");
            }
            _ => self.sequence = Some(sequence),
        }
    }

    /// Forget the session; the next socket identifies afresh
    pub fn clear(&mut self) {
        if let Some(id) = self.id.take() {
            tracing::debug!(session_id = %id, "Session cleared");
        }
        self.sequence = None;
        self.resume_url = None;
    }

    /// Resume payload for the stored session
    pub fn resume_payload(&self, token: &str) -> Option<ResumePayload> {
        Some(ResumePayload {
            token: token.to_string(),
            session_id: self.id.clone()?,
            seq: self.sequence.unwrap_or(0),
        })
    }
}
