use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use super::SessionBackend;
use crate::error::{EventideError, Result};
use crate::types::{Message, Session};

/// JSON files, one per session, under `<data_dir>/sessions`.
#[derive(Debug, Clone)]
pub struct FileSessionBackend {
    dir: PathBuf,
}

impl FileSessionBackend {
    /// Backend rooted at `dir` (the sessions directory itself).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Backend under `<data_dir>/sessions`.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("sessions"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(EventideError::InvalidArgument(format!(
                "invalid session id: {session_id:?}"
            )));
        }
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    async fn write(&self, session: &Session) -> Result<()> {
        let path = self.session_path(&session.session_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let serialized = serde_json::to_vec_pretty(session)?;
        // Write then rename so readers never see a half-written file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serialized).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionBackend for FileSessionBackend {
    async fn load_all(&self) -> Result<Vec<Session>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Session>(&raw) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable session file"),
            }
        }
        Ok(sessions)
    }

    async fn create(&self, session: &Session) -> Result<Session> {
        self.write(session).await?;
        Ok(session.clone())
    }

    async fn update(&self, session: &Session) -> Result<()> {
        self.write(session).await
    }

    async fn append_message(&self, session: &Session, _message: &Message) -> Result<()> {
        self.write(session).await
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let path = self.session_path(session_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
