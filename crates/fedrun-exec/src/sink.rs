use std::{
    collections::HashMap,
    io,
    path::Path,
    sync::{Mutex, PoisonError},
};

use fedrun_store::{Journal, LogTarget};
use tokio::{fs, io::AsyncWriteExt};
use tracing::trace;

#[derive(Debug, Default)]
struct Buffers {
    sessions: HashMap<String, String>,
    runs: HashMap<String, String>,
}

impl Buffers {
    fn map(&mut self, target: LogTarget<'_>) -> (&mut HashMap<String, String>, String) {
        match target {
            LogTarget::Session(id) => (&mut self.sessions, id.to_string()),
            LogTarget::Run(id) => (&mut self.runs, id.to_string()),
        }
    }
}

/// Log destination of one slot: an append-only file plus per-record buffers
/// whose full contents are mirrored to the record store.
///
/// File appends are serialized. Mirror publishes are serialized too and always
/// send the latest buffer, so a slow publish never overwrites newer text.
#[derive(Debug)]
pub struct LogSink {
    journal: Journal,
    buffers: Mutex<Buffers>,
    file_lock: tokio::sync::Mutex<()>,
    publish_lock: tokio::sync::Mutex<()>,
}

impl LogSink {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            buffers: Mutex::new(Buffers::default()),
            file_lock: tokio::sync::Mutex::new(()),
            publish_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Start buffering text for `target`. Text for unregistered targets is not mirrored.
    pub fn register(&self, target: LogTarget<'_>) {
        let mut buffers = self.lock();
        let (map, key) = buffers.map(target);
        map.entry(key).or_default();
    }

    /// Drop the buffer for `target`.
    pub fn forget(&self, target: LogTarget<'_>) {
        let mut buffers = self.lock();
        let (map, key) = buffers.map(target);
        map.remove(&key);
    }

    /// Current buffer for `target`, if registered.
    pub fn buffer(&self, target: LogTarget<'_>) -> Option<String> {
        let mut buffers = self.lock();
        let (map, key) = buffers.map(target);
        map.get(&key).cloned()
    }

    /// Append `text` to the file at `path` and to the buffers of the given records.
    ///
    /// Only the file write can fail; mirroring is best-effort.
    pub async fn append(
        &self,
        path: &Path,
        text: &str,
        session_id: Option<&str>,
        run_id: Option<&str>,
    ) -> io::Result<()> {
        let written = {
            let _guard = self.file_lock.lock().await;
            write_file(path, text).await
        };

        if self.journal.is_enabled() {
            if let Some(id) = session_id {
                self.mirror(LogTarget::Session(id), text).await;
            }
            if let Some(id) = run_id {
                self.mirror(LogTarget::Run(id), text).await;
            }
        }
        written
    }

    async fn mirror(&self, target: LogTarget<'_>, text: &str) {
        {
            let mut buffers = self.lock();
            let (map, key) = buffers.map(target);
            match map.get_mut(&key) {
                Some(buffer) => buffer.push_str(text),
                None => {
                    trace!(?target, "log buffer not registered; skipping mirror");
                    return;
                }
            }
        }

        let _guard = self.publish_lock.lock().await;
        // Re-read after waiting: a concurrent append may have grown the buffer.
        if let Some(latest) = self.buffer(target) {
            self.journal.publish_log(target, &latest).await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Buffers> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn write_file(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(text.as_bytes()).await?;
    file.flush().await
}
