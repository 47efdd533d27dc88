use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::store::{SessionSnapshot, Store};

enum WriteOp {
    Checkpoint(SessionSnapshot),
    Session(SessionSnapshot),
    Finished {
        guid: String,
        progress_in_millis: i64,
        finished_at: i64,
    },
    Flush(oneshot::Sender<()>),
}

/// Background writer for playback persistence.
///
/// Writes are queued without waiting and applied in submission order by a
/// task of their own, so a caller that goes away mid-write never cancels it.
/// Failures are logged and dropped.
#[derive(Debug, Clone)]
pub struct SessionWriter {
    ops: mpsc::UnboundedSender<WriteOp>,
}

impl SessionWriter {
    /// Start the writer task on the current runtime
    pub fn spawn(store: Store) -> Self {
        let (ops, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(store, rx));
        Self { ops }
    }

    /// Episode progress and session snapshot together
    pub fn checkpoint(&self, snapshot: SessionSnapshot) {
        self.submit(WriteOp::Checkpoint(snapshot));
    }

    /// Session snapshot only
    pub fn save_session(&self, snapshot: SessionSnapshot) {
        self.submit(WriteOp::Session(snapshot));
    }

    pub fn mark_finished(&self, guid: String, progress_in_millis: i64, finished_at: i64) {
        self.submit(WriteOp::Finished {
            guid,
            progress_in_millis,
            finished_at,
        });
    }

    /// Wait until everything queued so far has been applied
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.ops.send(WriteOp::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    fn submit(&self, op: WriteOp) {
        if self.ops.send(op).is_err() {
            warn!("Session writer is gone, dropping write");
        }
    }
}

async fn run(store: Store, mut ops: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = ops.recv().await {
        match op {
            WriteOp::Checkpoint(snapshot) => {
                if let Err(error) = store.checkpoint(&snapshot).await {
                    warn!(guid = %snapshot.last_guid, %error, "Failed to write playback checkpoint");
                }
            }
            WriteOp::Session(snapshot) => {
                if let Err(error) = store.save_session(&snapshot).await {
                    warn!(guid = %snapshot.last_guid, %error, "Failed to save session snapshot");
                }
            }
            WriteOp::Finished {
                guid,
                progress_in_millis,
                finished_at,
            } => {
                if let Err(error) = store
                    .mark_finished(&guid, Some(progress_in_millis), finished_at)
                    .await
                {
                    warn!(%guid, %error, "Failed to mark episode finished");
                }
            }
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Session writer stopped");
}
