//! Serialized access to a [`Workspace`].
//!
//! The workspace lives on its own thread and executes one job at a time from
//! an unbounded queue, so every query sees either the state before or after a
//! mutation, never a partial update.

use crate::app::workspace::Workspace;
use anyhow::{Context as _, Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce(&mut Workspace) + Send>;

enum Message {
    Run(Job),
    Close(oneshot::Sender<Result<()>>),
}

/// Cloneable handle to a workspace running on a dedicated thread
#[derive(Clone)]
pub struct WorkspaceHandle {
    tx: mpsc::UnboundedSender<Message>,
    root: Arc<PathBuf>,
}

impl WorkspaceHandle {
    /// Move `workspace` onto a new thread and start draining jobs.
    ///
    /// The loop ends on [`close`](Self::close) or once every handle is
    /// dropped; either way the stores are flushed first.
    pub fn spawn(workspace: Workspace) -> Result<Self> {
        let root = Arc::new(workspace.root().to_path_buf());
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("timpact-workspace".into())
            .spawn(move || run(workspace, rx))
            .context("Failed to spawn workspace thread")?;
        Ok(Self { tx, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run `f` with exclusive access to the workspace and await its result.
    pub async fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Workspace) -> R + Send + 'static,
    {
        self.enqueue(f)?
            .await
            .map_err(|_| anyhow!("Workspace job was dropped"))
    }

    /// Blocking variant of [`call`](Self::call) for synchronous callers.
    /// Must not be used from inside an async runtime.
    pub fn call_blocking<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Workspace) -> R + Send + 'static,
    {
        self.enqueue(f)?
            .blocking_recv()
            .map_err(|_| anyhow!("Workspace job was dropped"))
    }

    /// Finish queued jobs, flush the stores and stop the workspace thread.
    pub async fn close(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Message::Close(tx))
            .map_err(|_| anyhow!("Workspace is closed"))?;
        rx.await.map_err(|_| anyhow!("Workspace stopped before closing"))?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn enqueue<R, F>(&self, f: F) -> Result<oneshot::Receiver<R>>
    where
        R: Send + 'static,
        F: FnOnce(&mut Workspace) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |ws| {
            // Receiver gone means the caller stopped waiting
            let _ = tx.send(f(ws));
        });
        self.tx
            .send(Message::Run(job))
            .map_err(|_| anyhow!("Workspace is closed"))?;
        Ok(rx)
    }
}

fn run(mut workspace: Workspace, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.blocking_recv() {
        match message {
            Message::Run(job) => job(&mut workspace),
            Message::Close(reply) => {
                rx.close();
                // Jobs queued before close still run
                while let Ok(Message::Run(job)) = rx.try_recv() {
                    job(&mut workspace);
                }
                let _ = reply.send(workspace.close());
                return;
            }
        }
    }
    if let Err(e) = workspace.close() {
        tracing::warn!(error = %format!("{e:#}"), "Failed to flush workspace on shutdown");
    }
}
