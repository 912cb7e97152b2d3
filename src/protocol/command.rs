//! Ad-hoc request/response link.
//!
//! High-level operations submit a [`CommandRequest`] — a template plus a
//! reply slot — and the link worker answers each in FIFO order over its
//! own socket. A queued request never survives a failed connect: it is
//! answered with the error and dropped, not buffered across reconnects.
//!
//! `:shutdown#` is special-cased: a `1` reply means the mount is powering
//! off, so the link drops its connection instead of waiting for the peer
//! to vanish.

use super::link::{LinkError, MountLink};
use super::CommandTemplate;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One queued command with its reply slot.
pub struct CommandRequest {
    pub template: CommandTemplate,
    pub reply: oneshot::Sender<Result<Vec<String>, String>>,
}

/// Cloneable submission handle to the command link worker.
#[derive(Clone)]
pub struct CommandSender {
    queue: mpsc::Sender<CommandRequest>,
}

impl CommandSender {
    /// Send a template and await its reply fields.
    pub async fn exchange(&self, template: CommandTemplate) -> Result<Vec<String>, String> {
        let (tx, rx) = oneshot::channel();
        self.queue
            .send(CommandRequest {
                template,
                reply: tx,
            })
            .await
            .map_err(|_| "command link is down".to_string())?;
        rx.await.map_err(|_| "command link dropped request".to_string())?
    }

    /// Send a single command expecting one reply field.
    pub async fn one(&self, cmd: &str) -> Result<String, String> {
        let mut template = CommandTemplate::new();
        template.push(cmd);
        let mut fields = self.exchange(template).await?;
        fields
            .pop()
            .ok_or_else(|| "empty reply".to_string())
    }

    /// Send commands that produce no reply.
    pub async fn blind(&self, cmd: &str) -> Result<(), String> {
        let mut template = CommandTemplate::new();
        template.push_blind(cmd);
        self.exchange(template).await.map(|_| ())
    }
}

/// The command link worker: owns the socket, drains the queue.
pub struct CommandLink {
    link: MountLink,
    queue: mpsc::Receiver<CommandRequest>,
}

impl CommandLink {
    /// Create the worker plus its submission handle.
    pub fn new(link: MountLink, depth: usize) -> (Self, CommandSender) {
        let (tx, rx) = mpsc::channel(depth);
        (
            Self { link, queue: rx },
            CommandSender { queue: tx },
        )
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => break,
                request = self.queue.recv() => match request {
                    Some(r) => r,
                    None => break,
                },
            };

            if let Err(e) = self.link.ensure_connected().await {
                // Discard, don't buffer: the submitter decides whether to retry
                let _ = request.reply.send(Err(e.to_string()));
                continue;
            }

            let is_shutdown = request.template.text().contains(":shutdown#");
            let result = self
                .link
                .exchange(&request.template)
                .await
                .map_err(|e: LinkError| e.to_string());

            if is_shutdown {
                if let Ok(fields) = &result {
                    if fields.first().map(String::as_str) == Some("1") {
                        debug!("Mount acknowledged shutdown — dropping command link");
                        self.link.disconnect().await;
                    }
                }
            }

            let _ = request.reply.send(result);
        }
        self.link.disconnect().await;
    }
}
