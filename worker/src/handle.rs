use comms::{msg::Command, specs::Event};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{Result, WorkerErr};

/// The caller's end of a spawned worker.
///
/// Commands go in and events come out, nothing else is shared with the worker.
pub struct WorkerHandle {
    commands: mpsc::Sender<Command>,
    events: mpsc::Receiver<Event>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        events: mpsc::Receiver<Event>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            commands,
            events,
            task,
        }
    }

    /// Sends `cmd` to the worker.
    ///
    /// # Returns
    /// `ChannelClosed` if the worker already exited.
    pub async fn send(&self, cmd: Command) -> Result<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| WorkerErr::ChannelClosed)
    }

    /// Waits for the next event of the worker.
    ///
    /// # Returns
    /// `None` once the worker exited and every pending event was consumed.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Disconnects the worker and waits for it to exit.
    ///
    /// A running session is stopped first, events published on the way out are dropped.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            commands,
            events,
            task,
        } = self;

        // The worker may be blocked publishing, it must not wait on a reader that's gone.
        drop(events);
        let _ = commands.send(Command::Disconnect).await;
        drop(commands);

        task.await?;
        Ok(())
    }
}
