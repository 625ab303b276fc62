//! Periodic refresh of an open conversation.
//!
//! [`start_polling`] spawns a loop that refreshes a view immediately and then
//! once per interval until its [`PollHandle`] is stopped or dropped. Each
//! refresh runs as its own task, so a request that never returns does not
//! hold back the next tick.

use crate::conversation::{ConversationView, FetchOutcome};
use crate::message::ConversationKey;
use crate::source::MessageSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Events emitted by a poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// Loop started.
    Started {
        key: ConversationKey,
        interval: Duration,
    },
    /// A refresh replaced the display list.
    Refreshed { key: ConversationKey, entries: usize },
    /// A refresh completed after a newer one and was dropped.
    Discarded { key: ConversationKey },
    /// A refresh failed; the previous list is kept.
    FetchFailed { key: ConversationKey, error: String },
    /// Loop exited.
    Stopped { key: ConversationKey },
}

/// Handle for a running poll loop.
///
/// Dropping the handle stops the loop.
pub struct PollHandle<S: ?Sized> {
    view: Arc<ConversationView<S>>,
    cancel_tx: mpsc::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl<S: ?Sized> PollHandle<S> {
    /// The view being refreshed.
    pub fn view(&self) -> &Arc<ConversationView<S>> {
        &self.view
    }

    /// Stop polling without waiting for the loop to exit.
    ///
    /// The view is closed before this returns, so no refresh can apply
    /// afterwards even if one is still in flight.
    pub fn stop(&self) {
        self.view.close();
        let _ = self.cancel_tx.try_send(());
    }

    /// Stop polling and let the loop wind down on its own, emitting
    /// [`PollEvent::Stopped`] when it exits. Unlike dropping the handle, the
    /// loop task is not aborted.
    pub fn detach(mut self) {
        self.stop();
        drop(self.task.take());
    }

    /// Stop polling and wait for the loop to exit.
    pub async fn cancel(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.task {
            Some(task) => task.is_finished(),
            None => true,
        }
    }
}

impl<S: ?Sized> Drop for PollHandle<S> {
    fn drop(&mut self) {
        self.view.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Start refreshing `view` every `interval`.
///
/// The first refresh is issued at once and shows the loading state; later
/// ones are silent. Must be called from within a Tokio runtime.
pub fn start_polling<S>(
    view: Arc<ConversationView<S>>,
    interval: Duration,
    event_tx: mpsc::UnboundedSender<PollEvent>,
) -> PollHandle<S>
where
    S: MessageSource + ?Sized + 'static,
{
    let (cancel_tx, cancel_rx) = mpsc::channel(1);
    let task = tokio::spawn(poll_loop(Arc::clone(&view), interval, event_tx, cancel_rx));

    PollHandle {
        view,
        cancel_tx,
        task: Some(task),
    }
}

async fn poll_loop<S>(
    view: Arc<ConversationView<S>>,
    interval: Duration,
    event_tx: mpsc::UnboundedSender<PollEvent>,
    mut cancel_rx: mpsc::Receiver<()>,
) where
    S: MessageSource + ?Sized + 'static,
{
    let key = view.key().clone();
    let _ = event_tx.send(PollEvent::Started {
        key: key.clone(),
        interval,
    });
    debug!(%key, ?interval, "polling started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut fetches = JoinSet::new();
    let mut silent = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel_rx.recv() => break,
            _ = ticker.tick() => {
                if view.is_closed() {
                    break;
                }
                let view = Arc::clone(&view);
                fetches.spawn(async move { view.fetch_and_merge(silent).await });
                silent = true;
            }
            Some(joined) = fetches.join_next() => {
                let event = match joined {
                    Ok(Ok(FetchOutcome::Applied { entries })) => PollEvent::Refreshed {
                        key: key.clone(),
                        entries,
                    },
                    Ok(Ok(FetchOutcome::Unresolved)) => PollEvent::Refreshed {
                        key: key.clone(),
                        entries: 0,
                    },
                    Ok(Ok(FetchOutcome::Stale)) => PollEvent::Discarded { key: key.clone() },
                    Ok(Ok(FetchOutcome::Closed)) => continue,
                    Ok(Err(e)) => PollEvent::FetchFailed {
                        key: key.clone(),
                        error: e.to_string(),
                    },
                    Err(e) => {
                        warn!(%key, error = %e, "refresh task ended abnormally");
                        continue;
                    }
                };
                let _ = event_tx.send(event);
            }
        }
    }

    view.close();
    fetches.abort_all();
    debug!(%key, "polling stopped");
    let _ = event_tx.send(PollEvent::Stopped { key });
}
