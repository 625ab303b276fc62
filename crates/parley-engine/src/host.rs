//! Owner of the currently open conversation.

use crate::config::ClientConfig;
use crate::conversation::ConversationView;
use crate::message::{ConversationKey, SenderRole};
use crate::poller::{start_polling, PollEvent, PollHandle};
use crate::source::MessageSource;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Holds at most one open, polled conversation.
///
/// Switching to another key stops the previous view and its timer before
/// the new one starts, so refreshes never cross between threads.
pub struct ConversationHost<S: ?Sized> {
    source: Arc<S>,
    actor: SenderRole,
    config: ClientConfig,
    event_tx: mpsc::UnboundedSender<PollEvent>,
    active: Option<PollHandle<S>>,
}

impl<S> ConversationHost<S>
where
    S: MessageSource + ?Sized + 'static,
{
    pub fn new(
        source: Arc<S>,
        actor: SenderRole,
        config: ClientConfig,
        event_tx: mpsc::UnboundedSender<PollEvent>,
    ) -> Self {
        Self {
            source,
            actor,
            config,
            event_tx,
            active: None,
        }
    }

    /// Open `key`, polling it at the interval configured for its channel.
    ///
    /// Opening the key that is already open returns the existing view.
    pub fn open(&mut self, key: ConversationKey) -> Arc<ConversationView<S>> {
        if let Some(active) = &self.active {
            if active.view().key() == &key && !active.view().is_closed() {
                return Arc::clone(active.view());
            }
        }
        self.close();

        let interval = self.config.poll_interval(key.channel);
        debug!(%key, actor = %self.actor, "opening conversation");
        let view = Arc::new(ConversationView::new(
            Arc::clone(&self.source),
            key,
            self.actor,
        ));
        let handle = start_polling(Arc::clone(&view), interval, self.event_tx.clone());
        self.active = Some(handle);
        view
    }

    /// Stop the open conversation, if any. Its poll loop exits on its own
    /// and reports [`PollEvent::Stopped`].
    pub fn close(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.detach();
        }
    }

    /// The open conversation, if any.
    pub fn active(&self) -> Option<&Arc<ConversationView<S>>> {
        self.active.as_ref().map(PollHandle::view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageRecord;
    use crate::testing::{at, ScriptedSource};
    use std::time::Duration;

    fn agent(id: &str) -> ConversationKey {
        ConversationKey::direct("u1", "v1", Some(id.into()))
    }

    fn host(source: &Arc<ScriptedSource>) -> ConversationHost<ScriptedSource> {
        host_with_events(source).0
    }

    fn host_with_events(
        source: &Arc<ScriptedSource>,
    ) -> (ConversationHost<ScriptedSource>, mpsc::UnboundedReceiver<PollEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let host = ConversationHost::new(
            Arc::clone(source),
            SenderRole::User,
            ClientConfig::default(),
            tx,
        );
        (host, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_keys_stops_previous_timer() {
        let source = Arc::new(
            ScriptedSource::new()
                .with_thread(&agent("a1"), vec![MessageRecord::new("1", "one", SenderRole::User, at(0))])
                .with_thread(&agent("a2"), vec![MessageRecord::new("2", "two", SenderRole::User, at(1))]),
        );
        let mut host = host(&source);

        let first = host.open(agent("a1"));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(source.fetch_count(&agent("a1")), 2);

        let second = host.open(agent("a2"));
        assert!(first.is_closed());
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(source.fetch_count(&agent("a1")), 2);
        assert!(source.fetch_count(&agent("a2")) >= 6);
        assert_eq!(second.entries()[0].body, "two");
        assert_eq!(first.entries()[0].body, "one");
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_for_previous_key_is_dropped() {
        let source = Arc::new(
            ScriptedSource::new()
                .with_thread(&agent("a1"), vec![MessageRecord::new("1", "one", SenderRole::User, at(0))]),
        );
        source.queue_fetch_delays([Duration::from_secs(10)]);
        let mut host = host(&source);

        let first = host.open(agent("a1"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        host.open(agent("a2"));
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert!(first.entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopening_same_key_keeps_view() {
        let source = Arc::new(ScriptedSource::new());
        let mut host = host(&source);

        let first = host.open(agent("a1"));
        let again = host.open(agent("a1"));

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!first.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_active_view() {
        let source = Arc::new(ScriptedSource::new());
        let mut host = host(&source);

        let view = host.open(ConversationKey::ticket("v1", "t1"));
        host.close();

        assert!(view.is_closed());
        assert!(host.active().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_and_switch_report_stopped() {
        let source = Arc::new(ScriptedSource::new());
        let (mut host, mut rx) = host_with_events(&source);

        host.open(agent("a1"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        host.open(agent("a2"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        host.close();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut stopped = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PollEvent::Stopped { key } = event {
                stopped.push(key);
            }
        }
        assert_eq!(stopped, vec![agent("a1"), agent("a2")]);
    }
}
