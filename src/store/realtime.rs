//! Change-feed subscription and polling.
//!
//! One subscription, scoped to the active workspace, turns every change event on a
//! board table into a silent reload. When the feed fails, times out or closes, a
//! fallback poll takes over until the channel reports `Subscribed` again. A slower
//! backstop poll runs regardless.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::remote::{collections, ChannelMessage, ChannelStatus, SubscriptionHandle};

use super::Store;

/// Background tasks owned by the store while realtime is on.
#[derive(Debug, Default)]
pub(super) struct RealtimeTasks {
    active: bool,
    scope: Option<String>,
    handle: Option<SubscriptionHandle>,
    listener: Option<JoinHandle<()>>,
    backstop: Option<JoinHandle<()>>,
    fallback: Option<JoinHandle<()>>,
}

impl Store {
    /// Subscribe to changes in the active workspace and start the backstop poll.
    ///
    /// Replaces any existing subscription. Failures never surface to the caller; they
    /// switch the store to fallback polling instead.
    pub async fn subscribe_to_realtime(&self) {
        self.unsubscribe_from_realtime().await;

        let Some(scope) = self.state.read().await.active_workspace_id.clone() else {
            tracing::debug!("No active workspace; realtime not started");
            return;
        };

        let backstop = self.spawn_poll("backstop", self.settings.backstop_poll_interval);
        {
            let mut tasks = self.realtime.lock().await;
            tasks.active = true;
            tasks.scope = Some(scope.clone());
            tasks.backstop = Some(backstop);
        }

        let opened = tokio::time::timeout(
            self.settings.subscribe_timeout,
            self.remote
                .subscribe_changes(&scope, &collections::REALTIME_TABLES),
        )
        .await;

        match opened {
            Ok(Ok(subscription)) => {
                let listener = tokio::spawn(listen(
                    self.this.clone(),
                    subscription.messages,
                    self.settings.subscribe_timeout,
                ));
                let mut tasks = self.realtime.lock().await;
                tasks.handle = Some(subscription.handle);
                tasks.listener = Some(listener);
                tracing::info!("Realtime subscription opened for workspace {}", scope);
            }
            Ok(Err(e)) => {
                tracing::warn!("Realtime subscription failed: {}", e);
                self.start_fallback_polling().await;
            }
            Err(_) => {
                tracing::warn!(
                    "Realtime subscription timed out after {:?}",
                    self.settings.subscribe_timeout
                );
                self.start_fallback_polling().await;
            }
        }
    }

    /// Stop the feed and all polling. Safe to call repeatedly.
    pub async fn unsubscribe_from_realtime(&self) {
        let (handle, tasks) = {
            let mut tasks = self.realtime.lock().await;
            tasks.active = false;
            tasks.scope = None;
            (
                tasks.handle.take(),
                [
                    tasks.listener.take(),
                    tasks.backstop.take(),
                    tasks.fallback.take(),
                ],
            )
        };
        for task in tasks.into_iter().flatten() {
            task.abort();
        }
        if let Some(handle) = handle {
            match self.remote.unsubscribe(handle).await {
                Ok(()) => tracing::info!("Realtime subscription closed"),
                Err(e) => tracing::warn!("Failed to close realtime subscription: {}", e),
            }
        }
    }

    pub async fn is_subscribed(&self) -> bool {
        self.realtime.lock().await.handle.is_some()
    }

    pub async fn is_fallback_polling(&self) -> bool {
        self.realtime.lock().await.fallback.is_some()
    }

    /// Resubscribe when the active workspace no longer matches the subscription scope.
    pub(super) async fn follow_realtime_scope(&self) {
        let (active, scope) = {
            let tasks = self.realtime.lock().await;
            (tasks.active, tasks.scope.clone())
        };
        if !active {
            return;
        }
        let current = self.state.read().await.active_workspace_id.clone();
        if current != scope {
            tracing::info!("Active workspace changed; moving realtime subscription");
            self.subscribe_to_realtime().await;
        }
    }

    async fn start_fallback_polling(&self) {
        let mut tasks = self.realtime.lock().await;
        if !tasks.active || tasks.fallback.is_some() {
            return;
        }
        tracing::warn!(
            "Realtime unavailable; polling every {:?}",
            self.settings.fallback_poll_interval
        );
        tasks.fallback = Some(self.spawn_poll("fallback", self.settings.fallback_poll_interval));
    }

    async fn stop_fallback_polling(&self) {
        if let Some(task) = self.realtime.lock().await.fallback.take() {
            task.abort();
            tracing::info!("Realtime restored; fallback polling stopped");
        }
    }

    /// Silent reload every `period`, first tick after one full period.
    fn spawn_poll(&self, label: &'static str, period: Duration) -> JoinHandle<()> {
        let store = self.this.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                tracing::debug!("{} poll", label);
                if let Err(e) = store.load_user_data(true).await {
                    tracing::warn!("{} poll failed: {}", label, e);
                }
            }
        })
    }
}

async fn listen(
    store: Weak<Store>,
    mut messages: UnboundedReceiver<ChannelMessage>,
    subscribe_timeout: Duration,
) {
    let mut awaiting_ack = true;
    loop {
        let next = if awaiting_ack {
            match tokio::time::timeout(subscribe_timeout, messages.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!("Realtime channel not confirmed within {:?}", subscribe_timeout);
                    awaiting_ack = false;
                    let Some(store) = store.upgrade() else {
                        return;
                    };
                    store.start_fallback_polling().await;
                    continue;
                }
            }
        } else {
            messages.recv().await
        };

        let Some(store) = store.upgrade() else {
            return;
        };
        let Some(message) = next else {
            tracing::warn!("Realtime channel dropped");
            store.start_fallback_polling().await;
            return;
        };

        match message {
            ChannelMessage::Status(ChannelStatus::Subscribed) => {
                awaiting_ack = false;
                store.stop_fallback_polling().await;
            }
            ChannelMessage::Status(status) => {
                tracing::warn!("Realtime channel status: {:?}", status);
                awaiting_ack = false;
                store.start_fallback_polling().await;
            }
            ChannelMessage::Change(event) => {
                if !collections::REALTIME_TABLES.contains(&event.table.as_str()) {
                    continue;
                }
                tracing::debug!("{:?} on {}; refreshing", event.kind, event.table);
                if let Err(e) = store.load_user_data(true).await {
                    tracing::warn!("Realtime refresh failed: {}", e);
                }
            }
        }
    }
}
