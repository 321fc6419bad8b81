//! View binder.
//!
//! Mounting a [`ViewSpec`] spawns an actor that subscribes to the scope,
//! fetches it, reconciles feed events and runs optimistic writes. The
//! returned [`ViewHandle`] is how presentation code reads snapshots, issues
//! mutations and unmounts. Dropping the last handle unmounts the view.

mod actor;
mod command;

pub use command::{Planned, ViewNotice, ViewSnapshot, ViewStatus, Write};

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arthub_engine::{Entity, LiveView, NodeId, Scope, ToggleOutcome, UserId, ViewSpec};
use tokio::sync::{mpsc, oneshot, watch};

use crate::backend::{ChangeFeedService, DataStore, IdentityProvider};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::feed::FeedClient;
use actor::ViewActor;
use command::Command;

/// Mounts views against one data store and change feed.
#[derive(Clone)]
pub struct ViewBinder {
    store: Arc<dyn DataStore>,
    feed: FeedClient,
    identity: Arc<dyn IdentityProvider>,
    write_timeout: Duration,
    fetch_limit: usize,
}

impl ViewBinder {
    pub fn new(
        store: Arc<dyn DataStore>,
        feed_service: Arc<dyn ChangeFeedService>,
        identity: Arc<dyn IdentityProvider>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            store,
            feed: FeedClient::new(feed_service, config.resubscribe_backoff),
            identity,
            write_timeout: config.write_timeout,
            fetch_limit: config.fetch_limit,
        }
    }

    pub fn feed(&self) -> &FeedClient {
        &self.feed
    }

    /// The signed-in user, if any.
    pub fn current_user(&self) -> Option<UserId> {
        self.identity.current_user_id()
    }

    /// Mount a view. Must be called from within a Tokio runtime.
    ///
    /// Specs without a row limit get the configured fetch limit.
    pub fn mount(&self, spec: ViewSpec) -> ViewHandle {
        let spec = match spec.limit {
            Some(_) => spec,
            None => spec.with_limit(self.fetch_limit),
        };
        let node_id: NodeId = uuid::Uuid::new_v4().to_string();

        let (sender, commands) = mpsc::unbounded_channel();
        let (snapshots, snapshot_rx) = watch::channel(ViewSnapshot::loading(spec.scope.clone()));
        let (notices, notice_rx) = mpsc::unbounded_channel();

        let actor = ViewActor {
            spec: spec.clone(),
            view: LiveView::new(&spec, node_id.clone()),
            store: self.store.clone(),
            feed: self.feed.clone(),
            write_timeout: self.write_timeout,
            sender: sender.clone(),
            commands,
            snapshots,
            notices,
            subscription: None,
            status: ViewStatus::Loading,
            generation: 0,
            fetch: 0,
            backlog: None,
        };
        tokio::spawn(actor.run());

        ViewHandle {
            inner: Arc::new(HandleInner {
                spec,
                node_id,
                identity: self.identity.clone(),
                commands: sender,
                snapshots: snapshot_rx,
                notices: Mutex::new(Some(notice_rx)),
            }),
        }
    }
}

struct HandleInner {
    spec: ViewSpec,
    node_id: NodeId,
    identity: Arc<dyn IdentityProvider>,
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<ViewSnapshot>,
    notices: Mutex<Option<mpsc::UnboundedReceiver<ViewNotice>>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let (reply, _) = oneshot::channel();
        let _ = self.commands.send(Command::Unmount { reply });
    }
}

/// A mounted view. Cheap to clone.
#[derive(Clone)]
pub struct ViewHandle {
    inner: Arc<HandleInner>,
}

impl ViewHandle {
    pub fn spec(&self) -> &ViewSpec {
        &self.inner.spec
    }

    pub fn entity(&self) -> Entity {
        self.inner.spec.entity
    }

    /// Prefix of the local ids this view assigns.
    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.inner.identity.current_user_id()
    }

    /// The signed-in user, or an error for anonymous sessions.
    pub fn require_user(&self) -> Result<UserId> {
        self.current_user()
            .ok_or_else(|| SyncError::InvalidAction("sign in required".into()))
    }

    /// The latest published state.
    pub fn snapshot(&self) -> ViewSnapshot {
        self.inner.snapshots.borrow().clone()
    }

    /// A receiver notified whenever the published state changes.
    pub fn watch(&self) -> watch::Receiver<ViewSnapshot> {
        self.inner.snapshots.clone()
    }

    /// Wait until a snapshot satisfies `ready`.
    pub async fn wait_for(
        &self,
        mut ready: impl FnMut(&ViewSnapshot) -> bool,
    ) -> Result<ViewSnapshot> {
        let mut snapshots = self.inner.snapshots.clone();
        let snapshot = snapshots
            .wait_for(|s| ready(s))
            .await
            .map_err(|_| SyncError::Unmounted)?;
        Ok(snapshot.clone())
    }

    /// Take the notice receiver. Only the first caller gets it.
    pub fn take_notices(&self) -> Option<mpsc::UnboundedReceiver<ViewNotice>> {
        self.inner
            .notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Run `plan` against the current view state and apply what it returns.
    ///
    /// Each applied edit starts its write immediately; the outcomes say
    /// which edits were applied and which toggles were coalesced.
    pub async fn apply<F>(&self, plan: F) -> Result<Vec<ToggleOutcome>>
    where
        F: FnOnce(&LiveView) -> Result<Vec<Planned>> + Send + 'static,
    {
        let (reply, outcome) = oneshot::channel();
        self.send(Command::Apply {
            plan: Box::new(plan),
            reply,
        })?;
        outcome.await.map_err(|_| SyncError::Unmounted)?
    }

    /// Apply a single planned edit.
    pub async fn mutate(&self, planned: Planned) -> Result<ToggleOutcome> {
        self.apply_one(move |_| Ok(planned)).await
    }

    pub(crate) async fn apply_one<F>(&self, plan: F) -> Result<ToggleOutcome>
    where
        F: FnOnce(&LiveView) -> Result<Planned> + Send + 'static,
    {
        self.apply(move |view| Ok(vec![plan(view)?]))
            .await?
            .pop()
            .ok_or(SyncError::Unmounted)
    }

    /// Fetch the scope again and replace the collection.
    pub fn refetch(&self) -> Result<()> {
        self.send(Command::Refetch)
    }

    /// Move the view to another scope. Pending edits are abandoned.
    pub fn rescope(&self, scope: Scope) -> Result<()> {
        self.send(Command::Rescope { scope })
    }

    pub fn is_mounted(&self) -> bool {
        !self.inner.commands.is_closed()
    }

    /// Release the subscription and abandon pending edits. Later calls do
    /// nothing.
    pub async fn unmount(&self) {
        let (reply, done) = oneshot::channel();
        if self.send(Command::Unmount { reply }).is_ok() {
            let _ = done.await;
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| SyncError::Unmounted)
    }
}

impl std::fmt::Debug for ViewHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewHandle")
            .field("entity", &self.inner.spec.entity)
            .field("scope", &self.inner.spec.scope)
            .field("node_id", &self.inner.node_id)
            .finish()
    }
}
