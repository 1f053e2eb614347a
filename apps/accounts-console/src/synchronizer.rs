//! Account list synchronization.
//!
//! A refresh cycle has two phases. The bulk list replaces the published rows wholesale with every
//! plan set to `loading`, then one plan lookup per account runs concurrently and merges its
//! answer into the matching row. Each refresh takes a new generation number; the published
//! snapshot remembers the generation of the list it shows, and a plan answer tagged with any
//! other generation is dropped. Superseded lookups are also aborted outright.
//!
//! List responses are not ordered against each other: whichever completes last is what the
//! snapshot shows.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use accounts_api_client::{AccountRecord, AccountsApi, PlanLookup};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::model::{AccountPlan, AccountRow};
use crate::notification::{ConsoleEvent, NotificationChannel, Subscription};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ListLoadState {
    Loading,
    Ready,
    Error,
}

impl ListLoadState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

/// Either the account rows or the list-load error; never both.
#[derive(Clone, Debug, PartialEq)]
pub enum AccountListView {
    Accounts(Vec<AccountRow>),
    LoadFailed { message: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct AccountListSnapshot {
    /// Bumped on every published change.
    pub revision: u64,
    /// Generation of the refresh whose list is shown. Zero before the first list lands.
    pub generation: u64,
    pub load_state: ListLoadState,
    pub view: AccountListView,
}

impl Default for AccountListSnapshot {
    fn default() -> Self {
        Self {
            revision: 0,
            generation: 0,
            load_state: ListLoadState::Loading,
            view: AccountListView::Accounts(Vec::new()),
        }
    }
}

impl AccountListSnapshot {
    pub fn accounts(&self) -> &[AccountRow] {
        match &self.view {
            AccountListView::Accounts(rows) => rows.as_slice(),
            AccountListView::LoadFailed { .. } => &[],
        }
    }

    pub fn load_error(&self) -> Option<&str> {
        match &self.view {
            AccountListView::Accounts(_) => None,
            AccountListView::LoadFailed { message } => Some(message.as_str()),
        }
    }

    pub fn find(&self, workflow_id: &str) -> Option<&AccountRow> {
        self.accounts()
            .iter()
            .find(|row| row.workflow_id() == workflow_id)
    }

    /// True once a list (or an error) is shown and no row is still waiting on its plan.
    pub fn plans_settled(&self) -> bool {
        match self.load_state {
            ListLoadState::Loading => false,
            ListLoadState::Error => true,
            ListLoadState::Ready => self.accounts().iter().all(|row| !row.plan.is_loading()),
        }
    }
}

struct PlanLookupTask {
    generation: u64,
    handle: AbortHandle,
}

#[derive(Default)]
struct InFlight {
    closed: bool,
    list_fetches: Vec<AbortHandle>,
    plan_lookups: Vec<PlanLookupTask>,
}

impl InFlight {
    fn abort_plan_lookups_except(&mut self, generation: u64) {
        self.plan_lookups.retain(|task| {
            if task.generation == generation {
                return !task.handle.is_finished();
            }
            task.handle.abort();
            false
        });
    }

    fn abort_all(&mut self) {
        for handle in self.list_fetches.drain(..) {
            handle.abort();
        }
        for task in self.plan_lookups.drain(..) {
            task.handle.abort();
        }
    }
}

struct SyncInner {
    api: Arc<dyn AccountsApi>,
    runtime: Handle,
    issued_generation: AtomicU64,
    snapshot_tx: watch::Sender<AccountListSnapshot>,
    in_flight: Mutex<InFlight>,
}

impl SyncInner {
    fn in_flight(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(self: &Arc<Self>) -> Option<u64> {
        let mut in_flight = self.in_flight();
        if in_flight.closed {
            tracing::debug!("refresh ignored after unmount");
            return None;
        }
        let generation = self.issued_generation.fetch_add(1, Ordering::SeqCst) + 1;
        in_flight.list_fetches.retain(|handle| !handle.is_finished());

        let inner = Arc::clone(self);
        let task = self
            .runtime
            .spawn(async move { inner.fetch_accounts(generation).await });
        in_flight.list_fetches.push(task.abort_handle());
        tracing::debug!(generation, "account list refresh started");
        Some(generation)
    }

    async fn fetch_accounts(self: Arc<Self>, generation: u64) {
        match self.api.list_accounts().await {
            Ok(response) => self.apply_account_list(generation, response.into_accounts()),
            Err(error) => self.apply_list_failure(generation, error.to_string()),
        }
    }

    fn apply_account_list(self: &Arc<Self>, generation: u64, records: Vec<AccountRecord>) {
        let mut in_flight = self.in_flight();
        if in_flight.closed {
            return;
        }

        let rows: Vec<AccountRow> = records.into_iter().map(AccountRow::loading).collect();
        let pending: Vec<String> = rows
            .iter()
            .map(|row| row.workflow_id().to_string())
            .collect();
        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.revision += 1;
            snapshot.generation = generation;
            snapshot.load_state = ListLoadState::Ready;
            snapshot.view = AccountListView::Accounts(rows);
        });
        in_flight.abort_plan_lookups_except(generation);

        for workflow_id in pending.iter().cloned() {
            let inner = Arc::clone(self);
            let task = self
                .runtime
                .spawn(async move { inner.lookup_plan(generation, workflow_id).await });
            in_flight.plan_lookups.push(PlanLookupTask {
                generation,
                handle: task.abort_handle(),
            });
        }
        tracing::info!(
            generation,
            accounts = pending.len(),
            "account list replaced"
        );
    }

    fn apply_list_failure(&self, generation: u64, message: String) {
        let mut in_flight = self.in_flight();
        if in_flight.closed {
            return;
        }
        tracing::warn!(generation, error = %message, "account list load failed");
        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.revision += 1;
            snapshot.generation = generation;
            snapshot.load_state = ListLoadState::Error;
            snapshot.view = AccountListView::LoadFailed { message };
        });
        in_flight.abort_plan_lookups_except(generation);
    }

    async fn lookup_plan(self: Arc<Self>, generation: u64, workflow_id: String) {
        match self.api.account_plan(&workflow_id).await {
            Ok(PlanLookup::Plan(plan)) => {
                self.apply_plan_lookup(generation, &workflow_id, &plan);
            }
            Ok(PlanLookup::Rejected { message }) => {
                tracing::warn!(
                    generation,
                    workflow_id = %workflow_id,
                    error = %message,
                    "plan lookup rejected; plan stays loading"
                );
            }
            Err(error) => {
                tracing::warn!(
                    generation,
                    workflow_id = %workflow_id,
                    error = %error,
                    "plan lookup failed; plan stays loading"
                );
            }
        }
    }

    fn apply_plan_lookup(&self, generation: u64, workflow_id: &str, plan: &str) -> bool {
        let mut stale = false;
        let applied = self.snapshot_tx.send_if_modified(|snapshot| {
            if snapshot.generation != generation {
                stale = true;
                return false;
            }
            merge_plan(snapshot, workflow_id, plan)
        });
        if stale {
            tracing::debug!(
                generation,
                workflow_id,
                "dropped plan lookup from superseded list"
            );
        } else if applied {
            tracing::debug!(generation, workflow_id, plan, "plan merged");
        }
        applied
    }

    fn shutdown(&self) {
        let mut in_flight = self.in_flight();
        if in_flight.closed {
            return;
        }
        in_flight.closed = true;
        in_flight.abort_all();
        tracing::debug!("account list synchronizer unmounted");
    }
}

/// Replaces the plan of the first row for `workflow_id` whose plan differs from `plan`.
fn merge_plan(snapshot: &mut AccountListSnapshot, workflow_id: &str, plan: &str) -> bool {
    let AccountListView::Accounts(rows) = &mut snapshot.view else {
        return false;
    };
    let Some(row) = rows
        .iter_mut()
        .find(|row| row.workflow_id() == workflow_id && row.plan.as_str() != plan)
    else {
        return false;
    };
    row.plan = AccountPlan::from_lookup(plan);
    snapshot.revision += 1;
    true
}

/// Owner of the account list. Readers get snapshots; only this type mutates the list.
pub struct AccountListSynchronizer {
    inner: Arc<SyncInner>,
}

impl AccountListSynchronizer {
    pub fn new(api: Arc<dyn AccountsApi>, runtime: Handle) -> Self {
        let (snapshot_tx, _) = watch::channel(AccountListSnapshot::default());
        Self {
            inner: Arc::new(SyncInner {
                api,
                runtime,
                issued_generation: AtomicU64::new(0),
                snapshot_tx,
                in_flight: Mutex::new(InFlight::default()),
            }),
        }
    }

    /// Subscribes `refresh` to [`ConsoleEvent::AccountsChanged`] and runs the first refresh.
    pub fn mount(self, channel: &NotificationChannel) -> MountedSynchronizer {
        let inner = Arc::downgrade(&self.inner);
        let subscription = channel.subscribe(ConsoleEvent::AccountsChanged, move || {
            if let Some(inner) = inner.upgrade() {
                inner.refresh();
            }
        });
        self.inner.refresh();
        MountedSynchronizer {
            synchronizer: self,
            subscription: Some(subscription),
        }
    }

    /// Starts a new two-phase fetch and returns its generation, or `None` once unmounted.
    pub fn refresh(&self) -> Option<u64> {
        self.inner.refresh()
    }

    /// Merges `plan` into the current row for `workflow_id`. Returns whether a new revision was
    /// published; unknown identifiers and unchanged plans are no-ops.
    pub fn apply_plan_update(&self, workflow_id: &str, plan: &str) -> bool {
        self.inner
            .snapshot_tx
            .send_if_modified(|snapshot| merge_plan(snapshot, workflow_id, plan))
    }

    pub fn snapshot(&self) -> AccountListSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AccountListSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Generation of the most recently started refresh.
    pub fn latest_generation(&self) -> u64 {
        self.inner.issued_generation.load(Ordering::SeqCst)
    }

    /// Waits up to `timeout` for a snapshot matching `predicate`.
    pub async fn wait_for<F>(&self, timeout: Duration, mut predicate: F) -> Option<AccountListSnapshot>
    where
        F: FnMut(&AccountListSnapshot) -> bool,
    {
        let mut receiver = self.subscribe();
        match tokio::time::timeout(timeout, receiver.wait_for(|snapshot| predicate(snapshot))).await
        {
            Ok(Ok(snapshot)) => Some(snapshot.clone()),
            Ok(Err(_)) | Err(_) => None,
        }
    }
}

impl Drop for AccountListSynchronizer {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

/// A synchronizer bound to a notification channel. Dropping it unsubscribes and aborts every
/// request the synchronizer still has in flight.
pub struct MountedSynchronizer {
    synchronizer: AccountListSynchronizer,
    subscription: Option<Subscription>,
}

impl MountedSynchronizer {
    pub fn unmount(self) {}
}

impl Deref for MountedSynchronizer {
    type Target = AccountListSynchronizer;

    fn deref(&self) -> &Self::Target {
        &self.synchronizer
    }
}

impl Drop for MountedSynchronizer {
    fn drop(&mut self) {
        self.subscription.take();
        self.synchronizer.inner.shutdown();
    }
}
