//! Scripted accounts API for ordering and staleness tests.
//!
//! Reads park until the test answers them through the [`ApiCall`] stream, so a test decides the
//! completion order of every list and plan lookup. Mutations answer immediately from a queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use accounts_api_client::{
    AccountRecord, AccountsApi, AccountsApiError, CreateAccountRequest, DeleteAccountRequest,
    ListAccountsResponse, MutationOutcome, PlanLookup, PlanTier, UpgradeAccountRequest,
    WorkflowExecution, WorkflowType,
};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

pub(crate) type ListReply = oneshot::Sender<Result<ListAccountsResponse, AccountsApiError>>;
pub(crate) type PlanReply = oneshot::Sender<Result<PlanLookup, AccountsApiError>>;

pub(crate) enum ApiCall {
    List(ListReply),
    Plan {
        workflow_id: String,
        reply: PlanReply,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RecordedMutation {
    Create {
        name: String,
    },
    Upgrade {
        account: String,
        actor: String,
        to: PlanTier,
    },
    Delete {
        account: String,
        actor: String,
    },
}

pub(crate) struct ScriptedApi {
    calls: mpsc::UnboundedSender<ApiCall>,
    mutation_replies: Mutex<VecDeque<Result<MutationOutcome, AccountsApiError>>>,
    mutations: Mutex<Vec<RecordedMutation>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedApi {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ApiCall>) {
        let (calls, receiver) = mpsc::unbounded_channel();
        let api = Arc::new(Self {
            calls,
            mutation_replies: Mutex::new(VecDeque::new()),
            mutations: Mutex::new(Vec::new()),
        });
        (api, receiver)
    }

    pub(crate) fn push_mutation_reply(&self, reply: Result<MutationOutcome, AccountsApiError>) {
        lock(&self.mutation_replies).push_back(reply);
    }

    pub(crate) fn mutations(&self) -> Vec<RecordedMutation> {
        lock(&self.mutations).clone()
    }

    fn record_mutation(
        &self,
        mutation: RecordedMutation,
    ) -> Result<MutationOutcome, AccountsApiError> {
        lock(&self.mutations).push(mutation);
        lock(&self.mutation_replies)
            .pop_front()
            .unwrap_or(Ok(MutationOutcome::Applied { valid_from: None }))
    }

    fn closed() -> AccountsApiError {
        AccountsApiError::Request {
            message: "scripted api closed".to_string(),
        }
    }
}

#[async_trait]
impl AccountsApi for ScriptedApi {
    async fn list_accounts(&self) -> Result<ListAccountsResponse, AccountsApiError> {
        let (reply, response) = oneshot::channel();
        self.calls
            .send(ApiCall::List(reply))
            .map_err(|_| Self::closed())?;
        response.await.unwrap_or_else(|_| Err(Self::closed()))
    }

    async fn account_plan(&self, workflow_id: &str) -> Result<PlanLookup, AccountsApiError> {
        let (reply, response) = oneshot::channel();
        self.calls
            .send(ApiCall::Plan {
                workflow_id: workflow_id.to_string(),
                reply,
            })
            .map_err(|_| Self::closed())?;
        response.await.unwrap_or_else(|_| Err(Self::closed()))
    }

    async fn create_account(
        &self,
        request: &CreateAccountRequest,
    ) -> Result<MutationOutcome, AccountsApiError> {
        self.record_mutation(RecordedMutation::Create {
            name: request.name.clone(),
        })
    }

    async fn upgrade_account(
        &self,
        request: &UpgradeAccountRequest,
    ) -> Result<MutationOutcome, AccountsApiError> {
        self.record_mutation(RecordedMutation::Upgrade {
            account: request.account.clone(),
            actor: request.actor.clone(),
            to: request.to,
        })
    }

    async fn delete_account(
        &self,
        request: &DeleteAccountRequest,
    ) -> Result<MutationOutcome, AccountsApiError> {
        self.record_mutation(RecordedMutation::Delete {
            account: request.account.clone(),
            actor: request.actor.clone(),
        })
    }
}

pub(crate) fn record(workflow_id: &str, run_id: &str) -> AccountRecord {
    AccountRecord {
        execution: WorkflowExecution {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.to_string(),
        },
        workflow_type: WorkflowType {
            name: "AccountWorkflow".to_string(),
        },
        execution_time: None,
        start_time: None,
        status: Some(1),
        memo: serde_json::Value::Null,
    }
}

pub(crate) fn listing(accounts: &[(&str, &str)]) -> ListAccountsResponse {
    ListAccountsResponse::new(
        accounts
            .iter()
            .map(|(workflow_id, run_id)| record(workflow_id, run_id))
            .collect(),
    )
}

pub(crate) async fn next_call(calls: &mut mpsc::UnboundedReceiver<ApiCall>) -> ApiCall {
    match tokio::time::timeout(Duration::from_secs(5), calls.recv()).await {
        Ok(Some(call)) => call,
        Ok(None) => panic!("scripted api dropped"),
        Err(_) => panic!("timed out waiting for an api call"),
    }
}

pub(crate) async fn next_list_call(calls: &mut mpsc::UnboundedReceiver<ApiCall>) -> ListReply {
    match next_call(calls).await {
        ApiCall::List(reply) => reply,
        ApiCall::Plan { workflow_id, .. } => {
            panic!("expected list call, got plan lookup for {workflow_id}")
        }
    }
}

pub(crate) async fn next_plan_call(
    calls: &mut mpsc::UnboundedReceiver<ApiCall>,
) -> (String, PlanReply) {
    match next_call(calls).await {
        ApiCall::Plan { workflow_id, reply } => (workflow_id, reply),
        ApiCall::List(_) => panic!("expected plan lookup, got list call"),
    }
}

/// Lets spawned tasks on the current-thread test runtime run to their next suspension point.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
