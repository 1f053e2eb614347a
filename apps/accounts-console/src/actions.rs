//! Mutation initiators.
//!
//! Each action sends one mutation, interprets the tagged outcome, and on success schedules an
//! [`ConsoleEvent::AccountsChanged`] publish after a fixed delay. The backend applies mutations
//! through workflows, so an immediate re-list would usually still show the old state.

use std::sync::Arc;
use std::time::Duration;

use accounts_api_client::{
    AccountsApi, CreateAccountRequest, DeleteAccountRequest, MutationOutcome, PlanTier,
    UpgradeAccountRequest,
};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::notification::{ConsoleEvent, NotificationChannel};

pub const DEFAULT_CREATE_REFRESH_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MUTATION_REFRESH_DELAY: Duration = Duration::from_millis(1000);

const SUCCESS_ACK_DURATION: Duration = Duration::from_secs(3);
const FAILURE_ACK_DURATION: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RefreshDelays {
    pub after_create: Duration,
    pub after_mutation: Duration,
}

impl Default for RefreshDelays {
    fn default() -> Self {
        Self {
            after_create: DEFAULT_CREATE_REFRESH_DELAY,
            after_mutation: DEFAULT_MUTATION_REFRESH_DELAY,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AckLevel {
    Success,
    Error,
}

impl AckLevel {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Transient, dismissible feedback for one upgrade or delete.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Acknowledgment {
    pub level: AckLevel,
    pub title: String,
    pub description: String,
    pub duration: Duration,
    pub closable: bool,
}

impl Acknowledgment {
    fn success(title: &str, description: String) -> Self {
        Self {
            level: AckLevel::Success,
            title: title.to_string(),
            description,
            duration: SUCCESS_ACK_DURATION,
            closable: true,
        }
    }

    fn failure(title: &str, description: String) -> Self {
        Self {
            level: AckLevel::Error,
            title: title.to_string(),
            description,
            duration: FAILURE_ACK_DURATION,
            closable: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.level == AckLevel::Success
    }
}

/// A pending delayed publish. Awaiting it is optional; the publish happens either way.
#[derive(Debug)]
pub struct ScheduledRefresh {
    delay: Duration,
    handle: JoinHandle<usize>,
}

impl ScheduledRefresh {
    fn spawn(runtime: &Handle, channel: &NotificationChannel, delay: Duration) -> Self {
        let channel = channel.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let delivered = channel.publish(ConsoleEvent::AccountsChanged);
            tracing::debug!(
                delay_ms = delay.as_millis(),
                delivered,
                "delayed account refresh published"
            );
            delivered
        });
        Self { delay, handle }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits for the publish and returns how many listeners received it.
    pub async fn published(self) -> Option<usize> {
        self.handle.await.ok()
    }
}

#[derive(Debug)]
pub struct ActionOutcome {
    pub acknowledgment: Acknowledgment,
    pub scheduled_refresh: Option<ScheduledRefresh>,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum CreateAccountError {
    #[error("Account is required")]
    NameRequired,
    #[error("{message}")]
    Rejected { message: String },
    #[error("{message}")]
    Transport { message: String },
}

#[derive(Clone)]
pub struct AccountActions {
    api: Arc<dyn AccountsApi>,
    channel: NotificationChannel,
    runtime: Handle,
    delays: RefreshDelays,
}

impl AccountActions {
    pub fn new(
        api: Arc<dyn AccountsApi>,
        channel: NotificationChannel,
        runtime: Handle,
        delays: RefreshDelays,
    ) -> Self {
        Self {
            api,
            channel,
            runtime,
            delays,
        }
    }

    pub fn delays(&self) -> RefreshDelays {
        self.delays
    }

    /// Creates an account. A blank name fails before any request is made. On error the caller
    /// keeps its input open and shows the message in place.
    pub async fn create_account(&self, name: &str) -> Result<ScheduledRefresh, CreateAccountError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CreateAccountError::NameRequired);
        }
        let request = CreateAccountRequest {
            name: name.to_string(),
        };
        match self.api.create_account(&request).await {
            Ok(MutationOutcome::Applied { .. }) => {
                tracing::info!(name, "account created");
                Ok(self.schedule_refresh(self.delays.after_create))
            }
            Ok(MutationOutcome::Rejected { message }) => {
                tracing::warn!(name, error = %message, "account create rejected");
                Err(CreateAccountError::Rejected { message })
            }
            Err(error) => {
                tracing::warn!(name, error = %error, "account create failed");
                Err(CreateAccountError::Transport {
                    message: error.to_string(),
                })
            }
        }
    }

    /// Moves `workflow_id` to the other tier. The account acts on itself.
    pub async fn toggle_plan(&self, workflow_id: &str, current_plan: &str) -> ActionOutcome {
        let target = PlanTier::toggle_target(current_plan);
        let request = UpgradeAccountRequest {
            account: workflow_id.to_string(),
            actor: workflow_id.to_string(),
            to: target,
        };
        match self.api.upgrade_account(&request).await {
            Ok(MutationOutcome::Applied { valid_from }) => {
                tracing::info!(
                    workflow_id,
                    target_plan = target.as_str(),
                    valid_from = ?valid_from,
                    "account plan changed"
                );
                self.succeeded(
                    Acknowledgment::success(
                        "Account changed.",
                        format!("Account successfully moved to {target}."),
                    ),
                    self.delays.after_mutation,
                )
            }
            Ok(MutationOutcome::Rejected { message }) => {
                tracing::warn!(
                    workflow_id,
                    target_plan = target.as_str(),
                    error = %message,
                    "account plan change rejected"
                );
                Self::failed(Acknowledgment::failure("Account upgrade failed.", message))
            }
            Err(error) => {
                tracing::warn!(
                    workflow_id,
                    target_plan = target.as_str(),
                    error = %error,
                    "account plan change failed"
                );
                Self::failed(Acknowledgment::failure(
                    "Account upgrade failed.",
                    error.to_string(),
                ))
            }
        }
    }

    pub async fn delete_account(&self, workflow_id: &str) -> ActionOutcome {
        let request = DeleteAccountRequest {
            account: workflow_id.to_string(),
            actor: workflow_id.to_string(),
        };
        match self.api.delete_account(&request).await {
            Ok(MutationOutcome::Applied { .. }) => {
                tracing::info!(workflow_id, "account deleted");
                self.succeeded(
                    Acknowledgment::success(
                        "Account deleted.",
                        "Account successfully deleted.".to_string(),
                    ),
                    self.delays.after_mutation,
                )
            }
            Ok(MutationOutcome::Rejected { message }) => {
                tracing::warn!(workflow_id, error = %message, "account delete rejected");
                Self::failed(Acknowledgment::failure("Account deletion failed.", message))
            }
            Err(error) => {
                tracing::warn!(workflow_id, error = %error, "account delete failed");
                Self::failed(Acknowledgment::failure(
                    "Account deletion failed.",
                    error.to_string(),
                ))
            }
        }
    }

    fn succeeded(&self, acknowledgment: Acknowledgment, delay: Duration) -> ActionOutcome {
        ActionOutcome {
            acknowledgment,
            scheduled_refresh: Some(self.schedule_refresh(delay)),
        }
    }

    fn failed(acknowledgment: Acknowledgment) -> ActionOutcome {
        ActionOutcome {
            acknowledgment,
            scheduled_refresh: None,
        }
    }

    fn schedule_refresh(&self, delay: Duration) -> ScheduledRefresh {
        ScheduledRefresh::spawn(&self.runtime, &self.channel, delay)
    }
}
