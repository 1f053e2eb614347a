//! Application context: owns the notification channel and wires the synchronizer and the
//! mutation initiators to it.

use std::sync::Arc;

use accounts_api_client::{AccountsApi, AccountsApiClient, AccountsApiClientConfig};
use tokio::runtime::Handle;

use crate::actions::{AccountActions, ActionOutcome, RefreshDelays};
use crate::config::ConsoleConfig;
use crate::model::PLAN_LOADING;
use crate::notification::NotificationChannel;
use crate::synchronizer::{AccountListSynchronizer, MountedSynchronizer};

pub struct ConsoleApp {
    channel: NotificationChannel,
    accounts: MountedSynchronizer,
    actions: AccountActions,
}

impl ConsoleApp {
    /// Mounts the account list, which runs its first refresh immediately.
    pub fn start(api: Arc<dyn AccountsApi>, delays: RefreshDelays, runtime: Handle) -> Self {
        let channel = NotificationChannel::new();
        let accounts =
            AccountListSynchronizer::new(Arc::clone(&api), runtime.clone()).mount(&channel);
        let actions = AccountActions::new(api, channel.clone(), runtime, delays);
        Self {
            channel,
            accounts,
            actions,
        }
    }

    pub fn from_config(
        config: &ConsoleConfig,
        runtime: Handle,
    ) -> Result<Self, accounts_api_client::AccountsApiError> {
        let client = AccountsApiClient::new(AccountsApiClientConfig {
            base_url: config.api_base_url.clone(),
            timeout_ms: config.request_timeout_ms,
        })?;
        tracing::info!(
            base_url = client.base_url(),
            timeout_ms = ?config.request_timeout_ms,
            "accounts console starting"
        );
        Ok(Self::start(Arc::new(client), config.refresh_delays, runtime))
    }

    pub fn channel(&self) -> &NotificationChannel {
        &self.channel
    }

    pub fn accounts(&self) -> &MountedSynchronizer {
        &self.accounts
    }

    pub fn actions(&self) -> &AccountActions {
        &self.actions
    }

    /// Toggles using the plan currently shown for `workflow_id`. An account that is missing or
    /// still loading moves to `trial`.
    pub async fn toggle_plan(&self, workflow_id: &str) -> ActionOutcome {
        let current_plan = self
            .accounts
            .snapshot()
            .find(workflow_id)
            .map_or_else(|| PLAN_LOADING.to_string(), |row| row.plan.as_str().to_string());
        self.actions.toggle_plan(workflow_id, &current_plan).await
    }

    pub fn shutdown(self) {
        let Self { accounts, .. } = self;
        accounts.unmount();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use accounts_api_client::{PlanLookup, PlanTier};
    use tokio::runtime::Handle;

    use super::ConsoleApp;
    use crate::actions::RefreshDelays;
    use crate::notification::ConsoleEvent;
    use crate::test_support::{
        RecordedMutation, ScriptedApi, listing, next_list_call, next_plan_call,
    };

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn upgrade_of_trial_account_triggers_delayed_refresh() {
        let (api, mut calls) = ScriptedApi::new();
        let app = ConsoleApp::start(
            Arc::clone(&api) as _,
            RefreshDelays::default(),
            Handle::current(),
        );

        let reply = next_list_call(&mut calls).await;
        let _ = reply.send(Ok(listing(&[("acme", "r1")])));
        let (_, reply) = next_plan_call(&mut calls).await;
        let _ = reply.send(Ok(PlanLookup::Plan("trial".to_string())));
        app.accounts()
            .wait_for(WAIT, |snapshot| snapshot.plans_settled())
            .await
            .expect("initial cycle settled");

        let outcome = app.toggle_plan("acme").await;
        assert!(outcome.acknowledgment.is_success());
        assert_eq!(
            api.mutations(),
            vec![RecordedMutation::Upgrade {
                account: "acme".to_string(),
                actor: "acme".to_string(),
                to: PlanTier::Premium,
            }]
        );

        let scheduled = outcome.scheduled_refresh.expect("refresh scheduled");
        assert_eq!(scheduled.published().await, Some(1));
        let _second_cycle = next_list_call(&mut calls).await;
        assert_eq!(app.accounts().latest_generation(), 2);
    }

    #[tokio::test]
    async fn toggle_of_unknown_account_targets_trial() {
        let (api, mut calls) = ScriptedApi::new();
        let app = ConsoleApp::start(
            Arc::clone(&api) as _,
            RefreshDelays::default(),
            Handle::current(),
        );
        let _pending_list = next_list_call(&mut calls).await;

        let _outcome = app.toggle_plan("ghost").await;
        assert!(matches!(
            api.mutations().as_slice(),
            [RecordedMutation::Upgrade {
                to: PlanTier::Trial,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn shutdown_unsubscribes_the_account_list() {
        let (api, mut calls) = ScriptedApi::new();
        let app = ConsoleApp::start(api, RefreshDelays::default(), Handle::current());
        let _pending_list = next_list_call(&mut calls).await;
        let channel = app.channel().clone();
        assert_eq!(channel.listener_count(ConsoleEvent::AccountsChanged), 1);

        app.shutdown();
        assert_eq!(channel.listener_count(ConsoleEvent::AccountsChanged), 0);
    }
}
