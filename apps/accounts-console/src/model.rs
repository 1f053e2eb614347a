use accounts_api_client::{AccountRecord, PlanTier};

pub const PLAN_LOADING: &str = "loading";

/// Plan column of one account row.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AccountPlan {
    /// Set when the bulk list lands, until the account's plan lookup resolves.
    Loading,
    Resolved(String),
}

impl AccountPlan {
    #[must_use]
    pub fn from_lookup(plan: &str) -> Self {
        Self::Resolved(plan.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Loading => PLAN_LOADING,
            Self::Resolved(plan) => plan.as_str(),
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    #[must_use]
    pub fn toggle_target(&self) -> PlanTier {
        PlanTier::toggle_target(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AccountRow {
    pub record: AccountRecord,
    pub plan: AccountPlan,
}

impl AccountRow {
    #[must_use]
    pub fn loading(record: AccountRecord) -> Self {
        Self {
            record,
            plan: AccountPlan::Loading,
        }
    }

    #[must_use]
    pub fn workflow_id(&self) -> &str {
        self.record.workflow_id()
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        self.record.execution.run_id.as_str()
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        self.record.workflow_type.name.as_str()
    }
}

#[cfg(test)]
mod tests {
    use accounts_api_client::PlanTier;

    use super::AccountPlan;

    #[test]
    fn loading_plan_reads_as_sentinel_and_toggles_to_trial() {
        let plan = AccountPlan::Loading;
        assert_eq!(plan.as_str(), "loading");
        assert!(plan.is_loading());
        assert_eq!(plan.toggle_target(), PlanTier::Trial);
    }

    #[test]
    fn resolved_plans_toggle_between_two_tiers() {
        assert_eq!(
            AccountPlan::from_lookup("trial").toggle_target(),
            PlanTier::Premium
        );
        assert_eq!(
            AccountPlan::from_lookup("premium").toggle_target(),
            PlanTier::Trial
        );
    }
}
