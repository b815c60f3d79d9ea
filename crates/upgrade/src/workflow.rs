//! Deploy, upgrade and verify, in that order.

use std::{
    collections::BTreeSet,
    sync::{Mutex, PoisonError},
};

use alloy_core::primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};

use crate::{
    ArtifactSource, ChainClient, ConfirmationPolicy, DeploymentReceipt, ImplementationDeployer,
    ProxyKind, ProxyUpgrader, RegistrarPolicy, TransactionReceipt, UpgradeError,
    VerificationOutcome, VerificationRegistrar, VerificationService,
};

/// Progress of a workflow run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WorkflowState {
    Idle,
    Deploying,
    Upgrading,
    Verifying,
    Done,
    Aborted,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Done | WorkflowState::Aborted)
    }

    /// States only move forward; skipped steps are passed over. Any running
    /// state may abort.
    pub fn can_transition_to(self, next: WorkflowState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            WorkflowState::Aborted => self != WorkflowState::Idle,
            WorkflowState::Done => self != WorkflowState::Idle,
            _ => next > self,
        }
    }
}

/// A step a plan may select.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Step {
    Deploy,
    Upgrade,
    Verify,
}

impl Step {
    fn state(self) -> WorkflowState {
        match self {
            Step::Deploy => WorkflowState::Deploying,
            Step::Upgrade => WorkflowState::Upgrading,
            Step::Verify => WorkflowState::Verifying,
        }
    }
}

/// What to run and with which inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePlan {
    /// Artifact to deploy and/or verify.
    pub contract_name: String,
    pub proxy: Option<Address>,
    /// An implementation that is already deployed. Required when `Deploy` is not selected
    /// but `Upgrade` or `Verify` is.
    pub implementation: Option<Address>,
    pub steps: BTreeSet<Step>,
    /// Constructor arguments as deployed, passed to verification.
    pub constructor_args: Bytes,
    /// Initializer calldata forwarded with the upgrade.
    pub upgrade_calldata: Bytes,
}

impl UpgradePlan {
    /// Deploy `contract_name`, point `proxy` at it and verify it.
    pub fn full(contract_name: impl Into<String>, proxy: Address) -> Self {
        Self {
            contract_name: contract_name.into(),
            proxy: Some(proxy),
            implementation: None,
            steps: [Step::Deploy, Step::Upgrade, Step::Verify].into(),
            constructor_args: Bytes::new(),
            upgrade_calldata: Bytes::new(),
        }
    }

    /// Verify an implementation that is already deployed.
    pub fn verify_only(contract_name: impl Into<String>, implementation: Address) -> Self {
        Self {
            contract_name: contract_name.into(),
            proxy: None,
            implementation: Some(implementation),
            steps: [Step::Verify].into(),
            constructor_args: Bytes::new(),
            upgrade_calldata: Bytes::new(),
        }
    }

    pub fn with_steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps = steps.into_iter().collect();
        self
    }

    pub fn with_implementation(mut self, implementation: Address) -> Self {
        self.implementation = Some(implementation);
        self
    }

    pub fn with_upgrade_calldata(mut self, data: Bytes) -> Self {
        self.upgrade_calldata = data;
        self
    }

    pub fn with_constructor_args(mut self, args: Bytes) -> Self {
        self.constructor_args = args;
        self
    }

    fn runs(&self, step: Step) -> bool {
        self.steps.contains(&step)
    }

    /// Check that every selected step has its inputs.
    pub fn validate(&self) -> Result<(), UpgradeError> {
        let invalid = |reason: &str| Err(UpgradeError::InvalidPlan(reason.to_string()));

        if self.steps.is_empty() {
            return invalid("no steps selected");
        }
        if self.contract_name.trim().is_empty() && (self.runs(Step::Deploy) || self.runs(Step::Verify)) {
            return invalid("a contract name is required to deploy or verify");
        }
        if self.runs(Step::Deploy) && self.implementation.is_some() {
            return invalid("an implementation address was given but the deploy step would replace it");
        }
        if !self.runs(Step::Deploy) && self.implementation.is_none() {
            if self.runs(Step::Upgrade) {
                return invalid("the upgrade step needs an implementation address or the deploy step");
            }
            if self.runs(Step::Verify) {
                return invalid("the verify step needs an implementation address or the deploy step");
            }
        }
        if self.runs(Step::Upgrade) && self.proxy.is_none() {
            return invalid("the upgrade step needs a proxy address");
        }
        if !self.runs(Step::Upgrade) && !self.upgrade_calldata.is_empty() {
            return invalid("upgrade calldata given but the upgrade step is not selected");
        }
        Ok(())
    }
}

/// The step that failed and why.
#[derive(Debug)]
pub struct StepFailure {
    pub step: Step,
    pub error: UpgradeError,
}

/// Everything a run produced.
#[derive(Debug)]
pub struct WorkflowReport {
    pub state: WorkflowState,
    pub deployment: Option<DeploymentReceipt>,
    pub upgrade: Option<TransactionReceipt>,
    pub verification: Option<VerificationOutcome>,
    pub failure: Option<StepFailure>,
}

impl WorkflowReport {
    fn new() -> Self {
        Self {
            state: WorkflowState::Idle,
            deployment: None,
            upgrade: None,
            verification: None,
            failure: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == WorkflowState::Done
    }

    /// Whether the run committed (or may have committed) anything on chain.
    pub fn state_changed(&self) -> bool {
        self.deployment.is_some()
            || self.upgrade.is_some()
            || self
                .failure
                .as_ref()
                .is_some_and(|failure| failure.error.may_have_changed_state())
    }

    fn enter(&mut self, next: WorkflowState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(from = %self.state, to = %next, "Workflow transition");
        self.state = next;
    }

    fn abort(mut self, step: Step, error: UpgradeError) -> Self {
        tracing::error!(
            step = %step,
            error = %error,
            state_changed = self.state_changed() || error.may_have_changed_state(),
            "Upgrade workflow aborted"
        );
        self.enter(WorkflowState::Aborted);
        self.failure = Some(StepFailure { step, error });
        self
    }
}

/// What the current run has committed on chain so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkflowProgress {
    /// Confirmed implementation deployment.
    pub deployed: Option<Address>,
    /// Whether the upgrade transaction was confirmed.
    pub upgraded: bool,
}

/// Runs [`UpgradePlan`]s against a chain, an artifact source and an explorer.
pub struct UpgradeWorkflow<C, A, V> {
    client: C,
    artifacts: A,
    service: V,
    proxy_kind: ProxyKind,
    confirmation: ConfirmationPolicy,
    registrar_policy: RegistrarPolicy,
    progress: Mutex<WorkflowProgress>,
}

impl<C: ChainClient, A: ArtifactSource, V: VerificationService> UpgradeWorkflow<C, A, V> {
    pub fn new(
        client: C,
        artifacts: A,
        service: V,
        proxy_kind: ProxyKind,
        confirmation: ConfirmationPolicy,
        registrar_policy: RegistrarPolicy,
    ) -> Self {
        Self {
            client,
            artifacts,
            service,
            proxy_kind,
            confirmation,
            registrar_policy,
            progress: Mutex::default(),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn service(&self) -> &V {
        &self.service
    }

    pub fn deployer(&self) -> ImplementationDeployer<'_, C, A> {
        ImplementationDeployer::new(&self.client, &self.artifacts, self.confirmation)
    }

    pub fn upgrader(&self) -> ProxyUpgrader<'_, C> {
        ProxyUpgrader::new(&self.client, self.proxy_kind, self.confirmation)
    }

    /// Progress of the current (or last) run, readable while it is in flight.
    pub fn progress(&self) -> WorkflowProgress {
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, update: impl FnOnce(&mut WorkflowProgress)) {
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut *progress);
    }

    pub fn registrar(&self) -> VerificationRegistrar<'_, V, A> {
        VerificationRegistrar::new(&self.service, &self.artifacts, self.registrar_policy)
    }

    /// Run the selected steps of `plan`.
    ///
    /// Returns `Err` only when the plan is invalid, before anything runs.
    /// Step failures abort the run and are recorded in the report; nothing
    /// already committed on chain is rolled back.
    pub async fn run(&self, plan: &UpgradePlan) -> Result<WorkflowReport, UpgradeError> {
        plan.validate()?;

        let steps = plan
            .steps
            .iter()
            .map(Step::to_string)
            .collect::<Vec<_>>()
            .join(",");
        tracing::info!(
            contract = %plan.contract_name,
            proxy = ?plan.proxy,
            implementation = ?plan.implementation,
            steps = %steps,
            sender = %self.client.sender(),
            "Starting upgrade workflow"
        );

        self.record(|progress| *progress = WorkflowProgress::default());
        let mut report = WorkflowReport::new();
        let mut implementation = plan.implementation;

        if plan.runs(Step::Deploy) {
            report.enter(Step::Deploy.state());
            match self.deployer().deploy_implementation(&plan.contract_name).await {
                Ok(receipt) => {
                    self.record(|progress| progress.deployed = Some(receipt.address));
                    implementation = Some(receipt.address);
                    report.deployment = Some(receipt);
                }
                Err(e) => return Ok(report.abort(Step::Deploy, e)),
            }
        }

        if plan.runs(Step::Upgrade) {
            report.enter(Step::Upgrade.state());
            let (Some(proxy), Some(new_implementation)) = (plan.proxy, implementation) else {
                return Ok(report.abort(
                    Step::Upgrade,
                    UpgradeError::InvalidPlan("missing proxy or implementation".to_string()),
                ));
            };
            match self
                .upgrader()
                .upgrade_proxy_and_call(proxy, new_implementation, plan.upgrade_calldata.clone())
                .await
            {
                Ok(receipt) => {
                    self.record(|progress| progress.upgraded = true);
                    report.upgrade = Some(receipt);
                }
                Err(e) => return Ok(report.abort(Step::Upgrade, e)),
            }
        }

        if plan.runs(Step::Verify) {
            report.enter(Step::Verify.state());
            let Some(address) = implementation else {
                return Ok(report.abort(
                    Step::Verify,
                    UpgradeError::InvalidPlan("missing implementation".to_string()),
                ));
            };
            match self
                .registrar()
                .verify_implementation(address, &plan.contract_name, plan.constructor_args.clone())
                .await
            {
                Ok(VerificationOutcome::Failed(reason)) => {
                    report.verification = Some(VerificationOutcome::Failed(reason.clone()));
                    return Ok(report.abort(Step::Verify, UpgradeError::VerificationFailed(reason)));
                }
                Ok(outcome) => report.verification = Some(outcome),
                Err(e) => return Ok(report.abort(Step::Verify, e)),
            }
        }

        report.enter(WorkflowState::Done);
        tracing::info!(
            implementation = ?implementation,
            verification = ?report.verification,
            "Upgrade workflow complete"
        );
        Ok(report)
    }
}
