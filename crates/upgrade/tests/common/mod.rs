//! In-memory chain, explorer and artifacts for exercising the upgrade operations.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_core::{
    json_abi::JsonAbi,
    primitives::{Address, B256, Bytes, TxKind, U256},
};
use alloy_sol_types::{SolCall, SolError, SolValue};
use proxup_upgrade::{
    ArtifactSource, CallResult, ChainClient, ConfirmationPolicy, ContractArtifact, ProxyKind,
    RegistrarPolicy, ServiceError, SourceMetadata, SubmitResponse, TransactionReceipt,
    TransactionRequest, UpgradeError, UpgradeWorkflow, VerificationRequest, VerificationService,
    VerificationStatus,
    proxy::abi::{
        ADMIN_SLOT, ERC1967InvalidImplementation, IMPLEMENTATION_SLOT, IProxyAdmin, IUpgradeable,
        OwnableUnauthorizedAccount,
    },
};

/// Ordered record of everything that touched the chain or the explorer.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub const ADMIN: Address = Address::repeat_byte(0xad);
pub const OUTSIDER: Address = Address::repeat_byte(0x0e);
pub const PROXY: Address = Address::repeat_byte(0x99);
pub const PROXY_ADMIN: Address = Address::repeat_byte(0xaa);
pub const TOKEN_V1: Address = Address::repeat_byte(0x01);

/// Creation bytecode the simulated chain refuses to deploy.
pub const REVERTING_BYTECODE: &[u8] = &[0xfe];

/// Initialize tracing for tests (idempotent).
pub fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn fast_confirmation() -> ConfirmationPolicy {
    ConfirmationPolicy {
        timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
    }
}

pub fn fast_registrar() -> RegistrarPolicy {
    RegistrarPolicy {
        max_polls: 5,
        poll_interval: Duration::from_millis(10),
        max_poll_interval: Duration::from_millis(50),
        max_submit_attempts: 3,
    }
}

#[derive(Debug, Clone)]
struct SimProxy {
    implementation: Address,
    /// `ProxyAdmin` contract for transparent proxies, zero for UUPS.
    admin: Address,
    /// Owner allowed to call `upgradeToAndCall` on UUPS proxies.
    owner: Address,
}

/// State change a successful call would apply.
enum Effect {
    None,
    SetImplementation { proxy: Address, implementation: Address },
}

#[derive(Default)]
struct ChainState {
    code: HashMap<Address, Bytes>,
    proxies: HashMap<Address, SimProxy>,
    /// `ProxyAdmin` address -> owner.
    admins: HashMap<Address, Address>,
    receipts: HashMap<B256, TransactionReceipt>,
    /// Receipt lookups answered with "pending" before the receipt shows up.
    pending_polls: HashMap<B256, u32>,
    tx_count: u64,
    receipt_delay: u32,
    revert_next_upgrade_on_chain: bool,
    /// Receipts of transactions after this many are never returned.
    drop_receipts_after: Option<u64>,
}

/// A single-account chain with OpenZeppelin-style proxies.
#[derive(Clone)]
pub struct SimChain {
    sender: Address,
    state: Arc<Mutex<ChainState>>,
    log: EventLog,
}

impl SimChain {
    pub fn new(sender: Address, log: EventLog) -> Self {
        init_test_tracing();
        Self {
            sender,
            state: Arc::default(),
            log,
        }
    }

    /// The same chain, seen from another account.
    pub fn as_sender(&self, sender: Address) -> Self {
        Self {
            sender,
            ..self.clone()
        }
    }

    /// A transparent proxy at [`PROXY`] pointing at [`TOKEN_V1`], administered by
    /// a `ProxyAdmin` at [`PROXY_ADMIN`] owned by [`ADMIN`].
    pub fn with_transparent_proxy(self) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.code.insert(TOKEN_V1, Bytes::from_static(&[0x60, 0x01]));
            state.code.insert(PROXY, Bytes::from_static(&[0x60, 0x02]));
            state.code.insert(PROXY_ADMIN, Bytes::from_static(&[0x60, 0x03]));
            state.admins.insert(PROXY_ADMIN, ADMIN);
            state.proxies.insert(
                PROXY,
                SimProxy {
                    implementation: TOKEN_V1,
                    admin: PROXY_ADMIN,
                    owner: Address::ZERO,
                },
            );
        }
        self
    }

    /// A UUPS proxy at [`PROXY`] pointing at [`TOKEN_V1`], owned by [`ADMIN`].
    pub fn with_uups_proxy(self) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.code.insert(TOKEN_V1, Bytes::from_static(&[0x60, 0x01]));
            state.code.insert(PROXY, Bytes::from_static(&[0x60, 0x02]));
            state.proxies.insert(
                PROXY,
                SimProxy {
                    implementation: TOKEN_V1,
                    admin: Address::ZERO,
                    owner: ADMIN,
                },
            );
        }
        self
    }

    /// Answer the next receipt lookups of every transaction with "pending" `polls` times.
    pub fn with_receipt_delay(self, polls: u32) -> Self {
        self.state.lock().unwrap().receipt_delay = polls;
        self
    }

    /// Never return receipts, as if the node lost the transactions.
    pub fn with_dropped_receipts(self) -> Self {
        self.with_receipts_dropped_after(0)
    }

    /// Confirm the first `count` transactions, then stop returning receipts.
    pub fn with_receipts_dropped_after(self, count: u64) -> Self {
        self.state.lock().unwrap().drop_receipts_after = Some(count);
        self
    }

    /// Let the next upgrade pass simulation but revert once mined.
    pub fn revert_next_upgrade_on_chain(&self) {
        self.state.lock().unwrap().revert_next_upgrade_on_chain = true;
    }

    pub fn implementation_of(&self, proxy: Address) -> Address {
        self.state.lock().unwrap().proxies[&proxy].implementation
    }

    pub fn transaction_count(&self) -> u64 {
        self.state.lock().unwrap().tx_count
    }

    fn record(&self, event: String) {
        self.log.lock().unwrap().push(event);
    }

    fn execute(state: &ChainState, from: Address, to: Address, input: &[u8]) -> Result<(Bytes, Effect), Bytes> {
        let selector: &[u8] = input.get(..4).unwrap_or_default();
        let version = || Ok((Bytes::from("5.0.0".to_string().abi_encode()), Effect::None));

        if let Some(owner) = state.admins.get(&to) {
            if selector == IProxyAdmin::UPGRADE_INTERFACE_VERSIONCall::SELECTOR.as_slice() {
                return version();
            }
            if selector != IProxyAdmin::upgradeAndCallCall::SELECTOR.as_slice() {
                return Err(Bytes::new());
            }
            let call = IProxyAdmin::upgradeAndCallCall::abi_decode(input).map_err(|_| Bytes::new())?;
            if from != *owner {
                return Err(OwnableUnauthorizedAccount { account: from }.abi_encode().into());
            }
            return Self::set_implementation(state, call.proxy, call.implementation);
        }

        if let Some(proxy) = state.proxies.get(&to) {
            if proxy.admin == from {
                return Err(Bytes::new());
            }
            if selector == IUpgradeable::UPGRADE_INTERFACE_VERSIONCall::SELECTOR.as_slice() {
                return version();
            }
            if selector == IUpgradeable::upgradeToAndCallCall::SELECTOR.as_slice() && proxy.admin.is_zero() {
                let call = IUpgradeable::upgradeToAndCallCall::abi_decode(input).map_err(|_| Bytes::new())?;
                if from != proxy.owner {
                    return Err(OwnableUnauthorizedAccount { account: from }.abi_encode().into());
                }
                return Self::set_implementation(state, to, call.newImplementation);
            }
        }

        Err(Bytes::new())
    }

    fn set_implementation(
        state: &ChainState,
        proxy: Address,
        implementation: Address,
    ) -> Result<(Bytes, Effect), Bytes> {
        if !state.proxies.contains_key(&proxy) {
            return Err(Bytes::new());
        }
        if state.code.get(&implementation).is_none_or(|code| code.is_empty()) {
            return Err(ERC1967InvalidImplementation { implementation }.abi_encode().into());
        }
        Ok((Bytes::new(), Effect::SetImplementation { proxy, implementation }))
    }
}

impl ChainClient for SimChain {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<CallResult, anyhow::Error> {
        let state = self.state.lock().unwrap();
        let TxKind::Call(to) = tx.to else {
            return Ok(CallResult::Success(Bytes::new()));
        };
        Ok(match Self::execute(&state, self.sender, to, &tx.input) {
            Ok((output, _)) => CallResult::Success(output),
            Err(data) => CallResult::Reverted {
                data,
                message: "execution reverted".to_string(),
            },
        })
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256, anyhow::Error> {
        let mut state = self.state.lock().unwrap();
        state.tx_count += 1;
        let hash = B256::from(U256::from(state.tx_count));

        let mut receipt = TransactionReceipt {
            transaction_hash: hash,
            block_number: state.tx_count,
            gas_used: 21_000,
            status: 1,
            contract_address: None,
        };

        match tx.to {
            TxKind::Create => {
                if tx.input.as_ref() == REVERTING_BYTECODE {
                    receipt.status = 0;
                } else {
                    let address = Address::from_word(B256::from(U256::from(0xa000 + state.tx_count)));
                    state.code.insert(address, tx.input.clone());
                    receipt.contract_address = Some(address);
                    receipt.gas_used = 500_000;
                    self.record(format!("deploy:{address}"));
                }
            }
            TxKind::Call(to) => {
                let result = Self::execute(&state, self.sender, to, &tx.input);
                let revert_anyway = std::mem::take(&mut state.revert_next_upgrade_on_chain);
                match result {
                    Ok((_, Effect::SetImplementation { proxy, implementation })) if !revert_anyway => {
                        if let Some(p) = state.proxies.get_mut(&proxy) {
                            p.implementation = implementation;
                        }
                        self.record(format!("upgrade:{proxy}->{implementation}"));
                    }
                    Ok((_, Effect::None)) if !revert_anyway => {}
                    _ => receipt.status = 0,
                }
            }
        }

        let delay = state.receipt_delay;
        state.pending_polls.insert(hash, delay);
        state.receipts.insert(hash, receipt);
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>, anyhow::Error> {
        let mut state = self.state.lock().unwrap();
        // Transaction hashes are the sequence number of the transaction.
        if state
            .drop_receipts_after
            .is_some_and(|count| U256::from_be_bytes(hash.0) > U256::from(count))
        {
            return Ok(None);
        }
        if let Some(remaining) = state.pending_polls.get_mut(&hash).filter(|n| **n > 0) {
            *remaining -= 1;
            return Ok(None);
        }
        Ok(state.receipts.get(&hash).cloned())
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, anyhow::Error> {
        Ok(self.state.lock().unwrap().code.get(&address).cloned().unwrap_or_default())
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, anyhow::Error> {
        let state = self.state.lock().unwrap();
        let Some(proxy) = state.proxies.get(&address) else {
            return Ok(B256::ZERO);
        };
        let value = if slot == IMPLEMENTATION_SLOT {
            proxy.implementation
        } else if slot == ADMIN_SLOT {
            proxy.admin
        } else {
            Address::ZERO
        };
        Ok(value.into_word())
    }
}

#[derive(Default)]
struct ExplorerState {
    verified: HashSet<Address>,
    guids: HashMap<String, Address>,
    submissions: VecDeque<Result<SubmitResponse, ServiceError>>,
    statuses: VecDeque<Result<VerificationStatus, ServiceError>>,
    submit_calls: usize,
    status_calls: usize,
    last_request: Option<VerificationRequest>,
}

/// Explorer answering from scripted responses, then verifying everything it is sent.
#[derive(Clone)]
pub struct ScriptedExplorer {
    state: Arc<Mutex<ExplorerState>>,
    log: EventLog,
}

impl ScriptedExplorer {
    pub fn new(log: EventLog) -> Self {
        Self {
            state: Arc::default(),
            log,
        }
    }

    pub fn script_submissions(self, responses: impl IntoIterator<Item = Result<SubmitResponse, ServiceError>>) -> Self {
        self.state.lock().unwrap().submissions.extend(responses);
        self
    }

    pub fn script_statuses(self, responses: impl IntoIterator<Item = Result<VerificationStatus, ServiceError>>) -> Self {
        self.state.lock().unwrap().statuses.extend(responses);
        self
    }

    pub fn submit_calls(&self) -> usize {
        self.state.lock().unwrap().submit_calls
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().unwrap().status_calls
    }

    pub fn last_request(&self) -> Option<VerificationRequest> {
        self.state.lock().unwrap().last_request.clone()
    }

    fn record(&self, event: String) {
        self.log.lock().unwrap().push(event);
    }
}

impl VerificationService for ScriptedExplorer {
    async fn is_verified(&self, address: Address) -> Result<bool, ServiceError> {
        Ok(self.state.lock().unwrap().verified.contains(&address))
    }

    async fn submit(&self, request: &VerificationRequest) -> Result<SubmitResponse, ServiceError> {
        self.record(format!("submit:{}", request.address));
        let mut state = self.state.lock().unwrap();
        state.submit_calls += 1;
        state.last_request = Some(request.clone());

        let response = state.submissions.pop_front().unwrap_or_else(|| {
            Ok(SubmitResponse::Accepted(format!("guid-{}", state.submit_calls)))
        });
        if let Ok(SubmitResponse::Accepted(guid)) = &response {
            state.guids.insert(guid.clone(), request.address);
        }
        response
    }

    async fn check_status(&self, guid: &str) -> Result<VerificationStatus, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.status_calls += 1;

        let status = state
            .statuses
            .pop_front()
            .unwrap_or(Ok(VerificationStatus::Verified));
        if let Ok(VerificationStatus::Verified | VerificationStatus::AlreadyVerified) = status {
            if let Some(address) = state.guids.get(guid).copied() {
                state.verified.insert(address);
            }
        }
        status
    }
}

/// Artifacts held in memory.
#[derive(Clone, Default)]
pub struct StaticArtifacts {
    artifacts: HashMap<String, ContractArtifact>,
}

impl StaticArtifacts {
    pub fn with(mut self, artifact: ContractArtifact) -> Self {
        self.artifacts.insert(artifact.contract_name.clone(), artifact);
        self
    }
}

impl ArtifactSource for StaticArtifacts {
    fn resolve(&self, name: &str) -> Result<ContractArtifact, UpgradeError> {
        let contract = name.rsplit(':').next().unwrap_or(name);
        self.artifacts
            .get(contract)
            .cloned()
            .ok_or_else(|| UpgradeError::ArtifactNotFound(name.to_string()))
    }
}

pub fn artifact(name: &str, bytecode: &[u8]) -> ContractArtifact {
    ContractArtifact {
        contract_name: name.to_string(),
        source_name: format!("contracts/{name}.sol"),
        bytecode: Bytes::copy_from_slice(bytecode),
        abi: JsonAbi::new(),
        metadata: Some(SourceMetadata {
            compiler_version: "0.8.20+commit.a1b79de6".to_string(),
            standard_json_input: serde_json::json!({
                "language": "Solidity",
                "sources": { format!("contracts/{name}.sol"): { "content": format!("contract {name} {{}}") } },
                "settings": { "optimizer": { "enabled": true, "runs": 200 } }
            }),
        }),
    }
}

pub fn token_v2() -> ContractArtifact {
    artifact("TokenV2", &[0x60, 0x80, 0x60, 0x40, 0x52])
}

pub fn project_artifacts() -> StaticArtifacts {
    StaticArtifacts::default()
        .with(token_v2())
        .with(artifact("Broken", REVERTING_BYTECODE))
}

pub type SimWorkflow = UpgradeWorkflow<SimChain, StaticArtifacts, ScriptedExplorer>;

pub fn workflow(chain: SimChain, explorer: ScriptedExplorer, kind: ProxyKind) -> SimWorkflow {
    init_test_tracing();
    UpgradeWorkflow::new(
        chain,
        project_artifacts(),
        explorer,
        kind,
        fast_confirmation(),
        fast_registrar(),
    )
}
