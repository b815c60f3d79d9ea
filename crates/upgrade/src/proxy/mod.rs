//! Repointing upgradeable proxies at a new implementation.

pub mod abi;

use alloy_core::primitives::{Address, B256, Bytes};
use alloy_sol_types::SolCall;
use serde::{Deserialize, Serialize};

use crate::{
    CallResult, ChainClient, ConfirmationPolicy, FailurePoint, TransactionReceipt,
    TransactionRequest, UpgradeError, chain::wait_for_receipt,
};
use abi::{IProxyAdmin, IUpgradeable, RevertKind};

/// Upgrade mechanism of a proxy.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProxyKind {
    /// Upgraded through the admin recorded in the EIP-1967 admin slot.
    #[default]
    Transparent,
    /// Upgraded through the implementation's own `upgradeToAndCall`.
    Uups,
}

/// Current EIP-1967 pointers of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyState {
    pub proxy: Address,
    pub implementation: Address,
    /// Zero for UUPS proxies.
    pub admin: Address,
}

/// Where the upgrade transaction goes and what it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UpgradeCall {
    target: Address,
    calldata: Bytes,
}

/// Issues upgrade transactions against a proxy.
pub struct ProxyUpgrader<'a, C> {
    client: &'a C,
    kind: ProxyKind,
    confirmation: ConfirmationPolicy,
}

impl<'a, C: ChainClient> ProxyUpgrader<'a, C> {
    pub fn new(client: &'a C, kind: ProxyKind, confirmation: ConfirmationPolicy) -> Self {
        Self {
            client,
            kind,
            confirmation,
        }
    }

    /// Read the implementation and admin slots of `proxy`.
    pub async fn proxy_state(&self, proxy: Address) -> Result<ProxyState, UpgradeError> {
        let implementation = self.client.storage_at(proxy, abi::IMPLEMENTATION_SLOT).await?;
        let admin = self.client.storage_at(proxy, abi::ADMIN_SLOT).await?;

        Ok(ProxyState {
            proxy,
            implementation: slot_address(implementation),
            admin: slot_address(admin),
        })
    }

    /// Point `proxy` at `new_implementation`.
    pub async fn upgrade_proxy(
        &self,
        proxy: Address,
        new_implementation: Address,
    ) -> Result<TransactionReceipt, UpgradeError> {
        self.upgrade_proxy_and_call(proxy, new_implementation, Bytes::new())
            .await
    }

    /// Point `proxy` at `new_implementation` and call it with `data` in the same transaction.
    pub async fn upgrade_proxy_and_call(
        &self,
        proxy: Address,
        new_implementation: Address,
        data: Bytes,
    ) -> Result<TransactionReceipt, UpgradeError> {
        let failed = |reason: String, at: FailurePoint| UpgradeError::UpgradeFailed {
            proxy,
            reason,
            at,
        };

        if self.client.code_at(proxy).await?.is_empty() {
            return Err(failed(
                format!("no contract at {proxy}"),
                FailurePoint::PreBroadcast,
            ));
        }

        let before = self.proxy_state(proxy).await?;
        let call = self.build_call(&before, new_implementation, data).await?;
        let tx = TransactionRequest::call(call.target, call.calldata);

        tracing::info!(
            proxy = %proxy,
            kind = %self.kind,
            from = %before.implementation,
            to = %new_implementation,
            via = %call.target,
            "Upgrading proxy..."
        );

        if let CallResult::Reverted { data, message } = self.client.call(&tx).await? {
            return Err(self.revert_error(proxy, &data, &message));
        }

        let tx_hash = self
            .client
            .send_transaction(tx)
            .await
            .map_err(|e| failed(format!("{e:#}"), FailurePoint::PreBroadcast))?;

        tracing::info!(tx_hash = %tx_hash, "Upgrade transaction broadcast");

        let receipt = wait_for_receipt(self.client, tx_hash, self.confirmation)
            .await
            .map_err(|e| failed(format!("{e:#}"), FailurePoint::Unconfirmed))?;

        if !receipt.succeeded() {
            return Err(failed(
                format!("upgrade transaction {tx_hash} reverted"),
                FailurePoint::Reverted,
            ));
        }

        let after = self
            .proxy_state(proxy)
            .await
            .map_err(|e| failed(e.to_string(), FailurePoint::PostCheck))?;
        if after.implementation != new_implementation {
            return Err(failed(
                format!(
                    "implementation slot reads {} after upgrade, expected {}",
                    after.implementation, new_implementation
                ),
                FailurePoint::PostCheck,
            ));
        }

        tracing::info!(
            proxy = %proxy,
            implementation = %after.implementation,
            block_number = receipt.block_number,
            gas_used = receipt.gas_used,
            "Proxy upgraded"
        );

        Ok(receipt)
    }

    async fn build_call(
        &self,
        state: &ProxyState,
        new_implementation: Address,
        data: Bytes,
    ) -> Result<UpgradeCall, UpgradeError> {
        match self.kind {
            ProxyKind::Uups => Ok(self.direct_call(state.proxy, new_implementation, data).await?),
            ProxyKind::Transparent => {
                if state.admin.is_zero() {
                    return Err(UpgradeError::UpgradeFailed {
                        proxy: state.proxy,
                        reason: "admin slot is empty, not a transparent proxy".to_string(),
                        at: FailurePoint::PreBroadcast,
                    });
                }

                // Pre-5.0 proxies may be administered by a plain account.
                if self.client.code_at(state.admin).await?.is_empty() {
                    if state.admin != self.client.sender() {
                        return Err(UpgradeError::UpgradeUnauthorized {
                            proxy: state.proxy,
                            caller: self.client.sender(),
                            reason: format!("proxy admin is {}", state.admin),
                        });
                    }
                    return Ok(self.direct_call(state.proxy, new_implementation, data).await?);
                }

                let calldata = if data.is_empty() && !self.is_v5(state.admin).await? {
                    IProxyAdmin::upgradeCall {
                        proxy: state.proxy,
                        implementation: new_implementation,
                    }
                    .abi_encode()
                } else {
                    IProxyAdmin::upgradeAndCallCall {
                        proxy: state.proxy,
                        implementation: new_implementation,
                        data,
                    }
                    .abi_encode()
                };

                Ok(UpgradeCall {
                    target: state.admin,
                    calldata: calldata.into(),
                })
            }
        }
    }

    async fn direct_call(
        &self,
        proxy: Address,
        new_implementation: Address,
        data: Bytes,
    ) -> Result<UpgradeCall, anyhow::Error> {
        let calldata = if data.is_empty() && !self.is_v5(proxy).await? {
            IUpgradeable::upgradeToCall {
                newImplementation: new_implementation,
            }
            .abi_encode()
        } else {
            IUpgradeable::upgradeToAndCallCall {
                newImplementation: new_implementation,
                data,
            }
            .abi_encode()
        };

        Ok(UpgradeCall {
            target: proxy,
            calldata: calldata.into(),
        })
    }

    /// Whether `target` reports `UPGRADE_INTERFACE_VERSION() == "5.0.0"`.
    async fn is_v5(&self, target: Address) -> Result<bool, anyhow::Error> {
        let query = TransactionRequest::call(
            target,
            IUpgradeable::UPGRADE_INTERFACE_VERSIONCall {}.abi_encode(),
        );

        let version = match self.client.call(&query).await? {
            CallResult::Success(output) => {
                IUpgradeable::UPGRADE_INTERFACE_VERSIONCall::abi_decode_returns(&output).ok()
            }
            CallResult::Reverted { .. } => None,
        };

        tracing::debug!(contract = %target, version = ?version, "Upgrade interface version");
        Ok(version.as_deref() == Some(abi::INTERFACE_VERSION_V5))
    }

    fn revert_error(&self, proxy: Address, data: &[u8], message: &str) -> UpgradeError {
        match abi::classify_revert(data, message) {
            RevertKind::Unauthorized(reason) => {
                tracing::warn!(proxy = %proxy, caller = %self.client.sender(), %reason, "Upgrade simulation rejected the caller");
                UpgradeError::UpgradeUnauthorized {
                    proxy,
                    caller: self.client.sender(),
                    reason,
                }
            }
            RevertKind::Other(reason) => {
                tracing::warn!(proxy = %proxy, %reason, "Upgrade simulation reverted");
                UpgradeError::UpgradeFailed {
                    proxy,
                    reason,
                    at: FailurePoint::PreBroadcast,
                }
            }
        }
    }
}

/// The address stored in the low 20 bytes of a storage word.
fn slot_address(word: B256) -> Address {
    Address::from_word(word)
}
