//! Local transaction signing.

use std::str::FromStr;

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy_core::primitives::{Address, Bytes, TxKind, U256};
use alloy_eips::eip2718::Encodable2718;
use alloy_signer::SignerSync;
use alloy_signer_local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English};
use anyhow::Context;

/// Fee fields of an unsigned transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fees {
    Legacy {
        gas_price: u128,
    },
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

/// Everything needed to produce a signed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UnsignedTx {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_limit: u64,
    pub fees: Fees,
    pub to: TxKind,
    pub value: U256,
    pub input: Bytes,
}

/// Signs transactions with a locally held key.
#[derive(Debug, Clone)]
pub struct TxSigner {
    inner: PrivateKeySigner,
}

impl TxSigner {
    /// Load a signer from a hex-encoded private key (with or without `0x`).
    pub fn from_private_key(key: &str) -> Result<Self, anyhow::Error> {
        let inner = PrivateKeySigner::from_str(key.trim()).context("Invalid private key")?;
        Ok(Self { inner })
    }

    /// Derive a signer from a BIP-39 mnemonic at `m/44'/60'/0'/0/{index}`.
    pub fn from_mnemonic(phrase: &str, index: u32) -> Result<Self, anyhow::Error> {
        let inner = MnemonicBuilder::<English>::default()
            .phrase(phrase.trim())
            .index(index)
            .context("Invalid derivation index")?
            .build()
            .context("Failed to derive key from mnemonic")?;
        Ok(Self { inner })
    }

    /// Address of the signing key.
    pub fn address(&self) -> Address {
        self.inner.address()
    }

    /// Sign `tx` and return its EIP-2718 encoding, ready for `eth_sendRawTransaction`.
    pub(crate) fn sign(&self, tx: UnsignedTx) -> Result<Bytes, anyhow::Error> {
        let envelope: TxEnvelope = match tx.fees {
            Fees::Legacy { gas_price } => {
                let unsigned = TxLegacy {
                    chain_id: Some(tx.chain_id),
                    nonce: tx.nonce,
                    gas_price,
                    gas_limit: tx.gas_limit,
                    to: tx.to,
                    value: tx.value,
                    input: tx.input,
                };
                let signature = self
                    .inner
                    .sign_hash_sync(&unsigned.signature_hash())
                    .context("Failed to sign legacy transaction")?;
                unsigned.into_signed(signature).into()
            }
            Fees::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let unsigned = TxEip1559 {
                    chain_id: tx.chain_id,
                    nonce: tx.nonce,
                    gas_limit: tx.gas_limit,
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                    to: tx.to,
                    value: tx.value,
                    access_list: Default::default(),
                    input: tx.input,
                };
                let signature = self
                    .inner
                    .sign_hash_sync(&unsigned.signature_hash())
                    .context("Failed to sign EIP-1559 transaction")?;
                unsigned.into_signed(signature).into()
            }
        };

        Ok(envelope.encoded_2718().into())
    }
}
