//! Core data model: transactions, receipts, logs, blocks, tokens.
//!
//! These are the records that flow from the client through the monitor and the
//! pipeline to consumers and the repository. Serialization derives are provided
//! for repository and explorer implementors.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use alloy::primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::network::Network;

/// Metadata keys attached to enriched transactions.
pub mod metadata {
    pub const ERC20_TOKEN_ADDRESS: &str = "erc20.token_address";
    pub const ERC20_TOKEN_SYMBOL: &str = "erc20.token_symbol";
    pub const ERC20_TOKEN_DECIMALS: &str = "erc20.token_decimals";
    pub const ERC20_SENDER: &str = "erc20.sender";
    pub const ERC20_RECIPIENT: &str = "erc20.recipient";
    pub const ERC20_AMOUNT: &str = "erc20.amount";
    pub const MULTISIG_TOKEN_ADDRESS: &str = "multisig.token_address";
    pub const MULTISIG_TOKEN_SYMBOL: &str = "multisig.token_symbol";
    pub const MULTISIG_TOKEN_DECIMALS: &str = "multisig.token_decimals";
}

/// Lifecycle status of an observed transaction.
///
/// Status only moves forward: `Pending → Mined → Success | Failed`. Use
/// [`Transaction::advance_status`] to apply updates without regressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Mined,
    Success,
    Failed,
}

impl TransactionStatus {
    fn rank(&self) -> u8 {
        match self {
            TransactionStatus::Pending => 0,
            TransactionStatus::Mined => 1,
            TransactionStatus::Success | TransactionStatus::Failed => 2,
        }
    }

    /// Whether the status can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Failed)
    }
}

impl Display for TransactionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Mined => "mined",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Classification of a transaction.
///
/// The monitor assigns one of the first three variants from the raw shape of
/// the transaction; the typed-decoder transformer may refine it to a more
/// specific variant afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TransactionType {
    Native,
    Deploy,
    ContractCall,
    Erc20Transfer,
    Erc20Approval,
    MultisigDeposit,
    MultisigWithdrawalRequest,
    MultisigWithdrawalExecution,
    MultisigRecovery,
}

impl TransactionType {
    /// Initial classification from the raw transaction shape: a missing `to`
    /// with calldata is a contract deployment, calldata alone is a contract
    /// call, anything else is a native transfer.
    pub fn classify(to: Option<&Address>, data: &[u8]) -> Self {
        match (to, data.is_empty()) {
            (None, false) => TransactionType::Deploy,
            (_, false) => TransactionType::ContractCall,
            _ => TransactionType::Native,
        }
    }
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionType::Native => "native",
            TransactionType::Deploy => "deploy",
            TransactionType::ContractCall => "contract_call",
            TransactionType::Erc20Transfer => "erc20_transfer",
            TransactionType::Erc20Approval => "erc20_approval",
            TransactionType::MultisigDeposit => "multisig_deposit",
            TransactionType::MultisigWithdrawalRequest => "multisig_withdrawal_request",
            TransactionType::MultisigWithdrawalExecution => "multisig_withdrawal_execution",
            TransactionType::MultisigRecovery => "multisig_recovery",
        };
        write!(f, "{s}")
    }
}

/// An observed transaction, progressively enriched by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub chain: Network,
    pub hash: B256,
    /// Sender, recovered from the signature by the upstream node.
    pub from: Option<Address>,
    /// Recipient; `None` for contract deployments.
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    /// Unix seconds of the containing block; zero until known.
    pub timestamp: i64,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Transaction {
    /// Apply a status update, refusing regressions.
    ///
    /// Returns `true` when the status actually changed.
    pub fn advance_status(&mut self, next: TransactionStatus) -> bool {
        if next.rank() > self.status.rank() {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Insert a metadata entry.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// String metadata value, if present and a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Execution receipt of a mined transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub hash: B256,
    pub chain: Network,
    /// Address of the deployed contract, for deployments.
    pub contract_address: Option<Address>,
    pub block_number: u64,
    /// Post-execution status flag: `true` for status 1.
    pub success: bool,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub logs_bloom: Bytes,
    pub logs: Vec<Log>,
}

/// A contract event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub chain: Network,
    /// Topic 0 is the event signature hash; handlers require at least one
    /// topic.
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: B256,
    pub log_index: Option<u64>,
}

/// A block, optionally hydrated with its transactions.
///
/// When repeated block-body fetches fail, the subscription engine emits a
/// header-only form with `transactions: None` and `transaction_count == 0`;
/// consumers must tolerate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub chain: Network,
    pub hash: B256,
    pub number: u64,
    pub parent_hash: B256,
    /// Unix seconds.
    pub timestamp: u64,
    pub miner: Address,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub size: Option<u64>,
    pub difficulty: U256,
    pub extra: Bytes,
    pub transaction_count: usize,
    pub transactions: Option<Vec<Transaction>>,
}

/// ERC-20 token metadata as served by the token store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub chain: Network,
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    pub name: String,
}
