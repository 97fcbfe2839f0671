//! Ledger transport: account reads, non-committing simulation, submission.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use solana_account_decoder::{UiAccount, UiAccountData, UiAccountEncoding};
use solana_client::{
    client_error::ClientError,
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcSimulateTransactionAccountsConfig, RpcSimulateTransactionConfig},
};
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    instruction::{Instruction, InstructionError},
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair, Signature},
    signer::Signer,
    transaction::{Transaction, TransactionError},
};
use tracing::debug;

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};

/// Why the ledger refused a transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    /// Custom program error code, when the failing instruction returned one
    pub code: Option<u32>,
    pub message: String,
}

impl Rejection {
    pub fn new(code: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_transaction_error(err: &TransactionError) -> Self {
        Self::new(custom_code(err), err.to_string())
    }
}

/// Result of a non-committing execution
#[derive(Clone, Debug, Default)]
pub struct SimulationOutcome {
    pub rejection: Option<Rejection>,
    pub logs: Vec<String>,
    /// Post-execution data of the requested accounts, in request order
    pub accounts: Vec<Option<Vec<u8>>>,
}

impl SimulationOutcome {
    /// Fails with the rejection verbatim, if there was one.
    pub fn into_result(self) -> Result<Self> {
        match self.rejection {
            Some(rejection) => Err(OrchestratorError::SimulationReverted {
                code: rejection.code,
                message: rejection.message,
                logs: self.logs,
            }),
            None => Ok(self),
        }
    }
}

/// Everything the orchestrator needs from the ledger.
///
/// Timeouts and retries of individual requests are the implementor's concern.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Fee payer and default signer of every submitted batch
    fn payer(&self) -> Pubkey;

    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>>;

    async fn minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64>;

    /// Executes `instructions` without committing and returns the resulting
    /// data of `accounts`.
    async fn simulate(
        &self,
        instructions: &[Instruction],
        accounts: &[Pubkey],
    ) -> Result<SimulationOutcome>;

    /// Signs, sends and waits for confirmation of one batch.
    async fn submit(
        &self,
        instructions: &[Instruction],
        extra_signers: &[&Keypair],
    ) -> std::result::Result<Signature, Rejection>;
}

/// [`Ledger`] over a JSON-RPC endpoint
pub struct RpcLedger {
    client: Arc<RpcClient>,
    payer: Keypair,
    commitment: CommitmentConfig,
}

impl RpcLedger {
    pub fn new(client: Arc<RpcClient>, payer: Keypair, commitment: CommitmentConfig) -> Self {
        Self {
            client,
            payer,
            commitment,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let payer = read_keypair_file(&config.keypair_path).map_err(|e| {
            OrchestratorError::Config(format!("{}: {e}", config.keypair_path.display()))
        })?;
        let client = Arc::new(RpcClient::new_with_commitment(
            config.rpc_url.clone(),
            config.commitment,
        ));
        Ok(Self::new(client, payer, config.commitment))
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    fn payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        let response = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(transport)?;
        Ok(response.value)
    }

    async fn minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64> {
        self.client
            .get_minimum_balance_for_rent_exemption(data_len)
            .await
            .map_err(transport)
    }

    async fn simulate(
        &self,
        instructions: &[Instruction],
        accounts: &[Pubkey],
    ) -> Result<SimulationOutcome> {
        let tx = Transaction::new_with_payer(instructions, Some(&self.payer.pubkey()));
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: true,
            commitment: Some(self.commitment),
            accounts: Some(RpcSimulateTransactionAccountsConfig {
                encoding: Some(UiAccountEncoding::Base64),
                addresses: accounts.iter().map(Pubkey::to_string).collect(),
            }),
            ..RpcSimulateTransactionConfig::default()
        };

        let result = self
            .client
            .simulate_transaction_with_config(&tx, config)
            .await
            .map_err(transport)?
            .value;

        debug!(
            units = ?result.units_consumed,
            failed = result.err.is_some(),
            "Simulated {} instruction(s)",
            instructions.len()
        );

        let data = match result.accounts {
            Some(returned) => returned
                .into_iter()
                .zip(accounts)
                .map(|(account, address)| {
                    account
                        .map(|a| decode_ui_account(address, &a))
                        .transpose()
                })
                .collect::<Result<Vec<_>>>()?,
            None => vec![None; accounts.len()],
        };

        Ok(SimulationOutcome {
            rejection: result.err.as_ref().map(Rejection::from_transaction_error),
            logs: result.logs.unwrap_or_default(),
            accounts: data,
        })
    }

    async fn submit(
        &self,
        instructions: &[Instruction],
        extra_signers: &[&Keypair],
    ) -> std::result::Result<Signature, Rejection> {
        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(client_rejection)?;

        let tx = sign_transaction(instructions, &self.payer, extra_signers, blockhash)?;

        self.client
            .send_and_confirm_transaction(&tx)
            .await
            .map_err(client_rejection)
    }
}

/// Signs with the payer first, then every extra signer. Kept synchronous so no
/// `&dyn Signer` is held across an await.
fn sign_transaction(
    instructions: &[Instruction],
    payer: &Keypair,
    extra_signers: &[&Keypair],
    blockhash: Hash,
) -> std::result::Result<Transaction, Rejection> {
    let mut signers: Vec<&dyn Signer> = vec![payer];
    signers.extend(extra_signers.iter().map(|k| *k as &dyn Signer));

    let mut tx = Transaction::new_with_payer(instructions, Some(&payer.pubkey()));
    tx.try_sign(&signers[..], blockhash)
        .map_err(|e| Rejection::new(None, e.to_string()))?;
    Ok(tx)
}

fn decode_ui_account(address: &Pubkey, account: &UiAccount) -> Result<Vec<u8>> {
    match &account.data {
        UiAccountData::Binary(data, UiAccountEncoding::Base64) => STANDARD
            .decode(data)
            .map_err(|e| OrchestratorError::decode(address, e)),
        _ => Err(OrchestratorError::decode(
            address,
            "simulation returned non-base64 account data",
        )),
    }
}

/// Raw custom code of the failing instruction, uninterpreted
pub fn custom_code(err: &TransactionError) -> Option<u32> {
    match err {
        TransactionError::InstructionError(_, InstructionError::Custom(code)) => Some(*code),
        _ => None,
    }
}

fn transport(err: ClientError) -> OrchestratorError {
    OrchestratorError::Transport(err.to_string())
}

fn client_rejection(err: ClientError) -> Rejection {
    let code = err.get_transaction_error().as_ref().and_then(custom_code);
    Rejection::new(code, err.to_string())
}
