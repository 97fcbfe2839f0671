use solana_sdk::{pubkey, pubkey::Pubkey};

pub const VAULT_ACCOUNT_NAME: &str = "Vault";

/// Mint of the wrapped native asset (wSOL)
pub const NATIVE_MINT: Pubkey = pubkey!("So11111111111111111111111111111111111111112");

/// Legacy SPL token program, owner of the vault's reserve and LP accounts
pub const TOKEN_PROGRAM_ID: Pubkey = pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");

/// Size of an SPL token account
pub const TOKEN_ACCOUNT_LEN: usize = 165;

/// Operand ceiling used when none is configured
pub const DEFAULT_MAX_OPERANDS_PER_BATCH: usize = 6;
