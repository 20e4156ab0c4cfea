//! Deterministic Deposit Wallet Derivation
//!
//! One master seed, one deposit identity per user. Each principal is
//! assigned the next free derivation index and gets a P2WPKH address at
//! `m/84'/{coin_type}'/0'/0/{index}`, so the whole custody wallet can be
//! recovered from the seed alone.
//!
//! # Security Notes
//!
//! - The master seed comes from configuration and is REQUIRED: there is no
//!   generated fallback on any network.
//! - The seed and derived private keys are never logged or serialized; log
//!   output shows only a SHA-256 fingerprint.
//! - Private keys exist transiently inside derivation and export calls; the
//!   engine state holds only indices, addresses, and public keys.

use std::collections::HashMap;
use std::str::FromStr;

use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Address, CompressedPublicKey, Network, PrivateKey};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config;

/// Key derivation errors
#[derive(Debug, Error)]
pub enum WalletError {
    /// Seed bytes are malformed or out of the BIP32 size range
    #[error("invalid master seed: {0}")]
    InvalidSeed(String),

    /// No wallet has been derived for the principal yet
    #[error("no wallet derived for principal: {0}")]
    NotFound(String),

    /// BIP32 derivation failed
    #[error("derivation failed: {0}")]
    Derivation(String),

    /// A persisted assignment does not re-derive to its recorded address,
    /// meaning the configured seed is not the one that minted it
    #[error("derived address mismatch for principal {principal}: master seed does not match persisted assignments")]
    SeedMismatch { principal: String },
}

impl WalletError {
    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            WalletError::InvalidSeed(_) => "INVALID_SEED",
            WalletError::NotFound(_) => "WALLET_NOT_FOUND",
            WalletError::Derivation(_) => "DERIVATION_ERROR",
            WalletError::SeedMismatch { .. } => "SEED_MISMATCH",
        }
    }
}

/// The master seed all deposit wallets derive from.
///
/// Holds 16-64 raw bytes (the BIP32 seed range). Debug output is redacted
/// to the fingerprint; the type deliberately implements no serde traits.
#[derive(Clone)]
pub struct MasterSeed {
    bytes: Vec<u8>,
}

impl MasterSeed {
    /// Parse a hex-encoded seed
    pub fn from_hex(hex_str: &str) -> Result<Self, WalletError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| WalletError::InvalidSeed(format!("not valid hex: {}", e)))?;
        Self::from_bytes(bytes)
    }

    /// Wrap raw seed bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, WalletError> {
        if bytes.len() < 16 || bytes.len() > 64 {
            return Err(WalletError::InvalidSeed(format!(
                "seed must be 16-64 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    /// Raw seed bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Short SHA-256 fingerprint, safe to log
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        hex::encode(&digest[..4])
    }
}

impl std::fmt::Debug for MasterSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterSeed(fingerprint={})", self.fingerprint())
    }
}

/// The public outcome of deriving a deposit wallet for a principal
#[derive(Debug, Clone, Serialize)]
pub struct DerivedWallet {
    /// Derivation index under the account path
    pub index: u32,
    /// P2WPKH deposit address
    pub address: String,
    /// Compressed public key, hex-encoded
    pub public_key: String,
}

/// Engine state guarded by the allocation lock
struct DerivationState {
    next_index: u32,
    assignments: HashMap<String, DerivedWallet>,
}

/// Derives one unique deposit wallet per principal from the master seed.
///
/// Index allocation is single-writer: the state mutex is held across
/// lookup-then-derive, so two concurrent calls for a never-seen principal
/// both come back with the address minted by whichever ran first.
pub struct KeyDerivationEngine {
    secp: Secp256k1<All>,
    master: Xpriv,
    network: Network,
    base_path: DerivationPath,
    state: Mutex<DerivationState>,
}

impl KeyDerivationEngine {
    /// Build the engine from the master seed for a network
    pub fn new(seed: &MasterSeed, network: config::Network) -> Result<Self, WalletError> {
        let secp = Secp256k1::new();
        let btc_network = network.bitcoin_network();
        let master = Xpriv::new_master(btc_network, seed.as_bytes())
            .map_err(|e| WalletError::Derivation(e.to_string()))?;

        let base_path =
            DerivationPath::from_str(&format!("m/84'/{}'/0'/0", network.coin_type()))
                .map_err(|e| WalletError::Derivation(e.to_string()))?;

        Ok(Self {
            secp,
            master,
            network: btc_network,
            base_path,
            state: Mutex::new(DerivationState {
                next_index: 0,
                assignments: HashMap::new(),
            }),
        })
    }

    /// Derive (or return the already-derived) deposit wallet for a principal.
    ///
    /// Idempotent: a repeat call never mints a new address.
    pub async fn derive_for_user(&self, principal: &str) -> Result<DerivedWallet, WalletError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.assignments.get(principal) {
            return Ok(existing.clone());
        }

        let index = state.next_index;
        let (_, public_key, address) = self.derive_at_index(index)?;

        let wallet = DerivedWallet {
            index,
            address: address.to_string(),
            public_key: hex::encode(public_key.to_bytes()),
        };
        state.assignments.insert(principal.to_string(), wallet.clone());
        state.next_index += 1;

        tracing::info!(
            target: "btcopts::wallet",
            principal = %principal,
            index,
            address = %wallet.address,
            "deposit wallet derived"
        );

        Ok(wallet)
    }

    /// Export the principal's private key in WIF.
    ///
    /// Administrative/debug path only; fails with `NotFound` until a wallet
    /// has been derived for the principal.
    pub async fn export_private_key(&self, principal: &str) -> Result<String, WalletError> {
        let index = {
            let state = self.state.lock().await;
            state
                .assignments
                .get(principal)
                .map(|w| w.index)
                .ok_or_else(|| WalletError::NotFound(principal.to_string()))?
        };

        let (private_key, _, _) = self.derive_at_index(index)?;
        Ok(private_key.to_wif())
    }

    /// Look up the assignment for a principal without deriving
    pub async fn assignment(&self, principal: &str) -> Option<DerivedWallet> {
        let state = self.state.lock().await;
        state.assignments.get(principal).cloned()
    }

    /// Number of assigned wallets
    pub async fn assignment_count(&self) -> usize {
        let state = self.state.lock().await;
        state.assignments.len()
    }

    /// Re-register a persisted assignment at startup.
    ///
    /// Re-derives the wallet at the recorded index and verifies it still
    /// produces the recorded address; a mismatch means the process was
    /// started with the wrong master seed and must not serve.
    pub async fn restore_assignment(
        &self,
        principal: &str,
        index: u32,
        expected_address: &str,
    ) -> Result<DerivedWallet, WalletError> {
        let (_, public_key, address) = self.derive_at_index(index)?;
        let address = address.to_string();
        if address != expected_address {
            return Err(WalletError::SeedMismatch {
                principal: principal.to_string(),
            });
        }

        let wallet = DerivedWallet {
            index,
            address,
            public_key: hex::encode(public_key.to_bytes()),
        };

        let mut state = self.state.lock().await;
        state.assignments.insert(principal.to_string(), wallet.clone());
        if index >= state.next_index {
            state.next_index = index + 1;
        }

        Ok(wallet)
    }

    /// Drop all assignments (administrative reset path)
    pub async fn reset_assignments(&self) {
        let mut state = self.state.lock().await;
        state.assignments.clear();
        state.next_index = 0;
    }

    /// Derive the key material at one index under the account path
    fn derive_at_index(
        &self,
        index: u32,
    ) -> Result<(PrivateKey, CompressedPublicKey, Address), WalletError> {
        let child = ChildNumber::from_normal_idx(index)
            .map_err(|e| WalletError::Derivation(e.to_string()))?;
        let path = self.base_path.child(child);

        let xpriv = self
            .master
            .derive_priv(&self.secp, &path)
            .map_err(|e| WalletError::Derivation(e.to_string()))?;

        let private_key = PrivateKey::new(xpriv.private_key, self.network);
        let public_key = CompressedPublicKey::from_private_key(&self.secp, &private_key)
            .map_err(|e| WalletError::Derivation(e.to_string()))?;
        let address = Address::p2wpkh(&public_key, self.network);

        Ok((private_key, public_key, address))
    }
}
