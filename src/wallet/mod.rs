//! Operator wallet.
//!
//! Derives a single P2WPKH signing key from a BIP-39 mnemonic and exposes
//! the two signing operations the marketplace needs: PSBT input signing
//! ([`psbt`]) and challenge/bid message signing ([`message`]).
//!
//! The private key never leaves this module. `Debug` output is redacted.

pub mod message;
pub mod psbt;

use bip39::Mnemonic;
use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::secp256k1::{All, PublicKey as SecpPublicKey, Secp256k1, SecretKey};
use bitcoin::{Address, CompressedPublicKey, Network, ScriptBuf};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::str::FromStr;
use tracing::info;

pub use psbt::{SighashPolicy, SignedArtifact};

/// BIP-84 first receive address.
pub const DEFAULT_DERIVATION_PATH: &str = "m/84'/0'/0'/0/0";

/// Errors raised while deriving keys or signing.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("input index {index} out of range (template has {inputs} inputs)")]
    InputOutOfRange { index: usize, inputs: usize },

    #[error("input {index} has no spend metadata (witness or previous transaction)")]
    MissingSpendMetadata { index: usize },

    #[error("input {index} spends an unsupported script type: {kind}")]
    UnsupportedScript { index: usize, kind: String },

    #[error("input {index} is not controlled by this wallet")]
    ForeignInput { index: usize },

    #[error("malformed template: {0}")]
    MalformedTemplate(String),

    #[error("sighash computation failed for input {index}: {message}")]
    Sighash { index: usize, message: String },

    #[error("key error: {0}")]
    Key(String),
}

/// Public half of the operator wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletIdentity {
    pub address: Address,
    pub public_key: CompressedPublicKey,
    pub derivation_path: DerivationPath,
}

impl WalletIdentity {
    /// Hex-encoded compressed public key, as sent to the marketplace.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.to_bytes())
    }

    /// Output script paying to this wallet.
    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }
}

/// Signing wallet derived from the operator's mnemonic.
pub struct Wallet {
    identity: WalletIdentity,
    secret: SecretKey,
    secp: Secp256k1<All>,
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.identity.address.to_string())
            .field("derivation_path", &self.identity.derivation_path.to_string())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl Wallet {
    /// Derive the wallet from a mnemonic and BIP-32 path.
    pub fn from_mnemonic(phrase: &SecretString, path: &str) -> Result<Self, SigningError> {
        let mnemonic = Mnemonic::parse_normalized(phrase.expose_secret().trim())
            .map_err(|e| SigningError::Key(format!("invalid seed phrase: {e}")))?;
        let seed = mnemonic.to_seed("");

        let derivation_path = DerivationPath::from_str(path)
            .map_err(|e| SigningError::Key(format!("invalid derivation path {path}: {e}")))?;

        let secp = Secp256k1::new();
        let master = Xpriv::new_master(Network::Bitcoin, &seed)
            .map_err(|e| SigningError::Key(e.to_string()))?;
        let child = master
            .derive_priv(&secp, &derivation_path)
            .map_err(|e| SigningError::Key(e.to_string()))?;

        let secret = child.private_key;
        let public_key = CompressedPublicKey(SecpPublicKey::from_secret_key(&secp, &secret));
        let address = Address::p2wpkh(&public_key, Network::Bitcoin);

        info!(address = %address, path = %derivation_path, "Wallet derived");

        Ok(Self {
            identity: WalletIdentity {
                address,
                public_key,
                derivation_path,
            },
            secret,
            secp,
        })
    }

    pub fn identity(&self) -> &WalletIdentity {
        &self.identity
    }

    /// Bech32 address string.
    pub fn address(&self) -> String {
        self.identity.address.to_string()
    }

    pub fn public_key_hex(&self) -> String {
        self.identity.public_key_hex()
    }

    /// Sign a marketplace challenge. Hex challenges are signed as raw bytes.
    pub fn sign_challenge(&self, challenge: &str) -> String {
        let bytes = message::challenge_bytes(challenge);
        message::sign_message(&self.secp, &self.secret, &bytes)
    }

    /// Sign an arbitrary UTF-8 message (e.g. a bidding message).
    pub fn sign_text(&self, text: &str) -> String {
        message::sign_message(&self.secp, &self.secret, text.as_bytes())
    }

    /// Sign the given inputs of a base64 PSBT template.
    pub fn sign_psbt_base64(
        &self,
        template: &str,
        indices: &[usize],
        policy: SighashPolicy,
    ) -> Result<SignedArtifact, SigningError> {
        let psbt = psbt::decode_base64(template)?;
        self.signer().sign(psbt, indices, policy)
    }

    /// Signer bound to this wallet's key.
    pub fn signer(&self) -> psbt::PsbtSigner<'_> {
        psbt::PsbtSigner::new(&self.secp, &self.secret, self.identity.public_key)
    }
}
