//! PSBT input signing.
//!
//! Signs marketplace-built templates without touching anything except the
//! `partial_sigs` map of the requested inputs. All requested inputs are
//! validated before the first signature is written, so a failed call leaves
//! the template exactly as it was.
//!
//! Supported spends:
//! - P2WPKH (BIP-143 sighash, needs `witness_utxo` or `non_witness_utxo`)
//! - P2PKH (legacy sighash, needs `non_witness_utxo`)
//!
//! Signatures are RFC 6979 deterministic, ground to a low R value and
//! normalized to low S.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{ecdsa::Signature, All, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, CompressedPublicKey, PublicKey, ScriptBuf};
use std::collections::BTreeSet;
use tracing::debug;

use super::SigningError;

// ---------------------------------------------------------------------------
// Policies and results
// ---------------------------------------------------------------------------

/// Which parts of the transaction a signature commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SighashPolicy {
    /// Own input plus the output at the same index (`SINGLE|ANYONECANPAY`).
    /// Used for listings: the buyer may add inputs and outputs freely.
    Exclusive,
    /// Every input and output (`ALL`).
    Inclusive,
    /// Own input plus every output (`ALL|ANYONECANPAY`).
    Secure,
}

impl SighashPolicy {
    pub fn sighash_type(&self) -> EcdsaSighashType {
        match self {
            SighashPolicy::Exclusive => EcdsaSighashType::SinglePlusAnyoneCanPay,
            SighashPolicy::Inclusive => EcdsaSighashType::All,
            SighashPolicy::Secure => EcdsaSighashType::AllPlusAnyoneCanPay,
        }
    }

    /// Sighash byte appended to the DER signature.
    pub fn flag(&self) -> u8 {
        self.sighash_type().to_u32() as u8
    }
}

/// A signed template, ready to hand back to the marketplace.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedArtifact {
    pub psbt: Psbt,
    /// Inputs signed by this call, ascending, with their sighash type.
    pub signed_inputs: Vec<(usize, EcdsaSighashType)>,
}

impl SignedArtifact {
    pub fn to_base64(&self) -> String {
        encode_base64(&self.psbt)
    }
}

pub fn decode_base64(template: &str) -> Result<Psbt, SigningError> {
    let bytes = BASE64
        .decode(template.trim())
        .map_err(|e| SigningError::MalformedTemplate(format!("invalid base64: {e}")))?;
    Psbt::deserialize(&bytes)
        .map_err(|e| SigningError::MalformedTemplate(format!("invalid PSBT: {e}")))
}

pub fn encode_base64(psbt: &Psbt) -> String {
    BASE64.encode(psbt.serialize())
}

/// True when `s` is in the lower half of the curve order.
pub fn is_low_s(sig: &Signature) -> bool {
    let mut normalized = *sig;
    normalized.normalize_s();
    normalized == *sig
}

/// True when `r` encodes in 32 bytes of DER without a sign-padding byte.
pub fn is_low_r(sig: &Signature) -> bool {
    sig.serialize_compact()[0] < 0x80
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// Resolved spend data for one input.
enum Spend {
    P2wpkh { script_pubkey: ScriptBuf, value: Amount },
    P2pkh { script_pubkey: ScriptBuf },
}

/// Signs PSBT inputs with a single key.
pub struct PsbtSigner<'a> {
    secp: &'a Secp256k1<All>,
    secret: &'a SecretKey,
    public_key: CompressedPublicKey,
    p2wpkh_script: ScriptBuf,
    p2pkh_script: ScriptBuf,
}

impl<'a> PsbtSigner<'a> {
    pub fn new(
        secp: &'a Secp256k1<All>,
        secret: &'a SecretKey,
        public_key: CompressedPublicKey,
    ) -> Self {
        Self {
            secp,
            secret,
            public_key,
            p2wpkh_script: ScriptBuf::new_p2wpkh(&public_key.wpubkey_hash()),
            p2pkh_script: ScriptBuf::new_p2pkh(&public_key.pubkey_hash()),
        }
    }

    /// Sign `indices` of an owned template and return the artifact.
    pub fn sign(
        &self,
        mut psbt: Psbt,
        indices: &[usize],
        policy: SighashPolicy,
    ) -> Result<SignedArtifact, SigningError> {
        let signed_inputs = self.sign_in_place(&mut psbt, indices, policy)?;
        Ok(SignedArtifact { psbt, signed_inputs })
    }

    /// Sign `indices` in place. On error the PSBT is left untouched.
    pub fn sign_in_place(
        &self,
        psbt: &mut Psbt,
        indices: &[usize],
        policy: SighashPolicy,
    ) -> Result<Vec<(usize, EcdsaSighashType)>, SigningError> {
        let sighash_type = policy.sighash_type();
        let requested: BTreeSet<usize> = indices.iter().copied().collect();

        let mut spends = Vec::with_capacity(requested.len());
        for &index in &requested {
            if policy == SighashPolicy::Exclusive && index >= psbt.unsigned_tx.output.len() {
                return Err(SigningError::Sighash {
                    index,
                    message: "SIGHASH_SINGLE input has no matching output".to_string(),
                });
            }
            spends.push((index, self.resolve_spend(psbt, index)?));
        }

        let mut signatures = Vec::with_capacity(spends.len());
        {
            let mut cache = SighashCache::new(&psbt.unsigned_tx);
            for (index, spend) in spends {
                let digest = match spend {
                    Spend::P2wpkh { script_pubkey, value } => cache
                        .p2wpkh_signature_hash(index, &script_pubkey, value, sighash_type)
                        .map_err(|e| SigningError::Sighash { index, message: e.to_string() })?
                        .to_byte_array(),
                    Spend::P2pkh { script_pubkey } => cache
                        .legacy_signature_hash(index, &script_pubkey, sighash_type.to_u32())
                        .map_err(|e| SigningError::Sighash { index, message: e.to_string() })?
                        .to_byte_array(),
                };
                signatures.push((index, self.sign_digest(digest)));
            }
        }

        let key = PublicKey::from(self.public_key);
        let mut signed = Vec::with_capacity(signatures.len());
        for (index, signature) in signatures {
            psbt.inputs[index]
                .partial_sigs
                .insert(key, ecdsa::Signature { signature, sighash_type });
            signed.push((index, sighash_type));
        }

        debug!(inputs = ?signed.iter().map(|(i, _)| *i).collect::<Vec<_>>(), flag = policy.flag(), "PSBT inputs signed");
        Ok(signed)
    }

    /// Deterministic low-R, low-S ECDSA signature over a 32-byte digest.
    pub fn sign_digest(&self, digest: [u8; 32]) -> Signature {
        let message = Message::from_digest(digest);
        let mut signature = self.secp.sign_ecdsa_low_r(&message, self.secret);
        signature.normalize_s();
        signature
    }

    fn resolve_spend(&self, psbt: &Psbt, index: usize) -> Result<Spend, SigningError> {
        let inputs = psbt.inputs.len().min(psbt.unsigned_tx.input.len());
        if index >= inputs {
            return Err(SigningError::InputOutOfRange { index, inputs });
        }
        let input = &psbt.inputs[index];

        let (script_pubkey, value) = if let Some(utxo) = &input.witness_utxo {
            (utxo.script_pubkey.clone(), utxo.value)
        } else if let Some(prev_tx) = &input.non_witness_utxo {
            let outpoint = psbt.unsigned_tx.input[index].previous_output;
            if prev_tx.compute_txid() != outpoint.txid {
                return Err(SigningError::MalformedTemplate(format!(
                    "input {index}: previous transaction does not match outpoint"
                )));
            }
            let prev_out = prev_tx
                .output
                .get(outpoint.vout as usize)
                .ok_or(SigningError::MissingSpendMetadata { index })?;
            (prev_out.script_pubkey.clone(), prev_out.value)
        } else {
            return Err(SigningError::MissingSpendMetadata { index });
        };

        if script_pubkey.is_p2wpkh() {
            if script_pubkey != self.p2wpkh_script {
                return Err(SigningError::ForeignInput { index });
            }
            Ok(Spend::P2wpkh { script_pubkey, value })
        } else if script_pubkey.is_p2pkh() {
            if input.non_witness_utxo.is_none() {
                return Err(SigningError::MissingSpendMetadata { index });
            }
            if script_pubkey != self.p2pkh_script {
                return Err(SigningError::ForeignInput { index });
            }
            Ok(Spend::P2pkh { script_pubkey })
        } else {
            Err(SigningError::UnsupportedScript {
                index,
                kind: describe_script(&script_pubkey),
            })
        }
    }
}

fn describe_script(script: &ScriptBuf) -> String {
    if script.is_p2tr() {
        "p2tr".to_string()
    } else if script.is_p2wsh() {
        "p2wsh".to_string()
    } else if script.is_p2sh() {
        "p2sh".to_string()
    } else {
        format!("script {}", script.to_hex_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
