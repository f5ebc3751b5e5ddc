//! Bitcoin signed-message scheme used for marketplace authentication.
//!
//! Signatures are 65-byte compact recoverable ECDSA signatures, base64
//! encoded, with a header byte that names the address type:
//!
//! | header | address                  |
//! |--------|--------------------------|
//! | 27–30  | P2PKH, uncompressed key  |
//! | 31–34  | P2PKH, compressed key    |
//! | 35–38  | P2SH-P2WPKH              |
//! | 39–42  | P2WPKH                   |

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::address::NetworkUnchecked;
use bitcoin::consensus::encode::{serialize, VarInt};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::{Address, CompressedPublicKey, PublicKey, ScriptBuf, ScriptHash};

const MESSAGE_PREFIX: &[u8] = b"\x18Bitcoin Signed Message:\n";
const P2WPKH_HEADER: u8 = 39;

/// Double-SHA256 of the prefixed, length-tagged message.
pub fn signed_message_hash(message: &[u8]) -> [u8; 32] {
    let mut data = Vec::with_capacity(MESSAGE_PREFIX.len() + 9 + message.len());
    data.extend_from_slice(MESSAGE_PREFIX);
    data.extend_from_slice(&serialize(&VarInt(message.len() as u64)));
    data.extend_from_slice(message);
    sha256d::Hash::hash(&data).to_byte_array()
}

/// Bytes to sign for a marketplace challenge: hex challenges are decoded,
/// anything else is taken as UTF-8.
pub fn challenge_bytes(challenge: &str) -> Vec<u8> {
    let trimmed = challenge.trim();
    if !trimmed.is_empty() && trimmed.len() % 2 == 0 {
        if let Ok(bytes) = hex::decode(trimmed) {
            return bytes;
        }
    }
    trimmed.as_bytes().to_vec()
}

/// Sign `message` with a P2WPKH header. Returns base64.
pub fn sign_message(secp: &Secp256k1<All>, secret: &SecretKey, message: &[u8]) -> String {
    let digest = Message::from_digest(signed_message_hash(message));
    let signature = secp.sign_ecdsa_recoverable(&digest, secret);
    let (recovery_id, compact) = signature.serialize_compact();

    let mut out = [0u8; 65];
    out[0] = P2WPKH_HEADER + recovery_id.to_i32() as u8;
    out[1..].copy_from_slice(&compact);
    BASE64.encode(out)
}

/// Check that `signature` over `message` was produced by the key behind
/// `address`. Malformed input yields `false`.
pub fn verify_message(address: &str, message: &[u8], signature: &str) -> bool {
    recovered_script(message, signature)
        .zip(address_script(address))
        .map(|(recovered, expected)| recovered == expected)
        .unwrap_or(false)
}

fn address_script(address: &str) -> Option<ScriptBuf> {
    let unchecked: Address<NetworkUnchecked> = address.parse().ok()?;
    Some(unchecked.assume_checked().script_pubkey())
}

fn recovered_script(message: &[u8], signature: &str) -> Option<ScriptBuf> {
    let raw = BASE64.decode(signature.trim()).ok()?;
    if raw.len() != 65 {
        return None;
    }
    let header = raw[0];
    if !(27..=42).contains(&header) {
        return None;
    }

    let recovery_id = RecoveryId::from_i32(((header - 27) & 3) as i32).ok()?;
    let recoverable = RecoverableSignature::from_compact(&raw[1..], recovery_id).ok()?;
    let digest = Message::from_digest(signed_message_hash(message));
    let key = Secp256k1::verification_only().recover_ecdsa(&digest, &recoverable).ok()?;

    let script = match header {
        27..=30 => ScriptBuf::new_p2pkh(&PublicKey::new_uncompressed(key).pubkey_hash()),
        31..=34 => ScriptBuf::new_p2pkh(&PublicKey::new(key).pubkey_hash()),
        35..=38 => {
            let witness = ScriptBuf::new_p2wpkh(&CompressedPublicKey(key).wpubkey_hash());
            ScriptBuf::new_p2sh(&ScriptHash::hash(witness.as_bytes()))
        }
        _ => ScriptBuf::new_p2wpkh(&CompressedPublicKey(key).wpubkey_hash()),
    };
    Some(script)
}

/// Fields of the message signed with every bid creation.
#[derive(Debug, Clone, PartialEq)]
pub struct BiddingMessage<'a> {
    pub address: &'a str,
    pub public_key_hex: &'a str,
    /// Per-item price for collection bids, total price for token bids.
    pub price: u64,
    pub quantity: String,
    pub expiry_ms: i64,
    pub slug: &'a str,
    pub timestamp_ms: i64,
}

impl BiddingMessage<'_> {
    /// `payment:pubkey:receive:price:qty:expiry:slug:timestamp`; payment and
    /// receive address are both the wallet address.
    pub fn render(&self) -> String {
        format!(
            "{addr}:{pk}:{addr}:{price}:{qty}:{expiry}:{slug}:{ts}",
            addr = self.address,
            pk = self.public_key_hex,
            price = self.price,
            qty = self.quantity,
            expiry = self.expiry_ms,
            slug = self.slug,
            ts = self.timestamp_ms,
        )
    }
}
