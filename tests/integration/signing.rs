//! Listing template signing, end to end through the public wallet API.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use secrecy::SecretString;

use satmaker::wallet::message::{challenge_bytes, verify_message};
use satmaker::wallet::psbt::{decode_base64, encode_base64};
use satmaker::wallet::{SighashPolicy, SigningError, Wallet, DEFAULT_DERIVATION_PATH};

const MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

fn wallet() -> Wallet {
    Wallet::from_mnemonic(&SecretString::new(MNEMONIC.to_string()), DEFAULT_DERIVATION_PATH).unwrap()
}

fn input(seed: u8) -> TxIn {
    TxIn {
        previous_output: OutPoint { txid: Txid::from_byte_array([seed; 32]), vout: 0 },
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    }
}

/// Template whose inputs spend the given scripts, one output per input.
fn template(spends: &[&ScriptBuf]) -> Psbt {
    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: (0..spends.len()).map(|i| input(i as u8 + 1)).collect(),
        output: spends
            .iter()
            .enumerate()
            .map(|(i, spk)| TxOut { value: Amount::from_sat(150_000 + i as u64), script_pubkey: (*spk).clone() })
            .collect(),
    };
    let mut psbt = Psbt::from_unsigned_tx(tx).unwrap();
    for (i, spk) in spends.iter().enumerate() {
        psbt.inputs[i].witness_utxo = Some(TxOut { value: Amount::from_sat(546), script_pubkey: (*spk).clone() });
    }
    psbt
}

fn strip_signatures(mut psbt: Psbt) -> Psbt {
    for input in &mut psbt.inputs {
        input.partial_sigs.clear();
    }
    psbt
}

#[test]
fn test_signing_inputs_separately_equals_signing_together() {
    let wallet = wallet();
    let spk = wallet.identity().script_pubkey();
    let base64 = encode_base64(&template(&[&spk, &spk]));

    let first = wallet.sign_psbt_base64(&base64, &[0], SighashPolicy::Secure).unwrap();
    let both_stepwise = wallet.sign_psbt_base64(&first.to_base64(), &[1], SighashPolicy::Secure).unwrap();
    let both_at_once = wallet.sign_psbt_base64(&base64, &[1, 0], SighashPolicy::Secure).unwrap();

    assert_eq!(both_stepwise.psbt.serialize(), both_at_once.psbt.serialize());
    assert_eq!(
        both_at_once.signed_inputs,
        vec![(0, EcdsaSighashType::AllPlusAnyoneCanPay), (1, EcdsaSighashType::AllPlusAnyoneCanPay)]
    );
}

#[test]
fn test_signing_only_adds_partial_signatures() {
    let wallet = wallet();
    let spk = wallet.identity().script_pubkey();
    let unsigned = template(&[&spk]);

    let signed = wallet
        .sign_psbt_base64(&encode_base64(&unsigned), &[0], SighashPolicy::Exclusive)
        .unwrap();
    let round_trip = decode_base64(&signed.to_base64()).unwrap();
    assert_eq!(round_trip.inputs[0].partial_sigs.len(), 1);
    assert_eq!(strip_signatures(round_trip), unsigned);
}

#[test]
fn test_foreign_input_rejects_whole_request() {
    let wallet = wallet();
    let ours = wallet.identity().script_pubkey();
    let theirs = ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array([7u8; 20]));
    let unsigned = template(&[&ours, &theirs]);

    let mut psbt = unsigned.clone();
    let err = wallet.signer().sign_in_place(&mut psbt, &[0, 1], SighashPolicy::Secure).unwrap_err();
    assert!(matches!(err, SigningError::ForeignInput { index: 1 }));
    // Input 0 was valid but must not have been signed either.
    assert_eq!(psbt, unsigned);
}

#[test]
fn test_listing_signature_survives_buyer_additions() {
    let wallet = wallet();
    let spk = wallet.identity().script_pubkey();
    let signed = wallet
        .sign_psbt_base64(&encode_base64(&template(&[&spk])), &[0], SighashPolicy::Exclusive)
        .unwrap();

    let key = PublicKey::from(wallet.identity().public_key);
    let signature = signed.psbt.inputs[0].partial_sigs[&key];
    assert_eq!(signature.sighash_type, EcdsaSighashType::SinglePlusAnyoneCanPay);
    assert_eq!(*signature.serialize().last().unwrap(), 0x83);

    // The buyer appends a funding input and a payment output.
    let mut completed = signed.psbt.unsigned_tx.clone();
    completed.input.push(input(9));
    completed.output.push(TxOut {
        value: Amount::from_sat(5_000),
        script_pubkey: ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array([9u8; 20])),
    });

    let digest = SighashCache::new(&completed)
        .p2wpkh_signature_hash(0, &spk, Amount::from_sat(546), EcdsaSighashType::SinglePlusAnyoneCanPay)
        .unwrap();
    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(
        &Message::from_digest(digest.to_byte_array()),
        &signature.signature,
        &wallet.identity().public_key.0,
    )
    .unwrap();
}

#[test]
fn test_challenge_signature_verifies_for_wallet_address() {
    let wallet = wallet();
    let challenge = "6368616c6c656e6765";
    let signature = wallet.sign_challenge(challenge);

    assert!(verify_message(&wallet.address(), &challenge_bytes(challenge), &signature));
    assert!(verify_message(&wallet.address(), b"challenge", &signature));
    assert!(!verify_message(&wallet.address(), b"something else", &signature));
}
