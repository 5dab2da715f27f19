//! Transaction assembly helpers
//!
//! Signing router-assembled transactions, compiling the manual-build
//! fallback with lookup tables, and account cleanup instructions.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_sdk::address_lookup_table::state::AddressLookupTable;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::address_lookup_table::AddressLookupTableAccount;
use solana_sdk::message::{v0, VersionedMessage};
use solana_sdk::packet::PACKET_DATA_SIZE;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use spl_token::instruction::TokenInstruction;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::exchange::signer::TradeSigner;
use crate::exchange::types::RouterInstruction;
use crate::resilience::ErrorKind;

/// Decode a base64 router transaction (versioned or legacy)
pub fn decode_transaction(encoded: &str) -> Result<VersionedTransaction> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| Error::Deserialization(format!("swap transaction base64: {}", e)))?;
    Ok(bincode::deserialize(&bytes)?)
}

/// Sign `tx` in the signer's required-signature slot
pub fn sign_transaction(
    mut tx: VersionedTransaction,
    signer: &dyn TradeSigner,
) -> Result<VersionedTransaction> {
    let address = signer.address();
    let required = tx.message.header().num_required_signatures as usize;
    let index = tx
        .message
        .static_account_keys()
        .iter()
        .take(required)
        .position(|key| *key == address)
        .ok_or_else(|| Error::Signing(format!("{} is not a required signer", address)))?;

    let signature = signer.sign_bytes(&tx.message.serialize())?;
    if tx.signatures.len() < required {
        tx.signatures.resize(required, Signature::default());
    }
    tx.signatures[index] = signature;
    Ok(tx)
}

/// Reject transactions that exceed the packet limit
pub fn ensure_fits(tx: &VersionedTransaction) -> Result<usize> {
    let size = bincode::serialized_size(tx)? as usize;
    if size > PACKET_DATA_SIZE {
        return Err(Error::classified(
            ErrorKind::TxTooLarge,
            format!("transaction is {} bytes, limit {}", size, PACKET_DATA_SIZE),
        ));
    }
    Ok(size)
}

/// Convert a router instruction into a native instruction
pub fn to_instruction(ix: &RouterInstruction) -> Result<Instruction> {
    let program_id = parse_pubkey(&ix.program_id)?;
    let accounts = ix
        .accounts
        .iter()
        .map(|meta| {
            let pubkey = parse_pubkey(&meta.pubkey)?;
            Ok(if meta.is_writable {
                AccountMeta::new(pubkey, meta.is_signer)
            } else {
                AccountMeta::new_readonly(pubkey, meta.is_signer)
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let data = STANDARD
        .decode(&ix.data)
        .map_err(|e| Error::Deserialization(format!("instruction data: {}", e)))?;
    Ok(Instruction {
        program_id,
        accounts,
        data,
    })
}

/// Decode an on-chain address lookup table account
pub fn parse_lookup_table(key: Pubkey, data: &[u8]) -> Result<AddressLookupTableAccount> {
    let table = AddressLookupTable::deserialize(data)
        .map_err(|e| Error::TransactionBuild(format!("lookup table {}: {}", key, e)))?;
    Ok(AddressLookupTableAccount {
        key,
        addresses: table.addresses.to_vec(),
    })
}

/// Compile an unsigned v0 transaction from raw instructions
pub fn compile_v0(
    payer: &Pubkey,
    instructions: &[Instruction],
    lookup_tables: &[AddressLookupTableAccount],
    blockhash: Hash,
) -> Result<VersionedTransaction> {
    let message = v0::Message::try_compile(payer, instructions, lookup_tables, blockhash)
        .map_err(|e| Error::TransactionBuild(format!("v0 compile: {}", e)))?;
    let required = message.header.num_required_signatures as usize;
    Ok(VersionedTransaction {
        signatures: vec![Signature::default(); required],
        message: VersionedMessage::V0(message),
    })
}

/// Close an empty token account, returning its rent to `destination`.
/// Built by hand so it works for both the classic and the 2022 program.
pub fn close_account_ix(
    token_program: &Pubkey,
    account: &Pubkey,
    destination: &Pubkey,
    owner: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: *token_program,
        accounts: vec![
            AccountMeta::new(*account, false),
            AccountMeta::new(*destination, false),
            AccountMeta::new_readonly(*owner, true),
        ],
        data: TokenInstruction::CloseAccount.pack(),
    }
}

pub fn parse_pubkey(s: &str) -> Result<Pubkey> {
    Pubkey::from_str(s).map_err(|e| Error::TransactionBuild(format!("bad pubkey {}: {}", s, e)))
}
