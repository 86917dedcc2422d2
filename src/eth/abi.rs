//! Solidity ABI encoding for the records contract.
//!
//! The contract exposes two entry points:
//!
//! ```text
//! function addRecord(address owner, string handle)
//! function getRecords(address owner) view returns (Record[])
//! struct Record { string ipfsHash; uint256 timestamp; }
//! ```
//!
//! Both directions are implemented so the in-memory ledger can speak the same
//! bytes as a real node. Decoding is bounds-checked throughout; a short or
//! inconsistent payload is `Malformed`, never a panic.

use super::address::{Address, ADDRESS_LEN};
use super::keccak256;
use crate::error::MedledgerError;

const WORD: usize = 32;

pub const ADD_RECORD_SIGNATURE: &str = "addRecord(address,string)";
pub const GET_RECORDS_SIGNATURE: &str = "getRecords(address)";

/// First four bytes of the Keccak-256 of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn word_from_uint(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

fn word_from_address(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - ADDRESS_LEN..].copy_from_slice(address.as_bytes());
    word
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

/// Length word followed by the bytes, right-padded to a word boundary.
fn encode_string_tail(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(WORD + padded_len(bytes.len()));
    out.extend_from_slice(&word_from_uint(bytes.len() as u64));
    out.extend_from_slice(bytes);
    out.resize(WORD + padded_len(bytes.len()), 0);
    out
}

/// Calldata for `addRecord(owner, handle)`.
pub fn encode_add_record(owner: &Address, handle: &str) -> Vec<u8> {
    let mut out = selector(ADD_RECORD_SIGNATURE).to_vec();
    out.extend_from_slice(&word_from_address(owner));
    out.extend_from_slice(&word_from_uint((2 * WORD) as u64));
    out.extend_from_slice(&encode_string_tail(handle));
    out
}

/// Calldata for `getRecords(owner)`.
pub fn encode_get_records(owner: &Address) -> Vec<u8> {
    let mut out = selector(GET_RECORDS_SIGNATURE).to_vec();
    out.extend_from_slice(&word_from_address(owner));
    out
}

/// Return data for `getRecords`: a single dynamic `(string,uint256)[]`.
pub fn encode_records(records: &[(String, u64)]) -> Vec<u8> {
    let tuples: Vec<Vec<u8>> = records
        .iter()
        .map(|(handle, timestamp)| {
            let mut tuple = Vec::new();
            tuple.extend_from_slice(&word_from_uint((2 * WORD) as u64));
            tuple.extend_from_slice(&word_from_uint(*timestamp));
            tuple.extend_from_slice(&encode_string_tail(handle));
            tuple
        })
        .collect();

    let mut out = Vec::new();
    out.extend_from_slice(&word_from_uint(WORD as u64));
    out.extend_from_slice(&word_from_uint(records.len() as u64));

    let mut offset = records.len() * WORD;
    for tuple in &tuples {
        out.extend_from_slice(&word_from_uint(offset as u64));
        offset += tuple.len();
    }
    for tuple in tuples {
        out.extend_from_slice(&tuple);
    }
    out
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn offset_add(base: usize, offset: usize) -> Result<usize, MedledgerError> {
    base.checked_add(offset)
        .ok_or_else(|| MedledgerError::malformed("abi offset overflow"))
}

fn read_word(data: &[u8], pos: usize) -> Result<&[u8], MedledgerError> {
    let end = offset_add(pos, WORD)?;
    data.get(pos..end)
        .ok_or_else(|| MedledgerError::malformed("abi payload truncated"))
}

fn read_u64(data: &[u8], pos: usize) -> Result<u64, MedledgerError> {
    let word = read_word(data, pos)?;
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(MedledgerError::malformed("abi integer exceeds 64 bits"));
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[WORD - 8..]);
    Ok(u64::from_be_bytes(tail))
}

fn read_offset(data: &[u8], pos: usize) -> Result<usize, MedledgerError> {
    usize::try_from(read_u64(data, pos)?).map_err(|_| MedledgerError::malformed("abi offset too large"))
}

fn read_address(data: &[u8], pos: usize) -> Result<Address, MedledgerError> {
    let word = read_word(data, pos)?;
    if word[..WORD - ADDRESS_LEN].iter().any(|b| *b != 0) {
        return Err(MedledgerError::malformed("abi address has dirty high bytes"));
    }
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes.copy_from_slice(&word[WORD - ADDRESS_LEN..]);
    Ok(Address::from_bytes(bytes))
}

fn read_string(data: &[u8], pos: usize) -> Result<String, MedledgerError> {
    let len = read_offset(data, pos)?;
    let start = offset_add(pos, WORD)?;
    let bytes = start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| MedledgerError::malformed("abi string truncated"))?;
    String::from_utf8(bytes.to_vec()).map_err(|_| MedledgerError::malformed("abi string is not utf-8"))
}

fn strip_selector<'a>(calldata: &'a [u8], signature: &str) -> Result<&'a [u8], MedledgerError> {
    match calldata.split_first_chunk::<4>() {
        Some((sel, rest)) if *sel == selector(signature) => Ok(rest),
        _ => Err(MedledgerError::malformed(format!("calldata is not {}", signature))),
    }
}

/// Decode the return data of `getRecords` into `(handle, timestamp)` pairs.
pub fn decode_records(data: &[u8]) -> Result<Vec<(String, u64)>, MedledgerError> {
    let array_start = read_offset(data, 0)?;
    let count = read_offset(data, array_start)?;
    let base = offset_add(array_start, WORD)?;

    // Each element needs at least an offset word; reject absurd counts early.
    if count > data.len() / WORD {
        return Err(MedledgerError::malformed("abi array length exceeds payload"));
    }

    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let slot = offset_add(base, i * WORD)?;
        let tuple_start = offset_add(base, read_offset(data, slot)?)?;
        let string_offset = read_offset(data, tuple_start)?;
        let timestamp = read_u64(data, offset_add(tuple_start, WORD)?)?;
        let handle = read_string(data, offset_add(tuple_start, string_offset)?)?;
        records.push((handle, timestamp));
    }
    Ok(records)
}

/// Decode `addRecord` calldata into `(owner, handle)`.
pub fn decode_add_record(calldata: &[u8]) -> Result<(Address, String), MedledgerError> {
    let args = strip_selector(calldata, ADD_RECORD_SIGNATURE)?;
    let owner = read_address(args, 0)?;
    let handle = read_string(args, read_offset(args, WORD)?)?;
    Ok((owner, handle))
}

/// Decode `getRecords` calldata into the owner address.
pub fn decode_get_records(calldata: &[u8]) -> Result<Address, MedledgerError> {
    let args = strip_selector(calldata, GET_RECORDS_SIGNATURE)?;
    read_address(args, 0)
}
