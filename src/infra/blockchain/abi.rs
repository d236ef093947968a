//! Minimal ABI encoding for the token contract calls this service makes and watches.

use sha3::{Digest, Keccak256};

use crate::domain::{AppError, ContractCall, normalize_address};

const WORD: usize = 32;

/// Token methods recognised in transaction input
const KNOWN_METHODS: [(&str, &str, bool); 8] = [
    ("transfer", "transfer(address,uint256)", false),
    ("transferFrom", "transferFrom(address,address,uint256)", false),
    ("approve", "approve(address,uint256)", false),
    ("reward", "reward(address,uint256)", false),
    ("initializeAccount", "initializeAccount(address,uint256)", true),
    ("transformToVested", "transformToVested(address,uint256)", true),
    ("approveAccount", "approveAccount(address)", true),
    ("disapproveAccount", "disapproveAccount(address)", true),
];

/// Value passed to [`encode_call`]
#[derive(Debug, Clone, Copy)]
pub enum AbiArg<'a> {
    Address(&'a str),
    Uint(u128),
}

/// First 4 bytes of `keccak256(signature)`
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Hex-encoded call data for `signature` with `args`.
pub fn encode_call(signature: &str, args: &[AbiArg<'_>]) -> Result<String, AppError> {
    let mut data = Vec::with_capacity(4 + WORD * args.len());
    data.extend_from_slice(&selector(signature));
    for arg in args {
        let mut word = [0u8; WORD];
        match arg {
            AbiArg::Address(address) => {
                let canonical = normalize_address(address).ok_or_else(|| {
                    AppError::invalid_field("address", format!("malformed address {}", address))
                })?;
                let bytes = hex::decode(&canonical[2..])
                    .map_err(|e| AppError::invalid_field("address", e.to_string()))?;
                word[WORD - bytes.len()..].copy_from_slice(&bytes);
            }
            AbiArg::Uint(value) => {
                word[WORD - 16..].copy_from_slice(&value.to_be_bytes());
            }
        }
        data.extend_from_slice(&word);
    }
    Ok(format!("0x{}", hex::encode(data)))
}

fn decode_hex(data: &str) -> Option<Vec<u8>> {
    let body = data.trim().strip_prefix("0x").unwrap_or(data.trim());
    hex::decode(body).ok()
}

fn word_at(bytes: &[u8], index: usize) -> Option<&[u8]> {
    bytes.get(index * WORD..(index + 1) * WORD)
}

fn word_to_address(word: &[u8]) -> Option<String> {
    if word[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(format!("0x{}", hex::encode(&word[12..])))
}

fn word_to_uint(word: &[u8]) -> Option<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        return None;
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&word[16..]);
    Some(u128::from_be_bytes(buf))
}

/// Reads a single `uint256` return value.
pub fn decode_uint(data: &str) -> Result<u128, AppError> {
    decode_hex(data)
        .as_deref()
        .and_then(|bytes| word_at(bytes, 0))
        .and_then(word_to_uint)
        .ok_or_else(|| AppError::invalid_field("result", format!("not a uint256: {}", data)))
}

/// Reads a single `bool` return value.
pub fn decode_bool(data: &str) -> Result<bool, AppError> {
    decode_uint(data).map(|v| v != 0)
}

/// Decodes call data of a known token method. Unknown selectors and
/// truncated arguments yield `None`.
#[must_use]
pub fn decode_call(input: &str) -> Option<ContractCall> {
    let bytes = decode_hex(input)?;
    if bytes.len() < 4 {
        return None;
    }
    let (head, args) = bytes.split_at(4);
    let (method, signature, admin) = KNOWN_METHODS
        .iter()
        .find(|(_, signature, _)| selector(signature) == head)?;

    let call = match *method {
        "transferFrom" => ContractCall {
            method: method.to_string(),
            from: Some(word_to_address(word_at(args, 0)?)?),
            to: Some(word_to_address(word_at(args, 1)?)?),
            amount: word_to_uint(word_at(args, 2)?)?,
            admin: *admin,
        },
        _ if signature.ends_with("(address)") => ContractCall {
            method: method.to_string(),
            from: None,
            to: Some(word_to_address(word_at(args, 0)?)?),
            amount: 0,
            admin: *admin,
        },
        _ => ContractCall {
            method: method.to_string(),
            from: None,
            to: Some(word_to_address(word_at(args, 0)?)?),
            amount: word_to_uint(word_at(args, 1)?)?,
            admin: *admin,
        },
    };
    Some(call)
}
