//! Shard label computation.
//!
//! A shard label is a two letter string from `AA` to `ZZ` derived from a
//! document identifier. Sharding on the compound key `{shard: 1, _id: 1}`
//! spreads inserts across 676 buckets while the identifier keeps appending
//! monotonically inside each bucket.

use bson::{Bson, Document};

use crate::error::{VeneerError, VeneerResult};

/// Alphabet used for shard labels.
pub const SHARD_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Number of distinct two letter shard labels.
pub const SHARD_BUCKETS: u64 = 26 * 26;

/// Minimum width of an encoded label.
const LABEL_WIDTH: usize = 2;

/// Computes a shard label from a query or document specification.
///
/// Returning `Ok(None)` means the specification carries no shardable value.
pub type ShardFn = fn(&Document) -> VeneerResult<Option<String>>;

/// A shard function and the field its result is stored under.
#[derive(Debug, Clone, Copy)]
pub struct ShardSpec {
    function: ShardFn,
    field: &'static str,
}

impl ShardSpec {
    /// Create a shard spec from a function and a target field.
    pub const fn new(function: ShardFn, field: &'static str) -> Self {
        Self { function, field }
    }

    /// Shard on the `_id` field using [`object_id_shard`].
    pub const fn object_id(field: &'static str) -> Self {
        Self::new(object_id_shard, field)
    }

    /// The field the shard label is written to.
    pub fn field(&self) -> &'static str {
        self.field
    }

    /// Compute the shard label for a specification.
    pub fn compute(&self, spec: &Document) -> VeneerResult<Option<String>> {
        (self.function)(spec)
    }
}

/// Encode `number` in the base given by `alphabet`.
///
/// The result is left-padded with the alphabet's first symbol to at least two
/// characters, so `0` encodes to `"AA"` with the default alphabet.
pub fn base_encode(mut number: u64, alphabet: &str) -> String {
    let symbols: Vec<char> = alphabet.chars().collect();
    if symbols.len() < 2 {
        return String::new();
    }
    let base = symbols.len() as u64;

    let mut digits = Vec::new();
    while number > 0 {
        digits.push(symbols[(number % base) as usize]);
        number /= base;
    }
    while digits.len() < LABEL_WIDTH {
        digits.push(symbols[0]);
    }
    digits.iter().rev().collect()
}

/// [`base_encode`] with the `A`..`Z` alphabet.
pub fn base_encode_default(number: u64) -> String {
    base_encode(number, SHARD_ALPHABET)
}

/// Shard function deriving a label from the `_id` field.
///
/// The identifier's hexadecimal form is read as an integer, reduced modulo
/// 676 and encoded as two uppercase letters. Ids that are absent, empty or
/// neither an ObjectId nor a string produce no label.
pub fn object_id_shard(spec: &Document) -> VeneerResult<Option<String>> {
    let hex = match spec.get("_id") {
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        Some(Bson::String(s)) if !s.is_empty() => s.clone(),
        _ => return Ok(None),
    };

    let bucket = hex_mod(&hex, SHARD_BUCKETS)?;
    Ok(Some(base_encode_default(bucket)))
}

/// Reduce an arbitrarily long hex string modulo `modulus` without overflow.
fn hex_mod(hex: &str, modulus: u64) -> VeneerResult<u64> {
    hex.chars().try_fold(0u64, |acc, c| -> VeneerResult<u64> {
        let digit = c
            .to_digit(16)
            .ok_or_else(|| VeneerError::shard(format!("'{}' is not a hexadecimal id", hex)))?;
        Ok((acc * 16 + u64::from(digit)) % modulus)
    })
}
