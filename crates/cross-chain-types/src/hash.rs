//! Hashes, arbitrator keys and program hashes
//!
//! All of these render as base58 strings in JSON and logs. Program hashes
//! render as addresses: `base58(program_hash || checksum)` where the checksum
//! is the first four bytes of blake3 over the program hash.

use crate::{error::TypesError, opcode, prefix};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const ADDRESS_CHECKSUM_LEN: usize = 4;

/// Serialize through `Display` and deserialize through `FromStr`
macro_rules! impl_string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <String as Deserialize>::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], TypesError> {
    let bytes = bs58::decode(s)
        .into_vec()
        .map_err(|e| TypesError::InvalidEncoding(e.to_string()))?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| TypesError::InvalidLength {
        expected: N,
        actual: bytes.len(),
    })
}

/// 32-byte transaction or block hash
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// blake3 digest of `data`
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self)
    }
}

impl FromStr for Hash256 {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<32>(s).map(Self)
    }
}

impl_string_serde!(Hash256);

/// Arbitrator public key (ed25519, 32 bytes)
///
/// Ordering is byte-lexicographic; it is the canonical order for redeem
/// scripts and merged signatures.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Decode a key from attribute or script bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypesError> {
        <[u8; 32]>::try_from(bytes)
            .map(Self)
            .map_err(|_| TypesError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            })
    }

    /// First eight base58 characters, for logs
    pub fn short(&self) -> String {
        let mut s = self.to_string();
        s.truncate(8);
        s
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

impl FromStr for PublicKey {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<32>(s).map(Self)
    }
}

impl_string_serde!(PublicKey);

/// Detached ed25519 signature
#[derive(Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", bs58::encode(self.0).into_string())
    }
}

/// 21-byte program hash: one prefix byte plus the first 20 bytes of blake3
/// over the program code
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize)]
pub struct ProgramHash(pub [u8; 21]);

impl ProgramHash {
    pub const fn new(bytes: [u8; 21]) -> Self {
        Self(bytes)
    }

    /// Hash a program's code under the given prefix
    pub fn from_code(prefix: u8, code: &[u8]) -> Self {
        let digest = blake3::hash(code);
        let mut bytes = [0u8; 21];
        bytes[0] = prefix;
        bytes[1..].copy_from_slice(&digest.as_bytes()[..20]);
        Self(bytes)
    }

    /// Program hash of a single-key account
    pub fn standard(key: &PublicKey) -> Self {
        let mut code = Vec::with_capacity(34);
        code.push(opcode::PUSH32);
        code.extend_from_slice(key.as_bytes());
        code.push(opcode::CHECKSIG);
        Self::from_code(prefix::STANDARD, &code)
    }

    /// Program hash of an M-of-N redeem script
    pub fn multisig(redeem_script: &[u8]) -> Self {
        Self::from_code(prefix::MULTISIG, redeem_script)
    }

    /// Custodial address of a side chain, derived from its genesis block hash
    pub fn genesis(genesis_block_hash: &Hash256) -> Self {
        let mut code = Vec::with_capacity(34);
        code.push(opcode::PUSH32);
        code.extend_from_slice(genesis_block_hash.as_bytes());
        code.push(opcode::CROSSCHAIN);
        Self::from_code(prefix::CROSSCHAIN, &code)
    }

    pub fn prefix(&self) -> u8 {
        self.0[0]
    }

    pub fn as_bytes(&self) -> &[u8; 21] {
        &self.0
    }

    fn checksum(&self) -> [u8; ADDRESS_CHECKSUM_LEN] {
        let digest = blake3::hash(&self.0);
        let mut out = [0u8; ADDRESS_CHECKSUM_LEN];
        out.copy_from_slice(&digest.as_bytes()[..ADDRESS_CHECKSUM_LEN]);
        out
    }

    /// Encode as an address string
    pub fn to_address(&self) -> String {
        let mut data = Vec::with_capacity(21 + ADDRESS_CHECKSUM_LEN);
        data.extend_from_slice(&self.0);
        data.extend_from_slice(&self.checksum());
        bs58::encode(data).into_string()
    }

    /// Decode and verify an address string
    pub fn from_address(address: &str) -> Result<Self, TypesError> {
        let raw = decode_fixed::<{ 21 + ADDRESS_CHECKSUM_LEN }>(address)?;
        let mut bytes = [0u8; 21];
        bytes.copy_from_slice(&raw[..21]);
        let hash = Self(bytes);
        if raw[21..] != hash.checksum() {
            return Err(TypesError::ChecksumMismatch);
        }
        Ok(hash)
    }
}

impl fmt::Display for ProgramHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_address())
    }
}

impl fmt::Debug for ProgramHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProgramHash({})", self.to_address())
    }
}

impl FromStr for ProgramHash {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_address(s)
    }
}

impl_string_serde!(ProgramHash);
