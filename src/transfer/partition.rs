//! Partition download: several cooperating instances split one listing
//! between them by hashing keys.

use std::fmt;
use std::str::FromStr;

use crate::types::error::S3bulkError;

const FNV1_64_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV1_64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1 (multiply, then xor) 64-bit hash.
pub fn fnv1_64(data: &[u8]) -> u64 {
    data.iter().fold(FNV1_64_OFFSET_BASIS, |hash, byte| {
        hash.wrapping_mul(FNV1_64_PRIME) ^ u64::from(*byte)
    })
}

/// `index:total`, 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionSpec {
    index: u64,
    total: u64,
}

impl PartitionSpec {
    pub fn new(index: u64, total: u64) -> Result<Self, S3bulkError> {
        if index < 1 || total < index {
            return Err(S3bulkError::InvalidPartition(format!("{index}:{total}")));
        }
        Ok(Self { index, total })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Whether this instance owns `key`.
    pub fn owns(&self, key: &str) -> bool {
        fnv1_64(key.as_bytes()) % self.total == self.index - 1
    }
}

impl FromStr for PartitionSpec {
    type Err = S3bulkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || S3bulkError::InvalidPartition(value.to_string());

        let (index, total) = value.split_once(':').ok_or_else(invalid)?;
        let index = index.parse::<i64>().map_err(|_| invalid())?;
        let total = total.parse::<i64>().map_err(|_| invalid())?;
        if index < 1 || total < index {
            return Err(invalid());
        }

        Ok(Self {
            index: index as u64,
            total: total as u64,
        })
    }
}

impl fmt::Display for PartitionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.total)
    }
}
