use std::str::FromStr;

use crate::transfer::partition::PartitionSpec;

pub fn parse_partition(value: &str) -> Result<PartitionSpec, String> {
    PartitionSpec::from_str(value).map_err(|e| e.to_string())
}
