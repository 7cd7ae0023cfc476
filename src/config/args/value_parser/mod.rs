pub mod human_bytes;
pub mod partition;
pub mod storage_path;
pub mod url;
