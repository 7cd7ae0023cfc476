//! Property-based tests for the include/exclude chain.
