//! End-to-end scenarios live in tests/; this crate is intentionally empty.
