//! End-to-end smoke tests for the scan service live in `tests/`.
