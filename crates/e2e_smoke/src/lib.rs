//! End-to-end smoke tests against a live MongoDB live under `tests/`.
