//! End-to-end scenarios for the carrier transport live under `tests/`.
