//! Shared constants for integration tests

/// Signed-in user
pub const ALICE: &str = "0b7a9a52-4c2f-4c2e-8a55-2a1f5e3c9d01";

/// Second account on the same device
pub const BOB: &str = "5d3c1e77-9f2b-4e8a-b1c4-7e6a2d8f0b12";

/// Someone liking and following
pub const ACTOR: &str = "c4e2f1a0-3b5d-4a6c-9e8f-1d2c3b4a5e60";

/// Upper bound for waiting on background tracker work
pub const WAIT: std::time::Duration = std::time::Duration::from_secs(5);
