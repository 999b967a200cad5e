//! Shared support code for the azdht integration tests and benches.
