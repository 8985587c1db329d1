// SPDX-License-Identifier: Apache-2.0

//! Errors callers may want to tell apart via `anyhow::Error::downcast_ref`.

/// An external collaborator produced output that does not follow the line
/// protocol.
#[derive(Debug)]
pub struct OracleProtocolError {
    pub message: String,
    /// What the collaborator wrote to stderr, verbatim.
    pub stderr: String,
}

impl std::fmt::Display for OracleProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "oracle protocol error: {}", self.message)?;
        if !self.stderr.is_empty() {
            write!(f, "\nstderr:\n{}", self.stderr)?;
        }
        Ok(())
    }
}

impl std::error::Error for OracleProtocolError {}

/// The verifier rejected a candidate at a width the oracle had checked
/// exhaustively and reported sound.
#[derive(Debug)]
pub struct InconsistentVerdict {
    pub candidate: String,
    pub bitwidth: u32,
}

impl std::fmt::Display for InconsistentVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inconsistent verdict: oracle reported {} sound but the verifier found it unsound at bit-width {}",
            self.candidate, self.bitwidth
        )
    }
}

impl std::error::Error for InconsistentVerdict {}
