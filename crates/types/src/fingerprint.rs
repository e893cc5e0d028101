//! Schema fingerprint for row-layout agreement.

use std::fmt;

/// A blake3 digest of a table's field declarations.
///
/// Two participants that declared the same fields, in the same order, with the
/// same types and lengths produce the same fingerprint. The fingerprint is
/// exchanged during the rendezvous barrier so a mismatched declaration order
/// fails fast at synchronization time instead of silently misinterpreting
/// remote row bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaFingerprint([u8; 32]);

impl SchemaFingerprint {
    /// Digest an encoded schema description.
    pub fn compute(encoded: &[u8]) -> Self {
        Self(*blake3::hash(encoded).as_bytes())
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
