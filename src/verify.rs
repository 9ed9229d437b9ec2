//! Read-back verification of written records.
use crate::error::{Error, Result};

/// Exact comparison of two encoded records. No tolerance.
pub fn verify(expected: &str, actual: &str) -> bool {
    expected == actual
}

/// Like [`verify`], failing with [`Error::Verification`] on mismatch.
pub fn ensure_verified(address: u16, expected: &str, actual: &str) -> Result<()> {
    if verify(expected, actual) {
        Ok(())
    } else {
        Err(Error::Verification {
            address,
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify() {
        assert!(verify(":02123400AABB53", ":02123400AABB53"));
        assert!(!verify(":02123400AABB53", ":02123400AABA54"));
        assert!(!verify(":02123400AABB53", ""));
    }

    #[test]
    fn test_ensure_verified() {
        assert!(ensure_verified(0x1234, ":00", ":00").is_ok());
        match ensure_verified(0x1234, ":01", ":02") {
            Err(Error::Verification {
                address,
                expected,
                actual,
            }) => {
                assert_eq!(address, 0x1234);
                assert_eq!(expected, ":01");
                assert_eq!(actual, ":02");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
