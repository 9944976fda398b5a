//! Utility module
//!
//! This module provides common helpers used throughout the library.

use std::fmt::Write;

/// Renders bytes as space separated hex pairs for trace logs
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x01, 0xab, 0x00]), "01 ab 00");
        assert_eq!(hex(&[]), "");
    }
}
