//! # Client Revision Check
//!
//! The server's auth-info frame carries a version-check challenge the
//! client must answer before its keys are even looked at. Two routines
//! exist:
//!
//! - **Standard**: the challenge value string seeds three registers and
//!   lists a short op program; the program is folded over the words of the
//!   configured local game files and the final register value is the
//!   checksum.
//! - **Lockdown**: selected by the challenge filename; the client fetches a
//!   small archive over the file-transfer sub-protocol and derives a SHA-1
//!   digest from it instead of hashing local files.
//!
//! A challenge value string looks like:
//!
//! ```text
//! A=443747131 B=3328179921 C=1040998290 4 A=A^S B=B-C C=C^A A=A+B
//! ```

use sha1::{Digest, Sha1};

use crate::error::{ProtocolError, Result};

/// Register indices: the three accumulators plus the per-word input.
const REG_NAMES: [char; 4] = ['A', 'B', 'C', 'S'];

#[derive(Debug, Clone, Copy)]
struct Op {
    target: usize,
    left: usize,
    operator: char,
    right: usize,
}

/// Parsed standard-revision-check challenge.
#[derive(Debug, Clone)]
pub struct ChecksumFormula {
    seeds: [u32; 3],
    ops: Vec<Op>,
}

fn register_index(name: char) -> Result<usize> {
    REG_NAMES
        .iter()
        .position(|&r| r == name)
        .ok_or_else(|| ProtocolError::RevisionCheck(format!("unknown register '{name}'")))
}

impl ChecksumFormula {
    /// Parse the challenge value string from the auth-info frame.
    pub fn parse(value_string: &str) -> Result<Self> {
        let mut seeds = [0u32; 3];
        let mut ops = Vec::new();
        let mut declared_ops: Option<usize> = None;

        for token in value_string.split_whitespace() {
            if let Ok(count) = token.parse::<usize>() {
                if declared_ops.is_some() {
                    return Err(ProtocolError::RevisionCheck(
                        "duplicate op count".into(),
                    ));
                }
                declared_ops = Some(count);
                continue;
            }

            let (lhs, rhs) = token.split_once('=').ok_or_else(|| {
                ProtocolError::RevisionCheck(format!("malformed token '{token}'"))
            })?;
            let mut lhs_chars = lhs.chars();
            let target = lhs_chars
                .next()
                .ok_or_else(|| ProtocolError::RevisionCheck("empty assignment target".into()))
                .and_then(register_index)?;
            if lhs_chars.next().is_some() || target == 3 {
                return Err(ProtocolError::RevisionCheck(format!(
                    "invalid assignment target '{lhs}'"
                )));
            }

            if declared_ops.is_none() {
                // Seed section: plain integer on the right.
                seeds[target] = rhs.parse::<u32>().map_err(|_| {
                    ProtocolError::RevisionCheck(format!("bad seed value '{rhs}'"))
                })?;
            } else {
                // Op section: `X=Y?Z`.
                let mut chars = rhs.chars();
                let (left, operator, right) = match (chars.next(), chars.next(), chars.next()) {
                    (Some(l), Some(op), Some(r)) if chars.next().is_none() => (l, op, r),
                    _ => {
                        return Err(ProtocolError::RevisionCheck(format!(
                            "malformed op '{token}'"
                        )))
                    }
                };
                if !matches!(operator, '^' | '+' | '-' | '*' | '/') {
                    return Err(ProtocolError::RevisionCheck(format!(
                        "unknown operator '{operator}'"
                    )));
                }
                ops.push(Op {
                    target,
                    left: register_index(left)?,
                    operator,
                    right: register_index(right)?,
                });
            }
        }

        match declared_ops {
            Some(count) if count == ops.len() => Ok(Self { seeds, ops }),
            Some(count) => Err(ProtocolError::RevisionCheck(format!(
                "op count {count} does not match {} ops",
                ops.len()
            ))),
            None => Err(ProtocolError::RevisionCheck("missing op count".into())),
        }
    }

    /// Fold the op program over the little-endian words of each file image
    /// and return the final `C` register. Trailing bytes that do not fill a
    /// word are ignored, as the legacy check does.
    pub fn checksum<T: AsRef<[u8]>>(&self, files: &[T]) -> u32 {
        let mut regs = [self.seeds[0], self.seeds[1], self.seeds[2], 0u32];

        for file in files {
            for word in file.as_ref().chunks_exact(4) {
                regs[3] = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                for op in &self.ops {
                    let left = regs[op.left];
                    let right = regs[op.right];
                    regs[op.target] = match op.operator {
                        '^' => left ^ right,
                        '+' => left.wrapping_add(right),
                        '-' => left.wrapping_sub(right),
                        '*' => left.wrapping_mul(right),
                        // Division by zero leaves the register unchanged.
                        '/' => left.checked_div(right).unwrap_or(regs[op.target]),
                        _ => unreachable!("operator validated at parse"),
                    };
                }
            }
        }

        regs[2]
    }
}

/// Whether the auth-info challenge filename selects the lockdown path.
pub fn is_lockdown_filename(filename: &str) -> bool {
    filename.to_ascii_lowercase().contains("lockdown")
}

/// Digest for the lockdown path: SHA-1 over the downloaded archive image
/// keyed with the server token. The archive's container format is opaque to
/// this client; the digest covers the image as transferred.
pub fn lockdown_digest(archive: &[u8], server_token: u32) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(archive);
    hasher.update(server_token.to_le_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHALLENGE: &str = "A=443747131 B=3328179921 C=1040998290 4 A=A^S B=B-C C=C^A A=A+B";

    #[test]
    fn parses_seeds_and_ops() {
        let formula = ChecksumFormula::parse(CHALLENGE).unwrap();
        assert_eq!(formula.seeds, [443747131, 3328179921, 1040998290]);
        assert_eq!(formula.ops.len(), 4);
    }

    #[test]
    fn checksum_is_deterministic_and_input_sensitive() {
        let formula = ChecksumFormula::parse(CHALLENGE).unwrap();
        let file_a = vec![0x5Au8; 64];
        let file_b = vec![0xA5u8; 64];

        let checksum = formula.checksum(&[&file_a]);
        assert_eq!(checksum, formula.checksum(&[&file_a]));
        assert_ne!(checksum, formula.checksum(&[&file_b]));
        // File order matters: the registers carry across files.
        assert_ne!(
            formula.checksum(&[&file_a, &file_b]),
            formula.checksum(&[&file_b, &file_a])
        );
    }

    #[test]
    fn empty_input_yields_seed_register() {
        let formula = ChecksumFormula::parse(CHALLENGE).unwrap();
        let none: [&[u8]; 0] = [];
        assert_eq!(formula.checksum(&none), 1040998290);
    }

    #[test]
    fn trailing_partial_word_ignored() {
        let formula = ChecksumFormula::parse(CHALLENGE).unwrap();
        let exact = vec![1u8; 8];
        let mut padded = exact.clone();
        padded.extend_from_slice(&[9, 9, 9]);
        assert_eq!(formula.checksum(&[&exact]), formula.checksum(&[&padded]));
    }

    #[test]
    fn rejects_malformed_challenges() {
        assert!(ChecksumFormula::parse("A=1 B=2 C=3").is_err());
        assert!(ChecksumFormula::parse("A=1 B=2 C=3 2 A=A^S").is_err());
        assert!(ChecksumFormula::parse("A=1 B=2 C=3 1 A=A%S").is_err());
        assert!(ChecksumFormula::parse("A=x B=2 C=3 1 A=A^S").is_err());
        assert!(ChecksumFormula::parse("S=1 B=2 C=3 1 A=A^S").is_err());
    }

    #[test]
    fn lockdown_selection_is_case_insensitive() {
        assert!(is_lockdown_filename("LOCKDOWN-IX86-14.mpq"));
        assert!(is_lockdown_filename("lockdown-ix86-03.mpq"));
        assert!(!is_lockdown_filename("ver-IX86-1.mpq"));
    }

    #[test]
    fn lockdown_digest_keyed_by_token() {
        let archive = b"archive image";
        assert_ne!(
            lockdown_digest(archive, 0xAABBCCDD),
            lockdown_digest(archive, 0xAABBCCDE)
        );
    }
}
