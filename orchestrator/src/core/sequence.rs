//! Input sequence validation and deterministic design mutations.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The twenty canonical amino acids.
pub const CANONICAL_RESIDUES: &str = "ACDEFGHIKLMNPQRSTVWY";

/// Residues favoured by helix formation, cycled through by design mutations.
const HELIX_FAVORING: &[u8] = b"AELMQKRH";

static NON_CANONICAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^ACDEFGHIKLMNPQRSTVWY]").unwrap()
});

/// Result of validating a raw input sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceCheck {
    /// Uppercased sequence with whitespace removed.
    pub sequence: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn validate_sequence(raw: &str) -> SequenceCheck {
    let sequence: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if sequence.is_empty() {
        errors.push("empty_sequence".to_string());
    } else {
        let invalid: BTreeSet<&str> = NON_CANONICAL
            .find_iter(&sequence)
            .map(|m| m.as_str())
            .collect();
        if !invalid.is_empty() {
            errors.push("invalid_residues".to_string());
            let joined: Vec<&str> = invalid.into_iter().collect();
            warnings.push(format!("invalid:{}", joined.join(",")));
        }
    }

    SequenceCheck {
        valid: errors.is_empty(),
        sequence,
        errors,
        warnings,
    }
}

/// Deterministic point mutation for design round `round` (round 0 is the input itself).
pub fn mutate(sequence: &str, round: u32) -> String {
    if round == 0 || sequence.is_empty() {
        return sequence.to_string();
    }
    let mut residues: Vec<u8> = sequence.bytes().collect();
    let position = (round as usize * 7) % residues.len();
    let replacement = HELIX_FAVORING[(round as usize - 1) % HELIX_FAVORING.len()];
    residues[position] = if residues[position] == replacement {
        HELIX_FAVORING[round as usize % HELIX_FAVORING.len()]
    } else {
        replacement
    };
    String::from_utf8_lossy(&residues).into_owned()
}

/// First record of a FASTA document with headers and `;` comments removed.
///
/// Text without a header is treated as a bare sequence.
pub fn parse_fasta(contents: &str) -> String {
    let mut sequence = String::new();
    let mut seen_header = false;
    for line in contents.lines().map(str::trim) {
        if line.starts_with('>') {
            if seen_header {
                break;
            }
            seen_header = true;
            continue;
        }
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        sequence.push_str(line);
    }
    sequence
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fasta_keeps_only_the_first_record() {
        let fasta = ">design_1 test\nAELK\n; comment\nKLAE\n>design_2\nGGGG\n";
        assert_eq!(parse_fasta(fasta), "AELKKLAE");
        assert_eq!(parse_fasta("ACDE\n"), "ACDE");
    }

    #[test]
    fn accepts_valid_sequence() {
        let check = validate_sequence("ACDE");
        assert!(check.valid);
        assert!(check.errors.is_empty());
        assert!(check.warnings.is_empty());
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        let check = validate_sequence(" acd\nefg ");
        assert_eq!(check.sequence, "ACDEFG");
        assert!(check.valid);
    }

    #[test]
    fn flags_invalid_residues_sorted_and_unique() {
        let check = validate_sequence("AZXZ");
        assert!(!check.valid);
        assert_eq!(check.errors, vec!["invalid_residues"]);
        assert_eq!(check.warnings, vec!["invalid:X,Z"]);
    }

    #[test]
    fn flags_empty_after_strip() {
        let check = validate_sequence("  ");
        assert_eq!(check.errors, vec!["empty_sequence"]);
    }

    #[test]
    fn mutation_is_deterministic_and_changes_one_residue() {
        let base = "GGGGGGGGGG";
        assert_eq!(mutate(base, 0), base);
        let first = mutate(base, 1);
        assert_eq!(first, mutate(base, 1));
        let changed = first
            .bytes()
            .zip(base.bytes())
            .filter(|(a, b)| a != b)
            .count();
        assert_eq!(changed, 1);
        assert!(validate_sequence(&first).valid);
    }
}
