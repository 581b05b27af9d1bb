//! Passphrase generation and strength estimation

use rand::rngs::OsRng;
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;

const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const SPECIAL: &str = "!@#$%^&*()-_=+[]{};:,.<>?";
const AMBIGUOUS: &str = "O0l1I";

/// Minimum accepted passphrase length
pub const MIN_LENGTH: usize = 4;
/// Maximum accepted passphrase length
pub const MAX_LENGTH: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
/// Errors producing a generated passphrase
pub enum GeneratorError {
    /// The requested length is outside the accepted range
    #[error("Password length {0} outside accepted range {MIN_LENGTH}..={MAX_LENGTH}")]
    InvalidLength(usize),
}

/// Options for generated passphrases
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorConfig {
    /// Output length in characters, within `4..=64`
    pub length: usize,
    /// Draw from uppercase letters
    pub include_upper: bool,
    /// Draw from lowercase letters
    pub include_lower: bool,
    /// Draw from digits
    pub include_digits: bool,
    /// Draw from punctuation
    pub include_special: bool,
    /// Remove easily-confused glyphs (`O 0 l 1 I`) from the alphabet
    pub exclude_ambiguous: bool,
}

impl Default for GeneratorConfig {
    fn default() -> GeneratorConfig {
        GeneratorConfig {
            length: 20,
            include_upper: true,
            include_lower: true,
            include_digits: true,
            include_special: true,
            exclude_ambiguous: false,
        }
    }
}

impl GeneratorConfig {
    /// The effective alphabet for these options.
    ///
    /// With every class switched off the alphabet falls back to
    /// lowercase letters and digits.
    pub fn alphabet(&self) -> Vec<char> {
        let mut classes: Vec<&str> = Vec::new();
        if self.include_lower {
            classes.push(LOWER);
        }
        if self.include_upper {
            classes.push(UPPER);
        }
        if self.include_digits {
            classes.push(DIGITS);
        }
        if self.include_special {
            classes.push(SPECIAL);
        }
        if classes.is_empty() {
            classes.push(LOWER);
            classes.push(DIGITS);
        }

        classes
            .into_iter()
            .flat_map(|class| class.chars())
            .filter(|c| !(self.exclude_ambiguous && AMBIGUOUS.contains(*c)))
            .collect()
    }
}

/// Generate a passphrase from the configured alphabet.
///
/// Every character is drawn independently and uniformly from the effective
/// alphabet using the OS CSPRNG.
pub fn generate(config: &GeneratorConfig) -> Result<String, GeneratorError> {
    if config.length < MIN_LENGTH || config.length > MAX_LENGTH {
        return Err(GeneratorError::InvalidLength(config.length));
    }
    let alphabet = config.alphabet();
    let mut rng = OsRng;
    Ok((0..config.length)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
        .collect())
}

/// Estimate passphrase strength on a 0..=4 scale.
///
/// Length contributes a point at 8, 12 and 20 characters; character
/// variety a point at three and four distinct classes.
pub fn strength(passphrase: &str) -> u8 {
    let mut score = 0u8;
    let len = passphrase.chars().count();
    if len >= 8 {
        score += 1;
    }
    if len >= 12 {
        score += 1;
    }
    if len >= 20 {
        score += 1;
    }

    let has_lower = passphrase.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = passphrase.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = passphrase.chars().any(|c| c.is_ascii_digit());
    let has_other = passphrase
        .chars()
        .any(|c| !c.is_ascii_alphanumeric());
    let classes = [has_lower, has_upper, has_digit, has_other]
        .iter()
        .filter(|present| **present)
        .count();
    if classes >= 3 {
        score += 1;
    }
    if classes >= 4 {
        score += 1;
    }

    score.min(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generates_requested_length_from_alphabet() {
        let config = GeneratorConfig {
            length: 32,
            ..GeneratorConfig::default()
        };
        let alphabet: HashSet<char> = config.alphabet().into_iter().collect();
        let pw = generate(&config).unwrap();
        assert_eq!(pw.chars().count(), 32);
        assert!(pw.chars().all(|c| alphabet.contains(&c)));
    }

    #[test]
    fn rejects_out_of_range_lengths() {
        let too_short = GeneratorConfig {
            length: 3,
            ..GeneratorConfig::default()
        };
        let too_long = GeneratorConfig {
            length: 65,
            ..GeneratorConfig::default()
        };
        assert_eq!(generate(&too_short), Err(GeneratorError::InvalidLength(3)));
        assert_eq!(generate(&too_long), Err(GeneratorError::InvalidLength(65)));
    }

    #[test]
    fn ambiguous_glyphs_can_be_excluded() {
        let config = GeneratorConfig {
            length: 64,
            exclude_ambiguous: true,
            ..GeneratorConfig::default()
        };
        for _ in 0..16 {
            let pw = generate(&config).unwrap();
            assert!(pw.chars().all(|c| !AMBIGUOUS.contains(c)));
        }
    }

    #[test]
    fn all_classes_off_falls_back_to_lower_and_digits() {
        let config = GeneratorConfig {
            length: 24,
            include_upper: false,
            include_lower: false,
            include_digits: false,
            include_special: false,
            exclude_ambiguous: false,
        };
        let pw = generate(&config).unwrap();
        assert!(pw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn uniform_within_statistical_tolerance() {
        let config = GeneratorConfig {
            length: 64,
            include_upper: false,
            include_lower: true,
            include_digits: false,
            include_special: false,
            exclude_ambiguous: false,
        };
        let mut counts = std::collections::HashMap::new();
        for _ in 0..200 {
            for c in generate(&config).unwrap().chars() {
                *counts.entry(c).or_insert(0usize) += 1;
            }
        }
        // 12800 draws over 26 symbols, expect ~492 each; allow a wide band
        for count in counts.values() {
            assert!(*count > 300 && *count < 700, "skewed count {}", count);
        }
    }

    #[test]
    fn strength_scale() {
        assert_eq!(strength("abc"), 0);
        assert_eq!(strength("abcdefgh"), 1);
        assert_eq!(strength("Abcdefg1"), 2);
        assert_eq!(strength("Abcdefg1!densepw"), 4);
        assert_eq!(strength("Abcdefg1!densepw-and-long"), 4);
    }
}
