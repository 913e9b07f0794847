//! The static character generalization table.
//!
//! Each rule says: when a literal character from `triggers` is seen, try to
//! widen it into `characters`, validating the widening with the
//! representative `checks` only. The table covers ASCII (0..128): every
//! alphanumeric character may widen into the digit, uppercase and lowercase
//! classes as well as into each individual punctuation character.

use std::sync::OnceLock;

use ahash::AHashSet;

pub(crate) struct CharacterGeneralization {
    pub(crate) triggers: AHashSet<char>,
    pub(crate) characters: Vec<char>,
    pub(crate) checks: Vec<char>,
}

impl CharacterGeneralization {
    fn new(triggers: &[char], characters: &[char], checks: &[char]) -> Self {
        Self {
            triggers: triggers.iter().copied().collect(),
            characters: characters.to_vec(),
            checks: checks.to_vec(),
        }
    }
}

pub(crate) fn generalizations() -> &'static [CharacterGeneralization] {
    static TABLE: OnceLock<Vec<CharacterGeneralization>> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

fn build_table() -> Vec<CharacterGeneralization> {
    let mut numeric = Vec::new();
    let mut upper = Vec::new();
    let mut lower = Vec::new();
    let mut other = Vec::new();

    for c in 0u8..128 {
        let c = c as char;
        if c.is_ascii_digit() {
            numeric.push(c);
        } else if c.is_ascii_uppercase() {
            upper.push(c);
        } else if c.is_ascii_lowercase() {
            lower.push(c);
        } else {
            other.push(c);
        }
    }

    let numeric_checks = ['0', '1', '9'];
    let upper_checks = ['E', 'Q'];
    let lower_checks = ['e', 'q'];

    let mut rules = Vec::new();

    for &c in &other {
        let single = [c];
        rules.push(CharacterGeneralization::new(&numeric, &single, &single));
        rules.push(CharacterGeneralization::new(&lower, &single, &single));
        rules.push(CharacterGeneralization::new(&upper, &single, &single));
    }

    for triggers in [&numeric, &upper, &lower] {
        rules.push(CharacterGeneralization::new(triggers, &numeric, &numeric_checks));
        rules.push(CharacterGeneralization::new(triggers, &upper, &upper_checks));
        rules.push(CharacterGeneralization::new(triggers, &lower, &lower_checks));
    }

    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_shape() {
        // 128 ASCII characters minus 10 digits and 2x26 letters leaves 66
        // punctuation/control characters with three single-target rules each,
        // plus the nine class-to-class rules.
        assert_eq!(generalizations().len(), 66 * 3 + 9);
    }

    #[test]
    fn test_class_rules() {
        let digit_to_digit = generalizations()
            .iter()
            .find(|rule| rule.triggers.contains(&'5') && rule.characters.contains(&'0'))
            .unwrap();

        assert_eq!(digit_to_digit.characters.len(), 10);
        assert_eq!(digit_to_digit.checks, vec!['0', '1', '9']);
    }

    #[test]
    fn test_punctuation_never_triggers() {
        for rule in generalizations() {
            assert!(!rule.triggers.contains(&'{'));
            assert!(!rule.triggers.contains(&' '));
        }
    }
}
