//! Character-class string fingerprinting.
//!
//! The primary anomaly signal for every free-text leaf: URL segments, header
//! and query values, unstructured bodies, JSON scalars. Each character is
//! classified through a fixed 128-entry ASCII table (multi-byte characters
//! fall back to a Unicode class); the profile keeps Limit-bucketed counters
//! per class, a structural "sequences" counter bumped on every class
//! transition, a category bitmask of which special characters appeared (plus
//! derived bits for hex-literal prefixes and comment markers), and a bitset
//! of touched 128-code-point Unicode blocks. No actual characters are stored;
//! profiles are irreversible summaries.

use serde::{Deserialize, Serialize};

use crate::decision::{Decision, DecisionBuilder};
use crate::profile::flags::{
    AsciiFlagsCriteria, AsciiFlagsPile, AsciiFlagsProfile, FlagSliceCriteria, FlagSlicePile,
    FlagSliceProfile,
};
use crate::profile::limit::{LimitCriteria, LimitPile, LimitProfile};
use crate::profile::{Criteria, Pile};

/// Coarse character class used for run counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Letter,
    Digit,
    Space,
    Control,
    Special,
    Unicode,
}

// Special-character category bits. Paired characters share a category.
const FLAG_EXCLAMATION: u32 = 1 << 0; // !
const FLAG_QUOTE: u32 = 1 << 1; // " '
const FLAG_HASH: u32 = 1 << 2; // #
const FLAG_DOLLAR: u32 = 1 << 3; // $
const FLAG_PERCENT: u32 = 1 << 4; // %
const FLAG_AMPERSAND: u32 = 1 << 5; // &
const FLAG_PARENTHESIS: u32 = 1 << 6; // ( )
const FLAG_ASTERISK: u32 = 1 << 7; // *
const FLAG_PLUS: u32 = 1 << 8; // +
const FLAG_COMMA: u32 = 1 << 9; // ,
const FLAG_MINUS: u32 = 1 << 10; // -
const FLAG_PERIOD: u32 = 1 << 11; // .
const FLAG_SLASH: u32 = 1 << 12; // /
const FLAG_COLON: u32 = 1 << 13; // :
const FLAG_SEMICOLON: u32 = 1 << 14; // ;
const FLAG_ANGLE: u32 = 1 << 15; // < >
const FLAG_EQUALS: u32 = 1 << 16; // =
const FLAG_QUESTION: u32 = 1 << 17; // ?
const FLAG_AT: u32 = 1 << 18; // @
const FLAG_BRACKET: u32 = 1 << 19; // [ ]
const FLAG_BACKSLASH: u32 = 1 << 20; // \
const FLAG_CARET: u32 = 1 << 21; // ^
const FLAG_UNDERSCORE: u32 = 1 << 22; // _
const FLAG_BACKQUOTE: u32 = 1 << 23; // `
const FLAG_BRACE: u32 = 1 << 24; // { }
const FLAG_PIPE: u32 = 1 << 25; // |
const FLAG_TILDE: u32 = 1 << 26; // ~

/// Derived: a `0x` / `0X` hex-literal prefix appeared.
pub const FLAG_HEX_PREFIX: u32 = 1 << 27;
/// Derived: a comment marker (`/*`, `*/` or `--`) appeared.
pub const FLAG_COMMENT: u32 = 1 << 28;

/// Fixed 128-entry classification table.
static ASCII_TABLE: [(CharClass, u32); 128] = build_ascii_table();

const fn build_ascii_table() -> [(CharClass, u32); 128] {
    let mut table = [(CharClass::Control, 0u32); 128];
    let mut i = 0usize;
    while i < 128 {
        let b = i as u8;
        table[i] = match b {
            b'a'..=b'z' | b'A'..=b'Z' => (CharClass::Letter, 0),
            b'0'..=b'9' => (CharClass::Digit, 0),
            b' ' | b'\t' => (CharClass::Space, 0),
            b'!' => (CharClass::Special, FLAG_EXCLAMATION),
            b'"' | b'\'' => (CharClass::Special, FLAG_QUOTE),
            b'#' => (CharClass::Special, FLAG_HASH),
            b'$' => (CharClass::Special, FLAG_DOLLAR),
            b'%' => (CharClass::Special, FLAG_PERCENT),
            b'&' => (CharClass::Special, FLAG_AMPERSAND),
            b'(' | b')' => (CharClass::Special, FLAG_PARENTHESIS),
            b'*' => (CharClass::Special, FLAG_ASTERISK),
            b'+' => (CharClass::Special, FLAG_PLUS),
            b',' => (CharClass::Special, FLAG_COMMA),
            b'-' => (CharClass::Special, FLAG_MINUS),
            b'.' => (CharClass::Special, FLAG_PERIOD),
            b'/' => (CharClass::Special, FLAG_SLASH),
            b':' => (CharClass::Special, FLAG_COLON),
            b';' => (CharClass::Special, FLAG_SEMICOLON),
            b'<' | b'>' => (CharClass::Special, FLAG_ANGLE),
            b'=' => (CharClass::Special, FLAG_EQUALS),
            b'?' => (CharClass::Special, FLAG_QUESTION),
            b'@' => (CharClass::Special, FLAG_AT),
            b'[' | b']' => (CharClass::Special, FLAG_BRACKET),
            b'\\' => (CharClass::Special, FLAG_BACKSLASH),
            b'^' => (CharClass::Special, FLAG_CARET),
            b'_' => (CharClass::Special, FLAG_UNDERSCORE),
            b'`' => (CharClass::Special, FLAG_BACKQUOTE),
            b'{' | b'}' => (CharClass::Special, FLAG_BRACE),
            b'|' => (CharClass::Special, FLAG_PIPE),
            b'~' => (CharClass::Special, FLAG_TILDE),
            _ => (CharClass::Control, 0),
        };
        i += 1;
    }
    table
}

/// Fingerprint of one free-text value (or a fold of sibling values).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleValProfile {
    pub letters: LimitProfile,
    pub digits: LimitProfile,
    pub spaces: LimitProfile,
    pub controls: LimitProfile,
    pub specials: LimitProfile,
    pub unicodes: LimitProfile,
    pub sequences: LimitProfile,
    pub flags: AsciiFlagsProfile,
    pub unicode_blocks: FlagSliceProfile,
}

impl SimpleValProfile {
    pub fn from_str(value: &str) -> Self {
        let mut scanner = SimpleValScanner::default();
        scanner.scan(value);
        scanner.finish()
    }
}

/// Incremental scanner that folds one or more strings into a single profile.
///
/// Counters accumulate raw across `scan` calls and are bucketed once at
/// `finish`; class runs do not span call boundaries.
#[derive(Debug, Default)]
pub struct SimpleValScanner {
    letters: usize,
    digits: usize,
    spaces: usize,
    controls: usize,
    specials: usize,
    unicodes: usize,
    sequences: usize,
    flags: u32,
    unicode_blocks: FlagSliceProfile,
}

impl SimpleValScanner {
    pub fn scan(&mut self, value: &str) {
        let mut prev_class: Option<CharClass> = None;
        let mut prev_char: Option<char> = None;
        for c in value.chars() {
            let (class, flag) = if (c as u32) < 128 {
                ASCII_TABLE[c as usize]
            } else {
                (CharClass::Unicode, 0)
            };
            match class {
                CharClass::Letter => self.letters += 1,
                CharClass::Digit => self.digits += 1,
                CharClass::Space => self.spaces += 1,
                CharClass::Control => self.controls += 1,
                CharClass::Special => self.specials += 1,
                CharClass::Unicode => {
                    self.unicodes += 1;
                    self.unicode_blocks.set_bit(c as usize / 128);
                }
            }
            self.flags |= flag;
            if prev_class != Some(class) {
                self.sequences += 1;
                prev_class = Some(class);
            }
            if let Some(prev) = prev_char {
                match (prev, c) {
                    ('0', 'x') | ('0', 'X') => self.flags |= FLAG_HEX_PREFIX,
                    ('/', '*') | ('*', '/') | ('-', '-') => self.flags |= FLAG_COMMENT,
                    _ => {}
                }
            }
            prev_char = Some(c);
        }
    }

    pub fn finish(self) -> SimpleValProfile {
        SimpleValProfile {
            letters: LimitProfile::from(self.letters),
            digits: LimitProfile::from(self.digits),
            spaces: LimitProfile::from(self.spaces),
            controls: LimitProfile::from(self.controls),
            specials: LimitProfile::from(self.specials),
            unicodes: LimitProfile::from(self.unicodes),
            sequences: LimitProfile::from(self.sequences),
            flags: AsciiFlagsProfile(self.flags),
            unicode_blocks: self.unicode_blocks,
        }
    }
}

/// Accumulator over a population of string fingerprints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleValPile {
    letters: LimitPile,
    digits: LimitPile,
    spaces: LimitPile,
    controls: LimitPile,
    specials: LimitPile,
    unicodes: LimitPile,
    sequences: LimitPile,
    flags: AsciiFlagsPile,
    unicode_blocks: FlagSlicePile,
}

impl Pile for SimpleValPile {
    type Profile = SimpleValProfile;

    fn add(&mut self, profile: &SimpleValProfile) {
        self.letters.add(&profile.letters);
        self.digits.add(&profile.digits);
        self.spaces.add(&profile.spaces);
        self.controls.add(&profile.controls);
        self.specials.add(&profile.specials);
        self.unicodes.add(&profile.unicodes);
        self.sequences.add(&profile.sequences);
        self.flags.add(&profile.flags);
        self.unicode_blocks.add(&profile.unicode_blocks);
    }

    fn merge(&mut self, other: Self) {
        self.letters.merge(other.letters);
        self.digits.merge(other.digits);
        self.spaces.merge(other.spaces);
        self.controls.merge(other.controls);
        self.specials.merge(other.specials);
        self.unicodes.merge(other.unicodes);
        self.sequences.merge(other.sequences);
        self.flags.merge(other.flags);
        self.unicode_blocks.merge(other.unicode_blocks);
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Learned boundary for one free-text leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleValCriteria {
    letters: LimitCriteria,
    digits: LimitCriteria,
    spaces: LimitCriteria,
    controls: LimitCriteria,
    specials: LimitCriteria,
    unicodes: LimitCriteria,
    sequences: LimitCriteria,
    flags: AsciiFlagsCriteria,
    unicode_blocks: FlagSliceCriteria,
}

impl Criteria for SimpleValCriteria {
    type Profile = SimpleValProfile;
    type Pile = SimpleValPile;

    fn learn(&mut self, pile: &SimpleValPile) {
        self.letters.learn(&pile.letters);
        self.digits.learn(&pile.digits);
        self.spaces.learn(&pile.spaces);
        self.controls.learn(&pile.controls);
        self.specials.learn(&pile.specials);
        self.unicodes.learn(&pile.unicodes);
        self.sequences.learn(&pile.sequences);
        self.flags.learn(&pile.flags);
        self.unicode_blocks.learn(&pile.unicode_blocks);
    }

    fn fuse(&mut self, other: &Self) {
        self.letters.fuse(&other.letters);
        self.digits.fuse(&other.digits);
        self.spaces.fuse(&other.spaces);
        self.controls.fuse(&other.controls);
        self.specials.fuse(&other.specials);
        self.unicodes.fuse(&other.unicodes);
        self.sequences.fuse(&other.sequences);
        self.flags.fuse(&other.flags);
        self.unicode_blocks.fuse(&other.unicode_blocks);
    }

    fn decide(&self, profile: &SimpleValProfile) -> Option<Decision> {
        let mut builder = DecisionBuilder::new();
        builder.child("letters", self.letters.decide(&profile.letters));
        builder.child("digits", self.digits.decide(&profile.digits));
        builder.child("spaces", self.spaces.decide(&profile.spaces));
        builder.child("controls", self.controls.decide(&profile.controls));
        builder.child("specials", self.specials.decide(&profile.specials));
        builder.child("unicodes", self.unicodes.decide(&profile.unicodes));
        builder.child("sequences", self.sequences.decide(&profile.sequences));
        builder.child("flags", self.flags.decide(&profile.flags));
        builder.child(
            "unicode_blocks",
            self.unicode_blocks.decide(&profile.unicode_blocks),
        );
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn learned(values: &[&str]) -> SimpleValCriteria {
        let mut pile = SimpleValPile::default();
        for v in values {
            pile.add(&SimpleValProfile::from_str(v));
        }
        let mut criteria = SimpleValCriteria::default();
        criteria.learn(&pile);
        criteria
    }

    #[test]
    fn test_sequence_counter_counts_runs() {
        let p = SimpleValProfile::from_str("aaa111bbb");
        assert_eq!(p.sequences, LimitProfile::from(3));
        let p = SimpleValProfile::from_str("a1a1a1");
        assert_eq!(p.sequences, LimitProfile::from(6));
    }

    #[test]
    fn test_hex_prefix_and_comment_flags() {
        let p = SimpleValProfile::from_str("0xdeadbeef");
        assert!(p.flags.0 & FLAG_HEX_PREFIX != 0);
        let p = SimpleValProfile::from_str("1 /* hidden */ 2");
        assert!(p.flags.0 & FLAG_COMMENT != 0);
        let p = SimpleValProfile::from_str("name -- drop");
        assert!(p.flags.0 & FLAG_COMMENT != 0);
        let p = SimpleValProfile::from_str("plain text");
        assert!(p.flags.0 & (FLAG_COMMENT | FLAG_HEX_PREFIX) == 0);
    }

    #[test]
    fn test_unicode_blocks_recorded_without_characters() {
        let p = SimpleValProfile::from_str("héllo");
        assert_eq!(p.unicodes, LimitProfile::from(1));
        // é is U+00E9, block 1.
        assert_eq!(p.unicode_blocks.0[0] & (1 << 1), 1 << 1);
    }

    #[test]
    fn test_learned_values_pass() {
        let values = ["alice", "bob-42", "charlie_jones"];
        let criteria = learned(&values);
        for v in values {
            assert!(criteria.decide(&SimpleValProfile::from_str(v)).is_none());
        }
    }

    #[test]
    fn test_injection_shaped_value_fails_plain_baseline() {
        let criteria = learned(&["alice", "bob", "carol"]);
        let attack = SimpleValProfile::from_str("' OR 1=1 --");
        assert!(criteria.decide(&attack).is_some());
    }

    #[test]
    fn test_scanner_folds_multiple_values() {
        let mut scanner = SimpleValScanner::default();
        scanner.scan("abc");
        scanner.scan("def");
        let folded = scanner.finish();
        assert_eq!(folded.letters, LimitProfile::from(6));
        // Runs do not span scan boundaries: one run per call.
        assert_eq!(folded.sequences, LimitProfile::from(2));
    }

    #[test]
    fn test_serde_preserves_decide() {
        let criteria = learned(&["hello world"]);
        let json = serde_json::to_string(&criteria).unwrap();
        let back: SimpleValCriteria = serde_json::from_str(&json).unwrap();
        assert!(back
            .decide(&SimpleValProfile::from_str("hello world"))
            .is_none());
        assert!(back
            .decide(&SimpleValProfile::from_str("<script>alert(1)</script>"))
            .is_some());
    }
}
