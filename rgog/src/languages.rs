//! Fixed 128-slot language bit-set
//!
//! Depot languages are packed into two u64 words using a table frozen by
//! the format: bit assignments never change between versions, or archives
//! written by older packers would decode to the wrong languages.

/// Language tag to bit position. Appending to this table is allowed;
/// reordering is a format break.
pub const LANGUAGE_TABLE: &[(&str, u8)] = &[
    ("en-US", 0),
    ("en-GB", 1),
    ("fr-FR", 2),
    ("de-DE", 3),
    ("es-ES", 4),
    ("es-MX", 5),
    ("pl-PL", 6),
    ("ru-RU", 7),
    ("it-IT", 8),
    ("pt-BR", 9),
    ("pt-PT", 10),
    ("zh-Hans", 11),
    ("zh-Hant", 12),
    ("ja-JP", 13),
    ("ko-KR", 14),
    ("tr-TR", 15),
    ("cs-CZ", 16),
    ("hu-HU", 17),
    ("nl-NL", 18),
    ("sv-SE", 19),
    ("nb-NO", 20),
    ("da-DK", 21),
    ("fi-FI", 22),
    ("ar", 23),
    ("th-TH", 24),
    ("el-GR", 25),
    ("ro-RO", 26),
    ("uk-UA", 27),
    ("bg-BG", 28),
    ("hr-HR", 29),
    ("vi-VN", 30),
    ("id-ID", 31),
    ("hi-IN", 32),
    ("he-IL", 33),
    ("sk-SK", 34),
    ("sl-SI", 35),
    ("sr-Latn", 36),
    ("lt-LT", 37),
    ("lv-LV", 38),
    ("et-EE", 39),
    ("is-IS", 40),
    ("ms-MY", 41),
    ("fil-PH", 42),
    ("ca-ES", 43),
    ("eu-ES", 44),
    ("gl-ES", 45),
    ("cy-GB", 46),
    ("ga-IE", 47),
    ("mt-MT", 48),
    ("af-ZA", 49),
    ("sw-KE", 50),
    ("zu-ZA", 51),
    ("xh-ZA", 52),
    ("am-ET", 53),
    ("bn-BD", 54),
    ("gu-IN", 55),
    ("kn-IN", 56),
    ("ml-IN", 57),
    ("mr-IN", 58),
    ("pa-IN", 59),
    ("ta-IN", 60),
    ("te-IN", 61),
    ("ne-NP", 62),
    ("si-LK", 63),
    ("my-MM", 64),
    ("km-KH", 65),
    ("lo-LA", 66),
    ("ka-GE", 67),
    ("hy-AM", 68),
    ("az-Latn-AZ", 69),
    ("kk-KZ", 70),
    ("uz-Latn-UZ", 71),
    ("mn-MN", 72),
    ("bo-CN", 73),
    ("ug-CN", 74),
    ("ps-AF", 75),
    ("fa-IR", 76),
    ("ur-PK", 77),
    ("sd-Arab-PK", 78),
    ("ks-Arab-IN", 79),
    ("dz-BT", 80),
    ("ti-ET", 81),
    ("om-ET", 82),
    ("so-SO", 83),
];

/// Packed 128-bit language set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LanguageSet {
    /// Bits 0–63
    pub low: u64,
    /// Bits 64–127
    pub high: u64,
}

impl LanguageSet {
    /// Encode a list of language tags. Tags outside the table (including
    /// the `"*"` wildcard) are dropped; an empty set is a valid encoding.
    pub fn encode<S: AsRef<str>>(languages: &[S]) -> Self {
        let mut set = Self::default();
        for language in languages {
            if let Some(bit) = lookup(language.as_ref()) {
                set.insert(bit);
            }
        }
        set
    }

    /// Decode back into the table's tags, in bit order.
    pub fn decode(&self) -> Vec<&'static str> {
        LANGUAGE_TABLE
            .iter()
            .filter(|(_, bit)| self.contains(*bit))
            .map(|(tag, _)| *tag)
            .collect()
    }

    /// Whether a bit is set.
    pub fn contains(&self, bit: u8) -> bool {
        if bit < 64 {
            self.low & (1u64 << bit) != 0
        } else {
            self.high & (1u64 << (bit - 64)) != 0
        }
    }

    /// Whether no language bit is set.
    pub fn is_empty(&self) -> bool {
        self.low == 0 && self.high == 0
    }

    fn insert(&mut self, bit: u8) {
        if bit < 64 {
            self.low |= 1u64 << bit;
        } else {
            self.high |= 1u64 << (bit - 64);
        }
    }
}

fn lookup(tag: &str) -> Option<u8> {
    LANGUAGE_TABLE
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(tag))
        .map(|(_, bit)| *bit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_low_word() {
        let set = LanguageSet::encode(&["en-US", "de-DE"]);
        assert_eq!(set.low, 0b1001);
        assert_eq!(set.high, 0);
    }

    #[test]
    fn test_encode_high_word() {
        let set = LanguageSet::encode(&["my-MM"]); // bit 64
        assert_eq!(set.low, 0);
        assert_eq!(set.high, 1);
    }

    #[test]
    fn test_roundtrip() {
        let set = LanguageSet::encode(&["en-US", "ja-JP", "ka-GE"]);
        assert_eq!(set.decode(), vec!["en-US", "ja-JP", "ka-GE"]);
    }

    #[test]
    fn test_unknown_and_wildcard_dropped() {
        let set = LanguageSet::encode(&["*", "tlh"]);
        assert!(set.is_empty());
        assert!(set.decode().is_empty());
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let set = LanguageSet::encode(&["EN-us"]);
        assert!(set.contains(0));
    }
}
