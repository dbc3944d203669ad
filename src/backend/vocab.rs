//! Phoneme vocabulary: maps IPA characters to model token ids.
//!
//! A model package may ship its own `vocab` table in `config.json`; otherwise
//! the StyleTTS2 symbol order is used:
//!   `[pad] + punctuation + ASCII letters + IPA letters`
//!
//! Unknown characters are skipped.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Longest token sequence the model accepts, excluding the two pad tokens.
pub const MAX_TOKENS: usize = 510;

const PAD: char = '$';
const PUNCTUATION: &str = ";:,.!?¡¿—…\u{201C}«»\u{201D}\" ";
const LETTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const IPA_LETTERS: &str =
    "ɑɐɒæɓʙβɔɕçɗɖðʤəɘɚɛɜɝɞɟʄɡɠɢʛɦɧħɥʜɨɪʝɭɬɫɮʟɱɯɰŋɳɲɴøɵɸθœɶʘɹɺɾɻʀʁɽʂʃʈʧʉʊʋⱱʌɣɤʍχʎʏʑʐʒʔʡʕʢǀǁǂǃˈˌːˑʼʴʰʱʲʷˠˤ˞↓↑→↗↘\u{2019}\u{0329}\u{2018}ᵻ";

static DEFAULT_TABLE: Lazy<HashMap<char, i64>> = Lazy::new(|| {
    std::iter::once(PAD)
        .chain(PUNCTUATION.chars())
        .chain(LETTERS.chars())
        .chain(IPA_LETTERS.chars())
        .enumerate()
        .map(|(i, c)| (c, i as i64))
        .collect()
});

/// Character → token id table.
#[derive(Debug, Clone)]
pub struct Vocab {
    table: HashMap<char, i64>,
}

impl Default for Vocab {
    fn default() -> Self {
        Self { table: DEFAULT_TABLE.clone() }
    }
}

impl Vocab {
    /// Build from a `config.json` table.  Keys that are not exactly one
    /// character are ignored; an empty table falls back to the default.
    pub fn from_config(entries: &HashMap<String, i64>) -> Self {
        let table: HashMap<char, i64> = entries
            .iter()
            .filter_map(|(k, &id)| {
                let mut chars = k.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some((c, id)),
                    _ => None,
                }
            })
            .collect();
        if table.is_empty() {
            Self::default()
        } else {
            Self { table }
        }
    }

    pub fn encode(&self, ipa: &str) -> Vec<i64> {
        ipa.chars().filter_map(|c| self.table.get(&c).copied()).collect()
    }

    /// Encode `ipa` into batches of at most `max_tokens` ids, breaking only
    /// between words.  A single word longer than `max_tokens` is cut.
    pub fn encode_batches(&self, ipa: &str, max_tokens: usize) -> Vec<Vec<i64>> {
        let max_tokens = max_tokens.max(1);
        let space = self.table.get(&' ').copied();
        let mut batches: Vec<Vec<i64>> = Vec::new();
        let mut current: Vec<i64> = Vec::new();

        for word in ipa.split_whitespace() {
            let ids = self.encode(word);
            if ids.is_empty() {
                continue;
            }
            let sep = usize::from(!current.is_empty() && space.is_some());
            if !current.is_empty() && current.len() + sep + ids.len() > max_tokens {
                batches.push(std::mem::take(&mut current));
            }
            if let (false, Some(sp)) = (current.is_empty(), space) {
                current.push(sp);
            }
            for piece in ids.chunks(max_tokens) {
                if current.len() + piece.len() > max_tokens {
                    batches.push(std::mem::take(&mut current));
                }
                current.extend_from_slice(piece);
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_order() {
        let v = Vocab::default();
        assert_eq!(v.encode("$"), vec![0]);
        assert_eq!(v.encode(";"), vec![1]);
        // 1 pad + 16 punctuation symbols precede 'A'
        assert_eq!(v.encode("A"), vec![1 + PUNCTUATION.chars().count() as i64]);
    }

    #[test]
    fn test_unknown_characters_are_skipped() {
        let v = Vocab::default();
        assert_eq!(v.encode("a\u{1F600}b").len(), 2);
    }

    #[test]
    fn test_config_table_overrides_default() {
        let entries: HashMap<String, i64> =
            [("h".to_string(), 50), ("ə".to_string(), 83), ("ab".to_string(), 9)].into();
        let v = Vocab::from_config(&entries);
        assert_eq!(v.encode("həx"), vec![50, 83]);
    }

    #[test]
    fn test_batches_break_between_words() {
        let v = Vocab::default();
        let batches = v.encode_batches("abc def ghi", 7);
        // "abc def" is 7 tokens with the space; "ghi" spills over.
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 7);
        assert_eq!(batches[1], v.encode("ghi"));
    }

    #[test]
    fn test_oversized_word_is_cut() {
        let v = Vocab::default();
        let batches = v.encode_batches(&"a".repeat(12), 5);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![5, 5, 2]);
    }
}
