//! Word list used to validate finished boards

use log::info;
use std::collections::HashSet;
use std::io;
use std::path::Path;

/// Case-insensitive set of accepted words
#[derive(Debug, Clone, Default)]
pub struct WordList {
    words: HashSet<String>,
}

impl WordList {
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .filter_map(|word| normalize(word.as_ref()))
            .collect();
        Self { words }
    }

    /// Parses one word per line; blank lines and `#` comments are skipped
    pub fn parse(contents: &str) -> Self {
        Self::from_words(contents.lines().filter(|line| !line.trim_start().starts_with('#')))
    }

    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let list = Self::parse(&contents);
        info!("Loaded {} words from {}", list.len(), path.display());
        Ok(list)
    }

    pub fn contains(&self, word: &str) -> bool {
        normalize(word).map_or(false, |word| self.words.contains(&word))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

fn normalize(word: &str) -> Option<String> {
    let word = word.trim();
    if word.is_empty() {
        None
    } else {
        Some(word.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_word_list() {
        let list = WordList::parse("# comment\ncat\n\n  Dog \nAB\n");
        assert_eq!(list.len(), 3);
        assert!(list.contains("cat"));
        assert!(list.contains("DOG"));
        assert!(list.contains("ab"));
        assert!(!list.contains("comment"));
        assert!(!list.contains(""));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(WordList::load("/definitely/not/here.txt").is_err());
    }
}
