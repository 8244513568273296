use std::{collections::HashMap, fs, path::Path};

use crate::error::{AsrError, Result};

/// Token used in symbol files for the word separator.
pub const SPACE_TOKEN: &str = "<space>";
/// Token used in symbol files for the CTC blank.
pub const BLANK_TOKEN: &str = "<blank>";

/// Character vocabulary mapping symbols to contiguous class ids.
///
/// The CTC blank is inserted last so that its id is `len() - 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Symbols {
    symbols: Vec<String>,
    ids: HashMap<String, u32>,
}

impl Symbols {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, symbol: &str) -> Result<u32> {
        if let Some(&id) = self.ids.get(symbol) {
            return Ok(id);
        }
        if self.blank().is_some() {
            return Err(AsrError::Symbol(format!(
                "cannot insert `{symbol}` after the blank symbol"
            )));
        }

        let id = self.symbols.len() as u32;
        self.symbols.push(symbol.to_string());
        self.ids.insert(symbol.to_string(), id);
        Ok(id)
    }

    /// Id of `c`, inserting it if it is new.
    pub fn insert_sym(&mut self, c: char) -> Result<u32> {
        if c == ' ' {
            return self.insert_space();
        }
        self.insert(c.encode_utf8(&mut [0; 4]))
    }

    pub fn insert_space(&mut self) -> Result<u32> {
        self.insert(SPACE_TOKEN)
    }

    /// Append the CTC blank; must come after every other symbol.
    pub fn insert_blank(&mut self) -> Result<u32> {
        self.insert(BLANK_TOKEN)
    }

    /// Id of the blank, if it has been inserted.
    pub fn blank(&self) -> Option<u32> {
        self.ids.get(BLANK_TOKEN).copied()
    }

    /// Number of classes, blank included.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn id(&self, c: char) -> Option<u32> {
        match c {
            ' ' => self.ids.get(SPACE_TOKEN).copied(),
            c => self.ids.get(c.encode_utf8(&mut [0; 4]) as &str).copied(),
        }
    }

    /// Encode a transcription, failing on characters outside the vocabulary.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        text.chars()
            .map(|c| {
                self.id(c)
                    .ok_or_else(|| AsrError::Symbol(format!("unknown symbol `{c}` in `{text}`")))
            })
            .collect()
    }

    /// Decode class ids to text; the blank and out-of-range ids are skipped.
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .filter_map(|&id| self.symbols.get(id as usize))
            .filter_map(|symbol| match symbol.as_str() {
                BLANK_TOKEN => None,
                SPACE_TOKEN => Some(" "),
                symbol => Some(symbol),
            })
            .collect()
    }

    /// Write one symbol per line, the line number being the id.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut content = self.symbols.join("\n");
        content.push('\n');
        fs::write(path, content)?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let mut symbols = Symbols::new();
        for (line_number, symbol) in content.lines().enumerate() {
            if symbol.is_empty() {
                continue;
            }
            if symbols.ids.contains_key(symbol) {
                return Err(AsrError::Symbol(format!(
                    "duplicate symbol `{symbol}` on line {} of {}",
                    line_number + 1,
                    path.display()
                )));
            }
            symbols.insert(symbol)?;
        }

        Ok(symbols)
    }

    /// Build a vocabulary from transcriptions and close it with the blank.
    pub fn from_transcriptions<'a, I: IntoIterator<Item = &'a str>>(texts: I) -> Result<Self> {
        let mut symbols = Symbols::new();
        for text in texts {
            for c in text.chars() {
                symbols.insert_sym(c)?;
            }
        }
        symbols.insert_blank()?;
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_contiguous_and_stable() {
        let mut symbols = Symbols::new();
        assert_eq!(symbols.insert_sym('h').unwrap(), 0);
        assert_eq!(symbols.insert_sym('i').unwrap(), 1);
        assert_eq!(symbols.insert_sym(' ').unwrap(), 2);
        assert_eq!(symbols.insert_sym('h').unwrap(), 0);
        assert_eq!(symbols.insert_space().unwrap(), 2);
        assert_eq!(symbols.insert_blank().unwrap(), 3);

        assert_eq!(symbols.len(), 4);
        assert_eq!(symbols.blank(), Some(3));
        assert!(symbols.insert_sym('x').is_err());
    }

    #[test]
    fn encode_and_decode_text() {
        let symbols = Symbols::from_transcriptions(["ab ba", "abc"]).unwrap();

        let ids = symbols.encode("cab a").unwrap();
        assert_eq!(ids, vec![3, 0, 1, 2, 0]);
        assert_eq!(symbols.decode(&ids), "cab a");
        assert_eq!(symbols.decode(&[0, 4, 1, 9]), "ab");
        assert!(symbols.encode("abz").is_err());
    }

    #[test]
    fn write_then_read_preserves_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("symbols.txt");

        let symbols = Symbols::from_transcriptions(["hello world"]).unwrap();
        symbols.write(&path).unwrap();
        let restored = Symbols::read(&path).unwrap();

        assert_eq!(restored, symbols);
        assert_eq!(restored.blank(), Some(symbols.len() as u32 - 1));
    }

    #[test]
    fn read_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("symbols.txt");
        fs::write(&path, "a\nb\na\n").unwrap();

        assert!(matches!(Symbols::read(&path), Err(AsrError::Symbol(_))));
    }
}
