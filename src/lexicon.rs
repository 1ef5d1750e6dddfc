use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 外部词典接口：判断一个单词是否合法
pub trait Lexicon: Send + Sync {
    fn is_valid_word(&self, word: &str) -> bool;
}

impl<F> Lexicon for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_valid_word(&self, word: &str) -> bool {
        self(word)
    }
}

/// 基于词表文件的词典，每行一个单词，统一存为大写
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WordList {
    words: BTreeSet<String>,
}

impl WordList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for word in words {
            list.add_word(word.as_ref());
        }
        list
    }

    /// 从文件加载词表
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("无法读取词表文件: {}", path))?;
        Ok(Self::from_words(content.lines()))
    }

    /// 保存词表到文件
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let mut content = self
            .words
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        content.push('\n');
        std::fs::write(path, content).with_context(|| format!("无法写入词表文件: {}", path))?;
        Ok(())
    }

    /// 添加单词，返回是否为新词；空行与首尾空白被忽略
    pub fn add_word(&mut self, word: &str) -> bool {
        let word = normalize(word);
        if word.is_empty() {
            return false;
        }
        self.words.insert(word)
    }

    pub fn remove_word(&mut self, word: &str) -> bool {
        self.words.remove(&normalize(word))
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(&normalize(word))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> impl Iterator<Item = &String> {
        self.words.iter()
    }

    /// 词表统计信息
    pub fn get_stats(&self) -> WordListStats {
        let mut by_length = BTreeMap::new();
        let mut by_initial = BTreeMap::new();
        for word in &self.words {
            *by_length.entry(word.chars().count()).or_insert(0) += 1;
            if let Some(initial) = word.chars().next() {
                *by_initial.entry(initial).or_insert(0) += 1;
            }
        }
        WordListStats {
            total_words: self.words.len(),
            by_length,
            by_initial,
        }
    }

    /// 检查词表完整性
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for word in &self.words {
            if word.chars().count() < 2 {
                errors.push(format!("单词 '{}' 长度小于 2，永远无法组成", word));
            }
            if !word.chars().all(|c| c.is_ascii_alphabetic()) {
                errors.push(format!("单词 '{}' 包含非字母字符", word));
            }
        }
        errors
    }
}

impl Lexicon for WordList {
    fn is_valid_word(&self, word: &str) -> bool {
        self.contains(word)
    }
}

fn normalize(word: &str) -> String {
    word.trim().to_uppercase()
}

#[derive(Debug, Clone)]
pub struct WordListStats {
    pub total_words: usize,
    pub by_length: BTreeMap<usize, usize>,
    pub by_initial: BTreeMap<char, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let list = WordList::from_words(["cat", " Dog ", ""]);
        assert_eq!(list.len(), 2);
        assert!(list.is_valid_word("CAT"));
        assert!(list.is_valid_word("dog"));
        assert!(!list.is_valid_word("cow"));
    }

    #[test]
    fn closures_act_as_lexicons() {
        let only_short = |w: &str| w.len() <= 3;
        assert!(only_short.is_valid_word("CAT"));
        assert!(!only_short.is_valid_word("HORSE"));
    }

    #[test]
    fn validate_reports_unplayable_entries() {
        let list = WordList::from_words(["a", "ok", "x-ray"]);
        let errors = list.validate();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn save_and_load_round_trip() {
        let path = std::env::temp_dir().join(format!("word-mines-{}.txt", uuid::Uuid::new_v4()));
        let path = path.to_string_lossy().to_string();
        let list = WordList::from_words(["zeta", "alpha"]);
        list.save_to_file(&path).unwrap();
        let loaded = WordList::load_from_file(&path).unwrap();
        assert_eq!(loaded.words().cloned().collect::<Vec<_>>(), vec!["ALPHA", "ZETA"]);
        let _ = std::fs::remove_file(&path);
    }
}
