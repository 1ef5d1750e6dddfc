use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 牌面：普通字母或万能牌
///
/// 序列化为单字符字符串（万能牌为 `?`），可以直接作为 JSON 对象的键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Glyph {
    Letter(char),
    Wildcard,
}

impl From<Glyph> for String {
    fn from(glyph: Glyph) -> String {
        glyph.to_string()
    }
}

impl TryFrom<String> for Glyph {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let mut chars = value.chars();
        match (chars.next(), chars.next()) {
            (Some('?'), None) => Ok(Glyph::Wildcard),
            (Some(c), None) if c.is_alphabetic() => Ok(Glyph::Letter(c.to_ascii_uppercase())),
            _ => Err(format!("无效的牌面: {}", value)),
        }
    }
}

impl fmt::Display for Glyph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Glyph::Letter(c) => write!(f, "{}", c),
            Glyph::Wildcard => write!(f, "?"),
        }
    }
}

/// 字母牌
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tile {
    pub glyph: Glyph,
    pub value: i32,
}

impl Tile {
    /// 按标准分值创建字母牌，非字母返回 None
    pub fn letter(c: char) -> Option<Tile> {
        let c = c.to_ascii_uppercase();
        let value = letter_value(c)?;
        Some(Tile {
            glyph: Glyph::Letter(c),
            value,
        })
    }

    pub fn wildcard() -> Tile {
        Tile {
            glyph: Glyph::Wildcard,
            value: 0,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.glyph == Glyph::Wildcard
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.glyph, self.value)
    }
}

/// 标准牌组一项：牌面、张数、分值
#[derive(Debug, Clone, Copy)]
pub struct TileSpec {
    pub glyph: Glyph,
    pub count: u32,
    pub value: i32,
}

/// 标准 100 张牌组
pub static STANDARD_DISTRIBUTION: Lazy<Vec<TileSpec>> = Lazy::new(|| {
    let letters: [(char, u32, i32); 26] = [
        ('A', 9, 1),
        ('B', 2, 3),
        ('C', 2, 3),
        ('D', 4, 2),
        ('E', 12, 1),
        ('F', 2, 4),
        ('G', 3, 2),
        ('H', 2, 4),
        ('I', 9, 1),
        ('J', 1, 8),
        ('K', 1, 5),
        ('L', 4, 1),
        ('M', 2, 3),
        ('N', 6, 1),
        ('O', 8, 1),
        ('P', 2, 3),
        ('Q', 1, 10),
        ('R', 6, 1),
        ('S', 4, 1),
        ('T', 6, 1),
        ('U', 4, 1),
        ('V', 2, 4),
        ('W', 2, 4),
        ('X', 1, 8),
        ('Y', 2, 4),
        ('Z', 1, 10),
    ];
    let mut specs: Vec<TileSpec> = letters
        .iter()
        .map(|&(c, count, value)| TileSpec {
            glyph: Glyph::Letter(c),
            count,
            value,
        })
        .collect();
    specs.push(TileSpec {
        glyph: Glyph::Wildcard,
        count: 2,
        value: 0,
    });
    specs
});

static LETTER_VALUES: Lazy<BTreeMap<char, i32>> = Lazy::new(|| {
    STANDARD_DISTRIBUTION
        .iter()
        .filter_map(|spec| match spec.glyph {
            Glyph::Letter(c) => Some((c, spec.value)),
            Glyph::Wildcard => None,
        })
        .collect()
});

/// 标准字母分值
pub fn letter_value(c: char) -> Option<i32> {
    LETTER_VALUES.get(&c.to_ascii_uppercase()).copied()
}

/// 标准牌组总张数
pub fn standard_tile_count() -> u32 {
    STANDARD_DISTRIBUTION.iter().map(|spec| spec.count).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_set_has_one_hundred_tiles() {
        assert_eq!(standard_tile_count(), 100);
    }

    #[test]
    fn glyph_serializes_as_plain_string() {
        let json = serde_json::to_string(&Glyph::Letter('K')).unwrap();
        assert_eq!(json, "\"K\"");
        let back: Glyph = serde_json::from_str("\"?\"").unwrap();
        assert_eq!(back, Glyph::Wildcard);
        assert!(serde_json::from_str::<Glyph>("\"AB\"").is_err());
    }

    #[test]
    fn letter_lookup_is_case_insensitive() {
        assert_eq!(Tile::letter('q'), Tile::letter('Q'));
        assert_eq!(letter_value('z'), Some(10));
        assert_eq!(Tile::letter('1'), None);
    }
}
