//! Canonical unit ordering
//!
//! Special units use out-of-band sentinel numbers (a prologue might be stored
//! as 0 or -1, an epilogue as 998 or -2), so raw numeric comparison is wrong.
//! `unit_order` maps every raw number onto a total-order key: prologue first,
//! numbered chapters ascending, then epilogue, then author's note.

use serde::{Deserialize, Serialize};

/// Normalized kind of a manuscript unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Prologue,
    Numbered,
    Epilogue,
    AuthorNote,
}

impl UnitKind {
    /// Classify a raw unit number
    pub fn from_number(number: i32) -> Self {
        match number {
            0 | -1 => Self::Prologue,
            998 | -2 => Self::Epilogue,
            999 | -3 => Self::AuthorNote,
            _ => Self::Numbered,
        }
    }
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prologue => write!(f, "prologue"),
            Self::Numbered => write!(f, "chapter"),
            Self::Epilogue => write!(f, "epilogue"),
            Self::AuthorNote => write!(f, "author_note"),
        }
    }
}

/// Total-order key for canonical unit ordering
///
/// Derived `Ord` on (class, number) gives: prologue < all numbered units
/// (ascending) < epilogue < author's note, regardless of sentinel values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitOrder {
    class: u8,
    number: i32,
}

/// Compute the canonical ordering key for a raw unit number
pub fn unit_order(number: i32) -> UnitOrder {
    let kind = UnitKind::from_number(number);
    let class = match kind {
        UnitKind::Prologue => 0,
        UnitKind::Numbered => 1,
        UnitKind::Epilogue => 2,
        UnitKind::AuthorNote => 3,
    };
    // Sentinels within a class all collapse to one slot
    let number = if kind == UnitKind::Numbered { number } else { 0 };
    UnitOrder { class, number }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prologue_before_numbered_before_epilogue() {
        assert!(unit_order(0) < unit_order(1));
        assert!(unit_order(-1) < unit_order(1));
        assert!(unit_order(42) < unit_order(998));
        assert!(unit_order(42) < unit_order(-2));
        assert!(unit_order(998) < unit_order(999));
        assert!(unit_order(-2) < unit_order(-3));
    }

    #[test]
    fn test_sentinel_aliases_normalize_consistently() {
        assert_eq!(unit_order(0), unit_order(-1));
        assert_eq!(unit_order(998), unit_order(-2));
        assert_eq!(unit_order(999), unit_order(-3));
    }

    #[test]
    fn test_numbered_units_ascending() {
        let mut numbers = vec![7, 2, 15, 1, 9];
        numbers.sort_by_key(|n| unit_order(*n));
        assert_eq!(numbers, vec![1, 2, 7, 9, 15]);
    }

    #[test]
    fn test_full_sort_is_stable_total_order() {
        let mut numbers = vec![999, 5, -2, 1, 0, 998, -1, 3, -3];
        numbers.sort_by_key(|n| unit_order(*n));
        let kinds: Vec<UnitKind> = numbers.iter().map(|n| UnitKind::from_number(*n)).collect();
        assert_eq!(
            kinds,
            vec![
                UnitKind::Prologue,
                UnitKind::Prologue,
                UnitKind::Numbered,
                UnitKind::Numbered,
                UnitKind::Numbered,
                UnitKind::Epilogue,
                UnitKind::Epilogue,
                UnitKind::AuthorNote,
                UnitKind::AuthorNote,
            ]
        );
        assert_eq!(&numbers[2..5], &[1, 3, 5]);
    }
}
