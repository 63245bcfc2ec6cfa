//! Token cleaning for incoming messages.
//!
//! Tokens are cut to a fixed number of code points and then stripped of any
//! character outside the letter, number and punctuation categories, so that
//! bidirectional controls, zero-width characters and the like never reach the
//! word set.

use unicode_general_category::{GeneralCategory, get_general_category};

/// Maximum length of a token, in code points, before character filtering.
pub const MAX_TOKEN_CHARS: usize = 50;

/// Decides whether a character may appear inside a token.
pub type CharFilter = fn(char) -> bool;

/// Default [`CharFilter`]: letters, numbers and punctuation only.
///
/// Accepted general categories are Lu, Ll, Lt, Lm, Lo, Nd, Nl, No, Pc, Pd,
/// Ps, Pe, Pi, Pf and Po. Marks, symbols, separators and control/format
/// characters are rejected.
pub fn is_allowed_char(c: char) -> bool {
    matches!(
        get_general_category(c),
        GeneralCategory::UppercaseLetter
            | GeneralCategory::LowercaseLetter
            | GeneralCategory::TitlecaseLetter
            | GeneralCategory::ModifierLetter
            | GeneralCategory::OtherLetter
            | GeneralCategory::DecimalNumber
            | GeneralCategory::LetterNumber
            | GeneralCategory::OtherNumber
            | GeneralCategory::ConnectorPunctuation
            | GeneralCategory::DashPunctuation
            | GeneralCategory::OpenPunctuation
            | GeneralCategory::ClosePunctuation
            | GeneralCategory::InitialPunctuation
            | GeneralCategory::FinalPunctuation
            | GeneralCategory::OtherPunctuation
    )
}

/// Truncate `raw` to [`MAX_TOKEN_CHARS`] code points, then drop every
/// character `filter` rejects. May return an empty string.
pub fn clean_token(raw: &str, filter: CharFilter) -> String {
    raw.chars()
        .take(MAX_TOKEN_CHARS)
        .filter(|c| filter(*c))
        .collect()
}
