//! ISO 639-2 language codes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// A three-letter ISO 639-2 language code, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LanguageCode(String);

impl LanguageCode {
    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// English, the default for guide data and audio tracks.
    pub fn english() -> Self {
        Self("eng".to_string())
    }
}

impl Default for LanguageCode {
    fn default() -> Self {
        Self::english()
    }
}

impl FromStr for LanguageCode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_lowercase();
        if code.len() == 3 && code.bytes().all(|b| b.is_ascii_lowercase()) {
            Ok(Self(code))
        } else {
            Err(ModelError::InvalidLanguageCode(s.to_string()))
        }
    }
}

impl TryFrom<String> for LanguageCode {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LanguageCode> for String {
    fn from(code: LanguageCode) -> Self {
        code.0
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_code_normalizes_case() {
        let code: LanguageCode = "GER".parse().unwrap();
        assert_eq!(code.as_str(), "ger");
    }

    #[test]
    fn test_language_code_rejects_bad_input() {
        assert!("en".parse::<LanguageCode>().is_err());
        assert!("e1g".parse::<LanguageCode>().is_err());
        assert!(serde_json::from_str::<LanguageCode>("\"english\"").is_err());
    }
}
