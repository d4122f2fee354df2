//! The closed token vocabulary shared by the feed and the store.
//!
//! Codes are fixed: they are what the `link` and `capture` check constraints
//! test against, and what previously written stores already contain.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which column family a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Region,
    RoadType,
    SaturationLevel,
}

/// A controlled-vocabulary label with its persisted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    Hk,
    Kowloon,
    Tm,
    St,
    MajorRoute,
    UrbanRoad,
    TrafficGood,
    TrafficAverage,
    TrafficBad,
}

impl Token {
    /// All tokens in code order.
    pub const ALL: [Token; 9] = [
        Token::Hk,
        Token::Kowloon,
        Token::Tm,
        Token::St,
        Token::MajorRoute,
        Token::UrbanRoad,
        Token::TrafficGood,
        Token::TrafficAverage,
        Token::TrafficBad,
    ];

    pub fn code(self) -> i64 {
        match self {
            Token::Hk => 0,
            Token::Kowloon => 1,
            Token::Tm => 2,
            Token::St => 3,
            Token::MajorRoute => 4,
            Token::UrbanRoad => 5,
            Token::TrafficGood => 6,
            Token::TrafficAverage => 7,
            Token::TrafficBad => 8,
        }
    }

    /// The label as it appears in the feed.
    pub fn label(self) -> &'static str {
        match self {
            Token::Hk => "HK",
            Token::Kowloon => "K",
            Token::Tm => "TM",
            Token::St => "ST",
            Token::MajorRoute => "MAJOR ROUTE",
            Token::UrbanRoad => "URBAN ROAD",
            Token::TrafficGood => "TRAFFIC GOOD",
            Token::TrafficAverage => "TRAFFIC AVERAGE",
            Token::TrafficBad => "TRAFFIC BAD",
        }
    }

    pub fn kind(self) -> TokenKind {
        match self {
            Token::Hk | Token::Kowloon | Token::Tm | Token::St => TokenKind::Region,
            Token::MajorRoute | Token::UrbanRoad => TokenKind::RoadType,
            Token::TrafficGood | Token::TrafficAverage | Token::TrafficBad => {
                TokenKind::SaturationLevel
            }
        }
    }

    /// Exact, case-sensitive label lookup.
    pub fn from_label(label: &str) -> Option<Token> {
        Token::ALL.into_iter().find(|t| t.label() == label)
    }

    pub fn from_code(code: i64) -> Option<Token> {
        Token::ALL.into_iter().find(|t| t.code() == code)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown token: {0:?}")]
pub struct UnknownLabel(pub String);

impl FromStr for Token {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Token::from_label(s).ok_or_else(|| UnknownLabel(s.to_string()))
    }
}

/// SQL list of the codes of one kind, e.g. `0,1,2,3`, for check constraints.
pub fn code_list(kind: TokenKind) -> String {
    Token::ALL
        .iter()
        .filter(|t| t.kind() == kind)
        .map(|t| t.code().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_token_round_trips() {
        for token in Token::ALL {
            assert_eq!(Token::from_label(token.label()), Some(token));
            assert_eq!(Token::from_code(token.code()), Some(token));
            assert_eq!(token.label().parse::<Token>(), Ok(token));
        }
    }

    #[test]
    fn test_codes_follow_declaration_order() {
        for (i, token) in Token::ALL.iter().enumerate() {
            assert_eq!(token.code(), i as i64);
        }
    }

    #[test]
    fn test_partition() {
        assert_eq!(code_list(TokenKind::Region), "0,1,2,3");
        assert_eq!(code_list(TokenKind::RoadType), "4,5");
        assert_eq!(code_list(TokenKind::SaturationLevel), "6,7,8");
    }

    #[test]
    fn test_unknown_labels() {
        assert_eq!(Token::from_label("UNKNOWN"), None);
        assert_eq!(Token::from_label("hk"), None);
        assert_eq!(Token::from_label(" HK"), None);
        assert_eq!(Token::from_code(9), None);
        assert_eq!(Token::from_code(-1), None);
        let err = "TRAFFIC  GOOD".parse::<Token>().unwrap_err();
        assert_eq!(err.to_string(), "unknown token: \"TRAFFIC  GOOD\"");
    }
}
