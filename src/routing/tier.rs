use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Complexity bucket a request is classified into.
///
/// The set is closed: anything outside these four values is rejected at the
/// API boundary instead of being carried through the assignment manager as a
/// freeform string.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Tier {
    Simple,
    Standard,
    Complex,
    Reasoning,
}

impl Tier {
    /// Map a 0-100 complexity score onto a tier.
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=15 => Tier::Simple,
            16..=45 => Tier::Standard,
            46..=70 => Tier::Complex,
            _ => Tier::Reasoning,
        }
    }

    /// Representative score for a tier, used when a short-circuit path skips
    /// the weighted scoring.
    pub fn to_score(self) -> u32 {
        match self {
            Tier::Simple => 8,
            Tier::Standard => 30,
            Tier::Complex => 58,
            Tier::Reasoning => 85,
        }
    }

    /// Label shown in operator-facing notifications.
    pub fn display_label(self) -> &'static str {
        match self {
            Tier::Simple => "Simple",
            Tier::Standard => "Standard",
            Tier::Complex => "Complex",
            Tier::Reasoning => "Reasoning",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_known_tiers_case_insensitively() {
        assert_eq!(Tier::from_str("simple").unwrap(), Tier::Simple);
        assert_eq!(Tier::from_str("Reasoning").unwrap(), Tier::Reasoning);
        assert_eq!(Tier::from_str("STANDARD").unwrap(), Tier::Standard);
    }

    #[test]
    fn rejects_unknown_tier_names() {
        assert!(Tier::from_str("frontier").is_err());
        assert!(Tier::from_str("").is_err());
        assert!(Tier::from_str("simple ").is_err());
    }

    #[test]
    fn score_bands_round_trip() {
        assert_eq!(Tier::from_score(0), Tier::Simple);
        assert_eq!(Tier::from_score(15), Tier::Simple);
        assert_eq!(Tier::from_score(16), Tier::Standard);
        assert_eq!(Tier::from_score(46), Tier::Complex);
        assert_eq!(Tier::from_score(71), Tier::Reasoning);
        assert_eq!(Tier::from_score(100), Tier::Reasoning);
        for tier in [Tier::Simple, Tier::Standard, Tier::Complex, Tier::Reasoning] {
            assert_eq!(Tier::from_score(tier.to_score()), tier);
        }
    }

    #[test]
    fn display_matches_wire_format() {
        assert_eq!(Tier::Simple.to_string(), "simple");
        assert_eq!(Tier::Reasoning.to_string(), "reasoning");
    }
}
