use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

/// Lowest tier-point total at which each tier starts, ascending.
const THRESHOLDS: [(Tier, i64); 4] = [
    (Tier::Bronze, 0),
    (Tier::Silver, 100),
    (Tier::Gold, 500),
    (Tier::Platinum, 1000),
];

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
            Tier::Platinum => "platinum",
        }
    }

    pub fn threshold(&self) -> i64 {
        THRESHOLDS
            .iter()
            .find(|(tier, _)| tier == self)
            .map(|(_, min)| *min)
            .unwrap_or(0)
    }

    pub fn next(&self) -> Option<Tier> {
        match self {
            Tier::Bronze => Some(Tier::Silver),
            Tier::Silver => Some(Tier::Gold),
            Tier::Gold => Some(Tier::Platinum),
            Tier::Platinum => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bronze" => Ok(Tier::Bronze),
            "silver" => Ok(Tier::Silver),
            "gold" => Ok(Tier::Gold),
            "platinum" => Ok(Tier::Platinum),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierProgress {
    pub tier: Tier,
    pub next_tier: Option<Tier>,
    /// Tier points still missing to reach `next_tier`.
    pub points_to_next: Option<i64>,
}

pub fn tier_for(tier_points: i64) -> Tier {
    THRESHOLDS
        .iter()
        .rev()
        .find(|(_, min)| tier_points >= *min)
        .map(|(tier, _)| *tier)
        .unwrap_or(Tier::Bronze)
}

pub fn recompute_tier(tier_points: i64) -> TierProgress {
    let tier = tier_for(tier_points);
    let next_tier = tier.next();
    TierProgress {
        tier,
        next_tier,
        points_to_next: next_tier.map(|next| next.threshold() - tier_points),
    }
}
