//! Dice rolling for `NdM+K` notation.
//!
//! Supports an optional count (`d20` is `1d20`) and a single signed
//! modifier (`2d6+3`, `1d8-1`).

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Most dice a single expression may roll.
pub const MAX_DICE: u32 = 100;

/// Error type for dice parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiceError {
    #[error("Invalid dice notation '{0}', expected [count]d[sides][+/-modifier] such as d20, 1d20+5, 2d6-1")]
    InvalidNotation(String),
    #[error("Dice count must be between 1 and {MAX_DICE}, got {0}")]
    InvalidCount(u32),
    #[error("Die must have at least one side")]
    InvalidSides,
}

/// A parsed dice expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceExpression {
    pub count: u32,
    pub sides: u32,
    pub modifier: i32,
}

impl DiceExpression {
    /// Parse notation like `2d6+3`.
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let normalized: String = notation
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let invalid = || DiceError::InvalidNotation(notation.trim().to_string());

        let (count_str, rest) = normalized.split_once('d').ok_or_else(invalid)?;
        let (sides_str, modifier) = match rest.find(['+', '-']) {
            Some(pos) => {
                let modifier: i32 = rest[pos..].parse().map_err(|_| invalid())?;
                (&rest[..pos], modifier)
            }
            None => (rest, 0),
        };

        let count: u32 = if count_str.is_empty() {
            1
        } else {
            count_str.parse().map_err(|_| invalid())?
        };
        let sides: u32 = sides_str.parse().map_err(|_| invalid())?;

        if count == 0 || count > MAX_DICE {
            return Err(DiceError::InvalidCount(count));
        }
        if sides == 0 {
            return Err(DiceError::InvalidSides);
        }

        Ok(Self {
            count,
            sides,
            modifier,
        })
    }

    /// Roll the expression.
    pub fn roll(&self) -> RollResult {
        self.roll_with_rng(&mut rand::thread_rng())
    }

    /// Roll with a specific RNG (useful for testing).
    pub fn roll_with_rng<R: Rng>(&self, rng: &mut R) -> RollResult {
        let rolls: Vec<u32> = (0..self.count)
            .map(|_| rng.gen_range(1..=self.sides))
            .collect();
        let dice_total: i64 = rolls.iter().map(|&r| i64::from(r)).sum();
        let total = dice_total + i64::from(self.modifier);

        RollResult {
            expression: *self,
            rolls,
            total,
        }
    }
}

impl FromStr for DiceExpression {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.sides)?;
        match self.modifier {
            0 => Ok(()),
            m if m > 0 => write!(f, "+{m}"),
            m => write!(f, "{m}"),
        }
    }
}

/// Outcome of a roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResult {
    pub expression: DiceExpression,
    pub rolls: Vec<u32>,
    pub total: i64,
}

impl fmt::Display for RollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rolls: Vec<String> = self.rolls.iter().map(|r| r.to_string()).collect();
        write!(f, "{}: [{}]", self.expression, rolls.join(", "))?;
        match self.expression.modifier {
            0 => {}
            m if m > 0 => write!(f, " + {m}")?,
            m => write!(f, " - {}", -i64::from(m))?,
        }
        write!(f, " = {}", self.total)
    }
}

/// Parse and roll in one step.
pub fn roll(notation: &str) -> Result<RollResult, DiceError> {
    Ok(DiceExpression::parse(notation)?.roll())
}
