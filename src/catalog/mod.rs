//! Catalog entities - anatomy and exercises
//!
//! Muscles belong to a muscle group, which belongs to a body region, and
//! take part in exercise areas. Exercises reference muscles with a share
//! percentage. Exercise names are unique case-insensitively.

pub mod anatomy;
pub mod exercise;
pub mod muscle;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

pub use exercise::{Exercise, ExerciseInput, ExerciseMuscle, MuscleInput};
pub use anatomy::{ExerciseArea, MuscleGroup, Region};
pub use muscle::Muscle;

/// How an exercise is performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExerciseType {
    Reps,
    Eccentric,
    Isometric,
}

impl ExerciseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExerciseType::Reps => "Reps",
            ExerciseType::Eccentric => "Eccentric",
            ExerciseType::Isometric => "Isometric",
        }
    }

    /// Get all exercise types
    pub fn all() -> &'static [ExerciseType] {
        &[
            ExerciseType::Reps,
            ExerciseType::Eccentric,
            ExerciseType::Isometric,
        ]
    }
}

impl FromStr for ExerciseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExerciseType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidType(format!("invalid exercise type: {}", s)))
    }
}

impl fmt::Display for ExerciseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
