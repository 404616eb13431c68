//! Exercises and their muscle shares

use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use super::ExerciseType;
use crate::identity::Identity;
use crate::storage::Transaction;
use crate::{Error, Result};

/// A muscle worked by an exercise
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExerciseMuscle {
    pub muscle_id: i64,
    pub muscle_name: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exercise {
    pub id: i64,
    pub version: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub exercise_type: ExerciseType,
    pub created_when: String,
    pub created_by: Option<String>,
    pub modified_when: String,
    pub modified_by: Option<String>,
    pub muscles: Vec<ExerciseMuscle>,
}

/// Muscle share in a create/update request
#[derive(Debug, Clone, Deserialize)]
pub struct MuscleInput {
    pub muscle_id: i64,
    pub percentage: f64,
}

/// Body of `POST /exercises` and `PUT /exercises/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct ExerciseInput {
    pub name: String,
    #[serde(rename = "type")]
    pub exercise_type: String,
    pub muscles: Vec<MuscleInput>,
}

/// Checked form of [`ExerciseInput`]
struct ValidExercise {
    name: String,
    exercise_type: ExerciseType,
    muscles: Vec<MuscleInput>,
}

impl ExerciseInput {
    fn validate(self) -> Result<ValidExercise> {
        let exercise_type: ExerciseType = self.exercise_type.parse()?;

        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidInput("exercise name is required".to_string()));
        }
        if self.muscles.is_empty() {
            return Err(Error::InvalidInput("at least one muscle is required".to_string()));
        }

        let mut seen = HashSet::new();
        for m in &self.muscles {
            if !(1.0..=100.0).contains(&m.percentage) {
                return Err(Error::InvalidInput(format!(
                    "percentage for muscle {} must be between 1 and 100",
                    m.muscle_id
                )));
            }
            if !seen.insert(m.muscle_id) {
                return Err(Error::InvalidInput(format!(
                    "muscle {} listed more than once",
                    m.muscle_id
                )));
            }
        }

        Ok(ValidExercise {
            name,
            exercise_type,
            muscles: self.muscles,
        })
    }
}

const SELECT_EXERCISE: &str = "SELECT id, version, name, type, created_when, created_by, modified_when, modified_by FROM exercise";

fn row_to_exercise(row: &rusqlite::Row) -> rusqlite::Result<Exercise> {
    let type_str: String = row.get(3)?;
    let exercise_type = type_str.parse::<ExerciseType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Exercise {
        id: row.get(0)?,
        version: row.get(1)?,
        name: row.get(2)?,
        exercise_type,
        created_when: row.get(4)?,
        created_by: row.get(5)?,
        modified_when: row.get(6)?,
        modified_by: row.get(7)?,
        muscles: Vec::new(),
    })
}

fn muscles_for(conn: &Connection, exercise_id: Option<i64>) -> Result<HashMap<i64, Vec<ExerciseMuscle>>> {
    let mut stmt = conn.prepare(
        "SELECT em.exercise_id, em.muscle_id, m.name, em.percentage
         FROM exercise_muscle em
         JOIN muscle m ON em.muscle_id = m.id
         WHERE ?1 IS NULL OR em.exercise_id = ?1
         ORDER BY em.exercise_id, em.percentage DESC",
    )?;

    let mut by_exercise: HashMap<i64, Vec<ExerciseMuscle>> = HashMap::new();
    let rows = stmt.query_map([exercise_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            ExerciseMuscle {
                muscle_id: row.get(1)?,
                muscle_name: row.get(2)?,
                percentage: row.get(3)?,
            },
        ))
    })?;
    for row in rows {
        let (id, muscle) = row?;
        by_exercise.entry(id).or_default().push(muscle);
    }
    Ok(by_exercise)
}

fn name_taken(conn: &Connection, name: &str, except: Option<i64>) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM exercise WHERE LOWER(name) = LOWER(?1) AND (?2 IS NULL OR id != ?2)",
        params![name, except],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn insert_muscles(conn: &Connection, exercise_id: i64, muscles: &[MuscleInput], actor: &str) -> Result<()> {
    for m in muscles {
        let known: Option<i64> = conn
            .query_row("SELECT id FROM muscle WHERE id = ?1", [m.muscle_id], |row| row.get(0))
            .optional()?;
        if known.is_none() {
            return Err(Error::InvalidInput(format!("unknown muscle id {}", m.muscle_id)));
        }

        conn.execute(
            "INSERT INTO exercise_muscle (exercise_id, muscle_id, percentage, created_by) VALUES (?1, ?2, ?3, ?4)",
            params![exercise_id, m.muscle_id, m.percentage, actor],
        )?;
    }
    Ok(())
}

// ========== Queries ==========

/// All exercises with their muscles, ordered by type then name
pub async fn list(tx: &Transaction) -> Result<Vec<Exercise>> {
    tx.run(|conn| {
        let mut stmt = conn.prepare(&format!("{} ORDER BY type, name", SELECT_EXERCISE))?;
        let mut exercises = stmt
            .query_map([], row_to_exercise)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut muscles = muscles_for(conn, None)?;
        for exercise in &mut exercises {
            exercise.muscles = muscles.remove(&exercise.id).unwrap_or_default();
        }
        Ok(exercises)
    })
    .await
}

/// A single exercise with its muscles
pub async fn get(tx: &Transaction, id: i64) -> Result<Exercise> {
    tx.run(move |conn| {
        let mut exercise = conn
            .query_row(&format!("{} WHERE id = ?1", SELECT_EXERCISE), [id], row_to_exercise)
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("exercise {}", id)))?;
        exercise.muscles = muscles_for(conn, Some(id))?.remove(&id).unwrap_or_default();
        Ok(exercise)
    })
    .await
}

// ========== Mutations ==========

/// Create an exercise and its muscle shares, returning the new id
pub async fn create(tx: &Transaction, input: ExerciseInput, actor: &Identity) -> Result<i64> {
    let input = input.validate()?;
    let actor = actor.subject_id.clone();
    tracing::info!(name = %input.name, by = %actor, "Creating exercise");

    tx.run(move |conn| {
        if name_taken(conn, &input.name, None)? {
            return Err(Error::DuplicateName(format!(
                "exercise with name '{}' already exists",
                input.name
            )));
        }

        conn.execute(
            "INSERT INTO exercise (name, type, created_by, modified_by) VALUES (?1, ?2, ?3, ?3)",
            params![input.name, input.exercise_type.as_str(), actor],
        )?;
        let exercise_id = conn.last_insert_rowid();

        insert_muscles(conn, exercise_id, &input.muscles, &actor)?;
        tracing::debug!(exercise_id, "Created exercise");
        Ok(exercise_id)
    })
    .await
}

/// Replace an exercise's name, type and muscle shares
pub async fn update(tx: &Transaction, id: i64, input: ExerciseInput, actor: &Identity) -> Result<()> {
    let input = input.validate()?;
    let actor = actor.subject_id.clone();
    tracing::info!(exercise_id = id, by = %actor, "Updating exercise");

    tx.run(move |conn| {
        let exists: Option<i64> = conn
            .query_row("SELECT id FROM exercise WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("exercise {}", id)));
        }

        if name_taken(conn, &input.name, Some(id))? {
            return Err(Error::DuplicateName(format!(
                "exercise with name '{}' already exists",
                input.name
            )));
        }

        conn.execute(
            "UPDATE exercise
             SET name = ?1, type = ?2, modified_by = ?3, modified_when = datetime('now'), version = version + 1
             WHERE id = ?4",
            params![input.name, input.exercise_type.as_str(), actor, id],
        )?;
        conn.execute("DELETE FROM exercise_muscle WHERE exercise_id = ?1", [id])?;
        insert_muscles(conn, id, &input.muscles, &actor)?;
        Ok(())
    })
    .await
}
