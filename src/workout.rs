//! User-owned workouts and their exercise entries
//!
//! A workout belongs to exactly one identity. Every lookup is scoped to the
//! owner, so another user's workout or entry is indistinguishable from a
//! missing one.

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::catalog::ExerciseType;
use crate::identity::Identity;
use crate::storage::Transaction;
use crate::{Error, Result};

/// One exercise slot in a workout
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkoutExercise {
    pub id: i64,
    pub version: i64,
    pub workout_id: i64,
    pub exercise_id: i64,
    pub exercise_name: String,
    pub exercise_type: ExerciseType,
    pub position: i64,
    pub sets: Option<i64>,
    pub reps: Option<i64>,
    pub time_seconds: Option<i64>,
    pub weight: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workout {
    pub id: i64,
    pub version: i64,
    pub name: String,
    pub created_when: String,
    pub modified_when: String,
    /// Entries ordered by position
    pub exercises: Vec<WorkoutExercise>,
}

/// Prescription shared by new and updated entries
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryDetails {
    #[serde(default)]
    pub position: Option<i64>,
    pub sets: Option<i64>,
    pub reps: Option<i64>,
    pub time_seconds: Option<i64>,
    pub weight: Option<f64>,
    pub notes: Option<String>,
}

/// Body of `POST /workouts/{id}/exercises`
#[derive(Debug, Clone, Deserialize)]
pub struct NewEntry {
    pub exercise_id: i64,
    #[serde(flatten)]
    pub details: EntryDetails,
}

/// Body of `POST /workouts`
#[derive(Debug, Clone, Deserialize)]
pub struct NewWorkout {
    pub name: String,
    #[serde(default)]
    pub exercises: Vec<NewEntry>,
}

/// Body of `PUT /workouts/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct WorkoutUpdate {
    pub name: String,
}

impl EntryDetails {
    fn validate(&self) -> Result<()> {
        let counts = [
            ("position", self.position),
            ("sets", self.sets),
            ("reps", self.reps),
            ("time_seconds", self.time_seconds),
        ];
        for (field, value) in counts {
            if value.is_some_and(|v| v < 0) {
                return Err(Error::InvalidInput(format!("{} must not be negative", field)));
            }
        }
        if self.weight.is_some_and(|w| !w.is_finite() || w < 0.0) {
            return Err(Error::InvalidInput("weight must not be negative".to_string()));
        }
        Ok(())
    }
}

fn required_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("workout name is required".to_string()));
    }
    Ok(name.to_string())
}

// ========== Row access ==========

const SELECT_ENTRY: &str = "SELECT we.id, we.version, we.workout_id, we.exercise_id, e.name, e.type,
        we.position, we.sets, we.reps, we.time_seconds, we.weight, we.notes
     FROM workout_exercise we
     JOIN exercise e ON we.exercise_id = e.id";

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<WorkoutExercise> {
    let type_str: String = row.get(5)?;
    let exercise_type = type_str.parse::<ExerciseType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(WorkoutExercise {
        id: row.get(0)?,
        version: row.get(1)?,
        workout_id: row.get(2)?,
        exercise_id: row.get(3)?,
        exercise_name: row.get(4)?,
        exercise_type,
        position: row.get(6)?,
        sets: row.get(7)?,
        reps: row.get(8)?,
        time_seconds: row.get(9)?,
        weight: row.get(10)?,
        notes: row.get(11)?,
    })
}

fn entries_for(conn: &Connection, workout_id: i64) -> Result<Vec<WorkoutExercise>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE we.workout_id = ?1 ORDER BY we.position, we.id",
        SELECT_ENTRY
    ))?;
    let entries = stmt
        .query_map([workout_id], row_to_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

fn row_to_workout(row: &rusqlite::Row) -> rusqlite::Result<Workout> {
    Ok(Workout {
        id: row.get(0)?,
        version: row.get(1)?,
        name: row.get(2)?,
        created_when: row.get(3)?,
        modified_when: row.get(4)?,
        exercises: Vec::new(),
    })
}

/// Load a workout owned by `user_id`, or `NotFound`
fn owned(conn: &Connection, id: i64, user_id: i64) -> Result<Workout> {
    let mut workout = conn
        .query_row(
            "SELECT id, version, name, created_when, modified_when
             FROM workout WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
            row_to_workout,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("workout {}", id)))?;
    workout.exercises = entries_for(conn, id)?;
    Ok(workout)
}

/// Load an entry whose workout is owned by `user_id`, or `NotFound`
fn owned_entry(conn: &Connection, entry_id: i64, user_id: i64) -> Result<WorkoutExercise> {
    conn.query_row(
        &format!(
            "{} JOIN workout w ON we.workout_id = w.id WHERE we.id = ?1 AND w.user_id = ?2",
            SELECT_ENTRY
        ),
        params![entry_id, user_id],
        row_to_entry,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("workout exercise {}", entry_id)))
}

fn insert_entry(conn: &Connection, workout_id: i64, entry: &NewEntry, actor: &str) -> Result<i64> {
    let known: Option<i64> = conn
        .query_row("SELECT id FROM exercise WHERE id = ?1", [entry.exercise_id], |row| row.get(0))
        .optional()?;
    if known.is_none() {
        return Err(Error::InvalidInput(format!("unknown exercise id {}", entry.exercise_id)));
    }

    // Appends after the last entry when no position is given
    let position = match entry.details.position {
        Some(p) => p,
        None => conn.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM workout_exercise WHERE workout_id = ?1",
            [workout_id],
            |row| row.get(0),
        )?,
    };

    let d = &entry.details;
    conn.execute(
        "INSERT INTO workout_exercise
             (workout_id, exercise_id, position, sets, reps, time_seconds, weight, notes, created_by, modified_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![workout_id, entry.exercise_id, position, d.sets, d.reps, d.time_seconds, d.weight, d.notes, actor],
    )?;
    Ok(conn.last_insert_rowid())
}

fn touch_workout(conn: &Connection, workout_id: i64, actor: &str) -> Result<()> {
    conn.execute(
        "UPDATE workout SET modified_when = datetime('now'), modified_by = ?1 WHERE id = ?2",
        params![actor, workout_id],
    )?;
    Ok(())
}

// ========== Workouts ==========

/// Workouts owned by `user_id`, newest first
pub async fn list_for(tx: &Transaction, user_id: i64) -> Result<Vec<Workout>> {
    tx.run(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, version, name, created_when, modified_when
             FROM workout WHERE user_id = ?1 ORDER BY id DESC",
        )?;
        let mut workouts = stmt
            .query_map([user_id], row_to_workout)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for w in &mut workouts {
            w.exercises = entries_for(conn, w.id)?;
        }
        Ok(workouts)
    })
    .await
}

pub async fn get_for(tx: &Transaction, id: i64, user_id: i64) -> Result<Workout> {
    tx.run(move |conn| owned(conn, id, user_id)).await
}

/// Create a workout for `owner`, with optional initial entries
pub async fn create(tx: &Transaction, owner: &Identity, input: NewWorkout) -> Result<Workout> {
    let name = required_name(&input.name)?;
    for entry in &input.exercises {
        entry.details.validate()?;
    }
    let (user_id, actor) = (owner.id, owner.subject_id.clone());

    tx.run(move |conn| {
        conn.execute(
            "INSERT INTO workout (user_id, name, created_by, modified_by) VALUES (?1, ?2, ?3, ?3)",
            params![user_id, name, actor],
        )?;
        let workout_id = conn.last_insert_rowid();

        for entry in &input.exercises {
            insert_entry(conn, workout_id, entry, &actor)?;
        }
        tracing::debug!(workout_id, user_id, "Created workout");
        owned(conn, workout_id, user_id)
    })
    .await
}

/// Rename a workout
pub async fn update(tx: &Transaction, id: i64, owner: &Identity, input: WorkoutUpdate) -> Result<Workout> {
    let name = required_name(&input.name)?;
    let (user_id, actor) = (owner.id, owner.subject_id.clone());

    tx.run(move |conn| {
        owned(conn, id, user_id)?;
        conn.execute(
            "UPDATE workout
             SET name = ?1, modified_by = ?2, modified_when = datetime('now'), version = version + 1
             WHERE id = ?3",
            params![name, actor, id],
        )?;
        owned(conn, id, user_id)
    })
    .await
}

/// Delete a workout and its entries
pub async fn delete(tx: &Transaction, id: i64, user_id: i64) -> Result<()> {
    tx.run(move |conn| {
        owned(conn, id, user_id)?;
        conn.execute("DELETE FROM workout WHERE id = ?1", [id])?;
        tracing::debug!(workout_id = id, user_id, "Deleted workout");
        Ok(())
    })
    .await
}

// ========== Entries ==========

/// Add an exercise to an owned workout
pub async fn add_exercise(
    tx: &Transaction,
    workout_id: i64,
    owner: &Identity,
    entry: NewEntry,
) -> Result<WorkoutExercise> {
    entry.details.validate()?;
    let (user_id, actor) = (owner.id, owner.subject_id.clone());

    tx.run(move |conn| {
        owned(conn, workout_id, user_id)?;
        let entry_id = insert_entry(conn, workout_id, &entry, &actor)?;
        touch_workout(conn, workout_id, &actor)?;
        owned_entry(conn, entry_id, user_id)
    })
    .await
}

/// Replace the prescription of an entry; an omitted position keeps the current one
pub async fn update_exercise(
    tx: &Transaction,
    entry_id: i64,
    owner: &Identity,
    details: EntryDetails,
) -> Result<WorkoutExercise> {
    details.validate()?;
    let (user_id, actor) = (owner.id, owner.subject_id.clone());

    tx.run(move |conn| {
        let current = owned_entry(conn, entry_id, user_id)?;
        let position = details.position.unwrap_or(current.position);
        conn.execute(
            "UPDATE workout_exercise
             SET position = ?1, sets = ?2, reps = ?3, time_seconds = ?4, weight = ?5, notes = ?6,
                 modified_by = ?7, modified_when = datetime('now'), version = version + 1
             WHERE id = ?8",
            params![
                position,
                details.sets,
                details.reps,
                details.time_seconds,
                details.weight,
                details.notes,
                actor,
                entry_id
            ],
        )?;
        touch_workout(conn, current.workout_id, &actor)?;
        owned_entry(conn, entry_id, user_id)
    })
    .await
}

pub async fn remove_exercise(tx: &Transaction, entry_id: i64, owner: &Identity) -> Result<()> {
    let (user_id, actor) = (owner.id, owner.subject_id.clone());

    tx.run(move |conn| {
        let current = owned_entry(conn, entry_id, user_id)?;
        conn.execute("DELETE FROM workout_exercise WHERE id = ?1", [entry_id])?;
        touch_workout(conn, current.workout_id, &actor)?;
        Ok(())
    })
    .await
}
