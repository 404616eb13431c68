use axum::{Json, http::StatusCode};
use serde_json::{Value, json};

use super::context::{CurrentIdentity, Executor, JsonBody, PathId};
use crate::Result;
use crate::catalog::{self, Exercise, ExerciseArea, ExerciseInput, ExerciseType, Muscle, MuscleGroup, Region};
use crate::identity::{self, Identity};
use crate::workout::{self, EntryDetails, NewEntry, NewWorkout, Workout, WorkoutExercise, WorkoutUpdate};

pub async fn hello() -> Json<Value> {
    Json(json!({ "message": "hello" }))
}

pub async fn list_users(Executor(tx): Executor) -> Result<Json<Vec<Identity>>> {
    Ok(Json(identity::list(&tx).await?))
}

// ========== Reference data ==========

pub async fn list_regions(Executor(tx): Executor) -> Result<Json<Vec<Region>>> {
    Ok(Json(catalog::anatomy::list_regions(&tx).await?))
}

pub async fn list_muscle_groups(Executor(tx): Executor) -> Result<Json<Vec<MuscleGroup>>> {
    Ok(Json(catalog::anatomy::list_muscle_groups(&tx).await?))
}

pub async fn list_exercise_areas(Executor(tx): Executor) -> Result<Json<Vec<ExerciseArea>>> {
    Ok(Json(catalog::anatomy::list_exercise_areas(&tx).await?))
}

pub async fn list_muscles(Executor(tx): Executor) -> Result<Json<Vec<Muscle>>> {
    Ok(Json(catalog::muscle::list(&tx).await?))
}

pub async fn exercise_types() -> Json<Vec<&'static str>> {
    Json(ExerciseType::all().iter().map(ExerciseType::as_str).collect())
}

// ========== Exercises ==========

pub async fn list_exercises(Executor(tx): Executor) -> Result<Json<Vec<Exercise>>> {
    Ok(Json(catalog::exercise::list(&tx).await?))
}

pub async fn get_exercise(Executor(tx): Executor, PathId(id): PathId) -> Result<Json<Exercise>> {
    Ok(Json(catalog::exercise::get(&tx, id).await?))
}

pub async fn create_exercise(
    Executor(tx): Executor,
    CurrentIdentity(actor): CurrentIdentity,
    JsonBody(input): JsonBody<ExerciseInput>,
) -> Result<(StatusCode, Json<Exercise>)> {
    let id = catalog::exercise::create(&tx, input, &actor).await?;
    let exercise = catalog::exercise::get(&tx, id).await?;
    Ok((StatusCode::CREATED, Json(exercise)))
}

pub async fn update_exercise(
    Executor(tx): Executor,
    CurrentIdentity(actor): CurrentIdentity,
    PathId(id): PathId,
    JsonBody(input): JsonBody<ExerciseInput>,
) -> Result<Json<Exercise>> {
    catalog::exercise::update(&tx, id, input, &actor).await?;
    Ok(Json(catalog::exercise::get(&tx, id).await?))
}

// ========== Workouts ==========

pub async fn list_workouts(
    Executor(tx): Executor,
    CurrentIdentity(me): CurrentIdentity,
) -> Result<Json<Vec<Workout>>> {
    Ok(Json(workout::list_for(&tx, me.id).await?))
}

pub async fn get_workout(
    Executor(tx): Executor,
    CurrentIdentity(me): CurrentIdentity,
    PathId(id): PathId,
) -> Result<Json<Workout>> {
    Ok(Json(workout::get_for(&tx, id, me.id).await?))
}

pub async fn create_workout(
    Executor(tx): Executor,
    CurrentIdentity(me): CurrentIdentity,
    JsonBody(input): JsonBody<NewWorkout>,
) -> Result<(StatusCode, Json<Workout>)> {
    let created = workout::create(&tx, &me, input).await?;
    tracing::info!(workout_id = created.id, user_id = me.id, "Created workout");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_workout(
    Executor(tx): Executor,
    CurrentIdentity(me): CurrentIdentity,
    PathId(id): PathId,
    JsonBody(input): JsonBody<WorkoutUpdate>,
) -> Result<Json<Workout>> {
    Ok(Json(workout::update(&tx, id, &me, input).await?))
}

pub async fn delete_workout(
    Executor(tx): Executor,
    CurrentIdentity(me): CurrentIdentity,
    PathId(id): PathId,
) -> Result<StatusCode> {
    workout::delete(&tx, id, me.id).await?;
    tracing::info!(workout_id = id, user_id = me.id, "Deleted workout");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_workout_exercises(
    Executor(tx): Executor,
    CurrentIdentity(me): CurrentIdentity,
    PathId(id): PathId,
) -> Result<Json<Vec<WorkoutExercise>>> {
    Ok(Json(workout::get_for(&tx, id, me.id).await?.exercises))
}

pub async fn add_workout_exercise(
    Executor(tx): Executor,
    CurrentIdentity(me): CurrentIdentity,
    PathId(id): PathId,
    JsonBody(entry): JsonBody<NewEntry>,
) -> Result<(StatusCode, Json<WorkoutExercise>)> {
    let added = workout::add_exercise(&tx, id, &me, entry).await?;
    Ok((StatusCode::CREATED, Json(added)))
}

pub async fn update_workout_exercise(
    Executor(tx): Executor,
    CurrentIdentity(me): CurrentIdentity,
    PathId(id): PathId,
    JsonBody(details): JsonBody<EntryDetails>,
) -> Result<Json<WorkoutExercise>> {
    Ok(Json(workout::update_exercise(&tx, id, &me, details).await?))
}

pub async fn remove_workout_exercise(
    Executor(tx): Executor,
    CurrentIdentity(me): CurrentIdentity,
    PathId(id): PathId,
) -> Result<StatusCode> {
    workout::remove_exercise(&tx, id, &me).await?;
    Ok(StatusCode::NO_CONTENT)
}
