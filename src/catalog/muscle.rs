//! Muscle reference data (seeded by migrations, read-only over HTTP)

use std::collections::HashMap;

use serde::Serialize;

use crate::Result;
use crate::storage::Transaction;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Muscle {
    pub id: i64,
    pub name: String,
    pub muscle_group_id: i64,
    pub muscle_group_name: String,
    pub region_name: String,
    /// Names of the exercise areas this muscle takes part in
    pub exercise_areas: Vec<String>,
}

/// All muscles with group, region and exercise areas, ordered by group
pub async fn list(tx: &Transaction) -> Result<Vec<Muscle>> {
    tx.run(|conn| {
        let mut stmt = conn.prepare(
            "SELECT mea.muscle_id, ea.name
             FROM muscle_exercise_area mea
             JOIN exercise_area ea ON mea.exercise_area_id = ea.id
             ORDER BY mea.muscle_id, ea.name",
        )?;
        let mut areas: HashMap<i64, Vec<String>> = HashMap::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (muscle_id, area) = row?;
            areas.entry(muscle_id).or_default().push(area);
        }

        let mut stmt = conn.prepare(
            "SELECT m.id, m.name, m.muscle_group_id, mg.name, r.name
             FROM muscle m
             JOIN muscle_group mg ON m.muscle_group_id = mg.id
             JOIN region r ON mg.region_id = r.id
             ORDER BY m.muscle_group_id, m.id",
        )?;
        let muscles = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                Ok(Muscle {
                    id,
                    name: row.get(1)?,
                    muscle_group_id: row.get(2)?,
                    muscle_group_name: row.get(3)?,
                    region_name: row.get(4)?,
                    exercise_areas: areas.remove(&id).unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(muscles)
    })
    .await
}
