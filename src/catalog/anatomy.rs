//! Body regions, muscle groups and exercise areas (seeded, read-only)

use serde::Serialize;

use crate::Result;
use crate::storage::Transaction;

/// A body region such as upper body or core
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MuscleGroup {
    pub id: i64,
    pub name: String,
    pub region_id: i64,
    pub region_name: String,
}

/// A movement pattern muscles take part in (push, pull, hinge, ...)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExerciseArea {
    pub id: i64,
    pub name: String,
}

pub async fn list_regions(tx: &Transaction) -> Result<Vec<Region>> {
    tx.run(|conn| {
        let mut stmt = conn.prepare("SELECT id, name FROM region ORDER BY id")?;
        let regions = stmt
            .query_map([], |row| {
                Ok(Region {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(regions)
    })
    .await
}

/// Muscle groups with their region, ordered by region
pub async fn list_muscle_groups(tx: &Transaction) -> Result<Vec<MuscleGroup>> {
    tx.run(|conn| {
        let mut stmt = conn.prepare(
            "SELECT mg.id, mg.name, mg.region_id, r.name
             FROM muscle_group mg
             JOIN region r ON mg.region_id = r.id
             ORDER BY mg.region_id, mg.id",
        )?;
        let groups = stmt
            .query_map([], |row| {
                Ok(MuscleGroup {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    region_id: row.get(2)?,
                    region_name: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    })
    .await
}

pub async fn list_exercise_areas(tx: &Transaction) -> Result<Vec<ExerciseArea>> {
    tx.run(|conn| {
        let mut stmt = conn.prepare("SELECT id, name FROM exercise_area ORDER BY id")?;
        let areas = stmt
            .query_map([], |row| {
                Ok(ExerciseArea {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(areas)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use crate::storage::migrate::DirectorySource;

    #[tokio::test]
    async fn test_hierarchy_is_seeded() {
        let source = DirectorySource::new(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations"));
        let store = SqliteStore::open_in_memory(&source).unwrap();
        let tx = store.begin().await.unwrap();

        let regions = list_regions(&tx).await.unwrap();
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0].name, "Upper Body");

        let groups = list_muscle_groups(&tx).await.unwrap();
        assert_eq!(groups.len(), 7);
        assert!(groups.iter().all(|g| regions.iter().any(|r| r.id == g.region_id)));
        let legs = groups.iter().find(|g| g.name == "Legs").unwrap();
        assert_eq!(legs.region_name, "Lower Body");

        let areas = list_exercise_areas(&tx).await.unwrap();
        assert_eq!(areas.len(), 5);
        tx.rollback().await.unwrap();
    }
}
