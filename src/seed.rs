//! Creates the demo SQLite database behind the "local database" option.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use crate::database::DatabaseError;

const STUDENTS: [(&str, &str, &str, i64); 5] = [
    ("Krish", "Data Science", "A", 90),
    ("John", "Data Science", "B", 100),
    ("Mukesh", "Data Science", "A", 86),
    ("Jacob", "DEVOPS", "A", 50),
    ("Dipesh", "DEVOPS", "A", 35),
];

/// Create `path` with a populated `STUDENT` table. Existing rows are left
/// alone; returns how many rows were inserted.
pub async fn seed_student_db(path: &Path) -> Result<usize, DatabaseError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS STUDENT (\
         NAME VARCHAR(25), CLASS VARCHAR(25), SECTION VARCHAR(25), MARKS INT)",
    )
    .execute(&pool)
    .await?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM STUDENT")
        .fetch_one(&pool)
        .await?;
    if existing > 0 {
        info!(existing, path = %path.display(), "STUDENT table already populated");
        pool.close().await;
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    for (name, class, section, marks) in STUDENTS {
        sqlx::query("INSERT INTO STUDENT (NAME, CLASS, SECTION, MARKS) VALUES (?1, ?2, ?3, ?4)")
            .bind(name)
            .bind(class)
            .bind(section)
            .bind(marks)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    pool.close().await;

    info!(rows = STUDENTS.len(), path = %path.display(), "Seeded demo database");
    Ok(STUDENTS.len())
}
