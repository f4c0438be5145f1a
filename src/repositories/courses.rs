use sqlx::PgPool;

use crate::db::models::CourseThreshold;

#[cfg(test)]
pub(crate) struct CreateCourse<'a> {
    pub(crate) id: i32,
    pub(crate) name: &'a str,
    pub(crate) teacher: &'a str,
    pub(crate) passing_points: i32,
    pub(crate) created_at: time::PrimitiveDateTime,
}

/// Course administration lives outside this service; tests seed rows through here.
#[cfg(test)]
pub(crate) async fn create(
    pool: &PgPool,
    params: CreateCourse<'_>,
) -> Result<CourseThreshold, sqlx::Error> {
    sqlx::query_as::<_, CourseThreshold>(
        "INSERT INTO courses (id, name, teacher, passing_points, created_at, updated_at)
         VALUES ($1,$2,$3,$4,$5,$5)
         RETURNING id AS course_id, passing_points AS threshold",
    )
    .bind(params.id)
    .bind(params.name)
    .bind(params.teacher)
    .bind(params.passing_points)
    .bind(params.created_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_threshold(
    pool: &PgPool,
    course_id: i32,
) -> Result<Option<CourseThreshold>, sqlx::Error> {
    sqlx::query_as::<_, CourseThreshold>(
        "SELECT id AS course_id, passing_points AS threshold FROM courses WHERE id = $1",
    )
    .bind(course_id)
    .fetch_optional(pool)
    .await
}
