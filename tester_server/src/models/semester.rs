//! semesters: A grading cohort: one language, one file extension, one secret.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::semesters;

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = semesters)]
pub struct Semester {
    pub name: String,
    pub language: String,
    pub extension: String,
    #[serde(skip_serializing)]
    pub secret: String,
}
