use chrono::{DateTime, Utc};
use rollcall_core::{Embedding, Identity};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Others,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "Male",
            Self::Female => "Female",
            Self::Others => "Others",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Self::Male),
            "female" => Ok(Self::Female),
            "others" | "other" => Ok(Self::Others),
            other => Err(format!("unknown gender {other:?} (expected Male, Female or Others)")),
        }
    }
}

/// Everything needed to enroll a student.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub usn: Identity,
    pub name: String,
    pub course: String,
    pub year_join: i32,
    pub section: char,
    pub gender: Gender,
    /// Encoded reference photo (JPEG/PNG bytes).
    pub face_image: Vec<u8>,
    pub embedding: Embedding,
}

/// A stored student, without the photo and embedding payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub usn: Identity,
    pub name: String,
    pub course: String,
    pub year_join: i32,
    pub section: char,
    pub gender: Gender,
    pub attendance: u32,
    pub last_attendance_time: Option<DateTime<Utc>>,
}

impl fmt::Display for Student {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {} {}, Section {}",
            self.usn, self.name, self.course, self.year_join, self.section
        )
    }
}

/// One stored attendance event joined with the student's name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub usn: Identity,
    pub name: String,
    pub recorded_at: DateTime<Utc>,
}
