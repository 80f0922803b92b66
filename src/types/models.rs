use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{Access, Role, ShareLevel};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    #[serde(skip)]
    pub token_hash: String,
    #[serde(skip)]
    pub token_lookup: String,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Descriptive progress marker. Any status may move to any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    #[default]
    Planning,
    InProgress,
    Completed,
    OnHold,
}

impl ExperimentStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::OnHold => "on_hold",
        }
    }
}

impl FromStr for ExperimentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(Self::Planning),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "on_hold" => Ok(Self::OnHold),
            other => Err(format!("unknown experiment status: {other}")),
        }
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub researcher_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_text: Option<String>,
    pub status: ExperimentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Experiment {
    /// Last time the experiment was touched; experiments never edited fall back to creation time.
    #[must_use]
    pub fn touched_at(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

/// Editable experiment fields. Absent optionals clear the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExperimentFields {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub researcher_name: Option<String>,
    #[serde(default)]
    pub protocol_text: Option<String>,
    #[serde(default)]
    pub status: ExperimentStatus,
    #[serde(default)]
    pub experiment_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagCategory {
    Organism,
    Reagent,
    Technique,
    Equipment,
    #[default]
    Other,
}

impl TagCategory {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Organism => "organism",
            Self::Reagent => "reagent",
            Self::Technique => "technique",
            Self::Equipment => "equipment",
            Self::Other => "other",
        }
    }
}

impl FromStr for TagCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "organism" => Ok(Self::Organism),
            "reagent" => Ok(Self::Reagent),
            "technique" => Ok(Self::Technique),
            "equipment" => Ok(Self::Equipment),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown tag category: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub category: TagCategory,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

/// Which attachment table a file record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Protocol,
    Data,
}

impl FileKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::Data => "data",
        }
    }

    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Protocol => "protocols",
            Self::Data => "files",
        }
    }
}

impl FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "protocol" => Ok(Self::Protocol),
            "data" => Ok(Self::Data),
            other => Err(format!("unknown file kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: String,
    pub experiment_id: String,
    pub filename: String,
    pub storage_path: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: String,
    pub experiment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentShare {
    pub experiment_id: String,
    pub user_id: String,
    pub permission_level: ShareLevel,
    pub created_at: DateTime<Utc>,
}

/// A file record with its object resolved to a retrievable URL.
#[derive(Debug, Clone, Serialize)]
pub struct FileView {
    #[serde(flatten)]
    pub file: StoredFile,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultView {
    #[serde(flatten)]
    pub result: ResultRecord,
    pub url: Option<String>,
}

/// An experiment as seen by one user, with every relation loaded.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentView {
    #[serde(flatten)]
    pub experiment: Experiment,
    pub role: Role,
    pub effective_permission: Access,
    pub tags: Vec<Tag>,
    pub protocols: Vec<FileView>,
    pub files: Vec<FileView>,
    pub results: Vec<ResultView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShareView {
    pub user_id: String,
    pub email: String,
    pub permission_level: ShareLevel,
    pub created_at: DateTime<Utc>,
}
