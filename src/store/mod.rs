mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // User operations
    fn create_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, id: &str) -> Result<Option<User>>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    fn list_users(&self, cursor: &str, limit: i32) -> Result<Vec<User>>;
    fn delete_user(&self, id: &str) -> Result<bool>;

    // Token operations
    fn create_token(&self, token: &Token) -> Result<()>;
    fn get_token_by_id(&self, id: &str) -> Result<Option<Token>>;
    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>>;
    fn list_tokens(&self, cursor: &str, limit: i32) -> Result<Vec<Token>>;
    fn list_user_tokens(&self, user_id: &str) -> Result<Vec<Token>>;
    fn delete_token(&self, id: &str) -> Result<bool>;
    fn update_token_last_used(&self, id: &str) -> Result<()>;
    fn has_admin_token(&self) -> Result<bool>;

    // Experiment operations
    /// Inserts the experiment and its tag links as one unit.
    fn create_experiment(&self, experiment: &Experiment, tag_ids: &[String]) -> Result<()>;
    fn get_experiment(&self, id: &str) -> Result<Option<Experiment>>;
    fn list_owned_experiments(&self, owner_id: &str) -> Result<Vec<Experiment>>;
    /// Writes the experiment fields and replaces its tag set as one unit.
    fn update_experiment(&self, experiment: &Experiment, tag_ids: &[String]) -> Result<()>;
    /// Deletes tag links, protocols, files, results and shares, then the
    /// experiment, as one unit. Returns false if the experiment did not exist.
    fn delete_experiment_cascade(&self, id: &str) -> Result<bool>;

    // Tag operations; `(owner_id, name)` is unique, violations yield `Error::AlreadyExists`
    fn create_tag(&self, tag: &Tag) -> Result<()>;
    fn get_tag_by_id(&self, id: &str) -> Result<Option<Tag>>;
    fn get_tag_by_name(&self, owner_id: &str, name: &str) -> Result<Option<Tag>>;
    fn list_tags(&self, owner_id: &str) -> Result<Vec<Tag>>;

    // Experiment-Tag M2M operations
    fn list_experiment_tags(&self, experiment_id: &str) -> Result<Vec<Tag>>;

    // Attached file operations (protocols and data files)
    fn create_file(&self, kind: FileKind, file: &StoredFile) -> Result<()>;
    fn get_file(&self, kind: FileKind, id: &str) -> Result<Option<StoredFile>>;
    fn list_files(&self, kind: FileKind, experiment_id: &str) -> Result<Vec<StoredFile>>;
    fn delete_file(&self, kind: FileKind, id: &str) -> Result<bool>;

    // Result operations
    fn create_result(&self, result: &ResultRecord) -> Result<()>;
    fn list_results(&self, experiment_id: &str) -> Result<Vec<ResultRecord>>;

    // Share operations
    /// Inserts a share or updates the level of the existing `(experiment, user)` pair.
    fn upsert_share(&self, share: &ExperimentShare) -> Result<()>;
    fn get_share(&self, experiment_id: &str, user_id: &str) -> Result<Option<ExperimentShare>>;
    fn list_user_shares(&self, user_id: &str) -> Result<Vec<ExperimentShare>>;
    fn list_experiment_shares(&self, experiment_id: &str) -> Result<Vec<ExperimentShare>>;
    fn delete_share(&self, experiment_id: &str, user_id: &str) -> Result<bool>;
}
