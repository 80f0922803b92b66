use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ExperimentService;
use super::aggregate::written_view;
use super::access::{load_experiment, require_access, require_owner};
use super::validation::{
    normalize_color, normalize_email, normalize_fields, normalize_tag_name, validate_filename,
};
use crate::error::{Error, Result};
use crate::storage::StorageError;
use crate::types::{
    Access, Experiment, ExperimentFields, ExperimentShare, ExperimentView, FileKind, FileView,
    Role, ShareLevel, ShareView, StoredFile, Tag, TagCategory, User,
};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
const MAX_EXTENSION_LEN: usize = 16;
const MAX_PUT_ATTEMPTS: i64 = 32;

/// Full field set of an experiment plus the tags to attach.
///
/// Used for creation and for updates, which always replace the tag set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewExperiment {
    #[serde(flatten)]
    pub fields: ExperimentFields,
    #[serde(default)]
    pub tag_ids: Vec<String>,
}

/// File contents received from a client.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl ExperimentService {
    /// Creates an experiment owned by `user` with the given tags.
    pub async fn create_experiment(
        &self,
        user: &User,
        request: NewExperiment,
    ) -> Result<ExperimentView> {
        let NewExperiment {
            mut fields,
            tag_ids,
        } = request;
        normalize_fields(&mut fields)?;
        let tags = self.owned_tags(&user.id, tag_ids)?;
        let tag_ids = tag_ids_of(&tags);

        let experiment = Experiment {
            id: Uuid::new_v4().to_string(),
            owner_id: user.id.clone(),
            title: fields.title,
            description: fields.description,
            researcher_name: fields.researcher_name,
            protocol_text: fields.protocol_text,
            status: fields.status,
            experiment_date: fields.experiment_date,
            created_at: Utc::now(),
            updated_at: None,
        };

        self.store.create_experiment(&experiment, &tag_ids)?;

        info!(
            experiment_id = %experiment.id,
            owner_id = %user.id,
            tags = tag_ids.len(),
            "Created experiment"
        );
        // A new experiment has no attachments yet, so nothing is re-read.
        Ok(written_view(experiment, Role::Owner, Access::Edit, tags))
    }

    /// Replaces the fields and tag set of an experiment the user can edit.
    pub async fn update_experiment(
        &self,
        user: &User,
        experiment_id: &str,
        request: NewExperiment,
    ) -> Result<ExperimentView> {
        let store = self.store.as_ref();
        let mut experiment = load_experiment(store, experiment_id)?;
        let (role, access) = require_access(store, &experiment, user, Access::Edit)?;

        let NewExperiment {
            mut fields,
            tag_ids,
        } = request;
        normalize_fields(&mut fields)?;
        // Tags are always the owner's, even when a collaborator edits.
        let tags = self.owned_tags(&experiment.owner_id, tag_ids)?;
        let tag_ids = tag_ids_of(&tags);

        experiment.title = fields.title;
        experiment.description = fields.description;
        experiment.researcher_name = fields.researcher_name;
        experiment.protocol_text = fields.protocol_text;
        experiment.status = fields.status;
        experiment.experiment_date = fields.experiment_date;
        experiment.updated_at = Some(Utc::now());

        store.update_experiment(&experiment, &tag_ids)?;

        info!(experiment_id = %experiment.id, editor_id = %user.id, "Updated experiment");
        Ok(self.reload_after_write(experiment, role, access, tags))
    }

    /// Deletes an experiment, its stored objects and every dependent record.
    ///
    /// Objects go first. If any object cannot be removed nothing is deleted
    /// from the database, so the call can be retried.
    pub async fn delete_experiment(&self, user: &User, experiment_id: &str) -> Result<()> {
        let store = self.store.as_ref();
        let experiment = load_experiment(store, experiment_id)?;
        require_owner(&experiment, user, "delete it")?;

        let mut paths: Vec<String> = Vec::new();
        for kind in [FileKind::Protocol, FileKind::Data] {
            paths.extend(
                store
                    .list_files(kind, experiment_id)?
                    .into_iter()
                    .map(|f| f.storage_path),
            );
        }
        paths.extend(
            store
                .list_results(experiment_id)?
                .into_iter()
                .filter_map(|r| r.storage_path),
        );

        for (removed, path) in paths.iter().enumerate() {
            match self.objects.remove(path).await {
                Ok(true) => {}
                Ok(false) => warn!(%experiment_id, path = %path, "Object already missing"),
                Err(e) => {
                    warn!(
                        %experiment_id,
                        path = %path,
                        removed,
                        "Object removal failed; experiment rows kept for retry: {e}"
                    );
                    return Err(e.into());
                }
            }
        }

        if !store.delete_experiment_cascade(experiment_id)? {
            return Err(Error::not_found("experiment"));
        }

        info!(%experiment_id, objects = paths.len(), "Deleted experiment");
        Ok(())
    }

    /// Returns the user's tag named `name`, creating it if needed.
    ///
    /// The flag is true when the tag was created by this call.
    pub async fn create_or_get_tag(
        &self,
        user: &User,
        name: &str,
        category: TagCategory,
        color: Option<&str>,
    ) -> Result<(Tag, bool)> {
        let name = normalize_tag_name(name)?;
        let color = normalize_color(color)?;
        let store = self.store.as_ref();

        if let Some(existing) = store.get_tag_by_name(&user.id, &name)? {
            return Ok((existing, false));
        }

        let tag = Tag {
            id: Uuid::new_v4().to_string(),
            owner_id: user.id.clone(),
            name,
            category,
            color,
            created_at: Utc::now(),
        };

        match store.create_tag(&tag) {
            Ok(()) => {
                info!(tag_id = %tag.id, owner_id = %user.id, name = %tag.name, "Created tag");
                Ok((tag, true))
            }
            // Lost a race with a concurrent create of the same name.
            Err(Error::AlreadyExists) => {
                debug!(owner_id = %user.id, name = %tag.name, "Tag created concurrently; returning it");
                store
                    .get_tag_by_name(&user.id, &tag.name)?
                    .map(|existing| (existing, false))
                    .ok_or_else(|| Error::Conflict(format!("tag {} is being created", tag.name)))
            }
            Err(e) => Err(e),
        }
    }

    /// Stores an uploaded file and records it against the experiment.
    pub async fn upload_file(
        &self,
        user: &User,
        experiment_id: &str,
        kind: FileKind,
        upload: FileUpload,
    ) -> Result<FileView> {
        let store = self.store.as_ref();
        let experiment = load_experiment(store, experiment_id)?;
        require_access(store, &experiment, user, Access::Edit)?;

        validate_filename(&upload.filename)?;
        if upload.data.is_empty() {
            return Err(Error::invalid("Uploaded file is empty"));
        }
        if upload.data.len() > self.max_upload_bytes {
            return Err(Error::invalid(format!(
                "Uploaded file exceeds the {} byte limit",
                self.max_upload_bytes
            )));
        }

        let mime_type = upload
            .content_type
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

        let storage_path = self
            .put_object(&experiment, kind, &upload.filename, &upload.data, &mime_type)
            .await?;

        let record = StoredFile {
            id: Uuid::new_v4().to_string(),
            experiment_id: experiment.id.clone(),
            filename: upload.filename,
            storage_path,
            size_bytes: i64::try_from(upload.data.len())
                .map_err(|_| Error::invalid("Uploaded file is too large"))?,
            mime_type,
            created_at: Utc::now(),
        };

        if let Err(e) = store.create_file(kind, &record) {
            match self.objects.remove(&record.storage_path).await {
                Ok(_) => warn!(path = %record.storage_path, "Removed object after failed insert: {e}"),
                Err(cleanup) => error!(
                    path = %record.storage_path,
                    "Orphaned object: insert failed ({e}) and removal failed ({cleanup})"
                ),
            }
            return Err(e);
        }

        info!(
            %experiment_id,
            file_id = %record.id,
            kind = kind.as_str(),
            size = record.size_bytes,
            "Uploaded file"
        );
        Ok(self.file_view(record))
    }

    /// Removes an attached file's object and then its record.
    pub async fn delete_file(
        &self,
        user: &User,
        experiment_id: &str,
        kind: FileKind,
        file_id: &str,
    ) -> Result<()> {
        let store = self.store.as_ref();
        let experiment = load_experiment(store, experiment_id)?;
        require_access(store, &experiment, user, Access::Edit)?;

        let file = store
            .get_file(kind, file_id)?
            .filter(|f| f.experiment_id == experiment.id)
            .ok_or_else(|| Error::not_found("file"))?;

        match self.objects.remove(&file.storage_path).await {
            Ok(true) => {}
            Ok(false) => warn!(path = %file.storage_path, "Object already missing"),
            Err(e) => {
                warn!(file_id, path = %file.storage_path, "Object removal failed; record kept: {e}");
                return Err(e.into());
            }
        }

        if let Err(e) = store.delete_file(kind, file_id) {
            warn!(
                file_id,
                path = %file.storage_path,
                "Record still references a removed object: {e}"
            );
            return Err(e);
        }

        info!(%experiment_id, file_id, kind = kind.as_str(), "Deleted file");
        Ok(())
    }

    /// Grants another user access to an experiment, or changes the level of
    /// an existing grant. `target` is an email address or a user id.
    pub async fn share_experiment(
        &self,
        user: &User,
        experiment_id: &str,
        target: &str,
        level: ShareLevel,
    ) -> Result<ShareView> {
        let store = self.store.as_ref();
        let experiment = load_experiment(store, experiment_id)?;
        require_owner(&experiment, user, "share it")?;

        let target = target.trim();
        let recipient = if target.contains('@') {
            store.get_user_by_email(&normalize_email(target)?)?
        } else {
            store.get_user(target)?
        }
        .ok_or_else(|| Error::not_found("user"))?;

        if recipient.id == experiment.owner_id {
            return Err(Error::invalid("Cannot share an experiment with its owner"));
        }

        let share = ExperimentShare {
            experiment_id: experiment.id.clone(),
            user_id: recipient.id.clone(),
            permission_level: level,
            created_at: Utc::now(),
        };
        store.upsert_share(&share)?;

        info!(
            %experiment_id,
            recipient_id = %recipient.id,
            level = level.as_str(),
            "Shared experiment"
        );
        self.share_view(recipient, experiment_id)
    }

    /// Changes the level of an existing share.
    pub async fn update_share_permission(
        &self,
        user: &User,
        experiment_id: &str,
        target_user_id: &str,
        level: ShareLevel,
    ) -> Result<ShareView> {
        let store = self.store.as_ref();
        let experiment = load_experiment(store, experiment_id)?;
        require_owner(&experiment, user, "change its shares")?;

        let mut share = store
            .get_share(experiment_id, target_user_id)?
            .ok_or_else(|| Error::not_found("share"))?;
        share.permission_level = level;
        store.upsert_share(&share)?;

        let recipient = store
            .get_user(target_user_id)?
            .ok_or_else(|| Error::not_found("user"))?;

        info!(
            %experiment_id,
            recipient_id = %target_user_id,
            level = level.as_str(),
            "Updated share"
        );
        self.share_view(recipient, experiment_id)
    }

    /// Removes a user's share.
    pub async fn revoke_share(
        &self,
        user: &User,
        experiment_id: &str,
        target_user_id: &str,
    ) -> Result<()> {
        let store = self.store.as_ref();
        let experiment = load_experiment(store, experiment_id)?;
        require_owner(&experiment, user, "revoke its shares")?;

        if !store.delete_share(experiment_id, target_user_id)? {
            return Err(Error::not_found("share"));
        }

        info!(%experiment_id, recipient_id = %target_user_id, "Revoked share");
        Ok(())
    }

    /// Lists who an experiment is shared with.
    pub async fn list_shares(&self, user: &User, experiment_id: &str) -> Result<Vec<ShareView>> {
        let store = self.store.as_ref();
        let experiment = load_experiment(store, experiment_id)?;
        require_owner(&experiment, user, "list its shares")?;

        let mut views = Vec::new();
        for share in store.list_experiment_shares(experiment_id)? {
            let Some(recipient) = store.get_user(&share.user_id)? else {
                warn!(%experiment_id, user_id = %share.user_id, "Share held by a missing user");
                continue;
            };
            views.push(ShareView {
                user_id: recipient.id,
                email: recipient.email,
                permission_level: share.permission_level,
                created_at: share.created_at,
            });
        }

        Ok(views)
    }

    /// Loads the tags named by `tag_ids`, deduped, checking each belongs to `owner_id`.
    fn owned_tags(&self, owner_id: &str, tag_ids: Vec<String>) -> Result<Vec<Tag>> {
        let mut tags: Vec<Tag> = Vec::with_capacity(tag_ids.len());

        for id in tag_ids {
            if tags.iter().any(|t| t.id == id) {
                continue;
            }
            let tag = self
                .store
                .get_tag_by_id(&id)?
                .ok_or_else(|| Error::not_found(format!("tag {id}")))?;
            if tag.owner_id != owner_id {
                return Err(Error::forbidden(format!(
                    "tag {id} belongs to another user"
                )));
            }
            tags.push(tag);
        }

        Ok(tags)
    }

    /// Writes the object under a fresh path, stepping the timestamp on collision.
    async fn put_object(
        &self,
        experiment: &Experiment,
        kind: FileKind,
        filename: &str,
        data: &[u8],
        mime_type: &str,
    ) -> Result<String> {
        let now = Utc::now();

        for attempt in 0..MAX_PUT_ATTEMPTS {
            let path = object_path(experiment, kind, now, attempt, filename);
            match self.objects.put(&path, data, mime_type).await {
                Ok(()) => return Ok(path),
                Err(StorageError::AlreadyExists(_)) => continue,
                Err(e) => {
                    warn!(experiment_id = %experiment.id, path = %path, "Object write failed: {e}");
                    return Err(e.into());
                }
            }
        }

        Err(Error::Conflict("could not allocate an object path".to_string()))
    }

    fn share_view(&self, recipient: User, experiment_id: &str) -> Result<ShareView> {
        let share = self
            .store
            .get_share(experiment_id, &recipient.id)?
            .ok_or_else(|| Error::not_found("share"))?;

        Ok(ShareView {
            user_id: recipient.id,
            email: recipient.email,
            permission_level: share.permission_level,
            created_at: share.created_at,
        })
    }
}

fn tag_ids_of(tags: &[Tag]) -> Vec<String> {
    tags.iter().map(|t| t.id.clone()).collect()
}

/// `{owner}/{experiment}/{kind}s/{millis}.{ext}`
fn object_path(
    experiment: &Experiment,
    kind: FileKind,
    now: DateTime<Utc>,
    offset: i64,
    filename: &str,
) -> String {
    format!(
        "{}/{}/{}s/{}.{}",
        experiment.owner_id,
        experiment.id,
        kind.as_str(),
        now.timestamp_millis() + offset,
        extension(filename)
    )
}

/// The part after the last dot, reduced to lower-case alphanumerics.
fn extension(filename: &str) -> String {
    let ext: String = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(MAX_EXTENSION_LEN)
        .collect::<String>()
        .to_ascii_lowercase();

    if ext.is_empty() { "bin".to_string() } else { ext }
}
