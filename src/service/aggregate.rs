use std::cmp::Ordering;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::ExperimentService;
use super::access::{load_experiment, require_access};
use crate::error::Result;
use crate::storage::ObjectStore;
use crate::store::Store;
use crate::types::{
    Access, Experiment, ExperimentStatus, ExperimentView, FileKind, FileView, ResultView, Role,
    StoredFile, Tag, User, resolve_permission,
};

/// Narrows a visible set. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ExperimentFilter {
    /// Case-insensitive substring of title, description or researcher name.
    pub query: Option<String>,
    pub status: Option<ExperimentStatus>,
    /// Matches experiments carrying any of these tags.
    pub tag_ids: Vec<String>,
    pub role: Option<Role>,
    pub permission: Option<Access>,
}

impl ExperimentFilter {
    fn matches(&self, candidate: &Candidate) -> bool {
        let experiment = &candidate.experiment;

        if self.status.is_some_and(|s| s != experiment.status)
            || self.role.is_some_and(|r| r != candidate.role)
            || self.permission.is_some_and(|p| p != candidate.access)
        {
            return false;
        }

        match self.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            Some(query) => {
                let query = query.to_lowercase();
                [
                    Some(experiment.title.as_str()),
                    experiment.description.as_deref(),
                    experiment.researcher_name.as_deref(),
                ]
                .into_iter()
                .flatten()
                .any(|text| text.to_lowercase().contains(&query))
            }
            None => true,
        }
    }

    fn matches_tags(&self, view: &ExperimentView) -> bool {
        self.tag_ids.is_empty()
            || view
                .tags
                .iter()
                .any(|tag| self.tag_ids.iter().any(|id| *id == tag.id))
    }
}

/// An experiment that reached the visible set, before relations are loaded.
struct Candidate {
    experiment: Experiment,
    role: Role,
    access: Access,
}

impl ExperimentService {
    /// Returns every experiment the user owns or has been shared, each with
    /// its tags, attachments and effective permission, most recently touched
    /// first.
    ///
    /// An experiment whose relations fail to load is left out and logged;
    /// the rest of the set is still returned.
    pub async fn list_visible_experiments(
        &self,
        user: &User,
        filter: &ExperimentFilter,
    ) -> Result<Vec<ExperimentView>> {
        let candidates = collect_candidates(self.store.as_ref(), &user.id)?;

        let mut tasks = JoinSet::new();
        for candidate in candidates.into_iter().filter(|c| filter.matches(c)) {
            let store = self.store.clone();
            let objects = self.objects.clone();
            tasks.spawn_blocking(move || {
                let experiment_id = candidate.experiment.id.clone();
                let view = load_view(store.as_ref(), objects.as_ref(), candidate);
                (experiment_id, view)
            });
        }

        let mut views = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(view))) => views.push(view),
                Ok((experiment_id, Err(e))) => {
                    warn!(%experiment_id, "Leaving experiment out of visible set: {e}");
                }
                Err(e) => warn!("Relation loading task failed: {e}"),
            }
        }

        views.retain(|view| filter.matches_tags(view));
        views.sort_by(compare_recent_first);

        debug!(user_id = %user.id, count = views.len(), "Computed visible experiments");
        Ok(views)
    }

    /// Returns one experiment with its relations, if the user can see it.
    pub async fn get_experiment(&self, user: &User, experiment_id: &str) -> Result<ExperimentView> {
        let store = self.store.as_ref();
        let experiment = load_experiment(store, experiment_id)?;
        let (role, access) = require_access(store, &experiment, user, Access::View)?;

        load_view(
            store,
            self.objects.as_ref(),
            Candidate {
                experiment,
                role,
                access,
            },
        )
    }

    /// Tags owned by the user, ordered by name without regard to case.
    pub async fn list_tags_for_user(&self, user: &User) -> Result<Vec<Tag>> {
        let mut tags = self.store.list_tags(&user.id)?;
        tags.sort_by_cached_key(|t| (t.name.to_lowercase(), t.name.clone()));
        Ok(tags)
    }

    /// Reloads an experiment after a committed update. If the attachments
    /// fail to load, the committed fields and tags are returned without them.
    pub(super) fn reload_after_write(
        &self,
        experiment: Experiment,
        role: Role,
        access: Access,
        tags: Vec<Tag>,
    ) -> ExperimentView {
        let candidate = Candidate {
            experiment: experiment.clone(),
            role,
            access,
        };

        match load_view(self.store.as_ref(), self.objects.as_ref(), candidate) {
            Ok(view) => view,
            Err(e) => {
                warn!(
                    experiment_id = %experiment.id,
                    "Experiment saved but its attachments could not be reloaded: {e}"
                );
                written_view(experiment, role, access, tags)
            }
        }
    }

    pub(super) fn file_view(&self, file: StoredFile) -> FileView {
        file_view(self.objects.as_ref(), file)
    }
}

/// Owned experiments plus every experiment reached through a share.
fn collect_candidates(store: &dyn Store, user_id: &str) -> Result<Vec<Candidate>> {
    let mut candidates: Vec<Candidate> = store
        .list_owned_experiments(user_id)?
        .into_iter()
        .map(|experiment| Candidate {
            experiment,
            role: Role::Owner,
            access: Access::Edit,
        })
        .collect();

    for share in store.list_user_shares(user_id)? {
        let experiment = match store.get_experiment(&share.experiment_id) {
            Ok(Some(experiment)) => experiment,
            Ok(None) => {
                warn!(
                    experiment_id = %share.experiment_id,
                    "Share points at a missing experiment"
                );
                continue;
            }
            Err(e) => {
                warn!(
                    experiment_id = %share.experiment_id,
                    "Leaving shared experiment out of visible set: {e}"
                );
                continue;
            }
        };

        if experiment.owner_id == user_id {
            warn!(experiment_id = %experiment.id, "Ignoring share held by the experiment owner");
            continue;
        }

        let access = resolve_permission(&experiment, user_id, Some(&share));
        candidates.push(Candidate {
            experiment,
            role: Role::Shared,
            access,
        });
    }

    Ok(candidates)
}

/// A view built only from what a write put in place, with no attachments.
pub(super) fn written_view(
    experiment: Experiment,
    role: Role,
    access: Access,
    mut tags: Vec<Tag>,
) -> ExperimentView {
    tags.sort_by_cached_key(|t| (t.name.to_lowercase(), t.name.clone()));

    ExperimentView {
        experiment,
        role,
        effective_permission: access,
        tags,
        protocols: Vec::new(),
        files: Vec::new(),
        results: Vec::new(),
    }
}

fn load_view(
    store: &dyn Store,
    objects: &dyn ObjectStore,
    candidate: Candidate,
) -> Result<ExperimentView> {
    let id = candidate.experiment.id.as_str();

    let tags = store.list_experiment_tags(id)?;
    let protocols = store
        .list_files(FileKind::Protocol, id)?
        .into_iter()
        .map(|f| file_view(objects, f))
        .collect();
    let files = store
        .list_files(FileKind::Data, id)?
        .into_iter()
        .map(|f| file_view(objects, f))
        .collect();
    let results = store
        .list_results(id)?
        .into_iter()
        .map(|result| {
            let url = result
                .storage_path
                .as_deref()
                .and_then(|path| object_url(objects, path));
            ResultView { result, url }
        })
        .collect();

    Ok(ExperimentView {
        experiment: candidate.experiment,
        role: candidate.role,
        effective_permission: candidate.access,
        tags,
        protocols,
        files,
        results,
    })
}

fn file_view(objects: &dyn ObjectStore, file: StoredFile) -> FileView {
    let url = object_url(objects, &file.storage_path);
    FileView { file, url }
}

fn object_url(objects: &dyn ObjectStore, path: &str) -> Option<String> {
    match objects.public_url(path) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(path, "Could not resolve object URL: {e}");
            None
        }
    }
}

fn compare_recent_first(a: &ExperimentView, b: &ExperimentView) -> Ordering {
    b.experiment
        .touched_at()
        .cmp(&a.experiment.touched_at())
        .then_with(|| a.experiment.id.cmp(&b.experiment.id))
}
