use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{Access, Experiment, Role, User, resolve_permission};

/// Loads an experiment or fails with `NotFound`.
pub fn load_experiment(store: &dyn Store, experiment_id: &str) -> Result<Experiment> {
    store
        .get_experiment(experiment_id)?
        .ok_or_else(|| Error::not_found("experiment"))
}

/// Resolves the requester's role and effective access on an experiment.
pub fn effective_access(
    store: &dyn Store,
    experiment: &Experiment,
    user: &User,
) -> Result<(Role, Access)> {
    if experiment.owner_id == user.id {
        return Ok((Role::Owner, Access::Edit));
    }

    let share = store.get_share(&experiment.id, &user.id)?;
    Ok((
        Role::Shared,
        resolve_permission(experiment, &user.id, share.as_ref()),
    ))
}

/// Checks that the requester holds at least `required` on the experiment.
pub fn require_access(
    store: &dyn Store,
    experiment: &Experiment,
    user: &User,
    required: Access,
) -> Result<(Role, Access)> {
    let (role, access) = effective_access(store, experiment, user)?;

    if access == Access::None {
        return Err(Error::forbidden("no access to this experiment"));
    }
    if !access.allows(required) {
        return Err(Error::forbidden(format!(
            "{required} permission required on this experiment"
        )));
    }

    Ok((role, access))
}

/// Checks that the requester owns the experiment.
pub fn require_owner(experiment: &Experiment, user: &User, action: &str) -> Result<()> {
    if experiment.owner_id != user.id {
        return Err(Error::forbidden(format!(
            "only the experiment owner can {action}"
        )));
    }
    Ok(())
}
