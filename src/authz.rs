use crate::auth::Identity;
use crate::error::ApiError;
use crate::models::Id;

/// Ownership and lock metadata of the row a request wants to mutate.
#[derive(Debug, Clone, Copy)]
pub struct MutationTarget {
    pub owner_id: Id,
    pub parent_locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    NotOwner,
    Locked,
}

impl From<Denial> for ApiError {
    fn from(_: Denial) -> Self {
        ApiError::Forbidden
    }
}

/// Ownership/lock policy, applied uniformly across endpoints:
/// elevated roles (moderator, admin) bypass both checks; an owner may mutate
/// their own resource unless its parent is locked.
pub fn authorize_mutation(who: &Identity, target: &MutationTarget) -> Result<(), Denial> {
    if who.is_elevated() {
        return Ok(());
    }
    if target.owner_id != who.user_id {
        return Err(Denial::NotOwner);
    }
    if target.parent_locked {
        return Err(Denial::Locked);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn user(id: Id) -> Identity {
        Identity { user_id: id, roles: vec![Role::User] }
    }

    fn moderator(id: Id) -> Identity {
        Identity { user_id: id, roles: vec![Role::User, Role::Moderator] }
    }

    #[test]
    fn owner_may_mutate_unlocked() {
        let target = MutationTarget { owner_id: 5, parent_locked: false };
        assert_eq!(authorize_mutation(&user(5), &target), Ok(()));
    }

    #[test]
    fn non_owner_is_denied() {
        let target = MutationTarget { owner_id: 5, parent_locked: false };
        assert_eq!(authorize_mutation(&user(6), &target), Err(Denial::NotOwner));
    }

    #[test]
    fn lock_blocks_owner() {
        let target = MutationTarget { owner_id: 5, parent_locked: true };
        assert_eq!(authorize_mutation(&user(5), &target), Err(Denial::Locked));
    }

    #[test]
    fn elevated_bypasses_ownership_and_lock() {
        let target = MutationTarget { owner_id: 5, parent_locked: true };
        assert_eq!(authorize_mutation(&moderator(9), &target), Ok(()));
    }
}
