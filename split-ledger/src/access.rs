//! Group access checks
//!
//! A caller may touch a group only through an alive member linked to their
//! identity. The group owner is the identity that created the group.

use crate::{
    error::{Error, Result},
    storage::Storage,
    types::{Group, GroupId, Member, MemberId, UserId},
};

/// Resolved caller membership in an alive group
#[derive(Debug, Clone)]
pub struct Membership {
    /// The group
    pub group: Group,
    /// Caller identity
    pub user: UserId,
    /// Caller's member record
    pub member: Member,
    /// Every alive member, in creation order
    pub members: Vec<Member>,
}

impl Membership {
    /// Caller created the group
    pub fn is_owner(&self) -> bool {
        self.user == self.group.owner
    }

    /// Look up an alive member of this group
    pub fn find_member(&self, member_id: MemberId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == member_id)
    }
}

/// Alive members of a group, in creation order
pub fn alive_members(storage: &Storage, group_id: GroupId) -> Result<Vec<Member>> {
    let mut members: Vec<Member> = storage
        .list_by_group::<Member>(group_id)?
        .into_iter()
        .filter(|m| m.deleted_at.is_none())
        .collect();
    members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    Ok(members)
}

/// Resolve the caller's membership, failing with not-found for a missing or
/// deleted group and forbidden for a non-member.
pub fn require_member(storage: &Storage, group_id: GroupId, user: UserId) -> Result<Membership> {
    let group = storage.get_alive::<Group>(group_id.key())?;
    let members = alive_members(storage, group_id)?;

    let member = members
        .iter()
        .find(|m| m.user_id == Some(user))
        .cloned()
        .ok_or_else(|| {
            tracing::debug!(group_id = %group_id, user_id = %user, "Access denied: not a member");
            Error::Forbidden("You do not have access to this group".to_string())
        })?;

    Ok(Membership {
        group,
        user,
        member,
        members,
    })
}

/// Resolve the caller's membership and require group ownership
pub fn require_owner(storage: &Storage, group_id: GroupId, user: UserId) -> Result<Membership> {
    let membership = require_member(storage, group_id, user)?;
    if !membership.is_owner() {
        return Err(Error::Forbidden(
            "Only the group owner can perform this action".to_string(),
        ));
    }
    Ok(membership)
}

/// True if the caller is an alive member of an alive group
pub fn is_member(storage: &Storage, group_id: GroupId, user: UserId) -> Result<bool> {
    match require_member(storage, group_id, user) {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() || matches!(e, Error::Forbidden(_)) => Ok(false),
        Err(e) => Err(e),
    }
}
