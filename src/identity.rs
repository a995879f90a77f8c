//! User and group resolution for commands that run under another identity.
use std::os::unix::process::CommandExt;
use std::process;

use nix::unistd::{Gid, Group, Uid, User};

use crate::error::CommandError;

/// Numeric identity a child assumes before its program image is replaced.
///
/// Names are resolved in the supervisor, before fork, so the child only has
/// to perform the `setgid`/`setuid` calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Identity {
    uid: Option<libc::uid_t>,
    gid: Option<libc::gid_t>,
}

impl Identity {
    /// Resolves the configured user and group names.
    ///
    /// The group defaults to the user's primary group. Names that are not
    /// found in the account database but parse as numbers are taken as raw
    /// ids.
    pub fn resolve(user: Option<&str>, group: Option<&str>) -> Result<Self, CommandError> {
        let mut identity = Identity::default();

        if let Some(user_name) = user {
            let user = lookup_user(user_name)?;
            identity.uid = Some(user.uid.as_raw());
            identity.gid = Some(user.gid.as_raw());
        }

        if let Some(group_name) = group {
            let group = lookup_group(group_name)?;
            identity.gid = Some(group.gid.as_raw());
        }

        Ok(identity)
    }

    /// UID the child switches to, if any.
    pub fn uid(&self) -> Option<libc::uid_t> {
        self.uid
    }

    /// GID the child switches to, if any.
    pub fn gid(&self) -> Option<libc::gid_t> {
        self.gid
    }

    /// Returns `true` when the child keeps the supervisor's identity.
    pub fn is_inherited(&self) -> bool {
        self.uid.is_none() && self.gid.is_none()
    }

    /// Arranges for the child to switch identity between fork and exec.
    ///
    /// The switch happens before the working directory is changed, so the
    /// directory is entered with the lowered privileges. When the supervisor
    /// runs as root, supplementary groups are dropped as well.
    pub fn apply(&self, command: &mut process::Command) {
        if let Some(gid) = self.gid {
            command.gid(gid);
        }
        if let Some(uid) = self.uid {
            command.uid(uid);
        }
    }
}

fn lookup_user(name: &str) -> Result<User, CommandError> {
    let lookup_err = |source| CommandError::IdentityLookup {
        name: name.to_string(),
        source,
    };

    if let Some(user) = User::from_name(name).map_err(lookup_err)? {
        return Ok(user);
    }
    if let Ok(uid) = name.parse::<libc::uid_t>()
        && let Some(user) = User::from_uid(Uid::from_raw(uid)).map_err(lookup_err)?
    {
        return Ok(user);
    }
    Err(CommandError::UnknownUser(name.to_string()))
}

fn lookup_group(name: &str) -> Result<Group, CommandError> {
    let lookup_err = |source| CommandError::IdentityLookup {
        name: name.to_string(),
        source,
    };

    if let Some(group) = Group::from_name(name).map_err(lookup_err)? {
        return Ok(group);
    }
    if let Ok(gid) = name.parse::<libc::gid_t>()
        && let Some(group) = Group::from_gid(Gid::from_raw(gid)).map_err(lookup_err)?
    {
        return Ok(group);
    }
    Err(CommandError::UnknownGroup(name.to_string()))
}
