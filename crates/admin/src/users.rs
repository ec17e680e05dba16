//! Users and their roles.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use kundura_core::{AppRole, UserId};
use kundura_storefront::backend::{Conflict, Query};
use kundura_storefront::models::Profile;

use crate::context::{AdminContext, Listing};
use crate::error::{AdminError, Result};

const PROFILES: &str = "profiles";
const ROLES: &str = "user_roles";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoleRow {
    user_id: UserId,
    role: AppRole,
}

/// A profile with its role; `user` when no role row exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserWithRole {
    pub profile: Profile,
    pub role: AppRole,
}

/// Registered users, newest first.
#[derive(Debug)]
pub struct UsersAdmin {
    ctx: AdminContext,
    listing: Listing<UserWithRole>,
}

impl UsersAdmin {
    #[must_use]
    pub fn new(ctx: &AdminContext) -> Self {
        Self {
            ctx: ctx.clone(),
            listing: Listing::default(),
        }
    }

    #[must_use]
    pub const fn listing(&self) -> &Listing<UserWithRole> {
        &self.listing
    }

    /// # Errors
    ///
    /// Returns the backend error if profiles or roles cannot be read.
    pub async fn refresh(&self) -> Result<Vec<UserWithRole>> {
        const ACTION: &str = "load users";
        let profiles = Query::table(PROFILES).order_desc("created_at");
        let roles = Query::table(ROLES).select("user_id, role");
        let (profiles, roles) = tokio::try_join!(
            self.ctx.fetch::<Profile>(ACTION, &profiles),
            self.ctx.fetch::<RoleRow>(ACTION, &roles),
        )?;

        let roles: HashMap<UserId, AppRole> =
            roles.into_iter().map(|row| (row.user_id, row.role)).collect();
        let users = profiles
            .into_iter()
            .map(|profile| UserWithRole {
                role: roles.get(&profile.id).copied().unwrap_or_default(),
                profile,
            })
            .collect();
        Ok(self.listing.replace(users))
    }

    /// Give a user exactly one role, replacing whatever they had.
    ///
    /// One upsert on the unique `user_id` key: there is never a moment with
    /// zero or two role rows.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Validation`] when an admin tries to change
    /// their own role, or the backend error.
    #[instrument(skip(self), fields(user_id = %user_id, role = %role))]
    pub async fn set_role(&self, user_id: UserId, role: AppRole) -> Result<()> {
        const ACTION: &str = "change role";
        if user_id == self.ctx.admin().id && !role.is_admin() {
            return self.ctx.fail(
                ACTION,
                AdminError::Validation("You cannot remove your own admin role".to_string()),
            );
        }

        let row = RoleRow { user_id, role };
        self.ctx
            .insert(ACTION, ROLES, &row, Conflict::merge(&["user_id"]))
            .await?;
        info!("Role changed");
        self.ctx.succeed("Role updated");
        let _ = self.refresh().await;
        Ok(())
    }
}
