//! Role management.

use tracing::info;

use kundura_admin::users::UsersAdmin;
use kundura_core::{AppRole, UserId};

use super::{Account, CommandError};

/// Give `user` exactly `role`.
///
/// # Errors
///
/// Returns `CommandError` if the caller is not an admin or the write fails.
pub async fn set(account: &Account, user: UserId, role: AppRole) -> Result<(), CommandError> {
    let admin = account.admin().await?;
    UsersAdmin::new(&admin).set_role(user, role).await?;
    info!(user_id = %user, role = %role, "Role set");
    Ok(())
}
