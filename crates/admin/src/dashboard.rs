//! Dashboard figures.

use tracing::instrument;

use crate::context::AdminContext;
use crate::error::Result;

/// Exact row counts shown on the admin landing page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DashboardCounts {
    pub products: u64,
    pub users: u64,
    pub reviews: u64,
    pub slides: u64,
}

/// Count products, users, reviews and slides concurrently.
///
/// # Errors
///
/// Returns the first backend error; no partial figures are shown.
#[instrument(skip(ctx))]
pub async fn counts(ctx: &AdminContext) -> Result<DashboardCounts> {
    let backend = ctx.backend();
    let counted = tokio::try_join!(
        backend.count("products", &[]),
        backend.count("profiles", &[]),
        backend.count("reviews", &[]),
        backend.count("slider_items", &[]),
    );
    match counted {
        Ok((products, users, reviews, slides)) => Ok(DashboardCounts {
            products,
            users,
            reviews,
            slides,
        }),
        Err(e) => ctx.fail("load dashboard", e),
    }
}
