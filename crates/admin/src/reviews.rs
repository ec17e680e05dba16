//! Review moderation.
//!
//! Customer reviews land unapproved and only show on product pages once an
//! admin approves them.

use serde_json::json;
use tracing::instrument;

use kundura_core::ReviewId;
use kundura_storefront::backend::{Filter, Query};
use kundura_storefront::models::Review;

use crate::context::{AdminContext, Listing};
use crate::error::Result;

const TABLE: &str = "reviews";

/// Every review, newest first, with author and product names.
#[derive(Debug)]
pub struct ReviewsAdmin {
    ctx: AdminContext,
    listing: Listing<Review>,
}

impl ReviewsAdmin {
    #[must_use]
    pub fn new(ctx: &AdminContext) -> Self {
        Self {
            ctx: ctx.clone(),
            listing: Listing::default(),
        }
    }

    #[must_use]
    pub const fn listing(&self) -> &Listing<Review> {
        &self.listing
    }

    /// Reviews still waiting for a decision.
    #[must_use]
    pub fn pending(&self) -> Vec<Review> {
        self.listing
            .items()
            .into_iter()
            .filter(|review| !review.is_approved)
            .collect()
    }

    /// # Errors
    ///
    /// Returns the backend error if the list cannot be read.
    pub async fn refresh(&self) -> Result<Vec<Review>> {
        let query = Query::table(TABLE)
            .select(Review::SELECT)
            .order_desc("created_at");
        let reviews = self.ctx.fetch("load reviews", &query).await?;
        Ok(self.listing.replace(reviews))
    }

    /// # Errors
    ///
    /// Returns `NotFound` if the review is gone, or the backend error.
    pub async fn approve(&self, id: ReviewId) -> Result<()> {
        self.set_approved(id, true).await
    }

    /// Hide a review again without deleting it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the review is gone, or the backend error.
    pub async fn reject(&self, id: ReviewId) -> Result<()> {
        self.set_approved(id, false).await
    }

    /// # Errors
    ///
    /// Returns the backend error if the delete fails.
    #[instrument(skip(self), fields(review_id = %id))]
    pub async fn delete(&self, id: ReviewId) -> Result<()> {
        self.ctx
            .delete("delete review", TABLE, &[Filter::eq("id", id)])
            .await?;
        self.ctx.succeed("Review deleted");
        let _ = self.refresh().await;
        Ok(())
    }

    #[instrument(skip(self), fields(review_id = %id))]
    async fn set_approved(&self, id: ReviewId, approved: bool) -> Result<()> {
        let action = if approved { "approve review" } else { "reject review" };
        self.ctx
            .update(
                action,
                TABLE,
                &json!({ "is_approved": approved }),
                &[Filter::eq("id", id)],
                "Review",
            )
            .await?;
        self.ctx
            .succeed(if approved { "Review approved" } else { "Review hidden" });
        let _ = self.refresh().await;
        Ok(())
    }
}
