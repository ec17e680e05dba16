//! Homepage slider management.

use serde_json::json;
use tracing::instrument;

use kundura_core::SliderId;
use kundura_storefront::backend::{Conflict, Filter, Query};
use kundura_storefront::models::Slide;

use crate::context::{AdminContext, Listing, inserted_id};
use crate::error::Result;
use crate::forms::SliderForm;

const TABLE: &str = "slider_items";

/// All slides, active or not, in display order.
#[derive(Debug)]
pub struct SlidersAdmin {
    ctx: AdminContext,
    listing: Listing<Slide>,
}

impl SlidersAdmin {
    #[must_use]
    pub fn new(ctx: &AdminContext) -> Self {
        Self {
            ctx: ctx.clone(),
            listing: Listing::default(),
        }
    }

    #[must_use]
    pub const fn listing(&self) -> &Listing<Slide> {
        &self.listing
    }

    /// # Errors
    ///
    /// Returns the backend error if the list cannot be read.
    pub async fn refresh(&self) -> Result<Vec<Slide>> {
        let query = Query::table(TABLE).order_asc("display_order");
        let slides = self.ctx.fetch("load slides", &query).await?;
        Ok(self.listing.replace(slides))
    }

    /// # Errors
    ///
    /// Returns [`crate::AdminError::Validation`] for a bad form, or the
    /// backend error.
    #[instrument(skip(self, form))]
    pub async fn create(&self, form: &SliderForm) -> Result<SliderId> {
        const ACTION: &str = "create slide";
        let draft = form.validate().or_else(|e| self.ctx.fail(ACTION, e))?;
        let row = self.ctx.insert(ACTION, TABLE, &draft, Conflict::Error).await?;
        let id = inserted_id(row).or_else(|e| self.ctx.fail(ACTION, e))?;
        self.ctx.succeed("Slide created");
        let _ = self.refresh().await;
        Ok(id)
    }

    /// # Errors
    ///
    /// As [`Self::create`], plus `NotFound` if the slide is gone.
    #[instrument(skip(self, form), fields(slide_id = %id))]
    pub async fn update(&self, id: SliderId, form: &SliderForm) -> Result<()> {
        const ACTION: &str = "update slide";
        let draft = form.validate().or_else(|e| self.ctx.fail(ACTION, e))?;
        self.ctx
            .update(ACTION, TABLE, &draft, &[Filter::eq("id", id)], "Slide")
            .await?;
        self.ctx.succeed("Slide updated");
        let _ = self.refresh().await;
        Ok(())
    }

    /// Show or hide a slide without touching the rest of it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the slide is gone, or the backend error.
    pub async fn set_active(&self, id: SliderId, active: bool) -> Result<()> {
        self.ctx
            .update(
                "update slide",
                TABLE,
                &json!({ "is_active": active }),
                &[Filter::eq("id", id)],
                "Slide",
            )
            .await?;
        self.ctx
            .succeed(if active { "Slide shown" } else { "Slide hidden" });
        let _ = self.refresh().await;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns the backend error if the delete fails.
    #[instrument(skip(self), fields(slide_id = %id))]
    pub async fn delete(&self, id: SliderId) -> Result<()> {
        self.ctx
            .delete("delete slide", TABLE, &[Filter::eq("id", id)])
            .await?;
        self.ctx.succeed("Slide deleted");
        let _ = self.refresh().await;
        Ok(())
    }
}
