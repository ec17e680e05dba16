//! Brand management.

use tracing::instrument;

use kundura_core::BrandId;
use kundura_storefront::backend::{Conflict, Filter, Query};
use kundura_storefront::models::Brand;

use crate::context::{AdminContext, Listing, inserted_id};
use crate::error::Result;
use crate::forms::BrandForm;

const TABLE: &str = "brands";

/// Brands by name.
#[derive(Debug)]
pub struct BrandsAdmin {
    ctx: AdminContext,
    listing: Listing<Brand>,
}

impl BrandsAdmin {
    #[must_use]
    pub fn new(ctx: &AdminContext) -> Self {
        Self {
            ctx: ctx.clone(),
            listing: Listing::default(),
        }
    }

    #[must_use]
    pub const fn listing(&self) -> &Listing<Brand> {
        &self.listing
    }

    /// # Errors
    ///
    /// Returns the backend error if the list cannot be read.
    pub async fn refresh(&self) -> Result<Vec<Brand>> {
        let query = Query::table(TABLE).order_asc("name");
        let brands = self.ctx.fetch("load brands", &query).await?;
        Ok(self.listing.replace(brands))
    }

    /// # Errors
    ///
    /// Returns [`crate::AdminError::Validation`] for a bad form, or the
    /// backend error.
    #[instrument(skip(self, form))]
    pub async fn create(&self, form: &BrandForm) -> Result<BrandId> {
        const ACTION: &str = "create brand";
        let draft = form.validate().or_else(|e| self.ctx.fail(ACTION, e))?;
        let row = self.ctx.insert(ACTION, TABLE, &draft, Conflict::Error).await?;
        let id = inserted_id(row).or_else(|e| self.ctx.fail(ACTION, e))?;
        self.ctx.succeed("Brand created");
        let _ = self.refresh().await;
        Ok(id)
    }

    /// # Errors
    ///
    /// As [`Self::create`], plus `NotFound` if the brand is gone.
    #[instrument(skip(self, form), fields(brand_id = %id))]
    pub async fn update(&self, id: BrandId, form: &BrandForm) -> Result<()> {
        const ACTION: &str = "update brand";
        let draft = form.validate().or_else(|e| self.ctx.fail(ACTION, e))?;
        self.ctx
            .update(ACTION, TABLE, &draft, &[Filter::eq("id", id)], "Brand")
            .await?;
        self.ctx.succeed("Brand updated");
        let _ = self.refresh().await;
        Ok(())
    }

    /// Delete a brand. Its products stay, without a brand.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the delete fails.
    #[instrument(skip(self), fields(brand_id = %id))]
    pub async fn delete(&self, id: BrandId) -> Result<()> {
        self.ctx
            .delete("delete brand", TABLE, &[Filter::eq("id", id)])
            .await?;
        self.ctx.succeed("Brand deleted");
        let _ = self.refresh().await;
        Ok(())
    }
}
