//! Product management.

use serde_json::json;
use tracing::instrument;

use kundura_core::{ProductId, ProductImageId};
use kundura_storefront::backend::{Conflict, Filter, Query};
use kundura_storefront::models::Product;

use crate::context::{AdminContext, Listing, inserted_id};
use crate::error::{AdminError, Result};
use crate::forms::ProductForm;

const TABLE: &str = "products";
const IMAGES: &str = "product_images";
const SIZES: &str = "product_sizes";

/// Products, newest first, with brand names and images.
#[derive(Debug)]
pub struct ProductsAdmin {
    ctx: AdminContext,
    listing: Listing<Product>,
}

impl ProductsAdmin {
    #[must_use]
    pub fn new(ctx: &AdminContext) -> Self {
        Self {
            ctx: ctx.clone(),
            listing: Listing::default(),
        }
    }

    #[must_use]
    pub const fn listing(&self) -> &Listing<Product> {
        &self.listing
    }

    /// # Errors
    ///
    /// Returns the backend error if the list cannot be read.
    pub async fn refresh(&self) -> Result<Vec<Product>> {
        let query = Query::table(TABLE)
            .select(Product::SELECT_LISTING)
            .order_desc("created_at");
        let products = self.ctx.fetch("load products", &query).await?;
        Ok(self.listing.replace(products))
    }

    /// # Errors
    ///
    /// Returns [`AdminError::Validation`] for a bad form, or the backend error.
    #[instrument(skip(self, form))]
    pub async fn create(&self, form: &ProductForm) -> Result<ProductId> {
        const ACTION: &str = "create product";
        let draft = form.validate().or_else(|e| self.ctx.fail(ACTION, e))?;
        let row = self.ctx.insert(ACTION, TABLE, &draft, Conflict::Error).await?;
        let id = inserted_id(row).or_else(|e| self.ctx.fail(ACTION, e))?;
        self.ctx.succeed("Product created");
        self.reload().await;
        Ok(id)
    }

    /// # Errors
    ///
    /// As [`Self::create`], plus `NotFound` if the product is gone.
    #[instrument(skip(self, form), fields(product_id = %id))]
    pub async fn update(&self, id: ProductId, form: &ProductForm) -> Result<()> {
        const ACTION: &str = "update product";
        let draft = form.validate().or_else(|e| self.ctx.fail(ACTION, e))?;
        self.ctx
            .update(ACTION, TABLE, &draft, &[Filter::eq("id", id)], "Product")
            .await?;
        self.ctx.succeed("Product updated");
        self.reload().await;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns the backend error if the delete fails.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn delete(&self, id: ProductId) -> Result<()> {
        self.ctx
            .delete("delete product", TABLE, &[Filter::eq("id", id)])
            .await?;
        self.ctx.succeed("Product deleted");
        self.reload().await;
        Ok(())
    }

    /// Record an uploaded image against a product. A new primary image
    /// demotes the previous one; the image goes last in display order.
    ///
    /// # Errors
    ///
    /// Returns the backend error if any write fails.
    #[instrument(skip(self, image_url), fields(product_id = %product_id))]
    pub async fn add_product_image(
        &self,
        product_id: ProductId,
        image_url: &str,
        is_primary: bool,
    ) -> Result<ProductImageId> {
        const ACTION: &str = "add image";
        let existing = match self
            .ctx
            .backend()
            .count(IMAGES, &[Filter::eq("product_id", product_id)])
            .await
        {
            Ok(count) => count,
            Err(e) => return self.ctx.fail(ACTION, e),
        };
        if is_primary && existing > 0 {
            let demoted = self
                .ctx
                .backend()
                .update(
                    IMAGES,
                    json!({ "is_primary": false }),
                    &[
                        Filter::eq("product_id", product_id),
                        Filter::eq("is_primary", true),
                    ],
                )
                .await;
            if let Err(e) = demoted {
                return self.ctx.fail(ACTION, e);
            }
        }

        let row = json!({
            "product_id": product_id,
            "image_url": image_url,
            "is_primary": is_primary || existing == 0,
            "display_order": existing,
        });
        let row = self.ctx.insert(ACTION, IMAGES, &row, Conflict::Error).await?;
        let id = inserted_id(row).or_else(|e| self.ctx.fail(ACTION, e))?;
        self.ctx.succeed("Image added");
        self.reload().await;
        Ok(id)
    }

    /// # Errors
    ///
    /// Returns the backend error if the delete fails.
    pub async fn remove_product_image(&self, image_id: ProductImageId) -> Result<()> {
        self.ctx
            .delete("remove image", IMAGES, &[Filter::eq("id", image_id)])
            .await?;
        self.ctx.succeed("Image removed");
        self.reload().await;
        Ok(())
    }

    /// Set the stock of one size, creating the size if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Validation`] for a blank size, or the backend
    /// error.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn set_stock(&self, product_id: ProductId, size: &str, stock: u32) -> Result<()> {
        const ACTION: &str = "update stock";
        let size = size.trim();
        if size.is_empty() {
            return self
                .ctx
                .fail(ACTION, AdminError::Validation("Size is required".to_string()));
        }
        let row = json!({ "product_id": product_id, "size": size, "stock": stock });
        self.ctx
            .insert(ACTION, SIZES, &row, Conflict::merge(&["product_id", "size"]))
            .await?;
        self.ctx.succeed("Stock updated");
        Ok(())
    }

    async fn reload(&self) {
        // A failed reload is already reported; the mutation itself stands
        let _ = self.refresh().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::test_support::{add_product, admin_session};
    use kundura_storefront::backend::DataApi;

    fn form(name: &str, price: &str) -> ProductForm {
        ProductForm {
            name: name.to_string(),
            price: price.to_string(),
            ..ProductForm::default()
        }
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let (backend, toasts, admin) = admin_session().await;
        let products = ProductsAdmin::new(&admin);

        let id = products.create(&form("Loafer", "899.90")).await.unwrap();
        assert_eq!(products.listing().len(), 1);
        assert_eq!(products.listing().items()[0].name, "Loafer");

        let mut edit = ProductForm::from_product(&products.listing().items()[0]);
        edit.description = "Suede".to_string();
        edit.is_featured = true;
        products.update(id, &edit).await.unwrap();
        let updated = &products.listing().items()[0];
        assert_eq!(updated.description.as_deref(), Some("Suede"));
        assert!(updated.is_featured);

        products.delete(id).await.unwrap();
        assert!(products.listing().is_empty());
        assert!(backend.rows(TABLE).is_empty());
        assert_eq!(
            toasts.titles(),
            ["Product created", "Product updated", "Product deleted"]
        );
    }

    #[tokio::test]
    async fn test_invalid_form_writes_nothing() {
        let (backend, toasts, admin) = admin_session().await;
        let products = ProductsAdmin::new(&admin);

        let err = products.create(&form("", "10")).await.unwrap_err();
        assert!(matches!(err, AdminError::Validation(_)));
        assert!(backend.rows(TABLE).is_empty());
        assert_eq!(toasts.titles(), ["Could not create product"]);
    }

    #[tokio::test]
    async fn test_update_missing_product() {
        let (_backend, _toasts, admin) = admin_session().await;
        let products = ProductsAdmin::new(&admin);
        let err = products
            .update(ProductId::random(), &form("Ghost", "1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdminError::App(kundura_storefront::AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_images_keep_one_primary() {
        let (backend, _toasts, admin) = admin_session().await;
        let product = add_product(&backend, "Boot").await;
        let products = ProductsAdmin::new(&admin);

        products.add_product_image(product, "a.jpg", false).await.unwrap();
        products.add_product_image(product, "b.jpg", false).await.unwrap();
        products.add_product_image(product, "c.jpg", true).await.unwrap();

        let listed = &products.listing().items()[0];
        assert_eq!(listed.primary_image(), Some("c.jpg"));
        let primaries = backend
            .rows(IMAGES)
            .into_iter()
            .filter(|row| row["is_primary"] == true)
            .count();
        assert_eq!(primaries, 1);
    }

    #[tokio::test]
    async fn test_set_stock_upserts() {
        let (backend, _toasts, admin) = admin_session().await;
        let product = add_product(&backend, "Boot").await;
        let products = ProductsAdmin::new(&admin);

        products.set_stock(product, "42", 5).await.unwrap();
        products.set_stock(product, "42", 2).await.unwrap();
        products.set_stock(product, "43", 1).await.unwrap();

        let sizes = backend.rows(SIZES);
        assert_eq!(sizes.len(), 2);
        let size_42 = sizes.iter().find(|row| row["size"] == "42").unwrap();
        assert_eq!(size_42["stock"], 2);
        assert_eq!(
            backend
                .count(SIZES, &[Filter::eq("product_id", product)])
                .await
                .unwrap(),
            2
        );
        assert!(products.set_stock(product, " ", 1).await.is_err());
    }
}
