//! Catalog and profile reads.
//!
//! Product listings, product detail, brands, the homepage slider and
//! reviews are plain one-shot reads; nothing here subscribes to changes.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use serde_json::{Value, json};
use tracing::instrument;

use kundura_core::{BrandId, ProductId};

use crate::backend::{BackendError, Conflict, Filter, Query, Row, decode_first, decode_rows};
use crate::error::{AppError, Result, add_breadcrumb};
use crate::models::{Brand, Product, Profile, ProfileUpdate, Review, Slide};
use crate::session::SessionContext;
use crate::toast::Toast;

/// How many products the homepage features.
pub const FEATURED_LIMIT: usize = 8;

/// Listing filters, applied after the products are read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductFilter {
    pub brand: Option<BrandId>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    /// Case-insensitive match on product or brand name.
    pub search: Option<String>,
}

impl ProductFilter {
    #[must_use]
    pub fn matches(&self, product: &Product) -> bool {
        self.brand.is_none_or(|brand| product.brand_id == Some(brand))
            && self.min_price.is_none_or(|min| product.price >= min)
            && self.max_price.is_none_or(|max| product.price <= max)
            && self
                .search
                .as_deref()
                .is_none_or(|needle| product.matches_search(needle))
    }
}

/// Order sizes numerically when both parse ("38" < "40"), else as text.
fn compare_sizes(a: &str, b: &str) -> Ordering {
    match (a.parse::<Decimal>(), b.parse::<Decimal>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Mean rating rounded to one decimal, `None` without reviews.
#[must_use]
pub fn average_rating(reviews: &[Review]) -> Option<Decimal> {
    if reviews.is_empty() {
        return None;
    }
    let total: u32 = reviews.iter().map(|review| u32::from(review.rating)).sum();
    let count = u32::try_from(reviews.len()).unwrap_or(u32::MAX);
    Some((Decimal::from(total) / Decimal::from(count)).round_dp(1))
}

fn blank_to_null(value: &str) -> Value {
    let value = value.trim();
    if value.is_empty() {
        Value::Null
    } else {
        Value::String(value.to_string())
    }
}

/// Read-only catalog access plus review submission.
#[derive(Debug, Clone)]
pub struct Catalog {
    session: SessionContext,
}

impl Catalog {
    #[must_use]
    pub fn new(session: &SessionContext) -> Self {
        Self {
            session: session.clone(),
        }
    }

    async fn read(&self, action: &str, query: &Query) -> Result<Vec<Row>> {
        match self.session.backend().select(query).await {
            Ok(rows) => Ok(rows),
            Err(e) => self.session.fail(action, e),
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, action: &str, rows: Vec<Row>) -> Result<Vec<T>> {
        decode_rows(rows).or_else(|e| self.session.fail(action, e))
    }

    /// Newest featured products for the homepage.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] if the read fails.
    pub async fn featured_products(&self) -> Result<Vec<Product>> {
        const ACTION: &str = "load products";
        let query = Query::table("products")
            .select(Product::SELECT_LISTING)
            .eq("is_featured", true)
            .order_desc("created_at")
            .limit(FEATURED_LIMIT);
        let rows = self.read(ACTION, &query).await?;
        self.decode(ACTION, rows)
    }

    /// Products matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] if the read fails.
    #[instrument(skip(self))]
    pub async fn products(&self, filter: &ProductFilter) -> Result<Vec<Product>> {
        const ACTION: &str = "load products";
        let query = Query::table("products")
            .select(Product::SELECT_LISTING)
            .order_desc("created_at");
        let rows = self.read(ACTION, &query).await?;
        let products: Vec<Product> = self.decode(ACTION, rows)?;
        Ok(products.into_iter().filter(|p| filter.matches(p)).collect())
    }

    /// One product with images (primary first) and sizes (ascending).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown id.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn product(&self, id: ProductId) -> Result<Product> {
        const ACTION: &str = "load product";
        let query = Query::table("products")
            .select(Product::SELECT_DETAIL)
            .eq("id", id);
        let rows = self.read(ACTION, &query).await?;
        let Some(mut product) = self.decode::<Product>(ACTION, rows)?.into_iter().next() else {
            return self.session.fail(ACTION, AppError::NotFound("Product".to_string()));
        };
        product
            .product_images
            .sort_by_key(|image| (!image.is_primary, image.display_order));
        product
            .product_sizes
            .sort_by(|a, b| compare_sizes(&a.size, &b.size));
        Ok(product)
    }

    /// All brands by name.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] if the read fails.
    pub async fn brands(&self) -> Result<Vec<Brand>> {
        const ACTION: &str = "load brands";
        let rows = self
            .read(ACTION, &Query::table("brands").order_asc("name"))
            .await?;
        self.decode(ACTION, rows)
    }

    /// Active homepage slides in display order.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] if the read fails.
    pub async fn active_slides(&self) -> Result<Vec<Slide>> {
        const ACTION: &str = "load slides";
        let query = Query::table("slider_items")
            .eq("is_active", true)
            .order_asc("display_order");
        let rows = self.read(ACTION, &query).await?;
        self.decode(ACTION, rows)
    }

    /// Approved reviews of a product, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] if the read fails.
    pub async fn approved_reviews(&self, product_id: ProductId) -> Result<Vec<Review>> {
        const ACTION: &str = "load reviews";
        let query = Query::table("reviews")
            .select(Review::SELECT)
            .eq("product_id", product_id)
            .eq("is_approved", true)
            .order_desc("created_at");
        let rows = self.read(ACTION, &query).await?;
        self.decode(ACTION, rows)
    }

    /// Submit a review. It stays hidden until an admin approves it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Unauthenticated`] when signed out and
    /// [`AppError::Validation`] for a rating outside 1 to 5.
    #[instrument(skip(self, comment), fields(product_id = %product_id))]
    pub async fn submit_review(&self, product_id: ProductId, rating: u8, comment: &str) -> Result<()> {
        const ACTION: &str = "submit review";
        let user = self.session.require_user_for(ACTION)?;
        if !(1..=5).contains(&rating) {
            return self.session.fail(
                ACTION,
                AppError::Validation("rating must be between 1 and 5".to_string()),
            );
        }

        let row = json!({
            "product_id": product_id,
            "user_id": user.id,
            "rating": rating,
            "comment": blank_to_null(comment),
        });
        match self
            .session
            .backend()
            .insert("reviews", vec![row], Conflict::Error)
            .await
        {
            Ok(_) => {
                add_breadcrumb("reviews", "Review submitted", None);
                self.session.toast(
                    Toast::success("Review submitted")
                        .with_description("It will appear once approved."),
                );
                Ok(())
            }
            Err(e) => self.session.fail(ACTION, e),
        }
    }
}

/// The signed-in user's own profile.
#[derive(Debug, Clone)]
pub struct ProfileController {
    session: SessionContext,
}

impl ProfileController {
    #[must_use]
    pub fn new(session: &SessionContext) -> Self {
        Self {
            session: session.clone(),
        }
    }

    /// # Errors
    ///
    /// Returns [`AppError::Unauthenticated`] when signed out and
    /// [`AppError::NotFound`] if the profile row is missing.
    pub async fn load(&self) -> Result<Profile> {
        const ACTION: &str = "load profile";
        let user = self.session.require_user_for(ACTION)?;
        let query = Query::table("profiles").eq("id", user.id);
        let found = match self.session.backend().select(&query).await {
            Ok(rows) => decode_first::<Profile>(rows),
            Err(e) => Err(e),
        };
        match found {
            Ok(Some(profile)) => Ok(profile),
            Ok(None) => self.session.fail(ACTION, AppError::NotFound("Profile".to_string())),
            Err(e) => self.session.fail(ACTION, e),
        }
    }

    /// Save edits; blank fields are cleared.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Unauthenticated`] when signed out and
    /// [`AppError::Backend`] if the update fails.
    #[instrument(skip(self, update))]
    pub async fn save(&self, update: ProfileUpdate) -> Result<Profile> {
        const ACTION: &str = "update profile";
        let user = self.session.require_user_for(ACTION)?;

        let saved = self.write(user.id, update.normalized()).await;
        match saved {
            Ok(Some(profile)) => {
                self.session.toast(Toast::success("Profile updated"));
                Ok(profile)
            }
            Ok(None) => self.session.fail(ACTION, AppError::NotFound("Profile".to_string())),
            Err(e) => self.session.fail(ACTION, e),
        }
    }

    async fn write(
        &self,
        user_id: kundura_core::UserId,
        update: ProfileUpdate,
    ) -> std::result::Result<Option<Profile>, BackendError> {
        let patch = serde_json::to_value(update)?;
        let rows = self
            .session
            .backend()
            .update("profiles", patch, &[Filter::eq("id", user_id)])
            .await?;
        decode_first(rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::backend::{DataApi, MemoryBackend};
    use crate::toast::ToastLog;
    use std::sync::Arc;

    async fn seeded() -> (MemoryBackend, Arc<ToastLog>, SessionContext, ProductId) {
        let backend = MemoryBackend::storefront();
        let brand = BrandId::random();
        let product = ProductId::random();
        backend
            .insert("brands", vec![json!({"id": brand, "name": "Kuzey"})], Conflict::Error)
            .await
            .unwrap();
        backend
            .insert(
                "products",
                vec![
                    json!({"id": product, "name": "Trail Runner", "price": 1500, "brand_id": brand, "is_featured": true}),
                    json!({"name": "City Loafer", "price": 700}),
                ],
                Conflict::Error,
            )
            .await
            .unwrap();
        backend
            .insert(
                "product_sizes",
                vec![
                    json!({"product_id": product, "size": "42", "stock": 1}),
                    json!({"product_id": product, "size": "38", "stock": 0}),
                    json!({"product_id": product, "size": "40", "stock": 3}),
                ],
                Conflict::Error,
            )
            .await
            .unwrap();
        backend
            .insert(
                "product_images",
                vec![
                    json!({"product_id": product, "image_url": "side.jpg", "display_order": 1}),
                    json!({"product_id": product, "image_url": "front.jpg", "display_order": 2, "is_primary": true}),
                ],
                Conflict::Error,
            )
            .await
            .unwrap();
        let toasts = Arc::new(ToastLog::new());
        let session = SessionContext::start(Arc::new(backend.clone()), toasts.clone())
            .await
            .unwrap();
        (backend, toasts, session, product)
    }

    #[tokio::test]
    async fn test_product_detail_ordering() {
        let (_backend, _toasts, session, product) = seeded().await;
        let detail = Catalog::new(&session).product(product).await.unwrap();

        let sizes: Vec<_> = detail.product_sizes.iter().map(|s| s.size.as_str()).collect();
        assert_eq!(sizes, ["38", "40", "42"]);
        assert_eq!(detail.product_images[0].image_url, "front.jpg");
        assert_eq!(detail.brand_name(), Some("Kuzey"));
    }

    #[tokio::test]
    async fn test_unknown_product_is_not_found() {
        let (_backend, toasts, session, _product) = seeded().await;
        let err = Catalog::new(&session).product(ProductId::random()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(toasts.last().unwrap().description.as_deref(), Some("Product not found."));
    }

    #[tokio::test]
    async fn test_filters_and_featured() {
        let (_backend, _toasts, session, _product) = seeded().await;
        let catalog = Catalog::new(&session);

        assert_eq!(catalog.featured_products().await.unwrap().len(), 1);
        assert_eq!(catalog.products(&ProductFilter::default()).await.unwrap().len(), 2);

        let cheap = ProductFilter {
            max_price: Some(Decimal::from(1000)),
            ..ProductFilter::default()
        };
        let found = catalog.products(&cheap).await.unwrap();
        assert_eq!(found[0].name, "City Loafer");

        let by_brand = ProductFilter {
            search: Some("kuz".to_string()),
            ..ProductFilter::default()
        };
        assert_eq!(catalog.products(&by_brand).await.unwrap()[0].name, "Trail Runner");
    }

    #[tokio::test]
    async fn test_reviews_land_unapproved() {
        let (backend, _toasts, session, product) = seeded().await;
        let catalog = Catalog::new(&session);
        assert!(matches!(
            catalog.submit_review(product, 5, "great").await,
            Err(AppError::Unauthenticated)
        ));

        session.sign_up("r@example.com", "secret1", "Rana", "Kaya").await.unwrap();
        assert!(matches!(
            catalog.submit_review(product, 6, "").await,
            Err(AppError::Validation(_))
        ));
        catalog.submit_review(product, 4, "  ").await.unwrap();
        assert!(catalog.approved_reviews(product).await.unwrap().is_empty());

        backend
            .update("reviews", json!({"is_approved": true}), &[])
            .await
            .unwrap();
        let reviews = catalog.approved_reviews(product).await.unwrap();
        assert_eq!(reviews[0].author_name(), "Rana Kaya");
        assert_eq!(reviews[0].comment, None);
        assert_eq!(average_rating(&reviews), Some(Decimal::from(4)));
    }

    #[tokio::test]
    async fn test_profile_save_clears_blanks() {
        let (_backend, toasts, session, _product) = seeded().await;
        session.sign_up("p@example.com", "secret1", "Pelin", "Ak").await.unwrap();
        let profiles = ProfileController::new(&session);

        let saved = profiles
            .save(ProfileUpdate {
                first_name: Some(" Pelin ".to_string()),
                last_name: Some("Ak".to_string()),
                phone: Some("   ".to_string()),
                address: Some("Kadıköy, İstanbul".to_string()),
                payment_method: None,
            })
            .await
            .unwrap();
        assert_eq!(saved.first_name.as_deref(), Some("Pelin"));
        assert_eq!(saved.phone, None);
        assert_eq!(profiles.load().await.unwrap().display_name(), "Pelin Ak");
        assert_eq!(toasts.last().unwrap().title, "Profile updated");
    }
}
