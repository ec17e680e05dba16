//! Catalog rows: products and everything hanging off them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kundura_core::{BrandId, Price, ProductId, ProductImageId, ProductSizeId, ReviewId, SliderId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brand {
    pub id: BrandId,
    pub name: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A brand embedded in another row by name only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandName {
    pub name: String,
}

/// A product embedded in another row by name only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductImage {
    pub id: ProductImageId,
    pub image_url: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSize {
    pub id: ProductSizeId,
    pub size: String,
    #[serde(default)]
    pub stock: i32,
}

impl ProductSize {
    #[must_use]
    pub const fn in_stock(&self) -> bool {
        self.stock > 0
    }
}

/// The image shown for a product: the primary one, else the first in
/// display order.
fn primary_image(images: &[ProductImage]) -> Option<&ProductImage> {
    images
        .iter()
        .find(|image| image.is_primary)
        .or_else(|| images.iter().min_by_key(|image| image.display_order))
}

/// The slice of a product that cart lines and favorites embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub product_images: Vec<ProductImage>,
}

impl ProductSummary {
    #[must_use]
    pub const fn unit_price(&self) -> Price {
        Price::shop(self.price)
    }

    #[must_use]
    pub fn primary_image(&self) -> Option<&str> {
        primary_image(&self.product_images).map(|image| image.image_url.as_str())
    }
}

/// A catalog product with its brand, images and sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub brand_id: Option<BrandId>,
    #[serde(default)]
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "brands")]
    pub brand: Option<BrandName>,
    #[serde(default)]
    pub product_images: Vec<ProductImage>,
    #[serde(default)]
    pub product_sizes: Vec<ProductSize>,
}

impl Product {
    /// Listing selection: brand name and images.
    pub const SELECT_LISTING: &'static str = "*, brands(name), product_images(*)";
    /// Detail selection: listing plus sizes.
    pub const SELECT_DETAIL: &'static str = "*, brands(name), product_images(*), product_sizes(*)";

    #[must_use]
    pub const fn unit_price(&self) -> Price {
        Price::shop(self.price)
    }

    #[must_use]
    pub fn primary_image(&self) -> Option<&str> {
        primary_image(&self.product_images).map(|image| image.image_url.as_str())
    }

    #[must_use]
    pub fn brand_name(&self) -> Option<&str> {
        self.brand.as_ref().map(|brand| brand.name.as_str())
    }

    /// Images with the primary one first, then by display order.
    #[must_use]
    pub fn gallery(&self) -> Vec<&ProductImage> {
        let mut images: Vec<&ProductImage> = self.product_images.iter().collect();
        images.sort_by_key(|image| (!image.is_primary, image.display_order));
        images
    }

    /// Case-insensitive match on product or brand name.
    #[must_use]
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&needle)
            || self
                .brand_name()
                .is_some_and(|brand| brand.to_lowercase().contains(&needle))
    }
}

/// A homepage slider entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    pub id: SliderId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub image_url: String,
    #[serde(default)]
    pub button_text: Option<String>,
    #[serde(default)]
    pub button_link: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerName {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub product_id: ProductId,
    pub user_id: UserId,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "profiles")]
    pub author: Option<ReviewerName>,
    #[serde(default, rename = "products")]
    pub product: Option<ProductName>,
}

impl Review {
    pub const SELECT: &'static str = "*, profiles(first_name, last_name), products(name)";

    /// Name shown next to the review.
    #[must_use]
    pub fn author_name(&self) -> String {
        let name = self
            .author
            .as_ref()
            .map(|author| {
                [author.first_name.as_deref(), author.last_name.as_deref()]
                    .into_iter()
                    .flatten()
                    .filter(|part| !part.trim().is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        if name.is_empty() {
            "Anonymous".to_string()
        } else {
            name
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product(images: serde_json::Value) -> Product {
        serde_json::from_value(json!({
            "id": ProductId::random(),
            "name": "Runner",
            "price": 1299.9,
            "created_at": "2024-03-01T10:00:00Z",
            "brands": {"name": "Kuzey"},
            "product_images": images,
        }))
        .unwrap()
    }

    #[test]
    fn test_primary_image_falls_back_to_display_order() {
        let p = product(json!([
            {"id": ProductImageId::random(), "image_url": "b.jpg", "display_order": 2},
            {"id": ProductImageId::random(), "image_url": "a.jpg", "display_order": 1},
        ]));
        assert_eq!(p.primary_image(), Some("a.jpg"));

        let p = product(json!([
            {"id": ProductImageId::random(), "image_url": "a.jpg", "display_order": 1},
            {"id": ProductImageId::random(), "image_url": "c.jpg", "display_order": 3, "is_primary": true},
        ]));
        assert_eq!(p.primary_image(), Some("c.jpg"));
        assert_eq!(p.gallery()[0].image_url, "c.jpg");
        assert!(product(json!([])).primary_image().is_none());
    }

    #[test]
    fn test_search_matches_name_or_brand() {
        let p = product(json!([]));
        assert!(p.matches_search("run"));
        assert!(p.matches_search("KUZ"));
        assert!(p.matches_search("  "));
        assert!(!p.matches_search("boot"));
        assert_eq!(p.unit_price().display(), "₺1299.90");
    }

    #[test]
    fn test_review_author_name() {
        let mut review: Review = serde_json::from_value(json!({
            "id": ReviewId::random(),
            "product_id": ProductId::random(),
            "user_id": UserId::random(),
            "rating": 5,
            "created_at": "2024-03-01T10:00:00Z",
            "profiles": {"first_name": "Ayşe", "last_name": null},
        }))
        .unwrap();
        assert_eq!(review.author_name(), "Ayşe");
        review.author = None;
        assert_eq!(review.author_name(), "Anonymous");
    }
}
