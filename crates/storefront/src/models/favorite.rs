use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kundura_core::{FavoriteId, ProductId, UserId};

use super::ProductSummary;

/// A favorited product. Unique per (user, product).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteEntry {
    pub id: FavoriteId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "products")]
    pub product: Option<ProductSummary>,
}

impl FavoriteEntry {
    pub const SELECT: &'static str = "*, products(id, name, price, product_images(*))";
}
