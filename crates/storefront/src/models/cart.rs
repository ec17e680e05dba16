use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kundura_core::{CartLineId, Price, ProductId, Quantity, UserId};

use super::ProductSummary;

/// One line of a user's cart. Unique per (user, product, size).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: CartLineId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub size: String,
    pub quantity: Quantity,
    pub created_at: DateTime<Utc>,
    /// The product, absent if it has been deleted since.
    #[serde(default, rename = "products")]
    pub product: Option<ProductSummary>,
}

impl CartLine {
    pub const SELECT: &'static str = "*, products(id, name, price, product_images(*))";

    /// Unit price times quantity; zero when the product is gone.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.product
            .as_ref()
            .map_or_else(Price::zero, |product| {
                product.unit_price().times(self.quantity.get())
            })
    }
}
