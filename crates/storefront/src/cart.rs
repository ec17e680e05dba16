//! Shopping cart controller.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use kundura_core::{CartLineId, Price, ProductId, Quantity};

use crate::backend::{
    AuthUser, Backend, BackendError, Conflict, Filter, Query, decode_first, decode_rows,
};
use crate::error::{AppError, Result, add_breadcrumb};
use crate::models::CartLine;
use crate::session::SessionContext;
use crate::sync::{CollectionSource, RefreshPolicy, SyncedCollection};
use crate::toast::Toast;

const TABLE: &str = "cart_items";

/// Tries at the compare-and-set increment before giving up.
const INCREMENT_ATTEMPTS: usize = 5;

/// Reads the signed-in user's cart lines, newest first, with their products.
#[derive(Debug, Default, Clone, Copy)]
pub struct CartSource;

#[async_trait]
impl CollectionSource for CartSource {
    type Item = CartLine;

    fn table(&self) -> &'static str {
        TABLE
    }

    fn item_id(&self, line: &CartLine) -> String {
        line.id.to_string()
    }

    async fn fetch_all(
        &self,
        backend: &dyn Backend,
        user: &AuthUser,
    ) -> std::result::Result<Vec<CartLine>, BackendError> {
        let query = Query::table(TABLE)
            .select(CartLine::SELECT)
            .eq("user_id", user.id)
            .order_desc("created_at");
        decode_rows(backend.select(&query).await?)
    }

    async fn fetch_one(
        &self,
        backend: &dyn Backend,
        user: &AuthUser,
        id: &str,
    ) -> std::result::Result<Option<CartLine>, BackendError> {
        let query = Query::table(TABLE)
            .select(CartLine::SELECT)
            .eq("id", id)
            .eq("user_id", user.id);
        decode_first(backend.select(&query).await?)
    }

    fn sort(&self, lines: &mut [CartLine]) {
        lines.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }
}

#[derive(Deserialize)]
struct ExistingLine {
    id: CartLineId,
    quantity: Quantity,
}

/// The signed-in user's cart.
///
/// The line list is kept current by a [`SyncedCollection`]; mutations go
/// straight to the store and come back through the change feed.
#[derive(Debug)]
pub struct CartController {
    session: SessionContext,
    lines: SyncedCollection<CartSource>,
}

impl CartController {
    #[must_use]
    pub fn new(session: &SessionContext) -> Self {
        Self::with_policy(session, RefreshPolicy::default())
    }

    #[must_use]
    pub fn with_policy(session: &SessionContext, policy: RefreshPolicy) -> Self {
        Self {
            session: session.clone(),
            lines: SyncedCollection::start(session, CartSource, policy),
        }
    }

    #[must_use]
    pub const fn collection(&self) -> &SyncedCollection<CartSource> {
        &self.lines
    }

    #[must_use]
    pub fn items(&self) -> Vec<CartLine> {
        self.lines.items()
    }

    /// Sum of unit price times quantity over every line.
    #[must_use]
    pub fn total(&self) -> Price {
        self.lines
            .with_items(|lines| lines.iter().map(CartLine::line_total).sum())
    }

    /// Number of items, counting quantities.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.lines
            .with_items(|lines| {
                lines
                    .iter()
                    .fold(0, |count: u32, line| count.saturating_add(line.quantity.get()))
            })
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.lines.with_items(<[CartLine]>::len)
    }

    pub async fn refresh(&self) {
        self.lines.refresh().await;
    }

    /// Add `quantity` of a product in `size`. An existing line for the same
    /// product and size has its quantity increased instead.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Unauthenticated`] without writing when nobody is
    /// signed in, or [`AppError::Backend`] when the store rejects the write.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add_to_cart(
        &self,
        product_id: ProductId,
        size: &str,
        quantity: Quantity,
    ) -> Result<()> {
        const ACTION: &str = "add to cart";
        let user = self.session.require_user_for(ACTION)?;

        match self.upsert_line(&user, product_id, size, quantity).await {
            Ok(()) => {
                let product = product_id.to_string();
                add_breadcrumb(
                    "cart",
                    "Added to cart",
                    Some(&[("product_id", product.as_str()), ("size", size)]),
                );
                self.session.toast(Toast::success("Added to cart"));
                Ok(())
            }
            Err(e) => self.session.fail(ACTION, e),
        }
    }

    async fn upsert_line(
        &self,
        user: &AuthUser,
        product_id: ProductId,
        size: &str,
        quantity: Quantity,
    ) -> Result<()> {
        let backend = self.session.backend();
        let row = json!({
            "user_id": user.id,
            "product_id": product_id,
            "size": size,
            "quantity": quantity.get(),
        });
        let inserted = backend
            .insert(
                TABLE,
                vec![row],
                Conflict::ignore(&["user_id", "product_id", "size"]),
            )
            .await?;
        if !inserted.is_empty() {
            info!(quantity = quantity.get(), "Cart line created");
            return Ok(());
        }

        // The line already exists; add to it. The update only lands if the
        // quantity is still the one we read, so racing adds are retried
        // instead of overwriting each other.
        for _ in 0..INCREMENT_ATTEMPTS {
            let existing = backend
                .select(
                    &Query::table(TABLE)
                        .select("id, quantity")
                        .eq("user_id", user.id)
                        .eq("product_id", product_id)
                        .eq("size", size)
                        .limit(1),
                )
                .await?;
            let existing: ExistingLine = decode_first(existing)?
                .ok_or_else(|| BackendError::NotFound("cart line vanished".to_string()))?;
            let next = existing.quantity.checked_add(quantity)?;
            let updated = backend
                .update(
                    TABLE,
                    json!({ "quantity": next.get() }),
                    &[
                        Filter::eq("id", existing.id),
                        Filter::eq("user_id", user.id),
                        Filter::eq("quantity", existing.quantity),
                    ],
                )
                .await?;
            if !updated.is_empty() {
                info!(line_id = %existing.id, quantity = next.get(), "Cart line incremented");
                return Ok(());
            }
            debug!(line_id = %existing.id, "Cart line changed underneath, retrying");
        }
        Err(BackendError::Conflict("cart line kept changing".to_string()).into())
    }

    /// Set a line's quantity.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the line is not in this user's cart.
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub async fn update_quantity(&self, line_id: CartLineId, quantity: Quantity) -> Result<()> {
        const ACTION: &str = "update quantity";
        let user = self.session.require_user_for(ACTION)?;

        let updated = self
            .session
            .backend()
            .update(
                TABLE,
                json!({ "quantity": quantity.get() }),
                &[Filter::eq("id", line_id), Filter::eq("user_id", user.id)],
            )
            .await;
        match updated {
            Ok(rows) if rows.is_empty() => {
                self.session.fail(ACTION, AppError::NotFound("Cart item".to_string()))
            }
            Ok(_) => Ok(()),
            Err(e) => self.session.fail(ACTION, e),
        }
    }

    /// Delete a line from the cart.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] if the delete fails.
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub async fn remove_item(&self, line_id: CartLineId) -> Result<()> {
        const ACTION: &str = "remove item";
        let user = self.session.require_user_for(ACTION)?;

        let deleted = self
            .session
            .backend()
            .delete(
                TABLE,
                &[Filter::eq("id", line_id), Filter::eq("user_id", user.id)],
            )
            .await;
        match deleted {
            Ok(_) => {
                add_breadcrumb("cart", "Removed from cart", None);
                self.session.toast(Toast::success("Removed from cart"));
                Ok(())
            }
            Err(e) => self.session.fail(ACTION, e),
        }
    }
}
