//! Follow a cart live.

use tracing::{info, warn};

use kundura_storefront::cart::CartController;
use kundura_storefront::models::CartLine;
use kundura_storefront::sync::CollectionState;

use super::{Account, CommandError};

/// Print the signed-in user's cart, then every change to it, until Ctrl-C.
///
/// # Errors
///
/// Returns `CommandError` if sign-in fails.
pub async fn watch(account: &Account) -> Result<(), CommandError> {
    let session = account.session().await?;
    let user = session.require_user()?;
    info!(user_id = %user.id, "Watching cart");

    let cart = CartController::new(&session);
    let state = cart.collection().ready().await;
    print_cart(&state, &cart);

    let mut updates = cart.collection().watch();
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    warn!("Cart sync stopped");
                    break;
                }
                let state = updates.borrow_and_update().clone();
                if state.is_settled() {
                    print_cart(&state, &cart);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn print_cart(state: &CollectionState<CartLine>, cart: &CartController) {
    if let Some(error) = &state.error {
        warn!(error = %error, "Cart could not be loaded");
        return;
    }
    info!(
        lines = state.items.len(),
        items = cart.item_count(),
        total = %cart.total(),
        "Cart"
    );
    for line in &state.items {
        let name = line
            .product
            .as_ref()
            .map_or("(removed product)", |product| product.name.as_str());
        info!("  {name} / {} x{} = {}", line.size, line.quantity, line.line_total());
    }
}
