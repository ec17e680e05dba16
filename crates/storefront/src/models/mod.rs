//! Typed rows read from the hosted store.
//!
//! Each model knows the column selection it is read with, so a collection's
//! full fetch and its single-row refetch always decode the same shape.

mod cart;
mod catalog;
mod favorite;
mod notification;
mod profile;

pub use cart::CartLine;
pub use catalog::{
    Brand, BrandName, Product, ProductImage, ProductName, ProductSize, ProductSummary, Review,
    ReviewerName, Slide,
};
pub use favorite::FavoriteEntry;
pub use notification::Notification;
pub use profile::{Profile, ProfileUpdate};
