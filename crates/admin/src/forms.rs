//! Back-office forms.
//!
//! Forms hold exactly what the operator typed. `validate` turns them into
//! the row written to the platform, or says which field is wrong. Blank
//! optional fields are written as `null`.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;

use kundura_core::BrandId;
use kundura_storefront::models::{Brand, Product, Slide};

use crate::error::{AdminError, Result};

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AdminError::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_price(value: &str) -> Result<Decimal> {
    let value = required("Price", value)?;
    let price = Decimal::from_str(&value.replace(',', "."))
        .map_err(|_| AdminError::Validation(format!("Price must be a number, got '{value}'")))?;
    if price.is_sign_negative() {
        return Err(AdminError::Validation("Price cannot be negative".to_string()));
    }
    Ok(price.round_dp(2))
}

// =============================================================================
// Products
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductForm {
    pub name: String,
    pub description: String,
    pub price: String,
    /// Empty for "no brand".
    pub brand_id: String,
    pub is_featured: bool,
}

/// Validated product row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductDraft {
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub brand_id: Option<BrandId>,
    pub is_featured: bool,
}

impl ProductForm {
    /// Pre-filled form for editing.
    #[must_use]
    pub fn from_product(product: &Product) -> Self {
        Self {
            name: product.name.clone(),
            description: product.description.clone().unwrap_or_default(),
            price: product.price.to_string(),
            brand_id: product.brand_id.map(|id| id.to_string()).unwrap_or_default(),
            is_featured: product.is_featured,
        }
    }

    /// # Errors
    ///
    /// Returns [`AdminError::Validation`] for a missing name, a price that
    /// is not a non-negative number, or a malformed brand id.
    pub fn validate(&self) -> Result<ProductDraft> {
        let brand_id = optional(&self.brand_id)
            .map(|id| {
                id.parse::<BrandId>()
                    .map_err(|_| AdminError::Validation("Unknown brand".to_string()))
            })
            .transpose()?;
        Ok(ProductDraft {
            name: required("Name", &self.name)?,
            description: optional(&self.description),
            price: parse_price(&self.price)?,
            brand_id,
            is_featured: self.is_featured,
        })
    }
}

// =============================================================================
// Brands
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrandForm {
    pub name: String,
    /// Usually filled in from an upload.
    pub logo_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrandDraft {
    pub name: String,
    pub logo_url: Option<String>,
}

impl BrandForm {
    #[must_use]
    pub fn from_brand(brand: &Brand) -> Self {
        Self {
            name: brand.name.clone(),
            logo_url: brand.logo_url.clone().unwrap_or_default(),
        }
    }

    /// # Errors
    ///
    /// Returns [`AdminError::Validation`] for a missing name.
    pub fn validate(&self) -> Result<BrandDraft> {
        Ok(BrandDraft {
            name: required("Name", &self.name)?,
            logo_url: optional(&self.logo_url),
        })
    }
}

// =============================================================================
// Slider
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliderForm {
    pub title: String,
    pub description: String,
    pub image_url: String,
    pub button_text: String,
    pub button_link: String,
    pub display_order: String,
    pub is_active: bool,
}

impl Default for SliderForm {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            image_url: String::new(),
            button_text: String::new(),
            button_link: String::new(),
            display_order: "0".to_string(),
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SliderDraft {
    pub title: String,
    pub description: Option<String>,
    pub image_url: String,
    pub button_text: Option<String>,
    pub button_link: Option<String>,
    pub display_order: i32,
    pub is_active: bool,
}

impl SliderForm {
    #[must_use]
    pub fn from_slide(slide: &Slide) -> Self {
        Self {
            title: slide.title.clone(),
            description: slide.description.clone().unwrap_or_default(),
            image_url: slide.image_url.clone(),
            button_text: slide.button_text.clone().unwrap_or_default(),
            button_link: slide.button_link.clone().unwrap_or_default(),
            display_order: slide.display_order.to_string(),
            is_active: slide.is_active,
        }
    }

    /// # Errors
    ///
    /// Returns [`AdminError::Validation`] for a missing title or image, or a
    /// display order that is not a whole number.
    pub fn validate(&self) -> Result<SliderDraft> {
        let display_order = match optional(&self.display_order) {
            None => 0,
            Some(order) => order.parse().map_err(|_| {
                AdminError::Validation(format!(
                    "Display order must be a whole number, got '{order}'"
                ))
            })?,
        };
        Ok(SliderDraft {
            title: required("Title", &self.title)?,
            description: optional(&self.description),
            image_url: required("Image", &self.image_url)?,
            button_text: optional(&self.button_text),
            button_link: optional(&self.button_link),
            display_order,
            is_active: self.is_active,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn product_form(price: &str) -> ProductForm {
        ProductForm {
            name: "  Chelsea Boot ".to_string(),
            price: price.to_string(),
            ..ProductForm::default()
        }
    }

    #[test]
    fn test_product_form_trims_and_nulls_blanks() {
        let draft = product_form("1299.9").validate().unwrap();
        assert_eq!(draft.name, "Chelsea Boot");
        assert_eq!(draft.description, None);
        assert_eq!(draft.brand_id, None);
        assert_eq!(draft.price, Decimal::new(129_990, 2));
    }

    #[test]
    fn test_product_price_rules() {
        assert_eq!(product_form("49,5").validate().unwrap().price, Decimal::new(4950, 2));
        assert_eq!(product_form("0").validate().unwrap().price, Decimal::ZERO);
        for bad in ["", "abc", "-1"] {
            assert!(
                matches!(product_form(bad).validate(), Err(AdminError::Validation(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_product_brand_must_be_an_id() {
        let mut form = product_form("10");
        form.brand_id = "nike".to_string();
        assert!(form.validate().is_err());

        let brand = BrandId::random();
        form.brand_id = brand.to_string();
        assert_eq!(form.validate().unwrap().brand_id, Some(brand));
    }

    #[test]
    fn test_draft_serializes_nulls() {
        let row = serde_json::to_value(product_form("10").validate().unwrap()).unwrap();
        assert!(row["description"].is_null());
        assert!(row["brand_id"].is_null());
        assert_eq!(row["is_featured"], false);
    }

    #[test]
    fn test_brand_form() {
        let form = BrandForm {
            name: " ".to_string(),
            logo_url: String::new(),
        };
        assert!(form.validate().is_err());

        let form = BrandForm {
            name: "Kuzey".to_string(),
            logo_url: "https://cdn/logo.png".to_string(),
        };
        let draft = form.validate().unwrap();
        assert_eq!(draft.logo_url.as_deref(), Some("https://cdn/logo.png"));
    }

    #[test]
    fn test_slider_form() {
        let mut form = SliderForm {
            title: "Summer".to_string(),
            image_url: "https://cdn/s.jpg".to_string(),
            ..SliderForm::default()
        };
        let draft = form.validate().unwrap();
        assert_eq!(draft.display_order, 0);
        assert!(draft.is_active);
        assert_eq!(draft.button_link, None);

        form.display_order = "2.5".to_string();
        assert!(form.validate().is_err());
        form.display_order = " 3 ".to_string();
        assert_eq!(form.validate().unwrap().display_order, 3);

        form.image_url = String::new();
        assert!(form.validate().is_err());
    }
}
