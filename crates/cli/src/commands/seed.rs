//! Seed the catalog from a YAML file.
//!
//! ```yaml
//! brands:
//!   - name: Kundura
//!     logo_url: https://cdn.example.com/kundura.png
//! products:
//!   - name: Loafer
//!     price: 1299.90
//!     brand: Kundura
//!     featured: true
//!     images: [https://cdn.example.com/loafer.jpg]
//!     stock: { "42": 5, "43": 2 }
//! slides:
//!   - title: Spring collection
//!     image_url: https://cdn.example.com/spring.jpg
//!     display_order: 1
//! ```
//!
//! The whole file is validated before anything is written.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use kundura_admin::AdminContext;
use kundura_admin::brands::BrandsAdmin;
use kundura_admin::forms::{BrandForm, ProductForm, SliderForm};
use kundura_admin::products::ProductsAdmin;
use kundura_admin::sliders::SlidersAdmin;
use kundura_core::BrandId;

use super::{Account, CommandError};

/// A catalog file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    #[serde(default)]
    pub brands: Vec<BrandEntry>,
    #[serde(default)]
    pub products: Vec<ProductEntry>,
    #[serde(default)]
    pub slides: Vec<SlideEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrandEntry {
    pub name: String,
    #[serde(default)]
    pub logo_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Amount,
    /// Brand name from the same file.
    pub brand: Option<String>,
    #[serde(default)]
    pub featured: bool,
    /// The first one becomes the primary image.
    #[serde(default)]
    pub images: Vec<String>,
    /// Stock per size.
    #[serde(default)]
    pub stock: BTreeMap<String, u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlideEntry {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub image_url: String,
    #[serde(default)]
    pub button_text: String,
    #[serde(default)]
    pub button_link: String,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

const fn active_by_default() -> bool {
    true
}

/// A price written either as a YAML number or a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(serde_yaml::Number),
    Text(String),
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl ProductEntry {
    fn form(&self, brand_id: Option<BrandId>) -> ProductForm {
        ProductForm {
            name: self.name.clone(),
            description: self.description.clone(),
            price: self.price.to_string(),
            brand_id: brand_id.map(|id| id.to_string()).unwrap_or_default(),
            is_featured: self.featured,
        }
    }
}

impl BrandEntry {
    fn form(&self) -> BrandForm {
        BrandForm {
            name: self.name.clone(),
            logo_url: self.logo_url.clone(),
        }
    }
}

impl SlideEntry {
    fn form(&self) -> SliderForm {
        SliderForm {
            title: self.title.clone(),
            description: self.description.clone(),
            image_url: self.image_url.clone(),
            button_text: self.button_text.clone(),
            button_link: self.button_link.clone(),
            display_order: self.display_order.to_string(),
            is_active: self.active,
        }
    }
}

impl Catalog {
    /// # Errors
    ///
    /// Returns `CommandError::Catalog` if the YAML does not parse.
    pub fn parse(content: &str) -> Result<Self, CommandError> {
        serde_yaml::from_str(content).map_err(|e| CommandError::Catalog(e.to_string()))
    }

    /// Check every entry without writing anything.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::Catalog` naming the first bad entry.
    pub fn validate(&self) -> Result<(), CommandError> {
        let invalid = |what: &str, name: &str, reason: String| {
            CommandError::Catalog(format!("{what} '{name}': {reason}"))
        };

        let mut brand_names = HashSet::new();
        for brand in &self.brands {
            brand
                .form()
                .validate()
                .map_err(|e| invalid("brand", &brand.name, e.user_message()))?;
            if !brand_names.insert(brand.name.trim()) {
                return Err(invalid("brand", &brand.name, "listed twice".to_string()));
            }
        }
        for product in &self.products {
            product
                .form(None)
                .validate()
                .map_err(|e| invalid("product", &product.name, e.user_message()))?;
            if let Some(brand) = &product.brand {
                if !brand_names.contains(brand.trim()) {
                    return Err(invalid(
                        "product",
                        &product.name,
                        format!("unknown brand '{brand}'"),
                    ));
                }
            }
        }
        for slide in &self.slides {
            slide
                .form()
                .validate()
                .map_err(|e| invalid("slide", &slide.title, e.user_message()))?;
        }
        Ok(())
    }
}

/// What a seed run wrote.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub brands: usize,
    pub products: usize,
    pub images: usize,
    pub slides: usize,
}

/// Write a validated catalog through the admin controllers.
///
/// # Errors
///
/// Returns the first failed write; earlier writes stay.
pub async fn apply(admin: &AdminContext, catalog: &Catalog) -> Result<SeedReport, CommandError> {
    let mut report = SeedReport::default();

    let brands = BrandsAdmin::new(admin);
    let mut brand_ids = HashMap::new();
    for brand in &catalog.brands {
        let id = brands.create(&brand.form()).await?;
        brand_ids.insert(brand.name.trim().to_string(), id);
        report.brands += 1;
    }

    let products = ProductsAdmin::new(admin);
    for entry in &catalog.products {
        let brand_id = entry
            .brand
            .as_deref()
            .and_then(|name| brand_ids.get(name.trim()).copied());
        let id = products.create(&entry.form(brand_id)).await?;
        for (position, url) in entry.images.iter().enumerate() {
            products.add_product_image(id, url, position == 0).await?;
            report.images += 1;
        }
        for (size, stock) in &entry.stock {
            products.set_stock(id, size, *stock).await?;
        }
        report.products += 1;
    }

    let sliders = SlidersAdmin::new(admin);
    for slide in &catalog.slides {
        sliders.create(&slide.form()).await?;
        report.slides += 1;
    }

    Ok(report)
}

/// Seed from `file_path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, fails validation, or a write
/// fails.
pub async fn run(account: &Account, file_path: &str) -> Result<(), CommandError> {
    let path = Path::new(file_path);
    info!(path = %file_path, "Loading catalog from file");
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CommandError::Io {
            path: file_path.to_string(),
            source,
        })?;

    let catalog = Catalog::parse(&content)?;
    catalog.validate()?;
    info!(
        brands = catalog.brands.len(),
        products = catalog.products.len(),
        slides = catalog.slides.len(),
        "Catalog validated"
    );

    let admin = account.admin().await?;
    let report = apply(&admin, &catalog).await?;

    info!("Seeding complete!");
    info!("  Brands: {}", report.brands);
    info!("  Products: {}", report.products);
    info!("  Images: {}", report.images);
    info!("  Slides: {}", report.slides);
    Ok(())
}
