//! Client-side routes.

use std::fmt;

use kundura_core::ProductId;

/// Back-office sections under `/admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminRoute {
    Dashboard,
    Products,
    Brands,
    Sliders,
    Users,
    Reviews,
    Notifications,
    Settings,
}

impl AdminRoute {
    const ALL: [Self; 8] = [
        Self::Dashboard,
        Self::Products,
        Self::Brands,
        Self::Sliders,
        Self::Users,
        Self::Reviews,
        Self::Notifications,
        Self::Settings,
    ];

    #[must_use]
    pub const fn segment(self) -> &'static str {
        match self {
            Self::Dashboard => "",
            Self::Products => "products",
            Self::Brands => "brands",
            Self::Sliders => "sliders",
            Self::Users => "users",
            Self::Reviews => "reviews",
            Self::Notifications => "notifications",
            Self::Settings => "settings",
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|route| route.segment() == segment)
    }
}

/// A page of the storefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Products,
    Product(ProductId),
    Auth,
    Cart,
    Favorites,
    Notifications,
    Profile,
    Contact,
    Faq,
    Admin(AdminRoute),
    NotFound,
}

impl Route {
    /// Resolve a path. Query strings, fragments and trailing slashes are
    /// ignored; anything unknown is [`Route::NotFound`].
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let path = path
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/');
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            [] => Self::Home,
            ["products"] => Self::Products,
            ["product", id] => id.parse().map_or(Self::NotFound, Self::Product),
            ["auth"] => Self::Auth,
            ["cart"] => Self::Cart,
            ["favorites"] => Self::Favorites,
            ["notifications"] => Self::Notifications,
            ["profile"] => Self::Profile,
            ["contact"] => Self::Contact,
            ["faq"] => Self::Faq,
            ["admin"] => Self::Admin(AdminRoute::Dashboard),
            ["admin", section] => {
                AdminRoute::from_segment(section).map_or(Self::NotFound, Self::Admin)
            }
            _ => Self::NotFound,
        }
    }

    /// Canonical path; `parse(route.path()) == route` for every route but
    /// [`Route::NotFound`].
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Home => "/".to_string(),
            Self::Products => "/products".to_string(),
            Self::Product(id) => format!("/product/{id}"),
            Self::Auth => "/auth".to_string(),
            Self::Cart => "/cart".to_string(),
            Self::Favorites => "/favorites".to_string(),
            Self::Notifications => "/notifications".to_string(),
            Self::Profile => "/profile".to_string(),
            Self::Contact => "/contact".to_string(),
            Self::Faq => "/faq".to_string(),
            Self::Admin(AdminRoute::Dashboard) => "/admin".to_string(),
            Self::Admin(section) => format!("/admin/{}", section.segment()),
            Self::NotFound => "/404".to_string(),
        }
    }

    /// Pages that need someone signed in.
    #[must_use]
    pub const fn requires_session(&self) -> bool {
        matches!(
            self,
            Self::Cart | Self::Favorites | Self::Notifications | Self::Profile | Self::Admin(_)
        )
    }

    /// Pages that also need the admin role.
    #[must_use]
    pub const fn requires_admin(&self) -> bool {
        matches!(self, Self::Admin(_))
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_paths() {
        assert_eq!(Route::parse("/"), Route::Home);
        assert_eq!(Route::parse(""), Route::Home);
        assert_eq!(Route::parse("/cart/"), Route::Cart);
        assert_eq!(Route::parse("/faq?ref=footer"), Route::Faq);
        assert_eq!(Route::parse("/admin"), Route::Admin(AdminRoute::Dashboard));
        assert_eq!(Route::parse("/admin/reviews"), Route::Admin(AdminRoute::Reviews));
    }

    #[test]
    fn test_product_route_needs_valid_id() {
        let id = ProductId::random();
        assert_eq!(Route::parse(&format!("/product/{id}")), Route::Product(id));
        assert_eq!(Route::parse("/product/shoe-1"), Route::NotFound);
        assert_eq!(Route::parse("/product"), Route::NotFound);
    }

    #[test]
    fn test_unknown_paths() {
        assert_eq!(Route::parse("/checkout"), Route::NotFound);
        assert_eq!(Route::parse("/admin/orders"), Route::NotFound);
        assert_eq!(Route::parse("/cart/extra"), Route::NotFound);
    }

    #[test]
    fn test_path_round_trips() {
        let mut routes = vec![
            Route::Home,
            Route::Products,
            Route::Product(ProductId::random()),
            Route::Auth,
            Route::Cart,
            Route::Favorites,
            Route::Notifications,
            Route::Profile,
            Route::Contact,
            Route::Faq,
        ];
        routes.extend(AdminRoute::ALL.map(Route::Admin));
        for route in routes {
            assert_eq!(Route::parse(&route.path()), route, "{route}");
        }
    }

    #[test]
    fn test_guards() {
        assert!(!Route::Products.requires_session());
        assert!(Route::Cart.requires_session());
        assert!(Route::Admin(AdminRoute::Users).requires_admin());
        assert!(!Route::Profile.requires_admin());
    }
}
