pub mod address_service;
pub mod admin_service;
pub mod auth_service;
pub mod cart_service;
pub mod category_service;
pub mod coupon_service;
pub mod dashboard_service;
pub mod order_service;
pub mod payment_service;
pub mod product_service;
pub mod review_service;
pub mod upload_service;

/// Lower-case, `-`-separated URL slug.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    for c in input.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("  Classic T-Shirt (Unisex) "), "classic-t-shirt-unisex");
        assert_eq!(slugify("A3 Poster!!"), "a3-poster");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn non_blank_drops_whitespace() {
        assert_eq!(non_blank(Some("  ".into())), None);
        assert_eq!(non_blank(Some(" hi ".into())), Some("hi".into()));
        assert_eq!(non_blank(None), None);
    }
}
