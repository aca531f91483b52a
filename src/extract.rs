use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::ShapeError;
use crate::record::ProductRecord;

/// Turns one detail page into a record. Pure: no I/O, no state.
pub trait Extractor {
    fn extract(&self, url: &str, html: &str) -> Result<ProductRecord, ShapeError>;
}

static PARENS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[()]").unwrap());
static DASHES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-{2,}").unwrap());

struct Selectors {
    container: Selector,
    name: Selector,
    breadcrumb_links: Selector,
    variant_info: Selector,
    variant_label: Selector,
    sku: Selector,
    gtin: Selector,
    description: Selector,
    gallery_image: Selector,
    manufacturer_cells: Selector,
    benefits: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| {
    let s = |css: &str| Selector::parse(css).unwrap();
    Selectors {
        container: s("div.LYSContainer_padding__21b81"),
        name: s("h1"),
        breadcrumb_links: s("div.CategoryBreadcrumbs_sectionWrap__b5732 a"),
        variant_info: s("div.ProductInformation_variantInfo__5cb1d"),
        variant_label: s(
            "div.ant-typography.ant-typography-secondary.ProductCard_paragraph__03d53",
        ),
        sku: s(r#"div[data-testid="product-information-sku"]"#),
        gtin: s(r#"div[data-testid="product-information-gtin"]"#),
        description: s("div.ProductDescription_description__4e5b7"),
        gallery_image: s("div.image-gallery-slide img"),
        manufacturer_cells: s(r#"tr[data-row-key="33"] td"#),
        benefits: s("div.ProductBenefits_productBenefits__1b77a li"),
    }
});

/// Selectors for the igefa storefront product page.
pub struct IgefaExtractor {
    supplier: String,
}

impl IgefaExtractor {
    pub fn new(supplier: impl Into<String>) -> Self {
        IgefaExtractor {
            supplier: supplier.into(),
        }
    }
}

impl Extractor for IgefaExtractor {
    fn extract(&self, url: &str, html: &str) -> Result<ProductRecord, ShapeError> {
        let sel = &*SELECTORS;
        let doc = Html::parse_document(html);
        let product = doc.select(&sel.container).next().ok_or(ShapeError::NotFound)?;

        let name = product
            .select(&sel.name)
            .next()
            .map(|h| text(h).trim().to_string())
            .unwrap_or_else(|| "Unknown Product Name".to_string());

        let crumbs: Vec<String> = doc.select(&sel.breadcrumb_links).map(text).collect();
        let breadcrumb = (!crumbs.is_empty()).then(|| breadcrumb_path(&crumbs));

        let variant = doc.select(&sel.variant_info).next();
        let execution = variant
            .and_then(|v| v.select(&sel.variant_label).next())
            .and_then(|e| after_colon(&text(e)));
        let supplier_sku = variant
            .and_then(|v| v.select(&sel.sku).next())
            .and_then(|e| after_colon(&text(e)));
        let article_number = variant.and_then(|v| {
            text(v).split_whitespace().last().map(str::to_string)
        });

        let gtin = doc
            .select(&sel.gtin)
            .next()
            .and_then(|e| after_colon(&text(e)));

        let description = product
            .select(&sel.description)
            .next()
            .map(|d| text(d).trim().to_string())
            .filter(|d| !d.is_empty());

        let image_url = product
            .select(&sel.gallery_image)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(str::to_string);

        // Second cell of the manufacturer row in the attribute table.
        let manufacturer = product
            .select(&sel.manufacturer_cells)
            .nth(1)
            .map(|td| text(td).trim().to_string());

        let benefits: Vec<String> = doc.select(&sel.benefits).map(text).collect();
        let additional_description = Some(benefits.join(", ")).filter(|s| !s.is_empty());

        Ok(ProductRecord {
            name: Some(name),
            breadcrumb,
            execution,
            supplier_sku,
            gtin,
            article_number,
            description,
            supplier: Some(self.supplier.clone()),
            source_url: Some(url.to_string()),
            image_url,
            manufacturer,
            additional_description,
        })
    }
}

fn text(el: ElementRef<'_>) -> String {
    el.text().collect()
}

/// "Artikelnummer: 123" -> "123"
fn after_colon(s: &str) -> Option<String> {
    s.split_once(": ")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// ["Hygiene & Pflege", "Seifen (flüssig)"] -> "hygiene-&-pflege/seifen-flüssig"
fn breadcrumb_path(crumbs: &[String]) -> String {
    let joined = crumbs
        .iter()
        .map(|c| c.trim().to_lowercase().replace(' ', "-"))
        .collect::<Vec<_>>()
        .join("/");
    let joined = PARENS_RE.replace_all(&joined, "");
    DASHES_RE.replace_all(&joined, "-").into_owned()
}
