use serde::{Deserialize, Serialize};

/// One extracted product. Field order is the CSV column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    #[serde(rename = "Product Name")]
    pub name: Option<String>,
    #[serde(rename = "Original Data Column 1 (Breadcrumb)")]
    pub breadcrumb: Option<String>,
    #[serde(rename = "Original Data Column 2 (Ausführung)")]
    pub execution: Option<String>,
    #[serde(rename = "Supplier Article Number")]
    pub supplier_sku: Option<String>,
    #[serde(rename = "EAN/GTIN")]
    pub gtin: Option<String>,
    #[serde(rename = "Article Number")]
    pub article_number: Option<String>,
    #[serde(rename = "Product Description")]
    pub description: Option<String>,
    #[serde(rename = "Supplier")]
    pub supplier: Option<String>,
    #[serde(rename = "Supplier-URL")]
    pub source_url: Option<String>,
    #[serde(rename = "Product Image URL")]
    pub image_url: Option<String>,
    #[serde(rename = "Manufacturer")]
    pub manufacturer: Option<String>,
    #[serde(rename = "Original Data Column 3 (Add. Description)")]
    pub additional_description: Option<String>,
}

impl ProductRecord {
    pub const COLUMNS: [&'static str; 12] = [
        "Product Name",
        "Original Data Column 1 (Breadcrumb)",
        "Original Data Column 2 (Ausführung)",
        "Supplier Article Number",
        "EAN/GTIN",
        "Article Number",
        "Product Description",
        "Supplier",
        "Supplier-URL",
        "Product Image URL",
        "Manufacturer",
        "Original Data Column 3 (Add. Description)",
    ];

    /// Column holding the work item identity.
    pub const URL_COLUMN: usize = 8;

    /// Cells in column order; absent fields become empty cells.
    pub fn to_row(&self) -> [&str; 12] {
        [
            &self.name,
            &self.breadcrumb,
            &self.execution,
            &self.supplier_sku,
            &self.gtin,
            &self.article_number,
            &self.description,
            &self.supplier,
            &self.source_url,
            &self.image_url,
            &self.manufacturer,
            &self.additional_description,
        ]
        .map(|v| v.as_deref().unwrap_or(""))
    }

    pub fn url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }
}
