use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Product data the try-on needs from the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ProductRecord {
    pub product_id: String,
    /// Model locator (path, `file://` or `http(s)://` URL).
    pub model_asset_ref: String,
    pub display_name: String,
    #[serde(default)]
    pub brand: Option<String>,
}

/// Read-only product catalog.
pub trait Catalog: Send + Sync {
    fn product(&self, product_id: &str) -> Result<ProductRecord>;
}

/// In-memory catalog, optionally loaded from a JSON array of records.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    products: HashMap<String, ProductRecord>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, record: ProductRecord) -> Self {
        self.insert(record);
        self
    }

    pub fn insert(&mut self, record: ProductRecord) {
        self.products.insert(record.product_id.clone(), record);
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read catalog {}", path.display()))?;
        let records: Vec<ProductRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("parse catalog {}", path.display()))?;
        let mut catalog = Self::new();
        for record in records {
            catalog.insert(record);
        }
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

impl Catalog for StaticCatalog {
    fn product(&self, product_id: &str) -> Result<ProductRecord> {
        self.products
            .get(product_id)
            .cloned()
            .ok_or_else(|| anyhow!("product '{}' not in catalog", product_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_records_from_json() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            file,
            r#"[{{"product_id": "w-1", "model_asset_ref": "models/w1.glb", "display_name": "Field Watch"}},
               {{"product_id": "w-2", "model_asset_ref": "models/w2.gltf", "display_name": "Diver", "brand": "Acme"}}]"#
        )?;
        let catalog = StaticCatalog::from_json_file(file.path())?;
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.product("w-2")?.brand.as_deref(), Some("Acme"));
        assert!(catalog.product("w-3").is_err());
        Ok(())
    }
}
