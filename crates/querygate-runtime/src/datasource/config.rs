//! Data Source Configuration
//!
//! Sources are configured as a map keyed by name; the `type` tag selects the
//! backend.

use super::columnar::{ColumnarConfig, ColumnarSource};
use super::warehouse::{WarehouseConfig, WarehouseSource};
use super::DataSource;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for one named data source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Backend type and its settings
    #[serde(flatten)]
    pub source_type: DataSourceType,

    /// Wrap the source with the result cache
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

/// Backend type enumeration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DataSourceType {
    #[serde(rename = "columnar")]
    Columnar(ColumnarConfig),

    #[serde(rename = "warehouse")]
    Warehouse(WarehouseConfig),
}

impl DataSourceConfig {
    /// Construct the backend. Pooled backends open their minimum connections here.
    pub async fn build(&self) -> Result<Arc<dyn DataSource>> {
        let source: Arc<dyn DataSource> = match &self.source_type {
            DataSourceType::Columnar(config) => {
                Arc::new(ColumnarSource::new(config.clone()).await?)
            }
            DataSourceType::Warehouse(config) => Arc::new(WarehouseSource::new(config.clone())?),
        };
        Ok(source)
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_columnar_config() {
        let yaml = r#"
type: columnar
base_url: "http://dremio:9047"
token: "pat"
pool:
  max_connections: 8
"#;

        let config: DataSourceConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.cache_enabled);

        match config.source_type {
            DataSourceType::Columnar(columnar) => {
                assert_eq!(columnar.base_url, "http://dremio:9047");
                assert_eq!(columnar.pool.max_connections, 8);
                assert_eq!(columnar.pool.min_connections, 2);
            }
            _ => panic!("Expected Columnar type"),
        }
    }

    #[test]
    fn test_parse_warehouse_config() {
        let yaml = r#"
type: warehouse
project_id: acme-analytics
dataset_id: events
access_token: ya29.token
cache_enabled: false
"#;

        let config: DataSourceConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(!config.cache_enabled);

        match config.source_type {
            DataSourceType::Warehouse(warehouse) => {
                assert_eq!(warehouse.project_id, "acme-analytics");
                assert_eq!(warehouse.dataset_id.as_deref(), Some("events"));
                assert_eq!(warehouse.base_url, "https://bigquery.googleapis.com");
            }
            _ => panic!("Expected Warehouse type"),
        }
    }

    #[test]
    fn test_parse_named_map() {
        let yaml = r#"
lake:
  type: columnar
  base_url: "http://dremio:9047"
  token: "pat"
dwh:
  type: warehouse
  project_id: p
  access_token: t
"#;

        let sources: HashMap<String, DataSourceConfig> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(sources.len(), 2);
        assert!(matches!(sources["lake"].source_type, DataSourceType::Columnar(_)));
        assert!(matches!(sources["dwh"].source_type, DataSourceType::Warehouse(_)));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let yaml = "type: graph\nurl: x\n";
        assert!(serde_yaml::from_str::<DataSourceConfig>(yaml).is_err());
    }

    #[tokio::test]
    async fn test_build_rejects_missing_credentials() {
        let yaml = "type: warehouse\nproject_id: p\n";
        let config: DataSourceConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.build().await.is_err());
    }
}
