//! Typed wrappers for the maintenance REST resources

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::SessionManager;
use super::error::ClientError;
use super::request::{FormPayload, RequestOptions};

const ASSETS: &str = "/assets";
const WORK_ORDERS: &str = "/work-orders";
const MASTER_DATA: &str = "/master-data";

/// Maintained equipment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, alias = "assetTag")]
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrder {
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, flatten)]
    pub extra: Map<String, JsonValue>,
}

/// One entry of a master-data lookup list (locations, categories, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupEntry {
    #[serde(default, alias = "_id", alias = "code")]
    pub id: String,
    #[serde(default, alias = "name", alias = "description")]
    pub label: String,
    #[serde(default, flatten)]
    pub extra: Map<String, JsonValue>,
}

fn item_path(collection: &str, id: &str) -> String {
    format!("{collection}/{id}")
}

impl SessionManager {
    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ClientError> {
        self.request(path, options).await?.unwrap()
    }

    /// List all assets
    ///
    /// # Errors
    ///
    /// See [`SessionManager::request`]
    pub async fn list_assets(&self) -> Result<Vec<Asset>, ClientError> {
        self.fetch(ASSETS, RequestOptions::get()).await
    }

    /// # Errors
    ///
    /// See [`SessionManager::request`]
    pub async fn get_asset(&self, id: &str) -> Result<Asset, ClientError> {
        self.fetch(&item_path(ASSETS, id), RequestOptions::get())
            .await
    }

    /// Create an asset and return the stored record
    ///
    /// # Errors
    ///
    /// See [`SessionManager::request`]
    pub async fn create_asset(&self, asset: &Asset) -> Result<Asset, ClientError> {
        self.fetch(ASSETS, RequestOptions::post_json(asset)?).await
    }

    /// # Errors
    ///
    /// See [`SessionManager::request`]
    pub async fn update_asset(&self, id: &str, asset: &Asset) -> Result<Asset, ClientError> {
        self.fetch(&item_path(ASSETS, id), RequestOptions::put_json(asset)?)
            .await
    }

    /// # Errors
    ///
    /// See [`SessionManager::request`]
    pub async fn delete_asset(&self, id: &str) -> Result<(), ClientError> {
        self.request(&item_path(ASSETS, id), RequestOptions::delete())
            .await
            .map(drop)
    }

    /// List all work orders
    ///
    /// # Errors
    ///
    /// See [`SessionManager::request`]
    pub async fn list_work_orders(&self) -> Result<Vec<WorkOrder>, ClientError> {
        self.fetch(WORK_ORDERS, RequestOptions::get()).await
    }

    /// # Errors
    ///
    /// See [`SessionManager::request`]
    pub async fn get_work_order(&self, id: &str) -> Result<WorkOrder, ClientError> {
        self.fetch(&item_path(WORK_ORDERS, id), RequestOptions::get())
            .await
    }

    /// # Errors
    ///
    /// See [`SessionManager::request`]
    pub async fn create_work_order(&self, order: &WorkOrder) -> Result<WorkOrder, ClientError> {
        self.fetch(WORK_ORDERS, RequestOptions::post_json(order)?)
            .await
    }

    /// # Errors
    ///
    /// See [`SessionManager::request`]
    pub async fn update_work_order(
        &self,
        id: &str,
        order: &WorkOrder,
    ) -> Result<WorkOrder, ClientError> {
        self.fetch(&item_path(WORK_ORDERS, id), RequestOptions::put_json(order)?)
            .await
    }

    /// # Errors
    ///
    /// See [`SessionManager::request`]
    pub async fn delete_work_order(&self, id: &str) -> Result<(), ClientError> {
        self.request(&item_path(WORK_ORDERS, id), RequestOptions::delete())
            .await
            .map(drop)
    }

    /// Attach a file to a work order as `multipart/form-data`.
    ///
    /// Returns whatever the server answers with, unwrapped.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::request`]
    pub async fn upload_work_order_attachment(
        &self,
        id: &str,
        file_name: &str,
        mime: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<JsonValue, ClientError> {
        let form = FormPayload::new().file("file", file_name, mime, bytes);
        let path = format!("{}/attachments", item_path(WORK_ORDERS, id));
        self.fetch(&path, RequestOptions::multipart(form)).await
    }

    /// Master-data list of the given kind, e.g. `locations`
    ///
    /// # Errors
    ///
    /// See [`SessionManager::request`]
    pub async fn lookup(&self, kind: &str) -> Result<Vec<LookupEntry>, ClientError> {
        self.fetch(&format!("{MASTER_DATA}/{kind}"), RequestOptions::get())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_asset_accepts_backend_aliases() {
        let asset: Asset = serde_json::from_value(json!({
            "_id": "a1",
            "assetTag": "PMP-001",
            "name": "Feed pump",
            "criticality": "high"
        }))
        .unwrap();
        assert_eq!(asset.id.as_deref(), Some("a1"));
        assert_eq!(asset.tag, "PMP-001");
        assert_eq!(asset.extra.get("criticality"), Some(&json!("high")));
    }

    #[test]
    fn test_new_work_order_omits_id() {
        let order = WorkOrder {
            title: "Replace seal".to_string(),
            asset_id: Some("a1".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&order).unwrap();
        assert_eq!(value, json!({"title": "Replace seal", "assetId": "a1"}));
    }

    #[test]
    fn test_item_path() {
        assert_eq!(item_path(ASSETS, "42"), "/assets/42");
    }
}
