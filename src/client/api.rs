use std::collections::BTreeMap;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::settings::ClientSettings;
use super::{ClientError, ClientResult};
use crate::definitions::{Entity, Service, View};
use crate::interventions::AttributeKeyIdentifier;

const REGISTRY_PATH: &str = "/api/v1/registry";
const ONLINE_ATTRIBUTES_PATH: &str = "/api/v1/get-online-attributes";
const INTERVENTIONS_PATH: &str = "/api/v1/interventions";

/// Attribute values per entity identifier, as returned by online lookups.
pub type OnlineAttributes = BTreeMap<String, BTreeMap<String, Value>>;

/// Anything that can be applied to, published in or deleted from the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryObject {
    Entity(Entity),
    View(View),
    Service(Service),
}

impl RegistryObject {
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryObject::Entity(_) => "entity",
            RegistryObject::View(_) => "view",
            RegistryObject::Service(_) => "service",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RegistryObject::Entity(e) => &e.name,
            RegistryObject::View(v) => &v.name,
            RegistryObject::Service(s) => &s.name,
        }
    }

    /// Collection path under the registry root.
    fn collection(&self) -> &'static str {
        match self {
            RegistryObject::Entity(_) => "entities",
            RegistryObject::View(_) => "views",
            RegistryObject::Service(_) => "services",
        }
    }

    fn item_path(&self) -> String {
        match self {
            RegistryObject::View(v) => format!("views/{}/versions/{}", v.name, v.version),
            other => format!("{}/{}", other.collection(), other.name()),
        }
    }

    fn body(&self) -> ClientResult<Value> {
        let value = match self {
            RegistryObject::Entity(e) => serde_json::to_value(e)?,
            RegistryObject::View(v) => serde_json::to_value(v)?,
            RegistryObject::Service(s) => serde_json::to_value(s)?,
        };
        Ok(value)
    }

    /// Copy flagged as published. Entities carry no publication state.
    pub fn published(&self) -> Self {
        match self {
            RegistryObject::View(v) => RegistryObject::View(View {
                is_published: true,
                ..v.clone()
            }),
            RegistryObject::Service(s) => RegistryObject::Service(Service {
                is_published: true,
                ..s.clone()
            }),
            entity => entity.clone(),
        }
    }
}

impl From<Entity> for RegistryObject {
    fn from(entity: Entity) -> Self {
        RegistryObject::Entity(entity)
    }
}

impl From<View> for RegistryObject {
    fn from(view: View) -> Self {
        RegistryObject::View(view)
    }
}

impl From<Service> for RegistryObject {
    fn from(service: Service) -> Self {
        RegistryObject::Service(service)
    }
}

#[derive(Debug, Serialize)]
struct OnlineAttributesRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    attributes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<&'a str>,
    identifiers: BTreeMap<&'a str, &'a [String]>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(alias = "detail", alias = "error")]
    message: Value,
}

/// Registry client. Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct SignalsClient {
    http: reqwest::Client,
    settings: ClientSettings,
}

impl SignalsClient {
    pub fn new(settings: ClientSettings) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url(), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.http.request(method, self.url(path));
        for (header, value) in [
            ("X-API-Key", &self.settings.api_key),
            ("X-API-Key-ID", &self.settings.api_key_id),
            ("X-Org-ID", &self.settings.org_id),
        ] {
            if !value.is_empty() {
                builder = builder.header(header, value);
            }
        }
        builder
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ClientResult<T> {
        let response = check_status(builder.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Succeeds when the registry answers an authenticated request.
    pub async fn test_connection(&self) -> ClientResult<()> {
        let path = format!("{}/views/", REGISTRY_PATH);
        check_status(self.request(Method::GET, &path).send().await?).await?;
        info!(url = %self.settings.base_url(), "connected to registry");
        Ok(())
    }

    pub async fn list_views(&self) -> ClientResult<Vec<View>> {
        let path = format!("{}/views/", REGISTRY_PATH);
        let views: Vec<View> = self.send_json(self.request(Method::GET, &path)).await?;
        debug!(count = views.len(), "listed views");
        Ok(views)
    }

    pub async fn get_view(&self, name: &str, version: u32) -> ClientResult<View> {
        let path = format!("{}/views/{}/versions/{}", REGISTRY_PATH, name, version);
        let response = self.request(Method::GET, &path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound {
                kind: "view",
                name: format!("{}:{}", name, version),
            });
        }
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Create or update each object, in order.
    pub async fn apply(&self, objects: &[RegistryObject]) -> ClientResult<()> {
        for object in objects {
            let path = format!("{}/{}/", REGISTRY_PATH, object.collection());
            let body = object.body()?;
            check_status(self.request(Method::POST, &path).json(&body).send().await?).await?;
            info!(kind = object.kind(), name = object.name(), "applied");
        }
        Ok(())
    }

    pub async fn publish(&self, objects: &[RegistryObject]) -> ClientResult<()> {
        let published: Vec<RegistryObject> = objects.iter().map(RegistryObject::published).collect();
        self.apply(&published).await
    }

    pub async fn delete(&self, objects: &[RegistryObject]) -> ClientResult<()> {
        for object in objects {
            let path = format!("{}/{}", REGISTRY_PATH, object.item_path());
            let response = self.request(Method::DELETE, &path).send().await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(ClientError::NotFound {
                    kind: object.kind(),
                    name: object.name().to_string(),
                });
            }
            check_status(response).await?;
            info!(kind = object.kind(), name = object.name(), "deleted");
        }
        Ok(())
    }

    /// Online values of every attribute in `view` for the given entity identifiers.
    pub async fn get_view_attributes(
        &self,
        view: &View,
        identifiers: &[String],
    ) -> ClientResult<OnlineAttributes> {
        let request = OnlineAttributesRequest {
            attributes: Some(view.attribute_keys()),
            service: None,
            identifiers: BTreeMap::from([(view.entity.key_column(), identifiers)]),
        };
        self.send_json(self.request(Method::POST, ONLINE_ATTRIBUTES_PATH).json(&request))
            .await
    }

    pub async fn get_service_attributes(
        &self,
        service: &str,
        entity_key: &str,
        identifiers: &[String],
    ) -> ClientResult<OnlineAttributes> {
        let request = OnlineAttributesRequest {
            attributes: None,
            service: Some(service),
            identifiers: BTreeMap::from([(entity_key, identifiers)]),
        };
        self.send_json(self.request(Method::POST, ONLINE_ATTRIBUTES_PATH).json(&request))
            .await
    }

    /// Open the server-sent-event stream of interventions for `targets`.
    pub async fn open_intervention_stream(
        &self,
        targets: &[AttributeKeyIdentifier],
    ) -> ClientResult<Response> {
        let query: Vec<(&str, &str)> = targets
            .iter()
            .map(|t| (t.name.as_str(), t.id.as_str()))
            .collect();
        let response = self
            .request(Method::GET, INTERVENTIONS_PATH)
            .header("Accept", "text/event-stream")
            .query(&query)
            .send()
            .await?;
        check_status(response).await
    }
}

/// Map non-success responses to [`ClientError::Api`].
async fn check_status(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(ClientError::Api {
        status: status.as_u16(),
        message: error_message(&text),
    })
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(ApiErrorBody {
            message: Value::String(s),
        }) => s,
        Ok(ApiErrorBody { message }) => message.to_string(),
        Err(_) => body.trim().to_string(),
    }
}
