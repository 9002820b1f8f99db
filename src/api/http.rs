use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::{ApiError, Result};
use super::{AccessApi, EntityId, EntityKind, EntitySummary, MatchMode, NewEntity};
use crate::config::ApiConfig;

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    data: Vec<EntityRow>,
}

#[derive(Debug, Deserialize)]
struct EntityRow {
    uuid: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    uuid: String,
}

#[derive(Debug, Serialize)]
struct CreateGroupBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CreateRoleBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    access: Vec<AccessBody<'a>>,
}

#[derive(Debug, Serialize)]
struct AccessBody<'a> {
    permission: &'a str,
    #[serde(rename = "resourceDefinitions")]
    resource_definitions: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct RolesBody<'a> {
    roles: &'a [String],
}

#[derive(Debug, Serialize)]
struct PrincipalsBody<'a> {
    principals: Vec<PrincipalRef<'a>>,
}

#[derive(Debug, Serialize)]
struct PrincipalRef<'a> {
    username: &'a str,
}

#[derive(Debug, Serialize)]
struct ServiceAccountsBody<'a> {
    service_accounts: Vec<ServiceAccountRef<'a>>,
}

#[derive(Debug, Serialize)]
struct ServiceAccountRef<'a> {
    #[serde(rename = "clientId")]
    client_id: &'a str,
}

/// REST client for an RBAC-style access-control API
pub struct HttpApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpApi {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        let token = config
            .token_env
            .as_deref()
            .filter(|name| !name.is_empty())
            .and_then(|name| std::env::var(name).ok());
        info!("Using access API at {}", config.base_url);
        Self::new(
            &config.base_url,
            token,
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = check_status(self.authorized(builder).send().await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn send_ack(&self, builder: RequestBuilder) -> Result<()> {
        check_status(self.authorized(builder).send().await?).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

fn create_body(entity: &NewEntity) -> serde_json::Result<serde_json::Value> {
    let description = entity.description.as_deref();
    match entity.kind {
        EntityKind::Group => serde_json::to_value(CreateGroupBody {
            name: &entity.name,
            description,
        }),
        EntityKind::Role => serde_json::to_value(CreateRoleBody {
            name: &entity.name,
            description,
            access: entity
                .permissions
                .iter()
                .map(|permission| AccessBody {
                    permission,
                    resource_definitions: Vec::new(),
                })
                .collect(),
        }),
    }
}

#[async_trait]
impl AccessApi for HttpApi {
    async fn lookup_by_name(
        &self,
        kind: EntityKind,
        name: &str,
        mode: MatchMode,
    ) -> Result<Vec<EntitySummary>> {
        let url = self.url(&format!("{}/", kind.collection()));
        debug!("GET {} name={}", url, name);
        let request = self
            .client
            .get(url)
            .query(&[("name", name), ("name_match", mode.as_query())]);
        let list: ListResponse = self.send_json(request).await?;
        Ok(list
            .data
            .into_iter()
            .map(|row| EntitySummary {
                id: EntityId(row.uuid),
                name: row.name,
            })
            .collect())
    }

    async fn create_entity(&self, entity: &NewEntity) -> Result<EntityId> {
        let url = self.url(&format!("{}/", entity.kind.collection()));
        let body = create_body(entity).map_err(|e| ApiError::Decode(e.to_string()))?;
        info!("POST {} ({})", url, entity.name);
        let created: CreatedResponse = self.send_json(self.client.post(url).json(&body)).await?;
        Ok(EntityId(created.uuid))
    }

    async fn assign_roles(&self, group: &EntityId, roles: &[String]) -> Result<()> {
        let url = self.url(&format!("groups/{group}/roles/"));
        info!("POST {} ({} roles)", url, roles.len());
        self.send_ack(self.client.post(url).json(&RolesBody { roles }))
            .await
    }

    async fn assign_members(&self, group: &EntityId, principals: &[String]) -> Result<()> {
        let url = self.url(&format!("groups/{group}/principals/"));
        info!("POST {} ({} principals)", url, principals.len());
        let body = PrincipalsBody {
            principals: principals
                .iter()
                .map(|username| PrincipalRef { username })
                .collect(),
        };
        self.send_ack(self.client.post(url).json(&body)).await
    }

    async fn assign_service_accounts(&self, group: &EntityId, client_ids: &[String]) -> Result<()> {
        let url = self.url(&format!("groups/{group}/service-accounts/"));
        info!("POST {} ({} service accounts)", url, client_ids.len());
        let body = ServiceAccountsBody {
            service_accounts: client_ids
                .iter()
                .map(|client_id| ServiceAccountRef { client_id })
                .collect(),
        };
        self.send_ack(self.client.post(url).json(&body)).await
    }
}
