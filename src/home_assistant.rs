use crate::config::HomeAssistantConfig;
use serde_derive::{Deserialize, Serialize};

pub struct HomeAssistantApi {
    endpoint_url: String,
    auth_token: String,
    client: reqwest::Client,
}

impl Default for HomeAssistantApi {
    fn default() -> Self {
        Self::from_env()
    }
}

impl HomeAssistantApi {
    pub fn new(config: HomeAssistantConfig) -> Self {
        Self {
            endpoint_url: config.url.trim_end_matches('/').to_string(),
            auth_token: config.token,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(HomeAssistantConfig::from_env())
    }

    /// Creates or updates the state of `entity_id`
    pub async fn publish_state(
        &self,
        entity_id: &str,
        payload: &StatePayload,
    ) -> Result<HAState, anyhow::Error> {
        if self.endpoint_url.is_empty() {
            anyhow::bail!("No HA connection");
        }
        let result = self
            .client
            .post(format!("{}/api/states/{}", self.endpoint_url, entity_id))
            .bearer_auth(&self.auth_token)
            .json(payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(result)
    }
}

/// Body of `POST /api/states/<entity_id>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePayload {
    pub state: String,
    pub attributes: StateAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateAttributes {
    pub friendly_name: String,
    pub unit_of_measurement: String,
    pub device_class: String,
    pub icon: String,
    pub state_class: String,
    pub unique_id: String,
    pub integration: String,
    pub serial: String,
}

/// State object echoed back by Home Assistant
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HAState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub last_changed: String,
    #[serde(default)]
    pub last_updated: String,
}

#[cfg(test)]
mod test_ha_wrapper {
    use super::*;

    fn payload() -> StatePayload {
        StatePayload {
            state: "612".to_string(),
            attributes: StateAttributes {
                friendly_name: "scd4x co2".to_string(),
                unit_of_measurement: "ppm".to_string(),
                device_class: "carbon_dioxide".to_string(),
                icon: "mdi:molecule-co2".to_string(),
                state_class: "measurement".to_string(),
                unique_id: "42_co2".to_string(),
                integration: "scd4x_bridge".to_string(),
                serial: "00000000002a".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_publish_state() {
        // Set up the mock server
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("POST", "/api/states/sensor.scd4x_co2")
            .match_header("Authorization", "Bearer test_token")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "state": "612",
                "attributes": { "unit_of_measurement": "ppm" }
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(
                r#"
                {
                    "entity_id": "sensor.scd4x_co2",
                    "state": "612",
                    "attributes": {},
                    "last_changed": "2024-01-01T12:00:00Z",
                    "last_updated": "2024-01-01T12:00:00Z"
                }
            "#,
            )
            .create();

        let api = HomeAssistantApi::new(HomeAssistantConfig {
            url: format!("{}/", server.url()),
            token: "test_token".to_string(),
        });
        let result = api
            .publish_state("sensor.scd4x_co2", &payload())
            .await
            .unwrap();

        assert_eq!(result.entity_id, "sensor.scd4x_co2");
        assert_eq!(result.state, "612");
        assert_eq!(result.last_changed, "2024-01-01T12:00:00Z");

        mock.assert();
    }

    #[tokio::test]
    async fn test_publish_state_rejected() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/states/sensor.scd4x_co2")
            .with_status(401)
            .create();

        let api = HomeAssistantApi::new(HomeAssistantConfig {
            url: server.url(),
            token: "wrong".to_string(),
        });
        let result = api.publish_state("sensor.scd4x_co2", &payload()).await;

        assert!(result.is_err());
        mock.assert();
    }

    #[tokio::test]
    async fn test_home_assistant_api_no_connection() {
        let api = HomeAssistantApi::new(HomeAssistantConfig::default());
        let result = api.publish_state("sensor.scd4x_co2", &payload()).await;

        assert!(result.is_err());
        assert_eq!(result.unwrap_err().to_string(), "No HA connection");
    }
}
