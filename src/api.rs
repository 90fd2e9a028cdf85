use crate::config::FetchConfig;
use crate::error::Result;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;

const API_ENDPOINT: &str = "https://easyeda.com/api/products/{lcsc_id}/components?version=6.4.19.5";
const ENDPOINT_3D_MODEL: &str = "https://modules.easyeda.com/3dmodel/{uuid}";
const ENDPOINT_3D_MODEL_STEP: &str = "https://modules.easyeda.com/qAxj6KHrDKw4blvCG8QJPs7Y/{uuid}";

#[derive(Deserialize, Debug)]
pub struct ApiResponse {
    pub success: bool,
    pub result: Option<Value>,
    pub code: Option<i32>,
    pub message: Option<String>,
}

/// Where component data is fetched from. Every method yields `None` when the
/// resource could not be obtained, after whatever retrying the source does.
pub trait ComponentSource: Send + Sync {
    fn cad_data(&self, lcsc_id: &str) -> impl Future<Output = Option<Value>> + Send;
    fn raw_3d_obj(&self, uuid: &str) -> impl Future<Output = Option<String>> + Send;
    fn step_3d(&self, uuid: &str) -> impl Future<Output = Option<Bytes>> + Send;
    fn datasheet(&self, url: &str) -> impl Future<Output = Option<Bytes>> + Send;
}

/// URL templates; `{lcsc_id}` and `{uuid}` are substituted per request.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub component: String,
    pub model_obj: String,
    pub model_step: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            component: API_ENDPOINT.to_string(),
            model_obj: ENDPOINT_3D_MODEL.to_string(),
            model_step: ENDPOINT_3D_MODEL_STEP.to_string(),
        }
    }
}

impl Endpoints {
    /// Same routes as the public service, rooted at `base` (e.g. a local mock).
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Endpoints {
            component: format!("{base}/api/products/{{lcsc_id}}/components?version=6.4.19.5"),
            model_obj: format!("{base}/3dmodel/{{uuid}}"),
            model_step: format!("{base}/qAxj6KHrDKw4blvCG8QJPs7Y/{{uuid}}"),
        }
    }
}

pub struct EasyedaApi {
    client: reqwest::Client,
    config: FetchConfig,
    endpoints: Endpoints,
}

impl EasyedaApi {
    pub fn new(config: FetchConfig) -> Result<Self> {
        Self::with_endpoints(config, Endpoints::default())
    }

    pub fn with_endpoints(config: FetchConfig, endpoints: Endpoints) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()?;
        Ok(EasyedaApi {
            client,
            config,
            endpoints,
        })
    }

    /// Runs `attempt` up to `max_retries` times with exponential backoff.
    /// `Err` is retried, `Ok(None)` is a definitive miss.
    async fn retrying<T, F, Fut>(&self, what: &str, mut attempt: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let attempts = self.config.max_retries.max(1);
        for n in 0..attempts {
            match attempt().await {
                Ok(found) => return found,
                Err(e) => {
                    log::warn!("{what}: attempt {}/{} failed: {e}", n + 1, attempts);
                    if n + 1 < attempts {
                        tokio::time::sleep(self.config.backoff(n)).await;
                    }
                }
            }
        }
        log::error!("{what}: giving up after {attempts} attempts");
        None
    }

    async fn get_bytes(&self, url: &str) -> Result<Option<Bytes>> {
        let res = self.client.get(url).send().await?.error_for_status()?;
        Ok(Some(res.bytes().await?))
    }

    pub async fn get_cad_data_of_component(&self, lcsc_id: &str) -> Option<Value> {
        let url = self.endpoints.component.replace("{lcsc_id}", lcsc_id);
        let url = url.as_str();
        self.retrying(&format!("component {lcsc_id}"), move || async move {
            let res = self
                .client
                .get(url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await?
                .error_for_status()?
                .json::<ApiResponse>()
                .await?;

            if !res.success {
                log::warn!(
                    "API refused {lcsc_id} (code {:?}): {}",
                    res.code,
                    res.message.as_deref().unwrap_or("Unknown API error")
                );
                return Ok(None);
            }
            Ok(res.result.filter(|r| !r.is_null()))
        })
        .await
    }

    pub async fn get_raw_3d_model_obj(&self, uuid: &str) -> Option<String> {
        let url = self.endpoints.model_obj.replace("{uuid}", uuid);
        let url = url.as_str();
        let bytes = self
            .retrying(&format!("OBJ model {uuid}"), move || self.get_bytes(url))
            .await?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn get_step_3d_model(&self, uuid: &str) -> Option<Bytes> {
        let url = self.endpoints.model_step.replace("{uuid}", uuid);
        let url = url.as_str();
        self.retrying(&format!("STEP model {uuid}"), move || self.get_bytes(url))
            .await
    }

    pub async fn get_datasheet(&self, url: &str) -> Option<Bytes> {
        self.retrying(&format!("datasheet {url}"), move || self.get_bytes(url))
            .await
    }
}

impl ComponentSource for EasyedaApi {
    async fn cad_data(&self, lcsc_id: &str) -> Option<Value> {
        self.get_cad_data_of_component(lcsc_id).await
    }

    async fn raw_3d_obj(&self, uuid: &str) -> Option<String> {
        self.get_raw_3d_model_obj(uuid).await
    }

    async fn step_3d(&self, uuid: &str) -> Option<Bytes> {
        self.get_step_3d_model(uuid).await
    }

    async fn datasheet(&self, url: &str) -> Option<Bytes> {
        self.get_datasheet(url).await
    }
}
