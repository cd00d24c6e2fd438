use crate::infrastructure::model::types::ModelError;
use reqwest::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// How a provider expects its credential.
#[derive(Debug, Clone, Copy)]
pub enum Auth {
    None,
    Bearer,
    QueryKey,
}

/// Shared HTTP plumbing for the provider clients.
#[derive(Clone)]
pub struct HttpBase {
    pub provider: String,
    pub endpoint: String,
    api_key: Option<String>,
    http: Client,
}

impl HttpBase {
    pub fn new(
        provider: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            endpoint: endpoint.into(),
            api_key,
            http: Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        let base = self.endpoint.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    /// POST a JSON body and return the raw response with status checked.
    /// Streaming callers consume the body as chunks; the rest go through
    /// [`HttpBase::post_json`].
    pub async fn post<Req>(&self, url: &str, body: &Req, auth: Auth) -> Result<Response, ModelError>
    where
        Req: Serialize,
    {
        let mut request = match auth {
            Auth::None => self.http.post(url),
            Auth::Bearer => {
                let key = self.require_api_key()?;
                self.http.post(url).bearer_auth(key)
            }
            Auth::QueryKey => {
                let key = self.require_api_key()?;
                let separator = if url.contains('?') { '&' } else { '?' };
                self.http.post(format!("{url}{separator}key={key}"))
            }
        };
        request = request.json(body);

        request
            .send()
            .await
            .map_err(|e| ModelError::network(&self.provider, e))?
            .error_for_status()
            .map_err(|e| ModelError::network(&self.provider, e))
    }

    pub async fn post_json<Req, Res>(
        &self,
        url: &str,
        body: &Req,
        auth: Auth,
    ) -> Result<Res, ModelError>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        self.post(url, body, auth)
            .await?
            .json()
            .await
            .map_err(|e| ModelError::network(&self.provider, e))
    }

    fn require_api_key(&self) -> Result<&str, ModelError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ModelError::missing_api_key(&self.provider))
    }
}
