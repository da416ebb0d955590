use crate::dexcom::{
    parse_system_time, DataRange, EgvsResponse, FetchError, QueryWindow, Reading,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

const DATA_RANGE_PATH: &str = "v2/users/self/dataRange";
const EGVS_PATH: &str = "v3/users/self/egvs";

/// Bearer-authenticated client for the glucose endpoints of the API.
#[derive(Debug, Clone)]
pub struct DexcomClient {
    base: Url,
    http: reqwest::Client,
}

impl DexcomClient {
    /// Create a client for the API at `base`.
    pub const fn new(base: Url, http: reqwest::Client) -> Self {
        Self { base, http }
    }

    /// The API base URL.
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        access_token: &str,
    ) -> Result<T, FetchError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .inspect_err(|err| warn!(%err, "request to dexcom api failed"))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(FetchError::AuthorizationRejected),
            status if !status.is_success() => return Err(FetchError::Status(status)),
            _ => {}
        }

        response.json::<T>().await.map_err(|err| {
            if err.is_decode() {
                FetchError::Malformed(err.to_string())
            } else {
                FetchError::Transport(err)
            }
        })
    }

    /// Fetch the range of data available for the authorized user.
    #[instrument(skip_all)]
    pub async fn data_range(&self, access_token: &str) -> Result<DataRange, FetchError> {
        let url = self.base.join(DATA_RANGE_PATH)?;
        self.get(url, access_token).await
    }

    /// Fetch the glucose records within `window`, newest first.
    #[instrument(skip_all, fields(start = %window.start(), end = %window.end()))]
    pub async fn readings(
        &self,
        access_token: &str,
        window: &QueryWindow,
    ) -> Result<EgvsResponse, FetchError> {
        let mut url = self.base.join(EGVS_PATH)?;
        url.query_pairs_mut().extend_pairs(window.query_params());
        self.get(url, access_token).await
    }

    /// Fetch the most recent reading.
    ///
    /// Asks for the data range first and then queries the window ending at
    /// its last reading. Returns [`None`] if the user has no readings in that
    /// window.
    pub async fn latest_reading(&self, access_token: &str) -> Result<Option<Reading>, FetchError> {
        let Some(range) = self.data_range(access_token).await?.egvs else {
            debug!("data range contains no glucose readings");
            return Ok(None);
        };

        let end = parse_system_time(&range.end.system_time)
            .map_err(|err| FetchError::Malformed(format!("bad end systemTime: {err}")))?;
        let window = QueryWindow::ending_at(end);

        let Some(record) = self
            .readings(access_token, &window)
            .await?
            .records
            .into_iter()
            .next()
        else {
            return Ok(None);
        };

        let value = record
            .value
            .ok_or_else(|| FetchError::Malformed("latest record has no value".to_owned()))?;
        let timestamp = parse_system_time(&record.system_time)
            .map_err(|err| FetchError::Malformed(format!("bad record systemTime: {err}")))?;

        Ok(Some(Reading { value, timestamp }))
    }
}
