//! HTTP implementation of the collaborator traits against the YouTube Data API v3,
//! the YouTube Analytics API v2 and Google's OAuth token endpoint.

use std::time::{Duration, Instant};

use chrono::NaiveDate;
use parking_lot::RwLock;
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::analytics::api::{
    ApiError, ChannelSummary, CredentialProvider, PlaylistPage, ReportSource, VideoDirectory,
};
use crate::analytics::io::{Api, Credentials};
use crate::analytics::models::{METRICS, MetricSet, VideoRef};

pub(crate) mod entries;

use entries::{ChannelListEntry, PlaylistItemListEntry, ReportEntry, TokenEntry};

/// Counters for every request the sender made.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct RequestStats {
    pub(crate) total_requests: u64,
    pub(crate) failed_requests: u64,
    pub(crate) token_refreshes: u64,
}

/// Sends API requests on behalf of the authenticated account.
///
/// Shared by reference between all report workers; the access token is swapped in
/// place when refreshed.
pub(crate) struct YouTubeSender {
    client: Client,
    endpoints: Api,
    credentials: Credentials,
    access_token: RwLock<Option<String>>,
    stats: RwLock<RequestStats>,
}

impl YouTubeSender {
    pub(crate) fn new(endpoints: &Api, credentials: Credentials) -> Result<Self, reqwest::Error> {
        let client = Self::build_client(endpoints)?;
        let access_token = credentials.access_token.clone().filter(|t| !t.is_empty());

        Ok(Self {
            client,
            endpoints: endpoints.clone(),
            credentials,
            access_token: RwLock::new(access_token),
            stats: RwLock::new(RequestStats::default()),
        })
    }

    fn build_client(endpoints: &Api) -> Result<Client, reqwest::Error> {
        Client::builder()
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(endpoints.connect_timeout_secs))
            .timeout(Duration::from_secs(endpoints.request_timeout_secs))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .gzip(true)
            .use_rustls_tls()
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()
    }

    pub(crate) fn has_access_token(&self) -> bool {
        self.access_token.read().is_some()
    }

    pub(crate) fn get_stats(&self) -> RequestStats {
        self.stats.read().clone()
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.access_token.read().as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Sends a request and decodes a JSON body, classifying any failure.
    fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let start_time = Instant::now();
        self.stats.write().total_requests += 1;

        let result = self.send_json_inner(request);

        let duration = start_time.elapsed();
        match &result {
            Ok(_) => trace!("Request completed in {:?}", duration),
            Err(e) => {
                self.stats.write().failed_requests += 1;
                debug!("Request failed in {:?}: {}", duration, e);
            }
        }
        result
    }

    fn send_json_inner<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ApiError::from_error_body(status.as_u16(), &body));
        }
        response
            .json::<T>()
            .map_err(|e| ApiError::Transport(format!("undecodable response: {e}")))
    }
}

impl VideoDirectory for YouTubeSender {
    fn list_owned_channels(&self) -> Result<Vec<ChannelSummary>, ApiError> {
        let url = format!("{}/channels", self.endpoints.data_api_url);
        let request = self
            .client
            .get(url)
            .query(&[("mine", "true"), ("part", "contentDetails")]);
        let list: ChannelListEntry = self.send_json(self.authorized(request))?;
        Ok(list.items.into_iter().map(ChannelSummary::from).collect())
    }

    fn list_playlist_items(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<PlaylistPage, ApiError> {
        let url = format!("{}/playlistItems", self.endpoints.data_api_url);
        let max_results = max_results.to_string();
        let mut query = vec![
            ("playlistId", playlist_id),
            ("part", "snippet"),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let request = self.client.get(url).query(&query);
        let page: PlaylistItemListEntry = self.send_json(self.authorized(request))?;
        Ok(page.into())
    }
}

impl ReportSource for YouTubeSender {
    fn query_report(&self, video: &VideoRef, date: NaiveDate) -> Result<MetricSet, ApiError> {
        let url = format!("{}/reports", self.endpoints.analytics_api_url);
        let date = date.format("%Y-%m-%d").to_string();
        let ids = format!("channel=={}", video.channel_id());
        let filters = format!("video=={}", video.video_id());
        let metrics = METRICS.join(",");
        let request = self.client.get(url).query(&[
            ("metrics", metrics.as_str()),
            ("startDate", date.as_str()),
            ("endDate", date.as_str()),
            ("ids", ids.as_str()),
            ("filters", filters.as_str()),
        ]);
        let report: ReportEntry = self.send_json(self.authorized(request))?;
        report.metric_set().map_err(ApiError::Transport)
    }
}

impl CredentialProvider for YouTubeSender {
    fn refresh_access_token(&self) -> Result<(), ApiError> {
        info!("Refreshing access token...");
        let request = self.client.post(&self.endpoints.token_url).form(&[
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", self.credentials.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ]);
        let token: TokenEntry = self.send_json(request)?;

        match token.expires_in {
            Some(seconds) => debug!("New access token expires in {}s", seconds),
            None => debug!("New access token has no reported expiry"),
        }
        *self.access_token.write() = Some(token.access_token);
        self.stats.write().token_refreshes += 1;
        Ok(())
    }
}
