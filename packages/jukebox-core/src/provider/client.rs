//! High-level provider commands over the Spotify Web API.
//!
//! [`SpotifyClient`] implements the provider traits. Reads go through
//! [`with_retry`]; mutations are sent exactly once.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::api::{
    check_response, request_access_token, AccessToken, ProviderError, ProviderResult,
    SpotifyCredentials,
};
use super::retry::with_retry;
use super::traits::{ProviderCatalog, ProviderControl, ProviderPlayback};
use super::types::{NowPlaying, Track};
use crate::protocol_constants::{
    MAX_SEARCH_TRACK_DURATION_MS, PROVIDER_ACCOUNTS_BASE, PROVIDER_API_BASE,
    PROVIDER_HTTP_TIMEOUT_SECS, SEARCH_RESULT_LIMIT,
};
use crate::utils::validate_track_uri;

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiImage {
    url: String,
    #[serde(default)]
    width: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiAlbum {
    #[serde(default)]
    images: Vec<ApiImage>,
}

/// A playable item. Episodes share the shape minus album and artists.
#[derive(Debug, Deserialize)]
struct ApiTrack {
    uri: String,
    name: String,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    album: Option<ApiAlbum>,
    #[serde(default)]
    explicit: bool,
}

#[derive(Debug, Deserialize)]
struct ApiCurrentlyPlaying {
    #[serde(default)]
    is_playing: bool,
    #[serde(default)]
    progress_ms: Option<u64>,
    #[serde(default)]
    item: Option<ApiTrack>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiPage {
    #[serde(default)]
    items: Vec<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct ApiSearch {
    #[serde(default)]
    tracks: ApiPage,
}

#[derive(Debug, Deserialize)]
struct ApiQueue {
    #[serde(default)]
    queue: Vec<ApiTrack>,
}

impl From<ApiTrack> for Track {
    fn from(api: ApiTrack) -> Self {
        // Largest artwork first; images without a width sort last.
        let image = api.album.and_then(|album| {
            album
                .images
                .into_iter()
                .max_by_key(|img| img.width.unwrap_or(0))
                .map(|img| img.url)
        });
        Self {
            uri: api.uri,
            name: api.name,
            artists: api.artists.into_iter().map(|a| a.name).collect(),
            duration_ms: api.duration_ms,
            image,
        }
    }
}

fn parse_json<T: DeserializeOwned>(body: &str) -> ProviderResult<T> {
    serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))
}

/// Parses a currently-playing body. An empty body or a null item means idle.
fn parse_currently_playing(body: &str) -> ProviderResult<Option<NowPlaying>> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    let parsed: ApiCurrentlyPlaying = parse_json(body)?;
    Ok(parsed.item.map(|item| NowPlaying {
        track: item.into(),
        is_playing: parsed.is_playing,
        progress_ms: parsed.progress_ms.unwrap_or(0),
    }))
}

fn parse_queue(body: &str) -> ProviderResult<Vec<Track>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: ApiQueue = parse_json(body)?;
    Ok(parsed.queue.into_iter().map(Track::from).collect())
}

fn parse_search(body: &str) -> ProviderResult<Vec<Track>> {
    let parsed: ApiSearch = parse_json(body)?;
    Ok(parsed
        .tracks
        .items
        .into_iter()
        .filter(|t| !t.explicit && t.duration_ms < MAX_SEARCH_TRACK_DURATION_MS)
        .map(Track::from)
        .collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Spotify Web API client with automatic access-token renewal.
pub struct SpotifyClient {
    /// HTTP client for all provider communication.
    http: Client,
    credentials: RwLock<SpotifyCredentials>,
    api_base: String,
    accounts_base: String,
    /// Cached bearer token; `None` until first use or after a 401.
    token: RwLock<Option<AccessToken>>,
    /// Serializes refreshes so concurrent callers share one exchange.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SpotifyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyClient")
            .field("api_base", &self.api_base)
            .field("accounts_base", &self.accounts_base)
            .field("has_token", &self.token.read().is_some())
            .finish()
    }
}

impl SpotifyClient {
    /// Creates a client against the public Spotify endpoints.
    #[must_use]
    pub fn new(http: Client, credentials: SpotifyCredentials) -> Self {
        Self::with_endpoints(http, credentials, PROVIDER_API_BASE, PROVIDER_ACCOUNTS_BASE)
    }

    /// Creates a client against custom endpoints (local mocks, proxies).
    #[must_use]
    pub fn with_endpoints(
        http: Client,
        credentials: SpotifyCredentials,
        api_base: &str,
        accounts_base: &str,
    ) -> Self {
        Self {
            http,
            credentials: RwLock::new(credentials),
            api_base: api_base.trim_end_matches('/').to_string(),
            accounts_base: accounts_base.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns a fresh bearer token, refreshing it when needed.
    async fn access_token(&self) -> ProviderResult<String> {
        if let Some(token) = self.token.read().as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(token) = self.token.read().as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let credentials = self.credentials.read().clone();
        let refreshed = request_access_token(&self.http, &self.accounts_base, &credentials).await?;
        if let Some(rotated) = refreshed.rotated_refresh_token {
            log::info!("[Spotify] Refresh token rotated");
            self.credentials.write().refresh_token = rotated;
        }
        let value = refreshed.token.value.clone();
        *self.token.write() = Some(refreshed.token);
        Ok(value)
    }

    /// Sends an authorized request and returns the response body.
    ///
    /// A 401 drops the cached token so the next attempt refreshes it.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> ProviderResult<(StatusCode, String)> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.api_base, path);

        let start = std::time::Instant::now();
        let mut req = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(token)
            .timeout(Duration::from_secs(PROVIDER_HTTP_TIMEOUT_SECS));
        if !query.is_empty() {
            req = req.query(query);
        }
        if method == Method::POST {
            req = req.header(reqwest::header::CONTENT_LENGTH, "0");
        }
        let res = req.send().await?;
        log::debug!(
            "[Spotify] {} {} -> {} in {:?}",
            method,
            path,
            res.status(),
            start.elapsed()
        );

        let res = match check_response(res).await {
            Ok(res) => res,
            Err(ProviderError::AuthExpired) => {
                self.token.write().take();
                return Err(ProviderError::AuthExpired);
            }
            Err(e) => return Err(e),
        };
        let status = res.status();
        let body = res.text().await?;
        Ok((status, body))
    }

    async fn get_body(&self, path: &str, query: &[(&str, &str)]) -> ProviderResult<String> {
        with_retry(path, || async {
            let (status, body) = self.send(Method::GET, path, query).await?;
            Ok(if status == StatusCode::NO_CONTENT {
                String::new()
            } else {
                body
            })
        })
        .await
    }
}

#[async_trait]
impl ProviderPlayback for SpotifyClient {
    async fn current_track(&self) -> ProviderResult<Option<NowPlaying>> {
        let body = self.get_body("/me/player/currently-playing", &[]).await?;
        parse_currently_playing(&body)
    }

    async fn queue_snapshot(&self) -> ProviderResult<Vec<Track>> {
        let body = self.get_body("/me/player/queue", &[]).await?;
        parse_queue(&body)
    }
}

#[async_trait]
impl ProviderControl for SpotifyClient {
    async fn enqueue(&self, uri: &str) -> ProviderResult<()> {
        log::info!("[Spotify] Enqueue {}", uri);
        self.send(Method::POST, "/me/player/queue", &[("uri", uri)])
            .await
            .map(|_| ())
    }

    async fn skip_to_next(&self) -> ProviderResult<()> {
        log::info!("[Spotify] Skip to next");
        self.send(Method::POST, "/me/player/next", &[])
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ProviderCatalog for SpotifyClient {
    async fn get_track(&self, uri: &str) -> ProviderResult<Track> {
        let id = validate_track_uri(uri).map_err(|e| ProviderError::NotFound(e.to_string()))?;
        let path = format!("/tracks/{id}");
        let body = self.get_body(&path, &[]).await?;
        let track: ApiTrack = parse_json(&body)?;
        Ok(track.into())
    }

    async fn search(&self, query: &str) -> ProviderResult<Vec<Track>> {
        let limit = SEARCH_RESULT_LIMIT.to_string();
        let body = self
            .get_body(
                "/search",
                &[("q", query), ("type", "track"), ("limit", limit.as_str())],
            )
            .await?;
        let tracks = parse_search(&body)?;
        log::debug!("[Spotify] Search {:?} -> {} track(s)", query, tracks.len());
        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACK_JSON: &str = r#"{
        "uri": "spotify:track:4uLU6hMCjMI75M1A2tKUQC",
        "name": "Never Gonna Give You Up",
        "duration_ms": 213573,
        "artists": [{"name": "Rick Astley"}],
        "album": {"images": [
            {"url": "https://i.scdn.co/small", "width": 64, "height": 64},
            {"url": "https://i.scdn.co/large", "width": 640, "height": 640}
        ]}
    }"#;

    fn credentials() -> SpotifyCredentials {
        SpotifyCredentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
            refresh_token: "refresh".into(),
        }
    }

    #[test]
    fn track_conversion_picks_largest_image() {
        let api: ApiTrack = serde_json::from_str(TRACK_JSON).unwrap();
        let track = Track::from(api);
        assert_eq!(track.name, "Never Gonna Give You Up");
        assert_eq!(track.artists, vec!["Rick Astley".to_string()]);
        assert_eq!(track.image.as_deref(), Some("https://i.scdn.co/large"));
    }

    #[test]
    fn empty_currently_playing_is_idle() {
        assert!(parse_currently_playing("").unwrap().is_none());
        assert!(parse_currently_playing(r#"{"is_playing":false,"item":null}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn currently_playing_carries_progress() {
        let body = format!(
            r#"{{"is_playing":true,"progress_ms":1234,"item":{}}}"#,
            TRACK_JSON
        );
        let now = parse_currently_playing(&body).unwrap().unwrap();
        assert!(now.is_playing);
        assert_eq!(now.progress_ms, 1234);
        assert_eq!(now.track.uri, "spotify:track:4uLU6hMCjMI75M1A2tKUQC");
    }

    #[test]
    fn queue_preserves_duplicates_and_order() {
        let body = format!(
            r#"{{"currently_playing":null,"queue":[{t},{t},{{"uri":"spotify:episode:x","name":"Pod"}}]}}"#,
            t = TRACK_JSON
        );
        let queue = parse_queue(&body).unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue[0].uri, queue[1].uri);
        assert_eq!(queue[2].name, "Pod");
        assert!(queue[2].artists.is_empty());
    }

    #[test]
    fn malformed_queue_is_parse_error() {
        assert!(matches!(parse_queue("{not json"), Err(ProviderError::Parse(_))));
    }

    async fn mock_token(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/api/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tok","token_type":"Bearer","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn no_content_means_nothing_playing() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let _playing = server
            .mock("GET", "/me/player/currently-playing")
            .match_header("authorization", "Bearer tok")
            .with_status(204)
            .create_async()
            .await;

        let client =
            SpotifyClient::with_endpoints(Client::new(), credentials(), &server.url(), &server.url());
        assert!(client.current_track().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queue_snapshot_fetches_queue() {
        let mut server = mockito::Server::new_async().await;
        let token = mock_token(&mut server).await;
        let _queue = server
            .mock("GET", "/me/player/queue")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"queue":[{}]}}"#, TRACK_JSON))
            .expect(2)
            .create_async()
            .await;

        let client =
            SpotifyClient::with_endpoints(Client::new(), credentials(), &server.url(), &server.url());
        assert_eq!(client.queue_snapshot().await.unwrap().len(), 1);
        // Second call reuses the cached token.
        assert_eq!(client.queue_snapshot().await.unwrap().len(), 1);
        token.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_drops_cached_token() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let _next = server
            .mock("POST", "/me/player/next")
            .with_status(401)
            .create_async()
            .await;

        let client =
            SpotifyClient::with_endpoints(Client::new(), credentials(), &server.url(), &server.url());
        let err = client.skip_to_next().await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthExpired));
        assert!(client.token.read().is_none());
    }

    #[tokio::test]
    async fn search_drops_explicit_and_long_tracks() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let search = server
            .mock("GET", "/search")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("q".into(), "never gonna".into()),
                mockito::Matcher::UrlEncoded("type".into(), "track".into()),
                mockito::Matcher::UrlEncoded("limit".into(), "25".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"tracks":{{"items":[
                    {t},
                    {{"uri":"spotify:track:explicitexplicitexplic","name":"Rude","explicit":true,"duration_ms":1000}},
                    {{"uri":"spotify:track:longlonglonglonglonglo","name":"Epic","duration_ms":420000}}
                ]}}}}"#,
                t = TRACK_JSON
            ))
            .create_async()
            .await;

        let client =
            SpotifyClient::with_endpoints(Client::new(), credentials(), &server.url(), &server.url());
        let tracks = client.search("never gonna").await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "Never Gonna Give You Up");
        search.assert_async().await;
    }

    #[test]
    fn search_without_tracks_is_empty() {
        assert!(parse_search("{}").unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_track_rejects_invalid_uri_without_request() {
        let client = SpotifyClient::with_endpoints(
            Client::new(),
            credentials(),
            "http://127.0.0.1:9",
            "http://127.0.0.1:9",
        );
        let err = client.get_track("spotify:album:nope").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }
}
