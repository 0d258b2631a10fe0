//! Person lookup against the TMDB search API.

use crate::types::ProfileImage;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org";
pub const DEFAULT_IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p/w500";
pub const DEFAULT_LANGUAGE: &str = "ko-KR";

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("search service returned HTTP {status}")]
    Status { status: u16 },
    #[error("invalid search response: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Maps a person's name to a profile image.
///
/// `Ok(None)` means the search succeeded but found nothing usable; that is
/// a normal outcome, not an error.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Option<ProfileImage>, LookupError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Person>,
}

#[derive(Debug, Deserialize)]
struct Person {
    name: Option<String>,
    profile_path: Option<String>,
}

/// Take the first result only; a missing or blank path means no match.
fn first_profile(response: SearchResponse, image_base_url: &str) -> Option<ProfileImage> {
    let person = response.results.into_iter().next()?;
    let profile_path = person.profile_path.filter(|p| !p.trim().is_empty())?;
    let url = format!("{image_base_url}{profile_path}");

    Some(ProfileImage {
        name: person.name,
        profile_path,
        url,
    })
}

/// TMDB `/3/search/person` client authenticated with a v4 bearer token.
pub struct TmdbResolver {
    http: Client,
    token: String,
    base_url: String,
    image_base_url: String,
    language: String,
}

impl TmdbResolver {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            token: token.into(),
            base_url: DEFAULT_TMDB_BASE_URL.to_string(),
            image_base_url: DEFAULT_IMAGE_BASE_URL.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_image_base_url(mut self, image_base_url: impl Into<String>) -> Self {
        self.image_base_url = image_base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

#[async_trait]
impl IdentityResolver for TmdbResolver {
    async fn resolve(&self, name: &str) -> Result<Option<ProfileImage>, LookupError> {
        tracing::debug!(name, language = %self.language, "searching person");

        let response = self
            .http
            .get(format!("{}/3/search/person", self.base_url))
            .query(&[
                ("query", name),
                ("include_adult", "true"),
                ("language", self.language.as_str()),
                ("page", "1"),
            ])
            .bearer_auth(&self.token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(LookupError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), name, "person search failed");
            return Err(LookupError::Status {
                status: status.as_u16(),
            });
        }

        let body: SearchResponse = response.json().await.map_err(LookupError::Decode)?;
        let hits = body.results.len();
        let found = first_profile(body, &self.image_base_url);

        tracing::info!(name, hits, found = found.is_some(), "person search complete");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> SearchResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_first_result_is_used() {
        let response = parse(
            r#"{"page":1,"results":[
                {"id":31,"name":"Tom Hanks","profile_path":"/abc.jpg"},
                {"id":32,"name":"Other","profile_path":"/other.jpg"}
            ],"total_results":2}"#,
        );
        let found = first_profile(response, DEFAULT_IMAGE_BASE_URL).unwrap();
        assert_eq!(found.url, "https://image.tmdb.org/t/p/w500/abc.jpg");
        assert_eq!(found.profile_path, "/abc.jpg");
        assert_eq!(found.name.as_deref(), Some("Tom Hanks"));
    }

    #[test]
    fn test_empty_results_is_not_found() {
        assert!(first_profile(parse(r#"{"results":[]}"#), DEFAULT_IMAGE_BASE_URL).is_none());
        assert!(first_profile(parse("{}"), DEFAULT_IMAGE_BASE_URL).is_none());
    }

    #[test]
    fn test_missing_profile_path_is_not_found() {
        // Later results are not consulted even when they have a picture.
        let response = parse(
            r#"{"results":[{"name":"A","profile_path":null},{"name":"B","profile_path":"/b.jpg"}]}"#,
        );
        assert!(first_profile(response, DEFAULT_IMAGE_BASE_URL).is_none());

        let response = parse(r#"{"results":[{"name":"A"}]}"#);
        assert!(first_profile(response, DEFAULT_IMAGE_BASE_URL).is_none());
    }

    #[test]
    fn test_image_base_url_trailing_slash_trimmed() {
        let resolver = TmdbResolver::new("t").with_image_base_url("https://cdn.example/w185/");
        assert_eq!(resolver.image_base_url, "https://cdn.example/w185");
    }
}
