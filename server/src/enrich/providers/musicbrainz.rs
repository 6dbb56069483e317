use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::enrich::providers::{MetadataProvider, ProviderMetadata, ProviderResult};

const API_BASE: &str = "https://musicbrainz.org/ws/2";

pub struct MusicBrainzProvider {
    http: reqwest::Client,
}

impl MusicBrainzProvider {
    pub fn new(http: reqwest::Client) -> Self {
        MusicBrainzProvider { http }
    }
}

#[async_trait]
impl MetadataProvider for MusicBrainzProvider {
    fn name(&self) -> &'static str {
        "musicbrainz"
    }

    fn supports(&self, media_type: &str) -> bool {
        matches!(media_type, "music" | "audiobook")
    }

    async fn search(
        &self,
        title: &str,
        year: Option<i32>,
        _media_type: &str,
    ) -> Result<Vec<ProviderResult>> {
        let mut query = format!("releasegroup:{title}");

        if let Some(year) = year {
            query.push_str(&format!(" AND firstreleasedate:{year}*"));
        }

        let body: Value = self
            .http
            .get(format!("{API_BASE}/release-group/"))
            .query(&[("query", query.as_str()), ("fmt", "json"), ("limit", "5")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let results = body["release-groups"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|row| {
                Some(ProviderResult {
                    external_id: row["id"].as_str()?.to_owned(),
                    title: row["title"].as_str()?.to_owned(),
                    year: row["first-release-date"]
                        .as_str()
                        .and_then(|date| date.get(0..4))
                        .and_then(|y| y.parse().ok()),
                })
            })
            .collect();

        Ok(results)
    }

    async fn details(&self, external_id: &str) -> Result<ProviderMetadata> {
        let body: Value = self
            .http
            .get(format!("{API_BASE}/release-group/{external_id}"))
            .query(&[("fmt", "json"), ("inc", "artist-credits genres")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let genre = body["genres"]
            .as_array()
            .map(|genres| {
                genres
                    .iter()
                    .filter_map(|g| g["name"].as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .filter(|s| !s.is_empty());

        // the primary credited artist stands in for a director-style field
        let artist = body["artist-credit"]
            .as_array()
            .and_then(|credits| credits.first())
            .and_then(|credit| credit["name"].as_str())
            .map(|s| s.to_owned());

        Ok(ProviderMetadata {
            external_id: external_id.to_owned(),
            rating: None,
            genre,
            director: artist,
            runtime: None,
            original_title: None,
            cover_url: Some(format!(
                "https://coverartarchive.org/release-group/{external_id}/front-500"
            )),
            trailer_url: None,
            raw_data: body,
        })
    }
}
