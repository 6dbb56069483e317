use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::enrich::providers::{MetadataProvider, ProviderMetadata, ProviderResult};

const API_BASE: &str = "https://api.themoviedb.org/3";
const IMAGE_BASE: &str = "https://image.tmdb.org/t/p/w500";

// tmdb speaks separate movie and tv endpoints, so the kind is folded into
// the external id ("movie:603", "tv:1396")
fn split_external_id(external_id: &str) -> Result<(&str, &str)> {
    external_id
        .split_once(':')
        .ok_or_else(|| anyhow::Error::msg(format!("malformed tmdb id {external_id}")))
}

pub struct TmdbProvider {
    http: reqwest::Client,
    api_key: String,
}

impl TmdbProvider {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        TmdbProvider { http, api_key }
    }

    fn kind_for(media_type: &str) -> &'static str {
        match media_type {
            "tv_show" => "tv",
            _ => "movie",
        }
    }
}

#[async_trait]
impl MetadataProvider for TmdbProvider {
    fn name(&self) -> &'static str {
        "tmdb"
    }

    fn supports(&self, media_type: &str) -> bool {
        matches!(media_type, "movie" | "tv_show")
    }

    async fn search(
        &self,
        title: &str,
        year: Option<i32>,
        media_type: &str,
    ) -> Result<Vec<ProviderResult>> {
        let kind = Self::kind_for(media_type);

        let mut request = self
            .http
            .get(format!("{API_BASE}/search/{kind}"))
            .query(&[("api_key", self.api_key.as_str()), ("query", title)]);

        if let Some(year) = year {
            let param = if kind == "tv" {
                "first_air_date_year"
            } else {
                "year"
            };

            request = request.query(&[(param, year.to_string())]);
        }

        let body: Value = request.send().await?.error_for_status()?.json().await?;

        let results = body["results"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|row| {
                let id = row["id"].as_i64()?;

                let title = row["title"]
                    .as_str()
                    .or_else(|| row["name"].as_str())?
                    .to_owned();

                let year = row["release_date"]
                    .as_str()
                    .or_else(|| row["first_air_date"].as_str())
                    .and_then(|date| date.get(0..4))
                    .and_then(|y| y.parse().ok());

                Some(ProviderResult {
                    external_id: format!("{kind}:{id}"),
                    title,
                    year,
                })
            })
            .collect();

        Ok(results)
    }

    async fn details(&self, external_id: &str) -> Result<ProviderMetadata> {
        let (kind, id) = split_external_id(external_id)?;

        let body: Value = self
            .http
            .get(format!("{API_BASE}/{kind}/{id}"))
            .query(&[("api_key", self.api_key.as_str())])
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

        let runtime = body["runtime"]
            .as_i64()
            .or_else(|| body["episode_run_time"].as_array()?.first()?.as_i64());

        Ok(ProviderMetadata {
            external_id: external_id.to_owned(),
            rating: body["vote_average"].as_f64(),
            genre,
            director: None,
            runtime,
            original_title: body["original_title"]
                .as_str()
                .or_else(|| body["original_name"].as_str())
                .map(|s| s.to_owned()),
            cover_url: body["poster_path"]
                .as_str()
                .map(|path| format!("{IMAGE_BASE}{path}")),
            trailer_url: None,
            raw_data: body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_id_roundtrip() {
        assert_eq!(split_external_id("movie:603").unwrap(), ("movie", "603"));
        assert_eq!(split_external_id("tv:1396").unwrap(), ("tv", "1396"));
        assert!(split_external_id("603").is_err());
    }

    #[test]
    fn kind_mapping() {
        assert_eq!(TmdbProvider::kind_for("movie"), "movie");
        assert_eq!(TmdbProvider::kind_for("tv_show"), "tv");
    }
}
