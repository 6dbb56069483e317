use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::enrich::providers::{MetadataProvider, ProviderMetadata, ProviderResult};

const API_BASE: &str = "https://www.omdbapi.com/";

// "148 min" -> 148
fn parse_runtime(raw: &str) -> Option<i64> {
    raw.split_whitespace().next()?.parse().ok()
}

fn non_na(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|s| !s.is_empty() && *s != "N/A")
        .map(|s| s.to_owned())
}

pub struct OmdbProvider {
    http: reqwest::Client,
    api_key: String,
}

impl OmdbProvider {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        OmdbProvider { http, api_key }
    }
}

#[async_trait]
impl MetadataProvider for OmdbProvider {
    fn name(&self) -> &'static str {
        "omdb"
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
        let kind = match media_type {
            "tv_show" => "series",
            _ => "movie",
        };

        let mut request = self.http.get(API_BASE).query(&[
            ("apikey", self.api_key.as_str()),
            ("s", title),
            ("type", kind),
        ]);

        if let Some(year) = year {
            request = request.query(&[("y", year.to_string())]);
        }

        let body: Value = request.send().await?.error_for_status()?.json().await?;

        if body["Response"].as_str() == Some("False") {
            return Ok(Vec::new());
        }

        let results = body["Search"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|row| {
                Some(ProviderResult {
                    external_id: row["imdbID"].as_str()?.to_owned(),
                    title: row["Title"].as_str()?.to_owned(),
                    year: row["Year"]
                        .as_str()
                        .and_then(|y| y.get(0..4))
                        .and_then(|y| y.parse().ok()),
                })
            })
            .collect();

        Ok(results)
    }

    async fn details(&self, external_id: &str) -> Result<ProviderMetadata> {
        let body: Value = self
            .http
            .get(API_BASE)
            .query(&[("apikey", self.api_key.as_str()), ("i", external_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if body["Response"].as_str() == Some("False") {
            return Err(anyhow::Error::msg(format!(
                "omdb has no record for {external_id}"
            )));
        }

        Ok(ProviderMetadata {
            external_id: external_id.to_owned(),
            rating: body["imdbRating"]
                .as_str()
                .and_then(|r| r.parse().ok()),
            genre: non_na(&body["Genre"]),
            director: non_na(&body["Director"]),
            runtime: body["Runtime"].as_str().and_then(parse_runtime),
            original_title: None,
            cover_url: non_na(&body["Poster"]),
            trailer_url: None,
            raw_data: body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_parsing() {
        assert_eq!(parse_runtime("148 min"), Some(148));
        assert_eq!(parse_runtime("N/A"), None);
    }

    #[test]
    fn na_fields_are_absent() {
        assert_eq!(non_na(&Value::String("N/A".to_owned())), None);
        assert_eq!(non_na(&Value::String("".to_owned())), None);
        assert_eq!(
            non_na(&Value::String("Christopher Nolan".to_owned())).as_deref(),
            Some("Christopher Nolan")
        );
        assert_eq!(non_na(&Value::Null), None);
    }
}
