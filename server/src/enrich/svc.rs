use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use tokio::sync::oneshot::channel;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{Level, debug, error, info, instrument, warn};

use api::media::{ExternalMetadata, MediaItemStatus, MediaUuid};
use common::config::CSConfig;

use crate::db::msg::DbMsg;
use crate::enrich::{
    CsEnrichService, EnrichStatus,
    msg::EnrichMsg,
    providers::{
        MetadataProvider, ProviderMetadata, RateLimiter, musicbrainz::MusicBrainzProvider,
        omdb::OmdbProvider, tmdb::TmdbProvider,
    },
};
use crate::service::{
    CSM, CatalogizerService, CsInner, CsmReceiver, CsmRegistry, CsmSender, ServiceType,
};

// pacing per provider; musicbrainz asks for one request per second
const TMDB_INTERVAL: Duration = Duration::from_millis(250);
const OMDB_INTERVAL: Duration = Duration::from_millis(250);
const MUSICBRAINZ_INTERVAL: Duration = Duration::from_millis(1100);

// per-media-type provider precedence for the field merge
fn provider_priority(media_type: &str) -> &'static [&'static str] {
    match media_type {
        "movie" | "tv_show" => &["tmdb", "omdb"],
        "music" | "audiobook" => &["musicbrainz"],
        _ => &[],
    }
}

// enrichment service
//
// fans a media item out to every provider that serves its type, with a
// per-provider deadline and rate limiter, then merges the successful
// answers: one external_metadata row per provider, and media item fields
// filled from the highest-priority provider that supplied each field.
pub struct EnrichService {
    config: Arc<CSConfig>,
    receiver: Arc<Mutex<CsmReceiver>>,
    handle: AsyncCell<tokio::task::JoinHandle<Result<()>>>,
}

#[async_trait]
impl CatalogizerService for EnrichService {
    type Inner = EnrichState;

    fn create(config: Arc<CSConfig>, registry: &CsmRegistry) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<CSM>(1024);

        registry
            .insert(ServiceType::Enrich, tx)
            .expect("failed to add enrich sender to registry");

        EnrichService {
            config: config.clone(),
            receiver: Arc::new(Mutex::new(rx)),
            handle: AsyncCell::new(),
        }
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    async fn start(&self, registry: &CsmRegistry) -> Result<()> {
        info!("starting enrich service");

        let receiver = Arc::clone(&self.receiver);
        let state = Arc::new(EnrichState::new(self.config.clone(), registry.clone())?);

        let serve = {
            async move {
                let mut receiver = receiver.lock().await;

                while let Some(msg) = receiver.recv().await {
                    let state = Arc::clone(&state);
                    tokio::task::spawn(async move {
                        match state.message_handler(msg).await {
                            Ok(()) => (),
                            Err(err) => {
                                error!({service = "enrich", channel = "csm", error = %err})
                            }
                        }
                    });
                }

                Err(anyhow::Error::msg("enrich service csm channel disconnected"))
            }
        };

        self.handle.set(tokio::task::spawn(serve));

        debug!("started enrich service");
        Ok(())
    }
}

pub struct EnrichState {
    config: Arc<CSConfig>,
    registry: CsmRegistry,

    providers: Vec<Arc<dyn MetadataProvider>>,
    limiters: HashMap<&'static str, Arc<RateLimiter>>,

    enriched: AtomicI64,
    failures: AtomicI64,
}

#[async_trait]
impl CsInner for EnrichState {
    fn new(config: Arc<CSConfig>, registry: CsmRegistry) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("catalogizer/0.1")
            .timeout(Duration::from_millis(config.provider_timeout_ms))
            .build()?;

        let mut providers: Vec<Arc<dyn MetadataProvider>> = Vec::new();
        let mut limiters: HashMap<&'static str, Arc<RateLimiter>> = HashMap::new();

        if let Some(key) = &config.tmdb_api_key {
            providers.push(Arc::new(TmdbProvider::new(http.clone(), key.clone())));
            limiters.insert("tmdb", Arc::new(RateLimiter::new(TMDB_INTERVAL)));
        }

        if let Some(key) = &config.omdb_api_key {
            providers.push(Arc::new(OmdbProvider::new(http.clone(), key.clone())));
            limiters.insert("omdb", Arc::new(RateLimiter::new(OMDB_INTERVAL)));
        }

        // musicbrainz needs no credentials
        providers.push(Arc::new(MusicBrainzProvider::new(http.clone())));
        limiters.insert(
            "musicbrainz",
            Arc::new(RateLimiter::new(MUSICBRAINZ_INTERVAL)),
        );

        Ok(EnrichState {
            config,
            registry,
            providers,
            limiters,
            enriched: AtomicI64::new(0),
            failures: AtomicI64::new(0),
        })
    }

    fn registry(&self) -> CsmRegistry {
        self.registry.clone()
    }

    async fn message_handler(&self, csm: CSM) -> Result<()> {
        match csm {
            CSM::Enrich(message) => match message {
                EnrichMsg::Enrich { media_uuid } => self.enrich(media_uuid).await,
                EnrichMsg::Status { resp } => self.respond(resp, self.status()).await,
            },
            _ => Err(anyhow::Error::msg("not implemented")),
        }
    }
}

#[async_trait]
impl CsEnrichService for EnrichState {
    #[instrument(level=Level::DEBUG, skip(self))]
    async fn enrich(&self, media_uuid: MediaUuid) -> Result<()> {
        let db = self.db_sender()?;

        let (tx, rx) = channel();

        db.send(DbMsg::GetMediaItem { resp: tx, media_uuid }.into())
            .await?;

        let item = rx
            .await??
            .ok_or_else(|| anyhow::Error::msg("media item does not exist"))?;

        // resolve the media type name for provider selection
        let (tx, rx) = channel();

        db.send(DbMsg::GetMediaTypes { resp: tx }.into()).await?;

        let media_type = rx
            .await??
            .into_iter()
            .find(|(uuid, _)| *uuid == item.media_type_uuid)
            .map(|(_, media_type)| media_type.name)
            .ok_or_else(|| anyhow::Error::msg("media item has an unknown media type"))?;

        let deadline = Duration::from_millis(self.config.provider_timeout_ms);

        // provider fan-out; each failure is isolated
        let mut queries: JoinSet<(&'static str, Result<ProviderMetadata>)> = JoinSet::new();

        for provider in &self.providers {
            if !provider.supports(&media_type) {
                continue;
            }

            let provider = provider.clone();
            let limiter = self.limiters.get(provider.name()).cloned();
            let title = item.title.clone();
            let year = item.year;
            let media_type = media_type.clone();

            queries.spawn(async move {
                let name = provider.name();

                let outcome = tokio::time::timeout(deadline, async move {
                    if let Some(limiter) = limiter {
                        limiter.acquire().await;
                    }

                    let results = provider.search(&title, year, &media_type).await?;

                    let best = results
                        .into_iter()
                        .next()
                        .ok_or_else(|| anyhow::Error::msg("no search results"))?;

                    provider.details(&best.external_id).await
                })
                .await;

                match outcome {
                    Ok(result) => (name, result),
                    Err(_) => (name, Err(anyhow::Error::msg("provider deadline exceeded"))),
                }
            });
        }

        let mut answers: HashMap<&'static str, ProviderMetadata> = HashMap::new();

        while let Some(joined) = queries.join_next().await {
            let Ok((name, result)) = joined else {
                continue;
            };

            match result {
                Ok(metadata) => {
                    debug!({ media_uuid = media_uuid, provider = name }, "provider answered");
                    answers.insert(name, metadata);
                }
                Err(err) => {
                    warn!({ media_uuid = media_uuid, provider = name }, "provider failed: {err}");
                    self.failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if answers.is_empty() {
            return Ok(());
        }

        // one external_metadata row per successful provider
        for (name, metadata) in &answers {
            let (tx, rx) = channel();

            db.send(
                DbMsg::UpsertExternalMetadata {
                    resp: tx,
                    metadata: ExternalMetadata {
                        media_uuid,
                        provider: (*name).to_owned(),
                        external_id: metadata.external_id.clone(),
                        raw_data: metadata.raw_data.clone(),
                        rating: metadata.rating,
                        cover_url: metadata.cover_url.clone(),
                        trailer_url: metadata.trailer_url.clone(),
                    },
                }
                .into(),
            )
            .await?;

            rx.await??;
        }

        // field fill by provider precedence: the first provider in the
        // order that supplied a field wins it
        let mut genre = None;
        let mut director = None;
        let mut rating = None;
        let mut runtime = None;
        let mut original_title = None;

        for name in provider_priority(&media_type) {
            let Some(metadata) = answers.get(name) else {
                continue;
            };

            genre = genre.or_else(|| metadata.genre.clone());
            director = director.or_else(|| metadata.director.clone());
            rating = rating.or(metadata.rating);
            runtime = runtime.or(metadata.runtime);
            original_title = original_title.or_else(|| metadata.original_title.clone());
        }

        let (tx, rx) = channel();

        db.send(
            DbMsg::FillMediaItemFields {
                resp: tx,
                media_uuid,
                genre,
                director,
                rating,
                runtime,
                original_title,
            }
            .into(),
        )
        .await?;

        rx.await??;

        let (tx, rx) = channel();

        db.send(
            DbMsg::SetMediaItemStatus {
                resp: tx,
                media_uuid,
                status: MediaItemStatus::Enriched,
            }
            .into(),
        )
        .await?;

        rx.await??;

        self.enriched.fetch_add(1, Ordering::Relaxed);

        info!({ media_uuid = media_uuid, providers = answers.len() }, "media item enriched");

        Ok(())
    }

    async fn status(&self) -> Result<EnrichStatus> {
        Ok(EnrichStatus {
            enriched: self.enriched.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            active_providers: self.providers.iter().map(|p| p.name()).collect(),
        })
    }
}

impl EnrichState {
    fn db_sender(&self) -> Result<CsmSender> {
        self.registry.get(&ServiceType::Db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_precedence() {
        assert_eq!(provider_priority("movie"), ["tmdb", "omdb"]);
        assert_eq!(provider_priority("music"), ["musicbrainz"]);
        assert!(provider_priority("software").is_empty());
    }
}
