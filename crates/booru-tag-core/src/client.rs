use std::num::NonZeroU32;
use std::thread;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ExpanderConfig;
use crate::error::TagError;

pub const TAGS_ENDPOINT: &str = "tags.json";
pub const IMPLICATIONS_ENDPOINT: &str = "tag_implications.json";
pub const ALIASES_ENDPOINT: &str = "tag_aliases.json";

// Danbooru caps a single page at 1000 rows.
const RELATION_PAGE_LIMIT: &str = "1000";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TagRecord {
    pub name: String,
    pub is_deprecated: bool,
}

/// One row of `tag_implications.json` or `tag_aliases.json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelationRecord {
    pub antecedent_name: String,
    pub consequent_name: String,
    pub status: String,
}

impl RelationRecord {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// Where tag metadata comes from. The expander only talks to this trait.
pub trait TagSource {
    fn tag_info(&mut self, tag: &str) -> Result<Option<TagRecord>, TagError>;
    fn implications(&mut self, antecedent: &str) -> Result<Vec<RelationRecord>, TagError>;
    fn aliases(&mut self, antecedent: &str) -> Result<Vec<RelationRecord>, TagError>;
}

/// Keeps consecutive requests at least one period apart. A zero period
/// disables throttling.
pub struct RequestThrottle {
    limiter: Option<DefaultDirectRateLimiter>,
    clock: DefaultClock,
}

impl RequestThrottle {
    pub fn new(period: Duration) -> Self {
        let limiter = Quota::with_period(period)
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));
        Self {
            limiter,
            clock: DefaultClock::default(),
        }
    }

    /// Claims the next request slot, or returns how long until one is free.
    pub fn try_acquire(&self) -> Option<Duration> {
        let limiter = self.limiter.as_ref()?;
        match limiter.check() {
            Ok(()) => None,
            Err(not_until) => Some(not_until.wait_time_from(self.clock.now())),
        }
    }

    pub fn wait(&self) {
        while let Some(delay) = self.try_acquire() {
            thread::sleep(delay);
        }
    }
}

pub struct DanbooruClient {
    http: Client,
    site_url: String,
    credentials: Option<(String, String)>,
    throttle: RequestThrottle,
}

impl DanbooruClient {
    pub fn new(config: &ExpanderConfig) -> Result<Self, TagError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("danbooru-tag-expander/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| TagError::Http {
                endpoint: config.site_url.clone(),
                source,
            })?;
        let credentials = match (&config.username, &config.api_key) {
            (Some(user), Some(key)) => Some((user.clone(), key.clone())),
            _ => None,
        };
        Ok(Self {
            http,
            site_url: config.site_url.clone(),
            credentials,
            throttle: RequestThrottle::new(config.request_delay),
        })
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    fn get<T: DeserializeOwned>(
        &mut self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, TagError> {
        self.throttle.wait();

        let url = endpoint_url(&self.site_url, endpoint);
        debug!(endpoint, ?params, "requesting");
        let mut request = self.http.get(&url).query(params);
        if let Some((user, key)) = &self.credentials {
            request = request.basic_auth(user, Some(key));
        }

        let response = request.send().map_err(|source| TagError::Http {
            endpoint: endpoint.to_string(),
            source,
        })?;
        check_status(endpoint, response.status())?;
        response.json::<T>().map_err(|source| TagError::Http {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

impl TagSource for DanbooruClient {
    fn tag_info(&mut self, tag: &str) -> Result<Option<TagRecord>, TagError> {
        let records: Vec<TagRecord> = self.get(
            TAGS_ENDPOINT,
            &[("search[name]", tag), ("only", "name,is_deprecated")],
        )?;
        Ok(records.into_iter().next())
    }

    fn implications(&mut self, antecedent: &str) -> Result<Vec<RelationRecord>, TagError> {
        self.get(
            IMPLICATIONS_ENDPOINT,
            &[
                ("search[antecedent_name]", antecedent),
                ("limit", RELATION_PAGE_LIMIT),
            ],
        )
    }

    fn aliases(&mut self, antecedent: &str) -> Result<Vec<RelationRecord>, TagError> {
        self.get(
            ALIASES_ENDPOINT,
            &[
                ("search[antecedent_name]", antecedent),
                ("limit", RELATION_PAGE_LIMIT),
            ],
        )
    }
}

pub fn endpoint_url(site_url: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        site_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

pub fn check_status(endpoint: &str, status: StatusCode) -> Result<(), TagError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!("rate limit hit on {endpoint}");
        return Err(TagError::RateLimited {
            endpoint: endpoint.to_string(),
        });
    }
    if !status.is_success() {
        return Err(TagError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(())
}
