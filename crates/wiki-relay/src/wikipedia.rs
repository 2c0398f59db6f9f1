use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::WikipediaConfig;
use crate::error::LookupError;

/// Resolves a topic to a short plain-text summary.
#[async_trait]
pub trait Encyclopedia: Send + Sync {
    async fn summary(&self, topic: &str) -> Result<String, LookupError>;
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    query: Option<Query>,
}

#[derive(Deserialize)]
struct Query {
    #[serde(default)]
    pages: Vec<Page>,
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct Page {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    pageprops: Option<PageProps>,
}

#[derive(Deserialize)]
struct PageProps {
    #[serde(default)]
    disambiguation: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct SearchHit {
    title: String,
}

enum PageLookup {
    Found(String),
    Missing,
}

/// MediaWiki action API client.
pub struct WikipediaClient {
    client: Client,
    api_url: String,
    sentences: u32,
}

impl WikipediaClient {
    pub fn new(config: &WikipediaConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .user_agent(concat!("wiki-relay/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_url: config.api_url(),
            sentences: config.sentences.max(1),
        }
    }

    async fn query(&self, params: &[(&str, &str)]) -> Result<Query, LookupError> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[("action", "query"), ("format", "json"), ("formatversion", "2")])
            .query(params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LookupError::Other(format!(
                "Wikipedia API returned {}",
                response.status()
            )));
        }

        let body: QueryResponse = response.json().await?;
        body.query
            .ok_or_else(|| LookupError::Other("Wikipedia response has no query".to_string()))
    }

    async fn lookup_page(&self, title: &str) -> Result<PageLookup, LookupError> {
        let sentences = self.sentences.to_string();
        let query = self
            .query(&[
                ("prop", "extracts|pageprops"),
                ("ppprop", "disambiguation"),
                ("exsentences", sentences.as_str()),
                ("explaintext", "1"),
                ("redirects", "1"),
                ("titles", title),
            ])
            .await?;

        let Some(page) = query.pages.into_iter().next() else {
            return Ok(PageLookup::Missing);
        };

        if page.missing || page.invalid {
            return Ok(PageLookup::Missing);
        }

        if page
            .pageprops
            .as_ref()
            .is_some_and(|props| props.disambiguation.is_some())
        {
            return Err(LookupError::Disambiguation(page.title));
        }

        match page.extract.map(|e| e.trim().to_string()) {
            Some(extract) if !extract.is_empty() => Ok(PageLookup::Found(extract)),
            _ => Err(LookupError::Other(format!("'{}' has no summary", page.title))),
        }
    }

    /// Best title match from full-text search.
    async fn suggest(&self, topic: &str) -> Result<Option<String>, LookupError> {
        let query = self
            .query(&[("list", "search"), ("srsearch", topic), ("srlimit", "1")])
            .await?;
        Ok(query.search.into_iter().next().map(|hit| hit.title))
    }
}

#[async_trait]
impl Encyclopedia for WikipediaClient {
    /// Exact title first, then the top search hit.
    async fn summary(&self, topic: &str) -> Result<String, LookupError> {
        if let PageLookup::Found(extract) = self.lookup_page(topic).await? {
            return Ok(extract);
        }

        let Some(suggestion) = self.suggest(topic).await? else {
            return Err(LookupError::PageNotFound(topic.to_string()));
        };
        debug!("No page titled '{}', trying '{}'", topic, suggestion);

        match self.lookup_page(&suggestion).await? {
            PageLookup::Found(extract) => Ok(extract),
            PageLookup::Missing => Err(LookupError::PageNotFound(topic.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> WikipediaClient {
        WikipediaClient::new(&WikipediaConfig {
            endpoint: format!("{}/w/api.php", server.uri()),
            ..WikipediaConfig::default()
        })
    }

    #[tokio::test]
    async fn test_summary_of_existing_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .and(query_param("titles", "Paris"))
            .and(query_param("exsentences", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": {"pages": [{"pageid": 681159, "title": "Paris",
                    "extract": "Paris est la capitale de la France."}]}
            })))
            .mount(&server)
            .await;

        let summary = client(&server).summary("Paris").await.unwrap();
        assert_eq!(summary, "Paris est la capitale de la France.");
    }

    #[tokio::test]
    async fn test_disambiguation_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .and(query_param("titles", "Mercure"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": {"pages": [{"pageid": 1, "title": "Mercure",
                    "extract": "Mercure peut désigner :", "pageprops": {"disambiguation": ""}}]}
            })))
            .mount(&server)
            .await;

        let err = client(&server).summary("Mercure").await.unwrap_err();
        assert!(matches!(err, LookupError::Disambiguation(title) if title == "Mercure"));
    }

    #[tokio::test]
    async fn test_missing_page_falls_back_to_search() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("titles", "tour eiffel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": {"pages": [{"title": "Tour eiffel", "missing": true}]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("list", "search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": {"search": [{"title": "Tour Eiffel"}]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("titles", "Tour Eiffel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": {"pages": [{"title": "Tour Eiffel", "extract": "La tour Eiffel est une tour de fer puddlé."}]}
            })))
            .mount(&server)
            .await;

        let summary = client(&server).summary("tour eiffel").await.unwrap();
        assert!(summary.starts_with("La tour Eiffel"));
    }

    #[tokio::test]
    async fn test_unknown_topic_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("titles", "Xyzzyqwv"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": {"pages": [{"title": "Xyzzyqwv", "missing": true}]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("list", "search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"query": {"search": []}})))
            .mount(&server)
            .await;

        let err = client(&server).summary("Xyzzyqwv").await.unwrap_err();
        assert!(matches!(err, LookupError::PageNotFound(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_other() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server).summary("Paris").await.unwrap_err();
        assert!(matches!(err, LookupError::Other(_)));
    }
}
