use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    lexical::SearchOptions,
    search::{IndexStats, SearchResponse, SearchService},
    vector_store::RelevantChunk,
};

/// Largest `limit` a vector search may ask for.
pub const MAX_VECTOR_RESULTS: usize = 20;

/// Default `limit` for vector searches.
pub const DEFAULT_VECTOR_RESULTS: usize = 4;

fn default_limit() -> usize {
    SearchOptions::default().limit
}

fn default_vector_limit() -> usize {
    DEFAULT_VECTOR_RESULTS
}

/// A lexical search request. Validated before it reaches the
/// [`SearchService`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_types: Option<Vec<String>>,
}

impl SearchRequest {
    /// Check the request and turn it into search options.
    pub fn validate(&self) -> Result<SearchOptions> {
        if self.query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".into()));
        }
        if self.limit == 0 {
            return Err(Error::Validation("limit must be at least 1".into()));
        }
        Ok(SearchOptions {
            limit: self.limit,
            offset: self.offset,
            file_types: self
                .file_types
                .clone()
                .filter(|types| !types.is_empty()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorSearchRequest {
    pub query: String,
    #[serde(default = "default_vector_limit")]
    pub limit: usize,
}

impl VectorSearchRequest {
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".into()));
        }
        if !(1..=MAX_VECTOR_RESULTS).contains(&self.limit) {
            return Err(Error::Validation(format!(
                "limit must be between 1 and {MAX_VECTOR_RESULTS}"
            )));
        }
        Ok(())
    }
}

/// `{success: true, data}` or `{success: false, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Paginated lexical search.
pub async fn search(
    service: &SearchService,
    request: &SearchRequest,
) -> Result<SearchResponse> {
    let options = request.validate()?;
    service.search(&request.query, &options).await
}

/// Semantic search. Failures come back as a user-readable message.
pub async fn vector_search(
    service: &SearchService,
    request: &VectorSearchRequest,
) -> ApiResponse<Vec<RelevantChunk>> {
    if let Err(e) = request.validate() {
        return ApiResponse::err(e.to_string());
    }
    match service.vector_search(&request.query, request.limit).await {
        Ok(chunks) => ApiResponse::ok(chunks),
        Err(e) => {
            tracing::warn!(error = %e, "vector search failed");
            ApiResponse::err(e.user_message())
        }
    }
}

pub async fn index_stats(service: &SearchService) -> IndexStats {
    service.stats().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: &str, limit: usize) -> SearchRequest {
        SearchRequest {
            query: query.into(),
            limit,
            offset: 0,
            file_types: None,
        }
    }

    #[test]
    fn search_request_validation() {
        assert!(request("rust", 10).validate().is_ok());
        assert!(matches!(
            request("  ", 10).validate(),
            Err(Error::Validation(_))
        ));
        assert!(request("rust", 0).validate().is_err());
    }

    #[test]
    fn empty_file_types_mean_no_filter() {
        let mut req = request("rust", 5);
        req.file_types = Some(vec![]);
        assert_eq!(req.validate().unwrap().file_types, None);
    }

    #[test]
    fn search_request_defaults() {
        let req: SearchRequest =
            serde_json::from_str(r#"{"query":"rust","fileTypes":["pdf"]}"#)
                .unwrap();
        assert_eq!(req.limit, SearchOptions::default().limit);
        assert_eq!(req.offset, 0);
        assert_eq!(req.file_types, Some(vec!["pdf".to_string()]));
    }

    #[test]
    fn vector_limit_bounds() {
        let req = |limit| VectorSearchRequest {
            query: "x".into(),
            limit,
        };
        assert!(req(0).validate().is_err());
        assert!(req(1).validate().is_ok());
        assert!(req(20).validate().is_ok());
        assert!(req(21).validate().is_err());
    }

    #[test]
    fn response_shape() {
        let ok = serde_json::to_value(ApiResponse::ok(3)).unwrap();
        assert_eq!(ok, serde_json::json!({"success": true, "data": 3}));

        let err = serde_json::to_value(ApiResponse::<u8>::err("nope")).unwrap();
        assert_eq!(err, serde_json::json!({"success": false, "error": "nope"}));
    }
}
