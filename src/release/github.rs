//! GitHub GraphQL implementation of the release query client.
//!
//! Pages through the `releases` and `releaseAssets` collections of a
//! repository using cursor pagination; requires a bearer token.

use serde_json::{json, Value};

use super::{AssetNode, Page, ReleaseNode, ReleaseQuery, ResolveError};
use crate::fetch::http_agent;

const GRAPHQL_ENDPOINT: &str = "https://api.github.com/graphql";

const RELEASES_QUERY: &str = r#"
query($owner:String!, $repo:String!, $releasesCursor:String) {
  repository(owner: $owner, name: $repo) {
    releases(first:100, after:$releasesCursor) {
      pageInfo { endCursor hasNextPage }
      nodes {
        isLatest
        tagName
      }
    }
  }
}
"#;

const ARTIFACTS_QUERY: &str = r#"
query($owner:String!, $repo:String!, $tagName:String!, $releaseAssetsCursor:String) {
  repository(owner: $owner, name: $repo) {
    release(tagName: $tagName) {
      releaseAssets(first: 100, after:$releaseAssetsCursor) {
        pageInfo { endCursor hasNextPage }
        nodes {
          name
          downloadUrl
        }
      }
    }
  }
}
"#;

/// Release query client backed by the GitHub GraphQL API.
pub struct GithubReleaseQuery {
    owner: String,
    repo: String,
    token: String,
}

impl GithubReleaseQuery {
    pub fn new(owner: &str, repo: &str, token: &str) -> Self {
        Self {
            owner: owner.to_owned(),
            repo: repo.to_owned(),
            token: token.to_owned(),
        }
    }

    /// Execute one GraphQL query and return the `data` value.
    fn graphql(&self, query: &str, variables: Value) -> Result<Value, ResolveError> {
        let body = json!({ "query": query, "variables": variables });

        let response = http_agent()
            .post(GRAPHQL_ENDPOINT)
            .header("Authorization", &format!("Bearer {}", self.token))
            .header("User-Agent", "attest-bridge")
            .send_json(&body)
            .map_err(|e| ResolveError::Query(e.to_string()))?;

        let text = response
            .into_body()
            .read_to_string()
            .map_err(|e| ResolveError::Query(e.to_string()))?;
        let value: Value =
            serde_json::from_str(&text).map_err(|e| ResolveError::Query(e.to_string()))?;

        if let Some(errors) = value.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(ResolveError::Query(
                    errors
                        .iter()
                        .filter_map(|e| e.get("message").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join("; "),
                ));
            }
        }

        value
            .get("data")
            .cloned()
            .ok_or_else(|| ResolveError::Query("GraphQL response has no data".to_owned()))
    }
}

impl ReleaseQuery for GithubReleaseQuery {
    fn releases(&self, cursor: Option<&str>) -> Result<Page<ReleaseNode>, ResolveError> {
        let data = self.graphql(
            RELEASES_QUERY,
            json!({
                "owner": self.owner,
                "repo": self.repo,
                "releasesCursor": cursor,
            }),
        )?;

        let releases = &data["repository"]["releases"];
        let nodes = releases["nodes"]
            .as_array()
            .ok_or_else(|| ResolveError::Query("releases.nodes missing".to_owned()))?
            .iter()
            .map(|node| ReleaseNode {
                is_latest: node["isLatest"].as_bool().unwrap_or(false),
                tag_name: node["tagName"].as_str().unwrap_or_default().to_owned(),
            })
            .collect();

        Ok(page_from_info(nodes, &releases["pageInfo"]))
    }

    fn release_assets(
        &self,
        tag: &str,
        cursor: Option<&str>,
    ) -> Result<Page<AssetNode>, ResolveError> {
        let data = self.graphql(
            ARTIFACTS_QUERY,
            json!({
                "owner": self.owner,
                "repo": self.repo,
                "tagName": tag,
                "releaseAssetsCursor": cursor,
            }),
        )?;

        let assets = &data["repository"]["release"]["releaseAssets"];
        let nodes = assets["nodes"]
            .as_array()
            .ok_or_else(|| ResolveError::Query("releaseAssets.nodes missing".to_owned()))?
            .iter()
            .map(|node| AssetNode {
                name: node["name"].as_str().unwrap_or_default().to_owned(),
                download_url: node["downloadUrl"].as_str().unwrap_or_default().to_owned(),
            })
            .collect();

        Ok(page_from_info(nodes, &assets["pageInfo"]))
    }
}

fn page_from_info<T>(nodes: Vec<T>, page_info: &Value) -> Page<T> {
    Page {
        nodes,
        end_cursor: page_info["endCursor"].as_str().map(str::to_owned),
        has_next_page: page_info["hasNextPage"].as_bool().unwrap_or(false),
    }
}
