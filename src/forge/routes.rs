//! Maps administrative operations onto GitHub REST endpoints.

use reqwest::Method;
use serde_json::{Map, Value, json};

use crate::forge::client::ForgeError;
use crate::safety::Params;

/// Repository fields `update_repo_settings` may change
const REPO_SETTINGS_FIELDS: &[&str] = &[
    "name",
    "description",
    "homepage",
    "visibility",
    "private",
    "default_branch",
    "has_issues",
    "has_wiki",
    "has_projects",
    "has_discussions",
    "allow_squash_merge",
    "allow_merge_commit",
    "allow_rebase_merge",
    "allow_auto_merge",
    "delete_branch_on_merge",
];

/// One HTTP request against the API root
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub method: Method,
    /// Path segments, encoded when joined onto the base URL
    pub segments: Vec<String>,
    pub body: Option<Value>,
}

impl Route {
    fn new(method: Method, segments: &[&str]) -> Self {
        Self {
            method,
            segments: segments.iter().map(|s| s.to_string()).collect(),
            body: None,
        }
    }

    fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// `/a/b/c`, unencoded; for logs and tests
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

fn string<'a>(params: &'a Params, key: &str) -> Result<&'a str, ForgeError> {
    match params.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(_) => Err(ForgeError::InvalidParameter(
            key.to_string(),
            "must be a non-empty string".to_string(),
        )),
        None => Err(ForgeError::MissingParameter(key.to_string())),
    }
}

/// Integer ids, rendered for a path segment
fn id(params: &Params, key: &str) -> Result<String, ForgeError> {
    let value = params
        .get(key)
        .ok_or_else(|| ForgeError::MissingParameter(key.to_string()))?;

    let id = value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f > 0.0)
                .map(|f| f as u64)
        })
        .or_else(|| value.as_str().and_then(|s| s.parse::<u64>().ok()))
        .ok_or_else(|| {
            ForgeError::InvalidParameter(key.to_string(), "must be a positive integer".to_string())
        })?;

    Ok(id.to_string())
}

fn events(params: &Params) -> Option<Value> {
    match params.get("events")? {
        Value::String(event) => Some(json!([event])),
        other => Some(other.clone()),
    }
}

fn pick(params: &Params, keys: &[&str]) -> Map<String, Value> {
    keys.iter()
        .filter_map(|key| params.get(*key).map(|v| (key.to_string(), v.clone())))
        .collect()
}

fn repo_route(method: Method, owner: &str, repo: &str, rest: &[&str]) -> Route {
    let mut segments = vec!["repos".to_string(), owner.to_string(), repo.to_string()];
    segments.extend(rest.iter().map(|s| s.to_string()));
    Route {
        method,
        segments,
        body: None,
    }
}

/// Route for `operation`
pub fn route(operation: &str, params: &Params) -> Result<Route, ForgeError> {
    use Method as M;

    // Invitations are accepted by the invitee, outside any repository
    if operation == "accept_invitation" {
        let invitation = id(params, "invitation_id")?;
        return Ok(Route::new(M::PATCH, &["user", "repository_invitations", &invitation]));
    }

    let owner = string(params, "owner")?;
    let repo = string(params, "repo")?;
    let under_repo = |method: Method, rest: &[&str]| repo_route(method, owner, repo, rest);

    let route = match operation {
        "get_repo_settings" => under_repo(M::GET, &[]),
        "update_repo_settings" => {
            let body = pick(params, REPO_SETTINGS_FIELDS);
            if body.is_empty() {
                return Err(ForgeError::MissingParameter(
                    "at least one repository setting".to_string(),
                ));
            }
            under_repo(M::PATCH, &[]).with_body(Value::Object(body))
        }
        "archive_repository" => under_repo(M::PATCH, &[]).with_body(json!({"archived": true})),
        "delete_repository" => under_repo(M::DELETE, &[]),

        "get_branch_protection" => {
            under_repo(M::GET, &["branches", string(params, "branch")?, "protection"])
        }
        "update_branch_protection" => {
            let reviews = params
                .get("required_approving_review_count")
                .map(|count| json!({"required_approving_review_count": count}))
                .unwrap_or(Value::Null);
            let enforce_admins = params
                .get("enforce_admins")
                .and_then(Value::as_bool)
                .unwrap_or(false);

            under_repo(M::PUT, &["branches", string(params, "branch")?, "protection"]).with_body(
                json!({
                    "required_status_checks": null,
                    "enforce_admins": enforce_admins,
                    "required_pull_request_reviews": reviews,
                    "restrictions": null
                }),
            )
        }
        "delete_branch_protection" => {
            under_repo(M::DELETE, &["branches", string(params, "branch")?, "protection"])
        }

        "list_webhooks" => under_repo(M::GET, &["hooks"]),
        "create_webhook" => {
            let mut config = pick(params, &["url", "content_type", "secret"]);
            if !config.contains_key("url") {
                return Err(ForgeError::MissingParameter("url".to_string()));
            }
            config
                .entry("content_type")
                .or_insert_with(|| json!("json"));

            under_repo(M::POST, &["hooks"]).with_body(json!({
                "name": "web",
                "active": params.get("active").cloned().unwrap_or(json!(true)),
                "events": events(params).unwrap_or_else(|| json!(["push"])),
                "config": config
            }))
        }
        "update_webhook" => {
            let hook = id(params, "hook_id")?;
            let mut body = Map::new();
            let config = pick(params, &["url", "content_type", "secret"]);
            if !config.is_empty() {
                body.insert("config".to_string(), Value::Object(config));
            }
            if let Some(events) = events(params) {
                body.insert("events".to_string(), events);
            }
            if let Some(active) = params.get("active") {
                body.insert("active".to_string(), active.clone());
            }
            under_repo(M::PATCH, &["hooks", &hook]).with_body(Value::Object(body))
        }
        "delete_webhook" => under_repo(M::DELETE, &["hooks", &id(params, "hook_id")?]),
        "test_webhook" => under_repo(M::POST, &["hooks", &id(params, "hook_id")?, "tests"]),

        "list_collaborators" => under_repo(M::GET, &["collaborators"]),
        "check_collaborator" => {
            under_repo(M::GET, &["collaborators", string(params, "username")?])
        }
        "add_collaborator" | "update_collaborator_permission" => {
            let permission = params
                .get("permission")
                .cloned()
                .unwrap_or_else(|| json!("push"));
            under_repo(M::PUT, &["collaborators", string(params, "username")?])
                .with_body(json!({"permission": permission}))
        }
        "remove_collaborator" => {
            under_repo(M::DELETE, &["collaborators", string(params, "username")?])
        }
        "list_invitations" => under_repo(M::GET, &["invitations"]),
        "cancel_invitation" => {
            under_repo(M::DELETE, &["invitations", &id(params, "invitation_id")?])
        }

        "list_repo_teams" => under_repo(M::GET, &["teams"]),
        "add_repo_team" => {
            let team = id(params, "team_id")?;
            let permission = params
                .get("permission")
                .cloned()
                .unwrap_or_else(|| json!("push"));
            Route::new(M::PUT, &["teams", &team, "repos", owner, repo])
                .with_body(json!({"permission": permission}))
        }

        other => return Err(ForgeError::UnsupportedOperation(other.to_string())),
    };

    Ok(route)
}

/// Read that captures what `operation` is about to change
pub fn snapshot_route(operation: &str, params: &Params) -> Result<Option<Route>, ForgeError> {
    let read = match operation {
        "update_repo_settings" | "archive_repository" | "delete_repository" => "get_repo_settings",
        "update_branch_protection" | "delete_branch_protection" => "get_branch_protection",
        "update_webhook" | "delete_webhook" => {
            let mut route = route("delete_webhook", params)?;
            route.method = Method::GET;
            return Ok(Some(route));
        }
        "update_collaborator_permission" | "remove_collaborator" => {
            let mut route = route("check_collaborator", params)?;
            route.segments.push("permission".to_string());
            return Ok(Some(route));
        }
        _ => return Ok(None),
    };

    route(read, params).map(Some)
}
