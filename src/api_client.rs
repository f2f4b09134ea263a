//! HTTP client for the TNT REST API.
//!
//! A thin wrapper around `reqwest::blocking::Client`. One client is built per
//! run with the resolved endpoints and a request timeout, authenticated once
//! with the password grant, and then used for the handful of lookups a push
//! needs. Failures are never retried.

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;
use time::Date;

use crate::activity::{self, Activity, Organization, Project, Role, SaveActivityRequest};
use crate::config::ResolvedApi;
use crate::keychain::Credentials;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Invalid credentials, use 'tnt-git-hook set-credentials' to fix them")]
    InvalidCredentials,

    #[error("Not authenticated with TNT")]
    NotAuthenticated,

    #[error(
        "TNT not reachable or malfunctioning. Please, check availability. HTTP return code: {status}"
    )]
    Network { status: u16 },

    #[error("{item} with name \"{value}\" not found in TNT")]
    NotFound { item: &'static str, value: String },
}

// ---------------------------------------------------------------------------
// TntApi
// ---------------------------------------------------------------------------

/// The calls a push needs once a session is authenticated.
pub trait TntApi {
    fn organization_by_name(&self, name: &str) -> Result<Organization>;
    fn project_by_name(&self, organization: &Organization, name: &str) -> Result<Project>;
    fn role_by_name(&self, project: &Project, name: &str) -> Result<Role>;
    /// Activities imputed on `date`, flattened across days.
    fn activities_on(&self, date: Date) -> Result<Vec<Activity>>;
    fn save_activity(&self, request: &SaveActivityRequest) -> Result<()>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

// ---------------------------------------------------------------------------
// TntClient
// ---------------------------------------------------------------------------

pub struct TntClient {
    client: reqwest::blocking::Client,
    base_url: String,
    auth_url: String,
    client_auth: String,
    token: Option<String>,
}

impl TntClient {
    /// Build an unauthenticated client.
    ///
    /// The base URL is trimmed and stripped of trailing slashes; endpoint
    /// paths are joined with a single `/`.
    pub fn new(api: &ResolvedApi, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: api.base_url.trim().trim_end_matches('/').to_string(),
            auth_url: api.auth_url.trim().to_string(),
            client_auth: api.client_auth.clone(),
            token: None,
        })
    }

    /// Exchange user credentials for a bearer token (OAuth password grant).
    pub fn authenticate(&mut self, credentials: &Credentials) -> Result<()> {
        let form = [
            ("grant_type", "password"),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ];
        let resp = self
            .client
            .post(&self.auth_url)
            .header("Authorization", format!("Basic {}", self.client_auth))
            .form(&form)
            .send()
            .with_context(|| format!("failed to connect to TNT at {}", self.auth_url))?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(ApiError::InvalidCredentials.into());
        }
        let body = resp.text().context("failed to read token response")?;
        let token: TokenResponse =
            serde_json::from_str(&body).context("failed to parse token response")?;
        self.token = Some(token.access_token);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn auth_request(
        &self,
        method: reqwest::Method,
        url: &str,
    ) -> Result<reqwest::blocking::RequestBuilder> {
        let token = self.token.as_deref().ok_or(ApiError::NotAuthenticated)?;
        Ok(self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {token}")))
    }

    fn get(&self, path: &str) -> Result<String> {
        let url = self.url(path);
        let resp = self
            .auth_request(reqwest::Method::GET, &url)?
            .send()
            .with_context(|| format!("failed to connect to TNT at {url}"))?;
        read_success(resp)
    }
}

impl TntApi for TntClient {
    fn organization_by_name(&self, name: &str) -> Result<Organization> {
        let organizations = activity::decode_organizations(&self.get("organizations")?)?;
        pick_by_name("Organization", name, organizations, |o| &o.name)
    }

    fn project_by_name(&self, organization: &Organization, name: &str) -> Result<Project> {
        let path = format!("organizations/{}/projects", organization.id);
        let projects = activity::decode_projects(&self.get(&path)?)?;
        pick_by_name("Project", name, projects, |p| &p.name)
    }

    fn role_by_name(&self, project: &Project, name: &str) -> Result<Role> {
        let path = format!("projects/{}/roles", project.id);
        let roles = activity::decode_roles(&self.get(&path)?)?;
        pick_by_name("Role", name, roles, |r| &r.name)
    }

    fn activities_on(&self, date: Date) -> Result<Vec<Activity>> {
        let url = self.url("activities/");
        let day = date.to_string();
        let resp = self
            .auth_request(reqwest::Method::GET, &url)?
            .query(&[("startDate", day.as_str()), ("endDate", day.as_str())])
            .send()
            .with_context(|| format!("failed to connect to TNT at {url}"))?;
        let body = read_success(resp)?;
        Ok(activity::decode_activities(&body)?)
    }

    fn save_activity(&self, request: &SaveActivityRequest) -> Result<()> {
        let url = self.url("activities?autotruncate");
        let resp = self
            .auth_request(reqwest::Method::POST, &url)?
            .json(request)
            .send()
            .with_context(|| format!("failed to connect to TNT at {url}"))?;
        read_success(resp)?;
        Ok(())
    }
}

/// Body of a 200 response; any other status is a network error.
fn read_success(resp: reqwest::blocking::Response) -> Result<String> {
    let status = resp.status();
    if status != reqwest::StatusCode::OK {
        return Err(ApiError::Network {
            status: status.as_u16(),
        }
        .into());
    }
    resp.text().context("failed to read TNT response")
}

fn pick_by_name<T>(
    item: &'static str,
    name: &str,
    candidates: Vec<T>,
    name_of: impl Fn(&T) -> &String,
) -> Result<T> {
    candidates
        .into_iter()
        .find(|candidate| name_of(candidate) == name)
        .ok_or_else(|| {
            ApiError::NotFound {
                item,
                value: name.to_string(),
            }
            .into()
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::time::Duration;
    use time::macros::{date, datetime};

    /// A minimal HTTP mock server for testing.
    /// Binds to a random port, accepts one request, and responds with a
    /// pre-configured status and body.
    struct MockServer {
        addr: String,
        listener: TcpListener,
    }

    /// Captured request data from the mock server.
    #[derive(Debug)]
    struct CapturedRequest {
        method: String,
        path: String,
        headers: Vec<(String, String)>,
        body: String,
    }

    impl CapturedRequest {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }
    }

    impl MockServer {
        fn new() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
            Self { addr, listener }
        }

        fn url(&self) -> &str {
            &self.addr
        }

        fn respond(self, status: u16, body: &str) -> CapturedRequest {
            let (mut stream, _) = self.listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut parts = request_line.split_whitespace();
            let method = parts.next().unwrap_or_default().to_string();
            let path = parts.next().unwrap_or_default().to_string();

            let mut headers = Vec::new();
            let mut content_length: usize = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    break;
                }
                if let Some((key, value)) = trimmed.split_once(':') {
                    let (key, value) = (key.trim().to_string(), value.trim().to_string());
                    if key.eq_ignore_ascii_case("content-length") {
                        content_length = value.parse().unwrap_or(0);
                    }
                    headers.push((key, value));
                }
            }

            let mut body_buf = vec![0u8; content_length];
            reader.read_exact(&mut body_buf).unwrap();

            let response = format!(
                "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();

            CapturedRequest {
                method,
                path,
                headers,
                body: String::from_utf8_lossy(&body_buf).to_string(),
            }
        }
    }

    fn resolved(base_url: &str) -> ResolvedApi {
        ResolvedApi {
            base_url: base_url.to_string(),
            auth_url: format!("{base_url}/oauth/token"),
            client_auth: "Y2xpZW50OnNlY3JldA==".to_string(),
            timeout: Duration::from_secs(5),
            is_non_https: true,
        }
    }

    fn client_for(server: &MockServer) -> TntClient {
        TntClient::new(&resolved(server.url()), Duration::from_secs(5)).unwrap()
    }

    fn authenticated(server: &MockServer) -> TntClient {
        let mut client = client_for(server);
        client.token = Some("tok_abc".to_string());
        client
    }

    // -------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------

    #[test]
    fn test_constructor_strips_trailing_slashes() {
        let client =
            TntClient::new(&resolved(" https://tnt.example.com/api/// "), Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.base_url, "https://tnt.example.com/api");
        assert_eq!(client.url("organizations"), "https://tnt.example.com/api/organizations");
        assert!(client.token.is_none(), "no token before a successful login");
    }

    #[test]
    fn test_auth_request_requires_token() {
        let client =
            TntClient::new(&resolved("https://tnt.example.com/api"), Duration::from_secs(1))
                .unwrap();
        let err = client
            .organization_by_name("Autentia")
            .expect_err("lookup without token should fail");
        assert_eq!(
            err.downcast_ref::<ApiError>(),
            Some(&ApiError::NotAuthenticated)
        );
    }

    // -------------------------------------------------------------------
    // authenticate()
    // -------------------------------------------------------------------

    #[test]
    fn test_authenticate_stores_token() {
        let server = MockServer::new();
        let mut client = client_for(&server);

        let handle = std::thread::spawn(move || {
            server.respond(200, r#"{"access_token":"tok_123","token_type":"bearer"}"#)
        });
        client
            .authenticate(&Credentials::new("user", "p@ss"))
            .unwrap();
        let req = handle.join().unwrap();

        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/oauth/token");
        assert_eq!(req.header("Authorization"), Some("Basic Y2xpZW50OnNlY3JldA=="));
        assert!(req.body.contains("grant_type=password"), "body: {}", req.body);
        assert!(req.body.contains("username=user"), "body: {}", req.body);
        assert!(req.body.contains("password=p%40ss"), "body: {}", req.body);
        assert_eq!(client.token.as_deref(), Some("tok_123"));
    }

    #[test]
    fn test_authenticate_rejected_is_invalid_credentials() {
        let server = MockServer::new();
        let mut client = client_for(&server);

        let handle = std::thread::spawn(move || server.respond(401, r#"{"error":"unauthorized"}"#));
        let err = client
            .authenticate(&Credentials::new("user", "wrong"))
            .unwrap_err();
        handle.join().unwrap();

        assert_eq!(
            err.downcast_ref::<ApiError>(),
            Some(&ApiError::InvalidCredentials)
        );
        assert!(client.token.is_none(), "rejected login must not store a token");
    }

    // -------------------------------------------------------------------
    // Lookups by name
    // -------------------------------------------------------------------

    #[test]
    fn test_organization_by_name() {
        let server = MockServer::new();
        let client = authenticated(&server);

        let handle = std::thread::spawn(move || {
            server.respond(200, r#"[{"id":1,"name":"Other"},{"id":7,"name":"Autentia"}]"#)
        });
        let organization = client.organization_by_name("Autentia").unwrap();
        let req = handle.join().unwrap();

        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/organizations");
        assert_eq!(req.header("Authorization"), Some("Bearer tok_abc"));
        assert_eq!(organization, Organization::new(7, "Autentia"));
    }

    #[test]
    fn test_project_by_name_not_found() {
        let server = MockServer::new();
        let client = authenticated(&server);

        let handle =
            std::thread::spawn(move || server.respond(200, r#"[{"id":3,"name":"Internal"}]"#));
        let err = client
            .project_by_name(&Organization::new(7, "Autentia"), "Missing")
            .unwrap_err();
        let req = handle.join().unwrap();

        assert_eq!(req.path, "/organizations/7/projects");
        assert_eq!(err.to_string(), "Project with name \"Missing\" not found in TNT");
    }

    #[test]
    fn test_role_by_name_server_error() {
        let server = MockServer::new();
        let client = authenticated(&server);

        let handle = std::thread::spawn(move || server.respond(500, "boom"));
        let err = client
            .role_by_name(&Project::new(3, "Internal", true, false), "Developer")
            .unwrap_err();
        let req = handle.join().unwrap();

        assert_eq!(req.path, "/projects/3/roles");
        assert_eq!(
            err.downcast_ref::<ApiError>(),
            Some(&ApiError::Network { status: 500 })
        );
        assert!(err.to_string().contains("HTTP return code: 500"));
    }

    #[test]
    fn test_lookup_malformed_body_is_decode_error() {
        let server = MockServer::new();
        let client = authenticated(&server);

        let handle = std::thread::spawn(move || server.respond(200, r#"[{"id":1}]"#));
        let err = client.organization_by_name("Autentia").unwrap_err();
        handle.join().unwrap();

        let decode = err
            .downcast_ref::<activity::DecodeError>()
            .expect("should be a decode error");
        assert_eq!(decode.field.as_deref(), Some("name"));
    }

    // -------------------------------------------------------------------
    // Activities
    // -------------------------------------------------------------------

    #[test]
    fn test_activities_on_queries_single_day() {
        let server = MockServer::new();
        let client = authenticated(&server);

        let body = r#"[{"date":"2024-03-15","activities":[{"id":9,"startDate":"2024-03-15T05:00:00",
            "duration":0,"description":"d","billable":false,"organization":{"id":1,"name":"o"},
            "project":{"id":2,"name":"p"},"projectRole":{"id":3,"name":"r"}}]}]"#;
        let handle = std::thread::spawn(move || server.respond(200, body));
        let activities = client.activities_on(date!(2024-03-15)).unwrap();
        let req = handle.join().unwrap();

        assert_eq!(req.method, "GET");
        assert_eq!(
            req.path,
            "/activities/?startDate=2024-03-15&endDate=2024-03-15"
        );
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].project_role.id, 3);
    }

    #[test]
    fn test_save_activity_posts_json() {
        let server = MockServer::new();
        let client = authenticated(&server);

        let request = SaveActivityRequest {
            id: Some(42),
            start_date: datetime!(2024-03-15 5:00),
            duration: 0,
            description: "evidence".to_string(),
            billable: false,
            project_role_id: 3,
        };
        let handle = std::thread::spawn(move || server.respond(200, "{}"));
        client.save_activity(&request).unwrap();
        let req = handle.join().unwrap();

        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/activities?autotruncate");
        let sent: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(sent["id"], 42);
        assert_eq!(sent["startDate"], "2024-03-15T05:00:00");
        assert_eq!(sent["description"], "evidence");
        assert_eq!(sent["projectRoleId"], 3);
    }

    #[test]
    fn test_save_activity_rejected() {
        let server = MockServer::new();
        let client = authenticated(&server);

        let request = SaveActivityRequest {
            id: None,
            start_date: datetime!(2024-03-15 5:00),
            duration: 0,
            description: "evidence".to_string(),
            billable: false,
            project_role_id: 3,
        };
        let handle = std::thread::spawn(move || server.respond(400, r#"{"message":"bad"}"#));
        let err = client.save_activity(&request).unwrap_err();
        handle.join().unwrap();

        assert_eq!(
            err.downcast_ref::<ApiError>(),
            Some(&ApiError::Network { status: 400 })
        );
    }
}
