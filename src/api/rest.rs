use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::warn;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use super::WorkspaceApi;
use super::models::*;

const DBFS_READ_CHUNK: usize = 1024 * 1024;
const JOBS_PAGE_SIZE: usize = 25;

/// Prints the mount table of the cluster as one JSON object
const MOUNTS_COMMAND: &str = "import json\n\
print(json.dumps({m.mountPoint: m.source for m in dbutils.fs.mounts()}))";
const MOUNT_PREFIX: &str = "/mnt/";
const COMMAND_POLL_INTERVAL: Duration = Duration::from_secs(2);
const COMMAND_MAX_POLLS: usize = 300;

/// Raw HTTP response as seen by the REST client
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// HTTP client trait for testing
pub trait HttpClient: Send + Sync {
    fn get(&self, url: &Url, token: &str) -> Result<HttpResponse>;

    /// Only used for command execution; every other call is a GET
    fn post(&self, url: &Url, token: &str, body: &Value) -> Result<HttpResponse>;
}

/// Real HTTP client using reqwest
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("wsexport/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &Url, token: &str) -> Result<HttpResponse> {
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(token)
            .send()
            .with_context(|| format!("Failed to fetch URL: {}", url))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .with_context(|| format!("Failed to read response body from: {}", url))?;

        Ok(HttpResponse { status, body })
    }

    fn post(&self, url: &Url, token: &str, body: &Value) -> Result<HttpResponse> {
        let response = self
            .client
            .post(url.clone())
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .with_context(|| format!("Failed to post to URL: {}", url))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .with_context(|| format!("Failed to read response body from: {}", url))?;

        Ok(HttpResponse { status, body })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

/// Workspace REST API client
pub struct RestClient<H: HttpClient = ReqwestClient> {
    host: Url,
    token: String,
    http: H,
    /// Running cluster that lists the mount table
    mount_cluster: Option<String>,
    poll_interval: Duration,
}

impl RestClient<ReqwestClient> {
    /// Create a client for `host` authenticating with a personal access token
    pub fn new(host: &str, token: &str) -> Result<Self> {
        Self::with_client(host, token, ReqwestClient::new()?)
    }
}

impl<H: HttpClient> RestClient<H> {
    /// Create a client with a custom HTTP client (for testing)
    pub fn with_client(host: &str, token: &str, http: H) -> Result<Self> {
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };
        let host = Url::parse(&host).with_context(|| format!("Invalid workspace host: {}", host))?;

        Ok(Self {
            host,
            token: token.to_string(),
            http,
            mount_cluster: None,
            poll_interval: COMMAND_POLL_INTERVAL,
        })
    }

    pub fn with_mount_cluster(mut self, cluster_id: impl Into<String>) -> Self {
        self.mount_cluster = Some(cluster_id.into());
        self
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .host
            .join(path)
            .with_context(|| format!("Invalid API path: {}", path))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        Ok(url)
    }

    /// POST a JSON body and parse the JSON answer
    fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let url = self.url(path, &[])?;
        let response = self.http.post(&url, &self.token, body)?;

        if !(200..300).contains(&response.status) {
            bail!(
                "HTTP request failed with status {}: {}: {}",
                response.status,
                path,
                response.body.trim()
            );
        }

        serde_json::from_str(&response.body)
            .with_context(|| format!("Failed to parse response from: {}", path))
    }

    /// Run a Python command on `cluster_id` and return its text output
    fn run_python(&self, cluster_id: &str, command: &str) -> Result<String> {
        let context: CommandId = self.post(
            "/api/1.2/contexts/create",
            &json!({ "clusterId": cluster_id, "language": "python" }),
        )?;
        let result = self.run_in_context(cluster_id, &context.id, command);

        let destroyed: Result<Value> = self.post(
            "/api/1.2/contexts/destroy",
            &json!({ "clusterId": cluster_id, "contextId": context.id }),
        );
        if let Err(e) = destroyed {
            warn!("Cannot destroy execution context {} on {}: {:#}", context.id, cluster_id, e);
        }
        result
    }

    fn run_in_context(&self, cluster_id: &str, context_id: &str, command: &str) -> Result<String> {
        let started: CommandId = self.post(
            "/api/1.2/commands/execute",
            &json!({
                "clusterId": cluster_id,
                "contextId": context_id,
                "language": "python",
                "command": command,
            }),
        )?;

        for _ in 0..COMMAND_MAX_POLLS {
            let status: CommandStatus = self.get_required(
                "/api/1.2/commands/status",
                &[
                    ("clusterId", cluster_id),
                    ("contextId", context_id),
                    ("commandId", started.id.as_str()),
                ],
            )?;
            match status.status.as_str() {
                "Finished" => return status.results.into_text(),
                "Error" | "Cancelled" => bail!("Command on {} ended as {}", cluster_id, status.status),
                _ => std::thread::sleep(self.poll_interval),
            }
        }
        bail!("Command on {} did not finish in time", cluster_id)
    }

    /// GET a JSON document, `None` when the object does not exist
    fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<T>> {
        let url = self.url(path, query)?;
        let response = self.http.get(&url, &self.token)?;

        if response.status == 404 || is_missing_object(&response) {
            return Ok(None);
        }

        if !(200..300).contains(&response.status) {
            bail!(
                "HTTP request failed with status {}: {}: {}",
                response.status,
                path,
                response.body.trim()
            );
        }

        let value = serde_json::from_str(&response.body)
            .with_context(|| format!("Failed to parse response from: {}", path))?;
        Ok(Some(value))
    }

    fn get_required<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        self.get(path, query)?
            .ok_or_else(|| anyhow::anyhow!("{} returned no content", path))
    }
}

/// Escape a value for a quoted SCIM filter string
fn scim_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// The API reports some missing objects as 400 with a well-known error code
fn is_missing_object(response: &HttpResponse) -> bool {
    if response.status != 400 {
        return false;
    }
    match serde_json::from_str::<ApiErrorBody>(&response.body) {
        Ok(err) => {
            err.error_code == "RESOURCE_DOES_NOT_EXIST" || err.message.contains("does not exist")
        }
        Err(_) => false,
    }
}

#[derive(Deserialize)]
struct CommandId {
    id: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CommandResults {
    #[serde(default)]
    result_type: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    cause: String,
}

impl CommandResults {
    fn into_text(self) -> Result<String> {
        match self.result_type.as_str() {
            "text" => Ok(self.data.as_str().unwrap_or_default().to_string()),
            "error" => bail!("Command failed: {}", self.cause.trim()),
            other => bail!("Unexpected command result type {:?}", other),
        }
    }
}

#[derive(Deserialize, Default)]
struct CommandStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: CommandResults,
}

/// Mount points under `/mnt/` from the printed mount table
fn parse_mounts(output: &str, cluster_id: &str) -> Result<BTreeMap<String, MountInfo>> {
    let table: BTreeMap<String, String> =
        serde_json::from_str(output.trim()).context("Failed to parse the mount table")?;
    Ok(table
        .into_iter()
        .filter(|(mount_point, _)| mount_point.starts_with(MOUNT_PREFIX))
        .map(|(mount_point, source)| {
            let info = MountInfo {
                url: source,
                instance_profile: None,
                cluster_id: Some(cluster_id.to_string()),
            };
            (mount_point, info)
        })
        .collect())
}

#[derive(Deserialize, Default)]
struct ClusterList {
    #[serde(default)]
    clusters: Vec<ClusterInfo>,
}

#[derive(Deserialize, Default)]
struct LibraryStatus {
    #[serde(default)]
    library: serde_json::Value,
}

#[derive(Deserialize, Default)]
struct ClusterLibraries {
    #[serde(default)]
    library_statuses: Vec<LibraryStatus>,
}

#[derive(Deserialize, Default)]
struct JobList {
    #[serde(default)]
    jobs: Vec<JobInfo>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Deserialize, Default)]
struct InstanceProfileList {
    #[serde(default)]
    instance_profiles: Vec<InstanceProfile>,
}

#[derive(Deserialize, Default)]
struct ScimList<T> {
    #[serde(rename = "Resources", default = "Vec::new")]
    resources: Vec<T>,
}

#[derive(Deserialize, Default)]
struct ScopeList {
    #[serde(default)]
    scopes: Vec<SecretScope>,
}

#[derive(Deserialize, Default)]
struct SecretList {
    #[serde(default)]
    secrets: Vec<SecretMetadata>,
}

#[derive(Deserialize, Default)]
struct AclList {
    #[serde(default)]
    items: Vec<AclItem>,
}

#[derive(Deserialize, Default)]
struct DbfsChunk {
    #[serde(default)]
    bytes_read: usize,
    #[serde(default)]
    data: String,
}

#[derive(Deserialize, Default)]
struct ScriptList {
    #[serde(default)]
    scripts: Vec<GlobalInitScript>,
}

#[derive(Deserialize, Default)]
struct RepoList {
    #[serde(default)]
    repos: Vec<Repo>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl<H: HttpClient> WorkspaceApi for RestClient<H> {
    fn list_clusters(&self) -> Result<Vec<ClusterInfo>> {
        let list: ClusterList = self.get_required("/api/2.0/clusters/list", &[])?;
        Ok(list.clusters)
    }

    fn get_cluster(&self, cluster_id: &str) -> Result<Option<ClusterInfo>> {
        self.get("/api/2.0/clusters/get", &[("cluster_id", cluster_id)])
    }

    fn cluster_libraries(&self, cluster_id: &str) -> Result<Vec<serde_json::Value>> {
        let libraries: Option<ClusterLibraries> = self.get(
            "/api/2.0/libraries/cluster-status",
            &[("cluster_id", cluster_id)],
        )?;
        Ok(libraries
            .unwrap_or_default()
            .library_statuses
            .into_iter()
            .map(|s| s.library)
            .filter(|l| !l.is_null())
            .collect())
    }

    fn list_jobs(&self) -> Result<Vec<JobInfo>> {
        let mut jobs = Vec::new();
        let limit = JOBS_PAGE_SIZE.to_string();

        loop {
            let offset = jobs.len().to_string();
            let page: JobList = self.get_required(
                "/api/2.1/jobs/list",
                &[("limit", &limit), ("offset", &offset), ("expand_tasks", "false")],
            )?;
            let received = page.jobs.len();
            jobs.extend(page.jobs);

            if !page.has_more || received == 0 {
                break;
            }
        }

        Ok(jobs)
    }

    fn get_job(&self, job_id: &str) -> Result<Option<JobInfo>> {
        self.get("/api/2.0/jobs/get", &[("job_id", job_id)])
    }

    fn get_instance_pool(&self, pool_id: &str) -> Result<Option<InstancePool>> {
        self.get(
            "/api/2.0/instance-pools/get",
            &[("instance_pool_id", pool_id)],
        )
    }

    fn list_instance_profiles(&self) -> Result<Vec<InstanceProfile>> {
        let list: InstanceProfileList =
            self.get_required("/api/2.0/instance-profiles/list", &[])?;
        Ok(list.instance_profiles)
    }

    fn get_cluster_policy(&self, policy_id: &str) -> Result<Option<ClusterPolicy>> {
        self.get("/api/2.0/policies/clusters/get", &[("policy_id", policy_id)])
    }

    fn list_groups(&self) -> Result<Vec<ScimGroup>> {
        let list: ScimList<ScimGroup> =
            self.get_required("/api/2.0/preview/scim/v2/Groups", &[])?;
        Ok(list.resources)
    }

    fn get_user(&self, user_id: &str) -> Result<Option<ScimUser>> {
        self.get(&format!("/api/2.0/preview/scim/v2/Users/{}", user_id), &[])
    }

    fn find_user_by_name(&self, user_name: &str) -> Result<Option<ScimUser>> {
        let filter = format!("userName eq \"{}\"", scim_string(user_name));
        let list: ScimList<ScimUser> =
            self.get_required("/api/2.0/preview/scim/v2/Users", &[("filter", &filter)])?;
        Ok(list.resources.into_iter().next())
    }

    fn me(&self) -> Result<ScimUser> {
        self.get_required("/api/2.0/preview/scim/v2/Me", &[])
    }

    fn get_permissions(&self, object_path: &str) -> Result<Option<ObjectPermissions>> {
        self.get(&format!("/api/2.0/permissions{}", object_path), &[])
    }

    fn list_secret_scopes(&self) -> Result<Vec<SecretScope>> {
        let list: ScopeList = self.get_required("/api/2.0/secrets/scopes/list", &[])?;
        Ok(list.scopes)
    }

    fn list_secrets(&self, scope: &str) -> Result<Vec<SecretMetadata>> {
        let list: SecretList = self.get_required("/api/2.0/secrets/list", &[("scope", scope)])?;
        Ok(list.secrets)
    }

    fn list_secret_acls(&self, scope: &str) -> Result<Vec<AclItem>> {
        let list: AclList =
            self.get_required("/api/2.0/secrets/acls/list", &[("scope", scope)])?;
        Ok(list.items)
    }

    fn dbfs_status(&self, path: &str) -> Result<Option<FileInfo>> {
        self.get("/api/2.0/dbfs/get-status", &[("path", path)])
    }

    fn read_dbfs(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let mut content = Vec::new();
        let length = DBFS_READ_CHUNK.to_string();

        loop {
            let offset = content.len().to_string();
            let chunk: Option<DbfsChunk> = self.get(
                "/api/2.0/dbfs/read",
                &[("path", path), ("offset", &offset), ("length", &length)],
            )?;
            let Some(chunk) = chunk else {
                return Ok(None);
            };

            if chunk.bytes_read == 0 {
                break;
            }

            let bytes = STANDARD
                .decode(chunk.data.as_bytes())
                .with_context(|| format!("Invalid base64 content for dbfs:{}", path))?;
            content.extend_from_slice(&bytes);

            if chunk.bytes_read < DBFS_READ_CHUNK {
                break;
            }
        }

        Ok(Some(content))
    }

    fn list_mounts(&self) -> Result<BTreeMap<String, MountInfo>> {
        let Some(cluster_id) = &self.mount_cluster else {
            bail!("Listing mounts needs a running cluster, pass --mount-cluster");
        };
        let output = self.run_python(cluster_id, MOUNTS_COMMAND)?;
        parse_mounts(&output, cluster_id)
    }

    fn list_global_init_scripts(&self) -> Result<Vec<GlobalInitScript>> {
        let list: ScriptList = self.get_required("/api/2.0/global-init-scripts", &[])?;
        Ok(list.scripts)
    }

    fn get_global_init_script(&self, script_id: &str) -> Result<Option<GlobalInitScript>> {
        self.get(&format!("/api/2.0/global-init-scripts/{}", script_id), &[])
    }

    fn list_repos(&self) -> Result<Vec<Repo>> {
        let mut repos = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page: RepoList = match &token {
                Some(t) => self.get_required("/api/2.0/repos", &[("next_page_token", t)])?,
                None => self.get_required("/api/2.0/repos", &[])?,
            };
            repos.extend(page.repos);

            match page.next_page_token {
                Some(t) if !t.is_empty() => token = Some(t),
                _ => break,
            }
        }

        Ok(repos)
    }

    fn get_repo(&self, repo_id: &str) -> Result<Option<Repo>> {
        self.get(&format!("/api/2.0/repos/{}", repo_id), &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serves canned responses keyed by path and records requested URLs
    struct MockHttpClient {
        responses: Vec<(&'static str, u16, &'static str)>,
        requested: Mutex<Vec<String>>,
    }

    impl MockHttpClient {
        fn new(responses: Vec<(&'static str, u16, &'static str)>) -> Self {
            Self {
                responses,
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl MockHttpClient {
        fn respond(&self, url: &Url, token: &str) -> Result<HttpResponse> {
            assert_eq!(token, "dapi-token");
            self.requested.lock().unwrap().push(url.to_string());

            let (_, status, body) = self
                .responses
                .iter()
                .find(|(path, _, _)| url.path() == *path)
                .ok_or_else(|| anyhow::anyhow!("unexpected request {}", url))?;

            Ok(HttpResponse {
                status: *status,
                body: body.to_string(),
            })
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    impl HttpClient for MockHttpClient {
        fn get(&self, url: &Url, token: &str) -> Result<HttpResponse> {
            self.respond(url, token)
        }

        fn post(&self, url: &Url, token: &str, _body: &Value) -> Result<HttpResponse> {
            self.respond(url, token)
        }
    }

    #[test]
    fn test_host_without_scheme() {
        let client =
            RestClient::with_client("adb-1.azuredatabricks.net", "dapi-token", MockHttpClient::new(vec![]))
                .unwrap();
        let url = client.url("/api/2.0/clusters/get", &[("cluster_id", "a b")]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://adb-1.azuredatabricks.net/api/2.0/clusters/get?cluster_id=a+b"
        );
    }

    #[test]
    fn test_list_clusters() {
        let http = MockHttpClient::new(vec![(
            "/api/2.0/clusters/list",
            200,
            r#"{"clusters":[{"cluster_id":"c1","cluster_name":"etl"}]}"#,
        )]);
        let client = RestClient::with_client("https://host", "dapi-token", http).unwrap();

        let clusters = client.list_clusters().unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].cluster_name, "etl");
    }

    #[test]
    fn test_missing_objects_map_to_none() {
        let http = MockHttpClient::new(vec![
            ("/api/2.0/clusters/get", 400, r#"{"error_code":"INVALID_PARAMETER_VALUE","message":"Cluster c9 does not exist"}"#),
            ("/api/2.0/repos/5", 404, r#"{"error_code":"RESOURCE_DOES_NOT_EXIST"}"#),
        ]);
        let client = RestClient::with_client("https://host", "dapi-token", http).unwrap();

        assert!(client.get_cluster("c9").unwrap().is_none());
        assert!(client.get_repo("5").unwrap().is_none());
    }

    #[test]
    fn test_server_errors_are_errors() {
        let http = MockHttpClient::new(vec![("/api/2.0/secrets/scopes/list", 503, "busy")]);
        let client = RestClient::with_client("https://host", "dapi-token", http).unwrap();

        let err = client.list_secret_scopes().unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_read_dbfs_decodes_chunks() {
        let http = MockHttpClient::new(vec![(
            "/api/2.0/dbfs/read",
            200,
            r#"{"bytes_read":8,"data":"ZWNobyBoaQo="}"#,
        )]);
        let client = RestClient::with_client("https://host", "dapi-token", http).unwrap();

        let content = client.read_dbfs("/init/a.sh").unwrap().unwrap();
        assert_eq!(content, b"echo hi\n");
    }

    fn command_responses(status_body: &'static str) -> MockHttpClient {
        MockHttpClient::new(vec![
            ("/api/1.2/contexts/create", 200, r#"{"id":"ctx-1"}"#),
            ("/api/1.2/commands/execute", 200, r#"{"id":"cmd-1"}"#),
            ("/api/1.2/commands/status", 200, status_body),
            ("/api/1.2/contexts/destroy", 200, r#"{"id":"ctx-1"}"#),
        ])
    }

    #[test]
    fn test_list_mounts_runs_command_on_cluster() {
        let http = command_responses(
            r#"{"id":"cmd-1","status":"Finished","results":{"resultType":"text","data":"{\"/mnt/raw\": \"s3a://raw-bucket\", \"/databricks-datasets\": \"databricks-datasets\"}\n"}}"#,
        );
        let client = RestClient::with_client("https://host", "dapi-token", http)
            .unwrap()
            .with_mount_cluster("0101-abc-def");

        let mounts = client.list_mounts().unwrap();

        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts["/mnt/raw"].url, "s3a://raw-bucket");
        assert_eq!(mounts["/mnt/raw"].cluster_id.as_deref(), Some("0101-abc-def"));
        let requested = client.http.requested();
        assert!(requested.iter().any(|u| u.contains("commandId=cmd-1")));
        assert!(requested.last().unwrap().ends_with("/api/1.2/contexts/destroy"));
    }

    #[test]
    fn test_failed_mount_command_still_destroys_context() {
        let http = command_responses(
            r#"{"id":"cmd-1","status":"Finished","results":{"resultType":"error","cause":"NameError: dbutils"}}"#,
        );
        let client = RestClient::with_client("https://host", "dapi-token", http)
            .unwrap()
            .with_mount_cluster("0101-abc-def");

        let err = client.list_mounts().unwrap_err();

        assert!(err.to_string().contains("NameError"));
        assert!(client.http.requested().last().unwrap().ends_with("/api/1.2/contexts/destroy"));
    }

    #[test]
    fn test_list_mounts_needs_a_cluster() {
        let client =
            RestClient::with_client("https://host", "dapi-token", MockHttpClient::new(vec![])).unwrap();
        let err = client.list_mounts().unwrap_err();
        assert!(err.to_string().contains("--mount-cluster"));
        assert!(client.http.requested().is_empty());
    }

    #[test]
    fn test_user_filter_escapes_quotes() {
        let http = MockHttpClient::new(vec![(
            "/api/2.0/preview/scim/v2/Users",
            200,
            r#"{"Resources":[]}"#,
        )]);
        let client = RestClient::with_client("https://host", "dapi-token", http).unwrap();

        assert!(client.find_user_by_name("a\"b@example.com").unwrap().is_none());

        let requested = Url::parse(&client.http.requested()[0]).unwrap();
        let filter = requested
            .query_pairs()
            .find(|(k, _)| k == "filter")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(filter, r#"userName eq "a\"b@example.com""#);
    }
}
