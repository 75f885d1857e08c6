//! Typed Rust client for a CTF platform's on-demand machine API.
//!
//! Covers the `/machines` surface (start, status, terminate, bulk
//! terminate, ping) and the generic challenge attempt endpoint.
//!
//! Every call resolves with a [`Reply`] as long as the platform answered,
//! whatever the HTTP status. Only transport failures (no response, or a 2xx
//! body that is not a JSON envelope) are returned as [`Error`].

mod types;

pub use reqwest::StatusCode;
pub use types::*;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("machines api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("machines api {endpoint} returned a malformed body: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("machines api {endpoint} returned no data")]
    MissingData { endpoint: &'static str },

    #[error("invalid machine detail payload: {0}")]
    Detail(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// HTTP verbs the machine API accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

const NO_BODY: Option<&()> = None;

/// Client for the platform REST API rooted at e.g. `https://ctf.example.org/api/v1`.
#[derive(Clone)]
pub struct MachinesClient {
    api_root: String,
    csrf_token: String,
    session_cookie: Option<String>,
    http: reqwest::Client,
}

impl MachinesClient {
    pub fn new(api_root: impl Into<String>, csrf_token: impl Into<String>) -> Self {
        let api_root: String = api_root.into();
        Self {
            api_root: api_root.trim_end_matches('/').to_string(),
            csrf_token: csrf_token.into(),
            session_cookie: None,
            http: reqwest::Client::new(),
        }
    }

    /// Attach the platform session cookie (`session=...`) to every request.
    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    fn machines_url(&self, sub_path: &str) -> String {
        format!("{}/machines{sub_path}", self.api_root)
    }

    /// Issue a request against `/machines{sub_path}`.
    ///
    /// GET encodes `body` as query parameters, POST and DELETE send it as
    /// JSON (an empty object when absent).
    pub async fn call<B>(&self, method: Method, sub_path: &str, body: Option<&B>) -> Result<Reply>
    where
        B: serde::Serialize + ?Sized,
    {
        self.send("machines", method, self.machines_url(sub_path), body, &[])
            .await
    }

    async fn send<B>(
        &self,
        endpoint: &'static str,
        method: Method,
        url: String,
        body: Option<&B>,
        query: &[(&str, &str)],
    ) -> Result<Reply>
    where
        B: serde::Serialize + ?Sized,
    {
        let mut builder = self
            .http
            .request(method.to_reqwest(), &url)
            .header("Accept", "application/json")
            .header("CSRF-Token", &self.csrf_token);

        if let Some(cookie) = &self.session_cookie {
            builder = builder.header("Cookie", cookie);
        }
        if !query.is_empty() {
            builder = builder.query(query);
        }

        builder = match (method, body) {
            (Method::Get, Some(b)) => builder.query(b),
            (Method::Get, None) => builder,
            (_, Some(b)) => builder.json(b),
            (_, None) => builder.json(&serde_json::json!({})),
        };

        let resp = builder.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        let body: Envelope = match serde_json::from_slice(&bytes) {
            Ok(body) => body,
            // An error page from a proxy is still an answer.
            Err(e) if !status.is_success() => {
                tracing::debug!(endpoint, %status, error = %e, "non-JSON error body");
                Envelope::default()
            }
            Err(source) => return Err(Error::Decode { endpoint, source }),
        };

        tracing::debug!(endpoint, %status, success = body.success, "machines api reply");
        Ok(Reply::new(status, body))
    }

    // ── Machines ─────────────────────────────────────────────────────

    pub async fn start_machine(&self, challenge_id: i64) -> Result<Reply> {
        self.send(
            "start machine",
            Method::Post,
            self.machines_url(""),
            Some(&StartMachineRequest { challenge_id }),
            &[],
        )
        .await
    }

    pub async fn machine_status(&self, challenge_id: i64) -> Result<Reply> {
        self.send(
            "machine status",
            Method::Get,
            self.machines_url(&format!("/{challenge_id}")),
            NO_BODY,
            &[],
        )
        .await
    }

    pub async fn terminate_machine(&self, challenge_id: i64) -> Result<Reply> {
        self.send(
            "terminate machine",
            Method::Delete,
            self.machines_url(&format!("/{challenge_id}")),
            NO_BODY,
            &[],
        )
        .await
    }

    /// Admin-only: terminate several machines by machine log id.
    pub async fn terminate_machines(&self, machine_ids: &[i64]) -> Result<Reply> {
        self.send(
            "terminate machines",
            Method::Delete,
            self.machines_url(""),
            Some(&TerminateMachinesRequest {
                machine_ids: machine_ids.to_vec(),
            }),
            &[],
        )
        .await
    }

    /// Liveness probe; a healthy plugin answers `"pong"`.
    pub async fn ping(&self) -> Result<bool> {
        let reply = self
            .send("ping", Method::Get, self.machines_url("/ping"), NO_BODY, &[])
            .await?;
        Ok(reply.is_success()
            && reply.body.data.as_ref().and_then(|d| d.as_str()) == Some("pong"))
    }

    // ── Challenges ───────────────────────────────────────────────────

    /// Submit an answer. 429 and 403 come back as ordinary replies.
    pub async fn submit_attempt(&self, attempt: &AttemptRequest, preview: bool) -> Result<Reply> {
        let query: &[(&str, &str)] = if preview { &[("preview", "true")] } else { &[] };
        self.send(
            "challenge attempt",
            Method::Post,
            format!("{}/challenges/attempt", self.api_root),
            Some(attempt),
            query,
        )
        .await
    }
}
