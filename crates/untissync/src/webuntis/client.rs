//! HTTP client for the WebUntis JSON-RPC API.
//!
//! All calls are POSTs of a JSON-RPC 2.0 envelope to
//! `<url>/WebUntis/jsonrpc.do?school=<school_name>`:
//! 1. `authenticate` returns a session id
//! 2. every further call carries it as `JSESSIONID` cookie
//! 3. `logout` ends the session

use super::error::WebUntisError;
use super::types::*;
use super::{TimetableConnector, TimetableRange, TimetableSource};
use crate::config::{ClientConfig, WebUntisSystem};
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::COOKIE;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, info, warn};
use url::Url;

const RPC_PATH: &str = "WebUntis/jsonrpc.do";

/// Fields requested for classes, subjects and teachers of timetable periods.
const ID_AND_LONGNAME: [&str; 2] = ["id", "longname"];

/// A log-safe identifier derived from a session id.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct SessionKey(String);

impl SessionKey {
    /// Hashes the session id so the raw token never reaches the logs.
    pub fn from_session_id(session_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        let result = hasher.finalize();
        Self(hex::encode(&result[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}...", &self.0[..8.min(self.0.len())])
    }
}

mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Opens WebUntis sessions.
#[derive(Clone)]
pub struct WebUntisClient {
    client: Client,
    client_name: String,
}

impl WebUntisClient {
    /// Creates a client with the configured timeouts.
    pub fn new(config: &ClientConfig) -> Result<Self, WebUntisError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| WebUntisError::Network {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            client_name: config.client_name.clone(),
        })
    }
}

#[async_trait]
impl TimetableConnector for WebUntisClient {
    type Session = WebUntisSession;

    async fn login(&self, system: &WebUntisSystem) -> Result<WebUntisSession, WebUntisError> {
        let endpoint = rpc_endpoint(system)?;
        info!(
            system = %system.key(),
            user = %system.user,
            "Logging in to WebUntis"
        );

        let auth: AuthResult = call(
            &self.client,
            &endpoint,
            None,
            "authenticate",
            AuthParams {
                user: &system.user,
                password: &system.password,
                client: &self.client_name,
            },
        )
        .await?;

        if auth.session_id.is_empty() {
            return Err(WebUntisError::Authentication {
                message: "authenticate returned an empty session id".to_string(),
            });
        }

        let session_key = SessionKey::from_session_id(&auth.session_id);
        info!(
            system = %system.key(),
            session = %session_key,
            "WebUntis login succeeded"
        );

        Ok(WebUntisSession {
            client: self.client.clone(),
            endpoint,
            session_id: auth.session_id,
            session_key,
        })
    }
}

/// An authenticated WebUntis session.
pub struct WebUntisSession {
    client: Client,
    endpoint: Url,
    session_id: String,
    session_key: SessionKey,
}

impl WebUntisSession {
    async fn call<P, T>(&self, method: &str, params: P) -> Result<T, WebUntisError>
    where
        P: Serialize + Send,
        T: DeserializeOwned,
    {
        call(
            &self.client,
            &self.endpoint,
            Some(&self.session_id),
            method,
            params,
        )
        .await
    }
}

#[async_trait]
impl TimetableSource for WebUntisSession {
    async fn current_schoolyear(&self) -> Result<Schoolyear, WebUntisError> {
        self.call("getCurrentSchoolyear", serde_json::json!({})).await
    }

    async fn timegrid(&self) -> Result<Vec<TimegridDay>, WebUntisError> {
        self.call("getTimegridUnits", serde_json::json!({})).await
    }

    async fn classes(&self, schoolyear_id: i64) -> Result<Vec<Klasse>, WebUntisError> {
        self.call(
            "getKlassen",
            serde_json::json!({ "schoolyearId": schoolyear_id }),
        )
        .await
    }

    async fn rooms(&self) -> Result<Vec<Room>, WebUntisError> {
        self.call("getRooms", serde_json::json!({})).await
    }

    async fn room_timetable(
        &self,
        room_id: i64,
        range: TimetableRange,
    ) -> Result<Vec<TimetablePeriod>, WebUntisError> {
        let params = TimetableParams {
            options: TimetableOptions {
                element: TimetableElementRef {
                    id: room_id,
                    element_type: ELEMENT_TYPE_ROOM,
                },
                start_date: range.start_date,
                end_date: range.end_date,
                only_base_timetable: true,
                klasse_fields: ID_AND_LONGNAME.to_vec(),
                subject_fields: ID_AND_LONGNAME.to_vec(),
                teacher_fields: ID_AND_LONGNAME.to_vec(),
                room_fields: vec!["id", "name"],
            },
        };
        self.call("getTimetable", params).await
    }

    async fn logout(&self) -> Result<(), WebUntisError> {
        send_rpc::<_, serde_json::Value>(
            &self.client,
            &self.endpoint,
            Some(&self.session_id),
            "logout",
            serde_json::json!({}),
        )
        .await?;
        info!(session = %self.session_key, "Logged out of WebUntis");
        Ok(())
    }
}

/// Builds the JSON-RPC endpoint URL of a WebUntis installation.
fn rpc_endpoint(system: &WebUntisSystem) -> Result<Url, WebUntisError> {
    let base = if system.url.ends_with('/') {
        system.url.clone()
    } else {
        format!("{}/", system.url)
    };
    let mut endpoint = Url::parse(&base)?.join(RPC_PATH)?;
    endpoint
        .query_pairs_mut()
        .append_pair("school", &system.school_name);
    Ok(endpoint)
}

/// Performs a call whose result must be present.
async fn call<P, T>(
    client: &Client,
    endpoint: &Url,
    session_id: Option<&str>,
    method: &str,
    params: P,
) -> Result<T, WebUntisError>
where
    P: Serialize + Send,
    T: DeserializeOwned,
{
    send_rpc(client, endpoint, session_id, method, params)
        .await?
        .ok_or_else(|| WebUntisError::UnexpectedResponse {
            message: format!("{method} returned neither result nor error"),
        })
}

/// Sends one JSON-RPC request and unwraps the error object, if any.
async fn send_rpc<P, T>(
    client: &Client,
    endpoint: &Url,
    session_id: Option<&str>,
    method: &str,
    params: P,
) -> Result<Option<T>, WebUntisError>
where
    P: Serialize + Send,
    T: DeserializeOwned,
{
    let request = RpcRequest {
        id: generate_request_id(),
        method,
        params,
        jsonrpc: "2.0",
    };
    debug!(method = %method, request_id = %request.id, "Sending WebUntis request");

    let mut builder = client.post(endpoint.clone()).json(&request);
    if let Some(session_id) = session_id {
        builder = builder.header(COOKIE, format!("JSESSIONID={session_id}"));
    }

    let response = builder.send().await?;
    if !response.status().is_success() {
        warn!(
            method = %method,
            status = %response.status(),
            "WebUntis returned a non-success status"
        );
        return Err(WebUntisError::UnexpectedResponse {
            message: format!("{method} returned status {}", response.status()),
        });
    }

    let text = response.text().await?;
    let body: RpcResponse<T> = serde_json::from_str(&text)?;

    if let Some(error) = body.error {
        return Err(WebUntisError::from_rpc(error.code, error.message));
    }

    Ok(body.result)
}

/// Generates a random request id for the JSON-RPC envelope.
fn generate_request_id() -> String {
    let random: u32 = rand::thread_rng().gen();
    format!("{:08x}", random)
}
