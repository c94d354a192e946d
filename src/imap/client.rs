//! Production [`MailClient`] over `async-imap` and `tokio-native-tls`.

use std::fmt::Debug;
use std::time::Duration;

use async_imap::imap_proto::{AttributeValue, Capability, MailboxDatum, Response, Status};
use async_imap::types::NameAttribute;
use futures::{StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::{Endpoint, Security, ServerConfig};
use crate::error::{Error, FetchError, Result};
use crate::retry::is_transient_io;
use crate::types::{FetchedBody, Folder, MailboxMeta, SequenceRange};

use super::{BodyStream, MailClient, MailSession};

/// Fetch item for the complete RFC 5322 message. The folder is opened with
/// EXAMINE, so this never sets `\Seen`.
const BODY_FULL: &str = "BODY[]";

/// Byte stream an IMAP session runs over: plain TCP or TLS.
trait ImapStream: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Debug> ImapStream for T {}

type BoxedStream = Box<dyn ImapStream>;

/// Connects to a single IMAP server with fixed credentials.
#[derive(Clone)]
pub struct ImapClient {
    endpoint: Endpoint,
    username: String,
    password: String,
}

impl Debug for ImapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapClient")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ImapClient {
    /// Build a client from validated server settings
    pub fn new(config: &ServerConfig) -> Result<Self> {
        Ok(Self {
            endpoint: config.endpoint()?,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Resolved endpoint this client dials
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn connect_error(&self, reason: impl ToString, transient: bool) -> Error {
        Error::Connect {
            address: self.endpoint.address(),
            reason: reason.to_string(),
            transient,
        }
    }

    /// Dial the server and secure the transport.
    ///
    /// Returns the stream and whether the greeting was already consumed while
    /// negotiating STARTTLS on the plain connection.
    async fn connect_stream(&self) -> Result<(BoxedStream, bool)> {
        let tcp = TcpStream::connect(self.endpoint.address())
            .await
            .map_err(|e| self.connect_error(&e, is_transient_io(e.kind())))?;

        match self.endpoint.security {
            Security::Plain => Ok((Box::new(tcp), false)),
            Security::Tls => Ok((Box::new(self.tls_handshake(tcp).await?), false)),
            Security::StartTls | Security::Opportunistic => {
                let mut client = async_imap::Client::new(tcp);
                self.read_greeting(&mut client).await?;

                if self.endpoint.security == Security::Opportunistic
                    && !self.offers_starttls(&mut client).await?
                {
                    tracing::warn!(
                        address = %self.endpoint.address(),
                        "server does not offer STARTTLS, logging in without encryption"
                    );
                    return Ok((Box::new(client.into_inner()), true));
                }

                client
                    .run_command_and_check_ok("STARTTLS", None)
                    .await
                    .map_err(|e| self.connect_error(format!("STARTTLS failed: {}", e), false))?;
                let tcp = client.into_inner();
                Ok((Box::new(self.tls_handshake(tcp).await?), true))
            }
        }
    }

    async fn tls_handshake(
        &self,
        tcp: TcpStream,
    ) -> Result<tokio_native_tls::TlsStream<TcpStream>> {
        let connector = native_tls::TlsConnector::new()
            .map_err(|e| self.connect_error(format!("TLS setup failed: {}", e), false))?;
        tokio_native_tls::TlsConnector::from(connector)
            .connect(&self.endpoint.host, tcp)
            .await
            .map_err(|e| self.connect_error(format!("TLS handshake failed: {}", e), false))
    }

    async fn read_greeting<T: ImapStream>(&self, client: &mut async_imap::Client<T>) -> Result<()> {
        match client.read_response().await {
            Some(Ok(_greeting)) => Ok(()),
            None => Err(self.connect_error("connection closed before greeting", true)),
            Some(Err(e)) => Err(self.connect_error(&e, is_transient_io(e.kind()))),
        }
    }

    /// Ask for CAPABILITY before login and look for STARTTLS
    async fn offers_starttls<T: ImapStream>(
        &self,
        client: &mut async_imap::Client<T>,
    ) -> Result<bool> {
        client
            .run_command("CAPABILITY")
            .await
            .map_err(|e| self.connect_error(format!("CAPABILITY failed: {}", e), true))?;

        let mut starttls = false;
        loop {
            let response = match client.read_response().await {
                Some(Ok(response)) => response,
                Some(Err(e)) => return Err(self.connect_error(&e, is_transient_io(e.kind()))),
                None => {
                    return Err(self.connect_error("connection closed during CAPABILITY", true));
                }
            };
            match response.parsed() {
                Response::Capabilities(caps) => {
                    starttls |= caps.iter().any(|cap| {
                        matches!(cap, Capability::Atom(atom) if atom.eq_ignore_ascii_case("STARTTLS"))
                    });
                }
                Response::Done {
                    status: Status::Ok, ..
                } => return Ok(starttls),
                Response::Done { information, .. } => {
                    return Err(self.connect_error(
                        format!(
                            "CAPABILITY rejected: {}",
                            information.as_deref().unwrap_or("no reason given")
                        ),
                        false,
                    ));
                }
                _ => {}
            }
        }
    }
}

#[async_trait::async_trait]
impl MailClient for ImapClient {
    async fn open_session(&self) -> Result<Box<dyn MailSession>> {
        let (stream, greeted) = self.connect_stream().await?;
        let mut client = async_imap::Client::new(stream);
        if !greeted {
            self.read_greeting(&mut client).await?;
        }

        let session = client
            .login(&self.username, &self.password)
            .await
            .map_err(|(e, _client)| match e {
                async_imap::error::Error::No(reason) | async_imap::error::Error::Bad(reason) => {
                    Error::Auth {
                        username: self.username.clone(),
                        reason,
                    }
                }
                other => self.connect_error(format!("login: {}", other), true),
            })?;

        tracing::debug!(
            address = %self.endpoint.address(),
            user = %self.username,
            "IMAP session established"
        );
        Ok(Box::new(ImapSession { session }))
    }
}

/// Authenticated `async-imap` session
pub struct ImapSession {
    session: async_imap::Session<BoxedStream>,
}

#[async_trait::async_trait]
impl MailSession for ImapSession {
    async fn list_folders(&mut self, reference: &str, pattern: &str) -> Result<Vec<Folder>> {
        let names: Vec<_> = self
            .session
            .list(Some(reference), Some(pattern))
            .await?
            .try_collect()
            .await?;

        Ok(names
            .iter()
            .map(|name| Folder {
                name: name.name().to_string(),
                delimiter: name.delimiter().map(str::to_string),
                no_select: name
                    .attributes()
                    .iter()
                    .any(|attr| matches!(attr, NameAttribute::NoSelect)),
            })
            .collect())
    }

    async fn select_folder(&mut self, name: &str, read_only: bool) -> Result<MailboxMeta> {
        let command = if read_only { "EXAMINE" } else { "SELECT" };
        self.session
            .run_command(format!("{} {}", command, quote(name)))
            .await?;

        let mut exists = 0;
        loop {
            let response = match self.session.read_response().await {
                Some(Ok(response)) => response,
                Some(Err(e)) => return Err(Error::Disconnected(e.to_string())),
                None => {
                    return Err(Error::Disconnected(format!(
                        "connection closed during {}",
                        command
                    )));
                }
            };
            match response.parsed() {
                Response::MailboxData(MailboxDatum::Exists(count)) => exists = *count,
                Response::Done {
                    status: Status::Ok, ..
                } => return Ok(MailboxMeta { exists }),
                Response::Done {
                    status,
                    information,
                    ..
                } => {
                    return Err(Error::Imap(format!(
                        "{} {}: {}",
                        command,
                        name,
                        status_text(status, information.as_deref())
                    )));
                }
                Response::Data {
                    status: Status::Bye,
                    information,
                    ..
                } => {
                    return Err(Error::Disconnected(status_text(
                        &Status::Bye,
                        information.as_deref(),
                    )));
                }
                _ => {}
            }
        }
    }

    async fn fetch_bodies<'a>(
        &'a mut self,
        range: SequenceRange,
    ) -> std::result::Result<BodyStream<'a>, FetchError> {
        // Read the raw responses so the tagged completion is seen: a NO/BAD or a
        // dropped connection must not look like the end of the folder.
        self.session
            .run_command(format!("FETCH {} {}", range, BODY_FULL))
            .await?;

        let bodies = futures::stream::unfold(Some(&mut self.session), |session| async move {
            let session = session?;
            loop {
                let step = match session.read_response().await {
                    Some(Ok(response)) => fetch_step(response.parsed()),
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "read failed during FETCH");
                        FetchStep::Failed(FetchError::Aborted)
                    }
                    None => FetchStep::Failed(FetchError::Aborted),
                };
                match step {
                    FetchStep::Body(body) => return Some((Ok(body), Some(session))),
                    FetchStep::Other => continue,
                    FetchStep::Done => return None,
                    FetchStep::Failed(failure) => return Some((Err(failure), None)),
                }
            }
        });
        Ok(bodies.boxed())
    }

    async fn logout(&mut self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.session.logout()).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Imap(format!(
                "LOGOUT not acknowledged within {}s",
                timeout.as_secs()
            ))),
        }
    }
}

/// What one server response means for a running FETCH
#[derive(Debug, PartialEq, Eq)]
enum FetchStep {
    Body(FetchedBody),
    /// Untagged data unrelated to the request (EXISTS, flag-only FETCH, ...)
    Other,
    Done,
    Failed(FetchError),
}

fn fetch_step(response: &Response<'_>) -> FetchStep {
    match response {
        Response::Fetch(seq, attributes) => {
            let body = attributes.iter().find_map(|attr| match attr {
                AttributeValue::BodySection { data, .. } => data.as_ref(),
                AttributeValue::Rfc822(data) => data.as_ref(),
                _ => None,
            });
            match body {
                Some(body) => FetchStep::Body(FetchedBody {
                    seq: *seq,
                    body: body.to_vec(),
                }),
                None => FetchStep::Other,
            }
        }
        Response::Done {
            status: Status::Ok, ..
        } => FetchStep::Done,
        Response::Done {
            status,
            information,
            ..
        } => FetchStep::Failed(FetchError::Server(status_text(
            status,
            information.as_deref(),
        ))),
        Response::Data {
            status: Status::Bye,
            ..
        } => FetchStep::Failed(FetchError::Aborted),
        _ => FetchStep::Other,
    }
}

/// `NO some reason` style rendering of a status response
fn status_text(status: &Status, information: Option<&str>) -> String {
    format!(
        "{} {}",
        format!("{:?}", status).to_uppercase(),
        information.unwrap_or("no reason given")
    )
}

/// Mailbox name as an IMAP quoted string
fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}
